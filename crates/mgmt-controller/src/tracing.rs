use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Initializes the tracing/logging infrastructure for a controller process.
///
/// Filtering comes from `RUST_LOG`:
/// - `RUST_LOG=info` - operation failures, boot and shutdown
/// - `RUST_LOG=debug` - stage transitions, commits and rollbacks
/// - `RUST_LOG=mgmt_controller=trace` - every step and model write
///
/// # Example
///
/// ```ignore
/// setup_tracing();
/// tracing::info!("Controller started");
/// ```
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}

/// Like [`setup_tracing`], falling back to `config.level` when `RUST_LOG` is unset.
///
/// Does nothing if a global subscriber is already installed, so tests may call it freely.
pub fn setup_tracing_with(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
