use mgmt_controller::config::ConfigError;
use mgmt_controller::{ClientError, RegistrationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Failed to register the {controller} model: {source}")]
    Registration {
        controller: &'static str,
        source: RegistrationError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Setup of the {controller} controller failed: {reason}")]
    Setup {
        controller: &'static str,
        reason: String,
    },

    #[error("Unexpected result: {0}")]
    UnexpectedResult(String),

    #[error("Shutdown failed: {0}")]
    Shutdown(String),
}
