//! Host configuration: the controller settings shared by both controllers, the worker
//! container's capacity and how the domain reaches the server.
//!
//! Loaded from an optional `mgmt-host.toml` overlaid with `MGMT_HOST__*` environment
//! variables, e.g. `MGMT_HOST__CONTROLLER__BLOCKING_TIMEOUT_MS=5000` or
//! `MGMT_HOST__PROXY_TRANSPORT=remote`.

use mgmt_controller::config::{load_config, ConfigError};
use mgmt_controller::ControllerConfig;
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "MGMT_HOST";
pub const DEFAULT_CONFIG_FILE: &str = "mgmt-host";

/// How the domain controller's proxy reaches the server controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyTransport {
    /// Direct calls into the server controller.
    #[default]
    Local,
    /// Through a [`mgmt_controller::transport::ControllerActor`].
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default = "default_worker_capacity")]
    pub worker_capacity: usize,

    #[serde(default)]
    pub proxy_transport: ProxyTransport,
}

fn default_worker_capacity() -> usize {
    4
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            worker_capacity: default_worker_capacity(),
            proxy_transport: ProxyTransport::default(),
        }
    }
}

impl HostConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        load_config(path, ENV_PREFIX)
    }
}
