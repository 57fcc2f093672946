//! Client configuration
//!
//! Optional `<data_dir>/config.toml`; every field has a default and a few
//! can be overridden from the environment.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pairing::PairingOptions;
use crate::poller::PollerOptions;

pub const HOST_PORT_ENV: &str = "ROBODOCK_HOST_PORT";
pub const POLL_INTERVAL_ENV: &str = "ROBODOCK_POLL_INTERVAL_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{name}={value} is not a valid number")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port of the local host backend
    pub host_port: u16,
    pub poll_interval_ms: u64,
    pub pairing_refresh_secs: u64,
    pub host_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host_port: 42112,
            poll_interval_ms: 2000,
            pairing_refresh_secs: 30,
            host_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Load from `path` (a missing file means defaults), then apply env
    /// overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Config::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = lookup(HOST_PORT_ENV) {
            self.host_port = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: HOST_PORT_ENV,
                value,
            })?;
        }
        if let Some(value) = lookup(POLL_INTERVAL_ENV) {
            self.poll_interval_ms = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: POLL_INTERVAL_ENV,
                value,
            })?;
        }
        Ok(())
    }

    pub fn poller_options(&self, enabled: bool) -> PollerOptions {
        PollerOptions {
            interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            enabled,
        }
    }

    pub fn pairing_options(&self) -> PairingOptions {
        PairingOptions {
            refresh_every: Duration::from_secs(self.pairing_refresh_secs.max(1)),
        }
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_millis(self.host_timeout_ms)
    }
}
