//! Robodock Host
//!
//! The narrow seam between the orchestrator and the process that actually
//! spawns and kills robot-control subprocesses: a request/response command
//! surface (`HostCollaborator`) and a one-way event bus (`HostEventBus`).

pub mod events;
pub mod http;
pub mod startup;

pub use events::{EventFeed, EventForwarder, HostEventBus};
pub use http::HttpHost;
pub use startup::{startup_status_for, startup_status_from_log, StartupStatus};

use async_trait::async_trait;
use robodock_protocol::{ActivityConfig, ControlType, PairingCode, PollStatus, RemoteConfig};
use thiserror::Error;

/// Errors that can occur talking to a host
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("Host rejected {command}: {message}")]
    Rejected { command: String, message: String },

    #[error("Could not set up host client: {0}")]
    Setup(String),

    #[error("Malformed response to {command}: {source}")]
    Malformed {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

impl HostError {
    /// True when the call never got an answer, so the host's state is unknown
    pub fn is_unreachable(&self) -> bool {
        matches!(self, HostError::Unreachable(_))
    }
}

/// Command surface of a host process (local backend or paired robot service).
///
/// Acks carry the host's free-text confirmation message.
#[async_trait]
pub trait HostCollaborator: Send + Sync {
    async fn start_activity(&self, config: ActivityConfig) -> Result<String, HostError>;

    async fn stop_activity(
        &self,
        control_type: ControlType,
        nickname: &str,
    ) -> Result<String, HostError>;

    async fn activity_status(
        &self,
        control_type: ControlType,
        nickname: Option<&str>,
    ) -> Result<PollStatus, HostError>;

    async fn kiosk_pairing_info(&self) -> Result<PairingCode, HostError>;

    async fn read_remote_config(&self, nickname: &str) -> Result<RemoteConfig, HostError>;

    async fn connect_remote(
        &self,
        nickname: &str,
        config: RemoteConfig,
    ) -> Result<String, HostError>;

    async fn disconnect_remote(&self, nickname: &str) -> Result<String, HostError>;
}

/// Host command names, e.g. `start_teleop`, `get_record_status`
pub fn start_command(control_type: ControlType) -> String {
    format!("start_{}", control_type.as_str())
}

pub fn stop_command(control_type: ControlType) -> String {
    format!("stop_{}", control_type.as_str())
}

pub fn status_command(control_type: ControlType) -> String {
    format!("get_{}_status", control_type.as_str())
}
