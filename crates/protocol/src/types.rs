//! Core types shared across the protocol

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of control activity running against a robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    Teleop,
    Record,
    Replay,
    Training,
    Evaluate,
}

impl ControlType {
    pub const ALL: [ControlType; 5] = [
        ControlType::Teleop,
        ControlType::Record,
        ControlType::Replay,
        ControlType::Training,
        ControlType::Evaluate,
    ];

    /// Activities the host reports a live status for. Training runs are
    /// tracked through their own logs and have no status command.
    pub const POLLED: [ControlType; 4] = [
        ControlType::Teleop,
        ControlType::Record,
        ControlType::Replay,
        ControlType::Evaluate,
    ];

    /// Wire name, also used to build host command names (`start_teleop`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlType::Teleop => "teleop",
            ControlType::Record => "record",
            ControlType::Replay => "replay",
            ControlType::Training => "training",
            ControlType::Evaluate => "evaluate",
        }
    }

    pub fn is_polled(&self) -> bool {
        Self::POLLED.contains(self)
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Error returned when parsing an unknown control type name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownControlType(pub String);

impl fmt::Display for UnknownControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown control type: {}", self.0)
    }
}

impl std::error::Error for UnknownControlType {}

impl FromStr for ControlType {
    type Err = UnknownControlType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teleop" => Ok(ControlType::Teleop),
            "record" => Ok(ControlType::Record),
            "replay" => Ok(ControlType::Replay),
            "training" | "train" => Ok(ControlType::Training),
            "evaluate" | "eval" => Ok(ControlType::Evaluate),
            other => Err(UnknownControlType(other.to_string())),
        }
    }
}

/// Network connection lifecycle of a paired (remote) robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    None,
    Connecting,
    Connected,
    Disconnecting,
    Starting,
    Started,
    Stopping,
}

impl ConnectionStatus {
    /// Waiting on a host acknowledgement. Never terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::Disconnecting
                | ConnectionStatus::Starting
                | ConnectionStatus::Stopping
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::None => "none",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnecting => "disconnecting",
            ConnectionStatus::Starting => "starting",
            ConnectionStatus::Started => "started",
            ConnectionStatus::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Last-known answer to "is this activity running for robot X"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStatus {
    pub active: bool,
    #[serde(alias = "last_command_time", default)]
    pub last_command_time_ms: u64,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub nickname: String,
}

fn default_source() -> String {
    "none".to_string()
}

impl PollStatus {
    /// Safe default used whenever the host can't be asked or polling is off
    pub fn inactive(nickname: impl Into<String>) -> Self {
        Self {
            active: false,
            last_command_time_ms: 0,
            source: default_source(),
            nickname: nickname.into(),
        }
    }
}

/// Robot metadata a session record carries for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotRef {
    pub nickname: String,
    pub robot_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub robot_name: Option<String>,
}

impl RobotRef {
    pub fn new(nickname: impl Into<String>, robot_type: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            robot_type: robot_type.into(),
            robot_name: None,
        }
    }
}

/// Connection parameters for a remote robot, as stored by the host
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub remote_ip: String,
    pub remote_port: String,
    pub username: String,
    pub password: String,
    pub left_arm_port: String,
    pub right_arm_port: String,
    pub keyboard: String,
    pub fps: u32,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("remote_ip", &self.remote_ip)
            .field("remote_port", &self.remote_port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("left_arm_port", &self.left_arm_port)
            .field("right_arm_port", &self.right_arm_port)
            .field("keyboard", &self.keyboard)
            .field("fps", &self.fps)
            .finish()
    }
}
