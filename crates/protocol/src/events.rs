//! One-way events broadcast by the host process

use serde::{Deserialize, Serialize};

/// Advisory host events. Nothing depends on them for correctness;
/// they only make the UI react faster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// The kiosk asked for the pairing code to be shown
    PairingOpen,
    /// The kiosk dismissed the pairing code
    PairingClose,
    /// A log line from a robot-control subprocess
    HostLog { line: String },
    /// A robot host process started outside this client, not ready yet
    ExternalStarting {
        #[serde(default)]
        nickname: Option<String>,
    },
    /// The external host process is listening for commands
    ExternalStarted {
        #[serde(default)]
        nickname: Option<String>,
    },
    /// The external host process went away
    ExternalStopped {
        #[serde(default)]
        nickname: Option<String>,
    },
    /// A host process exited; `nickname` is unset when every robot it
    /// served is affected
    ProcessShutdown {
        #[serde(default)]
        nickname: Option<String>,
        #[serde(default)]
        exit_code: Option<i32>,
    },
}

impl HostEvent {
    /// True for events after which nothing is running on the host for the
    /// robot they name (or for any robot, when they name none).
    pub fn ends_activity(&self) -> bool {
        matches!(
            self,
            HostEvent::ExternalStopped { .. } | HostEvent::ProcessShutdown { .. }
        )
    }

    /// The robot an event is about, if it names one
    pub fn nickname(&self) -> Option<&str> {
        match self {
            HostEvent::ExternalStarting { nickname }
            | HostEvent::ExternalStarted { nickname }
            | HostEvent::ExternalStopped { nickname }
            | HostEvent::ProcessShutdown { nickname, .. } => nickname.as_deref(),
            HostEvent::PairingOpen | HostEvent::PairingClose | HostEvent::HostLog { .. } => None,
        }
    }
}

/// One long-poll answer from the host's event feed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostEventBatch {
    /// Pass back as `after` to receive only newer events
    pub cursor: u64,
    #[serde(default)]
    pub events: Vec<HostEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_decodes_with_and_without_exit_code() {
        let event: HostEvent =
            serde_json::from_str(r#"{"type":"process_shutdown","exit_code":137}"#).unwrap();
        assert_eq!(
            event,
            HostEvent::ProcessShutdown {
                nickname: None,
                exit_code: Some(137)
            }
        );
        assert!(event.ends_activity());

        let event: HostEvent =
            serde_json::from_str(r#"{"type":"external_started","nickname":"sourccey"}"#).unwrap();
        assert_eq!(event.nickname(), Some("sourccey"));
        assert!(!event.ends_activity());
    }

    #[test]
    fn empty_batch_keeps_cursor() {
        let batch: HostEventBatch = serde_json::from_str(r#"{"cursor":12}"#).unwrap();
        assert_eq!(batch.cursor, 12);
        assert!(batch.events.is_empty());
    }
}
