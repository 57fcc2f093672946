//! Pairing types: host-issued codes and remembered pairings

use serde::{Deserialize, Serialize};

/// Short-lived code shown on a kiosk robot so a desktop client can pair.
///
/// The client never generates or validates codes; it only displays them
/// and must treat a code as gone once `now > expires_at_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingCode {
    pub code: String,
    pub expires_at_ms: u64,
    pub service_port: u16,
    pub robot_name: String,
    pub nickname: String,
    pub robot_type: String,
}

impl PairingCode {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at_ms.saturating_sub(now_ms)
    }
}

/// A remembered trust relationship with a paired robot host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedConnection {
    pub nickname: String,
    pub host: String,
    pub port: u16,
    pub token: String,
    #[serde(alias = "robotType")]
    pub robot_type: String,
    #[serde(alias = "robotName")]
    pub robot_name: String,
    /// Epoch milliseconds
    #[serde(alias = "pairedAt")]
    pub paired_at: u64,
}

impl PairedConnection {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}
