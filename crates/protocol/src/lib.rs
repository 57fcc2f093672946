//! Robodock Protocol
//!
//! Shared types for communication between the Robodock client and the
//! host processes that actually run robot-control activities.
//! These types are serialized as JSON over the host command channel.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod activity;
pub mod events;
pub mod pairing;
pub mod types;

// Re-exports
pub use activity::*;
pub use events::{HostEvent, HostEventBatch};
pub use pairing::*;
pub use types::*;

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
