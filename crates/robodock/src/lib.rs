//! Robodock
//!
//! Client-side control sessions for robots: which activity (teleop, record,
//! replay, training, evaluate) runs on which robot, kept in step with the
//! host process that actually drives the hardware.
//!
//! - `registry`: per-robot session records plus the active-sessions aggregate
//! - `connection`: connection lifecycle of paired robots
//! - `orchestrator`: start/stop toggling and reconciliation
//! - `poller`: periodic activity status polling
//! - `pairing`: pairing code display and remembered pairings
//! - `store`: client-side persistence

pub mod client;
pub mod config;
pub mod connection;
pub mod logging;
pub mod orchestrator;
pub mod pairing;
pub mod paths;
pub mod poller;
pub mod registry;
pub mod store;

#[cfg(test)]
mod test_host;

pub use client::{Client, ClientError, HostEventTasks};
pub use config::{Config, ConfigError};
pub use connection::{ConnectionInput, ConnectionMachine, TransitionError};
pub use orchestrator::{Orchestrator, OrchestratorError, ToggleOutcome, ViewScope};
pub use pairing::{expires_label, PairingDisplay, PairingOptions, PairingStore, PairingView};
pub use poller::{PollSnapshot, PollerHandle, PollerOptions, PollerSet, ReconcileLoop, StatusPoller};
pub use registry::{
    is_controlling, ActiveSessions, Registry, RegistryEvent, RegistryKind, SessionRecord,
};
pub use store::{AccessPointCredentials, ClientStore, StoreError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
