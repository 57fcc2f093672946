//! Session registries
//!
//! One keyed store of session records per robot population (directly
//! attached vs paired). Records are created lazily, never deleted, and
//! decay to idle. Every write recomputes the "active sessions" aggregate
//! from the full map and notifies subscribers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use robodock_protocol::{ConnectionStatus, ControlType, RobotRef};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 256;

/// Which robot population a registry tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    Local,
    Remote,
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryKind::Local => f.write_str("local"),
            RegistryKind::Remote => f.write_str("remote"),
        }
    }
}

/// What the client believes about one robot's control session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub nickname: String,
    pub control_type: Option<ControlType>,
    pub robot: Option<RobotRef>,
    /// Only set for paired robots
    pub status: Option<ConnectionStatus>,
}

impl SessionRecord {
    pub fn idle(nickname: impl Into<String>, kind: RegistryKind) -> Self {
        Self {
            nickname: nickname.into(),
            control_type: None,
            robot: None,
            status: match kind {
                RegistryKind::Local => None,
                RegistryKind::Remote => Some(ConnectionStatus::None),
            },
        }
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.status.unwrap_or_default()
    }
}

/// Whether an activity is actually running against the robot.
///
/// Derived from the record on every call so it can't drift from the
/// status enum: needs a robot, an activity, and a connection that isn't
/// still being set up.
pub fn is_controlling(record: &SessionRecord) -> bool {
    record.robot.is_some()
        && record.control_type.is_some()
        && !matches!(
            record.status,
            Some(ConnectionStatus::Connecting) | Some(ConnectionStatus::None)
        )
}

/// Nickname -> record for every robot with an activity recorded
pub type ActiveSessions = BTreeMap<String, SessionRecord>;

/// Change notifications for registry subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Updated {
        kind: RegistryKind,
        record: SessionRecord,
    },
    ActiveChanged {
        kind: RegistryKind,
        active_count: usize,
    },
}

/// Process-wide keyed store of session records.
///
/// Reads are open to everyone. Writes are crate-private: only the
/// orchestrator and the poll reconciliation path change control state.
pub struct Registry {
    kind: RegistryKind,
    records: Mutex<HashMap<String, SessionRecord>>,
    active: ArcSwap<ActiveSessions>,
    events_tx: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    pub fn new(kind: RegistryKind) -> Self {
        let (events_tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            kind,
            records: Mutex::new(HashMap::new()),
            active: ArcSwap::from_pointee(ActiveSessions::new()),
            events_tx,
        }
    }

    /// Registry for robots attached to this machine
    pub fn local() -> Arc<Self> {
        Arc::new(Self::new(RegistryKind::Local))
    }

    /// Registry for paired robots
    pub fn remote() -> Arc<Self> {
        Arc::new(Self::new(RegistryKind::Remote))
    }

    pub fn kind(&self) -> RegistryKind {
        self.kind
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, nickname: &str) -> Option<SessionRecord> {
        self.lock().get(nickname).cloned()
    }

    /// Current record, or the idle default when the robot was never touched
    pub fn get_or_idle(&self, nickname: &str) -> SessionRecord {
        self.get(nickname)
            .unwrap_or_else(|| SessionRecord::idle(nickname, self.kind))
    }

    /// All records, ordered by nickname
    pub fn snapshot(&self) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| a.nickname.cmp(&b.nickname));
        records
    }

    /// Lock-free read of the active-sessions aggregate
    pub fn active(&self) -> Arc<ActiveSessions> {
        self.active.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events_tx.subscribe()
    }

    /// Create the record on first interaction, filling in robot metadata
    /// the record doesn't have yet. Never touches control state.
    pub(crate) fn ensure(&self, robot: &RobotRef) -> SessionRecord {
        let mut records = self.lock();
        let record = records
            .entry(robot.nickname.clone())
            .or_insert_with(|| SessionRecord::idle(robot.nickname.clone(), self.kind));
        if record.robot.is_none() {
            record.robot = Some(robot.clone());
        }
        record.clone()
    }

    /// Create an idle record without robot metadata if none exists
    pub(crate) fn ensure_nickname(&self, nickname: &str) -> SessionRecord {
        let mut records = self.lock();
        records
            .entry(nickname.to_string())
            .or_insert_with(|| SessionRecord::idle(nickname, self.kind))
            .clone()
    }

    /// Replace a record wholesale
    pub(crate) fn write(&self, record: SessionRecord) {
        let mut records = self.lock();
        self.apply_locked(&mut records, record);
    }

    /// Replace a record only if nobody wrote it since `expected` was read
    pub(crate) fn compare_and_write(&self, expected: &SessionRecord, record: SessionRecord) -> bool {
        let mut records = self.lock();
        let current = records
            .get(&record.nickname)
            .cloned()
            .unwrap_or_else(|| SessionRecord::idle(record.nickname.clone(), self.kind));
        if &current != expected {
            debug!(
                component = "registry",
                event = "registry.cas_skipped",
                registry = %self.kind,
                nickname = %record.nickname,
                "Record changed underneath, write skipped"
            );
            return false;
        }
        self.apply_locked(&mut records, record);
        true
    }

    /// Decay a record to idle, keeping its robot metadata
    pub(crate) fn reset(&self, nickname: &str) {
        let mut records = self.lock();
        let robot = records.get(nickname).and_then(|r| r.robot.clone());
        let mut record = SessionRecord::idle(nickname, self.kind);
        record.robot = robot;
        self.apply_locked(&mut records, record);
    }

    fn apply_locked(&self, records: &mut HashMap<String, SessionRecord>, record: SessionRecord) {
        records.insert(record.nickname.clone(), record.clone());

        // Recompute from the full map rather than patching the aggregate.
        let active: ActiveSessions = records
            .values()
            .filter(|r| r.control_type.is_some())
            .map(|r| (r.nickname.clone(), r.clone()))
            .collect();
        let active_count = active.len();
        let previous_count = self.active.load().len();
        self.active.store(Arc::new(active));

        let _ = self.events_tx.send(RegistryEvent::Updated {
            kind: self.kind,
            record,
        });
        if active_count != previous_count {
            let _ = self.events_tx.send(RegistryEvent::ActiveChanged {
                kind: self.kind,
                active_count,
            });
        }
    }
}
