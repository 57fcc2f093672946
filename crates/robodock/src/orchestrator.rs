//! Session orchestrator: start/stop toggling, remote connection lifecycle
//! and reconciliation against polled host status.
//!
//! Every toggle makes exactly one host call (start or stop) and writes one
//! registry entry; the registry recomputes its aggregate on each write.
//! Failures roll the record back: a failed start leaves the record exactly
//! as it was, a failed stop keeps the activity recorded as running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use robodock_host::{HostCollaborator, HostError};
use robodock_protocol::{ActivityConfig, ConnectionStatus, ControlType, HostEvent, RobotRef};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionInput, ConnectionMachine, TransitionError};
use crate::poller::PollSnapshot;
use crate::registry::{Registry, RegistryKind, SessionRecord};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    #[error(transparent)]
    Host(HostError),

    #[error("{nickname} is already running {active}")]
    AlreadyControlling {
        nickname: String,
        active: ControlType,
    },

    #[error("{nickname} is not connected (status: {status})")]
    NotConnected {
        nickname: String,
        status: ConnectionStatus,
    },

    #[error("a request for {nickname} is already in flight")]
    ToggleInFlight { nickname: String },

    #[error("robot nickname must not be empty")]
    EmptyNickname,

    #[error("config targets {config} but the request is for {robot}")]
    NicknameMismatch { robot: String, config: String },

    #[error("response arrived after its view was closed")]
    Stale,

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<HostError> for OrchestratorError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Unreachable(msg) => OrchestratorError::HostUnreachable(msg),
            other => OrchestratorError::Host(other),
        }
    }
}

/// What a successful toggle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started(ControlType),
    Stopped(ControlType),
}

/// Relevance flag for the view that issued a request.
///
/// Host calls are never cancelled; when one resolves after its scope was
/// closed the result is dropped instead of being written to the registry.
#[derive(Debug, Clone)]
pub struct ViewScope {
    open: Arc<AtomicBool>,
}

impl ViewScope {
    pub fn new() -> Self {
        Self {
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Default for ViewScope {
    fn default() -> Self {
        Self::new()
    }
}

type FlightKey = (RegistryKind, String);

/// Marks a nickname busy for the lifetime of one request. Releasing it
/// stamps the time the request settled.
struct InFlight<'a> {
    map: &'a DashMap<FlightKey, ()>,
    settled: &'a DashMap<FlightKey, Instant>,
    key: FlightKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.settled.insert(self.key.clone(), Instant::now());
        self.map.remove(&self.key);
    }
}

/// An optimistic transient status written ahead of a host call.
///
/// Unless `settle` is called the transient record is withdrawn on drop,
/// which covers errors, closed views and callers that drop the future
/// mid-request. Withdrawal only applies while the record is still the one
/// this request wrote.
struct Pending<'a> {
    registry: &'a Registry,
    transient: SessionRecord,
    before: Option<SessionRecord>,
}

impl<'a> Pending<'a> {
    fn write(registry: &'a Registry, before: SessionRecord, transient: SessionRecord) -> Self {
        registry.write(transient.clone());
        Self {
            registry,
            transient,
            before: Some(before),
        }
    }

    /// The host confirmed; keep the transient record for the caller to advance.
    fn settle(mut self) -> SessionRecord {
        self.before = None;
        self.transient.clone()
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if let Some(before) = self.before.take() {
            if self.registry.compare_and_write(&self.transient, before) {
                debug!(
                    component = "orchestrator",
                    event = "orchestrator.rolled_back",
                    nickname = %self.transient.nickname,
                    status = ?self.transient.status,
                    "Transient status withdrawn"
                );
            }
        }
    }
}

pub struct Orchestrator {
    local_host: Arc<dyn HostCollaborator>,
    remote_hosts: DashMap<String, Arc<dyn HostCollaborator>>,
    local: Arc<Registry>,
    remote: Arc<Registry>,
    in_flight: DashMap<FlightKey, ()>,
    settled: DashMap<FlightKey, Instant>,
}

impl Orchestrator {
    pub fn new(
        local_host: Arc<dyn HostCollaborator>,
        local: Arc<Registry>,
        remote: Arc<Registry>,
    ) -> Self {
        Self {
            local_host,
            remote_hosts: DashMap::new(),
            local,
            remote,
            in_flight: DashMap::new(),
            settled: DashMap::new(),
        }
    }

    pub fn registry(&self, kind: RegistryKind) -> &Arc<Registry> {
        match kind {
            RegistryKind::Local => &self.local,
            RegistryKind::Remote => &self.remote,
        }
    }

    /// Route a paired robot's commands to its own service. Robots without a
    /// registered host are relayed through the local backend.
    pub fn register_remote_host(&self, nickname: &str, host: Arc<dyn HostCollaborator>) {
        self.remote_hosts.insert(nickname.to_string(), host);
    }

    /// Stop routing a forgotten robot to its own service
    pub fn unregister_remote_host(&self, nickname: &str) -> bool {
        self.remote_hosts.remove(nickname).is_some()
    }

    /// The host that serves `nickname` in registry `kind`
    pub fn host_for(&self, kind: RegistryKind, nickname: &str) -> Arc<dyn HostCollaborator> {
        match kind {
            RegistryKind::Local => self.local_host.clone(),
            RegistryKind::Remote => self
                .remote_hosts
                .get(nickname)
                .map(|h| h.value().clone())
                .unwrap_or_else(|| self.local_host.clone()),
        }
    }

    pub fn is_in_flight(&self, kind: RegistryKind, nickname: &str) -> bool {
        self.in_flight.contains_key(&(kind, nickname.to_string()))
    }

    fn begin(&self, kind: RegistryKind, nickname: &str) -> Result<InFlight<'_>, OrchestratorError> {
        if nickname.trim().is_empty() {
            return Err(OrchestratorError::EmptyNickname);
        }
        let key = (kind, nickname.to_string());
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => Err(OrchestratorError::ToggleInFlight {
                nickname: nickname.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(InFlight {
                    map: &self.in_flight,
                    settled: &self.settled,
                    key,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Toggle
    // -----------------------------------------------------------------------

    /// Start `config`'s activity on `robot`, or stop it if it's already running.
    pub async fn toggle(
        &self,
        kind: RegistryKind,
        robot: &RobotRef,
        config: ActivityConfig,
    ) -> Result<ToggleOutcome, OrchestratorError> {
        self.toggle_in(&ViewScope::new(), kind, robot, config).await
    }

    /// `toggle`, discarding the host's answer if `scope` closes meanwhile.
    pub async fn toggle_in(
        &self,
        scope: &ViewScope,
        kind: RegistryKind,
        robot: &RobotRef,
        config: ActivityConfig,
    ) -> Result<ToggleOutcome, OrchestratorError> {
        if config.nickname() != robot.nickname {
            return Err(OrchestratorError::NicknameMismatch {
                robot: robot.nickname.clone(),
                config: config.nickname().to_string(),
            });
        }
        let _flight = self.begin(kind, &robot.nickname)?;
        let requested = config.control_type();
        let before = self.registry(kind).ensure(robot);

        info!(
            component = "orchestrator",
            event = "orchestrator.toggle",
            registry = %kind,
            nickname = %robot.nickname,
            control_type = %requested,
            current = ?before.control_type,
            "Toggle requested"
        );

        let result = match (kind, before.control_type) {
            (_, Some(active)) if active != requested => {
                Err(OrchestratorError::AlreadyControlling {
                    nickname: robot.nickname.clone(),
                    active,
                })
            }
            (RegistryKind::Local, Some(_)) => self.stop_local(scope, before, requested).await,
            (RegistryKind::Local, None) => self.start_local(scope, before, config).await,
            (RegistryKind::Remote, Some(_)) => self.stop_remote(scope, before, requested).await,
            (RegistryKind::Remote, None) => self.start_remote(scope, before, config).await,
        };

        match &result {
            Ok(outcome) => info!(
                component = "orchestrator",
                event = "orchestrator.toggle.succeeded",
                registry = %kind,
                nickname = %robot.nickname,
                outcome = ?outcome,
                "Toggle succeeded"
            ),
            Err(OrchestratorError::Stale) => debug!(
                component = "orchestrator",
                event = "orchestrator.toggle.stale",
                registry = %kind,
                nickname = %robot.nickname,
                "Toggle response discarded, view closed"
            ),
            Err(e) => warn!(
                component = "orchestrator",
                event = "orchestrator.toggle.failed",
                registry = %kind,
                nickname = %robot.nickname,
                control_type = %requested,
                error = %e,
                "Toggle failed"
            ),
        }
        result
    }

    async fn start_local(
        &self,
        scope: &ViewScope,
        before: SessionRecord,
        config: ActivityConfig,
    ) -> Result<ToggleOutcome, OrchestratorError> {
        let requested = config.control_type();
        let host = self.host_for(RegistryKind::Local, &before.nickname);
        let ack = host.start_activity(config).await;
        if !scope.is_open() {
            return Err(OrchestratorError::Stale);
        }
        // On failure nothing was written, so the record is still `before`.
        let ack = ack?;
        debug!(
            component = "orchestrator",
            event = "orchestrator.host_ack",
            nickname = %before.nickname,
            ack = %ack,
            "Host acknowledged start"
        );

        let mut after = before;
        after.control_type = Some(requested);
        self.local.write(after);
        Ok(ToggleOutcome::Started(requested))
    }

    async fn stop_local(
        &self,
        scope: &ViewScope,
        before: SessionRecord,
        requested: ControlType,
    ) -> Result<ToggleOutcome, OrchestratorError> {
        let host = self.host_for(RegistryKind::Local, &before.nickname);
        let ack = host.stop_activity(requested, &before.nickname).await;
        if !scope.is_open() {
            return Err(OrchestratorError::Stale);
        }
        // A failed stop keeps the activity recorded; the poller corrects it
        // later if the process actually died.
        let ack = ack?;
        debug!(
            component = "orchestrator",
            event = "orchestrator.host_ack",
            nickname = %before.nickname,
            ack = %ack,
            "Host acknowledged stop"
        );

        let mut after = before;
        after.control_type = None;
        self.local.write(after);
        Ok(ToggleOutcome::Stopped(requested))
    }

    async fn start_remote(
        &self,
        scope: &ViewScope,
        before: SessionRecord,
        config: ActivityConfig,
    ) -> Result<ToggleOutcome, OrchestratorError> {
        let requested = config.control_type();
        let status = before.connection_status();
        if status != ConnectionStatus::Connected {
            return Err(OrchestratorError::NotConnected {
                nickname: before.nickname.clone(),
                status,
            });
        }

        let mut machine = ConnectionMachine::from_status(status);
        let mut starting = before.clone();
        starting.status = Some(machine.apply(ConnectionInput::Start)?);
        let host = self.host_for(RegistryKind::Remote, &before.nickname);
        let pending = Pending::write(&self.remote, before, starting);

        let ack = host.start_activity(config).await;
        if !scope.is_open() {
            return Err(OrchestratorError::Stale);
        }

        match ack {
            Ok(_) => {
                let status = machine.apply(ConnectionInput::Ack)?;
                let mut started = pending.settle();
                started.status = Some(status);
                started.control_type = Some(requested);
                self.remote.write(started);
                Ok(ToggleOutcome::Started(requested))
            }
            Err(e) => {
                machine.apply(ConnectionInput::Fail)?;
                Err(e.into())
            }
        }
    }

    async fn stop_remote(
        &self,
        scope: &ViewScope,
        before: SessionRecord,
        requested: ControlType,
    ) -> Result<ToggleOutcome, OrchestratorError> {
        let mut machine = ConnectionMachine::from_status(before.connection_status());
        let mut stopping = before.clone();
        stopping.status = Some(machine.apply(ConnectionInput::Stop)?);
        let host = self.host_for(RegistryKind::Remote, &before.nickname);
        let nickname = before.nickname.clone();
        let pending = Pending::write(&self.remote, before, stopping);

        let ack = host.stop_activity(requested, &nickname).await;
        if !scope.is_open() {
            return Err(OrchestratorError::Stale);
        }

        match ack {
            Ok(_) => {
                let status = machine.apply(ConnectionInput::Ack)?;
                let mut stopped = pending.settle();
                stopped.status = Some(status);
                stopped.control_type = None;
                self.remote.write(stopped);
                Ok(ToggleOutcome::Stopped(requested))
            }
            Err(e) => {
                machine.apply(ConnectionInput::Fail)?;
                Err(e.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Remote connection lifecycle
    // -----------------------------------------------------------------------

    /// Connect to a paired robot: NONE → CONNECTING → CONNECTED.
    pub async fn connect(&self, robot: &RobotRef) -> Result<(), OrchestratorError> {
        self.connect_in(&ViewScope::new(), robot).await
    }

    pub async fn connect_in(
        &self,
        scope: &ViewScope,
        robot: &RobotRef,
    ) -> Result<(), OrchestratorError> {
        let _flight = self.begin(RegistryKind::Remote, &robot.nickname)?;
        let before = self.remote.ensure(robot);

        let mut machine = ConnectionMachine::from_status(before.connection_status());
        let mut connecting = before.clone();
        connecting.status = Some(machine.apply(ConnectionInput::Connect)?);
        let pending = Pending::write(&self.remote, before, connecting);

        info!(
            component = "orchestrator",
            event = "orchestrator.connect",
            nickname = %robot.nickname,
            "Connecting to paired robot"
        );

        let host = self.host_for(RegistryKind::Remote, &robot.nickname);
        let result = match host.read_remote_config(&robot.nickname).await {
            Ok(config) => host.connect_remote(&robot.nickname, config).await,
            Err(e) => Err(e),
        };
        if !scope.is_open() {
            return Err(OrchestratorError::Stale);
        }

        match result {
            Ok(_) => {
                let status = machine.apply(ConnectionInput::Ack)?;
                let mut connected = pending.settle();
                connected.status = Some(status);
                self.remote.write(connected);
                Ok(())
            }
            Err(e) => {
                warn!(
                    component = "orchestrator",
                    event = "orchestrator.connect.failed",
                    nickname = %robot.nickname,
                    error = %e,
                    "Connect failed"
                );
                machine.apply(ConnectionInput::Fail)?;
                Err(e.into())
            }
        }
    }

    /// Disconnect a paired robot: CONNECTED/STARTED → DISCONNECTING → NONE.
    pub async fn disconnect(&self, nickname: &str) -> Result<(), OrchestratorError> {
        self.disconnect_in(&ViewScope::new(), nickname).await
    }

    pub async fn disconnect_in(
        &self,
        scope: &ViewScope,
        nickname: &str,
    ) -> Result<(), OrchestratorError> {
        let _flight = self.begin(RegistryKind::Remote, nickname)?;
        let before = self.remote.ensure_nickname(nickname);

        let mut machine = ConnectionMachine::from_status(before.connection_status());
        let mut disconnecting = before.clone();
        disconnecting.status = Some(machine.apply(ConnectionInput::Disconnect)?);
        let pending = Pending::write(&self.remote, before, disconnecting);

        let host = self.host_for(RegistryKind::Remote, nickname);
        let result = host.disconnect_remote(nickname).await;
        if !scope.is_open() {
            return Err(OrchestratorError::Stale);
        }

        match result {
            Ok(_) => {
                machine.apply(ConnectionInput::Ack)?;
                pending.settle();
                // Back to idle; robot metadata is kept.
                self.remote.reset(nickname);
                info!(
                    component = "orchestrator",
                    event = "orchestrator.disconnected",
                    nickname = %nickname,
                    "Disconnected from paired robot"
                );
                Ok(())
            }
            Err(e) => {
                machine.apply(ConnectionInput::Fail)?;
                Err(e.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Correct the record for `nickname` from a polled host answer.
    ///
    /// Returns true if the record changed. Skips robots with a request in
    /// flight, answers to polls sent before the last request settled, and
    /// never replaces a different active activity.
    pub fn reconcile(
        &self,
        kind: RegistryKind,
        control_type: ControlType,
        nickname: &str,
        snapshot: &PollSnapshot,
    ) -> bool {
        // seq 0 is a seeded default, not an answer from the host.
        if snapshot.loading || snapshot.seq == 0 || self.is_in_flight(kind, nickname) {
            return false;
        }
        if self.predates_last_request(kind, nickname, snapshot.issued_at) {
            debug!(
                component = "orchestrator",
                event = "orchestrator.reconcile.outdated",
                registry = %kind,
                nickname = %nickname,
                control_type = %control_type,
                seq = snapshot.seq,
                "Poll answer predates the last request, ignored"
            );
            return false;
        }

        let registry = self.registry(kind);
        let before = registry.ensure_nickname(nickname);
        let active = snapshot.status.active;
        let status = before.connection_status();

        let mut after = before.clone();
        match (kind, active, before.control_type) {
            (RegistryKind::Local, true, None) => {
                after.control_type = Some(control_type);
            }
            (RegistryKind::Local, false, Some(current)) if current == control_type => {
                after.control_type = None;
            }
            (RegistryKind::Remote, true, None) if status == ConnectionStatus::Connected => {
                after.control_type = Some(control_type);
                after.status = Some(ConnectionStatus::Started);
            }
            (RegistryKind::Remote, false, Some(current))
                if current == control_type && status == ConnectionStatus::Started =>
            {
                after.control_type = None;
                after.status = Some(ConnectionStatus::Connected);
            }
            _ => return false,
        }

        // Only apply if no toggle slipped in since we read the record.
        if !registry.compare_and_write(&before, after.clone()) {
            return false;
        }

        info!(
            component = "orchestrator",
            event = "orchestrator.reconciled",
            registry = %kind,
            nickname = %nickname,
            control_type = %control_type,
            active = active,
            poll_error = ?snapshot.error,
            "Record corrected from host status"
        );
        true
    }

    fn predates_last_request(
        &self,
        kind: RegistryKind,
        nickname: &str,
        issued_at: Option<Instant>,
    ) -> bool {
        let Some(issued_at) = issued_at else {
            return false;
        };
        self.settled
            .get(&(kind, nickname.to_string()))
            .map(|settled| issued_at <= *settled.value())
            .unwrap_or(false)
    }

    /// Apply a host event that means activities ended on the local host.
    ///
    /// `ExternalStopped` and `ProcessShutdown` clear the activity of the
    /// robot they name, or of every local robot when they name none. Robots
    /// with a request in flight are left to that request. Returns how many
    /// records changed.
    pub fn apply_host_event(&self, event: &HostEvent) -> usize {
        if !event.ends_activity() {
            return 0;
        }

        let targets: Vec<SessionRecord> = match event.nickname() {
            Some(nickname) => self.local.get(nickname).into_iter().collect(),
            None => self.local.snapshot(),
        };

        let mut cleared = 0;
        for before in targets {
            if before.control_type.is_none()
                || self.is_in_flight(RegistryKind::Local, &before.nickname)
            {
                continue;
            }
            let mut after = before.clone();
            after.control_type = None;
            if self.local.compare_and_write(&before, after) {
                cleared += 1;
            }
        }

        if cleared > 0 {
            info!(
                component = "orchestrator",
                event = "orchestrator.host_stopped",
                host_event = ?event,
                cleared = cleared,
                "Host reported its process gone, activities cleared"
            );
        }
        cleared
    }
}
