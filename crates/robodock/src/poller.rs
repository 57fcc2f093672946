//! Status pollers
//!
//! One poller per (control type, robot). Each asks the host "is this
//! activity running for this robot" on a fixed interval and publishes the
//! last answer through a `watch` channel. Every tick spawns its own poll
//! task, so a slow host never delays the next tick. Answers are applied in
//! sequence order and dropped once the poller is stopped.
//!
//! A failed poll publishes the inactive default with `error` set. A failed
//! poll can't tell "still running" from "host down", and showing a stale
//! "active" is the worse lie.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use robodock_host::HostCollaborator;
use robodock_protocol::{ControlType, PollStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::orchestrator::Orchestrator;
use crate::registry::RegistryKind;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerOptions {
    pub interval: Duration,
    /// When false the poller publishes the inactive default and never
    /// calls the host.
    pub enabled: bool,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            enabled: true,
        }
    }
}

/// Last known answer for one poller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSnapshot {
    pub status: PollStatus,
    pub error: Option<String>,
    /// True until the first poll answers
    pub loading: bool,
    /// Sequence number of the poll that produced this snapshot; 0 = none yet
    pub seq: u64,
    /// When the poll that produced this snapshot was sent
    pub issued_at: Option<Instant>,
}

impl PollSnapshot {
    fn initial(nickname: &str, loading: bool) -> Self {
        Self {
            status: PollStatus::inactive(nickname),
            error: None,
            loading,
            seq: 0,
            issued_at: None,
        }
    }
}

struct Shared {
    control_type: ControlType,
    nickname: String,
    tx: watch::Sender<PollSnapshot>,
    /// Seq of the last applied answer, bumped even when nothing visible changed
    applied: watch::Sender<u64>,
    closed: AtomicBool,
    next_seq: AtomicU64,
}

/// Apply `next` unless a newer poll already landed; returns whether it was
/// applied. Subscribers are only woken when something they can see changed.
fn publish(tx: &watch::Sender<PollSnapshot>, next: PollSnapshot) -> bool {
    let mut applied = false;
    tx.send_if_modified(|current| {
        if next.seq <= current.seq {
            return false;
        }
        applied = true;
        let changed = current.loading
            || current.status != next.status
            || current.error != next.error;
        *current = next;
        changed
    });
    applied
}

pub struct StatusPoller;

impl StatusPoller {
    pub fn spawn(
        host: Arc<dyn HostCollaborator>,
        control_type: ControlType,
        nickname: impl Into<String>,
        options: PollerOptions,
    ) -> PollerHandle {
        let nickname = nickname.into();
        let (tx, _rx) = watch::channel(PollSnapshot::initial(&nickname, options.enabled));
        let (applied, _applied_rx) = watch::channel(0);
        let shared = Arc::new(Shared {
            control_type,
            nickname,
            tx,
            applied,
            closed: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
        });

        if !options.enabled {
            debug!(
                component = "poller",
                event = "poller.disabled",
                nickname = %shared.nickname,
                control_type = %control_type,
                "Polling disabled"
            );
            return PollerHandle { shared, task: None };
        }

        let task = tokio::spawn(run_timer(shared.clone(), host, options.interval));
        PollerHandle {
            shared,
            task: Some(task),
        }
    }
}

async fn run_timer(shared: Arc<Shared>, host: Arc<dyn HostCollaborator>, interval: Duration) {
    // First tick completes immediately.
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        let seq = shared.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(poll_once(shared.clone(), host.clone(), seq));
    }
}

async fn poll_once(shared: Arc<Shared>, host: Arc<dyn HostCollaborator>, seq: u64) {
    let issued_at = Some(Instant::now());
    let result = host
        .activity_status(shared.control_type, Some(&shared.nickname))
        .await;

    if shared.closed.load(Ordering::SeqCst) {
        return;
    }

    let next = match result {
        Ok(status) => {
            // The host reports who the activity belongs to; someone else's
            // session is "inactive" from this robot's point of view.
            let status = if !status.nickname.is_empty() && status.nickname != shared.nickname {
                PollStatus::inactive(&shared.nickname)
            } else {
                status
            };
            PollSnapshot {
                status,
                error: None,
                loading: false,
                seq,
                issued_at,
            }
        }
        Err(e) => {
            let was_failing = shared.tx.borrow().error.is_some();
            if was_failing {
                debug!(
                    component = "poller",
                    event = "poller.poll_failed",
                    nickname = %shared.nickname,
                    control_type = %shared.control_type,
                    error = %e,
                    "Status poll still failing"
                );
            } else {
                warn!(
                    component = "poller",
                    event = "poller.poll_failed",
                    nickname = %shared.nickname,
                    control_type = %shared.control_type,
                    error = %e,
                    "Status poll failed, reporting inactive"
                );
            }
            PollSnapshot {
                status: PollStatus::inactive(&shared.nickname),
                error: Some(e.to_string()),
                loading: false,
                seq,
                issued_at,
            }
        }
    };

    if publish(&shared.tx, next) {
        shared.applied.send_replace(seq);
    }
}

/// Owner of a running poller. Dropping it stops polling.
pub struct PollerHandle {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn control_type(&self) -> ControlType {
        self.shared.control_type
    }

    pub fn nickname(&self) -> &str {
        &self.shared.nickname
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.shared.tx.subscribe()
    }

    /// Wakes on every applied answer, including ones identical to the last
    pub fn answers(&self) -> watch::Receiver<u64> {
        self.shared.applied.subscribe()
    }

    pub fn latest(&self) -> PollSnapshot {
        self.shared.tx.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.shared.tx.borrow().status.active
    }

    /// Cancel the timer. Polls already in flight finish but their answers
    /// are discarded.
    pub fn stop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Feeds every answer of one poller into `Orchestrator::reconcile`.
///
/// Unchanged answers are reconciled too: one that was skipped because a
/// toggle was settling gets retried by the next identical answer.
pub struct ReconcileLoop {
    task: JoinHandle<()>,
}

impl ReconcileLoop {
    pub fn spawn(orchestrator: Arc<Orchestrator>, kind: RegistryKind, poller: &PollerHandle) -> Self {
        let mut answers = poller.answers();
        let rx = poller.subscribe();
        let control_type = poller.control_type();
        let nickname = poller.nickname().to_string();

        let task = tokio::spawn(async move {
            loop {
                answers.borrow_and_update();
                let snapshot = rx.borrow().clone();
                orchestrator.reconcile(kind, control_type, &nickname, &snapshot);
                // Errors once the poller and its in-flight polls are gone.
                if answers.changed().await.is_err() {
                    break;
                }
            }
        });
        Self { task }
    }
}

impl Drop for ReconcileLoop {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Pollers for every polled control type of one robot, each reconciled
/// into the robot's registry.
pub struct PollerSet {
    nickname: String,
    pollers: Vec<PollerHandle>,
    reconcilers: Vec<ReconcileLoop>,
}

impl PollerSet {
    pub fn spawn(
        orchestrator: Arc<Orchestrator>,
        kind: RegistryKind,
        nickname: impl Into<String>,
        options: PollerOptions,
    ) -> Self {
        let nickname = nickname.into();
        let host = orchestrator.host_for(kind, &nickname);

        let mut pollers = Vec::with_capacity(ControlType::POLLED.len());
        let mut reconcilers = Vec::with_capacity(ControlType::POLLED.len());
        for control_type in ControlType::POLLED {
            let poller = StatusPoller::spawn(host.clone(), control_type, nickname.clone(), options);
            reconcilers.push(ReconcileLoop::spawn(orchestrator.clone(), kind, &poller));
            pollers.push(poller);
        }

        Self {
            nickname,
            pollers,
            reconcilers,
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn pollers(&self) -> &[PollerHandle] {
        &self.pollers
    }

    /// The first control type the host currently reports as running
    pub fn active_type(&self) -> Option<ControlType> {
        self.pollers
            .iter()
            .find(|p| p.is_active())
            .map(|p| p.control_type())
    }

    pub fn stop(&mut self) {
        self.reconcilers.clear();
        for poller in &mut self.pollers {
            poller.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::time::Instant;

    use super::*;
    use crate::registry::Registry;
    use crate::test_host::ScriptedHost;

    fn every(ms: u64) -> PollerOptions {
        PollerOptions {
            interval: Duration::from_millis(ms),
            enabled: true,
        }
    }

    fn active_status(nickname: &str) -> PollStatus {
        PollStatus {
            active: true,
            last_command_time_ms: 1_700_000_000_000,
            source: "ui".into(),
            nickname: nickname.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_poller_never_calls_host() {
        let host = Arc::new(ScriptedHost::new());
        host.set_active(ControlType::Teleop, true);

        let poller = StatusPoller::spawn(
            host.clone(),
            ControlType::Teleop,
            "arm-01",
            PollerOptions {
                interval: Duration::from_millis(2000),
                enabled: false,
            },
        );
        let latest = poller.latest();
        assert!(!latest.status.active);
        assert_eq!(latest.status.source, "none");
        assert!(!latest.loading);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ScriptedHost::count(&host.status_calls), 0);
        assert!(!poller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_replaces_active_with_inactive() {
        let host = Arc::new(ScriptedHost::new());
        host.set_active(ControlType::Record, true);

        let poller = StatusPoller::spawn(host.clone(), ControlType::Record, "arm-01", every(2000));
        let mut rx = poller.subscribe();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().status.active);

        host.unreachable.store(true, Ordering::SeqCst);
        rx.changed().await.unwrap();
        let after = rx.borrow_and_update().clone();
        assert!(!after.status.active);
        assert!(after.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn host_going_away_is_observed_on_next_tick() {
        let host = Arc::new(ScriptedHost::new());
        host.push_status(Ok(active_status("arm-01")));
        host.push_status(Err("connection refused".into()));

        let start = Instant::now();
        let poller = StatusPoller::spawn(host.clone(), ControlType::Teleop, "arm-01", every(2000));
        let mut rx = poller.subscribe();

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().status.active);
        assert!(start.elapsed() < Duration::from_millis(100));

        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert!(!snapshot.status.active);
        assert_eq!(snapshot.error.as_deref(), Some("Host unreachable: connection refused"));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2000));
        assert!(elapsed < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_for_another_robot_is_inactive() {
        let host = Arc::new(ScriptedHost::new());
        host.push_status(Ok(active_status("arm-02")));

        let poller = StatusPoller::spawn(host.clone(), ControlType::Teleop, "arm-01", every(2000));
        let mut rx = poller.subscribe();
        rx.changed().await.unwrap();
        let snapshot = rx.borrow().clone();
        assert!(!snapshot.loading);
        assert!(!snapshot.status.active);
        assert_eq!(snapshot.status.nickname, "arm-01");
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_poller_makes_no_further_calls() {
        let host = Arc::new(ScriptedHost::new());
        let mut poller = StatusPoller::spawn(host.clone(), ControlType::Replay, "arm-01", every(2000));
        let mut rx = poller.subscribe();
        rx.changed().await.unwrap();
        assert_eq!(ScriptedHost::count(&host.status_calls), 1);

        poller.stop();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ScriptedHost::count(&host.status_calls), 1);
    }

    #[test]
    fn older_answers_never_overwrite_newer_ones() {
        let (tx, _rx) = watch::channel(PollSnapshot::initial("arm-01", true));
        let newer = PollSnapshot {
            status: PollStatus::inactive("arm-01"),
            error: Some("timeout".into()),
            loading: false,
            seq: 2,
            issued_at: None,
        };
        let older = PollSnapshot {
            status: active_status("arm-01"),
            error: None,
            loading: false,
            seq: 1,
            issued_at: None,
        };

        assert!(publish(&tx, newer.clone()));
        assert!(!publish(&tx, older));
        assert_eq!(*tx.borrow(), newer);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_answer_still_corrects_a_started_record() {
        let host = Arc::new(ScriptedHost::new());
        let orchestrator = Arc::new(Orchestrator::new(
            host.clone(),
            Registry::local(),
            Registry::remote(),
        ));
        let registry = orchestrator.registry(RegistryKind::Local).clone();
        let set = PollerSet::spawn(orchestrator.clone(), RegistryKind::Local, "arm-01", every(2000));
        let mut answers = set.pollers()[0].answers();
        answers.changed().await.unwrap();

        // The host acks the start, but the process dies right away: every
        // answer says "inactive", same as before the toggle.
        orchestrator
            .toggle(
                RegistryKind::Local,
                &robodock_protocol::RobotRef::new("arm-01", "so100"),
                robodock_protocol::ActivityConfig::minimal(ControlType::Teleop, "arm-01"),
            )
            .await
            .unwrap();
        assert_eq!(
            registry.get("arm-01").unwrap().control_type,
            Some(ControlType::Teleop)
        );

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(registry.get("arm-01").unwrap().control_type, None);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_set_reconciles_external_changes() {
        let host = Arc::new(ScriptedHost::new());
        let orchestrator = Arc::new(Orchestrator::new(
            host.clone(),
            Registry::local(),
            Registry::remote(),
        ));
        let registry = orchestrator.registry(RegistryKind::Local).clone();

        // Started by a script outside this client.
        host.set_active(ControlType::Record, true);
        let set = PollerSet::spawn(orchestrator.clone(), RegistryKind::Local, "arm-01", every(2000));

        for _ in 0..50 {
            if !registry.active().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            registry.get("arm-01").unwrap().control_type,
            Some(ControlType::Record)
        );
        assert_eq!(set.active_type(), Some(ControlType::Record));

        host.set_active(ControlType::Record, false);
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(registry.get("arm-01").unwrap().control_type, None);
        assert_eq!(set.active_type(), None);
    }
}
