//! Scripted host used by unit tests across the crate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use robodock_host::{HostCollaborator, HostError};
use robodock_protocol::{ActivityConfig, ControlType, PairingCode, PollStatus, RemoteConfig};
use tokio::sync::Semaphore;

pub struct ScriptedHost {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub pairing_calls: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,

    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_disconnect: AtomicBool,
    pub unreachable: AtomicBool,

    /// When set, start requests wait for a permit on `start_gate`.
    pub hold_starts: AtomicBool,
    pub start_gate: Semaphore,
    /// When set, connect and disconnect wait for a permit on `remote_gate`.
    pub hold_remote: AtomicBool,
    pub remote_gate: Semaphore,

    /// Consumed front to back; falls back to `active` when empty.
    pub status_script: Mutex<VecDeque<Result<PollStatus, String>>>,
    pub active: Mutex<HashMap<ControlType, bool>>,

    pub pairing_script: Mutex<VecDeque<Result<PairingCode, String>>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            pairing_calls: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
            hold_starts: AtomicBool::new(false),
            start_gate: Semaphore::new(0),
            hold_remote: AtomicBool::new(false),
            remote_gate: Semaphore::new(0),
            status_script: Mutex::new(VecDeque::new()),
            active: Mutex::new(HashMap::new()),
            pairing_script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, control_type: ControlType, active: bool) {
        self.active.lock().unwrap().insert(control_type, active);
    }

    pub fn push_status(&self, status: Result<PollStatus, String>) {
        self.status_script.lock().unwrap().push_back(status);
    }

    pub fn push_pairing(&self, code: Result<PairingCode, String>) {
        self.pairing_script.lock().unwrap().push_back(code);
    }

    pub fn release_start(&self) {
        self.start_gate.add_permits(1);
    }

    pub fn release_remote(&self) {
        self.remote_gate.add_permits(1);
    }

    async fn wait_remote_gate(&self) -> Result<(), HostError> {
        if self.hold_remote.load(Ordering::SeqCst) {
            let permit = self
                .remote_gate
                .acquire()
                .await
                .map_err(|_| HostError::Unreachable("gate closed".into()))?;
            permit.forget();
        }
        Ok(())
    }

    fn check_reachable(&self) -> Result<(), HostError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(HostError::Unreachable("connection refused".into()));
        }
        Ok(())
    }

    fn rejected(command: &str, message: &str) -> HostError {
        HostError::Rejected {
            command: command.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl HostCollaborator for ScriptedHost {
    async fn start_activity(&self, config: ActivityConfig) -> Result<String, HostError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.hold_starts.load(Ordering::SeqCst) {
            let permit = self.start_gate.acquire().await.map_err(|_| {
                HostError::Unreachable("gate closed".into())
            })?;
            permit.forget();
        }
        self.check_reachable()?;
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Self::rejected("start", "robot port busy"));
        }
        Ok(format!("{} started", config.control_type()))
    }

    async fn stop_activity(
        &self,
        control_type: ControlType,
        _nickname: &str,
    ) -> Result<String, HostError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Self::rejected("stop", "process did not exit"));
        }
        Ok(format!("{} stopped", control_type))
    }

    async fn activity_status(
        &self,
        control_type: ControlType,
        nickname: Option<&str>,
    ) -> Result<PollStatus, HostError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.status_script.lock().unwrap().pop_front() {
            return scripted.map_err(HostError::Unreachable);
        }
        self.check_reachable()?;
        let active = self
            .active
            .lock()
            .unwrap()
            .get(&control_type)
            .copied()
            .unwrap_or(false);
        Ok(PollStatus {
            active,
            last_command_time_ms: 0,
            source: if active { "ui".into() } else { "none".into() },
            nickname: nickname.unwrap_or_default().to_string(),
        })
    }

    async fn kiosk_pairing_info(&self) -> Result<PairingCode, HostError> {
        self.pairing_calls.fetch_add(1, Ordering::SeqCst);
        match self.pairing_script.lock().unwrap().pop_front() {
            Some(result) => result.map_err(HostError::Unreachable),
            None => Err(HostError::Unreachable("no pairing code scripted".into())),
        }
    }

    async fn read_remote_config(&self, nickname: &str) -> Result<RemoteConfig, HostError> {
        self.check_reachable()?;
        Ok(RemoteConfig {
            remote_ip: format!("{}.local", nickname),
            remote_port: "22".into(),
            username: "robot".into(),
            password: "secret".into(),
            left_arm_port: "/dev/ttyUSB0".into(),
            right_arm_port: "/dev/ttyUSB1".into(),
            keyboard: "none".into(),
            fps: 30,
        })
    }

    async fn connect_remote(
        &self,
        nickname: &str,
        _config: RemoteConfig,
    ) -> Result<String, HostError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.wait_remote_gate().await?;
        self.check_reachable()?;
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Self::rejected("connect_remote", "authentication failed"));
        }
        Ok(format!("connected to {}", nickname))
    }

    async fn disconnect_remote(&self, nickname: &str) -> Result<String, HostError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.wait_remote_gate().await?;
        self.check_reachable()?;
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(Self::rejected("disconnect_remote", "robot did not answer"));
        }
        Ok(format!("disconnected from {}", nickname))
    }
}
