//! Pairing subsystem
//!
//! `PairingDisplay` shows the host-issued pairing code while the kiosk asks
//! for it, refreshing on a fixed cadence. `PairingStore` remembers the robots
//! this client paired with, one connection per nickname.

use std::sync::Arc;
use std::time::Duration;

use robodock_host::{HostCollaborator, HostEventBus};
use robodock_protocol::{now_ms, HostEvent, PairedConnection, PairingCode};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tracing::{debug, info, warn};

use crate::store::{ClientStore, PairedConnections, StoreError, PAIRED_CONNECTIONS_KEY};

pub const DEFAULT_PAIRING_REFRESH: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingOptions {
    pub refresh_every: Duration,
}

impl Default for PairingOptions {
    fn default() -> Self {
        Self {
            refresh_every: DEFAULT_PAIRING_REFRESH,
        }
    }
}

/// What the pairing panel shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingView {
    Closed,
    Loading,
    Unavailable { error: String },
    Code(PairingCode),
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Open,
    Close,
}

pub struct PairingDisplay {
    control_tx: mpsc::Sender<Control>,
    view_rx: watch::Receiver<PairingView>,
    task: JoinHandle<()>,
}

impl PairingDisplay {
    pub fn spawn(
        host: Arc<dyn HostCollaborator>,
        events: &HostEventBus,
        options: PairingOptions,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(8);
        let (view_tx, view_rx) = watch::channel(PairingView::Closed);
        let task = tokio::spawn(run(
            host,
            events.subscribe(),
            control_rx,
            view_tx,
            options.refresh_every,
        ));
        Self {
            control_tx,
            view_rx,
            task,
        }
    }

    pub fn open(&self) {
        self.send(Control::Open);
    }

    pub fn close(&self) {
        self.send(Control::Close);
    }

    fn send(&self, control: Control) {
        if let Err(e) = self.control_tx.try_send(control) {
            debug!(
                component = "pairing",
                event = "pairing.control_dropped",
                error = %e,
                "Pairing control request dropped"
            );
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PairingView> {
        self.view_rx.clone()
    }

    pub fn view(&self) -> PairingView {
        self.view_rx.borrow().clone()
    }

    /// The code to render, if any. An expired code is never shown even if
    /// it was the last thing the host returned.
    pub fn visible_code(&self, now_ms: u64) -> Option<PairingCode> {
        match &*self.view_rx.borrow() {
            PairingView::Code(code) if !code.is_expired(now_ms) => Some(code.clone()),
            _ => None,
        }
    }
}

impl Drop for PairingDisplay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    host: Arc<dyn HostCollaborator>,
    mut events: broadcast::Receiver<HostEvent>,
    mut control: mpsc::Receiver<Control>,
    view_tx: watch::Sender<PairingView>,
    refresh_every: Duration,
) {
    let mut refresh: Option<Interval> = None;
    let mut events_open = true;

    loop {
        let request = tokio::select! {
            event = events.recv(), if events_open => match event {
                Ok(HostEvent::PairingOpen) => Some(Control::Open),
                Ok(HostEvent::PairingClose) => Some(Control::Close),
                Ok(_) => None,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(
                        component = "pairing",
                        event = "pairing.events_lagged",
                        skipped = skipped,
                        "Missed host events"
                    );
                    None
                }
                Err(RecvError::Closed) => {
                    events_open = false;
                    None
                }
            },
            cmd = control.recv() => match cmd {
                Some(cmd) => Some(cmd),
                None => break,
            },
            _ = next_tick(&mut refresh) => {
                fetch(host.as_ref(), &view_tx).await;
                None
            }
        };

        match request {
            Some(Control::Open) if refresh.is_none() => {
                info!(
                    component = "pairing",
                    event = "pairing.opened",
                    "Showing pairing code"
                );
                view_tx.send_replace(PairingView::Loading);
                // First tick fires immediately, which does the initial fetch.
                refresh = Some(tokio::time::interval(refresh_every));
            }
            Some(Control::Close) if refresh.is_some() => {
                info!(
                    component = "pairing",
                    event = "pairing.closed",
                    "Pairing code dismissed"
                );
                refresh = None;
                view_tx.send_replace(PairingView::Closed);
            }
            _ => {}
        }
    }
}

async fn next_tick(refresh: &mut Option<Interval>) {
    match refresh {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn fetch(host: &dyn HostCollaborator, view_tx: &watch::Sender<PairingView>) {
    let next = match host.kiosk_pairing_info().await {
        Ok(code) if code.is_expired(now_ms()) => PairingView::Unavailable {
            error: "pairing code expired".into(),
        },
        Ok(code) => PairingView::Code(code),
        Err(e) => {
            warn!(
                component = "pairing",
                event = "pairing.fetch_failed",
                error = %e,
                "Failed to load pairing code"
            );
            PairingView::Unavailable {
                error: e.to_string(),
            }
        }
    };
    view_tx.send_replace(next);
}

/// Human label for the code's remaining lifetime, e.g. "Expires in 4:07"
pub fn expires_label(view: &PairingView, now_ms: u64) -> String {
    let PairingView::Code(code) = view else {
        return "Pairing code unavailable".to_string();
    };
    if code.expires_at_ms <= now_ms {
        return "Expired".to_string();
    }
    let total_secs = code.remaining_ms(now_ms) / 1000;
    format!("Expires in {}:{:02}", total_secs / 60, total_secs % 60)
}

/// Robots advertise nicknames as `@name`; pairings are keyed without it.
pub fn normalize_nickname(nickname: &str) -> &str {
    nickname.strip_prefix('@').unwrap_or(nickname)
}

/// Remembered pairings, persisted across restarts
#[derive(Clone)]
pub struct PairingStore {
    store: Arc<ClientStore>,
}

impl PairingStore {
    pub fn new(store: Arc<ClientStore>) -> Self {
        Self { store }
    }

    pub fn paired_connections(&self) -> Result<PairedConnections, StoreError> {
        Ok(self.store.get(PAIRED_CONNECTIONS_KEY)?.unwrap_or_default())
    }

    pub fn paired_connection(&self, nickname: &str) -> Result<Option<PairedConnection>, StoreError> {
        Ok(self
            .paired_connections()?
            .remove(normalize_nickname(nickname)))
    }

    /// Remember a pairing. The last pairing for a nickname wins.
    pub fn record_pairing(&self, mut connection: PairedConnection) -> Result<(), StoreError> {
        connection.nickname = normalize_nickname(&connection.nickname).to_string();
        let mut connections = self.paired_connections()?;
        let replaced = connections
            .insert(connection.nickname.clone(), connection.clone())
            .is_some();
        self.store.put(PAIRED_CONNECTIONS_KEY, &connections)?;

        info!(
            component = "pairing",
            event = "pairing.recorded",
            nickname = %connection.nickname,
            host = %connection.host,
            port = connection.port,
            replaced = replaced,
            "Paired connection saved"
        );
        Ok(())
    }

    /// Returns true if a pairing was removed
    pub fn forget(&self, nickname: &str) -> Result<bool, StoreError> {
        let mut connections = self.paired_connections()?;
        if connections.remove(normalize_nickname(nickname)).is_none() {
            return Ok(false);
        }
        self.store.put(PAIRED_CONNECTIONS_KEY, &connections)?;
        info!(
            component = "pairing",
            event = "pairing.forgotten",
            nickname = %normalize_nickname(nickname),
            "Paired connection removed"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::ScriptedHost;

    fn code(expires_at_ms: u64) -> PairingCode {
        PairingCode {
            code: "482913".into(),
            expires_at_ms,
            service_port: 42112,
            robot_name: "Sourccey".into(),
            nickname: "sourccey".into(),
            robot_type: "sourccey".into(),
        }
    }

    fn paired(nickname: &str, host: &str, paired_at: u64) -> PairedConnection {
        PairedConnection {
            nickname: nickname.into(),
            host: host.into(),
            port: 42112,
            token: format!("token-{paired_at}"),
            robot_type: "sourccey".into(),
            robot_name: "Sourccey".into(),
            paired_at,
        }
    }

    async fn wait_for(rx: &mut watch::Receiver<PairingView>, pred: impl Fn(&PairingView) -> bool) -> PairingView {
        loop {
            {
                let view = rx.borrow_and_update();
                if pred(&view) {
                    return view.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    }

    #[test]
    fn expired_code_is_never_labelled_valid() {
        let now = 1_700_000_000_000;
        let view = PairingView::Code(code(now - 1));
        assert_eq!(expires_label(&view, now), "Expired");
        assert_eq!(expires_label(&PairingView::Code(code(now)), now), "Expired");
        assert_eq!(
            expires_label(&PairingView::Code(code(now + 247_500)), now),
            "Expires in 4:07"
        );
        assert_eq!(expires_label(&PairingView::Loading, now), "Pairing code unavailable");
    }

    #[tokio::test]
    async fn expired_code_from_host_is_not_visible() {
        let host = Arc::new(ScriptedHost::new());
        host.push_pairing(Ok(code(now_ms() - 1)));
        let bus = HostEventBus::new();
        let display = PairingDisplay::spawn(host.clone(), &bus, PairingOptions::default());

        display.open();
        let mut rx = display.subscribe();
        let view = wait_for(&mut rx, |v| matches!(v, PairingView::Unavailable { .. })).await;
        assert!(matches!(view, PairingView::Unavailable { .. }));
        assert_eq!(display.visible_code(now_ms()), None);
    }

    #[tokio::test]
    async fn last_fetched_code_stops_showing_once_expired() {
        let host = Arc::new(ScriptedHost::new());
        let expires = now_ms() + 60_000;
        host.push_pairing(Ok(code(expires)));
        let bus = HostEventBus::new();
        let display = PairingDisplay::spawn(host.clone(), &bus, PairingOptions::default());

        bus.publish(HostEvent::PairingOpen);
        let mut rx = display.subscribe();
        wait_for(&mut rx, |v| matches!(v, PairingView::Code(_))).await;

        assert!(display.visible_code(expires).is_some());
        assert_eq!(display.visible_code(expires + 1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_failure_drops_previous_code() {
        let host = Arc::new(ScriptedHost::new());
        host.push_pairing(Ok(code(now_ms() + 600_000)));
        // Second fetch finds nothing scripted and fails.
        let bus = HostEventBus::new();
        let display = PairingDisplay::spawn(
            host.clone(),
            &bus,
            PairingOptions {
                refresh_every: Duration::from_secs(30),
            },
        );

        display.open();
        let mut rx = display.subscribe();
        wait_for(&mut rx, |v| matches!(v, PairingView::Code(_))).await;
        assert_eq!(ScriptedHost::count(&host.pairing_calls), 1);

        let view = wait_for(&mut rx, |v| matches!(v, PairingView::Unavailable { .. })).await;
        assert!(matches!(view, PairingView::Unavailable { .. }));
        assert_eq!(ScriptedHost::count(&host.pairing_calls), 2);
        assert_eq!(display.visible_code(now_ms()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn close_event_stops_refreshing() {
        let host = Arc::new(ScriptedHost::new());
        host.push_pairing(Ok(code(now_ms() + 600_000)));
        let bus = HostEventBus::new();
        let display = PairingDisplay::spawn(host.clone(), &bus, PairingOptions::default());

        bus.publish(HostEvent::PairingOpen);
        let mut rx = display.subscribe();
        wait_for(&mut rx, |v| matches!(v, PairingView::Code(_))).await;

        bus.publish(HostEvent::PairingClose);
        wait_for(&mut rx, |v| *v == PairingView::Closed).await;

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(ScriptedHost::count(&host.pairing_calls), 1);
    }

    #[test]
    fn last_pairing_for_a_nickname_wins() {
        let store = PairingStore::new(Arc::new(ClientStore::open_in_memory().unwrap()));
        store.record_pairing(paired("sourccey", "10.0.0.12", 1)).unwrap();
        store.record_pairing(paired("@sourccey", "10.0.0.40", 2)).unwrap();
        store.record_pairing(paired("lekiwi", "10.0.0.41", 3)).unwrap();

        let all = store.paired_connections().unwrap();
        assert_eq!(all.len(), 2);
        let sourccey = store.paired_connection("sourccey").unwrap().unwrap();
        assert_eq!(sourccey.host, "10.0.0.40");
        assert_eq!(sourccey.paired_at, 2);

        assert!(store.forget("@lekiwi").unwrap());
        assert!(!store.forget("lekiwi").unwrap());
        assert_eq!(store.paired_connections().unwrap().len(), 1);
    }
}
