//! Wires config, persistence and hosts into one orchestrator.

use std::sync::Arc;
use std::time::Duration;

use robodock_host::{EventFeed, EventForwarder, HostCollaborator, HostError, HostEventBus, HttpHost};
use robodock_protocol::{PairedConnection, RobotRef};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::pairing::{normalize_nickname, PairingDisplay, PairingStore};
use crate::poller::PollerSet;
use crate::registry::{Registry, RegistryKind};
use crate::store::{ClientStore, StoreError};

/// Delay before re-reading a failed host event feed
const EVENT_RETRY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Host(#[from] HostError),
}

pub struct Client {
    config: Config,
    local_host: Arc<dyn HostCollaborator>,
    feed: Option<Arc<dyn EventFeed>>,
    orchestrator: Arc<Orchestrator>,
    pairings: PairingStore,
    events: HostEventBus,
}

/// Keeps the event bus fed from the local host and applies host events to
/// the registry. Dropping it stops both.
pub struct HostEventTasks {
    _forwarder: Option<EventForwarder>,
    reconciler: JoinHandle<()>,
}

impl Drop for HostEventTasks {
    fn drop(&mut self) {
        self.reconciler.abort();
    }
}

impl Client {
    /// Client talking to the local backend on `config.host_port`
    pub fn new(config: Config, store: Arc<ClientStore>) -> Result<Self, ClientError> {
        let local = Arc::new(HttpHost::local(config.host_port)?.with_timeout(config.host_timeout())?);
        let mut client = Self::with_host(config, store, local.clone())?;
        client.feed = Some(local as Arc<dyn EventFeed>);
        Ok(client)
    }

    /// Client over any host. No event feed is read; events reach the bus
    /// only through `events().publish`.
    pub fn with_host(
        config: Config,
        store: Arc<ClientStore>,
        local_host: Arc<dyn HostCollaborator>,
    ) -> Result<Self, ClientError> {
        let orchestrator = Arc::new(Orchestrator::new(
            local_host.clone(),
            Registry::local(),
            Registry::remote(),
        ));
        let client = Self {
            config,
            local_host,
            feed: None,
            orchestrator,
            pairings: PairingStore::new(store),
            events: HostEventBus::new(),
        };

        let paired = client.pairings.paired_connections()?;
        for connection in paired.values() {
            client.route_paired(connection)?;
        }
        info!(
            component = "client",
            event = "client.ready",
            host_port = client.config.host_port,
            paired = paired.len(),
            "Client ready"
        );
        Ok(client)
    }

    fn route_paired(&self, connection: &PairedConnection) -> Result<(), HostError> {
        let host = HttpHost::paired(connection)?.with_timeout(self.config.host_timeout())?;
        self.orchestrator
            .register_remote_host(&connection.nickname, Arc::new(host));
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn registry(&self, kind: RegistryKind) -> &Arc<Registry> {
        self.orchestrator.registry(kind)
    }

    pub fn pairings(&self) -> &PairingStore {
        &self.pairings
    }

    pub fn events(&self) -> &HostEventBus {
        &self.events
    }

    /// Remember a pairing and route the robot's commands to its service
    pub fn pair(&self, mut connection: PairedConnection) -> Result<(), ClientError> {
        connection.nickname = normalize_nickname(&connection.nickname).to_string();
        self.pairings.record_pairing(connection.clone())?;
        self.route_paired(&connection)?;
        Ok(())
    }

    /// Forget a pairing and stop routing the robot to its service.
    /// Returns false if there was nothing to forget.
    pub fn forget(&self, nickname: &str) -> Result<bool, ClientError> {
        let nickname = normalize_nickname(nickname);
        let removed = self.pairings.forget(nickname)?;
        let unrouted = self.orchestrator.unregister_remote_host(nickname);
        Ok(removed || unrouted)
    }

    /// Robot metadata for a nickname: paired robots carry their own type
    pub fn robot_ref(&self, kind: RegistryKind, nickname: &str) -> RobotRef {
        let nickname = normalize_nickname(nickname);
        if kind == RegistryKind::Remote {
            match self.pairings.paired_connection(nickname) {
                Ok(Some(connection)) => {
                    return RobotRef {
                        nickname: connection.nickname,
                        robot_type: connection.robot_type,
                        robot_name: Some(connection.robot_name),
                    };
                }
                Ok(None) => {}
                Err(e) => warn!(
                    component = "client",
                    event = "client.pairing_lookup_failed",
                    nickname = %nickname,
                    error = %e,
                    "Could not read pairing, using local robot metadata"
                ),
            }
        }
        RobotRef::new(nickname, "local")
    }

    /// Start reading the local host's events into the bus and applying the
    /// ones that end activities.
    pub fn start_host_events(&self) -> HostEventTasks {
        let forwarder = self
            .feed
            .as_ref()
            .map(|feed| self.events.forward(feed.clone(), EVENT_RETRY));

        let mut rx = self.events.subscribe();
        let orchestrator = self.orchestrator.clone();
        let reconciler = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        orchestrator.apply_host_event(&event);
                    }
                    Err(RecvError::Lagged(skipped)) => debug!(
                        component = "client",
                        event = "client.host_events_lagged",
                        skipped = skipped,
                        "Missed host events"
                    ),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        HostEventTasks {
            _forwarder: forwarder,
            reconciler,
        }
    }

    pub fn watch(&self, kind: RegistryKind, nickname: &str, enabled: bool) -> PollerSet {
        PollerSet::spawn(
            self.orchestrator.clone(),
            kind,
            normalize_nickname(nickname),
            self.config.poller_options(enabled),
        )
    }

    pub fn pairing_display(&self) -> PairingDisplay {
        PairingDisplay::spawn(
            self.local_host.clone(),
            &self.events,
            self.config.pairing_options(),
        )
    }
}
