//! Broadcast bus for advisory host events, and the task that fills it
//! from a host's event feed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use robodock_protocol::{HostEvent, HostEventBatch};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::HostError;

const EVENT_CAPACITY: usize = 64;

/// Fan-out of `HostEvent`s to every interested view (cheap to Clone).
#[derive(Clone)]
pub struct HostEventBus {
    tx: broadcast::Sender<HostEvent>,
}

impl HostEventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Having no listeners is fine.
    pub fn publish(&self, event: HostEvent) {
        if self.tx.send(event).is_err() {
            debug!(
                component = "host_events",
                event = "host_events.no_listeners",
                "Host event dropped, no listeners"
            );
        }
    }

    /// Lagging receivers skip the events they missed.
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.tx.subscribe()
    }

    /// Publish everything `feed` produces until the returned handle drops.
    /// Feed errors are retried after `retry`.
    pub fn forward(&self, feed: Arc<dyn EventFeed>, retry: Duration) -> EventForwarder {
        let bus = self.clone();
        EventForwarder {
            task: tokio::spawn(forward_loop(bus, feed, retry)),
        }
    }
}

impl Default for HostEventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A host's event stream, read one batch at a time
#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Events newer than `after`. May wait for the host to have some.
    async fn next_events(&self, after: u64) -> Result<HostEventBatch, HostError>;
}

/// Running feed-to-bus task. Dropping it stops forwarding.
pub struct EventForwarder {
    task: JoinHandle<()>,
}

impl Drop for EventForwarder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn forward_loop(bus: HostEventBus, feed: Arc<dyn EventFeed>, retry: Duration) {
    let mut cursor = 0;
    let mut failing = false;
    loop {
        match feed.next_events(cursor).await {
            Ok(batch) => {
                if failing {
                    debug!(
                        component = "host_events",
                        event = "host_events.feed_recovered",
                        "Host event feed recovered"
                    );
                    failing = false;
                }
                // A restarted host starts counting again from zero.
                cursor = batch.cursor;
                for event in batch.events {
                    bus.publish(event);
                }
            }
            Err(e) => {
                if failing {
                    debug!(
                        component = "host_events",
                        event = "host_events.feed_failed",
                        error = %e,
                        "Host event feed still failing"
                    );
                } else {
                    warn!(
                        component = "host_events",
                        event = "host_events.feed_failed",
                        error = %e,
                        "Host event feed failed, retrying"
                    );
                    failing = true;
                }
                tokio::time::sleep(retry).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_published_after_subscribing() {
        let bus = HostEventBus::new();
        bus.publish(HostEvent::PairingClose);

        let mut rx = bus.subscribe();
        bus.publish(HostEvent::PairingOpen);

        assert_eq!(rx.recv().await.unwrap(), HostEvent::PairingOpen);
    }

    struct ScriptedFeed {
        batches: Mutex<VecDeque<Result<HostEventBatch, HostError>>>,
        cursors: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl EventFeed for ScriptedFeed {
        async fn next_events(&self, after: u64) -> Result<HostEventBatch, HostError> {
            self.cursors.lock().unwrap().push(after);
            let next = self.batches.lock().unwrap().pop_front();
            match next {
                Some(batch) => batch,
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forwarder_publishes_batches_and_retries_failures() {
        let feed = Arc::new(ScriptedFeed {
            batches: Mutex::new(VecDeque::from([
                Ok(HostEventBatch {
                    cursor: 2,
                    events: vec![HostEvent::PairingOpen],
                }),
                Err(HostError::Unreachable("connection refused".into())),
                Ok(HostEventBatch {
                    cursor: 3,
                    events: vec![HostEvent::ProcessShutdown {
                        nickname: None,
                        exit_code: Some(1),
                    }],
                }),
            ])),
            cursors: Mutex::new(Vec::new()),
        });

        let bus = HostEventBus::new();
        let mut rx = bus.subscribe();
        let _forwarder = bus.forward(feed.clone(), Duration::from_secs(1));

        assert_eq!(rx.recv().await.unwrap(), HostEvent::PairingOpen);
        assert_eq!(
            rx.recv().await.unwrap(),
            HostEvent::ProcessShutdown {
                nickname: None,
                exit_code: Some(1)
            }
        );
        // The failed read is retried from the same cursor.
        assert_eq!(feed.cursors.lock().unwrap()[..3], [0, 2, 2]);
    }
}
