//! Cache coordinator: node identity, publisher, and the background
//! subscriber that applies peer invalidations to the local cache.
//!
//! Exactly one subscriber task runs per coordinator. It re-subscribes on
//! connection loss with exponential backoff (base 100 ms, cap 30 s, jitter
//! +/-10%) and never propagates failures to request tasks. While
//! disconnected the local cache keeps serving reads; entries go stale at
//! most until their TTL elapses, which is the declared consistency bound.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use seshat_core::{
    ClockSource, InvalidationEvent, InvalidationMessage, SessionError, SessionResult,
};

use crate::cache::LocalCache;
use crate::kv::PubSubClient;
use crate::metrics::{names, StoreMetrics};

/// Reconnect backoff floor.
const RECONNECT_BASE: Duration = Duration::from_millis(100);
/// Reconnect backoff ceiling.
const RECONNECT_CAP: Duration = Duration::from_secs(30);
/// Fractional jitter applied to reconnect delays.
const RECONNECT_JITTER: f64 = 0.1;
/// How long `shutdown` waits for the subscriber task to exit on its own.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// Coordinator lifecycle state.
///
/// State machine:
/// `Stopped -> Starting -> Running <-> Degraded -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No subscriber task exists.
    Stopped,
    /// Subscriber task spawned, first subscribe not yet established.
    Starting,
    /// Subscribed and applying invalidations.
    Running,
    /// Subscription lost; reconnecting with backoff.
    Degraded,
    /// Shutdown requested; waiting for the subscriber task to exit.
    Stopping,
}

/// Owns the subscriber task and the publish side of the invalidation
/// channel for one clustered store instance.
pub struct Coordinator<T> {
    node_id: String,
    channel: String,
    cache: Arc<LocalCache<T>>,
    pubsub: Arc<dyn PubSubClient>,
    clock: Arc<dyn ClockSource>,
    state: ArcSwap<CoordinatorState>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    metrics: StoreMetrics,
}

impl<T> Coordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a coordinator in the `Stopped` state.
    #[must_use]
    pub fn new(
        node_id: String,
        channel: String,
        cache: Arc<LocalCache<T>>,
        pubsub: Arc<dyn PubSubClient>,
        clock: Arc<dyn ClockSource>,
        metrics: StoreMetrics,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            node_id,
            channel,
            cache,
            pubsub,
            clock,
            state: ArcSwap::from_pointee(CoordinatorState::Stopped),
            shutdown_tx,
            task: Mutex::new(None),
            metrics,
        }
    }

    /// This node's identity on the channel.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        **self.state.load()
    }

    /// Whether the subscriber is currently established.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == CoordinatorState::Running
    }

    /// Spawns the subscriber task.
    ///
    /// # Errors
    ///
    /// `Validation` if the coordinator has already been started.
    pub fn start(self: &Arc<Self>) -> SessionResult<()> {
        if self.state() != CoordinatorState::Stopped {
            return Err(SessionError::Validation {
                reason: "coordinator already started".to_string(),
            });
        }
        self.state.store(Arc::new(CoordinatorState::Starting));

        let coordinator = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            coordinator.subscriber_loop(&mut shutdown_rx).await;
        });
        *self.task.lock() = Some(handle);

        info!(node = %self.node_id, channel = %self.channel, "coordinator starting");
        Ok(())
    }

    /// Cancels the subscriber cooperatively, waits up to a bounded drain
    /// interval, then releases resources unconditionally and clears the
    /// local cache.
    pub async fn shutdown(&self) {
        self.state.store(Arc::new(CoordinatorState::Stopping));
        let _ = self.shutdown_tx.send(true);

        let handle = self.task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(SHUTDOWN_DRAIN, &mut handle).await.is_err() {
                warn!(node = %self.node_id, "subscriber did not exit in time, aborting");
                handle.abort();
            }
        }

        self.cache.clear();
        self.state.store(Arc::new(CoordinatorState::Stopped));
        info!(node = %self.node_id, "coordinator stopped");
    }

    /// Publishes an invalidation for `session_id`, tagged with this node's
    /// identity. Best-effort: failures are logged, never surfaced.
    pub async fn publish(&self, event: InvalidationEvent, session_id: &str) {
        let msg = InvalidationMessage::new(event, session_id, &self.node_id, self.clock.now_ms());
        self.publish_message(msg).await;
    }

    /// Publishes a `regenerated` invalidation carrying both ids.
    pub async fn publish_regenerated(&self, old_id: &str, new_id: &str) {
        let msg =
            InvalidationMessage::regenerated(old_id, new_id, &self.node_id, self.clock.now_ms());
        self.publish_message(msg).await;
    }

    async fn publish_message(&self, msg: InvalidationMessage) {
        let payload = match msg.to_bytes() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "invalidation encode failed");
                return;
            }
        };
        if let Err(err) = self.pubsub.publish(&self.channel, payload).await {
            warn!(error = %err, channel = %self.channel, "invalidation publish failed");
        }
    }

    async fn subscriber_loop(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        let mut reconnect_attempt: u32 = 0;
        loop {
            if *shutdown_rx.borrow() {
                return;
            }
            match self.pubsub.subscribe(&self.channel).await {
                Ok(mut subscription) => {
                    self.state.store(Arc::new(CoordinatorState::Running));
                    reconnect_attempt = 0;
                    info!(node = %self.node_id, channel = %self.channel, "subscribed");

                    loop {
                        tokio::select! {
                            _ = shutdown_rx.changed() => return,
                            message = subscription.next_message() => match message {
                                Ok(Some(payload)) => self.apply(&payload),
                                Ok(None) => {
                                    warn!(node = %self.node_id, "subscription closed");
                                    break;
                                }
                                Err(err) => {
                                    warn!(node = %self.node_id, error = %err, "subscription failed");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(node = %self.node_id, error = %err, "subscribe failed");
                }
            }

            self.state.store(Arc::new(CoordinatorState::Degraded));
            let delay = reconnect_delay(reconnect_attempt);
            reconnect_attempt = reconnect_attempt.saturating_add(1);
            debug!(delay_ms = delay.as_millis() as u64, "reconnect backoff");
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Applies one received invalidation to the local cache.
    fn apply(&self, payload: &[u8]) {
        let msg = match InvalidationMessage::from_bytes(payload) {
            Ok(msg) => msg,
            Err(err) => {
                // A bad message never terminates the subscriber.
                self.metrics.incr(names::INVALIDATION_PARSE_ERROR);
                warn!(error = %err, "undecodable invalidation message");
                return;
            }
        };

        // Loopback suppression: the publisher already updated its own cache
        // synchronously.
        if msg.is_from(&self.node_id) {
            debug!(id = %msg.id, "loopback invalidation ignored");
            return;
        }

        match msg.event {
            InvalidationEvent::Deleted | InvalidationEvent::Updated => {
                self.cache.evict(&msg.id);
            }
            InvalidationEvent::Regenerated => {
                if let Some(old_id) = &msg.old_id {
                    self.cache.evict(old_id);
                }
                self.cache.evict(&msg.id);
            }
            InvalidationEvent::Created => {
                // Peers cannot hold a fresh id yet; nothing to evict.
                debug!(id = %msg.id, "created invalidation ignored");
            }
            InvalidationEvent::Unknown => {
                warn!(id = %msg.id, "unknown invalidation event skipped");
            }
        }
    }
}

fn reconnect_delay(attempt: u32) -> Duration {
    let exp = RECONNECT_BASE.as_millis() as f64 * 2f64.powi(attempt.min(16) as i32);
    let capped = exp.min(RECONNECT_CAP.as_millis() as f64);
    let scale = 1.0 + rand::rng().random_range(-RECONNECT_JITTER..=RECONNECT_JITTER);
    Duration::from_millis((capped * scale).max(1.0) as u64)
}

#[cfg(test)]
mod tests {
    use seshat_core::{ManualClock, SessionRecord};

    use crate::kv::InMemoryPubSub;

    use super::*;

    fn record(id: &str) -> SessionRecord<u32> {
        SessionRecord {
            session_id: id.to_string(),
            created_at_ms: 0,
            expires_at_ms: u64::MAX,
            fingerprint: None,
            data: 0,
        }
    }

    fn coordinator(
        node: &str,
        bus: &Arc<InMemoryPubSub>,
    ) -> (Arc<Coordinator<u32>>, Arc<LocalCache<u32>>) {
        let cache = Arc::new(LocalCache::new(100, 0));
        let clock = Arc::new(ManualClock::new(1_000));
        let coordinator = Arc::new(Coordinator::new(
            node.to_string(),
            "seshat:invalidations".to_string(),
            Arc::clone(&cache),
            Arc::clone(bus) as Arc<dyn PubSubClient>,
            clock as Arc<dyn ClockSource>,
            StoreMetrics::disabled(),
        ));
        (coordinator, cache)
    }

    async fn wait_running(c: &Coordinator<u32>) {
        for _ in 0..100 {
            if c.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("coordinator never reached Running");
    }

    async fn wait_evicted(cache: &LocalCache<u32>, id: &str) {
        for _ in 0..100 {
            if !cache.contains(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{id} still cached");
    }

    #[tokio::test]
    async fn lifecycle_stopped_starting_running_stopped() {
        let bus = Arc::new(InMemoryPubSub::default());
        let (coordinator, _cache) = coordinator("node-a", &bus);

        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
        coordinator.start().unwrap();
        wait_running(&coordinator).await;

        coordinator.shutdown().await;
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    }

    #[tokio::test]
    async fn double_start_rejected() {
        let bus = Arc::new(InMemoryPubSub::default());
        let (coordinator, _cache) = coordinator("node-a", &bus);

        coordinator.start().unwrap();
        assert_eq!(coordinator.start().unwrap_err().kind(), "validation");
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn peer_deleted_message_evicts() {
        let bus = Arc::new(InMemoryPubSub::default());
        let (coordinator, cache) = coordinator("node-a", &bus);
        coordinator.start().unwrap();
        wait_running(&coordinator).await;

        cache.put("session-id-0000001", record("session-id-0000001"), 1);

        let msg = InvalidationMessage::new(
            InvalidationEvent::Deleted,
            "session-id-0000001",
            "node-b",
            2,
        );
        bus.publish("seshat:invalidations", msg.to_bytes().unwrap())
            .await
            .unwrap();

        wait_evicted(&cache, "session-id-0000001").await;
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn loopback_messages_never_mutate_cache() {
        let bus = Arc::new(InMemoryPubSub::default());
        let (coordinator, cache) = coordinator("node-a", &bus);
        coordinator.start().unwrap();
        wait_running(&coordinator).await;

        cache.put("session-id-0000001", record("session-id-0000001"), 1);
        coordinator
            .publish(InvalidationEvent::Deleted, "session-id-0000001")
            .await;

        // Give the subscriber a chance to (incorrectly) act on it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.contains("session-id-0000001"));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn regenerated_evicts_both_ids() {
        let bus = Arc::new(InMemoryPubSub::default());
        let (coordinator, cache) = coordinator("node-a", &bus);
        coordinator.start().unwrap();
        wait_running(&coordinator).await;

        cache.put("old-session-id-01", record("old-session-id-01"), 1);
        cache.put("new-session-id-01", record("new-session-id-01"), 1);

        let msg = InvalidationMessage::regenerated(
            "old-session-id-01",
            "new-session-id-01",
            "node-b",
            2,
        );
        bus.publish("seshat:invalidations", msg.to_bytes().unwrap())
            .await
            .unwrap();

        wait_evicted(&cache, "old-session-id-01").await;
        wait_evicted(&cache, "new-session-id-01").await;
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn garbage_messages_do_not_kill_subscriber() {
        let bus = Arc::new(InMemoryPubSub::default());
        let (coordinator, cache) = coordinator("node-a", &bus);
        coordinator.start().unwrap();
        wait_running(&coordinator).await;

        bus.publish("seshat:invalidations", b"{not json".to_vec())
            .await
            .unwrap();

        // Subscriber survives and still applies the next valid message.
        cache.put("session-id-0000001", record("session-id-0000001"), 1);
        let msg = InvalidationMessage::new(
            InvalidationEvent::Updated,
            "session-id-0000001",
            "node-b",
            2,
        );
        bus.publish("seshat:invalidations", msg.to_bytes().unwrap())
            .await
            .unwrap();

        wait_evicted(&cache, "session-id-0000001").await;
        assert!(coordinator.is_running());
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_clears_cache() {
        let bus = Arc::new(InMemoryPubSub::default());
        let (coordinator, cache) = coordinator("node-a", &bus);
        coordinator.start().unwrap();
        wait_running(&coordinator).await;

        cache.put("session-id-0000001", record("session-id-0000001"), 1);
        coordinator.shutdown().await;
        assert!(cache.is_empty());
    }

    #[test]
    fn reconnect_delay_backs_off_and_caps() {
        let first = reconnect_delay(0);
        assert!((90..=111).contains(&(first.as_millis() as u64)));

        let capped = reconnect_delay(30);
        assert!(capped <= Duration::from_millis(33_000));
        assert!(capped >= Duration::from_millis(27_000));
    }
}
