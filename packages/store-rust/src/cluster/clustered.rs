//! Clustered decorator: local cache in front of a shared backing store.
//!
//! Reads consult the cache first and populate it on miss. Writes persist to
//! the backing store, update the cache synchronously, then publish an
//! invalidation tagged with this node's id so peers evict their copies.
//! Queries delegate straight to the backing store and bypass the cache (the
//! cache is a read accelerator, not an index).

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use seshat_core::{
    ClockSource, InvalidationEvent, SessionPayload, SessionRecord, SessionResult,
};

use crate::cache::{CacheStats, LocalCache};
use crate::cluster::coordinator::Coordinator;
use crate::config::SessionConfig;
use crate::kv::PubSubClient;
use crate::metrics::{names, StoreMetrics};
use crate::store::{QueryableStore, SessionPredicate, SessionStore};

/// Cache-fronted store decorator for multi-node deployments.
pub struct ClusteredStore<T, S> {
    inner: S,
    coordinator: Arc<Coordinator<T>>,
    cache: Arc<LocalCache<T>>,
    config: Arc<SessionConfig>,
    clock: Arc<dyn ClockSource>,
    metrics: StoreMetrics,
}

impl<T, S> ClusteredStore<T, S>
where
    T: SessionPayload + Clone + Default,
    S: SessionStore<T>,
{
    /// Wraps `inner` with a local cache and a coordinator on the configured
    /// channel. Call [`start`](Self::start) before serving traffic.
    #[must_use]
    pub fn new(
        inner: S,
        config: Arc<SessionConfig>,
        clock: Arc<dyn ClockSource>,
        pubsub: Arc<dyn PubSubClient>,
    ) -> Self {
        let metrics = StoreMetrics::new("clustered", config.metrics_backend);
        let cache = Arc::new(LocalCache::new(
            config.cluster.local_cache_max_size,
            config.cluster.local_cache_ttl_ms,
        ));
        let coordinator = Arc::new(Coordinator::new(
            config.cluster.node_id.clone(),
            config.cluster.channel.clone(),
            Arc::clone(&cache),
            pubsub,
            Arc::clone(&clock),
            metrics.clone(),
        ));
        Self {
            inner,
            coordinator,
            cache,
            config,
            clock,
            metrics,
        }
    }

    /// Starts the coordinator's subscriber task.
    ///
    /// # Errors
    ///
    /// `Validation` if already started.
    pub fn start(&self) -> SessionResult<()> {
        self.coordinator.start()
    }

    /// Stops the subscriber and clears the local cache.
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }

    /// This node's identity on the invalidation channel.
    #[must_use]
    pub fn node_id(&self) -> &str {
        self.coordinator.node_id()
    }

    /// Local cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The wrapped backing store.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<T, S> SessionStore<T> for ClusteredStore<T, S>
where
    T: SessionPayload + Clone + Default,
    S: SessionStore<T>,
{
    async fn create(&self) -> SessionResult<SessionRecord<T>> {
        let record = self.inner.create().await?;
        self.cache
            .put(&record.session_id, record.clone(), self.clock.now_ms());
        self.coordinator
            .publish(InvalidationEvent::Created, &record.session_id)
            .await;
        Ok(record)
    }

    async fn get(&self, session_id: &str) -> SessionResult<SessionRecord<T>> {
        if let Some(record) = self.cache.get(session_id, self.clock.now_ms()) {
            self.metrics.incr(names::CACHE_HIT);
            return Ok(record);
        }
        self.metrics.incr(names::CACHE_MISS);

        let record = self.inner.get(session_id).await?;
        self.cache
            .put(session_id, record.clone(), self.clock.now_ms());
        // Reads never publish.
        Ok(record)
    }

    async fn get_opt(&self, session_id: &str) -> SessionResult<Option<SessionRecord<T>>> {
        if let Some(record) = self.cache.get(session_id, self.clock.now_ms()) {
            self.metrics.incr(names::CACHE_HIT);
            return Ok(Some(record));
        }
        self.metrics.incr(names::CACHE_MISS);

        let found = self.inner.get_opt(session_id).await?;
        if let Some(record) = &found {
            self.cache
                .put(session_id, record.clone(), self.clock.now_ms());
        }
        Ok(found)
    }

    async fn put(&self, session_id: &str, record: &SessionRecord<T>) -> SessionResult<()> {
        self.inner.put(session_id, record).await?;
        self.cache
            .put(session_id, record.clone(), self.clock.now_ms());
        self.coordinator
            .publish(InvalidationEvent::Updated, session_id)
            .await;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> SessionResult<bool> {
        let existed = self.inner.delete(session_id).await?;
        self.cache.evict(session_id);
        self.coordinator
            .publish(InvalidationEvent::Deleted, session_id)
            .await;
        Ok(existed)
    }

    async fn exists(&self, session_id: &str) -> SessionResult<bool> {
        self.inner.exists(session_id).await
    }

    async fn regenerate(&self, session_id: &str) -> SessionResult<String> {
        let new_id = self.inner.regenerate(session_id).await?;
        self.cache.evict(session_id);
        if let Some(record) = self.inner.get_opt(&new_id).await? {
            self.cache.put(&new_id, record, self.clock.now_ms());
        }
        self.coordinator
            .publish_regenerated(session_id, &new_id)
            .await;
        Ok(new_id)
    }

    async fn touch(&self, session_id: &str) -> SessionResult<()> {
        self.inner.touch(session_id).await?;
        let now_ms = self.clock.now_ms();
        if let Some(mut record) = self.cache.get(session_id, now_ms) {
            record.touch(now_ms, self.config.timeout_ms);
            self.cache.put(session_id, record, now_ms);
        }
        self.coordinator
            .publish(InvalidationEvent::Updated, session_id)
            .await;
        Ok(())
    }

    async fn healthy(&self) -> bool {
        self.inner.healthy().await && self.coordinator.is_running()
    }
}

#[async_trait]
impl<T, S> QueryableStore<T> for ClusteredStore<T, S>
where
    T: SessionPayload + Clone + Default,
    S: SessionStore<T> + QueryableStore<T>,
{
    async fn each_session(
        &self,
        f: &mut (dyn FnMut(SessionRecord<T>) + Send),
    ) -> SessionResult<()> {
        self.inner.each_session(f).await
    }

    async fn all_session_ids(&self) -> SessionResult<Vec<String>> {
        self.inner.all_session_ids().await
    }

    async fn bulk_delete(&self, pred: SessionPredicate<'_, T>) -> SessionResult<usize> {
        // Record which ids matched so their invalidations can fan out.
        let matched: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let removed = self
            .inner
            .bulk_delete(&|rec| {
                let hit = pred(rec);
                if hit {
                    matched.lock().push(rec.session_id.clone());
                }
                hit
            })
            .await?;

        for session_id in matched.into_inner() {
            self.cache.evict(&session_id);
            self.coordinator
                .publish(InvalidationEvent::Deleted, &session_id)
                .await;
        }
        Ok(removed)
    }
}
