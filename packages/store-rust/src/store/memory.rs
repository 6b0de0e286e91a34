//! In-memory session store.
//!
//! A single mutex guards the id -> record map. Iteration snapshots the key
//! set under the lock and clones records out one at a time, so user
//! callbacks never run while the lock is held. No envelope, no compression:
//! this store is for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use seshat_core::{id, ClockSource, SessionError, SessionPayload, SessionRecord, SessionResult};

use crate::config::SessionConfig;
use crate::events::CompositeSessionObserver;
use crate::metrics::{names, StoreMetrics};
use crate::store::{QueryableStore, SessionPredicate, SessionStore};

/// Mutex-guarded in-memory store.
pub struct MemoryStore<T> {
    sessions: Mutex<HashMap<String, SessionRecord<T>>>,
    config: Arc<SessionConfig>,
    clock: Arc<dyn ClockSource>,
    observers: CompositeSessionObserver<T>,
    metrics: StoreMetrics,
}

impl<T> MemoryStore<T>
where
    T: SessionPayload + Clone + Default,
{
    /// Creates an empty store.
    #[must_use]
    pub fn new(config: Arc<SessionConfig>, clock: Arc<dyn ClockSource>) -> Self {
        let metrics = StoreMetrics::new("memory", config.metrics_backend);
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
            clock,
            observers: CompositeSessionObserver::default(),
            metrics,
        }
    }

    /// Registers a lifecycle observer.
    #[must_use]
    pub fn with_observer(
        mut self,
        observer: Arc<dyn crate::events::SessionObserver<T>>,
    ) -> Self {
        self.observers.add(observer);
        self
    }

    /// Number of records, expired ones included until cleanup.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether the store holds no records at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every expired record, returning the count removed.
    pub fn cleanup_expired(&self) -> usize {
        let now_ms = self.clock.now_ms();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, rec| rec.is_valid(now_ms));
        let removed = before - sessions.len();
        let remaining = sessions.len();
        drop(sessions);

        if removed > 0 {
            debug!(removed, "expired sessions pruned");
            for _ in 0..removed {
                self.metrics.incr(names::SESSION_EXPIRED);
            }
        }
        self.metrics.set_active(remaining);
        removed
    }
}

#[async_trait]
impl<T> SessionStore<T> for MemoryStore<T>
where
    T: SessionPayload + Clone + Default,
{
    async fn create(&self) -> SessionResult<SessionRecord<T>> {
        let record = SessionRecord::new(T::default(), self.clock.now_ms(), self.config.timeout_ms);
        self.sessions
            .lock()
            .insert(record.session_id.clone(), record.clone());
        self.metrics.incr(names::SESSION_CREATED);
        self.observers.created(&record);
        Ok(record)
    }

    async fn get(&self, session_id: &str) -> SessionResult<SessionRecord<T>> {
        id::validate(session_id)?;
        let now_ms = self.clock.now_ms();
        let mut record = self
            .sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;

        if !record.is_valid(now_ms) {
            self.metrics.incr(names::SESSION_EXPIRED);
            self.observers.expired(session_id);
            return Err(SessionError::Expired {
                id: session_id.to_string(),
            });
        }

        if self.config.sliding_expiration {
            record.touch(now_ms, self.config.timeout_ms);
            self.sessions
                .lock()
                .insert(session_id.to_string(), record.clone());
        }

        self.metrics.incr(names::SESSION_LOADED);
        self.observers.loaded(&record);
        Ok(record)
    }

    async fn get_opt(&self, session_id: &str) -> SessionResult<Option<SessionRecord<T>>> {
        match self.get(session_id).await {
            Ok(record) => Ok(Some(record)),
            Err(
                SessionError::NotFound { .. }
                | SessionError::Expired { .. }
                | SessionError::Corruption { .. }
                | SessionError::Validation { .. },
            ) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn put(&self, session_id: &str, record: &SessionRecord<T>) -> SessionResult<()> {
        id::validate(session_id)?;
        record.validate()?;
        if record.session_id != session_id {
            return Err(SessionError::Validation {
                reason: format!(
                    "record id {:?} does not match key {session_id:?}",
                    record.session_id
                ),
            });
        }
        self.sessions
            .lock()
            .insert(session_id.to_string(), record.clone());
        self.observers.saved(record);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> SessionResult<bool> {
        id::validate(session_id)?;
        let existed = self.sessions.lock().remove(session_id).is_some();
        if existed {
            self.metrics.incr(names::SESSION_DELETED);
            self.observers.deleted(session_id);
        }
        Ok(existed)
    }

    async fn exists(&self, session_id: &str) -> SessionResult<bool> {
        id::validate(session_id)?;
        Ok(self.sessions.lock().contains_key(session_id))
    }

    async fn regenerate(&self, session_id: &str) -> SessionResult<String> {
        id::validate(session_id)?;
        let now_ms = self.clock.now_ms();
        let mut sessions = self.sessions.lock();
        let mut record = sessions
            .remove(session_id)
            .filter(|rec| rec.is_valid(now_ms))
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;
        let old_id = record.regenerate_id();
        let new_id = record.session_id.clone();
        sessions.insert(new_id.clone(), record.clone());
        drop(sessions);

        self.metrics.incr(names::SESSION_REGENERATED);
        self.observers.regenerated(&old_id, &record);
        Ok(new_id)
    }

    async fn touch(&self, session_id: &str) -> SessionResult<()> {
        id::validate(session_id)?;
        let now_ms = self.clock.now_ms();
        let mut sessions = self.sessions.lock();
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;
        record.touch(now_ms, self.config.timeout_ms);
        Ok(())
    }

    async fn healthy(&self) -> bool {
        true
    }
}

#[async_trait]
impl<T> QueryableStore<T> for MemoryStore<T>
where
    T: SessionPayload + Clone + Default,
{
    async fn each_session(
        &self,
        f: &mut (dyn FnMut(SessionRecord<T>) + Send),
    ) -> SessionResult<()> {
        let now_ms = self.clock.now_ms();
        // Snapshot keys under the lock, yield values outside it.
        let keys: Vec<String> = self.sessions.lock().keys().cloned().collect();
        for key in keys {
            let record = self.sessions.lock().get(&key).cloned();
            if let Some(record) = record {
                if record.is_valid(now_ms) {
                    f(record);
                }
            }
        }
        Ok(())
    }

    async fn all_session_ids(&self) -> SessionResult<Vec<String>> {
        Ok(self.sessions.lock().keys().cloned().collect())
    }

    async fn bulk_delete(&self, pred: SessionPredicate<'_, T>) -> SessionResult<usize> {
        let mut matching = Vec::new();
        self.each_session(&mut |rec| {
            if pred(&rec) {
                matching.push(rec.session_id);
            }
        })
        .await?;

        let mut removed = 0;
        for session_id in matching {
            if self.delete(&session_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use seshat_core::ManualClock;
    use serde::{Deserialize, Serialize};

    use crate::config::Preset;

    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Payload {
        uid: Option<u64>,
    }

    impl SessionPayload for Payload {
        fn is_authenticated(&self) -> bool {
            self.uid.is_some()
        }
    }

    fn store() -> (MemoryStore<Payload>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = SessionConfig::default()
            .with_preset(Preset::Testing)
            .validated()
            .unwrap();
        (
            MemoryStore::new(config, Arc::clone(&clock) as _),
            clock,
        )
    }

    #[tokio::test]
    async fn create_then_get_round_trip() {
        let (store, _clock) = store();
        let created = store.create().await.unwrap();

        let loaded = store.get(&created.session_id).await.unwrap();
        assert_eq!(loaded, created);
        assert!(loaded.is_valid(1_000_000));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (store, _clock) = store();
        let err = store.get("missing-session-id").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn get_after_expiry_is_expired() {
        let (store, clock) = store();
        let created = store.create().await.unwrap();

        clock.advance(2 * 60 * 60 * 1000);
        let err = store.get(&created.session_id).await.unwrap_err();
        assert_eq!(err.kind(), "expired");

        // get_opt maps it to None.
        assert!(store.get_opt(&created.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_rejects_mismatched_id() {
        let (store, _clock) = store();
        let record = store.create().await.unwrap();
        let other = store.create().await.unwrap();

        let err = store.put(&other.session_id, &record).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn put_rejects_malformed_id() {
        let (store, _clock) = store();
        let record = store.create().await.unwrap();
        let err = store.put("short", &record).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn put_overwrites_payload() {
        let (store, _clock) = store();
        let mut record = store.create().await.unwrap();
        record.data.uid = Some(42);
        store.put(&record.session_id.clone(), &record).await.unwrap();

        let loaded = store.get(&record.session_id).await.unwrap();
        assert_eq!(loaded.data.uid, Some(42));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let (store, _clock) = store();
        let record = store.create().await.unwrap();

        assert!(store.delete(&record.session_id).await.unwrap());
        assert!(!store.delete(&record.session_id).await.unwrap());
        assert!(store.get_opt(&record.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn regenerate_moves_payload_to_new_id() {
        let (store, _clock) = store();
        let mut record = store.create().await.unwrap();
        record.data.uid = Some(7);
        store.put(&record.session_id.clone(), &record).await.unwrap();

        let old_id = record.session_id.clone();
        let new_id = store.regenerate(&old_id).await.unwrap();
        assert_ne!(new_id, old_id);

        assert_eq!(store.get(&old_id).await.unwrap_err().kind(), "not_found");
        assert_eq!(store.get(&new_id).await.unwrap().data.uid, Some(7));
    }

    #[tokio::test]
    async fn regenerate_missing_is_not_found() {
        let (store, _clock) = store();
        let err = store.regenerate("missing-session-id").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn touch_extends_expiry() {
        let (store, clock) = store();
        let record = store.create().await.unwrap();

        clock.advance(50_000);
        store.touch(&record.session_id).await.unwrap();
        clock.advance(30_000);

        // 80s after creation with a 60s timeout, but touched at 50s.
        assert!(store.get(&record.session_id).await.is_ok());
    }

    #[tokio::test]
    async fn sliding_expiration_touches_on_load() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = SessionConfig {
            sliding_expiration: true,
            ..SessionConfig::default().with_preset(Preset::Testing)
        }
        .validated()
        .unwrap();
        let store: MemoryStore<Payload> = MemoryStore::new(config, Arc::clone(&clock) as _);

        let record = store.create().await.unwrap();
        clock.advance(50_000);
        let _ = store.get(&record.session_id).await.unwrap();
        clock.advance(50_000);

        // Without sliding this would be expired (timeout 60s).
        assert!(store.get(&record.session_id).await.is_ok());
    }

    #[tokio::test]
    async fn cleanup_expired_counts_removals() {
        let (store, clock) = store();
        let keep = store.create().await.unwrap();
        clock.advance(30_000);
        let _fresh = store.create().await.unwrap();
        clock.advance(31_000);

        // keep is now expired (60s timeout), fresh is not.
        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get_opt(&keep.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn each_session_skips_expired() {
        let (store, clock) = store();
        let _a = store.create().await.unwrap();
        clock.advance(30_000);
        let b = store.create().await.unwrap();
        clock.advance(31_000);

        let mut seen = Vec::new();
        store
            .each_session(&mut |rec| seen.push(rec.session_id))
            .await
            .unwrap();
        assert_eq!(seen, vec![b.session_id]);
    }

    #[tokio::test]
    async fn query_defaults_work() {
        let (store, _clock) = store();
        for uid in [Some(1), Some(2), None] {
            let mut rec = store.create().await.unwrap();
            rec.data.uid = uid;
            store.put(&rec.session_id.clone(), &rec).await.unwrap();
        }

        let authed = store
            .find_by(&|rec| rec.data.is_authenticated())
            .await
            .unwrap();
        assert_eq!(authed.len(), 2);

        let count = store.count_by(&|rec| rec.data.uid == Some(2)).await.unwrap();
        assert_eq!(count, 1);

        let first = store
            .find_first(&|rec| rec.data.uid.is_none())
            .await
            .unwrap();
        assert!(first.is_some());

        let ids = store.all_session_ids().await.unwrap();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn bulk_delete_removes_matching() {
        let (store, _clock) = store();
        for uid in [Some(1), Some(2), None] {
            let mut rec = store.create().await.unwrap();
            rec.data.uid = uid;
            store.put(&rec.session_id.clone(), &rec).await.unwrap();
        }

        let removed = store
            .bulk_delete(&|rec| rec.data.is_authenticated())
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
    }
}
