//! Remote session store over an abstract key-value client.
//!
//! Records live under `sess:<id>` as sealed envelopes, written with a TTL
//! equal to the record's remaining lifetime so the backing store prunes
//! expired sessions on its own. Every client call goes through the
//! resilience layer (retry inside circuit breaker). Iteration pages through
//! a non-blocking scan; bulk deletes go out in batches.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::warn;

use seshat_core::{id, ClockSource, SessionError, SessionPayload, SessionRecord, SessionResult};

use crate::config::SessionConfig;
use crate::crypto::SessionCodec;
use crate::events::CompositeSessionObserver;
use crate::kv::{KeyValueClient, ScanCursor};
use crate::metrics::{names, StoreMetrics};
use crate::resilience::{CircuitBreaker, RetryPolicy};
use crate::store::{QueryableStore, SessionPredicate, SessionStore};

/// Key prefix for session records.
pub const KEY_PREFIX: &str = "sess:";

/// Scan page size. Blocking full-keyspace enumeration is forbidden.
const SCAN_PAGE: usize = 100;

/// Batch size for pipelined bulk deletes.
const DELETE_BATCH: usize = 100;

fn key_for(session_id: &str) -> String {
    format!("{KEY_PREFIX}{session_id}")
}

/// Session store backed by a remote key-value service.
pub struct RemoteStore<T> {
    kv: Arc<dyn KeyValueClient>,
    codec: SessionCodec,
    config: Arc<SessionConfig>,
    clock: Arc<dyn ClockSource>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    observers: CompositeSessionObserver<T>,
    metrics: StoreMetrics,
}

impl<T> RemoteStore<T>
where
    T: SessionPayload + Clone + Default,
{
    /// Builds a store over `kv` with the given frozen config.
    ///
    /// # Errors
    ///
    /// `Encryption` when the configured key material is unusable.
    pub fn new(
        config: Arc<SessionConfig>,
        clock: Arc<dyn ClockSource>,
        kv: Arc<dyn KeyValueClient>,
    ) -> SessionResult<Self> {
        let metrics = StoreMetrics::new("remote", config.metrics_backend);
        let codec = SessionCodec::new(&config)?;
        let retry = RetryPolicy::new(&config, metrics.clone());
        let breaker = CircuitBreaker::new(&config, Arc::clone(&clock), metrics.clone());
        Ok(Self {
            kv,
            codec,
            config,
            clock,
            retry,
            breaker,
            observers: CompositeSessionObserver::default(),
            metrics,
        })
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

    // --- Resilience-wrapped client calls -----------------------------------
    //
    // One logical store operation = one breaker call; retries happen inside.

    async fn kv_get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        self.breaker
            .call(|| {
                self.retry.run(|| {
                    let kv = Arc::clone(&self.kv);
                    let key = key.to_string();
                    async move { kv.get(&key).await }
                })
            })
            .await
    }

    async fn kv_set(&self, key: &str, value: Vec<u8>, ttl_ms: u64) -> SessionResult<()> {
        self.breaker
            .call(|| {
                self.retry.run(|| {
                    let kv = Arc::clone(&self.kv);
                    let key = key.to_string();
                    let value = value.clone();
                    async move { kv.set_with_ttl(&key, value, ttl_ms).await }
                })
            })
            .await
    }

    async fn kv_del(&self, key: &str) -> SessionResult<bool> {
        self.breaker
            .call(|| {
                self.retry.run(|| {
                    let kv = Arc::clone(&self.kv);
                    let key = key.to_string();
                    async move { kv.del(&key).await }
                })
            })
            .await
    }

    async fn kv_del_many(&self, keys: Vec<String>) -> SessionResult<usize> {
        self.breaker
            .call(|| {
                self.retry.run(|| {
                    let kv = Arc::clone(&self.kv);
                    let keys = keys.clone();
                    async move { kv.del_many(&keys).await }
                })
            })
            .await
    }

    async fn kv_scan(&self, cursor: ScanCursor) -> SessionResult<crate::kv::ScanPage> {
        self.breaker
            .call(|| {
                self.retry.run(|| {
                    let kv = Arc::clone(&self.kv);
                    let cursor = cursor.clone();
                    async move { kv.scan(KEY_PREFIX, &cursor, SCAN_PAGE).await }
                })
            })
            .await
    }

    // --- Record plumbing ---------------------------------------------------

    /// Seals and writes a record; the key TTL is the remaining lifetime.
    async fn store_record(&self, record: &SessionRecord<T>) -> SessionResult<()> {
        let now_ms = self.clock.now_ms();
        let remaining = record.remaining_ms(now_ms);
        if remaining == 0 {
            return Err(SessionError::Validation {
                reason: "record already expired".to_string(),
            });
        }
        let started = Instant::now();
        let bytes = self.codec.seal(record)?;
        self.kv_set(&key_for(&record.session_id), bytes, remaining)
            .await?;
        self.metrics.timing(names::STORE_TIME, started.elapsed());
        Ok(())
    }

    /// Fetches and opens the record for `id` without expiry filtering.
    async fn load_raw(&self, session_id: &str) -> SessionResult<Option<SessionRecord<T>>> {
        match self.kv_get(&key_for(session_id)).await? {
            Some(bytes) => Ok(Some(self.codec.open(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<T> SessionStore<T> for RemoteStore<T>
where
    T: SessionPayload + Clone + Default,
{
    async fn create(&self) -> SessionResult<SessionRecord<T>> {
        let record = SessionRecord::new(T::default(), self.clock.now_ms(), self.config.timeout_ms);
        self.store_record(&record).await?;
        self.metrics.incr(names::SESSION_CREATED);
        self.observers.created(&record);
        Ok(record)
    }

    async fn get(&self, session_id: &str) -> SessionResult<SessionRecord<T>> {
        id::validate(session_id)?;
        let started = Instant::now();
        let mut record = match self.load_raw(session_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Err(SessionError::NotFound {
                    id: session_id.to_string(),
                })
            }
            Err(err) => {
                self.metrics.error(&err);
                return Err(err);
            }
        };

        // Expiry is re-checked here regardless of what storage returned; the
        // backing TTL is a pruning mechanism, not the source of truth.
        if !record.is_valid(self.clock.now_ms()) {
            self.metrics.incr(names::SESSION_EXPIRED);
            self.observers.expired(session_id);
            return Err(SessionError::Expired {
                id: session_id.to_string(),
            });
        }

        if self.config.sliding_expiration {
            record.touch(self.clock.now_ms(), self.config.timeout_ms);
            self.store_record(&record).await?;
        }

        self.metrics.incr(names::SESSION_LOADED);
        self.metrics.timing(names::LOAD_TIME, started.elapsed());
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
        self.store_record(record).await?;
        self.observers.saved(record);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> SessionResult<bool> {
        id::validate(session_id)?;
        let existed = self.kv_del(&key_for(session_id)).await?;
        if existed {
            self.metrics.incr(names::SESSION_DELETED);
            self.observers.deleted(session_id);
        }
        Ok(existed)
    }

    async fn exists(&self, session_id: &str) -> SessionResult<bool> {
        id::validate(session_id)?;
        Ok(self.kv_get(&key_for(session_id)).await?.is_some())
    }

    async fn regenerate(&self, session_id: &str) -> SessionResult<String> {
        id::validate(session_id)?;
        let mut record = self
            .load_raw(session_id)
            .await?
            .filter(|rec| rec.is_valid(self.clock.now_ms()))
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;

        let old_id = record.regenerate_id();
        let new_id = record.session_id.clone();
        self.store_record(&record).await?;
        self.kv_del(&key_for(&old_id)).await?;

        self.metrics.incr(names::SESSION_REGENERATED);
        self.observers.regenerated(&old_id, &record);
        Ok(new_id)
    }

    async fn touch(&self, session_id: &str) -> SessionResult<()> {
        id::validate(session_id)?;
        let mut record = self
            .load_raw(session_id)
            .await?
            .filter(|rec| rec.is_valid(self.clock.now_ms()))
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;
        record.touch(self.clock.now_ms(), self.config.timeout_ms);
        self.store_record(&record).await
    }

    async fn healthy(&self) -> bool {
        self.breaker
            .call(|| {
                self.retry.run(|| {
                    let kv = Arc::clone(&self.kv);
                    async move { kv.ping().await }
                })
            })
            .await
            .is_ok()
    }
}

#[async_trait]
impl<T> QueryableStore<T> for RemoteStore<T>
where
    T: SessionPayload + Clone + Default,
{
    async fn each_session(
        &self,
        f: &mut (dyn FnMut(SessionRecord<T>) + Send),
    ) -> SessionResult<()> {
        let mut cursor = ScanCursor::start();
        let mut active = 0usize;
        while !cursor.finished {
            let page = self.kv_scan(cursor).await?;
            cursor = page.next;
            for key in page.keys {
                let Some(bytes) = self.kv_get(&key).await? else {
                    continue;
                };
                match self.codec.open::<T>(&bytes) {
                    Ok(record) => {
                        if record.is_valid(self.clock.now_ms()) {
                            active += 1;
                            f(record);
                        }
                    }
                    Err(err) => {
                        // One damaged record must not abort the sweep.
                        self.metrics.error(&err);
                        warn!(key, error = %err, "skipping undecodable session record");
                    }
                }
            }
        }
        self.metrics.set_active(active);
        Ok(())
    }

    async fn all_session_ids(&self) -> SessionResult<Vec<String>> {
        let mut cursor = ScanCursor::start();
        let mut ids = Vec::new();
        while !cursor.finished {
            let page = self.kv_scan(cursor).await?;
            cursor = page.next;
            ids.extend(
                page.keys
                    .into_iter()
                    .map(|key| key.trim_start_matches(KEY_PREFIX).to_string()),
            );
        }
        Ok(ids)
    }

    async fn bulk_delete(&self, pred: SessionPredicate<'_, T>) -> SessionResult<usize> {
        let mut matching = Vec::new();
        self.each_session(&mut |rec| {
            if pred(&rec) {
                matching.push(key_for(&rec.session_id));
            }
        })
        .await?;

        let mut removed = 0;
        for chunk in matching.chunks(DELETE_BATCH) {
            removed += self.kv_del_many(chunk.to_vec()).await?;
        }
        self.metrics.incr(names::SESSION_DELETED);
        Ok(removed)
    }
}
