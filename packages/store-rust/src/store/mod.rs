//! Store contract.
//!
//! Every store implements [`SessionStore`] over a payload type; stores that
//! own a searchable collection additionally implement [`QueryableStore`].
//! Implementations validate ids on every entry point and re-check expiry on
//! every read regardless of what the backing storage returned.

use async_trait::async_trait;

use seshat_core::{SessionPayload, SessionRecord, SessionResult};

pub mod memory;
pub mod remote;

pub use memory::MemoryStore;
pub use remote::RemoteStore;

/// Uniform contract for creating, loading, persisting, and invalidating
/// session records.
///
/// `T: Default` supplies the empty payload for [`create`](Self::create);
/// `T: Clone` lets implementations hand out owned records while retaining
/// the canonical copy.
#[async_trait]
pub trait SessionStore<T>: Send + Sync
where
    T: SessionPayload + Clone + Default,
{
    /// Creates and persists a fresh record (new id, default payload, expiry
    /// at `now + timeout`).
    async fn create(&self) -> SessionResult<SessionRecord<T>>;

    /// Loads the record for `id`.
    ///
    /// # Errors
    ///
    /// `NotFound` when no record exists, `Expired` when one exists past its
    /// expiry, `Corruption` when the stored bytes cannot be decoded,
    /// `Storage`/`CircuitOpen` on remote faults.
    async fn get(&self, id: &str) -> SessionResult<SessionRecord<T>>;

    /// Loads the record for `id`, mapping absent/expired/corrupt records to
    /// `None`. Only `Storage`-class faults surface as errors.
    async fn get_opt(&self, id: &str) -> SessionResult<Option<SessionRecord<T>>>;

    /// Persists `record` under `id`, overwriting any previous record.
    ///
    /// # Errors
    ///
    /// `Validation` when `record.session_id` differs from `id` or the record
    /// violates header invariants; `Storage` on remote faults.
    async fn put(&self, id: &str, record: &SessionRecord<T>) -> SessionResult<()>;

    /// Removes the record for `id`. Returns whether it existed.
    async fn delete(&self, id: &str) -> SessionResult<bool>;

    /// Whether a record exists for `id` (expiry not decoded).
    async fn exists(&self, id: &str) -> SessionResult<bool>;

    /// Atomically replaces the record's id with a fresh one, preserving the
    /// payload. Returns the new id.
    ///
    /// # Errors
    ///
    /// `NotFound` when no live record exists for `id`.
    async fn regenerate(&self, id: &str) -> SessionResult<String>;

    /// Resets the record's expiry window to `now + timeout`.
    ///
    /// # Errors
    ///
    /// `NotFound` when no live record exists for `id`.
    async fn touch(&self, id: &str) -> SessionResult<()>;

    /// Probes the backing storage. Never errors; a failed probe is `false`.
    async fn healthy(&self) -> bool;
}

/// Predicate over session records, shared by the query operations.
pub type SessionPredicate<'a, T> = &'a (dyn Fn(&SessionRecord<T>) -> bool + Sync);

/// Query interface for stores that own a searchable collection.
///
/// Iteration never blocks the backing store: the in-memory store snapshots
/// keys under its lock and yields outside it, the remote store pages through
/// a non-blocking scan.
#[async_trait]
pub trait QueryableStore<T>: Send + Sync
where
    T: SessionPayload + Clone + Default,
{
    /// Streams every valid (non-expired) record to `f`.
    async fn each_session(
        &self,
        f: &mut (dyn FnMut(SessionRecord<T>) + Send),
    ) -> SessionResult<()>;

    /// All ids currently present, including expired-but-unpruned ones.
    async fn all_session_ids(&self) -> SessionResult<Vec<String>>;

    /// Deletes every valid record matching `pred`, returning the count.
    /// Clustered stores also publish an invalidation per deleted id.
    async fn bulk_delete(&self, pred: SessionPredicate<'_, T>) -> SessionResult<usize>;

    /// All valid records matching `pred`.
    async fn find_by(&self, pred: SessionPredicate<'_, T>) -> SessionResult<Vec<SessionRecord<T>>> {
        let mut out = Vec::new();
        self.each_session(&mut |rec| {
            if pred(&rec) {
                out.push(rec);
            }
        })
        .await?;
        Ok(out)
    }

    /// First valid record matching `pred`, if any.
    async fn find_first(
        &self,
        pred: SessionPredicate<'_, T>,
    ) -> SessionResult<Option<SessionRecord<T>>> {
        let mut out = None;
        self.each_session(&mut |rec| {
            if out.is_none() && pred(&rec) {
                out = Some(rec);
            }
        })
        .await?;
        Ok(out)
    }

    /// Number of valid records matching `pred`.
    async fn count_by(&self, pred: SessionPredicate<'_, T>) -> SessionResult<usize> {
        let mut count = 0;
        self.each_session(&mut |rec| {
            if pred(&rec) {
                count += 1;
            }
        })
        .await?;
        Ok(count)
    }
}
