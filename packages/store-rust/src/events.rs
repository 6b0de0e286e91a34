//! Session lifecycle observers.
//!
//! Stores notify observers synchronously on the caller's task after each
//! lifecycle transition. Observer panics are caught and logged; they never
//! reach the request path.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use seshat_core::SessionRecord;

/// Observer for session lifecycle events.
///
/// All methods default to no-ops so implementations override only what they
/// track. Used as `Arc<dyn SessionObserver<T>>`.
#[allow(unused_variables)]
pub trait SessionObserver<T>: Send + Sync {
    /// Called after a new session is created.
    fn on_created(&self, record: &SessionRecord<T>) {}

    /// Called after a session is loaded.
    fn on_loaded(&self, record: &SessionRecord<T>) {}

    /// Called after a session is persisted.
    fn on_saved(&self, record: &SessionRecord<T>) {}

    /// Called after a session is deleted.
    fn on_deleted(&self, session_id: &str) {}

    /// Called after a session id is regenerated.
    fn on_regenerated(&self, old_id: &str, record: &SessionRecord<T>) {}

    /// Called when a load finds an expired session.
    fn on_expired(&self, session_id: &str) {}
}

/// Composite observer that fans out to multiple observers.
///
/// Each observer is invoked inside a panic guard; one panicking observer
/// does not stop the others and never surfaces to the caller.
pub struct CompositeSessionObserver<T> {
    observers: Vec<Arc<dyn SessionObserver<T>>>,
}

impl<T> Default for CompositeSessionObserver<T> {
    fn default() -> Self {
        Self {
            observers: Vec::new(),
        }
    }
}

impl<T> CompositeSessionObserver<T> {
    /// Creates a composite with the given observers.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn SessionObserver<T>>>) -> Self {
        Self { observers }
    }

    /// Adds an observer after construction.
    pub fn add(&mut self, observer: Arc<dyn SessionObserver<T>>) {
        self.observers.push(observer);
    }

    fn dispatch(&self, event: &'static str, f: impl Fn(&dyn SessionObserver<T>)) {
        for observer in &self.observers {
            if catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))).is_err() {
                error!(event, "session observer panicked");
            }
        }
    }

    pub fn created(&self, record: &SessionRecord<T>) {
        self.dispatch("created", |o| o.on_created(record));
    }

    pub fn loaded(&self, record: &SessionRecord<T>) {
        self.dispatch("loaded", |o| o.on_loaded(record));
    }

    pub fn saved(&self, record: &SessionRecord<T>) {
        self.dispatch("saved", |o| o.on_saved(record));
    }

    pub fn deleted(&self, session_id: &str) {
        self.dispatch("deleted", |o| o.on_deleted(session_id));
    }

    pub fn regenerated(&self, old_id: &str, record: &SessionRecord<T>) {
        self.dispatch("regenerated", |o| o.on_regenerated(old_id, record));
    }

    pub fn expired(&self, session_id: &str) {
        self.dispatch("expired", |o| o.on_expired(session_id));
    }
}
