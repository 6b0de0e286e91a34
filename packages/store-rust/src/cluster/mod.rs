//! Clustered store decorator and cache coordinator.
//!
//! [`ClusteredStore`] fronts a shared backing store with a bounded local
//! cache; the [`Coordinator`] keeps that cache coherent across nodes by
//! running a single background subscriber on the invalidation channel.
//! Delivery is best-effort: the hard consistency bound is the local cache
//! TTL, after which any stale entry ages out on its own.

pub mod clustered;
pub mod coordinator;

pub use clustered::ClusteredStore;
pub use coordinator::{Coordinator, CoordinatorState};
