//! Resilience primitives interposed on remote I/O.
//!
//! [`RetryPolicy`] re-attempts transient storage faults with exponential
//! backoff; [`CircuitBreaker`] short-circuits calls to a degraded endpoint.
//! The breaker wraps the retry wrapper, so one logical store operation
//! (including all its retries) counts as a single breaker outcome.

pub mod breaker;
pub mod retry;

pub use breaker::CircuitBreaker;
pub use retry::RetryPolicy;
