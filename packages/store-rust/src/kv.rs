//! Key-value and pub/sub client abstractions.
//!
//! The remote store is written against these traits; production deployments
//! implement them over their key-value service of choice, tests and
//! single-process setups use the in-memory implementations shipped here.
//! Scan is cursor-paged: blocking full-keyspace enumeration is deliberately
//! not part of the contract.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use seshat_core::{ClockSource, SessionResult};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Opaque cursor for resumable key scans.
#[derive(Debug, Clone)]
pub struct ScanCursor {
    /// Implementation-defined resume token.
    pub token: u64,
    /// Whether the scan has completed.
    pub finished: bool,
}

impl ScanCursor {
    /// Cursor positioned at the beginning of the keyspace.
    #[must_use]
    pub fn start() -> Self {
        Self {
            token: 0,
            finished: false,
        }
    }
}

/// One page of scanned keys plus the cursor for the next call.
#[derive(Debug)]
pub struct ScanPage {
    /// Keys in this page.
    pub keys: Vec<String>,
    /// Cursor to resume from.
    pub next: ScanCursor,
}

/// Abstract key-value client with TTL-bearing writes and paged scans.
#[async_trait]
pub trait KeyValueClient: Send + Sync {
    /// Writes `value` under `key`, expiring after `ttl_ms`.
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl_ms: u64) -> SessionResult<()>;

    /// Reads the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>>;

    /// Deletes `key`. Returns whether it existed.
    async fn del(&self, key: &str) -> SessionResult<bool>;

    /// Deletes a batch of keys in one round-trip. Returns how many existed.
    async fn del_many(&self, keys: &[String]) -> SessionResult<usize>;

    /// Returns up to `count` keys with the given prefix, resuming from
    /// `cursor`. Non-blocking on the server side.
    async fn scan(&self, prefix: &str, cursor: &ScanCursor, count: usize)
        -> SessionResult<ScanPage>;

    /// Round-trip liveness probe.
    async fn ping(&self) -> SessionResult<()>;
}

/// Abstract publish side of a fan-out channel.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Publishes `payload` on `channel`. Best-effort: delivery to any given
    /// subscriber is not guaranteed.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> SessionResult<()>;

    /// Opens a subscription to `channel`.
    async fn subscribe(&self, channel: &str) -> SessionResult<Box<dyn Subscription>>;
}

/// A live subscription stream.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next message. `Ok(None)` means the stream closed and
    /// the caller should re-subscribe.
    async fn next_message(&mut self) -> SessionResult<Option<Vec<u8>>>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

struct StoredValue {
    bytes: Vec<u8>,
    expires_at_ms: u64,
}

/// In-memory [`KeyValueClient`] with lazy TTL expiry.
///
/// Backed by a concurrent map; suitable for tests and single-process
/// deployments. Multiple stores sharing one instance see each other's
/// writes, which is what the two-node tests rely on.
pub struct InMemoryKv {
    entries: DashMap<String, StoredValue>,
    clock: Arc<dyn ClockSource>,
}

impl InMemoryKv {
    /// Creates an empty map reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    fn is_live(&self, value: &StoredValue) -> bool {
        self.clock.now_ms() < value.expires_at_ms
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| self.is_live(entry.value()))
            .count()
    }

    /// Whether the map holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueClient for InMemoryKv {
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl_ms: u64) -> SessionResult<()> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at_ms: self.clock.now_ms().saturating_add(ttl_ms),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        match self.entries.get(key) {
            Some(entry) if self.is_live(entry.value()) => Ok(Some(entry.bytes.clone())),
            Some(_) => {
                drop(self.entries.remove(key));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> SessionResult<bool> {
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, v)| self.is_live(&v)))
    }

    async fn del_many(&self, keys: &[String]) -> SessionResult<usize> {
        let mut removed = 0;
        for key in keys {
            if self.del(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan(
        &self,
        prefix: &str,
        cursor: &ScanCursor,
        count: usize,
    ) -> SessionResult<ScanPage> {
        // Snapshot + sort gives a stable iteration order across pages while
        // the map keeps mutating underneath.
        let mut all: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && self.is_live(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        all.sort_unstable();

        #[allow(clippy::cast_possible_truncation)]
        let offset = cursor.token as usize;
        let keys: Vec<String> = all.iter().skip(offset).take(count).cloned().collect();
        let next_offset = offset + keys.len();
        Ok(ScanPage {
            keys,
            next: ScanCursor {
                token: next_offset as u64,
                finished: next_offset >= all.len(),
            },
        })
    }

    async fn ping(&self) -> SessionResult<()> {
        Ok(())
    }
}

/// In-memory [`PubSubClient`] over tokio broadcast channels.
///
/// Every subscriber on a channel receives every message published after it
/// subscribed; slow subscribers that overflow the buffer lose messages,
/// matching the best-effort delivery contract.
pub struct InMemoryPubSub {
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
    buffer: usize,
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl InMemoryPubSub {
    /// Creates a bus with the given per-channel buffer size.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: DashMap::new(),
            buffer,
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .clone()
    }
}

#[async_trait]
impl PubSubClient for InMemoryPubSub {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> SessionResult<()> {
        // A send error just means nobody is subscribed right now.
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> SessionResult<Box<dyn Subscription>> {
        Ok(Box::new(BroadcastSubscription {
            rx: self.sender(channel).subscribe(),
        }))
    }
}

struct BroadcastSubscription {
    rx: broadcast::Receiver<Vec<u8>>,
}

#[async_trait]
impl Subscription for BroadcastSubscription {
    async fn next_message(&mut self) -> SessionResult<Option<Vec<u8>>> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Ok(Some(payload)),
                // Dropped messages are acceptable; keep the stream alive.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscription lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
