//! Cache/Bus abstraction: TTL'd key-value entries, membership sets,
//! pub/sub topics, and ownable leases.
//!
//! Everything cross-process-coordinating goes through this seam — the
//! command router's topics, the station registry's mirror, idempotency
//! caches, reconciler leadership — so state never leaks past its TTL
//! across restarts.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

use crate::support::CoreResult;

#[async_trait]
pub trait Bus: Send + Sync {
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> CoreResult<()>;

    async fn get(&self, key: &str) -> CoreResult<Option<String>>;

    async fn delete(&self, key: &str) -> CoreResult<()>;

    async fn set_add(&self, set: &str, member: &str) -> CoreResult<()>;

    async fn set_remove(&self, set: &str, member: &str) -> CoreResult<()>;

    async fn set_members(&self, set: &str) -> CoreResult<Vec<String>>;

    /// Publish to a topic. Returns the number of live subscribers the
    /// payload reached; zero means nobody was listening.
    async fn publish(&self, topic: &str, payload: String) -> CoreResult<usize>;

    fn subscribe(&self, topic: &str) -> BusSubscription;

    /// Acquire or renew a lease. Returns `true` when `owner` holds the
    /// lease after the call — a holder renewing gets `true`, a contender
    /// against an unexpired lease gets `false`.
    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> CoreResult<bool>;

    /// Release a lease if (and only if) `owner` holds it.
    async fn release_lease(&self, key: &str, owner: &str) -> CoreResult<()>;
}

/// A topic subscription. Lagged receivers skip ahead rather than stall
/// the publisher.
pub struct BusSubscription {
    topic: String,
    receiver: broadcast::Receiver<String>,
}

impl BusSubscription {
    pub fn new(topic: impl Into<String>, receiver: broadcast::Receiver<String>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(topic = self.topic.as_str(), missed, "subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
