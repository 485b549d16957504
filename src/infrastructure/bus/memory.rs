//! In-process `Bus` implementation.
//!
//! TTLs are enforced lazily on read; topics are `tokio::sync::broadcast`
//! channels created on first use.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{Bus, BusSubscription};
use crate::support::CoreResult;

const TOPIC_CAPACITY: usize = 256;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

struct Lease {
    owner: String,
    expires_at: Instant,
}

pub struct MemoryBus {
    entries: DashMap<String, Entry>,
    sets: DashMap<String, HashSet<String>>,
    topics: DashMap<String, broadcast::Sender<String>>,
    leases: DashMap<String, Lease>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            sets: DashMap::new(),
            topics: DashMap::new(),
            leases: DashMap::new(),
        }
    }

    fn topic_sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> CoreResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // drop expired entries on touch
        self.entries.remove_if(key, |_, e| e.is_expired());
        Ok(None)
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn set_add(&self, set: &str, member: &str) -> CoreResult<()> {
        self.sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> CoreResult<()> {
        if let Some(mut members) = self.sets.get_mut(set) {
            members.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, set: &str) -> CoreResult<Vec<String>> {
        Ok(self
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, topic: &str, payload: String) -> CoreResult<usize> {
        match self.topics.get(topic) {
            Some(sender) => Ok(sender.send(payload).unwrap_or(0)),
            None => Ok(0),
        }
    }

    fn subscribe(&self, topic: &str) -> BusSubscription {
        BusSubscription::new(topic, self.topic_sender(topic).subscribe())
    }

    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> CoreResult<bool> {
        let now = Instant::now();
        let mut acquired = false;
        self.leases
            .entry(key.to_string())
            .and_modify(|lease| {
                if lease.owner == owner || now >= lease.expires_at {
                    lease.owner = owner.to_string();
                    lease.expires_at = now + ttl;
                    acquired = true;
                }
            })
            .or_insert_with(|| {
                acquired = true;
                Lease {
                    owner: owner.to_string(),
                    expires_at: now + ttl,
                }
            });
        Ok(acquired)
    }

    async fn release_lease(&self, key: &str, owner: &str) -> CoreResult<()> {
        self.leases.remove_if(key, |_, lease| lease.owner == owner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ttl_expires_entries() {
        let bus = MemoryBus::new();
        bus.put("k", "v".into(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(bus.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(bus.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_without_ttl_persist() {
        let bus = MemoryBus::new();
        bus.put("k", "v".into(), None).await.unwrap();
        assert_eq!(bus.get("k").await.unwrap().as_deref(), Some("v"));
        bus.delete("k").await.unwrap();
        assert_eq!(bus.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn publish_counts_subscribers() {
        let bus = MemoryBus::new();
        assert_eq!(bus.publish("t", "lost".into()).await.unwrap(), 0);

        let mut sub = bus.subscribe("t");
        assert_eq!(bus.publish("t", "hello".into()).await.unwrap(), 1);
        assert_eq!(sub.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn sets_track_membership() {
        let bus = MemoryBus::new();
        bus.set_add("stations", "ST-1").await.unwrap();
        bus.set_add("stations", "ST-2").await.unwrap();
        bus.set_add("stations", "ST-1").await.unwrap();
        let mut members = bus.set_members("stations").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["ST-1", "ST-2"]);
        bus.set_remove("stations", "ST-1").await.unwrap();
        assert_eq!(bus.set_members("stations").await.unwrap(), vec!["ST-2"]);
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_expiry() {
        let bus = MemoryBus::new();
        let ttl = Duration::from_millis(50);
        assert!(bus.acquire_lease("leader", "a", ttl).await.unwrap());
        assert!(!bus.acquire_lease("leader", "b", ttl).await.unwrap());
        // holder renews
        assert!(bus.acquire_lease("leader", "a", ttl).await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
        // expired: contender may take over
        assert!(bus.acquire_lease("leader", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn release_only_by_owner() {
        let bus = MemoryBus::new();
        let ttl = Duration::from_secs(5);
        assert!(bus.acquire_lease("leader", "a", ttl).await.unwrap());
        bus.release_lease("leader", "b").await.unwrap();
        assert!(!bus.acquire_lease("leader", "b", ttl).await.unwrap());
        bus.release_lease("leader", "a").await.unwrap();
        assert!(bus.acquire_lease("leader", "b", ttl).await.unwrap());
    }
}
