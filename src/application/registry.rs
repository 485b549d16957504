//! Station registry: which connections own which station id.
//!
//! Local map first — a hit means this process owns the socket. The bus
//! mirror (`connected_stations` set plus a per-station TTL key) is what
//! other processes and the REST precondition checks consult.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::infrastructure::bus::Bus;
use crate::support::{CoreError, CoreResult};

pub const CONNECTED_SET: &str = "connected_stations";

fn presence_key(station_id: &str) -> String {
    format!("station:{station_id}:connected")
}

struct StationHandle {
    sender: mpsc::UnboundedSender<String>,
    epoch: u64,
    connected_at: DateTime<Utc>,
}

pub struct StationRegistry {
    connections: DashMap<String, StationHandle>,
    epochs: AtomicU64,
    bus: Arc<dyn Bus>,
    /// TTL on the bus presence key: 2 × heartbeat_interval.
    presence_ttl: Duration,
}

impl StationRegistry {
    pub fn new(bus: Arc<dyn Bus>, heartbeat_interval_secs: i64) -> Self {
        Self {
            connections: DashMap::new(),
            epochs: AtomicU64::new(1),
            bus,
            presence_ttl: Duration::from_secs((2 * heartbeat_interval_secs).max(1) as u64),
        }
    }

    /// Register a connection and mirror it in the bus. Returns the
    /// connection epoch; a reconnect gets a fresh epoch, so the old
    /// socket's cleanup cannot evict the new one.
    pub async fn register(
        &self,
        station_id: &str,
        sender: mpsc::UnboundedSender<String>,
    ) -> CoreResult<u64> {
        let epoch = self.epochs.fetch_add(1, Ordering::SeqCst);
        self.connections.insert(
            station_id.to_string(),
            StationHandle {
                sender,
                epoch,
                connected_at: Utc::now(),
            },
        );
        self.bus.set_add(CONNECTED_SET, station_id).await?;
        self.bus
            .put(
                &presence_key(station_id),
                epoch.to_string(),
                Some(self.presence_ttl),
            )
            .await?;
        info!(station_id, epoch, "station registered");
        Ok(epoch)
    }

    /// Remove a connection, but only if it still owns the entry.
    pub async fn unregister(&self, station_id: &str, epoch: u64) -> CoreResult<()> {
        let removed = self
            .connections
            .remove_if(station_id, |_, handle| handle.epoch == epoch)
            .is_some();
        if removed {
            self.bus.set_remove(CONNECTED_SET, station_id).await?;
            self.bus.delete(&presence_key(station_id)).await?;
            info!(station_id, epoch, "station unregistered");
        }
        Ok(())
    }

    /// Refresh the bus presence TTL (called on heartbeat and other
    /// inbound traffic).
    pub async fn refresh_presence(&self, station_id: &str) -> CoreResult<()> {
        if let Some(handle) = self.connections.get(station_id) {
            self.bus
                .put(
                    &presence_key(station_id),
                    handle.epoch.to_string(),
                    Some(self.presence_ttl),
                )
                .await?;
        }
        Ok(())
    }

    /// Queue a raw frame onto the station's writer. Fails when this
    /// process does not own the socket.
    pub fn send_to(&self, station_id: &str, frame: String) -> CoreResult<()> {
        let Some(handle) = self.connections.get(station_id) else {
            return Err(CoreError::StationUnavailable(station_id.to_string()));
        };
        handle.sender.send(frame).map_err(|_| {
            warn!(station_id, "writer channel closed");
            CoreError::StationUnavailable(station_id.to_string())
        })
    }

    /// Socket owned by this process?
    pub fn is_connected_local(&self, station_id: &str) -> bool {
        self.connections.contains_key(station_id)
    }

    /// Socket registered anywhere in the fleet? Local first, then the
    /// bus mirror.
    pub async fn is_registered(&self, station_id: &str) -> CoreResult<bool> {
        if self.is_connected_local(station_id) {
            return Ok(true);
        }
        Ok(self.bus.get(&presence_key(station_id)).await?.is_some())
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connected_since(&self, station_id: &str) -> Option<DateTime<Utc>> {
        self.connections.get(station_id).map(|h| h.connected_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MemoryBus;

    fn registry() -> StationRegistry {
        StationRegistry::new(Arc::new(MemoryBus::new()), 300)
    }

    #[tokio::test]
    async fn register_mirrors_into_bus() {
        let reg = registry();
        let (tx, _rx) = mpsc::unbounded_channel();
        reg.register("ST-1", tx).await.unwrap();

        assert!(reg.is_connected_local("ST-1"));
        assert!(reg.is_registered("ST-1").await.unwrap());
        assert!(!reg.is_registered("ST-2").await.unwrap());
    }

    #[tokio::test]
    async fn stale_epoch_cannot_unregister_new_connection() {
        let reg = registry();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let old_epoch = reg.register("ST-1", tx1).await.unwrap();

        let (tx2, _rx2) = mpsc::unbounded_channel();
        let new_epoch = reg.register("ST-1", tx2).await.unwrap();
        assert!(new_epoch > old_epoch);

        // old connection's teardown fires after the reconnect
        reg.unregister("ST-1", old_epoch).await.unwrap();
        assert!(reg.is_connected_local("ST-1"));

        reg.unregister("ST-1", new_epoch).await.unwrap();
        assert!(!reg.is_connected_local("ST-1"));
    }

    #[tokio::test]
    async fn send_to_unknown_station_fails() {
        let reg = registry();
        let err = reg.send_to("ST-404", "[2,\"1\",\"Reset\",{}]".into());
        assert!(matches!(err, Err(CoreError::StationUnavailable(_))));
    }

    #[tokio::test]
    async fn send_to_delivers_to_writer() {
        let reg = registry();
        let (tx, mut rx) = mpsc::unbounded_channel();
        reg.register("ST-1", tx).await.unwrap();
        reg.send_to("ST-1", "frame".into()).unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("frame"));
    }
}
