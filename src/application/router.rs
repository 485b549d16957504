//! Command router: REST-to-station command delivery over the bus.
//!
//! Publishers address `commands:{station_id}`; the station's session
//! task subscribes on connect. Delivery is at-least-once, so every
//! envelope carries a per-station monotonically increasing nonce and the
//! consumer deduplicates against a sliding window.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::infrastructure::bus::{Bus, BusSubscription};
use crate::support::CoreResult;

pub fn command_topic(station_id: &str) -> String {
    format!("commands:{station_id}")
}

/// Commands the control plane can address to a station.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StationCommand {
    RemoteStart {
        id_tag: String,
        connector_id: i32,
    },
    RemoteStop {
        ocpp_tx_id: i32,
    },
    Reset {
        hard: bool,
    },
    ChangeConfiguration {
        key: String,
        value: String,
    },
    GetConfiguration {
        keys: Vec<String>,
    },
    TriggerMessage {
        requested: String,
    },
    ReserveNow {
        connector_id: i32,
        id_tag: String,
        reservation_id: i32,
        expiry_date: chrono::DateTime<chrono::Utc>,
    },
    CancelReservation {
        reservation_id: i32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub nonce: u64,
    pub station_id: String,
    pub command: StationCommand,
}

/// Outcome of a publish, as seen by the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Reached at least one subscriber.
    Delivered,
    /// Nobody subscribed — the station is not consuming commands and the
    /// caller must compensate.
    NoSubscriber,
}

pub struct CommandRouter {
    bus: Arc<dyn Bus>,
    nonces: DashMap<String, u64>,
}

impl CommandRouter {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            nonces: DashMap::new(),
        }
    }

    fn next_nonce(&self, station_id: &str) -> u64 {
        let mut entry = self.nonces.entry(station_id.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub async fn publish(
        &self,
        station_id: &str,
        command: StationCommand,
    ) -> CoreResult<Delivery> {
        let envelope = CommandEnvelope {
            nonce: self.next_nonce(station_id),
            station_id: station_id.to_string(),
            command,
        };
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| crate::support::CoreError::Internal(e.to_string()))?;

        let reached = self.bus.publish(&command_topic(station_id), payload).await?;
        if reached == 0 {
            warn!(station_id, nonce = envelope.nonce, "command undelivered");
            return Ok(Delivery::NoSubscriber);
        }
        Ok(Delivery::Delivered)
    }

    pub fn subscribe(&self, station_id: &str) -> CommandStream {
        CommandStream {
            inner: self.bus.subscribe(&command_topic(station_id)),
        }
    }
}

/// Stream of command envelopes for one station. Malformed payloads are
/// logged and skipped.
pub struct CommandStream {
    inner: BusSubscription,
}

impl CommandStream {
    pub async fn recv(&mut self) -> Option<CommandEnvelope> {
        loop {
            let payload = self.inner.recv().await?;
            match serde_json::from_str::<CommandEnvelope>(&payload) {
                Ok(envelope) => return Some(envelope),
                Err(e) => {
                    warn!(error = %e, "dropping malformed command envelope");
                    continue;
                }
            }
        }
    }
}

/// Sliding dedup window over command nonces (most recent `capacity`).
pub struct NonceWindow {
    capacity: usize,
    order: VecDeque<u64>,
    seen: HashSet<u64>,
}

impl NonceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record a nonce; `false` means it was already seen (duplicate
    /// delivery, skip the command).
    pub fn record(&mut self, nonce: u64) -> bool {
        if self.seen.contains(&nonce) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(nonce);
        self.seen.insert(nonce);
        true
    }
}

impl Default for NonceWindow {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MemoryBus;

    #[tokio::test]
    async fn publish_without_subscriber_reports_undelivered() {
        let router = CommandRouter::new(Arc::new(MemoryBus::new()));
        let delivery = router
            .publish("ST-1", StationCommand::RemoteStop { ocpp_tx_id: 3 })
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::NoSubscriber);
    }

    #[tokio::test]
    async fn subscriber_receives_envelopes_with_increasing_nonces() {
        let router = CommandRouter::new(Arc::new(MemoryBus::new()));
        let mut stream = router.subscribe("ST-1");

        router
            .publish(
                "ST-1",
                StationCommand::RemoteStart {
                    id_tag: "VL-1".into(),
                    connector_id: 1,
                },
            )
            .await
            .unwrap();
        router
            .publish("ST-1", StationCommand::RemoteStop { ocpp_tx_id: 9 })
            .await
            .unwrap();

        let first = stream.recv().await.unwrap();
        let second = stream.recv().await.unwrap();
        assert_eq!(first.nonce, 1);
        assert_eq!(second.nonce, 2);
        assert_eq!(second.command, StationCommand::RemoteStop { ocpp_tx_id: 9 });
    }

    #[tokio::test]
    async fn nonces_are_per_station() {
        let router = CommandRouter::new(Arc::new(MemoryBus::new()));
        let mut a = router.subscribe("ST-A");
        let mut b = router.subscribe("ST-B");

        router
            .publish("ST-A", StationCommand::RemoteStop { ocpp_tx_id: 1 })
            .await
            .unwrap();
        router
            .publish("ST-B", StationCommand::RemoteStop { ocpp_tx_id: 2 })
            .await
            .unwrap();

        assert_eq!(a.recv().await.unwrap().nonce, 1);
        assert_eq!(b.recv().await.unwrap().nonce, 1);
    }

    #[test]
    fn nonce_window_rejects_duplicates_and_evicts_oldest() {
        let mut window = NonceWindow::new(3);
        assert!(window.record(1));
        assert!(window.record(2));
        assert!(window.record(3));
        assert!(!window.record(2));

        // 1 is evicted by 4
        assert!(window.record(4));
        assert!(window.record(1));
    }
}
