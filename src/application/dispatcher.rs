//! Outbound OCPP call dispatcher.
//!
//! Sends `Call` frames to stations and correlates the `CallResult` /
//! `CallError` coming back by unique id. One pending entry per in-flight
//! call; on timeout the entry is removed and a late answer is logged and
//! discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::application::registry::StationRegistry;
use crate::support::{CoreError, OcppFrame};

#[derive(Debug, Clone)]
pub enum CallFailure {
    NotConnected(String),
    Timeout,
    ChannelClosed,
    CallError { code: String, description: String },
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected(id) => write!(f, "station not connected: {id}"),
            Self::Timeout => write!(f, "call timed out"),
            Self::ChannelClosed => write!(f, "response channel closed"),
            Self::CallError { code, description } => {
                write!(f, "CallError {code}: {description}")
            }
        }
    }
}

impl std::error::Error for CallFailure {}

impl From<CallFailure> for CoreError {
    fn from(failure: CallFailure) -> Self {
        match failure {
            CallFailure::NotConnected(id) => CoreError::StationUnavailable(id),
            CallFailure::Timeout => CoreError::Timeout("station call".into()),
            other => CoreError::Internal(other.to_string()),
        }
    }
}

struct PendingCall {
    action: String,
    answer: oneshot::Sender<Result<Value, CallFailure>>,
}

pub struct CallDispatcher {
    registry: Arc<StationRegistry>,
    pending: DashMap<(String, String), PendingCall>,
    counter: AtomicU64,
    call_timeout: Duration,
}

impl CallDispatcher {
    pub fn new(registry: Arc<StationRegistry>, call_timeout_secs: u64) -> Self {
        Self {
            registry,
            pending: DashMap::new(),
            counter: AtomicU64::new(1),
            call_timeout: Duration::from_secs(call_timeout_secs),
        }
    }

    fn next_unique_id(&self) -> String {
        format!("cs-{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Send `action` to the station and await its answer payload.
    pub async fn call(
        &self,
        station_id: &str,
        action: &str,
        payload: Value,
    ) -> Result<Value, CallFailure> {
        let unique_id = self.next_unique_id();
        let frame = OcppFrame::Call {
            unique_id: unique_id.clone(),
            action: action.to_string(),
            payload,
        };

        let (tx, rx) = oneshot::channel();
        let key = (station_id.to_string(), unique_id.clone());
        self.pending.insert(
            key.clone(),
            PendingCall {
                action: action.to_string(),
                answer: tx,
            },
        );

        info!(station_id, action, unique_id = unique_id.as_str(), "sending call");

        if let Err(e) = self.registry.send_to(station_id, frame.to_wire()) {
            self.pending.remove(&key);
            return Err(CallFailure::NotConnected(e.to_string()));
        }

        match timeout(self.call_timeout, rx).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(_)) => {
                self.pending.remove(&key);
                Err(CallFailure::ChannelClosed)
            }
            Err(_) => {
                self.pending.remove(&key);
                warn!(
                    station_id,
                    action,
                    unique_id = unique_id.as_str(),
                    "call timed out"
                );
                Err(CallFailure::Timeout)
            }
        }
    }

    /// Deliver a CallResult to its waiter. A result with no pending entry
    /// (late, or never ours) is logged and dropped.
    pub fn resolve_result(&self, station_id: &str, unique_id: &str, payload: Value) {
        let key = (station_id.to_string(), unique_id.to_string());
        match self.pending.remove(&key) {
            Some((_, pending)) => {
                info!(
                    station_id,
                    action = pending.action.as_str(),
                    unique_id,
                    "call answered"
                );
                let _ = pending.answer.send(Ok(payload));
            }
            None => {
                warn!(station_id, unique_id, "late or unknown CallResult discarded");
            }
        }
    }

    /// Deliver a CallError to its waiter.
    pub fn resolve_error(&self, station_id: &str, unique_id: &str, code: &str, description: &str) {
        let key = (station_id.to_string(), unique_id.to_string());
        match self.pending.remove(&key) {
            Some((_, pending)) => {
                warn!(
                    station_id,
                    action = pending.action.as_str(),
                    unique_id,
                    code,
                    description,
                    "call failed"
                );
                let _ = pending.answer.send(Err(CallFailure::CallError {
                    code: code.to_string(),
                    description: description.to_string(),
                }));
            }
            None => {
                warn!(station_id, unique_id, "late or unknown CallError discarded");
            }
        }
    }

    /// Fail every pending call for a station (socket went away).
    pub fn drop_station(&self, station_id: &str) {
        self.pending.retain(|key, _| key.0 != station_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MemoryBus;
    use tokio::sync::mpsc;

    async fn setup() -> (Arc<StationRegistry>, Arc<CallDispatcher>, mpsc::UnboundedReceiver<String>) {
        let registry = Arc::new(StationRegistry::new(Arc::new(MemoryBus::new()), 300));
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("ST-1", tx).await.unwrap();
        let dispatcher = Arc::new(CallDispatcher::new(registry.clone(), 1));
        (registry, dispatcher, rx)
    }

    #[tokio::test]
    async fn call_resolves_with_matching_result() {
        let (_registry, dispatcher, mut rx) = setup().await;

        let d = dispatcher.clone();
        let call = tokio::spawn(async move {
            d.call("ST-1", "RemoteStopTransaction", serde_json::json!({"transactionId": 4}))
                .await
        });

        let wire = rx.recv().await.unwrap();
        let frame = OcppFrame::parse(&wire).unwrap();
        let unique_id = frame.unique_id().to_string();
        dispatcher.resolve_result("ST-1", &unique_id, serde_json::json!({"status": "Accepted"}));

        let answer = call.await.unwrap().unwrap();
        assert_eq!(answer["status"], "Accepted");
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn call_error_propagates() {
        let (_registry, dispatcher, mut rx) = setup().await;

        let d = dispatcher.clone();
        let call =
            tokio::spawn(async move { d.call("ST-1", "Reset", serde_json::json!({"type": "Soft"})).await });

        let wire = rx.recv().await.unwrap();
        let unique_id = OcppFrame::parse(&wire).unwrap().unique_id().to_string();
        dispatcher.resolve_error("ST-1", &unique_id, "NotSupported", "no soft reset");

        match call.await.unwrap() {
            Err(CallFailure::CallError { code, .. }) => assert_eq!(code, "NotSupported"),
            other => panic!("expected CallError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn call_times_out_and_cleans_pending() {
        let (_registry, dispatcher, _rx) = setup().await;
        let result = dispatcher
            .call("ST-1", "GetConfiguration", serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(CallFailure::Timeout)));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn late_result_is_discarded() {
        let (_registry, dispatcher, _rx) = setup().await;
        // no panic, no effect
        dispatcher.resolve_result("ST-1", "cs-999", serde_json::json!({}));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn call_to_disconnected_station_fails_fast() {
        let (_registry, dispatcher, _rx) = setup().await;
        let result = dispatcher.call("ST-404", "Reset", serde_json::json!({})).await;
        assert!(matches!(result, Err(CallFailure::NotConnected(_))));
    }
}
