//! In-memory repository implementations for development and testing.
//!
//! Mirrors the conditional-update semantics of the SeaORM repositories:
//! balance mutations and status transitions are guarded checks performed
//! under the per-key map lock, so racing callers see the same
//! first-writer-wins behavior the database gives.

use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::domain::client::Client;
use crate::domain::meter::MeterSample;
use crate::domain::session::{ChargingSession, SessionStatus};
use crate::domain::station::{BootInfo, Connector, ConnectorStatus, Station, StationStatus};
use crate::domain::tariff::{EffectivePrice, TariffRule};
use crate::domain::topup::{TopUp, TopUpStatus};
use crate::domain::{
    ClientRepository, MeterRepository, RepositoryProvider, SessionClose, SessionRepository,
    StationRepository, TariffRepository, TopUpRepository,
};
use crate::support::{CoreError, CoreResult};

pub struct InMemoryRepositories {
    clients: DashMap<String, Client>,
    stations: DashMap<String, Station>,
    connectors: DashMap<(String, i32), Connector>,
    sessions: DashMap<String, ChargingSession>,
    top_ups: DashMap<String, TopUp>,
    meter_samples: DashMap<String, Vec<MeterSample>>,
    tariff_rules: DashMap<i32, TariffRule>,
    /// Serializes open-session checks with session inserts.
    session_insert_guard: std::sync::Mutex<()>,
    tx_counter: AtomicI32,
    default_price_per_kwh: i64,
    currency: String,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::with_default_price(1500, "KGS")
    }

    pub fn with_default_price(price_per_kwh: i64, currency: &str) -> Self {
        Self {
            clients: DashMap::new(),
            stations: DashMap::new(),
            connectors: DashMap::new(),
            sessions: DashMap::new(),
            top_ups: DashMap::new(),
            meter_samples: DashMap::new(),
            tariff_rules: DashMap::new(),
            session_insert_guard: std::sync::Mutex::new(()),
            tx_counter: AtomicI32::new(1),
            default_price_per_kwh: price_per_kwh,
            currency: currency.to_string(),
        }
    }

    pub fn add_tariff_rule(&self, rule: TariffRule) {
        self.tariff_rules.insert(rule.id, rule);
    }
}

impl Default for InMemoryRepositories {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientRepository for InMemoryRepositories {
    async fn find_by_id(&self, id: &str) -> CoreResult<Option<Client>> {
        Ok(self.clients.get(id).map(|c| c.clone()))
    }

    async fn insert(&self, client: Client) -> CoreResult<()> {
        if self.clients.contains_key(&client.id) {
            return Err(CoreError::Conflict(format!(
                "client {} already exists",
                client.id
            )));
        }
        self.clients.insert(client.id.clone(), client);
        Ok(())
    }

    async fn try_reserve(&self, client_id: &str, amount: i64) -> CoreResult<bool> {
        if amount < 0 {
            return Err(CoreError::InvalidArgument(
                "reserve amount must be non-negative".into(),
            ));
        }
        match self.clients.get_mut(client_id) {
            Some(mut client) if client.balance >= amount => {
                client.balance -= amount;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn credit(&self, client_id: &str, amount: i64) -> CoreResult<()> {
        if amount < 0 {
            return Err(CoreError::InvalidArgument(
                "credit amount must be non-negative".into(),
            ));
        }
        match self.clients.get_mut(client_id) {
            Some(mut client) => {
                client.balance += amount;
                Ok(())
            }
            None => Err(CoreError::not_found("Client", "id", client_id)),
        }
    }
}

#[async_trait]
impl StationRepository for InMemoryRepositories {
    async fn find_by_id(&self, id: &str) -> CoreResult<Option<Station>> {
        Ok(self.stations.get(id).map(|s| s.clone()))
    }

    async fn record_boot(&self, station_id: &str, info: BootInfo) -> CoreResult<()> {
        let now = Utc::now();
        self.stations
            .entry(station_id.to_string())
            .and_modify(|station| {
                station.boot_info = Some(info.clone());
                station.last_heartbeat_at = Some(now);
            })
            .or_insert_with(|| Station {
                id: station_id.to_string(),
                location_id: None,
                status: StationStatus::Unknown,
                last_heartbeat_at: Some(now),
                boot_info: Some(info),
                price_per_kwh: None,
                registered_at: now,
            });
        Ok(())
    }

    async fn touch_heartbeat(&self, station_id: &str, at: DateTime<Utc>) -> CoreResult<()> {
        if let Some(mut station) = self.stations.get_mut(station_id) {
            station.last_heartbeat_at = Some(at);
        }
        Ok(())
    }

    async fn update_status(&self, station_id: &str, status: StationStatus) -> CoreResult<()> {
        if let Some(mut station) = self.stations.get_mut(station_id) {
            station.status = status;
        }
        Ok(())
    }

    async fn find_connector(
        &self,
        station_id: &str,
        connector_id: i32,
    ) -> CoreResult<Option<Connector>> {
        Ok(self
            .connectors
            .get(&(station_id.to_string(), connector_id))
            .map(|c| c.clone()))
    }

    async fn upsert_connector_status(
        &self,
        station_id: &str,
        connector_id: i32,
        status: ConnectorStatus,
    ) -> CoreResult<()> {
        let now = Utc::now();
        self.connectors
            .entry((station_id.to_string(), connector_id))
            .and_modify(|connector| {
                connector.status = status;
                connector.updated_at = now;
            })
            .or_insert_with(|| Connector {
                station_id: station_id.to_string(),
                connector_id,
                status,
                updated_at: now,
            });
        Ok(())
    }

    async fn list_connectors(&self, station_id: &str) -> CoreResult<Vec<Connector>> {
        let mut connectors: Vec<Connector> = self
            .connectors
            .iter()
            .filter(|entry| entry.key().0 == station_id)
            .map(|entry| entry.value().clone())
            .collect();
        connectors.sort_by_key(|c| c.connector_id);
        Ok(connectors)
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> CoreResult<Vec<Station>> {
        Ok(self
            .stations
            .iter()
            .filter(|entry| {
                entry.status != StationStatus::Offline
                    && entry.last_heartbeat_at.is_some_and(|hb| hb < cutoff)
            })
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[async_trait]
impl SessionRepository for InMemoryRepositories {
    async fn insert(&self, session: ChargingSession) -> CoreResult<()> {
        let _guard = self.session_insert_guard.lock().unwrap();
        if self.sessions.contains_key(&session.id) {
            return Err(CoreError::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        if session.status.is_open() {
            for existing in self.sessions.iter() {
                if !existing.status.is_open() {
                    continue;
                }
                if existing.client_id == session.client_id {
                    return Err(CoreError::ClientBusy);
                }
                if existing.station_id == session.station_id
                    && existing.connector_id == session.connector_id
                {
                    return Err(CoreError::ConnectorBusy {
                        station_id: session.station_id.clone(),
                        connector_id: session.connector_id,
                    });
                }
            }
        }
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> CoreResult<Option<ChargingSession>> {
        Ok(self.sessions.get(id).map(|s| s.clone()))
    }

    async fn find_open_for_client(&self, client_id: &str) -> CoreResult<Option<ChargingSession>> {
        Ok(self
            .sessions
            .iter()
            .find(|s| s.client_id == client_id && s.status.is_open())
            .map(|s| s.clone()))
    }

    async fn find_open_for_connector(
        &self,
        station_id: &str,
        connector_id: i32,
    ) -> CoreResult<Option<ChargingSession>> {
        Ok(self
            .sessions
            .iter()
            .find(|s| {
                s.station_id == station_id
                    && s.connector_id == connector_id
                    && s.status.is_open()
            })
            .map(|s| s.clone()))
    }

    async fn find_starting_by_id_tag(
        &self,
        id_tag: &str,
    ) -> CoreResult<Option<ChargingSession>> {
        Ok(self
            .sessions
            .iter()
            .find(|s| s.id_tag == id_tag && s.status == SessionStatus::Starting)
            .map(|s| s.clone()))
    }

    async fn find_by_tx_id(&self, ocpp_tx_id: i32) -> CoreResult<Option<ChargingSession>> {
        Ok(self
            .sessions
            .iter()
            .find(|s| s.ocpp_tx_id == Some(ocpp_tx_id))
            .map(|s| s.clone()))
    }

    async fn next_ocpp_tx_id(&self) -> CoreResult<i32> {
        Ok(self.tx_counter.fetch_add(1, Ordering::SeqCst))
    }

    async fn transition(
        &self,
        id: &str,
        from: &[SessionStatus],
        to: SessionStatus,
    ) -> CoreResult<bool> {
        match self.sessions.get_mut(id) {
            Some(mut session) if from.contains(&session.status) => {
                session.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn bind_start(
        &self,
        id: &str,
        ocpp_tx_id: i32,
        meter_start: i64,
        started_at: DateTime<Utc>,
    ) -> CoreResult<bool> {
        match self.sessions.get_mut(id) {
            Some(mut session) if session.status == SessionStatus::Starting => {
                session.status = SessionStatus::Active;
                session.ocpp_tx_id = Some(ocpp_tx_id);
                session.meter_start = Some(meter_start);
                session.started_at = Some(started_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_meter(&self, id: &str, last_meter_wh: i64) -> CoreResult<()> {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.last_meter_wh = Some(last_meter_wh);
        }
        Ok(())
    }

    async fn close(&self, id: &str, close: SessionClose) -> CoreResult<bool> {
        let client_id = {
            let Some(mut session) = self.sessions.get_mut(id) else {
                return Err(CoreError::not_found("ChargingSession", "id", id));
            };
            if !session.status.is_open() {
                return Ok(false);
            }
            session.status = close.status;
            session.meter_stop = close.meter_stop;
            session.energy_wh = Some(close.energy_wh);
            session.amount_charged = Some(close.amount_charged);
            session.refund_amount = Some(close.refund);
            session.stopped_at = Some(close.stopped_at);
            session.client_id.clone()
        };

        if close.refund > 0 {
            self.credit(&client_id, close.refund).await?;
        }
        Ok(true)
    }

    async fn find_hung_starting(
        &self,
        cutoff: DateTime<Utc>,
    ) -> CoreResult<Vec<ChargingSession>> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| {
                s.status == SessionStatus::Starting
                    && s.ocpp_tx_id.is_none()
                    && s.created_at < cutoff
            })
            .map(|s| s.clone())
            .collect())
    }

    async fn find_active_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> CoreResult<Vec<ChargingSession>> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Active && s.created_at < cutoff)
            .map(|s| s.clone())
            .collect())
    }
}

#[async_trait]
impl TopUpRepository for InMemoryRepositories {
    async fn insert(&self, topup: TopUp) -> CoreResult<()> {
        self.top_ups.insert(topup.id.clone(), topup);
        Ok(())
    }

    async fn update_provider_fields(
        &self,
        id: &str,
        provider_order_id: &str,
        qr_payload: Option<String>,
    ) -> CoreResult<()> {
        if let Some(mut topup) = self.top_ups.get_mut(id) {
            topup.provider_order_id = Some(provider_order_id.to_string());
            topup.qr_payload = qr_payload;
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> CoreResult<Option<TopUp>> {
        Ok(self.top_ups.get(id).map(|t| t.clone()))
    }

    async fn find_by_provider_order_id(&self, order_id: &str) -> CoreResult<Option<TopUp>> {
        Ok(self
            .top_ups
            .iter()
            .find(|t| t.provider_order_id.as_deref() == Some(order_id))
            .map(|t| t.clone()))
    }

    async fn find_by_idempotency_key(
        &self,
        client_id: &str,
        key: &str,
        since: DateTime<Utc>,
    ) -> CoreResult<Option<TopUp>> {
        Ok(self
            .top_ups
            .iter()
            .filter(|t| {
                t.client_id == client_id
                    && t.idempotency_key.as_deref() == Some(key)
                    && t.created_at >= since
            })
            .max_by_key(|t| t.created_at)
            .map(|t| t.clone()))
    }

    async fn approve_and_credit(
        &self,
        topup_id: &str,
        paid_amount: i64,
        paid_at: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let client_id = {
            let Some(mut topup) = self.top_ups.get_mut(topup_id) else {
                return Err(CoreError::not_found("TopUp", "id", topup_id));
            };
            if topup.status == TopUpStatus::Approved {
                return Ok(false);
            }
            topup.status = TopUpStatus::Approved;
            topup.amount_paid = Some(paid_amount);
            topup.paid_at = Some(paid_at);
            topup.client_id.clone()
        };

        self.credit(&client_id, paid_amount).await?;
        Ok(true)
    }

    async fn mark_failed(&self, topup_id: &str) -> CoreResult<bool> {
        match self.top_ups.get_mut(topup_id) {
            Some(mut topup) if topup.status == TopUpStatus::Pending => {
                topup.status = TopUpStatus::Failed;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CoreError::not_found("TopUp", "id", topup_id)),
        }
    }

    async fn expire_pending(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let mut moved = 0;
        for mut entry in self.top_ups.iter_mut() {
            if entry.status == TopUpStatus::Pending && entry.expires_at < now {
                entry.status = TopUpStatus::Expired;
                moved += 1;
            }
        }
        Ok(moved)
    }
}

#[async_trait]
impl MeterRepository for InMemoryRepositories {
    async fn append(&self, sample: MeterSample) -> CoreResult<()> {
        self.meter_samples
            .entry(sample.session_id.clone())
            .or_default()
            .push(sample);
        Ok(())
    }

    async fn last_for_session(&self, session_id: &str) -> CoreResult<Option<MeterSample>> {
        Ok(self
            .meter_samples
            .get(session_id)
            .and_then(|samples| samples.iter().max_by_key(|s| s.timestamp).cloned()))
    }
}

#[async_trait]
impl TariffRepository for InMemoryRepositories {
    async fn effective_price(
        &self,
        station_id: &str,
        at: DateTime<Utc>,
    ) -> CoreResult<EffectivePrice> {
        if let Some(station) = self.stations.get(station_id) {
            if let Some(price) = station.price_per_kwh {
                return Ok(EffectivePrice {
                    price_per_kwh: price,
                    currency: self.currency.clone(),
                });
            }
        }

        let best = self
            .tariff_rules
            .iter()
            .filter(|rule| {
                rule.applies_at(at)
                    && rule
                        .station_id
                        .as_deref()
                        .map_or(true, |sid| sid == station_id)
            })
            .max_by_key(|rule| (rule.priority, rule.station_id.is_some()))
            .map(|rule| rule.price_per_kwh);

        Ok(EffectivePrice {
            price_per_kwh: best.unwrap_or(self.default_price_per_kwh),
            currency: self.currency.clone(),
        })
    }
}

impl RepositoryProvider for InMemoryRepositories {
    fn clients(&self) -> &dyn ClientRepository {
        self
    }

    fn stations(&self) -> &dyn StationRepository {
        self
    }

    fn sessions(&self) -> &dyn SessionRepository {
        self
    }

    fn top_ups(&self) -> &dyn TopUpRepository {
        self
    }

    fn meters(&self) -> &dyn MeterRepository {
        self
    }

    fn tariffs(&self) -> &dyn TariffRepository {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_is_conditional_on_balance() {
        let repos = InMemoryRepositories::new();
        ClientRepository::insert(&repos, Client::new("c1", 100, "KGS"))
            .await
            .unwrap();

        assert!(ClientRepository::try_reserve(&repos, "c1", 60).await.unwrap());
        assert!(!ClientRepository::try_reserve(&repos, "c1", 60).await.unwrap());
        let client = ClientRepository::find_by_id(&repos, "c1").await.unwrap().unwrap();
        assert_eq!(client.balance, 40);
    }

    #[tokio::test]
    async fn approve_and_credit_is_idempotent() {
        let repos = InMemoryRepositories::new();
        ClientRepository::insert(&repos, Client::new("c1", 0, "KGS")).await.unwrap();
        let topup = TopUp::new("c1", 500, Utc::now(), None);
        let id = topup.id.clone();
        TopUpRepository::insert(&repos, topup).await.unwrap();

        assert!(repos.approve_and_credit(&id, 500, Utc::now()).await.unwrap());
        assert!(!repos.approve_and_credit(&id, 500, Utc::now()).await.unwrap());
        let client = ClientRepository::find_by_id(&repos, "c1").await.unwrap().unwrap();
        assert_eq!(client.balance, 500);
    }

    #[tokio::test]
    async fn close_applies_once() {
        let repos = InMemoryRepositories::new();
        ClientRepository::insert(&repos, Client::new("c1", 0, "KGS")).await.unwrap();
        let mut session = ChargingSession::reserve(
            "c1",
            "ST-1",
            1,
            crate::domain::LimitKind::Energy,
            10_000,
            1500,
            "KGS",
            15_000,
        );
        session.status = SessionStatus::Active;
        let id = session.id.clone();
        SessionRepository::insert(&repos, session).await.unwrap();

        let close = SessionClose {
            status: SessionStatus::Stopped,
            meter_stop: Some(6_000),
            energy_wh: 5_000,
            amount_charged: 7_500,
            refund: 7_500,
            stopped_at: Utc::now(),
        };
        assert!(repos.close(&id, close.clone()).await.unwrap());
        assert!(!repos.close(&id, close).await.unwrap());
        let client = ClientRepository::find_by_id(&repos, "c1").await.unwrap().unwrap();
        assert_eq!(client.balance, 7_500);
    }

    #[tokio::test]
    async fn effective_price_prefers_station_rule() {
        let repos = InMemoryRepositories::new();
        repos.add_tariff_rule(TariffRule {
            id: 1,
            station_id: None,
            price_per_kwh: 1200,
            priority: 0,
            active: true,
            valid_from: None,
            valid_until: None,
        });
        repos.add_tariff_rule(TariffRule {
            id: 2,
            station_id: Some("ST-1".into()),
            price_per_kwh: 2000,
            priority: 0,
            active: true,
            valid_from: None,
            valid_until: None,
        });

        let price = repos.effective_price("ST-1", Utc::now()).await.unwrap();
        assert_eq!(price.price_per_kwh, 2000);
        let price = repos.effective_price("ST-2", Utc::now()).await.unwrap();
        assert_eq!(price.price_per_kwh, 1200);
    }
}
