//! Repository traits — the narrow data-access interface of the control
//! plane. Two implementations exist: SeaORM (production) and in-memory
//! (tests, dev tooling).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::client::Client;
use crate::domain::meter::MeterSample;
use crate::domain::session::{ChargingSession, SessionStatus};
use crate::domain::station::{BootInfo, Connector, ConnectorStatus, Station, StationStatus};
use crate::domain::tariff::EffectivePrice;
use crate::domain::topup::TopUp;
use crate::support::CoreResult;

#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> CoreResult<Option<Client>>;

    async fn insert(&self, client: Client) -> CoreResult<()>;

    /// Atomic conditional debit:
    /// `UPDATE clients SET balance = balance - :amount
    ///  WHERE id = :id AND balance >= :amount`.
    /// Returns `false` when the balance was short; nothing is written then.
    async fn try_reserve(&self, client_id: &str, amount: i64) -> CoreResult<bool>;

    /// Unconditional atomic credit (refunds, compensations).
    async fn credit(&self, client_id: &str, amount: i64) -> CoreResult<()>;
}

#[async_trait]
pub trait StationRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> CoreResult<Option<Station>>;

    /// Create-or-update the station row from a BootNotification.
    async fn record_boot(&self, station_id: &str, info: BootInfo) -> CoreResult<()>;

    async fn touch_heartbeat(&self, station_id: &str, at: DateTime<Utc>) -> CoreResult<()>;

    async fn update_status(&self, station_id: &str, status: StationStatus) -> CoreResult<()>;

    async fn find_connector(
        &self,
        station_id: &str,
        connector_id: i32,
    ) -> CoreResult<Option<Connector>>;

    async fn upsert_connector_status(
        &self,
        station_id: &str,
        connector_id: i32,
        status: ConnectorStatus,
    ) -> CoreResult<()>;

    async fn list_connectors(&self, station_id: &str) -> CoreResult<Vec<Connector>>;

    /// Stations whose last heartbeat predates `cutoff` and which are not
    /// already marked offline.
    async fn find_stale(&self, cutoff: DateTime<Utc>) -> CoreResult<Vec<Station>>;
}

/// Final numbers written when a session reaches a terminal state.
#[derive(Debug, Clone)]
pub struct SessionClose {
    pub status: SessionStatus,
    pub meter_stop: Option<i64>,
    pub energy_wh: i64,
    pub amount_charged: i64,
    /// Credited back to the client in the same transaction when > 0.
    pub refund: i64,
    pub stopped_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: ChargingSession) -> CoreResult<()>;

    async fn find_by_id(&self, id: &str) -> CoreResult<Option<ChargingSession>>;

    /// The single open session for a client, if any (open = pending,
    /// starting, active, stopping).
    async fn find_open_for_client(&self, client_id: &str) -> CoreResult<Option<ChargingSession>>;

    async fn find_open_for_connector(
        &self,
        station_id: &str,
        connector_id: i32,
    ) -> CoreResult<Option<ChargingSession>>;

    /// The `starting` session a StartTransaction's idTag addresses.
    async fn find_starting_by_id_tag(&self, id_tag: &str)
        -> CoreResult<Option<ChargingSession>>;

    async fn find_by_tx_id(&self, ocpp_tx_id: i32) -> CoreResult<Option<ChargingSession>>;

    /// Allocate the next server-assigned positive OCPP transaction id.
    async fn next_ocpp_tx_id(&self) -> CoreResult<i32>;

    /// Compare-and-set status transition. Returns `false` (writing
    /// nothing) when the session is no longer in any `from` state.
    async fn transition(
        &self,
        id: &str,
        from: &[SessionStatus],
        to: SessionStatus,
    ) -> CoreResult<bool>;

    /// Bind the OCPP transaction to a `starting` session and move it to
    /// `active`. Returns `false` when the session already left `starting`.
    async fn bind_start(
        &self,
        id: &str,
        ocpp_tx_id: i32,
        meter_start: i64,
        started_at: DateTime<Utc>,
    ) -> CoreResult<bool>;

    /// Record the latest meter reading for live limit checks.
    async fn record_meter(&self, id: &str, last_meter_wh: i64) -> CoreResult<()>;

    /// Close the session and, when `close.refund > 0`, credit the client
    /// — both in one database transaction. The close only applies while
    /// the session is still open; `false` means it was already terminal
    /// and nothing (including the refund) was written.
    async fn close(&self, id: &str, close: SessionClose) -> CoreResult<bool>;

    /// `starting` sessions created before `cutoff` with no OCPP tx bound.
    async fn find_hung_starting(&self, cutoff: DateTime<Utc>)
        -> CoreResult<Vec<ChargingSession>>;

    /// `active` sessions created before `cutoff` (runaway candidates).
    async fn find_active_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> CoreResult<Vec<ChargingSession>>;
}

#[async_trait]
pub trait TopUpRepository: Send + Sync {
    async fn insert(&self, topup: TopUp) -> CoreResult<()>;

    async fn update_provider_fields(
        &self,
        id: &str,
        provider_order_id: &str,
        qr_payload: Option<String>,
    ) -> CoreResult<()>;

    async fn find_by_id(&self, id: &str) -> CoreResult<Option<TopUp>>;

    async fn find_by_provider_order_id(&self, order_id: &str) -> CoreResult<Option<TopUp>>;

    /// Recent invoice created under the same client idempotency key.
    async fn find_by_idempotency_key(
        &self,
        client_id: &str,
        key: &str,
        since: DateTime<Utc>,
    ) -> CoreResult<Option<TopUp>>;

    /// Credit path of the webhook branch, in one transaction: if the row
    /// is not yet `approved`, mark it approved with `paid_amount`/`paid_at`
    /// and credit the client balance. Returns `false` (a no-op) when the
    /// row was already approved — webhook redelivery lands here.
    async fn approve_and_credit(
        &self,
        topup_id: &str,
        paid_amount: i64,
        paid_at: DateTime<Utc>,
    ) -> CoreResult<bool>;

    /// Mark a `pending` invoice `failed`. Rows in any other state are
    /// left alone; returns whether the row moved.
    async fn mark_failed(&self, topup_id: &str) -> CoreResult<bool>;

    /// Move `pending` invoices whose `expires_at` has passed to `expired`.
    /// Terminal rows are never touched. Returns the number of rows moved.
    async fn expire_pending(&self, now: DateTime<Utc>) -> CoreResult<u64>;
}

#[async_trait]
pub trait MeterRepository: Send + Sync {
    async fn append(&self, sample: MeterSample) -> CoreResult<()>;

    async fn last_for_session(&self, session_id: &str) -> CoreResult<Option<MeterSample>>;
}

#[async_trait]
pub trait TariffRepository: Send + Sync {
    /// The effective price for (station, at). Resolution order: station
    /// price override, then the highest-priority applicable rule, then
    /// the configured default.
    async fn effective_price(
        &self,
        station_id: &str,
        at: DateTime<Utc>,
    ) -> CoreResult<EffectivePrice>;
}

/// One connection pool, one accessor per aggregate.
pub trait RepositoryProvider: Send + Sync {
    fn clients(&self) -> &dyn ClientRepository;
    fn stations(&self) -> &dyn StationRepository;
    fn sessions(&self) -> &dyn SessionRepository;
    fn top_ups(&self) -> &dyn TopUpRepository;
    fn meters(&self) -> &dyn MeterRepository;
    fn tariffs(&self) -> &dyn TariffRepository;
}
