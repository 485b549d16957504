//! Charging lifecycle engine: reserve → start → meter → stop → settle.
//!
//! The engine is the sole writer of `ChargingSession` and the only place
//! money moves. It is stateless across calls; ordering comes from the
//! conditional updates the repositories execute. Every debit taken here
//! has a credit path bound to the same session id, and every credit is
//! applied through an idempotent close.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::application::registry::StationRegistry;
use crate::application::router::{CommandRouter, Delivery, StationCommand};
use crate::domain::meter::{MeterSample, ENERGY_REGISTER};
use crate::domain::ocpp::MeterValue;
use crate::domain::session::{cost_of_energy, ChargingSession, LimitKind, SessionStatus};
use crate::domain::station::ConnectorStatus;
use crate::domain::topup::TopUp;
use crate::domain::{RepositoryProvider, SessionClose, Settlement};
use crate::infrastructure::provider::{PaymentProvider, WebhookEvent, WebhookStatus};
use crate::support::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub heartbeat_interval_secs: i64,
    /// Window within which a StartTransaction may claim a reservation.
    pub start_grace_secs: i64,
    pub invoice_expiry_secs: i64,
    pub idempotency_window_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 300,
            start_grace_secs: 600,
            invoice_expiry_secs: 300,
            idempotency_window_hours: 24,
        }
    }
}

/// Who asked for a stop.
#[derive(Debug, Clone, Copy)]
pub enum StopActor<'a> {
    Client(&'a str),
    System,
}

#[derive(Debug, Clone)]
pub struct StartChargeRequest {
    pub client_id: String,
    pub station_id: String,
    pub connector_id: i32,
    pub limit_kind: LimitKind,
    /// Watt-hours for energy limits, minor units for amount limits.
    pub limit_value: i64,
}

/// Live view of a session for the status endpoint.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session: ChargingSession,
    pub live_energy_wh: i64,
    pub live_cost: i64,
    pub progress_percent: f64,
    pub station_online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Credited,
    AlreadyApproved,
    MarkedFailed,
    /// Provider still processing; nothing to record.
    Pending,
    /// No matching invoice on our side.
    Ignored,
}

pub struct LifecycleEngine {
    repos: Arc<dyn RepositoryProvider>,
    router: Arc<CommandRouter>,
    registry: Arc<StationRegistry>,
    provider: Arc<dyn PaymentProvider>,
    config: EngineConfig,
}

impl LifecycleEngine {
    pub fn new(
        repos: Arc<dyn RepositoryProvider>,
        router: Arc<CommandRouter>,
        registry: Arc<StationRegistry>,
        provider: Arc<dyn PaymentProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            repos,
            router,
            registry,
            provider,
            config,
        }
    }

    // ── StartCharge ────────────────────────────────────────────

    pub async fn start_charge(&self, req: StartChargeRequest) -> CoreResult<ChargingSession> {
        if req.connector_id < 1 {
            return Err(CoreError::InvalidArgument(
                "connector_id must be >= 1".into(),
            ));
        }
        if req.limit_value <= 0 {
            return Err(CoreError::InvalidArgument(
                "limit_value must be positive".into(),
            ));
        }

        let now = Utc::now();
        let client = self
            .repos
            .clients()
            .find_by_id(&req.client_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Client", "id", &req.client_id))?;

        let station = self
            .repos
            .stations()
            .find_by_id(&req.station_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Station", "id", &req.station_id))?;
        if !station.is_live(now, self.config.heartbeat_interval_secs) {
            return Err(CoreError::StationUnavailable(req.station_id.clone()));
        }
        if !self.registry.is_registered(&req.station_id).await? {
            return Err(CoreError::StationUnavailable(req.station_id.clone()));
        }

        if self
            .repos
            .sessions()
            .find_open_for_client(&req.client_id)
            .await?
            .is_some()
        {
            return Err(CoreError::ClientBusy);
        }

        let connector = self
            .repos
            .stations()
            .find_connector(&req.station_id, req.connector_id)
            .await?
            .ok_or_else(|| {
                CoreError::not_found("Connector", "connector_id", req.connector_id.to_string())
            })?;
        if connector.status != ConnectorStatus::Available {
            return Err(CoreError::ConnectorBusy {
                station_id: req.station_id.clone(),
                connector_id: req.connector_id,
            });
        }
        if self
            .repos
            .sessions()
            .find_open_for_connector(&req.station_id, req.connector_id)
            .await?
            .is_some()
        {
            return Err(CoreError::ConnectorBusy {
                station_id: req.station_id.clone(),
                connector_id: req.connector_id,
            });
        }

        let price = self
            .repos
            .tariffs()
            .effective_price(&req.station_id, now)
            .await?;
        let reserved = match req.limit_kind {
            LimitKind::Amount => req.limit_value,
            LimitKind::Energy => cost_of_energy(req.limit_value, price.price_per_kwh),
        };
        if reserved <= 0 {
            return Err(CoreError::InvalidArgument(
                "reservation amount resolves to zero".into(),
            ));
        }

        // The one debit of this session. Everything after this point
        // either hands the reservation to the station or refunds it.
        if !self
            .repos
            .clients()
            .try_reserve(&req.client_id, reserved)
            .await?
        {
            return Err(CoreError::InsufficientFunds {
                balance: client.balance,
                required: reserved,
            });
        }

        let mut session = ChargingSession::reserve(
            &req.client_id,
            &req.station_id,
            req.connector_id,
            req.limit_kind,
            req.limit_value,
            price.price_per_kwh,
            &price.currency,
            reserved,
        );

        if let Err(e) = self.repos.sessions().insert(session.clone()).await {
            // no session row to attach the compensation to; credit directly
            self.repos.clients().credit(&req.client_id, reserved).await?;
            return Err(e);
        }

        self.repos
            .sessions()
            .transition(&session.id, &[SessionStatus::Pending], SessionStatus::Starting)
            .await?;
        session.status = SessionStatus::Starting;

        let delivery = self
            .router
            .publish(
                &req.station_id,
                StationCommand::RemoteStart {
                    id_tag: session.id_tag.clone(),
                    connector_id: req.connector_id,
                },
            )
            .await;

        match delivery {
            Ok(Delivery::Delivered) => {}
            Ok(Delivery::NoSubscriber) | Err(_) => {
                warn!(
                    session_id = session.id.as_str(),
                    station_id = req.station_id.as_str(),
                    "remote start undeliverable, refunding reservation"
                );
                self.repos
                    .sessions()
                    .close(
                        &session.id,
                        SessionClose {
                            status: SessionStatus::Failed,
                            meter_stop: None,
                            energy_wh: 0,
                            amount_charged: 0,
                            refund: reserved,
                            stopped_at: Utc::now(),
                        },
                    )
                    .await?;
                return Err(CoreError::StationUnavailable(req.station_id.clone()));
            }
        }

        self.repos
            .stations()
            .upsert_connector_status(&req.station_id, req.connector_id, ConnectorStatus::Occupied)
            .await?;

        info!(
            session_id = session.id.as_str(),
            client_id = req.client_id.as_str(),
            station_id = req.station_id.as_str(),
            connector_id = req.connector_id,
            reserved,
            "charge started"
        );
        Ok(session)
    }

    // ── StopCharge ─────────────────────────────────────────────

    /// Idempotent: repeated calls on a session that is already stopping
    /// or terminal return the current state without side effects.
    pub async fn stop_charge(
        &self,
        session_id: &str,
        actor: StopActor<'_>,
    ) -> CoreResult<ChargingSession> {
        let session = self
            .repos
            .sessions()
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("ChargingSession", "id", session_id))?;

        if let StopActor::Client(client_id) = actor {
            if session.client_id != client_id {
                return Err(CoreError::Forbidden(
                    "session belongs to another client".into(),
                ));
            }
        }

        match session.status {
            SessionStatus::Stopping
            | SessionStatus::Stopped
            | SessionStatus::Failed
            | SessionStatus::Expired => Ok(session),

            SessionStatus::Pending | SessionStatus::Starting => {
                // nothing is running on the station yet; release the money
                self.repos
                    .sessions()
                    .close(
                        session_id,
                        SessionClose {
                            status: SessionStatus::Expired,
                            meter_stop: None,
                            energy_wh: 0,
                            amount_charged: 0,
                            refund: session.reserved_amount,
                            stopped_at: Utc::now(),
                        },
                    )
                    .await?;
                self.release_connector(&session).await;
                info!(session_id, "charge cancelled before transaction start");
                self.refreshed(session_id).await
            }

            SessionStatus::Active => {
                let Some(tx_id) = session.ocpp_tx_id else {
                    return Err(CoreError::Internal(format!(
                        "active session {session_id} has no ocpp_tx_id"
                    )));
                };
                self.repos
                    .sessions()
                    .transition(session_id, &[SessionStatus::Active], SessionStatus::Stopping)
                    .await?;
                // Undelivered is fine here: the session sits in stopping
                // and the reconciler is the backstop.
                if let Err(e) = self
                    .router
                    .publish(
                        &session.station_id,
                        StationCommand::RemoteStop { ocpp_tx_id: tx_id },
                    )
                    .await
                {
                    warn!(session_id, error = %e, "remote stop publish failed");
                }
                info!(session_id, ocpp_tx_id = tx_id, "stop requested");
                self.refreshed(session_id).await
            }
        }
    }

    // ── Station-driven transitions ─────────────────────────────

    /// StartTransaction: bind the OCPP transaction to the reservation
    /// the idTag addresses. Returns (session_id, assigned tx id).
    pub async fn bind_start_transaction(
        &self,
        station_id: &str,
        reported_connector_id: i32,
        id_tag: &str,
        meter_start: i64,
        at: DateTime<Utc>,
    ) -> CoreResult<(String, i32)> {
        let session = self
            .repos
            .sessions()
            .find_starting_by_id_tag(id_tag)
            .await?
            .ok_or_else(|| CoreError::not_found("ChargingSession", "id_tag", id_tag))?;

        if session.station_id != station_id {
            return Err(CoreError::Conflict(format!(
                "idTag {id_tag} belongs to a session on station {}",
                session.station_id
            )));
        }
        if reported_connector_id != session.connector_id {
            warn!(
                session_id = session.id.as_str(),
                expected = session.connector_id,
                reported = reported_connector_id,
                "station reported a different connector"
            );
        }
        if at.signed_duration_since(session.created_at)
            > Duration::seconds(self.config.start_grace_secs)
        {
            // too late; the reconciler owns the refund
            return Err(CoreError::Conflict(format!(
                "reservation for idTag {id_tag} has lapsed"
            )));
        }

        let tx_id = self.repos.sessions().next_ocpp_tx_id().await?;
        if !self
            .repos
            .sessions()
            .bind_start(&session.id, tx_id, meter_start, at)
            .await?
        {
            return Err(CoreError::Conflict(format!(
                "session {} is no longer starting",
                session.id
            )));
        }

        self.repos
            .stations()
            .upsert_connector_status(station_id, session.connector_id, ConnectorStatus::Occupied)
            .await?;

        info!(
            session_id = session.id.as_str(),
            ocpp_tx_id = tx_id,
            meter_start,
            "transaction bound"
        );
        Ok((session.id, tx_id))
    }

    /// MeterValues: append energy samples, refresh the live reading, and
    /// ask the station to stop once the limit is reached. The station's
    /// StopTransaction stays authoritative for settlement.
    pub async fn record_meter_values(
        &self,
        station_id: &str,
        connector_id: i32,
        ocpp_tx_id: Option<i32>,
        values: &[MeterValue],
    ) -> CoreResult<()> {
        let session = match ocpp_tx_id {
            Some(tx_id) => self.repos.sessions().find_by_tx_id(tx_id).await?,
            None => {
                self.repos
                    .sessions()
                    .find_open_for_connector(station_id, connector_id)
                    .await?
            }
        };
        let Some(session) = session else {
            warn!(station_id, connector_id, ?ocpp_tx_id, "meter values without a session");
            return Ok(());
        };
        if session.station_id != station_id {
            return Err(CoreError::Conflict(format!(
                "transaction belongs to station {}",
                session.station_id
            )));
        }

        let mut latest_wh: Option<i64> = None;
        for value in values {
            for sampled in &value.sampled_value {
                if !is_energy_register(sampled.measurand.as_deref()) {
                    continue;
                }
                let Ok(raw) = sampled.value.parse::<f64>() else {
                    warn!(
                        session_id = session.id.as_str(),
                        value = sampled.value.as_str(),
                        "unparseable meter value"
                    );
                    continue;
                };
                let wh = match sampled.unit.as_deref() {
                    Some("kWh") => (raw * 1000.0) as i64,
                    _ => raw as i64,
                };
                self.repos
                    .meters()
                    .append(MeterSample {
                        session_id: session.id.clone(),
                        timestamp: value.timestamp,
                        meter_wh: wh,
                        measurand: ENERGY_REGISTER.to_string(),
                        unit: "Wh".to_string(),
                    })
                    .await?;
                latest_wh = Some(latest_wh.map_or(wh, |prev: i64| prev.max(wh)));
            }
        }

        let Some(latest) = latest_wh else {
            return Ok(());
        };
        self.repos.sessions().record_meter(&session.id, latest).await?;

        let Some(refreshed) = self.repos.sessions().find_by_id(&session.id).await? else {
            return Ok(());
        };
        if refreshed.status == SessionStatus::Active && refreshed.limit_reached() {
            // one transition guards against republishing on every sample
            if self
                .repos
                .sessions()
                .transition(
                    &refreshed.id,
                    &[SessionStatus::Active],
                    SessionStatus::Stopping,
                )
                .await?
            {
                info!(
                    session_id = refreshed.id.as_str(),
                    limit_kind = refreshed.limit_kind.as_str(),
                    "limit reached, requesting stop"
                );
                if let Some(tx_id) = refreshed.ocpp_tx_id {
                    if let Err(e) = self
                        .router
                        .publish(station_id, StationCommand::RemoteStop { ocpp_tx_id: tx_id })
                        .await
                    {
                        warn!(session_id = refreshed.id.as_str(), error = %e, "remote stop publish failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// StopTransaction: the authoritative settlement.
    pub async fn settle_stop_transaction(
        &self,
        station_id: &str,
        ocpp_tx_id: i32,
        meter_stop: i64,
        at: DateTime<Utc>,
    ) -> CoreResult<ChargingSession> {
        let session = self
            .repos
            .sessions()
            .find_by_tx_id(ocpp_tx_id)
            .await?
            .ok_or_else(|| {
                CoreError::not_found("ChargingSession", "ocpp_tx_id", ocpp_tx_id.to_string())
            })?;

        if session.station_id != station_id {
            return Err(CoreError::Conflict(format!(
                "transaction {ocpp_tx_id} belongs to station {}",
                session.station_id
            )));
        }
        if !matches!(
            session.status,
            SessionStatus::Active | SessionStatus::Stopping
        ) {
            return Err(CoreError::Conflict(format!(
                "session {} is {}, not stoppable",
                session.id,
                session.status.as_str()
            )));
        }

        let Settlement {
            energy_wh,
            amount_charged,
            refund,
        } = session.settle(meter_stop);

        if !self
            .repos
            .sessions()
            .close(
                &session.id,
                SessionClose {
                    status: SessionStatus::Stopped,
                    meter_stop: Some(meter_stop),
                    energy_wh,
                    amount_charged,
                    refund,
                    stopped_at: at,
                },
            )
            .await?
        {
            return Err(CoreError::Conflict(format!(
                "session {} was settled concurrently",
                session.id
            )));
        }

        self.release_connector(&session).await;

        info!(
            session_id = session.id.as_str(),
            ocpp_tx_id,
            energy_wh,
            amount_charged,
            refund,
            "session settled"
        );
        self.refreshed(&session.id).await
    }

    /// A connector went Faulted: any open session on it becomes
    /// failed-pending-stop. Settlement happens via StopTransaction or
    /// the reconciler's force-stop.
    pub async fn on_connector_faulted(
        &self,
        station_id: &str,
        connector_id: i32,
    ) -> CoreResult<()> {
        let Some(session) = self
            .repos
            .sessions()
            .find_open_for_connector(station_id, connector_id)
            .await?
        else {
            return Ok(());
        };

        warn!(
            session_id = session.id.as_str(),
            station_id, connector_id, "connector faulted under open session"
        );

        match session.status {
            SessionStatus::Pending | SessionStatus::Starting => {
                // no transaction on the wire; release the reservation
                self.repos
                    .sessions()
                    .close(
                        &session.id,
                        SessionClose {
                            status: SessionStatus::Failed,
                            meter_stop: None,
                            energy_wh: 0,
                            amount_charged: 0,
                            refund: session.reserved_amount,
                            stopped_at: Utc::now(),
                        },
                    )
                    .await?;
            }
            SessionStatus::Active => {
                self.repos
                    .sessions()
                    .transition(
                        &session.id,
                        &[SessionStatus::Active],
                        SessionStatus::Stopping,
                    )
                    .await?;
                if let Some(tx_id) = session.ocpp_tx_id {
                    let _ = self
                        .router
                        .publish(station_id, StationCommand::RemoteStop { ocpp_tx_id: tx_id })
                        .await;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Authorize: an idTag is chargeable when it addresses a client with
    /// a positive balance.
    pub async fn authorize_id_tag(&self, id_tag: &str) -> CoreResult<bool> {
        let Some(session) = self.repos.sessions().find_starting_by_id_tag(id_tag).await? else {
            return Ok(false);
        };
        let Some(client) = self.repos.clients().find_by_id(&session.client_id).await? else {
            return Ok(false);
        };
        Ok(client.balance > 0 || session.reserved_amount > 0)
    }

    // ── Reconciler entry points ────────────────────────────────

    /// Expire a `starting` session that never produced a transaction.
    /// Closing is conditional, so a session that raced into another
    /// state is left alone and never double-refunded.
    pub async fn expire_hung_session(&self, session: &ChargingSession) -> CoreResult<bool> {
        let closed = self
            .repos
            .sessions()
            .close(
                &session.id,
                SessionClose {
                    status: SessionStatus::Expired,
                    meter_stop: None,
                    energy_wh: 0,
                    amount_charged: 0,
                    refund: session.reserved_amount,
                    stopped_at: Utc::now(),
                },
            )
            .await?;
        if closed {
            info!(
                session_id = session.id.as_str(),
                refund = session.reserved_amount,
                "hung session expired"
            );
            self.release_connector(session).await;
        }
        Ok(closed)
    }

    /// First pass on a runaway active session: ask the station to stop.
    pub async fn nudge_runaway(&self, session: &ChargingSession) -> CoreResult<()> {
        if let Some(tx_id) = session.ocpp_tx_id {
            let _ = self
                .router
                .publish(
                    &session.station_id,
                    StationCommand::RemoteStop { ocpp_tx_id: tx_id },
                )
                .await;
        }
        Ok(())
    }

    /// Second pass: the station did not stop. Settle from the last known
    /// meter sample (full refund when none exists); never debit.
    pub async fn force_stop_runaway(&self, session: &ChargingSession) -> CoreResult<bool> {
        let last_known = match self.repos.meters().last_for_session(&session.id).await? {
            Some(sample) => Some(sample.meter_wh),
            None => session.last_meter_wh,
        };

        let settlement = match (session.meter_start, last_known) {
            (Some(_), Some(last)) => session.settle(last),
            _ => Settlement {
                energy_wh: 0,
                amount_charged: 0,
                refund: session.reserved_amount,
            },
        };

        let closed = self
            .repos
            .sessions()
            .close(
                &session.id,
                SessionClose {
                    status: SessionStatus::Failed,
                    meter_stop: None,
                    energy_wh: settlement.energy_wh,
                    amount_charged: settlement.amount_charged,
                    refund: settlement.refund,
                    stopped_at: Utc::now(),
                },
            )
            .await?;
        if closed {
            warn!(
                session_id = session.id.as_str(),
                amount_charged = settlement.amount_charged,
                refund = settlement.refund,
                "runaway session force-stopped"
            );
            self.release_connector(session).await;
        }
        Ok(closed)
    }

    // ── Top-ups & webhook credit ───────────────────────────────

    pub async fn create_topup(
        &self,
        client_id: &str,
        amount: i64,
        idempotency_key: Option<String>,
    ) -> CoreResult<TopUp> {
        if amount <= 0 {
            return Err(CoreError::InvalidArgument(
                "top-up amount must be positive".into(),
            ));
        }
        self.repos
            .clients()
            .find_by_id(client_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Client", "id", client_id))?;

        if let Some(key) = idempotency_key.as_deref() {
            let since = Utc::now() - Duration::hours(self.config.idempotency_window_hours);
            if let Some(existing) = self
                .repos
                .top_ups()
                .find_by_idempotency_key(client_id, key, since)
                .await?
            {
                return Ok(existing);
            }
        }

        let mut topup = TopUp::new(
            client_id,
            amount,
            Utc::now() + Duration::seconds(self.config.invoice_expiry_secs),
            idempotency_key,
        );
        self.repos.top_ups().insert(topup.clone()).await?;

        match self.provider.create_invoice(client_id, &topup.id, amount).await {
            Ok(created) => {
                self.repos
                    .top_ups()
                    .update_provider_fields(
                        &topup.id,
                        &created.provider_order_id,
                        created.qr_payload.clone(),
                    )
                    .await?;
                topup.provider_order_id = Some(created.provider_order_id);
                topup.qr_payload = created.qr_payload;
                info!(
                    topup_id = topup.id.as_str(),
                    client_id, amount, "top-up invoice created"
                );
                Ok(topup)
            }
            Err(e) => {
                let _ = self.repos.top_ups().mark_failed(&topup.id).await;
                Err(e)
            }
        }
    }

    /// Apply a verified webhook. Redelivery of an approved payment is a
    /// no-op; approval overrides `expired` (the money arrived late).
    pub async fn apply_webhook(&self, event: WebhookEvent) -> CoreResult<WebhookOutcome> {
        let Some(topup) = self
            .repos
            .top_ups()
            .find_by_provider_order_id(&event.provider_order_id)
            .await?
        else {
            warn!(
                provider_order_id = event.provider_order_id.as_str(),
                "webhook for unknown invoice"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        match event.status {
            WebhookStatus::Paid => {
                let amount = event.paid_amount.unwrap_or(topup.amount_requested);
                if self
                    .repos
                    .top_ups()
                    .approve_and_credit(&topup.id, amount, Utc::now())
                    .await?
                {
                    info!(
                        topup_id = topup.id.as_str(),
                        client_id = topup.client_id.as_str(),
                        amount,
                        "balance credited"
                    );
                    Ok(WebhookOutcome::Credited)
                } else {
                    Ok(WebhookOutcome::AlreadyApproved)
                }
            }
            WebhookStatus::Failed => {
                if self.repos.top_ups().mark_failed(&topup.id).await? {
                    Ok(WebhookOutcome::MarkedFailed)
                } else {
                    Ok(WebhookOutcome::Ignored)
                }
            }
            WebhookStatus::Pending => Ok(WebhookOutcome::Pending),
        }
    }

    // ── Reads ──────────────────────────────────────────────────

    pub async fn session_snapshot(
        &self,
        session_id: &str,
        requesting_client: Option<&str>,
    ) -> CoreResult<SessionSnapshot> {
        let session = self
            .repos
            .sessions()
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("ChargingSession", "id", session_id))?;

        if let Some(client_id) = requesting_client {
            if session.client_id != client_id {
                return Err(CoreError::Forbidden(
                    "session belongs to another client".into(),
                ));
            }
        }

        let live_energy_wh = session
            .energy_wh
            .or_else(|| session.live_energy_wh())
            .unwrap_or(0);
        let live_cost = session
            .amount_charged
            .unwrap_or_else(|| cost_of_energy(live_energy_wh, session.price_per_kwh));

        let target = match session.limit_kind {
            LimitKind::Energy => session.limit_value,
            LimitKind::Amount => session.reserved_amount,
        };
        let progressed = match session.limit_kind {
            LimitKind::Energy => live_energy_wh,
            LimitKind::Amount => live_cost,
        };
        let progress_percent = if target > 0 {
            ((progressed as f64 / target as f64) * 100.0).min(100.0)
        } else {
            0.0
        };

        let station_online = self.registry.is_registered(&session.station_id).await?;

        Ok(SessionSnapshot {
            session,
            live_energy_wh,
            live_cost,
            progress_percent,
            station_online,
        })
    }

    pub fn repos(&self) -> &Arc<dyn RepositoryProvider> {
        &self.repos
    }

    // ── Internals ──────────────────────────────────────────────

    async fn refreshed(&self, session_id: &str) -> CoreResult<ChargingSession> {
        self.repos
            .sessions()
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("ChargingSession", "id", session_id))
    }

    async fn release_connector(&self, session: &ChargingSession) {
        if let Err(e) = self
            .repos
            .stations()
            .upsert_connector_status(
                &session.station_id,
                session.connector_id,
                ConnectorStatus::Available,
            )
            .await
        {
            warn!(
                session_id = session.id.as_str(),
                error = %e,
                "failed to release connector"
            );
        }
    }
}

/// Per OCPP, a SampledValue with no measurand is the energy register.
fn is_energy_register(measurand: Option<&str>) -> bool {
    match measurand {
        None => true,
        Some(m) => m == ENERGY_REGISTER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::application::router::CommandStream;
    use crate::domain::station::{BootInfo, StationStatus};
    use crate::domain::topup::TopUpStatus;
    use crate::domain::Client;
    use crate::infrastructure::provider::CreatedInvoice;
    use crate::infrastructure::{InMemoryRepositories, MemoryBus};

    struct FakeProvider;

    #[async_trait]
    impl PaymentProvider for FakeProvider {
        async fn create_invoice(
            &self,
            _client_id: &str,
            order_id: &str,
            _amount: i64,
        ) -> CoreResult<CreatedInvoice> {
            Ok(CreatedInvoice {
                provider_order_id: format!("prov-{order_id}"),
                qr_payload: Some("https://pay.test/qr/1".into()),
                expires_at: Utc::now() + Duration::seconds(300),
            })
        }

        fn signature_header(&self) -> &'static str {
            "X-Test-Signature"
        }
        fn verify_webhook(&self, _payload: &[u8], _signature: &str) -> bool {
            true
        }

        fn parse_webhook(&self, _payload: &[u8]) -> CoreResult<WebhookEvent> {
            Err(CoreError::Internal("not used in these tests".into()))
        }

        fn ack_body(&self) -> &'static str {
            "ok"
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    struct Harness {
        engine: LifecycleEngine,
        repos: Arc<InMemoryRepositories>,
        commands: CommandStream,
        _writer_rx: mpsc::UnboundedReceiver<String>,
    }

    const STATION: &str = "ST-1";
    const CLIENT: &str = "alice";

    /// Fixture: price 15/kWh, client balance 1000.
    async fn harness() -> Harness {
        let repos = Arc::new(InMemoryRepositories::with_default_price(15, "KGS"));
        let bus = Arc::new(MemoryBus::new());
        let registry = Arc::new(StationRegistry::new(bus.clone(), 300));
        let router = Arc::new(CommandRouter::new(bus));

        repos
            .clients()
            .insert(Client::new(CLIENT, 1000, "KGS"))
            .await
            .unwrap();
        repos
            .stations()
            .record_boot(
                STATION,
                BootInfo {
                    vendor: "Vendo".into(),
                    model: "EVX-2".into(),
                    serial_number: None,
                    firmware_version: None,
                },
            )
            .await
            .unwrap();
        repos
            .stations()
            .update_status(STATION, StationStatus::Available)
            .await
            .unwrap();
        repos
            .stations()
            .upsert_connector_status(STATION, 1, ConnectorStatus::Available)
            .await
            .unwrap();

        let (tx, writer_rx) = mpsc::unbounded_channel();
        registry.register(STATION, tx).await.unwrap();
        let commands = router.subscribe(STATION);

        let engine = LifecycleEngine::new(
            repos.clone(),
            router,
            registry,
            Arc::new(FakeProvider),
            EngineConfig::default(),
        );

        Harness {
            engine,
            repos,
            commands,
            _writer_rx: writer_rx,
        }
    }

    async fn balance_of(repos: &InMemoryRepositories, client_id: &str) -> i64 {
        repos
            .clients()
            .find_by_id(client_id)
            .await
            .unwrap()
            .unwrap()
            .balance
    }

    fn energy_start() -> StartChargeRequest {
        StartChargeRequest {
            client_id: CLIENT.into(),
            station_id: STATION.into(),
            connector_id: 1,
            limit_kind: LimitKind::Energy,
            limit_value: 10_000, // 10 kWh
        }
    }

    fn meter_frame(wh: i64) -> Vec<MeterValue> {
        vec![MeterValue {
            timestamp: Utc::now(),
            sampled_value: vec![crate::domain::ocpp::SampledValue {
                value: wh.to_string(),
                context: None,
                measurand: Some(ENERGY_REGISTER.to_string()),
                unit: Some("Wh".to_string()),
                phase: None,
                location: None,
            }],
        }]
    }

    #[tokio::test]
    async fn happy_path_energy_limit() {
        let mut h = harness().await;

        let session = h.engine.start_charge(energy_start()).await.unwrap();
        assert_eq!(session.status, SessionStatus::Starting);
        assert_eq!(session.reserved_amount, 150);
        assert_eq!(balance_of(&h.repos, CLIENT).await, 850);

        let envelope = h.commands.recv().await.unwrap();
        assert!(matches!(envelope.command, StationCommand::RemoteStart { .. }));

        let (session_id, tx_id) = h
            .engine
            .bind_start_transaction(STATION, 1, &session.id_tag, 1000, Utc::now())
            .await
            .unwrap();
        assert_eq!(session_id, session.id);
        assert!(tx_id > 0);

        // live readings up to the limit: engine asks the station to stop
        h.engine
            .record_meter_values(STATION, 1, Some(tx_id), &meter_frame(11_000))
            .await
            .unwrap();
        let envelope = h.commands.recv().await.unwrap();
        assert_eq!(envelope.command, StationCommand::RemoteStop { ocpp_tx_id: tx_id });

        let settled = h
            .engine
            .settle_stop_transaction(STATION, tx_id, 11_000, Utc::now())
            .await
            .unwrap();
        assert_eq!(settled.status, SessionStatus::Stopped);
        assert_eq!(settled.energy_wh, Some(10_000));
        assert_eq!(settled.amount_charged, Some(150));
        assert_eq!(settled.refund_amount, Some(0));
        assert_eq!(balance_of(&h.repos, CLIENT).await, 850);

        let connector = h
            .repos
            .stations()
            .find_connector(STATION, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(connector.status, ConnectorStatus::Available);
    }

    #[tokio::test]
    async fn under_consumption_refunds_remainder() {
        let mut h = harness().await;
        let session = h.engine.start_charge(energy_start()).await.unwrap();
        h.commands.recv().await.unwrap();
        let (_, tx_id) = h
            .engine
            .bind_start_transaction(STATION, 1, &session.id_tag, 1000, Utc::now())
            .await
            .unwrap();

        let settled = h
            .engine
            .settle_stop_transaction(STATION, tx_id, 6_000, Utc::now())
            .await
            .unwrap();
        assert_eq!(settled.energy_wh, Some(5_000));
        assert_eq!(settled.amount_charged, Some(75));
        assert_eq!(settled.refund_amount, Some(75));
        assert_eq!(balance_of(&h.repos, CLIENT).await, 925);
        assert_eq!(
            settled.amount_charged.unwrap() + settled.refund_amount.unwrap(),
            settled.reserved_amount
        );
    }

    #[tokio::test]
    async fn insufficient_funds_leaves_no_trace() {
        let h = harness().await;
        let request = StartChargeRequest {
            limit_value: 100_000, // 100 kWh -> 1500 > balance
            ..energy_start()
        };
        let err = h.engine.start_charge(request).await.unwrap_err();
        assert!(matches!(err, CoreError::InsufficientFunds { required: 1500, .. }));
        assert_eq!(balance_of(&h.repos, CLIENT).await, 1000);
        assert!(h
            .repos
            .sessions()
            .find_open_for_client(CLIENT)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn undeliverable_remote_start_is_refunded() {
        // same fixture, but nobody subscribes to the command topic
        let repos = Arc::new(InMemoryRepositories::with_default_price(15, "KGS"));
        let bus = Arc::new(MemoryBus::new());
        let registry = Arc::new(StationRegistry::new(bus.clone(), 300));
        let router = Arc::new(CommandRouter::new(bus));

        repos
            .clients()
            .insert(Client::new(CLIENT, 1000, "KGS"))
            .await
            .unwrap();
        repos
            .stations()
            .record_boot(
                STATION,
                BootInfo {
                    vendor: "Vendo".into(),
                    model: "EVX-2".into(),
                    serial_number: None,
                    firmware_version: None,
                },
            )
            .await
            .unwrap();
        repos
            .stations()
            .upsert_connector_status(STATION, 1, ConnectorStatus::Available)
            .await
            .unwrap();
        let (tx, _writer_rx) = mpsc::unbounded_channel();
        registry.register(STATION, tx).await.unwrap();

        let engine = LifecycleEngine::new(
            repos.clone(),
            router,
            registry,
            Arc::new(FakeProvider),
            EngineConfig::default(),
        );

        let err = engine.start_charge(energy_start()).await.unwrap_err();
        assert!(matches!(err, CoreError::StationUnavailable(_)));
        assert_eq!(balance_of(&repos, CLIENT).await, 1000);

        let session = repos
            .sessions()
            .find_open_for_client(CLIENT)
            .await
            .unwrap();
        assert!(session.is_none());
    }

    #[tokio::test]
    async fn concurrent_double_start_admits_exactly_one() {
        let h = Arc::new(harness().await);

        let a = {
            let h = h.clone();
            tokio::spawn(async move { h.engine.start_charge(energy_start()).await })
        };
        let b = {
            let h = h.clone();
            tokio::spawn(async move { h.engine.start_charge(energy_start()).await })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        let oks = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(oks, 1);
        let err = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(
            err,
            CoreError::ClientBusy | CoreError::ConnectorBusy { .. }
        ));
        // winner's reservation is the only debit
        assert_eq!(balance_of(&h.repos, CLIENT).await, 850);
    }

    #[tokio::test]
    async fn stop_charge_is_idempotent() {
        let mut h = harness().await;
        let session = h.engine.start_charge(energy_start()).await.unwrap();
        h.commands.recv().await.unwrap();
        let (_, tx_id) = h
            .engine
            .bind_start_transaction(STATION, 1, &session.id_tag, 1000, Utc::now())
            .await
            .unwrap();
        h.engine
            .settle_stop_transaction(STATION, tx_id, 6_000, Utc::now())
            .await
            .unwrap();
        let balance = balance_of(&h.repos, CLIENT).await;

        let first = h
            .engine
            .stop_charge(&session.id, StopActor::Client(CLIENT))
            .await
            .unwrap();
        let second = h
            .engine
            .stop_charge(&session.id, StopActor::System)
            .await
            .unwrap();
        assert_eq!(first.status, SessionStatus::Stopped);
        assert_eq!(second.status, SessionStatus::Stopped);
        assert_eq!(balance_of(&h.repos, CLIENT).await, balance);
    }

    #[tokio::test]
    async fn stop_active_session_publishes_remote_stop() {
        let mut h = harness().await;
        let session = h.engine.start_charge(energy_start()).await.unwrap();
        h.commands.recv().await.unwrap();
        let (_, tx_id) = h
            .engine
            .bind_start_transaction(STATION, 1, &session.id_tag, 1000, Utc::now())
            .await
            .unwrap();

        let stopping = h
            .engine
            .stop_charge(&session.id, StopActor::Client(CLIENT))
            .await
            .unwrap();
        assert_eq!(stopping.status, SessionStatus::Stopping);
        let envelope = h.commands.recv().await.unwrap();
        assert_eq!(envelope.command, StationCommand::RemoteStop { ocpp_tx_id: tx_id });

        // station's StopTransaction is still accepted from `stopping`
        let settled = h
            .engine
            .settle_stop_transaction(STATION, tx_id, 2_000, Utc::now())
            .await
            .unwrap();
        assert_eq!(settled.status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn stop_before_transaction_releases_reservation() {
        let mut h = harness().await;
        let session = h.engine.start_charge(energy_start()).await.unwrap();
        h.commands.recv().await.unwrap();

        let stopped = h
            .engine
            .stop_charge(&session.id, StopActor::Client(CLIENT))
            .await
            .unwrap();
        assert_eq!(stopped.status, SessionStatus::Expired);
        assert_eq!(balance_of(&h.repos, CLIENT).await, 1000);
    }

    #[tokio::test]
    async fn foreign_client_cannot_stop_session() {
        let mut h = harness().await;
        let session = h.engine.start_charge(energy_start()).await.unwrap();
        h.commands.recv().await.unwrap();

        let err = h
            .engine
            .stop_charge(&session.id, StopActor::Client("mallory"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn start_transaction_without_reservation_is_rejected() {
        let h = harness().await;
        let err = h
            .engine
            .bind_start_transaction(STATION, 1, "VL-doesnotexist00000", 0, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn late_start_transaction_is_rejected() {
        let mut h = harness().await;
        let session = h.engine.start_charge(energy_start()).await.unwrap();
        h.commands.recv().await.unwrap();

        let too_late = Utc::now() + Duration::seconds(601);
        let err = h
            .engine
            .bind_start_transaction(STATION, 1, &session.id_tag, 1000, too_late)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn settle_twice_is_rejected_and_refunds_once() {
        let mut h = harness().await;
        let session = h.engine.start_charge(energy_start()).await.unwrap();
        h.commands.recv().await.unwrap();
        let (_, tx_id) = h
            .engine
            .bind_start_transaction(STATION, 1, &session.id_tag, 1000, Utc::now())
            .await
            .unwrap();

        h.engine
            .settle_stop_transaction(STATION, tx_id, 6_000, Utc::now())
            .await
            .unwrap();
        let err = h
            .engine
            .settle_stop_transaction(STATION, tx_id, 6_000, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert_eq!(balance_of(&h.repos, CLIENT).await, 925);
    }

    #[tokio::test]
    async fn hung_session_expiry_refunds_once_and_never_touches_stopped() {
        let mut h = harness().await;
        let session = h.engine.start_charge(energy_start()).await.unwrap();
        h.commands.recv().await.unwrap();
        let open = h
            .repos
            .sessions()
            .find_by_id(&session.id)
            .await
            .unwrap()
            .unwrap();

        assert!(h.engine.expire_hung_session(&open).await.unwrap());
        assert_eq!(balance_of(&h.repos, CLIENT).await, 1000);
        // second sweep: already terminal, no second refund
        assert!(!h.engine.expire_hung_session(&open).await.unwrap());
        assert_eq!(balance_of(&h.repos, CLIENT).await, 1000);
    }

    #[tokio::test]
    async fn force_stop_settles_from_last_sample_and_never_debits() {
        let mut h = harness().await;
        let session = h.engine.start_charge(energy_start()).await.unwrap();
        h.commands.recv().await.unwrap();
        let (_, tx_id) = h
            .engine
            .bind_start_transaction(STATION, 1, &session.id_tag, 1000, Utc::now())
            .await
            .unwrap();
        // 4 kWh observed so far
        h.engine
            .record_meter_values(STATION, 1, Some(tx_id), &meter_frame(5_000))
            .await
            .unwrap();

        let active = h
            .repos
            .sessions()
            .find_by_id(&session.id)
            .await
            .unwrap()
            .unwrap();
        assert!(h.engine.force_stop_runaway(&active).await.unwrap());

        let closed = h
            .repos
            .sessions()
            .find_by_id(&session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.status, SessionStatus::Failed);
        assert_eq!(closed.amount_charged, Some(60)); // 4 kWh * 15
        assert_eq!(closed.refund_amount, Some(90));
        assert_eq!(balance_of(&h.repos, CLIENT).await, 940);
    }

    #[tokio::test]
    async fn force_stop_without_samples_refunds_everything() {
        let mut h = harness().await;
        let session = h.engine.start_charge(energy_start()).await.unwrap();
        h.commands.recv().await.unwrap();
        h.engine
            .bind_start_transaction(STATION, 1, &session.id_tag, 1000, Utc::now())
            .await
            .unwrap();

        let active = h
            .repos
            .sessions()
            .find_by_id(&session.id)
            .await
            .unwrap()
            .unwrap();
        assert!(h.engine.force_stop_runaway(&active).await.unwrap());
        assert_eq!(balance_of(&h.repos, CLIENT).await, 1000);
    }

    #[tokio::test]
    async fn amount_limit_stops_when_reservation_consumed() {
        let mut h = harness().await;
        let session = h
            .engine
            .start_charge(StartChargeRequest {
                limit_kind: LimitKind::Amount,
                limit_value: 150,
                ..energy_start()
            })
            .await
            .unwrap();
        assert_eq!(session.reserved_amount, 150);
        h.commands.recv().await.unwrap();
        let (_, tx_id) = h
            .engine
            .bind_start_transaction(STATION, 1, &session.id_tag, 0, Utc::now())
            .await
            .unwrap();

        // 9 kWh: 135 < 150, below the limit
        h.engine
            .record_meter_values(STATION, 1, Some(tx_id), &meter_frame(9_000))
            .await
            .unwrap();
        let current = h
            .repos
            .sessions()
            .find_by_id(&session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.status, SessionStatus::Active);

        // 10 kWh: cost reaches the reservation
        h.engine
            .record_meter_values(STATION, 1, Some(tx_id), &meter_frame(10_000))
            .await
            .unwrap();
        let envelope = h.commands.recv().await.unwrap();
        assert_eq!(envelope.command, StationCommand::RemoteStop { ocpp_tx_id: tx_id });
    }

    #[tokio::test]
    async fn webhook_credits_exactly_once_even_after_expiry() {
        let h = harness().await;
        let topup = h.engine.create_topup(CLIENT, 500, None).await.unwrap();
        let order_id = topup.provider_order_id.clone().unwrap();

        // invoice sweep ran first
        h.repos
            .top_ups()
            .expire_pending(topup.expires_at + Duration::seconds(60))
            .await
            .unwrap();

        let event = WebhookEvent {
            provider_order_id: order_id.clone(),
            status: WebhookStatus::Paid,
            paid_amount: Some(500),
        };
        assert_eq!(
            h.engine.apply_webhook(event.clone()).await.unwrap(),
            WebhookOutcome::Credited
        );
        for _ in 0..3 {
            assert_eq!(
                h.engine.apply_webhook(event.clone()).await.unwrap(),
                WebhookOutcome::AlreadyApproved
            );
        }

        assert_eq!(balance_of(&h.repos, CLIENT).await, 1500);
        let stored = h
            .repos
            .top_ups()
            .find_by_id(&topup.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TopUpStatus::Approved);
    }

    #[tokio::test]
    async fn topup_idempotency_key_returns_same_invoice() {
        let h = harness().await;
        let first = h
            .engine
            .create_topup(CLIENT, 500, Some("key-1".into()))
            .await
            .unwrap();
        let second = h
            .engine
            .create_topup(CLIENT, 500, Some("key-1".into()))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn webhook_for_unknown_order_is_ignored() {
        let h = harness().await;
        let outcome = h
            .engine
            .apply_webhook(WebhookEvent {
                provider_order_id: "prov-nope".into(),
                status: WebhookStatus::Paid,
                paid_amount: Some(500),
            })
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
        assert_eq!(balance_of(&h.repos, CLIENT).await, 1000);
    }

    #[tokio::test]
    async fn monetary_conservation_over_mixed_operations() {
        let mut h = harness().await;
        let initial = balance_of(&h.repos, CLIENT).await;

        let session = h.engine.start_charge(energy_start()).await.unwrap();
        h.commands.recv().await.unwrap();
        let (_, tx_id) = h
            .engine
            .bind_start_transaction(STATION, 1, &session.id_tag, 1000, Utc::now())
            .await
            .unwrap();
        let settled = h
            .engine
            .settle_stop_transaction(STATION, tx_id, 6_000, Utc::now())
            .await
            .unwrap();

        let topup = h.engine.create_topup(CLIENT, 500, None).await.unwrap();
        let order_id = topup.provider_order_id.unwrap();
        h.engine
            .apply_webhook(WebhookEvent {
                provider_order_id: order_id,
                status: WebhookStatus::Paid,
                paid_amount: Some(500),
            })
            .await
            .unwrap();

        let approved_topups = 500;
        let charged = settled.amount_charged.unwrap();
        assert_eq!(
            balance_of(&h.repos, CLIENT).await,
            initial + approved_topups - charged
        );
    }

    #[tokio::test]
    async fn snapshot_reports_progress_and_enforces_ownership() {
        let mut h = harness().await;
        let session = h.engine.start_charge(energy_start()).await.unwrap();
        h.commands.recv().await.unwrap();
        let (_, tx_id) = h
            .engine
            .bind_start_transaction(STATION, 1, &session.id_tag, 1000, Utc::now())
            .await
            .unwrap();
        h.engine
            .record_meter_values(STATION, 1, Some(tx_id), &meter_frame(6_000))
            .await
            .unwrap();

        let snapshot = h
            .engine
            .session_snapshot(&session.id, Some(CLIENT))
            .await
            .unwrap();
        assert_eq!(snapshot.live_energy_wh, 5_000);
        assert_eq!(snapshot.live_cost, 75);
        assert!((snapshot.progress_percent - 50.0).abs() < f64::EPSILON);
        assert!(snapshot.station_online);

        let err = h
            .engine
            .session_snapshot(&session.id, Some("mallory"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }
}
