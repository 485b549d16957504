//! Background reconciler: the backstop for every debit whose committing
//! command never reached a station.
//!
//! A single leader (elected through a bus lease) runs three sweeps:
//! hung sessions, expired invoices, stale stations. Sweeps log and move
//! on — a failing tick never kills the loop, and a sweep that overruns
//! its deadline is aborted without releasing leadership early.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::lifecycle::LifecycleEngine;
use crate::config::{OcppConfig, ReconcilerConfig};
use crate::domain::station::StationStatus;
use crate::domain::RepositoryProvider;
use crate::infrastructure::bus::Bus;
use crate::support::{CoreResult, ShutdownSignal};

const HUNG_LEASE: &str = "reconciler:hung";
const INVOICE_LEASE: &str = "reconciler:invoices";
const STATION_LEASE: &str = "reconciler:stations";

const STATION_SWEEP_SECS: u64 = 60;

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub expired_sessions: u64,
    pub nudged_runaways: u64,
    pub forced_stops: u64,
}

pub struct Reconciler {
    engine: Arc<LifecycleEngine>,
    repos: Arc<dyn RepositoryProvider>,
    bus: Arc<dyn Bus>,
    config: ReconcilerConfig,
    offline_after_secs: i64,
    leader_id: String,
    /// Runaway sessions already asked to stop on the previous sweep.
    /// Leader-local: a leadership change restarts the two-pass escalation.
    nudged: Mutex<HashSet<String>>,
}

impl Reconciler {
    pub fn new(
        engine: Arc<LifecycleEngine>,
        repos: Arc<dyn RepositoryProvider>,
        bus: Arc<dyn Bus>,
        config: ReconcilerConfig,
        ocpp: &OcppConfig,
    ) -> Self {
        Self {
            engine,
            repos,
            bus,
            config,
            offline_after_secs: ocpp.offline_after_secs(),
            leader_id: Uuid::new_v4().to_string(),
            nudged: Mutex::new(HashSet::new()),
        }
    }

    pub fn start(self: Arc<Self>, shutdown: ShutdownSignal) {
        tokio::spawn(async move {
            info!(
                leader_id = self.leader_id.as_str(),
                hung_interval = self.config.hung_session_check_interval,
                invoice_interval = self.config.invoice_sweep_interval,
                "reconciler started"
            );

            let mut hung = tokio::time::interval(Duration::from_secs(
                self.config.hung_session_check_interval,
            ));
            let mut invoices =
                tokio::time::interval(Duration::from_secs(self.config.invoice_sweep_interval));
            let mut stations =
                tokio::time::interval(Duration::from_secs(STATION_SWEEP_SECS));

            loop {
                tokio::select! {
                    _ = hung.tick() => {
                        self.guarded_sweep(
                            HUNG_LEASE,
                            2 * self.config.hung_session_check_interval,
                            "hung-session",
                            self.hung_session_sweep(),
                        )
                        .await;
                    }
                    _ = invoices.tick() => {
                        self.guarded_sweep(
                            INVOICE_LEASE,
                            2 * self.config.invoice_sweep_interval,
                            "invoice",
                            self.invoice_sweep(),
                        )
                        .await;
                    }
                    _ = stations.tick() => {
                        self.guarded_sweep(
                            STATION_LEASE,
                            2 * STATION_SWEEP_SECS,
                            "stale-station",
                            self.station_sweep(),
                        )
                        .await;
                    }
                    _ = shutdown.wait() => {
                        info!("reconciler shutting down");
                        break;
                    }
                }
            }
        });
    }

    async fn guarded_sweep<F>(&self, lease: &str, lease_ttl_secs: u64, name: &str, sweep: F)
    where
        F: std::future::Future<Output = CoreResult<()>>,
    {
        let leading = self
            .bus
            .acquire_lease(lease, &self.leader_id, Duration::from_secs(lease_ttl_secs))
            .await
            .unwrap_or(false);
        if !leading {
            return;
        }

        let deadline = Duration::from_secs(self.config.sweep_deadline);
        match tokio::time::timeout(deadline, sweep).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(sweep = name, error = %e, "sweep failed, retrying next tick"),
            Err(_) => warn!(sweep = name, "sweep exceeded deadline, aborted"),
        }
    }

    /// Expire `starting` sessions past the no-transaction grace and walk
    /// runaway `active` sessions through nudge-then-force-stop.
    pub async fn hung_session_sweep(&self) -> CoreResult<()> {
        let stats = self.run_hung_session_sweep().await?;
        if stats.expired_sessions + stats.nudged_runaways + stats.forced_stops > 0 {
            info!(
                expired = stats.expired_sessions,
                nudged = stats.nudged_runaways,
                forced = stats.forced_stops,
                "hung-session sweep done"
            );
        }
        Ok(())
    }

    pub async fn run_hung_session_sweep(&self) -> CoreResult<SweepStats> {
        let now = Utc::now();
        let mut stats = SweepStats::default();

        let no_tx_cutoff = now - chrono::Duration::seconds(self.config.hung_session_no_tx_grace);
        for session in self.repos.sessions().find_hung_starting(no_tx_cutoff).await? {
            match self.engine.expire_hung_session(&session).await {
                Ok(true) => stats.expired_sessions += 1,
                Ok(false) => {}
                Err(e) => warn!(session_id = session.id.as_str(), error = %e, "expiry failed"),
            }
        }

        let runaway_cutoff = now - chrono::Duration::seconds(self.config.hung_session_max_active);
        let runaways = self
            .repos
            .sessions()
            .find_active_older_than(runaway_cutoff)
            .await?;

        let mut nudged = self.nudged.lock().await;
        let mut still_nudged = HashSet::new();
        for session in runaways {
            if nudged.contains(&session.id) {
                // asked last sweep and still active: force the close
                match self.engine.force_stop_runaway(&session).await {
                    Ok(true) => stats.forced_stops += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(session_id = session.id.as_str(), error = %e, "force stop failed");
                        still_nudged.insert(session.id.clone());
                    }
                }
            } else {
                if let Err(e) = self.engine.nudge_runaway(&session).await {
                    warn!(session_id = session.id.as_str(), error = %e, "nudge failed");
                }
                stats.nudged_runaways += 1;
                still_nudged.insert(session.id.clone());
            }
        }
        *nudged = still_nudged;

        Ok(stats)
    }

    /// Move lapsed `pending` invoices to `expired`. Terminal invoices
    /// (approved included) are never touched.
    pub async fn invoice_sweep(&self) -> CoreResult<()> {
        let moved = self.repos.top_ups().expire_pending(Utc::now()).await?;
        if moved > 0 {
            info!(expired = moved, "invoice sweep done");
        }
        Ok(())
    }

    /// Mark stations silent past the heartbeat tolerance as offline.
    pub async fn station_sweep(&self) -> CoreResult<()> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.offline_after_secs);
        let stale = self.repos.stations().find_stale(cutoff).await?;
        for station in stale {
            info!(
                station_id = station.id.as_str(),
                last_heartbeat = ?station.last_heartbeat_at,
                "marking station offline"
            );
            self.repos
                .stations()
                .update_status(&station.id, StationStatus::Offline)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tokio::sync::mpsc;

    use crate::application::lifecycle::EngineConfig;
    use crate::application::registry::StationRegistry;
    use crate::application::router::CommandRouter;
    use crate::domain::session::{ChargingSession, LimitKind, SessionStatus};
    use crate::domain::station::{BootInfo, ConnectorStatus};
    use crate::domain::topup::{TopUp, TopUpStatus};
    use crate::domain::Client;
    use crate::infrastructure::provider::{CreatedInvoice, PaymentProvider, WebhookEvent};
    use crate::infrastructure::{InMemoryRepositories, MemoryBus};
    use crate::support::CoreError;

    struct NoProvider;

    #[async_trait]
    impl PaymentProvider for NoProvider {
        async fn create_invoice(
            &self,
            _client_id: &str,
            _order_id: &str,
            _amount: i64,
        ) -> CoreResult<CreatedInvoice> {
            Ok(CreatedInvoice {
                provider_order_id: "unused".into(),
                qr_payload: None,
                expires_at: Utc::now(),
            })
        }
        fn signature_header(&self) -> &'static str {
            "X-Test-Signature"
        }
        fn verify_webhook(&self, _p: &[u8], _s: &str) -> bool {
            false
        }
        fn parse_webhook(&self, _p: &[u8]) -> CoreResult<WebhookEvent> {
            Err(CoreError::Internal("unused".into()))
        }
        fn ack_body(&self) -> &'static str {
            "ok"
        }
        fn name(&self) -> &'static str {
            "none"
        }
    }

    struct Fixture {
        reconciler: Reconciler,
        repos: Arc<InMemoryRepositories>,
        _writer_rx: mpsc::UnboundedReceiver<String>,
    }

    async fn fixture() -> Fixture {
        let repos = Arc::new(InMemoryRepositories::with_default_price(15, "KGS"));
        let bus: Arc<MemoryBus> = Arc::new(MemoryBus::new());
        let registry = Arc::new(StationRegistry::new(bus.clone(), 300));
        let router = Arc::new(CommandRouter::new(bus.clone()));

        repos
            .clients()
            .insert(Client::new("alice", 0, "KGS"))
            .await
            .unwrap();
        repos
            .stations()
            .record_boot(
                "ST-1",
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
            .upsert_connector_status("ST-1", 1, ConnectorStatus::Occupied)
            .await
            .unwrap();

        let (tx, writer_rx) = mpsc::unbounded_channel();
        registry.register("ST-1", tx).await.unwrap();

        let engine = Arc::new(LifecycleEngine::new(
            repos.clone(),
            router,
            registry,
            Arc::new(NoProvider),
            EngineConfig::default(),
        ));

        let reconciler = Reconciler::new(
            engine,
            repos.clone(),
            bus,
            ReconcilerConfig::default(),
            &OcppConfig::default(),
        );

        Fixture {
            reconciler,
            repos,
            _writer_rx: writer_rx,
        }
    }

    fn aged_session(status: SessionStatus, age_secs: i64, with_tx: bool) -> ChargingSession {
        let mut session = ChargingSession::reserve(
            "alice", "ST-1", 1, LimitKind::Energy, 10_000, 15, "KGS", 150,
        );
        session.status = status;
        session.created_at = Utc::now() - ChronoDuration::seconds(age_secs);
        if with_tx {
            session.ocpp_tx_id = Some(7);
            session.meter_start = Some(1000);
            session.started_at = Some(session.created_at);
        }
        session
    }

    async fn balance(repos: &InMemoryRepositories) -> i64 {
        repos
            .clients()
            .find_by_id("alice")
            .await
            .unwrap()
            .unwrap()
            .balance
    }

    #[tokio::test]
    async fn hung_starting_session_is_expired_and_refunded_once() {
        let f = fixture().await;
        let session = aged_session(SessionStatus::Starting, 700, false);
        let id = session.id.clone();
        f.repos.sessions().insert(session).await.unwrap();

        let stats = f.reconciler.run_hung_session_sweep().await.unwrap();
        assert_eq!(stats.expired_sessions, 1);
        assert_eq!(balance(&f.repos).await, 150);

        let stored = f.repos.sessions().find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Expired);
        assert_eq!(stored.refund_amount, Some(150));

        // second sweep finds nothing: no double refund
        let stats = f.reconciler.run_hung_session_sweep().await.unwrap();
        assert_eq!(stats.expired_sessions, 0);
        assert_eq!(balance(&f.repos).await, 150);
    }

    #[tokio::test]
    async fn fresh_starting_session_is_left_alone() {
        let f = fixture().await;
        let session = aged_session(SessionStatus::Starting, 60, false);
        let id = session.id.clone();
        f.repos.sessions().insert(session).await.unwrap();

        let stats = f.reconciler.run_hung_session_sweep().await.unwrap();
        assert_eq!(stats.expired_sessions, 0);
        let stored = f.repos.sessions().find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Starting);
        assert_eq!(balance(&f.repos).await, 0);
    }

    #[tokio::test]
    async fn runaway_active_session_is_nudged_then_force_stopped() {
        let f = fixture().await;
        let session = aged_session(SessionStatus::Active, 50_000, true);
        let id = session.id.clone();
        f.repos.sessions().insert(session).await.unwrap();
        // 4 kWh on the meter so far
        f.repos.sessions().record_meter(&id, 5_000).await.unwrap();

        let stats = f.reconciler.run_hung_session_sweep().await.unwrap();
        assert_eq!(stats.nudged_runaways, 1);
        assert_eq!(stats.forced_stops, 0);
        let stored = f.repos.sessions().find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);

        // still active one sweep later: force-stop from the last reading
        let stats = f.reconciler.run_hung_session_sweep().await.unwrap();
        assert_eq!(stats.forced_stops, 1);
        let stored = f.repos.sessions().find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert_eq!(stored.amount_charged, Some(60));
        assert_eq!(stored.refund_amount, Some(90));
        assert_eq!(balance(&f.repos).await, 90);
    }

    #[tokio::test]
    async fn runaway_that_settled_between_sweeps_is_not_touched() {
        let f = fixture().await;
        let session = aged_session(SessionStatus::Active, 50_000, true);
        let id = session.id.clone();
        f.repos.sessions().insert(session).await.unwrap();

        f.reconciler.run_hung_session_sweep().await.unwrap();

        // station stopped in between: session reaches stopped normally
        f.repos
            .sessions()
            .close(
                &id,
                crate::domain::SessionClose {
                    status: SessionStatus::Stopped,
                    meter_stop: Some(11_000),
                    energy_wh: 10_000,
                    amount_charged: 150,
                    refund: 0,
                    stopped_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        let balance_after_stop = balance(&f.repos).await;

        let stats = f.reconciler.run_hung_session_sweep().await.unwrap();
        assert_eq!(stats.forced_stops, 0);
        let stored = f.repos.sessions().find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Stopped);
        assert_eq!(balance(&f.repos).await, balance_after_stop);
    }

    #[tokio::test]
    async fn invoice_sweep_expires_only_lapsed_pending() {
        let f = fixture().await;

        let mut lapsed = TopUp::new("alice", 500, Utc::now() - ChronoDuration::seconds(60), None);
        lapsed.provider_order_id = Some("ord-1".into());
        let lapsed_id = lapsed.id.clone();

        let fresh = TopUp::new("alice", 500, Utc::now() + ChronoDuration::seconds(300), None);
        let fresh_id = fresh.id.clone();

        let mut approved = TopUp::new("alice", 500, Utc::now() - ChronoDuration::seconds(60), None);
        approved.status = TopUpStatus::Approved;
        approved.amount_paid = Some(500);
        let approved_id = approved.id.clone();

        for t in [lapsed, fresh, approved] {
            f.repos.top_ups().insert(t).await.unwrap();
        }

        f.reconciler.invoice_sweep().await.unwrap();

        let get = |id: String| {
            let repos = f.repos.clone();
            async move { repos.top_ups().find_by_id(&id).await.unwrap().unwrap().status }
        };
        assert_eq!(get(lapsed_id).await, TopUpStatus::Expired);
        assert_eq!(get(fresh_id).await, TopUpStatus::Pending);
        assert_eq!(get(approved_id).await, TopUpStatus::Approved);
    }

    #[tokio::test]
    async fn station_sweep_marks_silent_stations_offline() {
        let f = fixture().await;
        f.repos
            .stations()
            .touch_heartbeat("ST-1", Utc::now() - ChronoDuration::seconds(10_000))
            .await
            .unwrap();

        f.reconciler.station_sweep().await.unwrap();

        let station = f
            .repos
            .stations()
            .find_by_id("ST-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(station.status, StationStatus::Offline);
    }

    #[tokio::test]
    async fn leases_keep_two_reconcilers_from_both_sweeping() {
        let bus: Arc<MemoryBus> = Arc::new(MemoryBus::new());
        let a = bus
            .acquire_lease(HUNG_LEASE, "proc-a", Duration::from_secs(60))
            .await
            .unwrap();
        let b = bus
            .acquire_lease(HUNG_LEASE, "proc-b", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(a);
        assert!(!b);
    }
}
