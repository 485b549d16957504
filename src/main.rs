//!
//! Voltline CSMS — OCPP 1.6 control plane with prepaid billing.
//! Reads configuration from TOML (`VOLTLINE_CONFIG` or ./voltline.toml).

use std::sync::Arc;

use sea_orm_migration::MigratorTrait;
use tracing::{error, info, warn};

use voltline::application::{
    CallDispatcher, CommandRouter, EngineConfig, LifecycleEngine, Reconciler, StationRegistry,
};
use voltline::config::AppConfig;
use voltline::domain::RepositoryProvider;
use voltline::infrastructure::bus::Bus;
use voltline::infrastructure::database::migrator::Migrator;
use voltline::infrastructure::provider::create_provider;
use voltline::infrastructure::MemoryBus;
use voltline::interfaces::http::{create_api_router, ApiState};
use voltline::interfaces::ws::{OcppWsServer, WsServerConfig};
use voltline::support::shutdown::{spawn_signal_listener, ShutdownSignal};
use voltline::{default_config_path, init_database, SeaOrmRepositoryProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::var("VOLTLINE_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());

    let config = match AppConfig::load(&config_path) {
        Ok(config) => {
            init_logging(&config.logging.level);
            info!(path = %config_path.display(), "configuration loaded");
            config
        }
        Err(e) => {
            let config = AppConfig::default();
            init_logging(&config.logging.level);
            warn!(error = %e, "config not loaded, using defaults");
            config
        }
    };

    info!("starting Voltline CSMS");

    // ── Database ───────────────────────────────────────────────
    let db = match init_database(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "database connection failed");
            return Err(e.into());
        }
    };
    info!("running migrations");
    Migrator::up(&db, None).await?;

    let repos: Arc<dyn RepositoryProvider> =
        Arc::new(SeaOrmRepositoryProvider::new(db.clone(), &config.billing));

    // ── Bus, registry, routing ─────────────────────────────────
    let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
    let registry = Arc::new(StationRegistry::new(
        bus.clone(),
        config.ocpp.heartbeat_interval,
    ));
    let router = Arc::new(CommandRouter::new(bus.clone()));
    let dispatcher = Arc::new(CallDispatcher::new(
        registry.clone(),
        config.ocpp.call_timeout,
    ));

    // ── Payment provider ───────────────────────────────────────
    let provider = create_provider(&config.provider);
    info!(provider = provider.name(), "payment provider configured");

    // ── Lifecycle engine ───────────────────────────────────────
    let engine = Arc::new(LifecycleEngine::new(
        repos.clone(),
        router.clone(),
        registry.clone(),
        provider.clone(),
        EngineConfig {
            heartbeat_interval_secs: config.ocpp.heartbeat_interval,
            start_grace_secs: config.reconciler.hung_session_no_tx_grace,
            invoice_expiry_secs: config.provider.invoice_expiry,
            idempotency_window_hours: 24,
        },
    ));

    // ── Shutdown ───────────────────────────────────────────────
    let shutdown = ShutdownSignal::new();
    spawn_signal_listener(shutdown.clone());

    // ── Reconciler ─────────────────────────────────────────────
    let reconciler = Arc::new(Reconciler::new(
        engine.clone(),
        repos.clone(),
        bus.clone(),
        config.reconciler.clone(),
        &config.ocpp,
    ));
    reconciler.start(shutdown.clone());

    // ── OCPP WebSocket server ──────────────────────────────────
    let ws_server = OcppWsServer::new(
        WsServerConfig {
            host: config.server.ws_host.clone(),
            port: config.server.ws_port,
            max_sockets: config.server.max_sockets_per_process,
            heartbeat_interval: config.ocpp.heartbeat_interval,
            boot_accept: config.ocpp.boot_accept,
        },
        engine.clone(),
        dispatcher,
        registry.clone(),
        router,
        shutdown.clone(),
    );

    // ── REST API server ────────────────────────────────────────
    let api_router = create_api_router(
        ApiState {
            engine,
            repos,
            registry,
            provider,
            started_at: chrono::Utc::now(),
        },
        bus,
        config.server.rest_timeout,
    );

    let api_addr = format!("{}:{}", config.server.api_host, config.server.api_port);
    let listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!(addr = api_addr.as_str(), "REST API listening");

    let api_shutdown = shutdown.clone();
    let api_server = axum::serve(listener, api_router).with_graceful_shutdown(async move {
        api_shutdown.wait().await;
        info!("REST API shutting down");
    });

    let ws_task = tokio::spawn(async move { ws_server.run().await });
    let api_task = tokio::spawn(async move { api_server.await });

    tokio::select! {
        result = ws_task => match result {
            Ok(Ok(())) => info!("OCPP server stopped"),
            Ok(Err(e)) => error!(error = %e, "OCPP server failed"),
            Err(e) => error!(error = %e, "OCPP server task panicked"),
        },
        result = api_task => match result {
            Ok(Ok(())) => info!("REST API stopped"),
            Ok(Err(e)) => error!(error = %e, "REST API failed"),
            Err(e) => error!(error = %e, "REST API task panicked"),
        },
    }

    shutdown.trigger();

    if let Err(e) = db.close().await {
        warn!(error = %e, "error closing database");
    }
    info!("Voltline CSMS shutdown complete");
    Ok(())
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}
