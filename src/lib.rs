//! # Voltline CSMS
//!
//! Control plane for a fleet of EV charging stations: OCPP 1.6-JSON over
//! WebSocket on the station side, REST/JSON for the mobile/PWA client,
//! prepaid balances settled through an external payment provider.
//!
//! ## Layers
//!
//! - **support**: errors, OCPP-J framing, retry, shutdown
//! - **domain**: entities, OCPP payload types, repository traits
//! - **infrastructure**: database (SeaORM), cache/bus, payment providers
//! - **application**: registry, dispatcher, command router, lifecycle
//!   engine, OCPP session handling, reconciler
//! - **interfaces**: WebSocket (stations) and HTTP (clients)

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod support;

pub use application::{CallDispatcher, CommandRouter, LifecycleEngine, Reconciler, StationRegistry};
pub use config::{default_config_path, AppConfig};
pub use infrastructure::{init_database, InMemoryRepositories, MemoryBus, SeaOrmRepositoryProvider};
pub use interfaces::http::create_api_router;
pub use interfaces::ws::OcppWsServer;
pub use support::{CoreError, CoreResult};
