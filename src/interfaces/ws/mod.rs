//! WebSocket delivery: the OCPP 1.6 station-facing server.

pub mod server;

pub use server::{OcppWsServer, WsServerConfig};
