//! Delivery mechanisms: HTTP REST for clients, WebSocket for stations.

pub mod http;
pub mod ws;
