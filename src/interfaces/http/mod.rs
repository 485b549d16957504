//! HTTP delivery: the client-facing REST surface.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod router;

pub use router::{create_api_router, ApiState};
