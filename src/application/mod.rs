//! Use-case orchestration: registry, dispatcher, command router,
//! lifecycle engine, OCPP session handling, reconciler.

pub mod dispatcher;
pub mod handlers;
pub mod lifecycle;
pub mod reconciler;
pub mod registry;
pub mod router;

pub use dispatcher::CallDispatcher;
pub use handlers::{OcppSessionHandler, SessionHandlerConfig, SessionPhase};
pub use lifecycle::{
    EngineConfig, LifecycleEngine, SessionSnapshot, StartChargeRequest, StopActor, WebhookOutcome,
};
pub use reconciler::Reconciler;
pub use registry::StationRegistry;
pub use router::{CommandRouter, Delivery, NonceWindow, StationCommand};
