//! Cross-cutting utilities: errors, OCPP-J framing, retry, shutdown.

pub mod errors;
pub mod ocpp_frame;
pub mod retry;
pub mod shutdown;

pub use errors::{CoreError, CoreResult};
pub use ocpp_frame::{error_code, FrameError, OcppFrame};
pub use shutdown::ShutdownSignal;
