//! Per-station OCPP session handler.
//!
//! One handler instance exists per connected station, driven by the
//! connection's actor inbox, so inbound frames for a station are
//! processed strictly in receive order. Outbound calls ride the
//! dispatcher and interleave freely.
//!
//! Session phases: Connecting → Booted → Operational → Closing → Closed.
//! The first accepted BootNotification moves Connecting → Booted; any
//! later non-boot Call (or a Heartbeat) moves Booted → Operational.

mod handle_authorize;
mod handle_boot_notification;
mod handle_data_transfer;
mod handle_heartbeat;
mod handle_meter_values;
mod handle_start_transaction;
mod handle_status_notification;
mod handle_stop_transaction;
mod handle_transfer_notifications;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::application::dispatcher::CallDispatcher;
use crate::application::lifecycle::LifecycleEngine;
use crate::application::registry::StationRegistry;
use crate::domain::ocpp::action;
use crate::support::{error_code, CoreError, FrameError, OcppFrame};

const MALFORMED_STRIKES: usize = 3;
const MALFORMED_WINDOW: Duration = Duration::from_secs(10);
const BOOT_REJECT_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Booted,
    Operational,
    Closing,
    Closed,
}

/// What the connection loop should do with the handler's answer.
#[derive(Debug)]
pub struct HandleOutcome {
    pub reply: Option<String>,
    pub close: bool,
}

impl HandleOutcome {
    fn reply(frame: OcppFrame) -> Self {
        Self {
            reply: Some(frame.to_wire()),
            close: false,
        }
    }

    fn silent() -> Self {
        Self {
            reply: None,
            close: false,
        }
    }

    fn closing(frame: Option<OcppFrame>) -> Self {
        Self {
            reply: frame.map(|f| f.to_wire()),
            close: true,
        }
    }
}

#[derive(Clone)]
pub struct SessionHandlerConfig {
    pub heartbeat_interval: i64,
    pub boot_accept: bool,
}

pub struct OcppSessionHandler {
    pub station_id: String,
    engine: Arc<LifecycleEngine>,
    dispatcher: Arc<CallDispatcher>,
    registry: Arc<StationRegistry>,
    config: SessionHandlerConfig,
    phase: Mutex<SessionPhase>,
    boot_rejects: AtomicU32,
    malformed: Mutex<VecDeque<Instant>>,
}

impl OcppSessionHandler {
    pub fn new(
        station_id: impl Into<String>,
        engine: Arc<LifecycleEngine>,
        dispatcher: Arc<CallDispatcher>,
        registry: Arc<StationRegistry>,
        config: SessionHandlerConfig,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            engine,
            dispatcher,
            registry,
            config,
            phase: Mutex::new(SessionPhase::Connecting),
            boot_rejects: AtomicU32::new(0),
            malformed: Mutex::new(VecDeque::new()),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().unwrap()
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock().unwrap() = phase;
    }

    pub fn engine(&self) -> &Arc<LifecycleEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<StationRegistry> {
        &self.registry
    }

    pub fn heartbeat_interval(&self) -> i64 {
        self.config.heartbeat_interval
    }

    pub fn boot_accepted(&self) -> bool {
        self.config.boot_accept
    }

    /// Handle one inbound text frame.
    pub async fn handle(&self, text: &str) -> HandleOutcome {
        let frame = match OcppFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => return self.on_malformed(e),
        };

        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => self.handle_call(&unique_id, &action, payload).await,
            OcppFrame::CallResult { unique_id, payload } => {
                self.dispatcher
                    .resolve_result(&self.station_id, &unique_id, payload);
                HandleOutcome::silent()
            }
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => {
                self.dispatcher.resolve_error(
                    &self.station_id,
                    &unique_id,
                    &error_code,
                    &error_description,
                );
                HandleOutcome::silent()
            }
        }
    }

    fn on_malformed(&self, e: FrameError) -> HandleOutcome {
        warn!(station_id = self.station_id.as_str(), error = %e, "malformed frame");

        let strikes = {
            let mut window = self.malformed.lock().unwrap();
            let now = Instant::now();
            window.push_back(now);
            while let Some(front) = window.front() {
                if now.duration_since(*front) > MALFORMED_WINDOW {
                    window.pop_front();
                } else {
                    break;
                }
            }
            window.len()
        };

        let reply = OcppFrame::error(
            "",
            error_code::FORMATION_VIOLATION,
            format!("{e}"),
        );

        if strikes >= MALFORMED_STRIKES {
            warn!(
                station_id = self.station_id.as_str(),
                strikes, "repeated malformed input, closing connection"
            );
            self.set_phase(SessionPhase::Closing);
            return HandleOutcome::closing(Some(reply));
        }
        HandleOutcome::reply(reply)
    }

    async fn handle_call(&self, unique_id: &str, action_name: &str, payload: Value) -> HandleOutcome {
        let phase = self.phase();
        if matches!(phase, SessionPhase::Closing | SessionPhase::Closed) {
            return HandleOutcome::silent();
        }

        // Nothing but BootNotification is served before an accepted boot.
        if phase == SessionPhase::Connecting && action_name != action::BOOT_NOTIFICATION {
            return HandleOutcome::reply(OcppFrame::error(
                unique_id,
                error_code::SECURITY_ERROR,
                "BootNotification required first",
            ));
        }

        if action_name == action::BOOT_NOTIFICATION {
            return self.handle_boot(unique_id, payload).await;
        }

        if phase == SessionPhase::Booted {
            self.set_phase(SessionPhase::Operational);
        }

        let result = match action_name {
            action::HEARTBEAT => handle_heartbeat::handle(self)
                .await
                .map_err(DispatchError::Handler),
            action::STATUS_NOTIFICATION => {
                self.dispatch(payload, |req| handle_status_notification::handle(self, req))
                    .await
            }
            action::AUTHORIZE => {
                self.dispatch(payload, |req| handle_authorize::handle(self, req))
                    .await
            }
            action::START_TRANSACTION => {
                self.dispatch(payload, |req| handle_start_transaction::handle(self, req))
                    .await
            }
            action::STOP_TRANSACTION => {
                self.dispatch(payload, |req| handle_stop_transaction::handle(self, req))
                    .await
            }
            action::METER_VALUES => {
                self.dispatch(payload, |req| handle_meter_values::handle(self, req))
                    .await
            }
            action::DATA_TRANSFER => {
                self.dispatch(payload, |req| handle_data_transfer::handle(self, req))
                    .await
            }
            action::DIAGNOSTICS_STATUS_NOTIFICATION => {
                self.dispatch(payload, |req| {
                    handle_transfer_notifications::handle_diagnostics(self, req)
                })
                .await
            }
            action::FIRMWARE_STATUS_NOTIFICATION => {
                self.dispatch(payload, |req| {
                    handle_transfer_notifications::handle_firmware(self, req)
                })
                .await
            }
            unknown => {
                info!(
                    station_id = self.station_id.as_str(),
                    action = unknown,
                    "unsupported action"
                );
                return HandleOutcome::reply(OcppFrame::error(
                    unique_id,
                    error_code::NOT_IMPLEMENTED,
                    format!("action {unknown} is not supported"),
                ));
            }
        };

        match result {
            Ok(payload) => HandleOutcome::reply(OcppFrame::result(unique_id, payload)),
            Err(DispatchError::BadPayload(message)) => HandleOutcome::reply(OcppFrame::error(
                unique_id,
                error_code::FORMATION_VIOLATION,
                message,
            )),
            Err(DispatchError::Handler(e)) => {
                error!(
                    station_id = self.station_id.as_str(),
                    action = action_name,
                    error = %e,
                    offending_call = unique_id,
                    "handler error"
                );
                HandleOutcome::reply(OcppFrame::error(
                    unique_id,
                    error_code::INTERNAL_ERROR,
                    e.code(),
                ))
            }
        }
    }

    async fn handle_boot(&self, unique_id: &str, payload: Value) -> HandleOutcome {
        let request = match serde_json::from_value(payload) {
            Ok(request) => request,
            Err(e) => {
                return HandleOutcome::reply(OcppFrame::error(
                    unique_id,
                    error_code::FORMATION_VIOLATION,
                    e.to_string(),
                ))
            }
        };

        match handle_boot_notification::handle(self, request).await {
            Ok((accepted, response)) => {
                if accepted {
                    self.boot_rejects.store(0, Ordering::SeqCst);
                    if self.phase() == SessionPhase::Connecting {
                        self.set_phase(SessionPhase::Booted);
                    }
                    HandleOutcome::reply(OcppFrame::result(unique_id, response))
                } else {
                    let rejects = self.boot_rejects.fetch_add(1, Ordering::SeqCst) + 1;
                    let reply = OcppFrame::result(unique_id, response);
                    if rejects >= BOOT_REJECT_LIMIT {
                        warn!(
                            station_id = self.station_id.as_str(),
                            rejects, "boot rejected repeatedly, closing"
                        );
                        self.set_phase(SessionPhase::Closing);
                        return HandleOutcome::closing(Some(reply));
                    }
                    HandleOutcome::reply(reply)
                }
            }
            Err(e) => {
                error!(station_id = self.station_id.as_str(), error = %e, "boot failed");
                HandleOutcome::reply(OcppFrame::error(
                    unique_id,
                    error_code::INTERNAL_ERROR,
                    e.code(),
                ))
            }
        }
    }

    async fn dispatch<Req, Fut>(
        &self,
        payload: Value,
        handler: impl FnOnce(Req) -> Fut,
    ) -> Result<Value, DispatchError>
    where
        Req: DeserializeOwned,
        Fut: std::future::Future<Output = crate::support::CoreResult<Value>>,
    {
        let request: Req = serde_json::from_value(payload)
            .map_err(|e| DispatchError::BadPayload(e.to_string()))?;
        handler(request).await.map_err(DispatchError::Handler)
    }
}

enum DispatchError {
    BadPayload(String),
    Handler(CoreError),
}

pub(crate) fn ok_json<T: serde::Serialize>(value: T) -> Value {
    // response types serialize infallibly
    serde_json::to_value(value).unwrap()
}

pub(crate) use ok_json as to_payload;
