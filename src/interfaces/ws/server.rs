//! OCPP 1.6 WebSocket server.
//!
//! Stations connect at `ws://<host>:<port>/ws/{station_id}` with
//! subprotocol `ocpp1.6`. Each connection runs four tasks: a reader
//! feeding a bounded actor inbox, the single inbox consumer (so frames
//! for one station are handled strictly in order), a writer draining
//! the outbound queue, and a command-topic subscriber translating
//! routed commands into outbound Calls.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::application::dispatcher::CallDispatcher;
use crate::application::handlers::{OcppSessionHandler, SessionHandlerConfig, SessionPhase};
use crate::application::lifecycle::LifecycleEngine;
use crate::application::registry::StationRegistry;
use crate::application::router::{CommandRouter, NonceWindow, StationCommand};
use crate::domain::ocpp::action;
use crate::support::ShutdownSignal;

const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Inbound frames queued per station before backpressure hits the read.
const INBOX_DEPTH: usize = 64;

pub struct WsServerConfig {
    pub host: String,
    pub port: u16,
    pub max_sockets: usize,
    pub heartbeat_interval: i64,
    pub boot_accept: bool,
}

pub struct OcppWsServer {
    config: WsServerConfig,
    engine: Arc<LifecycleEngine>,
    dispatcher: Arc<CallDispatcher>,
    registry: Arc<StationRegistry>,
    router: Arc<CommandRouter>,
    open_sockets: Arc<AtomicUsize>,
    shutdown: ShutdownSignal,
}

impl OcppWsServer {
    pub fn new(
        config: WsServerConfig,
        engine: Arc<LifecycleEngine>,
        dispatcher: Arc<CallDispatcher>,
        registry: Arc<StationRegistry>,
        router: Arc<CommandRouter>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            config,
            engine,
            dispatcher,
            registry,
            router,
            open_sockets: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(
            addr = addr.as_str(),
            "OCPP server listening, stations connect at ws://{addr}/ws/{{station_id}}"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        Err(e) => error!(error = %e, "accept failed"),
                    }
                }
                _ = self.shutdown.wait() => {
                    info!("OCPP server shutting down");
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let engine = self.engine.clone();
        let dispatcher = self.dispatcher.clone();
        let registry = self.registry.clone();
        let router = self.router.clone();
        let open_sockets = self.open_sockets.clone();
        let shutdown = self.shutdown.clone();
        let handler_config = SessionHandlerConfig {
            heartbeat_interval: self.config.heartbeat_interval,
            boot_accept: self.config.boot_accept,
        };
        let max_sockets = self.config.max_sockets;

        tokio::spawn(async move {
            if let Err(e) = handle_connection(
                stream,
                peer,
                engine,
                dispatcher,
                registry,
                router,
                handler_config,
                open_sockets,
                max_sockets,
                shutdown,
            )
            .await
            {
                error!(peer = %peer, error = %e, "connection error");
            }
        });
    }
}

/// Path must be `/ws/{station_id}`.
fn extract_station_id(path: &str) -> Option<String> {
    let id = path.strip_prefix("/ws/")?.trim_matches('/');
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id.to_string())
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<LifecycleEngine>,
    dispatcher: Arc<CallDispatcher>,
    registry: Arc<StationRegistry>,
    router: Arc<CommandRouter>,
    handler_config: SessionHandlerConfig,
    open_sockets: Arc<AtomicUsize>,
    max_sockets: usize,
    shutdown: ShutdownSignal,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut station_id: Option<String> = None;

    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, mut response: Response| {
            let path = req.uri().path();
            let Some(id) = extract_station_id(path) else {
                warn!(peer = %peer, path, "handshake with bad path");
                let mut err = ErrorResponse::new(Some("expected /ws/{station_id}".into()));
                *err.status_mut() = StatusCode::BAD_REQUEST;
                return Err(err);
            };

            let offered = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if offered
                .split(',')
                .map(str::trim)
                .any(|p| p == OCPP_SUBPROTOCOL)
            {
                response.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    OCPP_SUBPROTOCOL.parse().expect("static header value"),
                );
            } else {
                warn!(peer = %peer, offered, "client did not offer ocpp1.6");
            }

            station_id = Some(id);
            Ok(response)
        },
    )
    .await?;

    let Some(station_id) = station_id else {
        return Ok(());
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // socket cap: refuse with a retry hint instead of queueing
    let open = open_sockets.fetch_add(1, Ordering::SeqCst) + 1;
    if open > max_sockets {
        open_sockets.fetch_sub(1, Ordering::SeqCst);
        warn!(
            station_id = station_id.as_str(),
            open, max_sockets, "socket limit reached, refusing connection"
        );
        let _ = ws_sender
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Again,
                reason: "socket limit reached, retry in 60s".into(),
            })))
            .await;
        return Ok(());
    }

    info!(station_id = station_id.as_str(), peer = %peer, "station connected");

    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
    let epoch = match registry.register(&station_id, writer_tx).await {
        Ok(epoch) => epoch,
        Err(e) => {
            open_sockets.fetch_sub(1, Ordering::SeqCst);
            return Err(e.into());
        }
    };

    let handler = Arc::new(OcppSessionHandler::new(
        station_id.clone(),
        engine,
        dispatcher.clone(),
        registry.clone(),
        handler_config,
    ));

    // writer: the single place frames leave this socket
    let writer_station = station_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = writer_rx.recv().await {
            if let Err(e) = ws_sender.send(Message::Text(frame.into())).await {
                error!(station_id = writer_station.as_str(), error = %e, "write failed");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // reader: raw frames into the bounded actor inbox
    let (inbox_tx, mut inbox_rx) = mpsc::channel::<String>(INBOX_DEPTH);
    let reader_station = station_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if inbox_tx.send(text.to_string()).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Binary(data)) => {
                    warn!(
                        station_id = reader_station.as_str(),
                        bytes = data.len(),
                        "ignoring binary frame"
                    );
                }
                Ok(Message::Close(frame)) => {
                    info!(station_id = reader_station.as_str(), ?frame, "close received");
                    break;
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    warn!(station_id = reader_station.as_str(), error = %e, "read error");
                    break;
                }
            }
        }
    });

    // actor: one frame at a time, in receive order
    let actor_handler = handler.clone();
    let actor_registry = registry.clone();
    let actor_station = station_id.clone();
    let actor = tokio::spawn(async move {
        while let Some(text) = inbox_rx.recv().await {
            let _ = actor_registry.refresh_presence(&actor_station).await;
            let outcome = actor_handler.handle(&text).await;
            if let Some(reply) = outcome.reply {
                if actor_registry.send_to(&actor_station, reply).is_err() {
                    break;
                }
            }
            if outcome.close {
                break;
            }
        }
        actor_handler.set_phase(SessionPhase::Closing);
    });

    // command subscriber: routed commands become outbound Calls
    let mut commands = router.subscribe(&station_id);
    let command_dispatcher = dispatcher.clone();
    let command_station = station_id.clone();
    let commander = tokio::spawn(async move {
        let mut window = NonceWindow::default();
        while let Some(envelope) = commands.recv().await {
            if !window.record(envelope.nonce) {
                info!(
                    station_id = command_station.as_str(),
                    nonce = envelope.nonce,
                    "duplicate command skipped"
                );
                continue;
            }
            let (call_action, payload) = command_to_call(&envelope.command);
            match command_dispatcher
                .call(&command_station, call_action, payload)
                .await
            {
                Ok(answer) => {
                    let status = answer
                        .get("status")
                        .and_then(|s| s.as_str())
                        .unwrap_or("-");
                    info!(
                        station_id = command_station.as_str(),
                        action = call_action,
                        status,
                        "command answered"
                    );
                    if status == "Rejected" {
                        // the reconciler compensates sessions the station refused
                        warn!(
                            station_id = command_station.as_str(),
                            action = call_action,
                            "station rejected command"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        station_id = command_station.as_str(),
                        action = call_action,
                        error = %e,
                        "command call failed"
                    );
                }
            }
        }
    });

    // connection lives until reader or actor finishes, or shutdown
    tokio::select! {
        _ = reader => {}
        _ = actor => {}
        _ = shutdown.wait() => {
            info!(station_id = station_id.as_str(), "closing for shutdown");
        }
    }

    commander.abort();
    writer.abort();
    registry.unregister(&station_id, epoch).await?;
    dispatcher.drop_station(&station_id);
    open_sockets.fetch_sub(1, Ordering::SeqCst);
    info!(station_id = station_id.as_str(), "station disconnected");

    Ok(())
}

/// Translate a routed command into its OCPP action and payload.
fn command_to_call(command: &StationCommand) -> (&'static str, serde_json::Value) {
    match command {
        StationCommand::RemoteStart {
            id_tag,
            connector_id,
        } => (
            action::REMOTE_START_TRANSACTION,
            json!({"idTag": id_tag, "connectorId": connector_id}),
        ),
        StationCommand::RemoteStop { ocpp_tx_id } => (
            action::REMOTE_STOP_TRANSACTION,
            json!({"transactionId": ocpp_tx_id}),
        ),
        StationCommand::Reset { hard } => (
            action::RESET,
            json!({"type": if *hard { "Hard" } else { "Soft" }}),
        ),
        StationCommand::ChangeConfiguration { key, value } => (
            action::CHANGE_CONFIGURATION,
            json!({"key": key, "value": value}),
        ),
        StationCommand::GetConfiguration { keys } => {
            (action::GET_CONFIGURATION, json!({"key": keys}))
        }
        StationCommand::TriggerMessage { requested } => (
            action::TRIGGER_MESSAGE,
            json!({"requestedMessage": requested}),
        ),
        StationCommand::ReserveNow {
            connector_id,
            id_tag,
            reservation_id,
            expiry_date,
        } => (
            action::RESERVE_NOW,
            json!({
                "connectorId": connector_id,
                "idTag": id_tag,
                "reservationId": reservation_id,
                "expiryDate": expiry_date.to_rfc3339(),
            }),
        ),
        StationCommand::CancelReservation { reservation_id } => (
            action::CANCEL_RESERVATION,
            json!({"reservationId": reservation_id}),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_id_comes_from_ws_path() {
        assert_eq!(extract_station_id("/ws/ST-001").as_deref(), Some("ST-001"));
        assert_eq!(extract_station_id("/ws/ST-001/").as_deref(), Some("ST-001"));
        assert_eq!(extract_station_id("/ws/"), None);
        assert_eq!(extract_station_id("/ocpp/ST-001"), None);
        assert_eq!(extract_station_id("/ws/a/b"), None);
    }

    #[test]
    fn commands_map_to_ocpp_calls() {
        let (name, payload) = command_to_call(&StationCommand::RemoteStart {
            id_tag: "VL-1".into(),
            connector_id: 2,
        });
        assert_eq!(name, "RemoteStartTransaction");
        assert_eq!(payload["idTag"], "VL-1");
        assert_eq!(payload["connectorId"], 2);

        let (name, payload) = command_to_call(&StationCommand::RemoteStop { ocpp_tx_id: 9 });
        assert_eq!(name, "RemoteStopTransaction");
        assert_eq!(payload["transactionId"], 9);

        let (name, payload) = command_to_call(&StationCommand::Reset { hard: true });
        assert_eq!(name, "Reset");
        assert_eq!(payload["type"], "Hard");
    }
}
