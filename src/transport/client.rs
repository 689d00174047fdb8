use crate::transport::frame::{negotiate_heartbeat, parse_heartbeat, Command, Frame};
use crate::transport::manager::ConnectionManager;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Broker connection configuration
#[derive(Clone, Debug, Deserialize)]
pub struct TransportConfig {
    /// STOMP-over-WebSocket endpoint
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Fixed delay between reconnect attempts
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Client heart-beat offer (outgoing, incoming), 0 disables
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_outgoing_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_incoming_ms: u64,
    /// Re-queue realized subscriptions when the connection drops
    #[serde(default)]
    pub resubscribe_on_reconnect: bool,
}

fn default_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_heartbeat_ms() -> u64 {
    4_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_outgoing_ms: default_heartbeat_ms(),
            heartbeat_incoming_ms: default_heartbeat_ms(),
            resubscribe_on_reconnect: false,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    fn heartbeat_offer(&self) -> (u64, u64) {
        (self.heartbeat_outgoing_ms, self.heartbeat_incoming_ms)
    }
}

/// Why a broker session could not be established
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Broker rejected connection: {0}")]
    Rejected(String),

    #[error("No CONNECTED frame within {0:?}")]
    Timeout(Duration),

    #[error("Connection closed during handshake")]
    Closed,
}

enum SessionEnd {
    /// Cancelled or the manager went away
    Shutdown,
    Lost(String),
}

/// Drive the broker connection until `cancel` fires.
///
/// Connects, performs the STOMP handshake, hands control of subscriptions
/// to `manager`, then pumps frames both ways. Any failure drops back to
/// disconnected and retries after the fixed reconnect delay.
pub async fn run_transport(
    manager: Arc<ConnectionManager>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    config: TransportConfig,
    cancel: CancellationToken,
) {
    info!(url = %config.url, "Starting transport driver");
    let mut attempt = 0u64;

    loop {
        attempt += 1;
        manager.on_connecting();
        debug!(attempt, url = %config.url, "Connecting to broker");

        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            result = open_session(&config) => result,
        };

        match opened {
            Ok((ws, heartbeat)) => {
                // Anything left over was addressed to a dead session
                let mut stale = 0;
                while outbound.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    debug!(count = stale, "Discarded stale outbound frames");
                }

                info!(
                    url = %config.url,
                    heartbeat_out_ms = heartbeat.0,
                    heartbeat_in_ms = heartbeat.1,
                    "Connected to broker"
                );
                attempt = 0;
                manager.on_connected();

                match pump(&manager, ws, &mut outbound, heartbeat, &cancel).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(reason) => {
                        warn!(reason = %reason, "Broker connection lost");
                    }
                }
            }
            Err(e) => {
                warn!(attempt, error = %e, "Broker connection attempt failed");
            }
        }

        manager.on_disconnected();

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay()) => {}
        }
    }

    manager.on_disconnected();
    info!("Transport driver stopped");
}

async fn open_session(config: &TransportConfig) -> Result<(WsStream, (u64, u64)), TransportError> {
    let (mut ws, _response) = connect_async(config.url.as_str()).await?;

    let connect = Frame::connect(broker_host(&config.url), config.heartbeat_offer());
    ws.send(Message::Text(connect.encode())).await?;

    let connected = tokio::time::timeout(config.connect_timeout(), await_connected(&mut ws))
        .await
        .map_err(|_| TransportError::Timeout(config.connect_timeout()))??;

    let server = parse_heartbeat(connected.get_header("heart-beat"));
    Ok((ws, negotiate_heartbeat(config.heartbeat_offer(), server)))
}

async fn await_connected(ws: &mut WsStream) -> Result<Frame, TransportError> {
    while let Some(message) = ws.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => return Err(TransportError::Closed),
            _ => continue,
        };

        match Frame::decode(&text) {
            Ok(Some(frame)) if frame.command == Command::Connected => return Ok(frame),
            Ok(Some(frame)) if frame.command == Command::Error => {
                let reason = frame.get_header("message").unwrap_or(frame.body.as_str()).to_string();
                return Err(TransportError::Rejected(reason));
            }
            Ok(Some(frame)) => {
                debug!(command = %frame.command, "Ignoring frame before CONNECTED");
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Dropping malformed frame during handshake"),
        }
    }

    Err(TransportError::Closed)
}

async fn pump(
    manager: &ConnectionManager,
    ws: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<Frame>,
    heartbeat: (u64, u64),
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    let (out_ms, in_ms) = heartbeat;

    let out_period = Duration::from_millis(out_ms.max(1));
    let mut beat = interval_at(Instant::now() + out_period, out_period);
    beat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Silence for twice the negotiated period means the broker is gone
    let silence_limit = Duration::from_millis(in_ms.saturating_mul(2).max(1));
    let watchdog = tokio::time::sleep(silence_limit);
    tokio::pin!(watchdog);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Text(Frame::disconnect().encode())).await;
                let _ = sink.close().await;
                return SessionEnd::Shutdown;
            }

            message = stream.next() => {
                watchdog.as_mut().reset(Instant::now() + silence_limit);

                match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(reason) = handle_inbound(manager, &text) {
                            return SessionEnd::Lost(reason);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return SessionEnd::Lost(format!("closed by broker: {frame:?}"));
                    }
                    Some(Ok(_)) => {
                        // Binary, ping and pong carry no STOMP frames
                    }
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    None => return SessionEnd::Lost("stream ended".to_string()),
                }
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    return SessionEnd::Shutdown;
                };
                trace!(command = %frame.command, "Sending frame");
                if let Err(e) = sink.send(Message::Text(frame.encode())).await {
                    return SessionEnd::Lost(e.to_string());
                }
            }

            _ = beat.tick(), if out_ms > 0 => {
                if let Err(e) = sink.send(Message::Text("\n".to_string())).await {
                    return SessionEnd::Lost(e.to_string());
                }
            }

            _ = &mut watchdog, if in_ms > 0 => {
                return SessionEnd::Lost(format!("no data from broker for {silence_limit:?}"));
            }
        }
    }
}

/// Returns the reason when the frame ends the session
fn handle_inbound(manager: &ConnectionManager, text: &str) -> Result<(), String> {
    let frame = match Frame::decode(text) {
        Ok(Some(frame)) => frame,
        Ok(None) => return Ok(()),
        Err(e) => {
            debug!(error = %e, len = text.len(), "Dropping malformed frame");
            return Ok(());
        }
    };

    match frame.command {
        Command::Message => {
            manager.dispatch(&frame);
        }
        Command::Error => {
            let reason = frame.get_header("message").unwrap_or(frame.body.as_str()).to_string();
            return Err(format!("broker error: {reason}"));
        }
        Command::Receipt => trace!(receipt = ?frame.get_header("receipt-id"), "Receipt"),
        other => debug!(command = %other, "Ignoring unexpected frame"),
    }

    Ok(())
}

/// Host component of a ws:// or wss:// URL, used for the STOMP `host` header
fn broker_host(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let authority = rest.split(['/', '?']).next().unwrap_or(rest);
    authority
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(authority)
}
