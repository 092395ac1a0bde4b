//! Socket.IO client transport over a websocket (tokio-tungstenite).
//!
//! One background task owns the websocket. It connects with a timeout, performs the Engine.IO
//! open and Socket.IO connect, answers pings, forwards validated server events, and reconnects
//! with exponential backoff after a failure. The owner talks to it through [`Transport`] and
//! receives [`TransportEvent`]s on an unbounded channel.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::packet::{EnginePacket, OpenHandshake, PacketError, SocketPacket};
use super::protocol::{ClientEvent, ServerEvent};
use crate::config::RetryConfig;
use crate::credentials::SessionIdentity;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Ceiling on the ping deadline, whatever interval the server announces.
const MAX_LIVENESS: Duration = Duration::from_secs(10 * 60);

/// Outbound side of a conversation connection.
pub trait Transport: Send {
    /// Start establishing the connection. No effect once started or after close.
    fn connect(&mut self);
    fn is_connected(&self) -> bool;
    /// Send one event. Fails without queueing when the connection is not up.
    fn emit(&self, event: ClientEvent) -> Result<(), TransportError>;
    /// Shut the connection down. Calling it again does nothing.
    fn close(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("transport closed")]
    Closed,
}

/// What the transport task reports to the session owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    /// A connection attempt failed (timeout, refused, or rejected by the server). `attempt` is 1-based.
    ConnectError { message: String, attempt: u32 },
    Server(ServerEvent),
}

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("websocket: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("packet: {0}")]
    Packet(#[from] PacketError),
    #[error("connection closed during handshake")]
    ClosedDuringHandshake,
    #[error("expected engine.io open packet")]
    ExpectedOpen,
    #[error("connect rejected: {0}")]
    Rejected(String),
    #[error("invalid socket url: {0}")]
    Url(String),
}

/// Connection settings for [`SocketIoTransport`].
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub url: String,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

/// Build the websocket URL: `ws(s)://host/socket.io/?EIO=4&transport=websocket&userEmail=..&patientId=..`.
pub fn socket_url(
    base_url: &str,
    socket_path: &str,
    identity: &SessionIdentity,
) -> Result<String, SocketError> {
    let mut url =
        reqwest::Url::parse(base_url).map_err(|e| SocketError::Url(format!("{}: {}", base_url, e)))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| SocketError::Url(format!("cannot use {} scheme for {}", scheme, base_url)))?;
    let path = format!("/{}/", socket_path.trim_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket")
        .append_pair("userEmail", identity.user_email())
        .append_pair("patientId", &identity.patient_id().to_string());
    Ok(url.to_string())
}

/// Websocket-backed [`Transport`]. Dropping it shuts the background task down.
pub struct SocketIoTransport {
    runtime: Handle,
    options: SocketOptions,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    connected: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    closed: bool,
}

impl SocketIoTransport {
    /// Idle transport; nothing happens until [`Transport::connect`]. Events are delivered on `events`.
    pub fn new(
        runtime: Handle,
        options: SocketOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            runtime,
            options,
            events,
            outbound: None,
            connected: Arc::new(AtomicBool::new(false)),
            shutdown: None,
            closed: false,
        }
    }
}

impl Transport for SocketIoTransport {
    fn connect(&mut self) {
        if self.closed || self.shutdown.is_some() {
            return;
        }
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        log::debug!("socket: connecting to {}", self.options.url);
        self.runtime.spawn(run_socket(
            self.options.clone(),
            outbound_rx,
            shutdown_rx,
            self.connected.clone(),
            self.events.clone(),
        ));
        self.outbound = Some(outbound);
        self.shutdown = Some(shutdown);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, event: ClientEvent) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let Some(outbound) = &self.outbound else {
            return Err(TransportError::NotConnected);
        };
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        outbound
            .send(event.to_packet().to_engine_frame())
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.connected.store(false, Ordering::SeqCst);
        // The task sends a Socket.IO disconnect on its way out.
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.outbound = None;
        log::debug!("socket: closed");
    }
}

impl Drop for SocketIoTransport {
    fn drop(&mut self) {
        self.close();
    }
}

enum PumpEnd {
    Shutdown,
    Lost(String),
}

async fn run_socket(
    options: SocketOptions,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        let opened = tokio::select! {
            _ = &mut shutdown_rx => break,
            r = tokio::time::timeout(options.connect_timeout, open_session(&options.url)) => r,
        };
        let failure = match opened {
            Ok(Ok((ws, handshake))) => {
                attempt = 0;
                connected.store(true, Ordering::SeqCst);
                log::info!("socket: connected (sid {})", handshake.sid);
                if events.send(TransportEvent::Connected).is_err() {
                    break;
                }
                let end = pump(ws, &handshake, &mut outbound_rx, &mut shutdown_rx, &events).await;
                connected.store(false, Ordering::SeqCst);
                match end {
                    PumpEnd::Shutdown => break,
                    PumpEnd::Lost(reason) => {
                        log::warn!("socket: connection lost: {}", reason);
                        if events.send(TransportEvent::Disconnected { reason }).is_err() {
                            break;
                        }
                        None
                    }
                }
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "timed out after {} ms",
                options.connect_timeout.as_millis()
            )),
        };

        let delay = match failure {
            Some(message) => {
                log::error!("socket: connection error (attempt {}): {}", attempt, message);
                if events
                    .send(TransportEvent::ConnectError { message, attempt })
                    .is_err()
                {
                    break;
                }
                options.retry.backoff(attempt)
            }
            None => options.retry.backoff(1),
        };
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    connected.store(false, Ordering::SeqCst);
    log::debug!("socket: task finished");
}

/// Open the websocket, read the Engine.IO open packet, and complete the Socket.IO connect.
async fn open_session(url: &str) -> Result<(WsStream, OpenHandshake), SocketError> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await?;

    let handshake = match next_engine_packet(&mut ws).await? {
        EnginePacket::Open(h) => h,
        _ => return Err(SocketError::ExpectedOpen),
    };

    ws.send(Message::Text(SocketPacket::connect().to_engine_frame()))
        .await?;

    loop {
        match next_engine_packet(&mut ws).await? {
            EnginePacket::Ping(p) => {
                ws.send(Message::Text(EnginePacket::Pong(p).encode())).await?;
            }
            EnginePacket::Message(m) => match SocketPacket::decode(&m)? {
                SocketPacket::Connect { .. } => return Ok((ws, handshake)),
                SocketPacket::ConnectError { data, .. } => {
                    return Err(SocketError::Rejected(connect_error_message(data.as_ref())));
                }
                other => log::debug!("socket: ignoring packet before connect: {:?}", other),
            },
            EnginePacket::Close => return Err(SocketError::ClosedDuringHandshake),
            _ => {}
        }
    }
}

async fn next_engine_packet(ws: &mut WsStream) -> Result<EnginePacket, SocketError> {
    loop {
        match ws.next().await {
            None => return Err(SocketError::ClosedDuringHandshake),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => return Ok(EnginePacket::decode(&text)?),
            Some(Ok(Message::Close(_))) => return Err(SocketError::ClosedDuringHandshake),
            Some(Ok(_)) => continue,
        }
    }
}

fn connect_error_message(data: Option<&serde_json::Value>) -> String {
    data.and_then(|d| d.get("message").and_then(|m| m.as_str()).map(String::from))
        .or_else(|| data.map(|d| d.to_string()))
        .unwrap_or_else(|| "connect_error".to_string())
}

/// Time allowed between pings before the connection counts as lost.
fn liveness(handshake: &OpenHandshake) -> Duration {
    Duration::from_millis(handshake.ping_interval.saturating_add(handshake.ping_timeout))
        .min(MAX_LIVENESS)
}

async fn disconnect(ws: &mut WsStream) {
    let _ = ws
        .send(Message::Text(
            SocketPacket::Disconnect { namespace: "/".to_string() }.to_engine_frame(),
        ))
        .await;
    let _ = ws.close(None).await;
}

/// Relay frames until shutdown or connection loss.
async fn pump(
    mut ws: WsStream,
    handshake: &OpenHandshake,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    shutdown_rx: &mut oneshot::Receiver<()>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> PumpEnd {
    let liveness = liveness(handshake);
    let mut deadline = Instant::now() + liveness;

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                disconnect(&mut ws).await;
                return PumpEnd::Shutdown;
            }
            _ = tokio::time::sleep_until(deadline) => {
                return PumpEnd::Lost("ping timeout".to_string());
            }
            out = outbound_rx.recv() => {
                let Some(frame) = out else {
                    disconnect(&mut ws).await;
                    return PumpEnd::Shutdown;
                };
                if let Err(e) = ws.send(Message::Text(frame)).await {
                    return PumpEnd::Lost(e.to_string());
                }
            }
            msg = ws.next() => {
                let text = match msg {
                    None => return PumpEnd::Lost("connection closed".to_string()),
                    Some(Err(e)) => return PumpEnd::Lost(e.to_string()),
                    Some(Ok(Message::Close(_))) => return PumpEnd::Lost("closed by server".to_string()),
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                };
                let packet = match EnginePacket::decode(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        log::warn!("socket: dropping frame {:?}: {}", text, e);
                        continue;
                    }
                };
                match packet {
                    EnginePacket::Ping(p) => {
                        deadline = Instant::now() + liveness;
                        if let Err(e) = ws.send(Message::Text(EnginePacket::Pong(p).encode())).await {
                            return PumpEnd::Lost(e.to_string());
                        }
                    }
                    EnginePacket::Close => return PumpEnd::Lost("engine.io close".to_string()),
                    EnginePacket::Message(m) => {
                        if let Some(end) = handle_socket_packet(&m, events) {
                            return end;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

fn handle_socket_packet(
    text: &str,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Option<PumpEnd> {
    let packet = match SocketPacket::decode(text) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("socket: dropping packet {:?}: {}", text, e);
            return None;
        }
    };
    match packet {
        SocketPacket::Event { data, .. } => match ServerEvent::from_event_data(&data) {
            Ok(ev) => {
                if events.send(TransportEvent::Server(ev)).is_err() {
                    return Some(PumpEnd::Shutdown);
                }
            }
            Err(e) => log::warn!("socket: rejected event {}: {}", data, e),
        },
        SocketPacket::Disconnect { .. } => {
            return Some(PumpEnd::Lost("disconnected by server".to_string()));
        }
        SocketPacket::ConnectError { data, .. } => {
            return Some(PumpEnd::Lost(connect_error_message(data.as_ref())));
        }
        other => log::debug!("socket: ignoring packet {:?}", other),
    }
    None
}
