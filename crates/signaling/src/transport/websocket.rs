//! WebSocket hub transport
//!
//! One [`WebSocketHub`] is one logical connection: it survives physical
//! socket loss through automatic reconnection (immediate first retry,
//! exponential backoff capped at 30 s) and only ends on an explicit
//! `stop()`. Keep-alive pings flow on the configured interval and a
//! connection with no inbound traffic for the server timeout is treated
//! as lost.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ConnectionStatus, HubConnector, HubTransport, TransportEvent};
use crate::backoff::auto_reconnect_delay;
use crate::config::SignalingConfig;
use crate::transport::protocol::{Frame, Request};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector producing WebSocket-backed hub transports
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

#[async_trait]
impl HubConnector for WebSocketConnector {
    async fn connect(
        &self,
        config: &SignalingConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn HubTransport>> {
        info!("signaling transport: connecting to {}", config.hub_url);
        let socket = open_socket(config).await?;

        let connection_id = Uuid::new_v4().to_string();
        let shared = Arc::new(HubShared {
            config: config.clone(),
            status: RwLock::new(ConnectionStatus::Connected),
            connection_id: RwLock::new(Some(connection_id.clone())),
            outbound: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
            next_invocation_id: AtomicU64::new(1),
            stopping: AtomicBool::new(false),
            stop_notify: Notify::new(),
            events,
        });

        info!("signaling transport: connected as {}", connection_id);
        tokio::spawn(run(Arc::clone(&shared), socket));

        Ok(Arc::new(WebSocketHub { shared }))
    }
}

/// One logical hub connection over a WebSocket
pub struct WebSocketHub {
    shared: Arc<HubShared>,
}

struct PendingInvocation {
    method: String,
    reply: oneshot::Sender<Result<Value>>,
}

struct HubShared {
    config: SignalingConfig,
    status: RwLock<ConnectionStatus>,
    connection_id: RwLock<Option<String>>,
    /// Sender feeding the current physical socket; `None` between sockets
    outbound: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<HashMap<u64, PendingInvocation>>,
    next_invocation_id: AtomicU64,
    stopping: AtomicBool,
    stop_notify: Notify,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
impl HubTransport for WebSocketHub {
    fn status(&self) -> ConnectionStatus {
        *self.shared.status.read()
    }

    fn connection_id(&self) -> Option<String> {
        self.shared.connection_id.read().clone()
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let shared = &self.shared;
        let status = *shared.status.read();
        if status != ConnectionStatus::Connected {
            return Err(Error::NotConnected(status));
        }
        let sender = shared
            .outbound
            .read()
            .clone()
            .ok_or(Error::NotConnected(status))?;

        let id = shared.next_invocation_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        shared.pending.lock().insert(
            id,
            PendingInvocation {
                method: method.to_string(),
                reply: reply_tx,
            },
        );

        let text = serde_json::to_string(&Request::invocation(id, method, args))?;
        if sender.send(Message::Text(text)).is_err() {
            shared.pending.lock().remove(&id);
            return Err(Error::Transport(
                "connection closed while sending".to_string(),
            ));
        }

        match reply_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Transport(
                "connection lost while awaiting response".to_string(),
            )),
        }
    }

    async fn send(&self, method: &str, args: Vec<Value>) -> Result<()> {
        let shared = &self.shared;
        let status = *shared.status.read();
        if status != ConnectionStatus::Connected {
            return Err(Error::NotConnected(status));
        }
        let sender = shared
            .outbound
            .read()
            .clone()
            .ok_or(Error::NotConnected(status))?;

        let text = serde_json::to_string(&Request::notification(method, args))?;
        sender
            .send(Message::Text(text))
            .map_err(|_| Error::Transport("connection closed while sending".to_string()))
    }

    async fn stop(&self) -> Result<()> {
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        *self.shared.status.write() = ConnectionStatus::Disconnecting;
        if let Some(sender) = self.shared.outbound.read().clone() {
            let _ = sender.send(Message::Close(None));
        }
        // Permit-storing wakeup so a stop between awaits is not lost.
        self.shared.stop_notify.notify_one();
        Ok(())
    }
}

impl HubShared {
    fn set_status(&self, status: ConnectionStatus) {
        *self.status.write() = status;
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Fail every invocation still awaiting a completion.
    fn fail_pending(&self) {
        let drained: Vec<PendingInvocation> =
            self.pending.lock().drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            debug!(
                "signaling transport: failing pending invocation of {}",
                entry.method
            );
            let _ = entry
                .reply
                .send(Err(Error::Transport("connection lost".to_string())));
        }
    }

    fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<Frame>(text) {
            Ok(Frame::Response(response)) => {
                let entry = self.pending.lock().remove(&response.id);
                match entry {
                    Some(PendingInvocation { method, reply }) => {
                        let outcome = match response.error {
                            Some(error) => Err(Error::Rpc {
                                method,
                                message: error.message,
                            }),
                            None => Ok(response.result.unwrap_or(Value::Null)),
                        };
                        let _ = reply.send(outcome);
                    }
                    None => {
                        warn!(
                            "signaling transport: completion for unknown invocation {}",
                            response.id
                        );
                    }
                }
            }
            Ok(Frame::Request(request)) => {
                if request.id.is_some() {
                    warn!(
                        "signaling transport: server invocation {} not supported",
                        request.method
                    );
                    return;
                }
                let _ = self.events.send(TransportEvent::Push {
                    method: request.method,
                    args: request.params,
                });
            }
            Err(e) => warn!("signaling transport: unparseable frame: {}", e),
        }
    }

    /// Read frames until the socket dies or a stop is requested.
    ///
    /// Returns `None` for a requested stop, otherwise the failure text.
    async fn read_frames(&self, stream: &mut SplitStream<WsStream>) -> Option<String> {
        let idle = self.config.server_timeout();
        loop {
            tokio::select! {
                _ = self.stop_notify.notified() => return None,
                next = tokio::time::timeout(idle, stream.next()) => match next {
                    Err(_) => {
                        return Some(format!(
                            "no traffic from server for {} ms",
                            self.config.server_timeout_ms
                        ));
                    }
                    Ok(None) => return Some("connection closed".to_string()),
                    Ok(Some(Err(e))) => return Some(e.to_string()),
                    Ok(Some(Ok(message))) => match message {
                        Message::Text(text) => self.handle_frame(&text),
                        Message::Close(frame) => {
                            if self.is_stopping() {
                                return None;
                            }
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "closed by server".to_string());
                            return Some(reason);
                        }
                        // Any inbound frame resets the idle clock; pings are
                        // answered when the sink next flushes.
                        _ => {}
                    },
                },
            }
        }
    }
}

/// Drive one logical connection across physical socket generations.
async fn run(shared: Arc<HubShared>, mut socket: WsStream) {
    loop {
        let (sink, mut stream) = socket.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
        *shared.outbound.write() = Some(out_tx.clone());
        let sender = tokio::spawn(sender_task(sink, out_rx));
        let keepalive = tokio::spawn(keepalive_task(out_tx, shared.config.keep_alive()));

        let failure = shared.read_frames(&mut stream).await;

        keepalive.abort();
        sender.abort();
        *shared.outbound.write() = None;
        shared.fail_pending();

        if shared.is_stopping() || failure.is_none() {
            shared.set_status(ConnectionStatus::Disconnected);
            *shared.connection_id.write() = None;
            let _ = shared.events.send(TransportEvent::Closed { error: None });
            debug!("signaling transport: stopped");
            return;
        }

        let reason = failure.unwrap_or_default();
        warn!("signaling transport: connection lost: {}", reason);
        shared.set_status(ConnectionStatus::Reconnecting);
        *shared.connection_id.write() = None;
        let _ = shared.events.send(TransportEvent::Reconnecting {
            error: Some(reason),
        });

        let mut attempt = 0u32;
        socket = loop {
            tokio::select! {
                _ = shared.stop_notify.notified() => {}
                _ = tokio::time::sleep(auto_reconnect_delay(attempt)) => {}
            }
            if shared.is_stopping() {
                shared.set_status(ConnectionStatus::Disconnected);
                let _ = shared.events.send(TransportEvent::Closed { error: None });
                return;
            }
            match open_socket(&shared.config).await {
                Ok(socket) => break socket,
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    debug!(
                        "signaling transport: reconnect attempt {} failed: {}",
                        attempt, e
                    );
                }
            }
        };

        if shared.is_stopping() {
            shared.set_status(ConnectionStatus::Disconnected);
            let _ = shared.events.send(TransportEvent::Closed { error: None });
            return;
        }

        let connection_id = Uuid::new_v4().to_string();
        *shared.connection_id.write() = Some(connection_id.clone());
        shared.set_status(ConnectionStatus::Connected);
        info!("signaling transport: reconnected as {}", connection_id);
        let _ = shared
            .events
            .send(TransportEvent::Reconnected { connection_id });
    }
}

/// Forward outbound messages to the socket; a `Close` ends the task.
async fn sender_task(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let is_close = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!("signaling transport: send failed: {}", e);
            break;
        }
        if is_close {
            break;
        }
    }
    debug!("signaling transport: sender task terminated");
}

async fn keepalive_task(out: mpsc::UnboundedSender<Message>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the socket just connected.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if out.send(Message::Ping(Vec::new())).is_err() {
            break;
        }
    }
}

async fn open_socket(config: &SignalingConfig) -> Result<WsStream> {
    let mut request = config
        .hub_url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Transport(format!("invalid hub url: {}", e)))?;

    if let Some(token) = &config.access_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| Error::InvalidArgument(format!("access token not header-safe: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (socket, _response) = connect_async(request)
        .await
        .map_err(|e| Error::Transport(format!("failed to connect: {}", e)))?;
    Ok(socket)
}
