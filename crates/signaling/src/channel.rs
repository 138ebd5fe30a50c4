//! Signaling channel: one logical hub connection plus a typed
//! publish/subscribe surface over it
//!
//! The channel owns connection lifecycle (connect with a hard deadline,
//! bounded manual reconnection on failure, explicit stop), the
//! subscription registry, group membership replay, and request/response
//! invocation of hub methods. It knows nothing about WebRTC.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::{MANUAL_RECONNECT_DELAY, MAX_MANUAL_RECONNECT_ATTEMPTS};
use crate::config::SignalingConfig;
use crate::events::{EventKind, ServerEvent};
use crate::methods;
use crate::registry::{EventHandler, SubscriptionRegistry};
use crate::transport::{
    ConnectionStatus, HubConnector, HubTransport, TransportEvent, WebSocketConnector,
};
use crate::{Error, Result};

/// Typed signaling channel over a hub connection
pub struct SignalingChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    config: SignalingConfig,
    connector: Arc<dyn HubConnector>,
    transport: Mutex<Option<Arc<dyn HubTransport>>>,
    registry: Mutex<SubscriptionRegistry>,
    groups: Mutex<Vec<String>>,
    reconnect_attempts: AtomicU32,
    stopping: AtomicBool,
    starting: AtomicBool,
    reconnect_loop_running: AtomicBool,
    events_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingChannel {
    /// Create a channel using `connector` for transport establishment
    pub fn new(config: SignalingConfig, connector: Arc<dyn HubConnector>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ChannelInner {
                config,
                connector,
                transport: Mutex::new(None),
                registry: Mutex::new(SubscriptionRegistry::new()),
                groups: Mutex::new(Vec::new()),
                reconnect_attempts: AtomicU32::new(0),
                stopping: AtomicBool::new(false),
                starting: AtomicBool::new(false),
                reconnect_loop_running: AtomicBool::new(false),
                events_tx: Mutex::new(None),
                dispatch: Mutex::new(None),
            }),
        })
    }

    /// Create a channel over the production WebSocket transport
    pub fn websocket(config: SignalingConfig) -> Result<Self> {
        Self::new(config, Arc::new(WebSocketConnector))
    }

    /// Connect to the hub. Idempotent: a channel that is already
    /// connecting, connected, or auto-reconnecting is left alone.
    ///
    /// The attempt is bounded by the configured connect deadline. On
    /// failure an `InitialConnectionFailed` event fires, the bounded
    /// manual reconnect loop starts in the background, and the error is
    /// returned to the caller.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;

        if let Some(transport) = inner.transport.lock().clone() {
            match transport.status() {
                ConnectionStatus::Connecting
                | ConnectionStatus::Connected
                | ConnectionStatus::Reconnecting => return Ok(()),
                _ => {}
            }
        }

        if inner.starting.swap(true, Ordering::SeqCst) {
            // Another start() is mid-connect.
            return Ok(());
        }

        inner.stopping.store(false, Ordering::SeqCst);
        ensure_dispatch(inner);

        let outcome = inner.connect_once().await;
        inner.starting.store(false, Ordering::SeqCst);

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("signaling: initial connection failed: {}", e);
                inner.emit(&ServerEvent::InitialConnectionFailed(e.to_string()));
                spawn_manual_reconnect(inner);
                Err(e)
            }
        }
    }

    /// Tear the channel down. Idempotent; after return no subscription
    /// sees any further event.
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.stopping.store(true, Ordering::SeqCst);

        let transport = inner.transport.lock().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.stop().await {
                warn!("signaling: error stopping connection: {}", e);
            } else {
                info!("signaling: connection stopped");
            }
        }

        if let Some(handle) = inner.dispatch.lock().take() {
            handle.abort();
        }
        inner.events_tx.lock().take();
        inner.registry.lock().clear();
    }

    /// Current channel liveness
    pub fn status(&self) -> ConnectionStatus {
        self.inner
            .transport
            .lock()
            .as_ref()
            .map(|t| t.status())
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    /// Identifier of the current physical connection, when connected
    pub fn connection_id(&self) -> Option<String> {
        self.inner
            .transport
            .lock()
            .as_ref()
            .and_then(|t| t.connection_id())
    }

    /// Call a hub method and await its result
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        debug!("signaling: invoke {}", method);
        self.inner.invoke_raw(method, args).await
    }

    /// Call a hub method without awaiting a result
    pub async fn send(&self, method: &str, args: Vec<Value>) -> Result<()> {
        debug!("signaling: send {}", method);
        let transport = self.inner.connected_transport()?;
        transport.send(method, args).await
    }

    /// Register `handler` for events of `kind`
    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        self.inner.registry.lock().subscribe(kind, handler);
    }

    /// Deregister `handler` from events of `kind`; the handle must be the
    /// one used to subscribe
    pub fn off(&self, kind: EventKind, handler: &EventHandler) {
        self.inner.registry.lock().unsubscribe(kind, handler);
    }

    /// Register `handler` for a single delivery. The wrapper deregisters
    /// itself before invoking the callback, so a panicking callback
    /// cannot fire twice.
    pub fn once(&self, kind: EventKind, handler: EventHandler) {
        let weak = Arc::downgrade(&self.inner);
        let own_handle: Arc<Mutex<Option<EventHandler>>> = Arc::new(Mutex::new(None));
        let own_handle_ref = Arc::clone(&own_handle);
        let callback = Mutex::new(Some(handler));

        let wrapper: EventHandler = Arc::new(move |event: &ServerEvent| {
            if let Some(inner) = weak.upgrade() {
                if let Some(this) = own_handle_ref.lock().clone() {
                    inner.registry.lock().unsubscribe(event.kind(), &this);
                }
            }
            if let Some(cb) = callback.lock().take() {
                cb(event);
            }
        });

        *own_handle.lock() = Some(Arc::clone(&wrapper));
        self.inner.registry.lock().subscribe(kind, wrapper);
    }

    /// Join a server-side group. Returns `false` on failure or while
    /// disconnected; the cause is logged, never thrown.
    pub async fn join_group(&self, name: &str) -> bool {
        if name.trim().is_empty() {
            warn!("signaling: cannot join group - empty name");
            return false;
        }
        match self
            .inner
            .invoke_raw(methods::hub::ADD_TO_GROUP, vec![json!(name)])
            .await
        {
            Ok(_) => {
                let mut groups = self.inner.groups.lock();
                if !groups.iter().any(|g| g == name) {
                    groups.push(name.to_string());
                }
                info!("signaling: joined group {}", name);
                true
            }
            Err(e) => {
                let failure = Error::GroupOperation {
                    group: name.to_string(),
                    message: e.to_string(),
                };
                warn!("signaling: {}", failure);
                false
            }
        }
    }

    /// Leave a server-side group. Returns `false` on failure or while
    /// disconnected; the cause is logged, never thrown.
    pub async fn leave_group(&self, name: &str) -> bool {
        if name.trim().is_empty() {
            warn!("signaling: cannot leave group - empty name");
            return false;
        }
        match self
            .inner
            .invoke_raw(methods::hub::REMOVE_FROM_GROUP, vec![json!(name)])
            .await
        {
            Ok(_) => {
                self.inner.groups.lock().retain(|g| g != name);
                info!("signaling: left group {}", name);
                true
            }
            Err(e) => {
                let failure = Error::GroupOperation {
                    group: name.to_string(),
                    message: e.to_string(),
                };
                warn!("signaling: {}", failure);
                false
            }
        }
    }

    /// Groups this client currently believes it has joined
    pub fn groups(&self) -> Vec<String> {
        self.inner.groups.lock().clone()
    }
}

impl ChannelInner {
    fn events_sender(&self) -> Result<mpsc::UnboundedSender<TransportEvent>> {
        self.events_tx.lock().clone().ok_or(Error::NotInitialized)
    }

    /// One bounded connect attempt; installs the transport on success.
    async fn connect_once(&self) -> Result<()> {
        let deadline = self.config.connect_timeout();
        let events = self.events_sender()?;
        let transport = tokio::time::timeout(deadline, self.connector.connect(&self.config, events))
            .await
            .map_err(|_| Error::ConnectTimeout(deadline))??;

        *self.transport.lock() = Some(transport);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.emit(&ServerEvent::Connected);
        Ok(())
    }

    fn current_status(&self) -> ConnectionStatus {
        self.transport
            .lock()
            .as_ref()
            .map(|t| t.status())
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    fn connected_transport(&self) -> Result<Arc<dyn HubTransport>> {
        let transport = self.transport.lock().clone().ok_or(Error::NotInitialized)?;
        let status = transport.status();
        if status != ConnectionStatus::Connected {
            return Err(Error::NotConnected(status));
        }
        Ok(transport)
    }

    async fn invoke_raw(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let transport = self.connected_transport()?;
        transport.invoke(method, args).await
    }

    /// Re-submit every tracked group; the server forgets membership
    /// across reconnects.
    async fn replay_groups(&self) {
        let groups = self.groups.lock().clone();
        for group in groups {
            match self
                .invoke_raw(methods::hub::ADD_TO_GROUP, vec![json!(group)])
                .await
            {
                Ok(_) => info!("signaling: rejoined group {}", group),
                Err(e) => warn!("signaling: failed to rejoin group {}: {}", group, e),
            }
        }
    }

    fn emit(&self, event: &ServerEvent) {
        debug!("signaling: dispatching {:?}", event.kind());
        let handlers = self.registry.lock().snapshot(event.kind());
        for handler in handlers {
            handler(event);
        }
    }
}

/// Lazily create the event queue and its dispatch task.
fn ensure_dispatch(inner: &Arc<ChannelInner>) -> mpsc::UnboundedSender<TransportEvent> {
    let mut tx_guard = inner.events_tx.lock();
    if let Some(tx) = tx_guard.as_ref() {
        return tx.clone();
    }
    let (tx, rx) = mpsc::unbounded_channel();
    *tx_guard = Some(tx.clone());
    let task_inner = Arc::clone(inner);
    *inner.dispatch.lock() = Some(tokio::spawn(dispatch_loop(task_inner, rx)));
    tx
}

/// Bounded recovery loop: up to five attempts, five seconds apart.
fn spawn_manual_reconnect(inner: &Arc<ChannelInner>) {
    if inner.reconnect_loop_running.swap(true, Ordering::SeqCst) {
        return;
    }
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        loop {
            let attempts = inner.reconnect_attempts.load(Ordering::SeqCst);
            if attempts >= MAX_MANUAL_RECONNECT_ATTEMPTS {
                warn!("signaling: max reconnection attempts reached");
                inner.emit(&ServerEvent::MaxReconnectAttemptsReached);
                break;
            }
            inner.reconnect_attempts.store(attempts + 1, Ordering::SeqCst);
            info!(
                "signaling: reconnection attempt {}/{}",
                attempts + 1,
                MAX_MANUAL_RECONNECT_ATTEMPTS
            );

            tokio::time::sleep(MANUAL_RECONNECT_DELAY).await;
            if inner.stopping.load(Ordering::SeqCst) {
                break;
            }
            if inner.current_status() == ConnectionStatus::Connected {
                break;
            }

            match inner.connect_once().await {
                Ok(()) => break,
                Err(e) => {
                    warn!("signaling: reconnection attempt failed: {}", e);
                    inner.emit(&ServerEvent::InitialConnectionFailed(e.to_string()));
                }
            }
        }
        inner.reconnect_loop_running.store(false, Ordering::SeqCst);
    });
}

/// Consume transport events in arrival order and fan them out.
async fn dispatch_loop(
    inner: Arc<ChannelInner>,
    mut rx: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = rx.recv().await {
        if inner.stopping.load(Ordering::SeqCst) {
            continue;
        }
        match event {
            TransportEvent::Push { method, args } => {
                if let Some(event) = ServerEvent::from_push(&method, args) {
                    inner.emit(&event);
                }
            }
            TransportEvent::Closed { error } => {
                let abnormal = error.is_some();
                inner.emit(&ServerEvent::Disconnected(error));
                if abnormal && !inner.stopping.load(Ordering::SeqCst) {
                    spawn_manual_reconnect(&inner);
                }
            }
            TransportEvent::Reconnecting { error } => {
                inner.emit(&ServerEvent::Reconnecting(error));
            }
            TransportEvent::Reconnected { connection_id } => {
                inner.reconnect_attempts.store(0, Ordering::SeqCst);
                inner.replay_groups().await;
                inner.emit(&ServerEvent::Reconnected(connection_id));
            }
        }
    }
}
