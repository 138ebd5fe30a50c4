//! Scripted hub transport for channel tests

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;

use paircall_signaling::{
    ConnectionStatus, Error, EventHandler, EventKind, HubConnector, HubTransport, Result,
    ServerEvent, SignalingChannel, TransportEvent,
};

/// What the next `connect()` call should do
pub enum ConnectOutcome {
    /// Produce a connected fake hub
    Success,
    /// Fail with the given message
    Fail(String),
    /// Never resolve (exercises the connect deadline)
    Hang,
}

/// Connector whose behavior is scripted per attempt; defaults to success
/// once the script runs out.
#[derive(Default)]
pub struct FakeConnector {
    script: Mutex<VecDeque<ConnectOutcome>>,
    connects: AtomicUsize,
    last_hub: Mutex<Option<Arc<FakeHub>>>,
    last_events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.script.lock().extend(outcomes);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn hub(&self) -> Arc<FakeHub> {
        self.last_hub.lock().clone().expect("no hub connected yet")
    }

    /// Sender feeding the channel's dispatch loop, for simulating
    /// server pushes and lifecycle events.
    pub fn events(&self) -> mpsc::UnboundedSender<TransportEvent> {
        self.last_events
            .lock()
            .clone()
            .expect("no hub connected yet")
    }
}

#[async_trait]
impl HubConnector for FakeConnector {
    async fn connect(
        &self,
        _config: &paircall_signaling::SignalingConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn HubTransport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(ConnectOutcome::Success);
        match outcome {
            ConnectOutcome::Success => {
                let hub = Arc::new(FakeHub::new());
                *self.last_hub.lock() = Some(Arc::clone(&hub));
                *self.last_events.lock() = Some(events);
                Ok(hub)
            }
            ConnectOutcome::Fail(message) => Err(Error::Transport(message)),
            ConnectOutcome::Hang => {
                futures_util::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// In-memory hub recording invocations and answering from a script
pub struct FakeHub {
    status: RwLock<ConnectionStatus>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    replies: Mutex<HashMap<String, Value>>,
    failing: Mutex<Vec<String>>,
    stopped: AtomicBool,
}

impl FakeHub {
    fn new() -> Self {
        Self {
            status: RwLock::new(ConnectionStatus::Connected),
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            failing: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        *self.status.write() = status;
    }

    /// Script the completion value for a method
    pub fn reply_with(&self, method: &str, value: Value) {
        self.replies.lock().insert(method.to_string(), value);
    }

    /// Make invocations of a method fail
    pub fn fail_method(&self, method: &str) {
        self.failing.lock().push(method.to_string());
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HubTransport for FakeHub {
    fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    fn connection_id(&self) -> Option<String> {
        Some("fake-connection".to_string())
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let status = self.status();
        if status != ConnectionStatus::Connected {
            return Err(Error::NotConnected(status));
        }
        if self.failing.lock().iter().any(|m| m == method) {
            return Err(Error::Rpc {
                method: method.to_string(),
                message: "scripted failure".to_string(),
            });
        }
        self.calls.lock().push((method.to_string(), args));
        Ok(self
            .replies
            .lock()
            .get(method)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn send(&self, method: &str, args: Vec<Value>) -> Result<()> {
        self.invoke(method, args).await.map(|_| ())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Disconnected);
        Ok(())
    }
}

/// Collect every event of the given kinds into a receiver
pub fn record_events(
    channel: &SignalingChannel,
    kinds: &[EventKind],
) -> mpsc::UnboundedReceiver<ServerEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in kinds {
        let tx = tx.clone();
        let handler: EventHandler = Arc::new(move |event: &ServerEvent| {
            let _ = tx.send(event.clone());
        });
        channel.on(*kind, handler);
    }
    rx
}

/// Yield a few times so queued dispatch work drains
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
