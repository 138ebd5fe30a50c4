//! Hub transport contract
//!
//! The channel consumes the underlying hub connection through these
//! traits; [`websocket`] provides the production implementation and the
//! tests substitute scripted fakes.

pub mod protocol;
pub mod websocket;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::SignalingConfig;
use crate::Result;

pub use websocket::WebSocketConnector;

/// Liveness of the hub connection; owned by the transport, read-only for
/// everything else
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection exists
    Disconnected,
    /// A connect attempt is in progress
    Connecting,
    /// The connection is usable
    Connected,
    /// A stop was requested and teardown is in progress
    Disconnecting,
    /// The connection dropped and automatic recovery is running
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnecting => "Disconnecting",
            ConnectionStatus::Reconnecting => "Reconnecting",
        };
        f.write_str(name)
    }
}

/// Notifications a transport surfaces to its owning channel, delivered in
/// arrival order
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Server-pushed notification
    Push {
        /// Event name
        method: String,
        /// Raw arguments
        args: Vec<Value>,
    },
    /// The logical connection ended; `error` is `None` for a requested
    /// stop
    Closed {
        /// Failure text when the close was not requested
        error: Option<String>,
    },
    /// The physical connection dropped and automatic recovery started
    Reconnecting {
        /// Failure text that triggered recovery
        error: Option<String>,
    },
    /// Automatic recovery produced a fresh physical connection
    Reconnected {
        /// Identifier of the new connection
        connection_id: String,
    },
}

/// One logical hub connection
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Current liveness
    fn status(&self) -> ConnectionStatus;

    /// Identifier of the current physical connection, when connected
    fn connection_id(&self) -> Option<String>;

    /// Call a hub method and await its result
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value>;

    /// Call a hub method without awaiting a result
    async fn send(&self, method: &str, args: Vec<Value>) -> Result<()>;

    /// Tear the connection down; no events fire afterwards
    async fn stop(&self) -> Result<()>;
}

/// Factory establishing logical hub connections
#[async_trait]
pub trait HubConnector: Send + Sync {
    /// Establish a connection and wire its event stream to `events`.
    ///
    /// The returned transport handles its own automatic reconnection; the
    /// caller bounds this call with its connect deadline.
    async fn connect(
        &self,
        config: &SignalingConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn HubTransport>>;
}
