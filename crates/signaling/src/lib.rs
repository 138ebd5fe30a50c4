//! Signaling channel for paircall
//!
//! Maintains exactly one logical connection to a signaling hub and
//! provides ordered delivery of server-pushed events to subscribers,
//! plus request/response and fire-and-forget invocation of hub methods.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  SignalingChannel                                    │
//! │  ├─ SubscriptionRegistry (typed EventKind pub/sub)   │
//! │  ├─ GroupMembership (replayed on every reconnect)    │
//! │  ├─ bounded manual reconnect loop (5 × 5 s)          │
//! │  └─ HubTransport (contract)                          │
//! │      └─ WebSocketHub (JSON-RPC 2.0 over WebSocket,   │
//! │         keep-alive, automatic backoff reconnection)  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The channel has no WebRTC knowledge; SDP and ICE payloads pass
//! through it as opaque typed data.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod methods;
pub mod registry;
pub mod transport;

pub use channel::SignalingChannel;
pub use config::SignalingConfig;
pub use error::{Error, Result};
pub use events::{EventKind, IceCandidate, SdpKind, ServerEvent, SessionDescription};
pub use registry::{EventHandler, SubscriptionRegistry};
pub use transport::{
    ConnectionStatus, HubConnector, HubTransport, TransportEvent, WebSocketConnector,
};
