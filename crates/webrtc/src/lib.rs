//! Two-party WebRTC call engine for paircall
//!
//! Establishes, renegotiates and tears down a single peer connection
//! between the two participants of a named room, exchanging session
//! descriptions and ICE candidates over a
//! [`SignalingChannel`](paircall_signaling::SignalingChannel).
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  NegotiationEngine (actor task, one CallSession)      │
//! │  ├─ perfect negotiation (polite side yields)          │
//! │  ├─ candidate queue (buffered until remote SDP)       │
//! │  ├─ PeerConnection contract ── rtc backend (webrtc)   │
//! │  ├─ MediaSource / LocalMedia / RemoteMedia contracts  │
//! │  └─ StatsCollector (interval QualityReports)          │
//! │     ↓ JoinRoom / SendMessage / SendIceCandidate       │
//! │  paircall-signaling                                   │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! Commands, peer-connection events and channel events all funnel into
//! one task and are processed strictly in arrival order; that
//! serialization is what keeps the negotiation flags race-free without
//! locks.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod media;
pub mod peer;
pub mod rtc;
pub mod stats;

mod session;

pub use config::{CallConfig, IceServerConfig};
pub use engine::NegotiationEngine;
pub use error::{Error, NegotiationFailurePhase, Result};
pub use media::{
    CameraFacing, LocalMedia, LocalMediaSink, MediaConstraints, MediaKind, MediaSource,
    RemoteMedia, RemoteMediaSink,
};
pub use peer::{
    IceConnectionState, IceGatheringState, PeerConnection, PeerConnectionState, PeerEvent,
    PeerEventSender, PeerFactory, SignalingState,
};
pub use session::NegotiationPhase;
pub use stats::{QualityReport, Resolution, StatsSink, StatsSnapshot, StreamQuality};
