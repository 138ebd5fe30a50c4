//! Peer-connection contract
//!
//! The engine drives an `RTCPeerConnection`-equivalent session through
//! this trait; [`crate::rtc`] implements it over the `webrtc` crate and
//! tests substitute a scripted fake.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use paircall_signaling::{IceCandidate, SessionDescription};

use crate::config::CallConfig;
use crate::media::{LocalMedia, RemoteMedia};
use crate::stats::StatsSnapshot;
use crate::Result;

/// Signaling state of the underlying connection, mirrored read-only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    /// No offer/answer exchange in progress
    Stable,
    /// A local offer was applied
    HaveLocalOffer,
    /// A remote offer was applied
    HaveRemoteOffer,
    /// A local provisional answer was applied
    HaveLocalPranswer,
    /// A remote provisional answer was applied
    HaveRemotePranswer,
    /// The connection is closed
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::HaveLocalPranswer => "have-local-pranswer",
            SignalingState::HaveRemotePranswer => "have-remote-pranswer",
            SignalingState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Overall peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    /// Freshly created
    New,
    /// Transports are being established
    Connecting,
    /// Media can flow
    Connected,
    /// A transport dropped; may recover
    Disconnected,
    /// A transport failed permanently
    Failed,
    /// The connection is closed
    Closed,
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerConnectionState::New => "new",
            PeerConnectionState::Connecting => "connecting",
            PeerConnectionState::Connected => "connected",
            PeerConnectionState::Disconnected => "disconnected",
            PeerConnectionState::Failed => "failed",
            PeerConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// ICE transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    /// Gathering or waiting for candidates
    New,
    /// Candidate pairs are being checked
    Checking,
    /// A usable pair was found
    Connected,
    /// Checking finished on every pair
    Completed,
    /// Connectivity was lost; may recover
    Disconnected,
    /// Connectivity failed permanently
    Failed,
    /// The transport is closed
    Closed,
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IceConnectionState::New => "new",
            IceConnectionState::Checking => "checking",
            IceConnectionState::Connected => "connected",
            IceConnectionState::Completed => "completed",
            IceConnectionState::Disconnected => "disconnected",
            IceConnectionState::Failed => "failed",
            IceConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// ICE candidate gathering progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    /// Gathering has not started
    New,
    /// Candidates are being gathered
    Gathering,
    /// Gathering has ended
    Complete,
}

impl fmt::Display for IceGatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IceGatheringState::New => "new",
            IceGatheringState::Gathering => "gathering",
            IceGatheringState::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Events a peer connection surfaces to the engine, in occurrence order
pub enum PeerEvent {
    /// Tracks or transceivers changed; a (re)negotiation is required
    NegotiationNeeded,
    /// A local ICE candidate was produced; `None` marks the end of
    /// gathering and is forwarded verbatim
    LocalCandidate(Option<IceCandidate>),
    /// Remote media arrived (`Some`) or went away (`None`)
    RemoteTrack(Option<Arc<dyn RemoteMedia>>),
    /// Candidate gathering progressed
    IceGatheringStateChanged(IceGatheringState),
    /// Overall connection state changed
    ConnectionStateChanged(PeerConnectionState),
}

impl PeerEvent {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            PeerEvent::NegotiationNeeded => "negotiation-needed",
            PeerEvent::LocalCandidate(_) => "local-candidate",
            PeerEvent::RemoteTrack(_) => "remote-track",
            PeerEvent::IceGatheringStateChanged(_) => "gathering-state",
            PeerEvent::ConnectionStateChanged(_) => "connection-state",
        }
    }
}

/// Channel on which a peer connection reports its events
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// One `RTCPeerConnection`-equivalent session
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create an offer describing the local session
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a local description
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote description. Accepting a remote offer while a local
    /// offer is pending rolls the local offer back first.
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Current signaling state
    fn signaling_state(&self) -> SignalingState;

    /// Whether a remote description has been applied
    async fn has_remote_description(&self) -> bool;

    /// Attach every track of `media` to the connection
    async fn attach_local_media(&self, media: Arc<dyn LocalMedia>) -> Result<()>;

    /// Detach event handlers so no callback fires into a torn-down
    /// session. Order is fixed: negotiation-needed, track, candidate,
    /// gathering-state, connection-state. Must precede [`close`].
    ///
    /// [`close`]: PeerConnection::close
    fn detach_handlers(&self);

    /// Close the connection and release its transports
    async fn close(&self) -> Result<()>;

    /// Pull a point-in-time stats sample
    async fn stats_snapshot(&self) -> Result<StatsSnapshot>;
}

/// Factory producing peer connections wired to an event channel
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Create a peer connection configured from `config`, reporting its
    /// events on `events`
    async fn create_peer(
        &self,
        config: &CallConfig,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>>;
}
