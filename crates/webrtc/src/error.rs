//! Error types for the call engine

use std::fmt;

use thiserror::Error;

/// Result type alias for call engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while negotiating or running a call
#[derive(Debug, Error)]
pub enum Error {
    /// Failure surfaced by the signaling channel
    #[error("signaling error: {0}")]
    Signaling(#[from] paircall_signaling::Error),

    /// A negotiation step failed; collision discards are not errors
    #[error("negotiation failed while {phase}: {message}")]
    Negotiation {
        /// Step that failed
        phase: NegotiationFailurePhase,
        /// Underlying failure text
        message: String,
    },

    /// A remote ICE candidate could not be applied
    #[error("failed to apply ICE candidate: {0}")]
    IceApply(String),

    /// Media capture or track handling failed
    #[error("media error: {0}")]
    Media(String),

    /// `initialize_connection` was called while a session is live
    #[error("a call session is already active")]
    SessionActive,

    /// The operation needs a live call session
    #[error("no call session is active")]
    NoSession,

    /// Failure inside the peer-connection backend
    #[error("peer backend error: {0}")]
    Backend(String),

    /// Configuration was rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The server completed an invocation with a payload this client
    /// cannot use
    #[error("unexpected {method} reply: {reply}")]
    UnexpectedReply {
        /// Hub method that was invoked
        method: String,
        /// Reply payload rendered as text
        reply: String,
    },

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The engine task is gone
    #[error("engine is shut down")]
    EngineClosed,
}

/// Negotiation step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationFailurePhase {
    /// `create_offer`
    CreatingOffer,
    /// `set_local_description`
    ApplyingLocalDescription,
    /// `set_remote_description`
    ApplyingRemoteDescription,
    /// `create_answer`
    CreatingAnswer,
}

impl fmt::Display for NegotiationFailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationFailurePhase::CreatingOffer => "creating offer",
            NegotiationFailurePhase::ApplyingLocalDescription => "applying local description",
            NegotiationFailurePhase::ApplyingRemoteDescription => "applying remote description",
            NegotiationFailurePhase::CreatingAnswer => "creating answer",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Wrap a backend failure as a negotiation-step failure
    pub(crate) fn negotiation(phase: NegotiationFailurePhase, source: impl fmt::Display) -> Self {
        Error::Negotiation {
            phase,
            message: source.to_string(),
        }
    }
}
