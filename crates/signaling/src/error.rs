//! Error types for the signaling channel

use std::time::Duration;

use thiserror::Error;

use crate::transport::ConnectionStatus;

/// Result type alias for signaling operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while talking to the signaling hub
#[derive(Debug, Error)]
pub enum Error {
    /// No transport exists; `start()` has not produced a connection yet
    #[error("hub connection is not initialized")]
    NotInitialized,

    /// A transport exists but is not currently connected
    #[error("hub connection is not connected (current status: {0})")]
    NotConnected(ConnectionStatus),

    /// Caller-supplied argument was rejected
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The initial connect attempt exceeded its hard deadline
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The bounded manual reconnect loop gave up
    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    /// Socket- or protocol-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// A group membership operation failed; surfaced to callers as
    /// `false`, never thrown
    #[error("group operation failed for {group}: {message}")]
    GroupOperation {
        /// Group the operation targeted
        group: String,
        /// Underlying failure text
        message: String,
    },

    /// The server completed an invocation with an error
    #[error("server rejected invocation of {method}: {message}")]
    Rpc {
        /// Hub method that was invoked
        method: String,
        /// Error message returned by the server
        message: String,
    },

    /// Wire payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
