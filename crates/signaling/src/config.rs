//! Configuration for the signaling channel

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection settings for the signaling hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Hub endpoint URL (ws:// or wss://)
    pub hub_url: String,

    /// Bearer token presented during the WebSocket handshake
    pub access_token: Option<String>,

    /// A connection with no inbound traffic for this long is treated as
    /// lost (default: 60000 ms)
    pub server_timeout_ms: u64,

    /// Interval between keep-alive pings (default: 30000 ms)
    pub keep_alive_ms: u64,

    /// Hard deadline on a single connect attempt (default: 15000 ms)
    pub connect_timeout_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://localhost:5000/hub".to_string(),
            access_token: None,
            server_timeout_ms: 60_000,
            keep_alive_ms: 30_000,
            connect_timeout_ms: 15_000,
        }
    }
}

impl SignalingConfig {
    /// Server timeout as a [`Duration`]
    pub fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }

    /// Keep-alive interval as a [`Duration`]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// Connect deadline as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `hub_url` is not a ws:// or wss:// URL
    /// - `connect_timeout_ms` or `keep_alive_ms` is zero
    /// - `keep_alive_ms` is not smaller than `server_timeout_ms`
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.hub_url.starts_with("ws://") && !self.hub_url.starts_with("wss://") {
            return Err(Error::InvalidArgument(format!(
                "hub_url must start with ws:// or wss://, got {}",
                self.hub_url
            )));
        }

        if self.connect_timeout_ms == 0 {
            return Err(Error::InvalidArgument(
                "connect_timeout_ms must be non-zero".to_string(),
            ));
        }

        if self.keep_alive_ms == 0 {
            return Err(Error::InvalidArgument(
                "keep_alive_ms must be non-zero".to_string(),
            ));
        }

        if self.keep_alive_ms >= self.server_timeout_ms {
            return Err(Error::InvalidArgument(format!(
                "keep_alive_ms ({}) must be smaller than server_timeout_ms ({})",
                self.keep_alive_ms, self.server_timeout_ms
            )));
        }

        Ok(())
    }
}
