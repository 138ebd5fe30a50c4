//! Configuration for the call engine

use serde::{Deserialize, Serialize};

use crate::media::MediaConstraints;

/// ICE server entry (STUN or TURN)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs (stun:, turn: or turns:)
    pub urls: Vec<String>,
    /// Username for TURN authentication
    #[serde(default)]
    pub username: Option<String>,
    /// Credential for TURN authentication
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// STUN-only entry without credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Settings for one call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// ICE servers handed to the peer connection
    pub ice_servers: Vec<IceServerConfig>,
    /// Local capture constraints
    pub constraints: MediaConstraints,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig::stun("stun:stun.l.google.com:19302")],
            constraints: MediaConstraints::default(),
        }
    }
}

impl CallConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if no ICE server is configured or an entry has no
    /// URL or a URL with an unknown scheme.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.ice_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one ICE server is required".to_string(),
            ));
        }

        for server in &self.ice_servers {
            if server.urls.is_empty() {
                return Err(Error::InvalidConfig(
                    "ICE server entry has no URLs".to_string(),
                ));
            }
            for url in &server.urls {
                if !url.starts_with("stun:")
                    && !url.starts_with("turn:")
                    && !url.starts_with("turns:")
                {
                    return Err(Error::InvalidConfig(format!(
                        "ICE server URL must be stun:, turn: or turns:, got {}",
                        url
                    )));
                }
            }
        }

        Ok(())
    }
}
