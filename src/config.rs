//! Configuration types for the call session core

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for a [`SessionController`](crate::SessionController)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// STUN server URLs (may be empty for host-candidate-only loopback)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Pre-gathered ICE candidate pool size (default: 10)
    pub ice_candidate_pool_size: u8,

    /// Label of the in-band control data channel (default: "control")
    pub channel_label: String,

    /// Attach a local audio track when arming a session (default: true)
    pub enable_audio: bool,

    /// Attach a local video track when arming a session (default: true)
    pub enable_video: bool,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun1.l.google.com:19302".to_string(),
                "stun:stun2.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            ice_candidate_pool_size: 10,
            channel_label: "control".to_string(),
            enable_audio: true,
            enable_video: true,
        }
    }
}

impl CallConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.channel_label.is_empty() {
            return Err(Error::InvalidConfig(
                "channel_label must not be empty".to_string(),
            ));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun:: {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server URL must start with turn: or turns:: {}",
                    turn.url
                )));
            }
        }

        Ok(())
    }

    /// A configuration with no ICE servers, suitable for in-process tests
    /// and same-host loopback (host candidates only).
    pub fn loopback() -> Self {
        Self {
            stun_servers: Vec::new(),
            ice_candidate_pool_size: 0,
            ..Default::default()
        }
    }
}
