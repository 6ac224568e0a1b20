//! WebRTC configuration

use serde::{Deserialize, Serialize};

/// WebRTC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// Data channel label
    pub channel_label: String,
    /// ICE settings
    pub ice: IceConfig,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            channel_label: "pose-animator data channel".to_string(),
            ice: IceConfig::default(),
        }
    }
}

/// ICE configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    /// Time allowed for the channel to open after negotiation (ms)
    pub connection_timeout_ms: u64,
    /// Gather 127.0.0.1/::1 host candidates
    ///
    /// Both endpoints live in one process, so loopback is usually the
    /// most direct path (and the only one inside containers).
    pub include_loopback: bool,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 30000,
            include_loopback: true,
        }
    }
}
