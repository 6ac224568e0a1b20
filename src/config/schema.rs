use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::pose::CodecKind;
use crate::stats::{BYTES_RECEIVED, KNOWN_COUNTERS};
use crate::webrtc::WebRtcConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Pose streaming settings
    pub stream: StreamConfig,
    /// WebRTC settings
    pub webrtc: WebRtcConfig,
}

impl AppConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        let config: AppConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.stats_interval_ms == 0 {
            return Err(AppError::Config("stats_interval_ms must be positive".to_string()));
        }

        for counter in &self.stream.monitored_counters {
            if !KNOWN_COUNTERS.contains(&counter.as_str()) {
                return Err(AppError::Config(format!(
                    "unknown monitored counter '{}' (known: {})",
                    counter,
                    KNOWN_COUNTERS.join(", ")
                )));
            }
        }

        if self.webrtc.channel_label.is_empty() {
            return Err(AppError::Config("channel_label must not be empty".to_string()));
        }

        Ok(())
    }
}

/// Pose streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Wire codec
    pub codec: CodecKind,
    /// Delay between the end of one transmit tick and the next (ms)
    pub tick_interval_ms: u64,
    /// Throughput poll period (ms)
    pub stats_interval_ms: u64,
    /// Counters reported by the throughput monitor
    pub monitored_counters: Vec<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::Binary,
            tick_interval_ms: 10,
            stats_interval_ms: 100,
            monitored_counters: vec![BYTES_RECEIVED.to_string()],
        }
    }
}

impl StreamConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}
