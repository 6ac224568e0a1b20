//! Data channel throughput monitoring
//!
//! Polls cumulative counters from the receiving endpoint on a fixed cadence,
//! independent of the transmit cadence, and turns successive deltas into a
//! kbit/s rate.
//!
//! Each monitored counter keeps its own baseline value and timestamp, so
//! tracking several counters never mixes their deltas. With the single default
//! counter this is the same as one shared baseline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

/// Counter the monitor tracks unless configured otherwise
pub const BYTES_RECEIVED: &str = "bytesReceived";

/// Counters a [`StatsSource`] may expose for a data channel
pub const KNOWN_COUNTERS: [&str; 4] = [
    BYTES_RECEIVED,
    "bytesSent",
    "messagesReceived",
    "messagesSent",
];

/// Kind of a statistics report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    DataChannel,
    Other,
}

/// One statistics report with its numeric counters
#[derive(Debug, Clone)]
pub struct StatsEntry {
    pub id: String,
    pub kind: ReportKind,
    pub counters: Vec<(String, u64)>,
}

/// Anything that can be polled for statistics reports
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn stats(&self) -> Result<Vec<StatsEntry>>;
}

/// Observed value of one counter
#[derive(Debug, Clone, Copy)]
struct RateSample {
    value: u64,
    at: Instant,
}

/// Computed rate for one counter
#[derive(Debug, Clone, Serialize)]
pub struct RateReport {
    pub counter: String,
    pub kbps: f64,
}

impl std::fmt::Display for RateReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.counter == BYTES_RECEIVED {
            write!(f, "kilobit rate: {:.2} kb/s", self.kbps)
        } else {
            write!(f, "{}: {:.2} kb/s", self.counter, self.kbps)
        }
    }
}

/// Rate computation over successive polls
///
/// Keeps one baseline sample per counter; there is no history.
#[derive(Debug)]
pub struct ThroughputMonitor {
    monitored: Vec<String>,
    started_at: Option<Instant>,
    previous: HashMap<String, RateSample>,
}

impl ThroughputMonitor {
    pub fn new(monitored: Vec<String>) -> Self {
        Self {
            monitored,
            started_at: None,
            previous: HashMap::new(),
        }
    }

    /// Set the baseline timestamp; counters start from zero at this instant
    pub fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.previous.clear();
    }

    /// Process one poll's reports
    pub fn observe(&mut self, reports: &[StatsEntry], now: Instant) -> Result<Vec<RateReport>> {
        let started_at = self
            .started_at
            .ok_or_else(|| AppError::Stats("monitor not started".to_string()))?;

        let mut taken: HashSet<&str> = HashSet::new();
        let mut rates = Vec::new();

        for report in reports.iter().filter(|r| r.kind == ReportKind::DataChannel) {
            for (name, value) in &report.counters {
                if !self.monitored.iter().any(|m| m == name) {
                    continue;
                }
                if *value == 0 || taken.contains(name.as_str()) {
                    continue;
                }
                taken.insert(name.as_str());

                let previous = self.previous.get(name).copied().unwrap_or(RateSample {
                    value: 0,
                    at: started_at,
                });
                self.previous.insert(name.clone(), RateSample { value: *value, at: now });

                let elapsed = now.saturating_duration_since(previous.at).as_secs_f64();
                if elapsed <= 0.0 {
                    // Same instant as the baseline; nothing to divide by yet
                    continue;
                }

                let delta = value.saturating_sub(previous.value) as f64;
                rates.push(RateReport {
                    counter: name.clone(),
                    kbps: delta / elapsed / 1000.0 * 8.0,
                });
            }
        }

        Ok(rates)
    }
}

/// Poll `source` every `period` until cancelled
///
/// The latest rate is published on the returned watch channel.
pub fn spawn_monitor(
    source: Arc<dyn StatsSource>,
    mut monitor: ThroughputMonitor,
    period: Duration,
    cancel: CancellationToken,
) -> (JoinHandle<()>, watch::Receiver<Option<RateReport>>) {
    let (rate_tx, rate_rx) = watch::channel(None);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        monitor.start(Instant::now());
        info!("Throughput monitor started ({:?} period)", period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let reports = match source.stats().await {
                Ok(reports) => reports,
                Err(e) => {
                    warn!("Failed to collect stats: {}", e);
                    continue;
                }
            };

            match monitor.observe(&reports, Instant::now()) {
                Ok(rates) => {
                    for rate in rates {
                        debug!("{}", rate);
                        let _ = rate_tx.send(Some(rate));
                    }
                }
                Err(e) => warn!("Throughput computation failed: {}", e),
            }
        }

        info!("Throughput monitor stopped");
    });

    (handle, rate_rx)
}
