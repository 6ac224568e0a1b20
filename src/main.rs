use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pose_relay::config::{AppConfig, ConfigStore};
use pose_relay::pose::{self, codec_for, CodecKind, SyntheticPoseSource};
use pose_relay::stats::{spawn_monitor, ThroughputMonitor};
use pose_relay::transport::{run_sender, FrameReceiver, LogSink};
use pose_relay::webrtc::{BandwidthLimit, ChannelState, SessionBootstrap};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// pose-relay command line arguments
#[derive(Parser, Debug)]
#[command(name = "pose-relay")]
#[command(version, about = "Streams pose keypoints over a loopback WebRTC data channel", long_about = None)]
struct CliArgs {
    /// Data directory path (default: ./pose-relay-data)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Store a new bandwidth limit in kbit/s, or "unlimited"
    #[arg(short = 'b', long, value_name = "LIMIT")]
    bandwidth: Option<BandwidthLimit>,

    /// Wire codec (overrides config file)
    #[arg(long, value_name = "CODEC")]
    codec: Option<CodecKind>,

    /// Stop after sending this many frames
    #[arg(short = 'n', long, value_name = "N")]
    frames: Option<u64>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting pose-relay v{}", env!("CARGO_PKG_VERSION"));

    pose::validate_parts()?;
    tracing::info!(
        "Canonical part table v{} ({} keypoints)",
        pose::PARTS_VERSION,
        pose::KEYPOINT_COUNT
    );

    let mut config = match args.config {
        Some(ref path) => AppConfig::load(path).await?,
        None => AppConfig::default(),
    };
    if let Some(codec) = args.codec {
        config.stream.codec = codec;
    }

    let data_dir = args.data_dir.unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());

    let config_store = ConfigStore::new(&data_dir.join("pose-relay.db")).await?;
    if let Some(limit) = args.bandwidth {
        config_store.set_bandwidth_limit(limit).await?;
    }

    // Read once; later changes apply to the next session
    let limit = config_store.bandwidth_limit();
    tracing::info!("bitrate limit: {} kb/s", limit);

    let session = SessionBootstrap::new(config.webrtc.clone(), limit)
        .connect()
        .await?;

    let cancel = CancellationToken::new();
    let codec: Arc<dyn pose::PoseCodec> = Arc::from(codec_for(config.stream.codec));

    let receiver = Arc::new(FrameReceiver::new(codec.as_ref(), Arc::new(LogSink)));
    receiver.attach(&session.receive_channel());

    let (monitor_task, mut rate_rx) = spawn_monitor(
        Arc::new(session.receiving_endpoint().clone()),
        ThroughputMonitor::new(config.stream.monitored_counters.clone()),
        config.stream.stats_interval(),
        cancel.clone(),
    );

    let rate_cancel = cancel.clone();
    let rate_task = tokio::spawn(async move {
        let mut last_logged = tokio::time::Instant::now();
        loop {
            tokio::select! {
                _ = rate_cancel.cancelled() => break,
                changed = rate_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            // One line per second is enough for an operator
            if last_logged.elapsed().as_secs() >= 1 {
                if let Some(rate) = rate_rx.borrow_and_update().clone() {
                    tracing::info!("{}", rate);
                }
                last_logged = tokio::time::Instant::now();
            }
        }
    });

    let sender_task = tokio::spawn(run_sender(
        Box::new(SyntheticPoseSource::new(args.frames)),
        codec.clone(),
        session.send_channel(),
        config.stream.tick_interval(),
        cancel.clone(),
    ));
    let sender_abort = sender_task.abort_handle();
    let mut channel_state = session.channel_state_watch();

    let sender_result = tokio::select! {
        result = sender_task => Some(result),
        _ = channel_state.wait_for(|s| *s == ChannelState::Closed) => {
            tracing::warn!("Data channel closed, stopping");
            None
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
            None
        }
    };

    cancel.cancel();
    if sender_result.is_none() {
        sender_abort.abort();
    }
    let _ = monitor_task.await;
    let _ = rate_task.await;

    tracing::info!("Frames received: {}", receiver.frames_received());
    session.close().await?;

    if let Some(result) = sender_result {
        let stats = result??;
        tracing::info!(
            "Sent {} frames ({} bytes, {} dropped)",
            stats.frames_sent,
            stats.bytes_sent,
            stats.frames_dropped
        );
    }

    tracing::info!("pose-relay stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "pose_relay=error,webrtc=error",
        LogLevel::Warn => "pose_relay=warn,webrtc=warn",
        LogLevel::Info => "pose_relay=info,webrtc=warn",
        LogLevel::Verbose => "pose_relay=debug,webrtc=warn",
        LogLevel::Debug => "pose_relay=debug,webrtc=info",
        LogLevel::Trace => "pose_relay=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("POSE_RELAY_DATA_DIR") {
        return PathBuf::from(path);
    }

    PathBuf::from("pose-relay-data")
}
