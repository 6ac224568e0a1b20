//! Steady-state pose transport
//!
//! The sender pulls one pose per tick from a [`PoseSource`], encodes it and
//! pushes the resulting messages onto the channel. The next tick is armed
//! only after the current one finishes, so a slow producer delays the stream
//! instead of overlapping ticks.
//!
//! The receiver feeds every channel message into the codec's
//! [`FrameDecoder`] and hands completed poses to a [`PoseSink`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

use crate::error::{AppError, Result};
use crate::pose::{FrameDecoder, Pose, PoseCodec, WireMessage};

/// Producer boundary: the pose estimator
#[async_trait]
pub trait PoseSource: Send {
    /// Next estimate, or `None` once the producer is exhausted
    async fn next_pose(&mut self) -> Result<Option<Pose>>;
}

/// Consumer boundary: the renderer
#[async_trait]
pub trait PoseSink: Send + Sync {
    async fn render(&self, pose: Pose);
}

/// Outgoing side of a channel
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_message(&self, msg: WireMessage) -> Result<usize>;
}

#[async_trait]
impl MessageSink for RTCDataChannel {
    async fn send_message(&self, msg: WireMessage) -> Result<usize> {
        let sent = match msg {
            WireMessage::Binary(data) => self.send(&data).await,
            WireMessage::Text(text) => self.send_text(text).await,
        };
        sent.map_err(|e| AppError::WebRtcError(format!("Failed to send pose message: {}", e)))
    }
}

/// Sender loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub bytes_sent: u64,
}

/// Run the sender until the source is exhausted or `cancel` fires
pub async fn run_sender(
    mut source: Box<dyn PoseSource>,
    codec: Arc<dyn PoseCodec>,
    channel: Arc<dyn MessageSink>,
    tick_delay: Duration,
    cancel: CancellationToken,
) -> Result<SenderStats> {
    let mut stats = SenderStats::default();
    info!("Pose sender started ({} codec, {:?} delay)", codec.kind(), tick_delay);

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = source.next_pose() => next?,
        };

        let Some(pose) = next else {
            info!("Pose source exhausted");
            break;
        };

        match codec.encode(&pose) {
            Ok(messages) => match send_frame(channel.as_ref(), messages).await {
                Ok(bytes) => {
                    stats.frames_sent += 1;
                    stats.bytes_sent += bytes as u64;
                    trace!("Sent frame {} ({} bytes)", stats.frames_sent, bytes);
                }
                Err(e) => {
                    stats.frames_dropped += 1;
                    warn!("Dropped frame: {}", e);
                }
            },
            Err(e) => {
                stats.frames_dropped += 1;
                warn!("Failed to encode pose: {}", e);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(tick_delay) => {}
        }
    }

    info!(
        "Pose sender stopped: {} frames sent, {} dropped",
        stats.frames_sent, stats.frames_dropped
    );
    Ok(stats)
}

async fn send_frame(channel: &dyn MessageSink, messages: Vec<WireMessage>) -> Result<usize> {
    let mut total = 0;
    for msg in messages {
        // Stop at the first failure; a partial binary frame cannot be repaired
        total += channel.send_message(msg).await?;
    }
    Ok(total)
}

/// Reassembles channel messages into poses
pub struct FrameReceiver {
    decoder: Mutex<Box<dyn FrameDecoder>>,
    sink: Arc<dyn PoseSink>,
    frames: AtomicU64,
}

impl FrameReceiver {
    pub fn new(codec: &dyn PoseCodec, sink: Arc<dyn PoseSink>) -> Self {
        Self {
            decoder: Mutex::new(codec.decoder()),
            sink,
            frames: AtomicU64::new(0),
        }
    }

    /// Handle one incoming message
    pub async fn handle(&self, msg: WireMessage) {
        let decoded = self.decoder.lock().await.push(msg);

        match decoded {
            Ok(poses) => {
                for pose in poses {
                    self.frames.fetch_add(1, Ordering::Relaxed);
                    self.sink.render(pose).await;
                }
            }
            Err(e) => warn!("Failed to decode pose frame: {}", e),
        }
    }

    /// Poses delivered so far
    pub fn frames_received(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Route every message of `dc` into this receiver
    pub fn attach(self: &Arc<Self>, dc: &Arc<RTCDataChannel>) {
        let receiver = self.clone();
        let label = dc.label().to_string();

        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let receiver = receiver.clone();
            trace!("DataChannel '{}' message: {} bytes", label, msg.data.len());

            Box::pin(async move {
                receiver.handle(to_wire(msg)).await;
            })
        }));

        debug!("Frame receiver attached to '{}'", dc.label());
    }
}

fn to_wire(msg: DataChannelMessage) -> WireMessage {
    if msg.is_string {
        match String::from_utf8(msg.data.to_vec()) {
            Ok(text) => WireMessage::Text(text),
            Err(_) => WireMessage::Binary(msg.data),
        }
    } else {
        WireMessage::Binary(msg.data)
    }
}

/// Renderer stand-in that logs each pose
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl PoseSink for LogSink {
    async fn render(&self, pose: Pose) {
        let nose = pose.keypoints.first().map(|kp| kp.position).unwrap_or_default();
        debug!(
            "Pose score={:.2} keypoints={} nose=({:.1}, {:.1})",
            pose.score,
            pose.keypoints.len(),
            nose.x,
            nose.y
        );
    }
}

/// Forwards poses into a channel
pub struct ForwardSink(pub mpsc::UnboundedSender<Pose>);

#[async_trait]
impl PoseSink for ForwardSink {
    async fn render(&self, pose: Pose) {
        let _ = self.0.send(pose);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{codec_for, sample_pose, CodecKind};

    /// Captures sent messages, optionally failing every send
    struct CaptureChannel {
        sent: std::sync::Mutex<Vec<WireMessage>>,
        fail: bool,
    }

    impl CaptureChannel {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: std::sync::Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl MessageSink for CaptureChannel {
        async fn send_message(&self, msg: WireMessage) -> Result<usize> {
            if self.fail {
                return Err(AppError::WebRtcError("channel closed".to_string()));
            }
            let len = msg.len();
            self.sent.lock().unwrap().push(msg);
            Ok(len)
        }
    }

    struct FixedSource {
        remaining: usize,
    }

    #[async_trait]
    impl PoseSource for FixedSource {
        async fn next_pose(&mut self) -> Result<Option<Pose>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(sample_pose()))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl PoseSource for FailingSource {
        async fn next_pose(&mut self) -> Result<Option<Pose>> {
            Err(AppError::Producer("model not loaded".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_sends_two_messages_per_frame() {
        let channel = CaptureChannel::new(false);
        let stats = run_sender(
            Box::new(FixedSource { remaining: 3 }),
            Arc::from(codec_for(CodecKind::Binary)),
            channel.clone(),
            Duration::from_millis(10),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(stats.frames_sent, 3);
        assert_eq!(stats.bytes_sent, 3 * (72 + 136));
        assert_eq!(channel.sent.lock().unwrap().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_survives_send_failures() {
        let channel = CaptureChannel::new(true);
        let stats = run_sender(
            Box::new(FixedSource { remaining: 2 }),
            Arc::from(codec_for(CodecKind::Json)),
            channel,
            Duration::from_millis(10),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(stats.frames_sent, 0);
        assert_eq!(stats.frames_dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sender(
            Box::new(FixedSource { remaining: usize::MAX }),
            Arc::from(codec_for(CodecKind::Binary)),
            CaptureChannel::new(false),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(55)).await;
        cancel.cancel();

        let stats = task.await.unwrap().unwrap();
        assert!(stats.frames_sent >= 5);
    }

    #[tokio::test]
    async fn test_sender_propagates_producer_error() {
        let result = run_sender(
            Box::new(FailingSource),
            Arc::from(codec_for(CodecKind::Binary)),
            CaptureChannel::new(false),
            Duration::from_millis(10),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(AppError::Producer(_))));
    }

    #[tokio::test]
    async fn test_receiver_reassembles_binary_frames() {
        let codec = codec_for(CodecKind::Binary);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let receiver = FrameReceiver::new(codec.as_ref(), Arc::new(ForwardSink(tx)));

        for _ in 0..2 {
            for msg in codec.encode(&sample_pose()).unwrap() {
                receiver.handle(msg).await;
            }
        }

        assert_eq!(receiver.frames_received(), 2);
        assert_eq!(rx.recv().await.unwrap(), sample_pose());
        assert_eq!(rx.recv().await.unwrap(), sample_pose());
    }

    #[tokio::test]
    async fn test_receiver_skips_undecodable_messages() {
        let codec = codec_for(CodecKind::Json);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let receiver = FrameReceiver::new(codec.as_ref(), Arc::new(ForwardSink(tx)));

        receiver.handle(WireMessage::Text("not json".to_string())).await;
        for msg in codec.encode(&sample_pose()).unwrap() {
            receiver.handle(msg).await;
        }

        assert_eq!(receiver.frames_received(), 1);
        assert_eq!(rx.recv().await.unwrap().keypoints.len(), 17);
    }
}
