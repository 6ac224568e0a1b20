//! WebRTC loopback transport for pose streaming
//!
//! Architecture:
//! ```text
//! PoseSource ──> PoseCodec::encode ──> Endpoint B (acceptor)
//!                                          |
//!                          DataChannel (limited by b=AS)
//!                                          |
//! PoseSink <── FrameDecoder <────────── Endpoint A (initiator)
//!                                          |
//!                                          +──> getStats ──> ThroughputMonitor
//! ```

pub mod config;
pub mod endpoint;
pub mod sdp;
pub mod session;
pub mod signaling;

pub use config::{IceConfig, WebRtcConfig};
pub use endpoint::Endpoint;
pub use sdp::{limit_bandwidth, BandwidthLimit, APPLICATION_MEDIA};
pub use session::{PoseSession, SessionBootstrap};
pub use signaling::{ChannelState, ConnectionState, EndpointRole, IceCandidate};
