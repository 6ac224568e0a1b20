//! Pluggable pose codec
//!
//! Senders call [`PoseCodec::encode`] once per tick and push every returned
//! [`WireMessage`] onto the channel in order. Receivers feed each incoming
//! message to a [`FrameDecoder`], which yields poses once a frame is complete.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{BinaryCodec, JsonCodec, Pose};
use crate::error::Result;

/// One data channel message
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Binary(Bytes),
    Text(String),
}

impl WireMessage {
    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Binary(b) => b.len(),
            WireMessage::Text(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Codec selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Two fixed-length f32 buffers per frame
    #[default]
    Binary,
    /// One JSON record array per frame
    Json,
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecKind::Binary => write!(f, "binary"),
            CodecKind::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(CodecKind::Binary),
            "json" => Ok(CodecKind::Json),
            other => Err(format!("unknown codec '{}'", other)),
        }
    }
}

/// Encode side of a codec, plus a factory for its receive-side reassembler
pub trait PoseCodec: Send + Sync {
    fn kind(&self) -> CodecKind;

    /// Encode one pose into the messages that make up a frame
    fn encode(&self, pose: &Pose) -> Result<Vec<WireMessage>>;

    /// Create a fresh reassembler for one receiving channel
    fn decoder(&self) -> Box<dyn FrameDecoder>;
}

/// Receive-side reassembly of frames
pub trait FrameDecoder: Send {
    /// Feed one message; returns the poses completed by it (possibly none)
    fn push(&mut self, msg: WireMessage) -> Result<Vec<Pose>>;
}

/// Construct the codec for a configured kind
pub fn codec_for(kind: CodecKind) -> Box<dyn PoseCodec> {
    match kind {
        CodecKind::Binary => Box::new(BinaryCodec),
        CodecKind::Json => Box::new(JsonCodec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::sample_pose;

    #[test]
    fn test_codec_kind_parse() {
        assert_eq!("binary".parse::<CodecKind>().unwrap(), CodecKind::Binary);
        assert_eq!("JSON".parse::<CodecKind>().unwrap(), CodecKind::Json);
        assert!("protobuf".parse::<CodecKind>().is_err());
    }

    #[test]
    fn test_codecs_are_interchangeable() {
        let pose = sample_pose();

        for kind in [CodecKind::Binary, CodecKind::Json] {
            let codec = codec_for(kind);
            assert_eq!(codec.kind(), kind);

            let mut decoder = codec.decoder();
            let mut decoded = Vec::new();
            for msg in codec.encode(&pose).unwrap() {
                decoded.extend(decoder.push(msg).unwrap());
            }

            assert_eq!(decoded, vec![pose.clone()], "codec {}", kind);
        }
    }

    #[test]
    fn test_binary_is_smaller_than_json() {
        let pose = sample_pose();
        let size = |kind| -> usize {
            codec_for(kind)
                .encode(&pose)
                .unwrap()
                .iter()
                .map(WireMessage::len)
                .sum()
        };

        assert!(size(CodecKind::Binary) * 2 <= size(CodecKind::Json));
    }
}
