//! JSON pose codec
//!
//! One text message per frame holding an array of poses with field names
//! intact (`score`, `keypoints[].score`, `keypoints[].part`,
//! `keypoints[].position.x`, `keypoints[].position.y`). Self-describing, but
//! several times larger than the binary layout.

use super::codec::{CodecKind, FrameDecoder, PoseCodec, WireMessage};
use super::Pose;
use crate::error::{AppError, Result};

/// Serialize a batch of poses to the textual record array
pub fn encode_poses(poses: &[Pose]) -> Result<String> {
    Ok(serde_json::to_string(poses)?)
}

/// Parse a textual record array
pub fn decode_poses(text: &str) -> Result<Vec<Pose>> {
    Ok(serde_json::from_str(text)?)
}

/// Record-array codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PoseCodec for JsonCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Json
    }

    fn encode(&self, pose: &Pose) -> Result<Vec<WireMessage>> {
        pose.validate()?;
        let text = encode_poses(std::slice::from_ref(pose))?;
        Ok(vec![WireMessage::Text(text)])
    }

    fn decoder(&self) -> Box<dyn FrameDecoder> {
        Box::new(JsonFrameDecoder)
    }
}

/// Stateless: every message is a complete frame
#[derive(Debug, Default)]
pub struct JsonFrameDecoder;

impl FrameDecoder for JsonFrameDecoder {
    fn push(&mut self, msg: WireMessage) -> Result<Vec<Pose>> {
        match msg {
            WireMessage::Text(text) => decode_poses(&text),
            WireMessage::Binary(data) => {
                let text = std::str::from_utf8(&data)
                    .map_err(|e| AppError::Codec(format!("invalid UTF-8 payload: {}", e)))?;
                decode_poses(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::sample_pose;

    #[test]
    fn test_field_names() {
        let text = encode_poses(&[sample_pose()]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        let first = &value[0];
        assert!((first["score"].as_f64().unwrap() - 0.9).abs() < 1e-6);
        assert_eq!(first["keypoints"].as_array().unwrap().len(), 17);
        assert_eq!(first["keypoints"][2]["part"], "rightEye");
        assert_eq!(first["keypoints"][2]["position"]["x"], 2.0);
        assert_eq!(first["keypoints"][2]["position"]["y"], 3.0);
    }

    #[test]
    fn test_decode_batch() {
        let poses = vec![sample_pose(), sample_pose()];
        let text = encode_poses(&poses).unwrap();
        assert_eq!(decode_poses(&text).unwrap(), poses);
    }

    #[test]
    fn test_decoder_accepts_binary_utf8() {
        let text = encode_poses(&[sample_pose()]).unwrap();
        let mut decoder = JsonCodec.decoder();
        let poses = decoder
            .push(WireMessage::Binary(bytes::Bytes::from(text)))
            .unwrap();
        assert_eq!(poses.len(), 1);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_poses("{\"score\":"),
            Err(AppError::Serialization(_))
        ));
    }
}
