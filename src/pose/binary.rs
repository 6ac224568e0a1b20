//! Binary pose codec
//!
//! Wire format, two messages per frame with no header:
//!
//! ```text
//! Message 1 (confidences): 18 x f32 LE
//!   [0]      overall pose score
//!   [1..18]  keypoint scores in canonical order
//!
//! Message 2 (positions):   34 x f32 LE
//!   [2i]     keypoint i x
//!   [2i+1]   keypoint i y
//! ```
//!
//! Message order is the only framing signal. A lost message shifts every
//! later confidence/position pairing; the decoder does not resynchronize.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use super::codec::{CodecKind, FrameDecoder, PoseCodec, WireMessage};
use super::{Keypoint, Pose, Position, KEYPOINT_COUNT, PARTS};
use crate::error::{AppError, Result};

/// Elements in the confidence buffer
pub const CONFIDENCES_LEN: usize = 1 + KEYPOINT_COUNT;
/// Elements in the position buffer
pub const POSITIONS_LEN: usize = 2 * KEYPOINT_COUNT;

const F32_SIZE: usize = std::mem::size_of::<f32>();

/// Split a pose into its confidence and position buffers
pub fn deconstruct(pose: &Pose) -> Result<([f32; CONFIDENCES_LEN], [f32; POSITIONS_LEN])> {
    pose.validate()?;

    let mut confidences = [0f32; CONFIDENCES_LEN];
    let mut positions = [0f32; POSITIONS_LEN];

    confidences[0] = pose.score;
    for (i, kp) in pose.keypoints.iter().enumerate() {
        confidences[i + 1] = kp.score;
        positions[i * 2] = kp.position.x;
        positions[i * 2 + 1] = kp.position.y;
    }

    Ok((confidences, positions))
}

/// Rebuild a pose from its buffers, re-attaching canonical part names
pub fn reconstruct(confidences: &[f32], positions: &[f32]) -> Result<Pose> {
    if confidences.len() != CONFIDENCES_LEN || positions.len() != POSITIONS_LEN {
        return Err(AppError::Codec(format!(
            "expected {}/{} elements, got {}/{}",
            CONFIDENCES_LEN,
            POSITIONS_LEN,
            confidences.len(),
            positions.len()
        )));
    }

    let keypoints = PARTS
        .iter()
        .enumerate()
        .map(|(i, part)| Keypoint {
            score: confidences[i + 1],
            part: (*part).to_string(),
            position: Position {
                x: positions[i * 2],
                y: positions[i * 2 + 1],
            },
        })
        .collect();

    Ok(Pose {
        score: confidences[0],
        keypoints,
    })
}

fn to_bytes(values: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(values.len() * F32_SIZE);
    for v in values {
        buf.put_f32_le(*v);
    }
    buf.freeze()
}

fn from_bytes(mut data: Bytes, expected: usize, what: &str) -> Result<Vec<f32>> {
    if data.len() != expected * F32_SIZE {
        return Err(AppError::Codec(format!(
            "{} message is {} bytes, expected {}",
            what,
            data.len(),
            expected * F32_SIZE
        )));
    }

    let mut values = Vec::with_capacity(expected);
    while data.has_remaining() {
        values.push(data.get_f32_le());
    }
    Ok(values)
}

/// Fixed-layout f32 codec
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl PoseCodec for BinaryCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Binary
    }

    fn encode(&self, pose: &Pose) -> Result<Vec<WireMessage>> {
        let (confidences, positions) = deconstruct(pose)?;
        Ok(vec![
            WireMessage::Binary(to_bytes(&confidences)),
            WireMessage::Binary(to_bytes(&positions)),
        ])
    }

    fn decoder(&self) -> Box<dyn FrameDecoder> {
        Box::new(BinaryFrameDecoder::default())
    }
}

/// Buffers the confidence message until its position message arrives
#[derive(Debug, Default)]
pub struct BinaryFrameDecoder {
    pending: Option<Bytes>,
}

impl FrameDecoder for BinaryFrameDecoder {
    fn push(&mut self, msg: WireMessage) -> Result<Vec<Pose>> {
        let data = match msg {
            WireMessage::Binary(data) => data,
            WireMessage::Text(_) => {
                return Err(AppError::Codec(
                    "text message on a binary channel".to_string(),
                ))
            }
        };

        let Some(first) = self.pending.take() else {
            trace!("Buffered confidences ({} bytes)", data.len());
            self.pending = Some(data);
            return Ok(Vec::new());
        };

        let confidences = from_bytes(first, CONFIDENCES_LEN, "confidence")?;
        let positions = from_bytes(data, POSITIONS_LEN, "position")?;
        Ok(vec![reconstruct(&confidences, &positions)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::sample_pose;

    #[test]
    fn test_deconstruct_layout() {
        let (confidences, positions) = deconstruct(&sample_pose()).unwrap();

        assert_eq!(confidences[0], 0.9);
        assert!(confidences[1..].iter().all(|&c| c == 0.5));

        for i in 0..KEYPOINT_COUNT {
            assert_eq!(positions[2 * i], i as f32);
            assert_eq!(positions[2 * i + 1], i as f32 + 1.0);
        }
    }

    #[test]
    fn test_reconstruct_attaches_part_names() {
        let (confidences, positions) = deconstruct(&sample_pose()).unwrap();
        let pose = reconstruct(&confidences, &positions).unwrap();

        assert_eq!(pose, sample_pose());
        assert_eq!(pose.keypoints[0].part, "nose");
        assert_eq!(pose.keypoints[16].part, "rightAnkle");
    }

    #[test]
    fn test_reconstruct_rejects_short_buffers() {
        let (confidences, positions) = deconstruct(&sample_pose()).unwrap();
        assert!(reconstruct(&confidences[..10], &positions).is_err());
        assert!(reconstruct(&confidences, &positions[..33]).is_err());
    }

    #[test]
    fn test_encode_message_sizes() {
        let msgs = BinaryCodec.encode(&sample_pose()).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].len(), 72);
        assert_eq!(msgs[1].len(), 136);
    }

    #[test]
    fn test_encode_is_little_endian() {
        let msgs = BinaryCodec.encode(&sample_pose()).unwrap();
        let WireMessage::Binary(ref confidences) = msgs[0] else {
            panic!("Expected binary message");
        };
        assert_eq!(&confidences[..4], &0.9f32.to_le_bytes());
    }

    #[test]
    fn test_decoder_waits_for_second_message() {
        let msgs = BinaryCodec.encode(&sample_pose()).unwrap();
        let mut decoder = BinaryCodec.decoder();

        assert!(decoder.push(msgs[0].clone()).unwrap().is_empty());
        let poses = decoder.push(msgs[1].clone()).unwrap();
        assert_eq!(poses, vec![sample_pose()]);

        // Buffer is reset after each frame
        assert!(decoder.push(msgs[0].clone()).unwrap().is_empty());
    }

    #[test]
    fn test_decoder_detects_swapped_messages() {
        let msgs = BinaryCodec.encode(&sample_pose()).unwrap();
        let mut decoder = BinaryCodec.decoder();

        decoder.push(msgs[1].clone()).unwrap();
        assert!(matches!(
            decoder.push(msgs[0].clone()),
            Err(AppError::Codec(_))
        ));
    }

    #[test]
    fn test_encode_rejects_incomplete_pose() {
        let mut pose = sample_pose();
        pose.keypoints.truncate(5);
        assert!(BinaryCodec.encode(&pose).is_err());
    }
}
