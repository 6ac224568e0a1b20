//! Pose data model and wire codecs
//!
//! A [`Pose`] is one instant's estimate: an overall confidence plus exactly
//! [`KEYPOINT_COUNT`] keypoints in the canonical order given by [`PARTS`].
//! Both ends of the channel share this table; it is never negotiated on the
//! wire, so sender and receiver must agree on [`PARTS_VERSION`].

pub mod binary;
pub mod codec;
pub mod json;
pub mod synthetic;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub use binary::BinaryCodec;
pub use codec::{codec_for, CodecKind, FrameDecoder, PoseCodec, WireMessage};
pub use json::JsonCodec;
pub use synthetic::SyntheticPoseSource;

/// Number of keypoints in every pose
pub const KEYPOINT_COUNT: usize = 17;

/// Version of the canonical part table, bumped on any reordering
pub const PARTS_VERSION: u32 = 1;

/// Canonical keypoint order shared by every codec
pub const PARTS: [&str; KEYPOINT_COUNT] = [
    "nose",
    "leftEye",
    "rightEye",
    "leftEar",
    "rightEar",
    "leftShoulder",
    "rightShoulder",
    "leftElbow",
    "rightElbow",
    "leftWrist",
    "rightWrist",
    "leftHip",
    "rightHip",
    "leftKnee",
    "rightKnee",
    "leftAnkle",
    "rightAnkle",
];

/// 2-D keypoint position in source-image pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// One named body landmark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub score: f32,
    pub part: String,
    pub position: Position,
}

/// One pose estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub score: f32,
    pub keypoints: Vec<Keypoint>,
}

impl Pose {
    /// Build a pose from per-part `(score, x, y)` tuples in canonical order
    pub fn from_canonical(score: f32, points: &[(f32, f32, f32)]) -> Self {
        let keypoints = points
            .iter()
            .zip(PARTS.iter())
            .map(|(&(kp_score, x, y), part)| Keypoint {
                score: kp_score,
                part: (*part).to_string(),
                position: Position { x, y },
            })
            .collect();

        Self { score, keypoints }
    }

    /// Check the keypoint count and canonical order
    pub fn validate(&self) -> Result<()> {
        if self.keypoints.len() != KEYPOINT_COUNT {
            return Err(AppError::Codec(format!(
                "expected {} keypoints, got {}",
                KEYPOINT_COUNT,
                self.keypoints.len()
            )));
        }

        for (i, (kp, expected)) in self.keypoints.iter().zip(PARTS.iter()).enumerate() {
            // Producers may leave names empty; order is then trusted
            if !kp.part.is_empty() && kp.part != *expected {
                return Err(AppError::Codec(format!(
                    "keypoint {} is '{}', expected '{}'",
                    i, kp.part, expected
                )));
            }
        }

        Ok(())
    }
}

/// Startup check of the canonical table
pub fn validate_parts() -> Result<()> {
    for (i, part) in PARTS.iter().enumerate() {
        if part.is_empty() {
            return Err(AppError::Config(format!("part {} has an empty name", i)));
        }
        if PARTS[..i].contains(part) {
            return Err(AppError::Config(format!("part '{}' appears twice", part)));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn sample_pose() -> Pose {
    let points: Vec<(f32, f32, f32)> = (0..KEYPOINT_COUNT)
        .map(|i| (0.5, i as f32, i as f32 + 1.0))
        .collect();
    Pose::from_canonical(0.9, &points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts_table_is_valid() {
        assert!(validate_parts().is_ok());
        assert_eq!(PARTS.len(), KEYPOINT_COUNT);
    }

    #[test]
    fn test_validate_rejects_wrong_count() {
        let mut pose = sample_pose();
        pose.keypoints.pop();
        assert!(matches!(pose.validate(), Err(AppError::Codec(_))));
    }

    #[test]
    fn test_validate_rejects_out_of_order() {
        let mut pose = sample_pose();
        pose.keypoints.swap(0, 1);
        assert!(pose.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_unnamed_keypoints() {
        let mut pose = sample_pose();
        for kp in &mut pose.keypoints {
            kp.part.clear();
        }
        assert!(pose.validate().is_ok());
    }
}
