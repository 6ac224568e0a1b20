//! Synthetic pose producer
//!
//! Stands in for the pose-estimation model: emits a standing skeleton whose
//! arms sway over time, so the transport can run without a camera.

use async_trait::async_trait;

use super::{Pose, KEYPOINT_COUNT};
use crate::error::Result;
use crate::transport::PoseSource;

/// Rest pose in a 500x500 frame, canonical order
const REST_POSE: [(f32, f32); KEYPOINT_COUNT] = [
    (250.0, 80.0),  // nose
    (240.0, 70.0),  // leftEye
    (260.0, 70.0),  // rightEye
    (228.0, 78.0),  // leftEar
    (272.0, 78.0),  // rightEar
    (210.0, 140.0), // leftShoulder
    (290.0, 140.0), // rightShoulder
    (190.0, 210.0), // leftElbow
    (310.0, 210.0), // rightElbow
    (180.0, 280.0), // leftWrist
    (320.0, 280.0), // rightWrist
    (225.0, 290.0), // leftHip
    (275.0, 290.0), // rightHip
    (222.0, 380.0), // leftKnee
    (278.0, 380.0), // rightKnee
    (220.0, 470.0), // leftAnkle
    (280.0, 470.0), // rightAnkle
];

/// Generates a bounded or endless stream of swaying poses
#[derive(Debug, Clone)]
pub struct SyntheticPoseSource {
    frame: u64,
    limit: Option<u64>,
}

impl SyntheticPoseSource {
    pub fn new(limit: Option<u64>) -> Self {
        Self { frame: 0, limit }
    }

    /// Pose for a given frame number
    pub fn pose_at(frame: u64) -> Pose {
        let phase = frame as f32 * 0.05;
        let sway = phase.sin() * 30.0;

        let points: Vec<(f32, f32, f32)> = REST_POSE
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| match i {
                7 | 9 => (0.8, x - sway * 0.5, y - sway),
                8 | 10 => (0.8, x + sway * 0.5, y + sway),
                _ => (0.95, x, y),
            })
            .collect();

        Pose::from_canonical(0.9, &points)
    }
}

#[async_trait]
impl PoseSource for SyntheticPoseSource {
    async fn next_pose(&mut self) -> Result<Option<Pose>> {
        if self.limit.is_some_and(|limit| self.frame >= limit) {
            return Ok(None);
        }

        let pose = Self::pose_at(self.frame);
        self.frame += 1;
        Ok(Some(pose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_ends_stream() {
        let mut source = SyntheticPoseSource::new(Some(2));
        assert!(source.next_pose().await.unwrap().is_some());
        assert!(source.next_pose().await.unwrap().is_some());
        assert!(source.next_pose().await.unwrap().is_none());
    }

    #[test]
    fn test_poses_are_canonical() {
        for frame in [0, 17, 1000] {
            assert!(SyntheticPoseSource::pose_at(frame).validate().is_ok());
        }
    }
}
