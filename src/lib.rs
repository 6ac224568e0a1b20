//! pose-relay - Pose keypoint streaming over WebRTC
//!
//! This crate negotiates an in-process WebRTC data channel between two
//! endpoints, streams pose estimates across it with a pluggable codec, caps
//! its bandwidth through the session descriptor, and reports live throughput.

pub mod config;
pub mod error;
pub mod pose;
pub mod stats;
pub mod transport;
pub mod webrtc;

pub use error::{AppError, Result};
