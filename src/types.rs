//! Core data types for telerec-rs
//!
//! This module contains the fundamental data structures shared by the
//! control loop, recorder, and persistence layers.
//!
//! # Main Types
//!
//! - [`StateVector`] - Ordered joint positions read from or written to an arm
//! - [`FrameData`] - One RGB8 frame's geometry and pixel bytes
//! - [`SampleFrame`] - A frame as it appears inside a sample, with its
//!   freshness tag
//! - [`Sample`] - One synchronized observation: tick index, timestamp,
//!   follower state, leader action, and one frame per configured camera
//! - [`EpisodeStatus`] / [`EncodingStatus`] - Completion and encoding states
//!   shared between the recorder and the dataset index
//! - [`SessionStats`] - Running counters reported by the control loop
//!
//! # Pixel Format
//!
//! All frames are tightly packed RGB8 (`width * height * 3` bytes). That is
//! the byte stream the raw episode artifact stores and the encoder consumes,
//! so no conversion happens between capture and persistence.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Bytes per pixel for the RGB8 frames used throughout the crate
pub const RGB8_BYTES_PER_PIXEL: usize = 3;

/// An ordered vector of joint positions
///
/// The joint order is fixed by the device that produced the vector; joint
/// names are stored once in episode metadata rather than per sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StateVector(pub Vec<f64>);

impl StateVector {
    /// Create a state vector from joint positions
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// A zero vector with the given joint count
    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    /// Number of joints
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the vector has no joints
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Joint positions as a slice
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Concatenate two vectors (left then right, for dual-bus arms)
    pub fn concat(left: &StateVector, right: &StateVector) -> Self {
        let mut values = Vec::with_capacity(left.len() + right.len());
        values.extend_from_slice(left.as_slice());
        values.extend_from_slice(right.as_slice());
        Self(values)
    }

    /// Split off the first `left_len` joints, returning (left, right)
    pub fn split(&self, left_len: usize) -> (StateVector, StateVector) {
        let left_len = left_len.min(self.0.len());
        let (l, r) = self.0.split_at(left_len);
        (StateVector(l.to_vec()), StateVector(r.to_vec()))
    }
}

impl From<Vec<f64>> for StateVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Geometry and pixel bytes of one captured frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameData {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Tightly packed RGB8 bytes, `width * height * 3` long
    pub pixels: Vec<u8>,
}

impl FrameData {
    /// Expected byte length for a frame of the given geometry
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * RGB8_BYTES_PER_PIXEL
    }

    /// Create a frame, verifying the pixel buffer matches the geometry
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != Self::expected_len(width, height) {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Byte length of the pixel buffer
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// Freshness of a frame relative to the tick that sampled it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameTag {
    /// The camera produced this frame since the previous tick
    #[default]
    Fresh,
    /// No new frame arrived; the previous frame was reused
    Repeated,
}

impl FrameTag {
    /// Whether the frame is new for this tick
    pub fn is_fresh(&self) -> bool {
        matches!(self, FrameTag::Fresh)
    }

    /// Whether the frame was carried over from an earlier tick
    pub fn is_repeated(&self) -> bool {
        matches!(self, FrameTag::Repeated)
    }
}

impl std::fmt::Display for FrameTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameTag::Fresh => write!(f, "fresh"),
            FrameTag::Repeated => write!(f, "repeated"),
        }
    }
}

/// One camera's contribution to a sample
///
/// Pixel data is shared with the capture worker via `Arc` and is not
/// serialized; the raw episode artifact stores pixels separately as a
/// per-camera byte stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleFrame {
    /// Camera identifier from the configuration
    pub camera: String,
    /// When the camera captured the frame (session-monotonic)
    pub captured_at: Duration,
    /// Freshness relative to this tick
    pub tag: FrameTag,
    /// Frames the camera produced since the previous tick that were dropped
    /// in favor of this one (camera faster than the tick rate)
    pub skipped: u64,
    /// Shared pixel data
    #[serde(skip)]
    pub data: Arc<FrameData>,
}

/// One synchronized observation assembled at a tick boundary
///
/// Immutable once constructed; owned by the episode buffer until handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Tick index within the episode, starting at 0
    pub tick: u64,
    /// The tick's single timestamp (session-monotonic)
    pub timestamp: Duration,
    /// Follower joint state read this tick
    pub observation: StateVector,
    /// Leader joint state sent to the follower this tick
    pub action: StateVector,
    /// Exactly one entry per configured camera
    pub frames: Vec<SampleFrame>,
}

/// Completion status of a sealed episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    /// Episode ran to its configured duration or sample target
    Completed,
    /// Session stopped mid-episode due to a fault
    Truncated,
    /// Operator canceled mid-episode
    Aborted,
}

impl std::fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpisodeStatus::Completed => write!(f, "completed"),
            EpisodeStatus::Truncated => write!(f, "truncated"),
            EpisodeStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Encoding progress of one episode's video artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncodingStatus {
    /// Sealed, not yet handed to an encode worker
    #[default]
    Pending,
    /// Dispatched to a worker
    InProgress,
    /// All camera streams encoded successfully
    Done,
    /// At least one stream failed; raw frames retained for retry
    Failed,
}

impl EncodingStatus {
    /// Whether this entry still needs encoding work on resume
    pub fn needs_encoding(&self) -> bool {
        !matches!(self, EncodingStatus::Done)
    }
}

impl std::fmt::Display for EncodingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingStatus::Pending => write!(f, "pending"),
            EncodingStatus::InProgress => write!(f, "in-progress"),
            EncodingStatus::Done => write!(f, "done"),
            EncodingStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Running counters reported by the control loop
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Ticks executed across the whole session
    pub ticks: u64,
    /// Ticks whose work exceeded the period
    pub overruns: u64,
    /// Total lateness accumulated by overruns, in microseconds
    pub total_lateness_us: u64,
    /// Samples appended to episode buffers
    pub samples_recorded: u64,
    /// Frames tagged fresh
    pub fresh_frames: u64,
    /// Frames tagged repeated
    pub repeated_frames: u64,
    /// Frames dropped because a camera outpaced the tick rate
    pub skipped_frames: u64,
    /// Failed arm state reads (leader or follower)
    pub read_failures: u64,
    /// Failed follower command writes
    pub write_failures: u64,
    /// Episodes sealed, any status
    pub episodes_sealed: u64,
}

impl SessionStats {
    /// Fraction of ticks that overran their budget, as a percentage
    pub fn overrun_rate(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            (self.overruns as f64 / self.ticks as f64) * 100.0
        }
    }

    /// Mean lateness per overrun tick, in microseconds
    pub fn avg_lateness_us(&self) -> f64 {
        if self.overruns == 0 {
            0.0
        } else {
            self.total_lateness_us as f64 / self.overruns as f64
        }
    }
}
