//! Frame Synchronization
//!
//! Cameras run at their own rates on their own threads; the control loop
//! runs at the session tick rate. The synchronizer bridges the two by
//! sampling each camera's newest frame at every tick and tagging it:
//!
//! - **Fresh** - the camera produced this frame since the previous tick
//! - **Repeated** - no new frame arrived, the previous one is reused
//!
//! A camera faster than the tick rate overwrites its slot between
//! samples; those intermediate frames are dropped and surface as the
//! `skipped` count on the sampled frame. A camera slower than the tick
//! rate yields repeats. Either way the tick always gets one frame per
//! camera and the sample is an approximation, never a stall.
//!
//! Freshness is derived from the per-camera generation counter, so the
//! synchronizer itself holds no pixel data; its state is one integer per
//! camera.

use crate::device::{Camera, FrameSnapshot};
use crate::types::{FrameTag, SampleFrame};
use std::collections::HashMap;

/// Aggregate freshness counters across a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Frames sampled that were new since the previous tick
    pub fresh: u64,
    /// Frames sampled that were repeats of an earlier sample
    pub repeated: u64,
    /// Frames produced by cameras but dropped between samples
    pub skipped: u64,
    /// Samples requested from a camera that had produced nothing yet
    pub missing: u64,
}

/// Tags each camera's newest frame as fresh or repeated at every tick
pub struct FrameSynchronizer {
    /// Last sampled generation per camera id
    last_generations: HashMap<String, u64>,
    stats: SyncStats,
}

impl FrameSynchronizer {
    pub fn new() -> Self {
        Self {
            last_generations: HashMap::new(),
            stats: SyncStats::default(),
        }
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Sample every camera's newest frame for one tick
    ///
    /// Cameras that have produced nothing yet contribute no frame; that
    /// only happens if a capture thread died before its first frame,
    /// since `Camera::open` blocks for one.
    pub fn sample(&mut self, cameras: &[Camera]) -> Vec<SampleFrame> {
        cameras
            .iter()
            .filter_map(|camera| {
                let frame = self.sample_one(camera.id(), camera.latest());
                if frame.is_none() {
                    tracing::warn!("Camera '{}' has produced no frame to sample", camera.id());
                }
                frame
            })
            .collect()
    }

    /// Tag one camera's snapshot against the last sampled generation
    pub fn sample_one(
        &mut self,
        camera_id: &str,
        snapshot: Option<FrameSnapshot>,
    ) -> Option<SampleFrame> {
        let snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => {
                self.stats.missing += 1;
                return None;
            }
        };

        let last = self.last_generations.get(camera_id).copied().unwrap_or(0);
        let (tag, skipped) = if snapshot.generation > last {
            (FrameTag::Fresh, snapshot.generation - last - 1)
        } else {
            (FrameTag::Repeated, 0)
        };

        self.last_generations
            .insert(camera_id.to_string(), snapshot.generation);
        match tag {
            FrameTag::Fresh => {
                self.stats.fresh += 1;
                self.stats.skipped += skipped;
            }
            FrameTag::Repeated => self.stats.repeated += 1,
        }

        Some(SampleFrame {
            camera: camera_id.to_string(),
            captured_at: snapshot.captured_at,
            tag,
            skipped,
            data: snapshot.data,
        })
    }
}

impl Default for FrameSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}
