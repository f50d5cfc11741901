//! Episode Recording
//!
//! An [`EpisodeRecorder`] accumulates the samples of one episode in memory
//! and walks a small phase machine:
//!
//! ```text
//! Collecting -> Sealing -> Sealed
//! ```
//!
//! `begin_seal` closes the episode with a status and hands back the
//! buffered samples plus computed metadata; the caller persists them and
//! then calls `finish_seal`. Samples arriving outside the collecting
//! phase are dropped, so a tick racing a seal cannot extend a closed
//! episode. A second `begin_seal` is a no-op, which lets shutdown paths
//! seal unconditionally without tracking whether a fault path already
//! did.
//!
//! The recorder assigns episode-local tick numbers itself, so sample
//! indices are dense from 0 regardless of session tick numbering.

use crate::types::{EpisodeStatus, Sample, SampleFrame, StateVector};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Recorder lifecycle for one episode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodePhase {
    /// Samples are being appended
    Collecting,
    /// The episode is closed and its artifacts are being written
    Sealing,
    /// Artifacts are committed; the recorder is inert
    Sealed,
}

/// Geometry of one camera stream as recorded in episode metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraMeta {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Per-episode frame freshness totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeFrameStats {
    pub fresh: u64,
    pub repeated: u64,
    pub skipped: u64,
}

/// Metadata persisted alongside an episode's samples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeMeta {
    /// Dataset-wide episode index
    pub index: u64,
    /// Task description the episode demonstrates
    pub task: String,
    /// How the episode ended
    pub status: EpisodeStatus,
    /// Number of samples recorded
    pub samples: u64,
    /// Session time when collection started
    pub started_at: Duration,
    /// Session time when the episode was sealed
    pub ended_at: Duration,
    /// Control rate the episode was recorded at
    pub tick_rate_hz: u32,
    /// Names of the observation dimensions (follower joints)
    pub state_names: Vec<String>,
    /// Names of the action dimensions (leader joints)
    pub action_names: Vec<String>,
    /// Camera streams recorded with the episode
    pub cameras: Vec<CameraMeta>,
    /// Frame freshness totals across the episode
    pub frame_stats: EpisodeFrameStats,
    /// Wall-clock time the episode was recorded
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

impl EpisodeMeta {
    /// Collection duration on the session timeline
    pub fn duration(&self) -> Duration {
        self.ended_at.saturating_sub(self.started_at)
    }
}

/// A closed episode ready to persist: metadata plus the sample buffer
#[derive(Debug)]
pub struct SealedEpisode {
    pub meta: EpisodeMeta,
    pub samples: Vec<Sample>,
}

/// Accumulates one episode's samples and seals them with a status
pub struct EpisodeRecorder {
    index: u64,
    task: String,
    target_samples: u64,
    tick_rate_hz: u32,
    started_at: Duration,
    state_names: Vec<String>,
    action_names: Vec<String>,
    cameras: Vec<CameraMeta>,
    phase: EpisodePhase,
    samples: Vec<Sample>,
}

impl EpisodeRecorder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: u64,
        task: impl Into<String>,
        target_samples: u64,
        tick_rate_hz: u32,
        started_at: Duration,
        state_names: Vec<String>,
        action_names: Vec<String>,
        cameras: Vec<CameraMeta>,
    ) -> Self {
        Self {
            index,
            task: task.into(),
            target_samples,
            tick_rate_hz,
            started_at,
            state_names,
            action_names,
            cameras,
            phase: EpisodePhase::Collecting,
            samples: Vec::with_capacity(target_samples as usize),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    pub fn is_collecting(&self) -> bool {
        self.phase == EpisodePhase::Collecting
    }

    /// Samples recorded so far
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the episode has reached its configured length
    pub fn is_full(&self) -> bool {
        self.samples.len() as u64 >= self.target_samples
    }

    /// Samples the episode is collecting toward
    pub fn target_samples(&self) -> u64 {
        self.target_samples
    }

    /// Append one tick's sample; returns false if the episode is no
    /// longer collecting and the sample was dropped
    pub fn append(
        &mut self,
        timestamp: Duration,
        observation: StateVector,
        action: StateVector,
        frames: Vec<SampleFrame>,
    ) -> bool {
        if self.phase != EpisodePhase::Collecting {
            tracing::debug!(
                "Episode {}: dropping sample, recorder is {:?}",
                self.index,
                self.phase
            );
            return false;
        }
        let tick = self.samples.len() as u64;
        self.samples.push(Sample {
            tick,
            timestamp,
            observation,
            action,
            frames,
        });
        true
    }

    /// Close the episode and take its samples for persistence
    ///
    /// Returns `None` if the episode was already sealed. The recorder
    /// moves to `Sealing`; call [`finish_seal`](Self::finish_seal) once
    /// the artifacts are committed.
    pub fn begin_seal(&mut self, status: EpisodeStatus, ended_at: Duration) -> Option<SealedEpisode> {
        if self.phase != EpisodePhase::Collecting {
            return None;
        }
        self.phase = EpisodePhase::Sealing;

        let samples = std::mem::take(&mut self.samples);
        let frame_stats = frame_stats(&samples);
        let meta = EpisodeMeta {
            index: self.index,
            task: self.task.clone(),
            status,
            samples: samples.len() as u64,
            started_at: self.started_at,
            ended_at,
            tick_rate_hz: self.tick_rate_hz,
            state_names: self.state_names.clone(),
            action_names: self.action_names.clone(),
            cameras: self.cameras.clone(),
            frame_stats,
            recorded_at: chrono::Utc::now(),
        };

        tracing::info!(
            "Episode {} sealed as {} with {} samples over {:.1}s",
            meta.index,
            meta.status,
            meta.samples,
            meta.duration().as_secs_f64()
        );

        Some(SealedEpisode { meta, samples })
    }

    /// Mark the episode's artifacts as committed
    pub fn finish_seal(&mut self) {
        if self.phase == EpisodePhase::Sealing {
            self.phase = EpisodePhase::Sealed;
        }
    }
}

fn frame_stats(samples: &[Sample]) -> EpisodeFrameStats {
    let mut stats = EpisodeFrameStats::default();
    for sample in samples {
        for frame in &sample.frames {
            if frame.tag.is_fresh() {
                stats.fresh += 1;
            } else {
                stats.repeated += 1;
            }
            stats.skipped += frame.skipped;
        }
    }
    stats
}
