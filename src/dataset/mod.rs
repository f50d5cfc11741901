//! Dataset Persistence
//!
//! On-disk layout of one dataset:
//!
//! ```text
//! <root>/<name>/
//!   index.json                    committed episodes + encoding progress
//!   episodes/
//!     episode_000000/
//!       episode.json              metadata and samples (no pixels)
//!       cam_<id>.rgb24            raw frame stream, one frame per sample
//!       cam_<id>.mp4              encoded video, written by the pipeline
//! ```
//!
//! The index is the source of truth: an episode exists once the index
//! records it, and the next episode index is always the highest committed
//! index plus one. Index saves go through a temp file, fsync, and rename,
//! so a crash leaves either the old index or the new one, never a torn
//! write. Episode artifacts are written before the index entry; a crash
//! in between leaves an orphan directory that the next run of the same
//! index simply overwrites.
//!
//! Raw streams hold exactly one frame per sample. A sample that is
//! missing a camera's frame repeats the previous frame so the stream
//! stays aligned with the sample count, which is what lets an encoder
//! consume the stream at the tick rate without timestamps.

pub mod store;

pub use store::DatasetStore;

use crate::episode::{EpisodeMeta, SealedEpisode};
use crate::error::{Result, TelerecError};
use crate::types::{EncodingStatus, EpisodeStatus, FrameData, Sample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Index file name inside a dataset directory
pub const INDEX_FILE: &str = "index.json";
/// Directory holding per-episode subdirectories
pub const EPISODES_DIR: &str = "episodes";
/// Episode metadata file name inside an episode directory
pub const EPISODE_FILE: &str = "episode.json";
/// On-disk format version accepted by this build
pub const FORMAT_VERSION: u32 = 1;

/// Directory of one episode: `episodes/episode_000042`
pub fn episode_dir(dataset_dir: &Path, index: u64) -> PathBuf {
    dataset_dir
        .join(EPISODES_DIR)
        .join(format!("episode_{:06}", index))
}

/// Raw RGB8 stream of one camera inside an episode directory
pub fn raw_artifact_path(episode_dir: &Path, camera_id: &str) -> PathBuf {
    episode_dir.join(format!("cam_{}.rgb24", camera_id))
}

/// Encoded video of one camera inside an episode directory
pub fn video_artifact_path(episode_dir: &Path, camera_id: &str) -> PathBuf {
    episode_dir.join(format!("cam_{}.mp4", camera_id))
}

/// One committed episode as recorded in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// How the episode ended
    pub status: EpisodeStatus,
    /// Number of samples it holds
    pub samples: u64,
    /// Video encoding progress
    pub encoding: EncodingStatus,
}

/// Durable record of which episodes a dataset contains
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetIndex {
    /// On-disk format version
    pub version: u32,
    /// Dataset name, matching the directory
    pub name: String,
    /// Wall-clock creation time
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Committed episodes by index
    pub episodes: BTreeMap<u64, IndexEntry>,
}

impl DatasetIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: FORMAT_VERSION,
            name: name.into(),
            created_at: chrono::Utc::now(),
            episodes: BTreeMap::new(),
        }
    }

    /// Index the next sealed episode will get: highest committed + 1
    pub fn next_episode_index(&self) -> u64 {
        match self.episodes.keys().next_back() {
            Some(highest) => highest + 1,
            None => 0,
        }
    }

    /// Number of committed episodes
    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Episodes that sealed with `Completed`
    pub fn completed(&self) -> usize {
        self.episodes
            .values()
            .filter(|e| e.status == EpisodeStatus::Completed)
            .count()
    }

    /// Record a sealed episode; overwrites an orphan entry of the same
    /// index left by an interrupted earlier run
    pub fn record_sealed(&mut self, meta: &EpisodeMeta, encoding: EncodingStatus) {
        self.episodes.insert(
            meta.index,
            IndexEntry {
                status: meta.status,
                samples: meta.samples,
                encoding,
            },
        );
    }

    /// Update one episode's encoding status; false if the index has no
    /// such episode
    pub fn set_encoding(&mut self, index: u64, status: EncodingStatus) -> bool {
        match self.episodes.get_mut(&index) {
            Some(entry) => {
                entry.encoding = status;
                true
            }
            None => false,
        }
    }

    /// Episodes whose video work is not finished, oldest first
    ///
    /// Includes episodes found `InProgress`, which means an earlier run
    /// died mid-encode and the work must be redone from the raw stream.
    pub fn episodes_needing_encoding(&self) -> Vec<u64> {
        self.episodes
            .iter()
            .filter(|(_, entry)| entry.encoding.needs_encoding())
            .map(|(index, _)| *index)
            .collect()
    }

    /// Atomically persist the index: temp file, fsync, rename
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TelerecError::Persistence(format!("serialize index: {}", e)))?;

        let tmp = path.with_file_name(format!("{}.tmp", INDEX_FILE));
        {
            let mut file = File::create(&tmp).map_err(|e| {
                TelerecError::Persistence(format!("create {}: {}", tmp.display(), e))
            })?;
            file.write_all(json.as_bytes()).map_err(|e| {
                TelerecError::Persistence(format!("write {}: {}", tmp.display(), e))
            })?;
            file.sync_all().map_err(|e| {
                TelerecError::Persistence(format!("sync {}: {}", tmp.display(), e))
            })?;
        }
        std::fs::rename(&tmp, path).map_err(|e| {
            TelerecError::Persistence(format!("rename {} -> {}: {}", tmp.display(), path.display(), e))
        })?;
        Ok(())
    }

    /// Load an index, refusing formats newer than this build understands
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| TelerecError::Persistence(format!("read {}: {}", path.display(), e)))?;
        let index: Self = serde_json::from_str(&json)
            .map_err(|e| TelerecError::Persistence(format!("parse {}: {}", path.display(), e)))?;
        if index.version != FORMAT_VERSION {
            return Err(TelerecError::Persistence(format!(
                "dataset format version {} is not supported (expected {})",
                index.version, FORMAT_VERSION
            )));
        }
        Ok(index)
    }
}

/// Serialized form of `episode.json`
#[derive(Debug, Clone, Deserialize)]
pub struct EpisodeFile {
    pub meta: EpisodeMeta,
    pub samples: Vec<Sample>,
}

#[derive(Serialize)]
struct EpisodeFileRef<'a> {
    meta: &'a EpisodeMeta,
    samples: &'a [Sample],
}

impl EpisodeFile {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| TelerecError::Persistence(format!("read {}: {}", path.display(), e)))?;
        serde_json::from_str(&json)
            .map_err(|e| TelerecError::Persistence(format!("parse {}: {}", path.display(), e)))
    }
}

/// Write one sealed episode's artifacts: raw streams, then metadata
///
/// All files are synced before this returns; the caller then records the
/// episode in the index.
pub fn write_episode(dataset_dir: &Path, sealed: &SealedEpisode) -> Result<()> {
    let dir = episode_dir(dataset_dir, sealed.meta.index);
    std::fs::create_dir_all(&dir)
        .map_err(|e| TelerecError::Persistence(format!("create {}: {}", dir.display(), e)))?;

    for camera in &sealed.meta.cameras {
        write_raw_stream(&dir, &camera.id, camera.width, camera.height, &sealed.samples)?;
    }

    let path = dir.join(EPISODE_FILE);
    let json = serde_json::to_string_pretty(&EpisodeFileRef {
        meta: &sealed.meta,
        samples: &sealed.samples,
    })
    .map_err(|e| TelerecError::Persistence(format!("serialize episode {}: {}", sealed.meta.index, e)))?;

    let mut file = File::create(&path)
        .map_err(|e| TelerecError::Persistence(format!("create {}: {}", path.display(), e)))?;
    file.write_all(json.as_bytes())
        .map_err(|e| TelerecError::Persistence(format!("write {}: {}", path.display(), e)))?;
    file.sync_all()
        .map_err(|e| TelerecError::Persistence(format!("sync {}: {}", path.display(), e)))?;

    Ok(())
}

fn write_raw_stream(
    dir: &Path,
    camera_id: &str,
    width: u32,
    height: u32,
    samples: &[Sample],
) -> Result<()> {
    let path = raw_artifact_path(dir, camera_id);
    let file = File::create(&path)
        .map_err(|e| TelerecError::Persistence(format!("create {}: {}", path.display(), e)))?;
    let mut writer = std::io::BufWriter::new(file);

    let frame_len = FrameData::expected_len(width, height);
    let zero_frame = vec![0u8; frame_len];
    let mut last: Option<std::sync::Arc<FrameData>> = None;

    for sample in samples {
        if let Some(frame) = sample.frames.iter().find(|f| f.camera == camera_id) {
            if frame.data.byte_len() == frame_len {
                last = Some(frame.data.clone());
            } else {
                tracing::warn!(
                    "Camera '{}': frame of {} bytes does not match {}x{} stream, repeating last",
                    camera_id,
                    frame.data.byte_len(),
                    width,
                    height
                );
            }
        }
        let bytes: &[u8] = match &last {
            Some(data) => &data.pixels,
            None => &zero_frame,
        };
        writer
            .write_all(bytes)
            .map_err(|e| TelerecError::Persistence(format!("write {}: {}", path.display(), e)))?;
    }

    writer
        .flush()
        .map_err(|e| TelerecError::Persistence(format!("flush {}: {}", path.display(), e)))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| TelerecError::Persistence(format!("sync {}: {}", path.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{CameraMeta, EpisodeFrameStats};
    use crate::types::{FrameTag, SampleFrame, StateVector};
    use std::sync::Arc;
    use std::time::Duration;

    fn meta(index: u64, status: EpisodeStatus, samples: u64) -> EpisodeMeta {
        EpisodeMeta {
            index,
            task: "test task".to_string(),
            status,
            samples,
            started_at: Duration::ZERO,
            ended_at: Duration::from_secs(1),
            tick_rate_hz: 30,
            state_names: vec!["motor_0".to_string()],
            action_names: vec!["motor_0".to_string()],
            cameras: vec![CameraMeta {
                id: "top".to_string(),
                width: 2,
                height: 2,
                fps: 30,
            }],
            frame_stats: EpisodeFrameStats::default(),
            recorded_at: chrono::Utc::now(),
        }
    }

    fn sample(tick: u64, fill: u8) -> Sample {
        Sample {
            tick,
            timestamp: Duration::from_millis(tick * 33),
            observation: StateVector(vec![1.0]),
            action: StateVector(vec![2.0]),
            frames: vec![SampleFrame {
                camera: "top".to_string(),
                captured_at: Duration::ZERO,
                tag: FrameTag::Fresh,
                skipped: 0,
                data: Arc::new(FrameData::new(2, 2, vec![fill; 12]).unwrap()),
            }],
        }
    }

    #[test]
    fn test_next_index_is_highest_plus_one() {
        let mut index = DatasetIndex::new("test");
        assert_eq!(index.next_episode_index(), 0);

        index.record_sealed(&meta(0, EpisodeStatus::Completed, 10), EncodingStatus::Pending);
        index.record_sealed(&meta(4, EpisodeStatus::Aborted, 3), EncodingStatus::Pending);
        assert_eq!(index.next_episode_index(), 5);
    }

    #[test]
    fn test_encoding_backlog_ordering() {
        let mut index = DatasetIndex::new("test");
        for (i, status) in [
            EncodingStatus::Done,
            EncodingStatus::Pending,
            EncodingStatus::InProgress,
            EncodingStatus::Failed,
        ]
        .iter()
        .enumerate()
        {
            index.record_sealed(&meta(i as u64, EpisodeStatus::Completed, 1), *status);
        }

        assert_eq!(index.episodes_needing_encoding(), vec![1, 2, 3]);
    }

    #[test]
    fn test_index_roundtrip_is_atomic() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(INDEX_FILE);

        let mut index = DatasetIndex::new("roundtrip");
        index.record_sealed(&meta(0, EpisodeStatus::Completed, 7), EncodingStatus::Done);
        index.save_to_file(&path).unwrap();

        // No temp file is left behind
        assert!(path.exists());
        assert!(!path.with_file_name(format!("{}.tmp", INDEX_FILE)).exists());

        let loaded = DatasetIndex::load_from_file(&path).unwrap();
        assert_eq!(loaded.name, "roundtrip");
        assert_eq!(loaded.episodes[&0].samples, 7);
    }

    #[test]
    fn test_unknown_format_version_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(INDEX_FILE);

        let mut index = DatasetIndex::new("future");
        index.version = FORMAT_VERSION + 1;
        let json = serde_json::to_string(&index).unwrap();
        std::fs::write(&path, json).unwrap();

        assert!(DatasetIndex::load_from_file(&path).is_err());
    }

    #[test]
    fn test_write_episode_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let sealed = SealedEpisode {
            meta: meta(2, EpisodeStatus::Completed, 3),
            samples: vec![sample(0, 10), sample(1, 20), sample(2, 30)],
        };

        write_episode(tmp.path(), &sealed).unwrap();

        let dir = episode_dir(tmp.path(), 2);
        assert!(dir.ends_with("episodes/episode_000002"));

        // Raw stream holds one 2x2 RGB frame per sample
        let raw = std::fs::read(raw_artifact_path(&dir, "top")).unwrap();
        assert_eq!(raw.len(), 3 * 12);
        assert_eq!(raw[0], 10);
        assert_eq!(raw[12], 20);
        assert_eq!(raw[24], 30);

        let file = EpisodeFile::load_from_file(&dir.join(EPISODE_FILE)).unwrap();
        assert_eq!(file.meta.index, 2);
        assert_eq!(file.samples.len(), 3);
        // Pixels are not serialized into episode.json
        assert_eq!(file.samples[0].frames[0].data.byte_len(), 0);
    }

    #[test]
    fn test_missing_camera_frame_repeats_last() {
        let tmp = tempfile::tempdir().unwrap();
        let mut second = sample(1, 99);
        second.frames.clear();

        let sealed = SealedEpisode {
            meta: meta(0, EpisodeStatus::Completed, 2),
            samples: vec![sample(0, 42), second],
        };
        write_episode(tmp.path(), &sealed).unwrap();

        let raw = std::fs::read(raw_artifact_path(&episode_dir(tmp.path(), 0), "top")).unwrap();
        assert_eq!(raw.len(), 2 * 12);
        // Second frame repeats the first
        assert_eq!(&raw[12..24], &raw[0..12]);
    }
}
