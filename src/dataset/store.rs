//! Dataset Store
//!
//! Owns one dataset directory and its index for the lifetime of a
//! session. All mutation goes through here so the index on disk is
//! updated under a single writer, and every mutating call flushes the
//! index before returning; the caller can treat a returned `Ok` as
//! durable.
//!
//! Opening is explicit about intent: `create` refuses to touch a
//! directory that already holds a dataset, `resume` refuses to invent
//! one. A stale `InProgress` encoding entry found on resume means an
//! earlier run died mid-encode; it lands in the backlog along with
//! `Pending` and `Failed` episodes.

use super::{episode_dir, write_episode, DatasetIndex, EPISODES_DIR, INDEX_FILE};
use crate::episode::SealedEpisode;
use crate::error::{Result, TelerecError};
use crate::types::EncodingStatus;
use std::path::{Path, PathBuf};

/// Single writer over a dataset directory and its index
#[derive(Debug)]
pub struct DatasetStore {
    dir: PathBuf,
    index: DatasetIndex,
}

impl DatasetStore {
    /// Open a dataset honoring the resume flag
    ///
    /// Without `resume`, an existing dataset at `dir` is a hard error so
    /// a mistyped name cannot append to the wrong dataset. With it, the
    /// dataset must already exist.
    pub fn open(dir: impl Into<PathBuf>, name: &str, resume: bool) -> Result<Self> {
        if resume {
            Self::resume(dir)
        } else {
            Self::create(dir, name)
        }
    }

    /// Create a fresh dataset directory
    pub fn create(dir: impl Into<PathBuf>, name: &str) -> Result<Self> {
        let dir = dir.into();
        let index_path = dir.join(INDEX_FILE);

        if index_path.exists() {
            return Err(TelerecError::DatasetExists { path: dir });
        }
        if dir.exists() && std::fs::read_dir(&dir).map(|mut d| d.next().is_some()).unwrap_or(false)
        {
            return Err(TelerecError::Persistence(format!(
                "{} exists and is not empty, but holds no dataset index",
                dir.display()
            )));
        }

        std::fs::create_dir_all(dir.join(EPISODES_DIR))
            .map_err(|e| TelerecError::Persistence(format!("create {}: {}", dir.display(), e)))?;

        let index = DatasetIndex::new(name);
        index.save_to_file(&index_path)?;
        tracing::info!("Created dataset '{}' at {}", name, dir.display());

        Ok(Self { dir, index })
    }

    /// Open an existing dataset to continue recording into it
    pub fn resume(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let index_path = dir.join(INDEX_FILE);

        if !index_path.exists() {
            return Err(TelerecError::Persistence(format!(
                "cannot resume: no dataset index at {}",
                index_path.display()
            )));
        }

        let index = DatasetIndex::load_from_file(&index_path)?;
        let backlog = index.episodes_needing_encoding();
        tracing::info!(
            "Resuming dataset '{}': {} episodes committed, next index {}, {} awaiting encoding",
            index.name,
            index.len(),
            index.next_episode_index(),
            backlog.len()
        );

        Ok(Self { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    /// Index the next sealed episode will be committed under
    pub fn next_episode_index(&self) -> u64 {
        self.index.next_episode_index()
    }

    /// Directory of one episode inside this dataset
    pub fn episode_dir(&self, index: u64) -> PathBuf {
        episode_dir(&self.dir, index)
    }

    /// Persist a sealed episode and commit it to the index
    ///
    /// Artifacts are written and synced first, then the index entry is
    /// flushed. Returns only once both are on disk.
    pub fn commit_episode(
        &mut self,
        sealed: &SealedEpisode,
        encoding: EncodingStatus,
    ) -> Result<()> {
        write_episode(&self.dir, sealed)?;
        self.index.record_sealed(&sealed.meta, encoding);
        self.save_index()
    }

    /// Durably update one episode's encoding status
    pub fn set_encoding(&mut self, episode_index: u64, status: EncodingStatus) -> Result<()> {
        if !self.index.set_encoding(episode_index, status) {
            tracing::warn!(
                "Encoding status {} for unknown episode {}",
                status,
                episode_index
            );
            return Ok(());
        }
        self.save_index()
    }

    /// Episodes whose video work is unfinished, oldest first
    pub fn encoding_backlog(&self) -> Vec<u64> {
        self.index.episodes_needing_encoding()
    }

    fn save_index(&self) -> Result<()> {
        self.index.save_to_file(&self.dir.join(INDEX_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{CameraMeta, EpisodeFrameStats, EpisodeMeta};
    use crate::types::EpisodeStatus;
    use std::time::Duration;

    fn sealed(index: u64) -> SealedEpisode {
        SealedEpisode {
            meta: EpisodeMeta {
                index,
                task: "test task".to_string(),
                status: EpisodeStatus::Completed,
                samples: 0,
                started_at: Duration::ZERO,
                ended_at: Duration::from_secs(1),
                tick_rate_hz: 30,
                state_names: vec![],
                action_names: vec![],
                cameras: vec![CameraMeta {
                    id: "top".to_string(),
                    width: 2,
                    height: 2,
                    fps: 30,
                }],
                frame_stats: EpisodeFrameStats::default(),
                recorded_at: chrono::Utc::now(),
            },
            samples: vec![],
        }
    }

    #[test]
    fn test_create_then_commit_advances_index() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ds");

        let mut store = DatasetStore::create(&dir, "ds").unwrap();
        assert_eq!(store.next_episode_index(), 0);

        for i in 0..3 {
            store
                .commit_episode(&sealed(i), EncodingStatus::Pending)
                .unwrap();
        }
        assert_eq!(store.next_episode_index(), 3);

        // The commit is durable: a fresh resume sees the same state
        let reopened = DatasetStore::resume(&dir).unwrap();
        assert_eq!(reopened.next_episode_index(), 3);
        assert_eq!(reopened.encoding_backlog(), vec![0, 1, 2]);
    }

    #[test]
    fn test_create_refuses_existing_dataset() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ds");

        DatasetStore::create(&dir, "ds").unwrap();
        let err = DatasetStore::create(&dir, "ds").unwrap_err();
        assert!(matches!(err, TelerecError::DatasetExists { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_open_respects_resume_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ds");

        assert!(DatasetStore::open(&dir, "ds", true).is_err());
        DatasetStore::open(&dir, "ds", false).unwrap();
        assert!(DatasetStore::open(&dir, "ds", false).is_err());
        assert!(DatasetStore::open(&dir, "ds", true).is_ok());
    }

    #[test]
    fn test_encoding_status_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ds");

        let mut store = DatasetStore::create(&dir, "ds").unwrap();
        store
            .commit_episode(&sealed(0), EncodingStatus::Pending)
            .unwrap();
        store
            .commit_episode(&sealed(1), EncodingStatus::Pending)
            .unwrap();
        store.set_encoding(0, EncodingStatus::Done).unwrap();
        store.set_encoding(1, EncodingStatus::InProgress).unwrap();

        // A run that died mid-encode leaves InProgress behind; resume
        // puts it back in the backlog
        let reopened = DatasetStore::resume(&dir).unwrap();
        assert_eq!(reopened.encoding_backlog(), vec![1]);
    }

    #[test]
    fn test_nonempty_foreign_directory_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ds");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stray.txt"), "not a dataset").unwrap();

        assert!(DatasetStore::create(&dir, "ds").is_err());
    }
}
