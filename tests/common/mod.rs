//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use telerec_rs::dataset::{DatasetStore, EpisodeFile, EPISODE_FILE};
use telerec_rs::types::{EncodingStatus, EpisodeStatus};

/// Load one episode's metadata and samples back from disk
pub fn read_episode(store: &DatasetStore, index: u64) -> EpisodeFile {
    let path = store.episode_dir(index).join(EPISODE_FILE);
    EpisodeFile::load_from_file(&path)
        .unwrap_or_else(|e| panic!("episode {} unreadable: {}", index, e))
}

/// Index entries as (episode, status, encoding) tuples, oldest first
pub fn entry_statuses(store: &DatasetStore) -> Vec<(u64, EpisodeStatus, EncodingStatus)> {
    store
        .index()
        .episodes
        .iter()
        .map(|(index, entry)| (*index, entry.status, entry.encoding))
        .collect()
}

/// Raw stream file name for a camera id
pub fn raw_name(camera_id: &str) -> String {
    format!("cam_{}.rgb24", camera_id)
}
