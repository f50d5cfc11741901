//! Integration tests for batched video encoding through a session
//!
//! These tests validate the encode pipeline as driven by the control
//! loop:
//! - Sealed episodes reach the worker pool and the index tracks them
//! - Partial batches are flushed at session shutdown
//! - A failed episode does not block the others, and its raw streams
//!   survive for a retry

mod common;

use common::builders::{SessionConfigBuilder, StubEncoder};
use common::{entry_statuses, raw_name};
use std::sync::Arc;
use telerec_rs::clock::ManualClock;
use telerec_rs::dataset::DatasetStore;
use telerec_rs::session::SessionRunner;
use telerec_rs::types::{EncodingStatus, EpisodeStatus};
use tempfile::TempDir;

#[test]
fn test_episodes_encode_through_worker_pool() {
    let root = TempDir::new().unwrap();
    let config = SessionConfigBuilder::new(root.path(), "encoded")
        .camera("top")
        .episodes(3)
        .samples(2)
        .batch_size(1)
        .workers(2)
        .build();
    let dataset_dir = config.dataset_dir().unwrap();

    let encoder = StubEncoder::new();
    let clock = Arc::new(ManualClock::new());
    let (mut runner, _stop) =
        SessionRunner::with_encoder(config, clock, Some(encoder.clone())).unwrap();
    runner.run().unwrap();

    assert_eq!(encoder.calls().len(), 3);
    let store = DatasetStore::open(&dataset_dir, "encoded", true).unwrap();
    for (_, _, encoding) in entry_statuses(&store) {
        assert_eq!(encoding, EncodingStatus::Done);
    }

    // raw streams are removed after a successful encode
    for index in 0..3 {
        assert!(!store.episode_dir(index).join(raw_name("top")).exists());
    }
}

#[test]
fn test_shutdown_flushes_partial_batch() {
    let root = TempDir::new().unwrap();
    // three episodes with a batch of two: the third is still waiting
    // for a batch when the session ends
    let config = SessionConfigBuilder::new(root.path(), "partial")
        .camera("top")
        .episodes(3)
        .samples(2)
        .batch_size(2)
        .build();
    let dataset_dir = config.dataset_dir().unwrap();

    let encoder = StubEncoder::new();
    let clock = Arc::new(ManualClock::new());
    let (mut runner, _stop) =
        SessionRunner::with_encoder(config, clock, Some(encoder.clone())).unwrap();
    runner.run().unwrap();

    assert_eq!(encoder.calls().len(), 3);
    let store = DatasetStore::open(&dataset_dir, "partial", true).unwrap();
    assert_eq!(
        entry_statuses(&store),
        vec![
            (0, EpisodeStatus::Completed, EncodingStatus::Done),
            (1, EpisodeStatus::Completed, EncodingStatus::Done),
            (2, EpisodeStatus::Completed, EncodingStatus::Done),
        ]
    );
}

#[test]
fn test_failed_episode_does_not_block_others() {
    let root = TempDir::new().unwrap();
    let config = SessionConfigBuilder::new(root.path(), "mixed")
        .camera("top")
        .episodes(3)
        .samples(2)
        .batch_size(1)
        .build();
    let dataset_dir = config.dataset_dir().unwrap();

    let encoder = StubEncoder::new();
    encoder.fail_for(telerec_rs::dataset::episode_dir(&dataset_dir, 1));

    let clock = Arc::new(ManualClock::new());
    let (mut runner, _stop) =
        SessionRunner::with_encoder(config, clock, Some(encoder.clone())).unwrap();
    runner.run().unwrap();

    let store = DatasetStore::open(&dataset_dir, "mixed", true).unwrap();
    assert_eq!(
        entry_statuses(&store),
        vec![
            (0, EpisodeStatus::Completed, EncodingStatus::Done),
            (1, EpisodeStatus::Completed, EncodingStatus::Failed),
            (2, EpisodeStatus::Completed, EncodingStatus::Done),
        ]
    );

    // the failed episode keeps its raw stream for retry
    assert!(!store.episode_dir(0).join(raw_name("top")).exists());
    assert!(store.episode_dir(1).join(raw_name("top")).exists());
    assert!(!store.episode_dir(2).join(raw_name("top")).exists());
}
