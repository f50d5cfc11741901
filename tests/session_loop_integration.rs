//! Integration tests for the session control loop
//!
//! These tests validate the complete recording workflow:
//! - Multi-episode sessions with synchronized camera frames
//! - Raw stream alignment (one frame per sample per camera)
//! - Dual-bus (bimanual) state concatenation
//! - State-only sessions with no cameras configured

mod common;

use common::builders::SessionConfigBuilder;
use common::{entry_statuses, raw_name, read_episode};
use std::sync::Arc;
use telerec_rs::clock::ManualClock;
use telerec_rs::dataset::DatasetStore;
use telerec_rs::session::SessionRunner;
use telerec_rs::types::{EncodingStatus, EpisodeStatus};
use tempfile::TempDir;

#[test]
fn test_full_session_records_multiple_episodes() {
    let root = TempDir::new().unwrap();
    let config = SessionConfigBuilder::new(root.path(), "pick_place")
        .camera("top")
        .camera("wrist")
        .episodes(3)
        .samples(5)
        .build();
    let dataset_dir = config.dataset_dir().unwrap();

    let clock = Arc::new(ManualClock::new());
    let (mut runner, _stop) = SessionRunner::with_encoder(config, clock, None).unwrap();
    let outcome = runner.run().unwrap();

    assert_eq!(outcome.completed(), 3);
    assert_eq!(outcome.stats.samples_recorded, 15);
    assert!(outcome.fault.is_none());

    let store = DatasetStore::open(&dataset_dir, "pick_place", true).unwrap();
    assert_eq!(store.next_episode_index(), 3);
    assert_eq!(
        entry_statuses(&store),
        vec![
            (0, EpisodeStatus::Completed, EncodingStatus::Done),
            (1, EpisodeStatus::Completed, EncodingStatus::Done),
            (2, EpisodeStatus::Completed, EncodingStatus::Done),
        ]
    );

    for index in 0..3 {
        let file = read_episode(&store, index);
        assert_eq!(file.meta.status, EpisodeStatus::Completed);
        assert_eq!(file.meta.index, index);
        assert_eq!(file.samples.len(), 5);

        for (position, sample) in file.samples.iter().enumerate() {
            assert_eq!(sample.tick, position as u64);
            assert_eq!(sample.observation.len(), 3);
            assert_eq!(sample.action.len(), 3);
            assert_eq!(sample.frames.len(), 2);
        }
        // timestamps follow the tick ladder
        for pair in file.samples.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }

        // raw streams hold exactly one frame per sample
        for cam in ["top", "wrist"] {
            let raw = std::fs::read(store.episode_dir(index).join(raw_name(cam))).unwrap();
            assert_eq!(raw.len(), 5 * 32 * 24 * 3, "camera {} stream", cam);
        }
    }
}

#[test]
fn test_dual_bus_arms_concatenate_state() {
    let root = TempDir::new().unwrap();
    let mut config = SessionConfigBuilder::new(root.path(), "bimanual")
        .samples(2)
        .build();
    config.leader.port_right = Some("right".to_string());
    config.follower.port_right = Some("right".to_string());
    let dataset_dir = config.dataset_dir().unwrap();

    let clock = Arc::new(ManualClock::new());
    let (mut runner, _stop) = SessionRunner::with_encoder(config, clock, None).unwrap();
    let outcome = runner.run().unwrap();
    assert_eq!(outcome.completed(), 1);

    let store = DatasetStore::open(&dataset_dir, "bimanual", true).unwrap();
    let file = read_episode(&store, 0);

    assert_eq!(file.meta.state_names.len(), 6);
    assert!(file.meta.state_names[..3]
        .iter()
        .all(|name| name.starts_with("left_")));
    assert!(file.meta.state_names[3..]
        .iter()
        .all(|name| name.starts_with("right_")));
    for sample in &file.samples {
        assert_eq!(sample.observation.len(), 6);
        assert_eq!(sample.action.len(), 6);
    }
}

#[test]
fn test_session_without_cameras_records_state_only() {
    let root = TempDir::new().unwrap();
    let config = SessionConfigBuilder::new(root.path(), "state_only")
        .samples(3)
        .build();
    let dataset_dir = config.dataset_dir().unwrap();

    let clock = Arc::new(ManualClock::new());
    let (mut runner, _stop) = SessionRunner::with_encoder(config, clock, None).unwrap();
    let outcome = runner.run().unwrap();

    assert_eq!(outcome.completed(), 1);
    assert_eq!(outcome.stats.fresh_frames + outcome.stats.repeated_frames, 0);

    let store = DatasetStore::open(&dataset_dir, "state_only", true).unwrap();
    let file = read_episode(&store, 0);
    assert!(file.meta.cameras.is_empty());
    assert_eq!(file.samples.len(), 3);
    assert!(file.samples.iter().all(|sample| sample.frames.is_empty()));

    // no raw streams were written
    let entries: Vec<_> = std::fs::read_dir(store.episode_dir(0))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries, vec!["episode.json".to_string()]);
}
