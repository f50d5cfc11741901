//! Session control loop for teleoperated data collection
//!
//! # Responsibilities
//!
//! - Drive the fixed-rate tick loop: read the leader arm, command the
//!   follower, read the follower back, and sample the camera cells
//! - Cut the stream into episodes, seal them with a status, and commit
//!   them durably before anything else happens
//! - Hand sealed episodes to the encode pipeline and fold worker
//!   progress back into the dataset index
//! - Stop at tick boundaries on operator request, truncate on repeated
//!   device failures, and halt on persistence errors (after attempting
//!   a clean seal)
//!
//! # Threading Model
//!
//! The loop runs on the caller's thread. Camera capture threads and
//! encode workers run concurrently; the loop only ever touches their
//! channel/cell endpoints, so a slow camera or encoder can never stall
//! a tick.

use crate::clock::{Clock, TickScheduler};
use crate::config::SessionConfig;
use crate::dataset::{DatasetStore, EpisodeFile, EPISODE_FILE};
use crate::device::{open_arm, open_cameras, ArmBus, Camera, DeviceRole};
use crate::encode::{EncodeEvent, EncodeJob, EncodePipeline, FfmpegEncoder, VideoEncoder};
use crate::episode::{CameraMeta, EpisodeRecorder};
use crate::error::{Result, TelerecError};
use crate::sync::FrameSynchronizer;
use crate::types::{EncodingStatus, EpisodeStatus, FrameTag, SessionStats, StateVector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Minimum spacing between progress log lines, in session time
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Cloneable handle that asks a running session to stop
///
/// The stop is honored at the next tick boundary: the current episode
/// is sealed as aborted and committed before the loop exits.
#[derive(Clone, Debug)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request a stop; idempotent
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// What a finished session produced
#[derive(Debug)]
pub struct SessionOutcome {
    /// Counters accumulated over the whole session
    pub stats: SessionStats,
    /// Episodes committed this run, in recording order
    pub committed: Vec<(u64, EpisodeStatus)>,
    /// Whether the operator requested the stop
    pub stopped_by_operator: bool,
    /// Device fault that ended the session early, if any
    pub fault: Option<String>,
}

impl SessionOutcome {
    /// Episodes that reached their full length
    pub fn completed(&self) -> usize {
        self.committed
            .iter()
            .filter(|(_, status)| *status == EpisodeStatus::Completed)
            .count()
    }
}

/// How an episode's recording loop ended
enum EpisodeEnd {
    /// Reached its sample target
    Completed,
    /// Operator stop at a tick boundary
    Aborted,
    /// Device fault or persistence failure mid-episode
    Truncated(String),
}

/// Owns the devices, dataset, and encode pipeline for one session
pub struct SessionRunner {
    /// Validated configuration the session was built from
    config: SessionConfig,
    /// Time source shared with the scheduler and camera threads
    clock: Arc<dyn Clock>,
    /// Fixed-rate tick source
    scheduler: TickScheduler,
    /// Operator arm, read every tick for the action
    leader: Box<dyn ArmBus>,
    /// Robot arm, commanded and read back every tick
    follower: Box<dyn ArmBus>,
    /// Capture threads publishing into latest-frame cells
    cameras: Vec<Camera>,
    /// Tags sampled frames fresh or repeated per camera
    synchronizer: FrameSynchronizer,
    /// Durable episode index and artifact writer
    store: DatasetStore,
    /// Worker pool for video encoding; `None` when encoding is off
    pipeline: Option<EncodePipeline>,
    /// Set by [`StopHandle::stop`], checked at tick boundaries
    stop: Arc<AtomicBool>,
    /// Ticks in a row whose teleoperation step failed
    consecutive_failures: u32,
    /// Session time of the last progress log line
    last_progress_at: Duration,
    /// Running counters surfaced in the outcome
    stats: SessionStats,
}

impl std::fmt::Debug for SessionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRunner")
            .field("config", &self.config)
            .field("cameras", &self.cameras.len())
            .finish_non_exhaustive()
    }
}

impl SessionRunner {
    /// Open every device named in `config` and prepare the dataset
    ///
    /// Uses ffmpeg for encoding when `encoding.video` is set; fails
    /// fast if the binary is missing rather than at the first seal.
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>) -> Result<(Self, StopHandle)> {
        let encoder: Option<Arc<dyn VideoEncoder>> = if config.encoding.video {
            if !FfmpegEncoder::is_available() {
                return Err(TelerecError::Config(
                    "ffmpeg not found on PATH; install it or disable encoding.video".to_string(),
                ));
            }
            Some(Arc::new(FfmpegEncoder::new(
                &config.encoding.preset,
                config.encoding.crf,
            )))
        } else {
            None
        };
        Self::with_encoder(config, clock, encoder)
    }

    /// Like [`new`](Self::new) but with a caller-supplied encoder
    ///
    /// `None` disables encoding regardless of the configuration.
    pub fn with_encoder(
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        encoder: Option<Arc<dyn VideoEncoder>>,
    ) -> Result<(Self, StopHandle)> {
        config.validate()?;
        let leader = open_arm(DeviceRole::Leader, &config.leader)?;
        let follower = open_arm(DeviceRole::Follower, &config.follower)?;
        let capture_timeout = Duration::from_millis(config.record.capture_timeout_ms);
        let cameras = open_cameras(&config.cameras, &clock, capture_timeout)?;
        let store = DatasetStore::open(
            config.dataset_dir()?,
            &config.dataset_name(),
            config.dataset.resume,
        )?;
        let pipeline = encoder.map(|encoder| {
            EncodePipeline::new(
                encoder,
                config.encoding.workers,
                config.encoding.queue_depth,
                config.encoding.batch_size,
            )
        });
        Ok(Self::from_parts(
            config, clock, leader, follower, cameras, store, pipeline,
        ))
    }

    /// Assemble a runner from already-open devices
    ///
    /// The seam for tests and embedders that build their own buses or
    /// stores; performs no validation or opening of its own.
    pub fn from_parts(
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        leader: Box<dyn ArmBus>,
        follower: Box<dyn ArmBus>,
        cameras: Vec<Camera>,
        store: DatasetStore,
        pipeline: Option<EncodePipeline>,
    ) -> (Self, StopHandle) {
        let period = config.tick_period();
        let stop = Arc::new(AtomicBool::new(false));
        let runner = Self {
            scheduler: TickScheduler::new(clock.clone(), period),
            synchronizer: FrameSynchronizer::new(),
            stop: stop.clone(),
            consecutive_failures: 0,
            last_progress_at: Duration::ZERO,
            stats: SessionStats::default(),
            config,
            clock,
            leader,
            follower,
            cameras,
            store,
            pipeline,
        };
        (runner, StopHandle { flag: stop })
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    /// Record until the configured number of episodes complete
    ///
    /// Returns `Ok` for operator stops and device faults (the outcome
    /// carries them); returns `Err` only when the dataset itself could
    /// not be written. Every recorded sample is sealed and committed
    /// before this returns, whichever way it ends.
    pub fn run(&mut self) -> Result<SessionOutcome> {
        let target = self.config.record.num_episodes;
        tracing::info!(
            "Session started: dataset '{}' at {:?}, {} episode(s) at {} Hz, {} camera(s)",
            self.store.index().name,
            self.store.dir(),
            target,
            self.config.record.tick_rate_hz,
            self.cameras.len()
        );

        let mut committed: Vec<(u64, EpisodeStatus)> = Vec::new();
        let mut fatal: Option<TelerecError> = None;

        if let Err(e) = self.enqueue_backlog() {
            fatal = Some(e);
        }

        let mut completed = 0u32;
        while fatal.is_none() && completed < target && !self.stop.load(Ordering::SeqCst) {
            let index = self.store.next_episode_index();
            match self.record_episode(index) {
                Ok(EpisodeEnd::Completed) => {
                    committed.push((index, EpisodeStatus::Completed));
                    completed += 1;
                    if completed < target && !self.stop.load(Ordering::SeqCst) {
                        match self.reset_window() {
                            Ok(stopped) if stopped => break,
                            Ok(_) => {}
                            Err(e) => {
                                fatal = Some(e);
                            }
                        }
                    }
                }
                Ok(EpisodeEnd::Aborted) => {
                    committed.push((index, EpisodeStatus::Aborted));
                    break;
                }
                Ok(EpisodeEnd::Truncated(reason)) => {
                    committed.push((index, EpisodeStatus::Truncated));
                    tracing::error!("Episode {} truncated: {}", index, reason);
                    let outcome = self.finish_session(committed, Some(reason));
                    return Ok(outcome);
                }
                Err(e) => {
                    fatal = Some(e);
                }
            }
        }

        if let Some(e) = fatal {
            self.shutdown();
            tracing::error!("Session halted: {}", e);
            return Err(e);
        }

        Ok(self.finish_session(committed, None))
    }

    /// Close devices, drain the encode pipeline, and build the outcome
    fn finish_session(
        &mut self,
        committed: Vec<(u64, EpisodeStatus)>,
        fault: Option<String>,
    ) -> SessionOutcome {
        self.shutdown();

        self.stats.ticks = self.scheduler.ticks();
        self.stats.overruns = self.scheduler.overruns();
        self.stats.total_lateness_us = self.scheduler.total_lateness().as_micros() as u64;

        let outcome = SessionOutcome {
            stats: self.stats.clone(),
            stopped_by_operator: self.stop.load(Ordering::SeqCst),
            committed,
            fault,
        };
        tracing::info!(
            "Session finished: {} episode(s) committed ({} completed), {} samples, \
             {} ticks with {} overruns ({:.2}%)",
            outcome.committed.len(),
            outcome.completed(),
            outcome.stats.samples_recorded,
            outcome.stats.ticks,
            outcome.stats.overruns,
            outcome.stats.overrun_rate()
        );
        outcome
    }

    /// Re-enqueue committed episodes whose encoding never finished
    ///
    /// Covers crashes mid-encode: `Pending` entries were never picked
    /// up and `InProgress` entries died with their worker. Episodes
    /// whose metadata cannot be read any more are marked failed.
    fn enqueue_backlog(&mut self) -> Result<()> {
        let backlog = self.store.encoding_backlog();
        if backlog.is_empty() {
            return Ok(());
        }
        if self.pipeline.is_none() {
            tracing::info!(
                "Encoding disabled; {} episode(s) keep their raw streams",
                backlog.len()
            );
            return Ok(());
        }

        tracing::info!("Re-enqueueing {} episode(s) for encoding", backlog.len());
        let mut jobs = Vec::new();
        let mut unreadable = Vec::new();
        for index in backlog {
            let dir = self.store.episode_dir(index);
            match EpisodeFile::load_from_file(&dir.join(EPISODE_FILE)) {
                Ok(file) => jobs.push(EncodeJob {
                    episode_index: index,
                    episode_dir: dir,
                    cameras: file.meta.cameras,
                    tick_rate_hz: file.meta.tick_rate_hz,
                    keep_raw: self.config.encoding.keep_raw,
                }),
                Err(e) => {
                    tracing::error!("Episode {} metadata unreadable, marking failed: {}", index, e);
                    unreadable.push(index);
                }
            }
        }
        for index in unreadable {
            self.store.set_encoding(index, EncodingStatus::Failed)?;
        }
        if let Some(pipeline) = &mut self.pipeline {
            for job in jobs {
                pipeline.submit(job);
            }
            // recovered work should not wait for a fresh batch to fill
            pipeline.flush();
        }
        Ok(())
    }

    /// Run the tick loop for one episode, then seal and commit it
    ///
    /// Device faults and operator stops end the episode but not the
    /// commit; a fatal persistence error is returned after the seal
    /// has been attempted.
    fn record_episode(&mut self, index: u64) -> Result<EpisodeEnd> {
        let mut recorder = EpisodeRecorder::new(
            index,
            self.config.record.task.clone(),
            self.episode_target_samples(),
            self.config.record.tick_rate_hz,
            self.clock.now(),
            self.follower.joint_names(),
            self.leader.joint_names(),
            self.camera_meta(),
        );
        tracing::info!(
            "Episode {} recording: {} samples at {} Hz",
            index,
            recorder.target_samples(),
            self.config.record.tick_rate_hz
        );
        self.consecutive_failures = 0;

        let mut fatal: Option<TelerecError> = None;
        let end = loop {
            let tick = self.scheduler.wait();
            if self.stop.load(Ordering::SeqCst) {
                break EpisodeEnd::Aborted;
            }
            if let Err(e) = self.drain_encode_events() {
                fatal = Some(e);
                break EpisodeEnd::Truncated(
                    "encoding status could not be persisted".to_string(),
                );
            }

            match self.teleop_step() {
                Ok((observation, action)) => {
                    self.consecutive_failures = 0;
                    let frames = self.synchronizer.sample(&self.cameras);
                    for frame in &frames {
                        match frame.tag {
                            FrameTag::Fresh => self.stats.fresh_frames += 1,
                            FrameTag::Repeated => self.stats.repeated_frames += 1,
                        }
                        self.stats.skipped_frames += frame.skipped;
                    }
                    recorder.append(tick.at, observation, action, frames);
                    self.stats.samples_recorded += 1;
                    if recorder.is_full() {
                        break EpisodeEnd::Completed;
                    }
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    tracing::warn!(
                        "Tick {}: teleoperation failed ({} consecutive): {}",
                        tick.index,
                        self.consecutive_failures,
                        e
                    );
                    let limit = self.config.record.max_consecutive_failures;
                    if limit > 0 && self.consecutive_failures >= limit {
                        break EpisodeEnd::Truncated(format!(
                            "{} consecutive failed ticks, last error: {}",
                            self.consecutive_failures, e
                        ));
                    }
                }
            }
            self.log_progress(&recorder, tick.at);
        };

        let status = match &end {
            EpisodeEnd::Completed => EpisodeStatus::Completed,
            EpisodeEnd::Aborted => EpisodeStatus::Aborted,
            EpisodeEnd::Truncated(_) => EpisodeStatus::Truncated,
        };
        let sealed = self.seal_and_commit(&mut recorder, status);

        match (fatal, sealed) {
            (Some(e), _) => Err(e),
            (None, Err(e)) => Err(e),
            (None, Ok(())) => Ok(end),
        }
    }

    /// One teleoperation exchange: leader state becomes the follower
    /// command, and the follower's resulting state is the observation
    fn teleop_step(&mut self) -> Result<(StateVector, StateVector)> {
        let action = match self.leader.read_state() {
            Ok(action) => action,
            Err(e) => {
                self.stats.read_failures += 1;
                return Err(e);
            }
        };
        if let Err(e) = self.follower.write_command(&action) {
            self.stats.write_failures += 1;
            return Err(e);
        }
        let observation = match self.follower.read_state() {
            Ok(observation) => observation,
            Err(e) => {
                self.stats.read_failures += 1;
                return Err(e);
            }
        };
        Ok((observation, action))
    }

    /// Seal the episode and write it durably, then queue its encoding
    ///
    /// The index entry is committed before the encode job is submitted,
    /// so a crash in between leaves a `Pending` entry that the next
    /// run's backlog scan picks up.
    fn seal_and_commit(
        &mut self,
        recorder: &mut EpisodeRecorder,
        status: EpisodeStatus,
    ) -> Result<()> {
        let ended_at = self.clock.now();
        let Some(sealed) = recorder.begin_seal(status, ended_at) else {
            return Ok(());
        };
        let initial = if self.pipeline.is_some() {
            EncodingStatus::Pending
        } else {
            EncodingStatus::Done
        };
        self.store.commit_episode(&sealed, initial)?;
        self.stats.episodes_sealed += 1;

        if let Some(pipeline) = &mut self.pipeline {
            pipeline.submit(EncodeJob {
                episode_index: sealed.meta.index,
                episode_dir: self.store.episode_dir(sealed.meta.index),
                cameras: sealed.meta.cameras.clone(),
                tick_rate_hz: sealed.meta.tick_rate_hz,
                keep_raw: self.config.encoding.keep_raw,
            });
        }
        recorder.finish_seal();
        Ok(())
    }

    /// Idle ticks between episodes so the operator can stage the scene
    ///
    /// Teleoperation keeps running (the operator repositions through
    /// the leader arm) but nothing is recorded. Returns `true` if a
    /// stop came in during the window.
    fn reset_window(&mut self) -> Result<bool> {
        let ticks = (self.config.record.reset_secs * self.config.record.tick_rate_hz as f64)
            .round() as u64;
        if ticks == 0 {
            return Ok(false);
        }
        tracing::info!(
            "Reset window: {:.0}s to stage the next episode",
            self.config.record.reset_secs
        );
        for _ in 0..ticks {
            self.scheduler.wait();
            if self.stop.load(Ordering::SeqCst) {
                return Ok(true);
            }
            self.drain_encode_events()?;
            if let Err(e) = self.teleop_step() {
                tracing::debug!("Teleoperation failed during reset: {}", e);
            }
        }
        Ok(false)
    }

    /// Apply queued encode worker events to the dataset index
    fn drain_encode_events(&mut self) -> Result<()> {
        let events = match &self.pipeline {
            Some(pipeline) => pipeline.try_events(),
            None => return Ok(()),
        };
        for event in events {
            self.apply_encode_event(event)?;
        }
        Ok(())
    }

    fn apply_encode_event(&mut self, event: EncodeEvent) -> Result<()> {
        match event {
            EncodeEvent::Started { episode_index } => self
                .store
                .set_encoding(episode_index, EncodingStatus::InProgress),
            EncodeEvent::Finished {
                episode_index,
                result,
            } => {
                let status = match result {
                    Ok(()) => EncodingStatus::Done,
                    Err(_) => EncodingStatus::Failed,
                };
                self.store.set_encoding(episode_index, status)
            }
        }
    }

    /// Close devices and wait for outstanding encode jobs
    ///
    /// Index update failures at this point are logged rather than
    /// propagated; the episode data itself is already durable.
    fn shutdown(&mut self) {
        self.leader.close();
        self.follower.close();
        for camera in &mut self.cameras {
            camera.close();
        }

        if let Some(pipeline) = self.pipeline.take() {
            tracing::info!(
                "Waiting for encoding to finish ({} job(s) submitted)",
                pipeline.submitted()
            );
            for event in pipeline.finish() {
                if let Err(e) = self.apply_encode_event(event) {
                    tracing::error!("Failed to persist encoding status: {}", e);
                }
            }
        }
        tracing::info!("Session devices closed");
    }

    fn log_progress(&mut self, recorder: &EpisodeRecorder, at: Duration) {
        if at.saturating_sub(self.last_progress_at) < PROGRESS_INTERVAL {
            return;
        }
        self.last_progress_at = at;
        tracing::info!(
            "Episode {}: {}/{} samples, {} overruns, follower bus {:.1}% ok",
            recorder.index(),
            recorder.len(),
            recorder.target_samples(),
            self.scheduler.overruns(),
            self.follower.health().success_rate()
        );
    }

    fn camera_meta(&self) -> Vec<CameraMeta> {
        self.cameras
            .iter()
            .map(|camera| CameraMeta {
                id: camera.id().to_string(),
                width: camera.width(),
                height: camera.height(),
                fps: camera.fps(),
            })
            .collect()
    }

    /// Explicit sample target, or one sample per tick for the episode
    /// duration
    fn episode_target_samples(&self) -> u64 {
        match self.config.record.sample_target {
            Some(target) => target,
            None => {
                (self.config.record.episode_secs * self.config.record.tick_rate_hz as f64).round()
                    as u64
            }
        }
    }
}
