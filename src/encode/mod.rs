//! Asynchronous Video Encoding
//!
//! Sealed episodes carry raw RGB8 streams; turning them into video is
//! slow and must never stall the control loop, so it happens on a small
//! worker pool behind a bounded job queue. The control thread submits
//! jobs, drains completion events between ticks, and applies them to the
//! dataset index. Episodes are isolated: one failed encode marks that
//! episode `failed` and leaves its raw streams on disk for a retry, while
//! every other episode proceeds normally.
//!
//! Jobs carry paths, not pixels. The raw stream is already synced to disk
//! by the seal, so queue depth costs a few strings per episode and the
//! pipeline surviving a long backlog is just a matter of disk space.
//!
//! Submission batches: jobs collect in the pipeline until `batch_size`
//! are waiting, then all of them go to the workers at once. A full queue
//! defers jobs to the next flush instead of blocking the submitter.
//!
//! # Components
//!
//! - [`VideoEncoder`] - One camera stream in, one video file out
//! - [`EncodeJob`] - Everything a worker needs to encode one episode
//! - [`EncodeEvent`] - Progress reports back to the control thread
//! - [`EncodePipeline`] - Queue, batching, and worker pool

pub mod ffmpeg;

pub use ffmpeg::FfmpegEncoder;

use crate::dataset::raw_artifact_path;
use crate::episode::CameraMeta;
use crate::error::{Result, TelerecError};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Encodes one camera's raw stream into a video artifact
pub trait VideoEncoder: Send + Sync {
    /// Encode `cam_<id>.rgb24` in `episode_dir` to a video file, played
    /// back at the session tick rate, and return the output path
    fn encode_stream(
        &self,
        episode_dir: &Path,
        camera: &CameraMeta,
        tick_rate_hz: u32,
    ) -> Result<PathBuf>;
}

/// One episode's encoding work
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub episode_index: u64,
    pub episode_dir: PathBuf,
    pub cameras: Vec<CameraMeta>,
    pub tick_rate_hz: u32,
    /// Keep the raw streams even after a successful encode
    pub keep_raw: bool,
}

/// Progress report from a worker to the control thread
#[derive(Debug)]
pub enum EncodeEvent {
    /// A worker picked the episode up
    Started { episode_index: u64 },
    /// All camera streams finished, or the first failure
    Finished {
        episode_index: u64,
        result: Result<()>,
    },
}

/// Bounded queue and worker pool for episode encoding
pub struct EncodePipeline {
    job_sender: Option<Sender<EncodeJob>>,
    event_receiver: Receiver<EncodeEvent>,
    /// Jobs collected toward the next batch (or deferred by a full queue)
    pending: Vec<EncodeJob>,
    batch_size: usize,
    workers: Vec<std::thread::JoinHandle<()>>,
    submitted: u64,
}

impl EncodePipeline {
    pub fn new(
        encoder: Arc<dyn VideoEncoder>,
        workers: usize,
        queue_depth: usize,
        batch_size: usize,
    ) -> Self {
        let (job_sender, job_receiver) = bounded::<EncodeJob>(queue_depth.max(1));
        let (event_sender, event_receiver) = unbounded::<EncodeEvent>();

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                let jobs = job_receiver.clone();
                let events = event_sender.clone();
                let encoder = encoder.clone();
                std::thread::spawn(move || worker_loop(worker_id, jobs, events, encoder))
            })
            .collect();

        Self {
            job_sender: Some(job_sender),
            event_receiver,
            pending: Vec::new(),
            batch_size: batch_size.max(1),
            workers,
            submitted: 0,
        }
    }

    /// Queue one episode; hands the batch to the workers once it is full
    pub fn submit(&mut self, job: EncodeJob) {
        tracing::debug!("Episode {} queued for encoding", job.episode_index);
        self.pending.push(job);
        self.submitted += 1;
        if self.pending.len() >= self.batch_size {
            self.flush();
        }
    }

    /// Push collected jobs to the workers without waiting for a batch
    pub fn flush(&mut self) {
        let Some(sender) = &self.job_sender else {
            return;
        };

        let mut deferred = Vec::new();
        for job in self.pending.drain(..) {
            match sender.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(job)) => deferred.push(job),
                Err(TrySendError::Disconnected(job)) => {
                    tracing::error!(
                        "Encode workers are gone; episode {} stays deferred",
                        job.episode_index
                    );
                    deferred.push(job);
                }
            }
        }
        if !deferred.is_empty() {
            tracing::warn!(
                "Encode queue full, deferring {} episode(s) to the next flush",
                deferred.len()
            );
            self.pending = deferred;
        }
    }

    /// Jobs not yet handed to the workers
    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    /// Episodes submitted over the pipeline's lifetime
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Drain progress events without blocking
    pub fn try_events(&self) -> Vec<EncodeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Flush everything, wait for the workers, and return final events
    pub fn finish(mut self) -> Vec<EncodeEvent> {
        if let Some(sender) = self.job_sender.take() {
            for job in self.pending.drain(..) {
                if sender.send(job).is_err() {
                    tracing::error!("Encode workers gone during shutdown");
                    break;
                }
            }
            // Workers exit when the channel closes
            drop(sender);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.try_events()
    }
}

fn worker_loop(
    worker_id: usize,
    jobs: Receiver<EncodeJob>,
    events: Sender<EncodeEvent>,
    encoder: Arc<dyn VideoEncoder>,
) {
    while let Ok(job) = jobs.recv() {
        let episode_index = job.episode_index;
        let _ = events.send(EncodeEvent::Started { episode_index });

        let started = Instant::now();
        let result = encode_job(&*encoder, &job);
        match &result {
            Ok(()) => tracing::info!(
                "Episode {} encoded in {:.1}s (worker {})",
                episode_index,
                started.elapsed().as_secs_f64(),
                worker_id
            ),
            Err(e) => tracing::error!("Episode {} encoding failed: {}", episode_index, e),
        }
        let _ = events.send(EncodeEvent::Finished {
            episode_index,
            result,
        });
    }
    tracing::debug!("Encode worker {} exiting", worker_id);
}

fn encode_job(encoder: &dyn VideoEncoder, job: &EncodeJob) -> Result<()> {
    for camera in &job.cameras {
        encoder
            .encode_stream(&job.episode_dir, camera, job.tick_rate_hz)
            .map_err(|e| {
                TelerecError::encoding(job.episode_index, format!("camera '{}': {}", camera.id, e))
            })?;
    }

    // Raw streams are the recovery source; they go only after every
    // camera encoded
    if !job.keep_raw {
        for camera in &job.cameras {
            let raw = raw_artifact_path(&job.episode_dir, &camera.id);
            if let Err(e) = std::fs::remove_file(&raw) {
                tracing::warn!("Could not remove {}: {}", raw.display(), e);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::video_artifact_path;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Test encoder that records calls and fails on request
    struct StubEncoder {
        encoded: Mutex<Vec<(PathBuf, String)>>,
        fail_dirs: Vec<PathBuf>,
    }

    impl StubEncoder {
        fn new() -> Self {
            Self {
                encoded: Mutex::new(Vec::new()),
                fail_dirs: Vec::new(),
            }
        }

        fn failing_on(dir: PathBuf) -> Self {
            Self {
                encoded: Mutex::new(Vec::new()),
                fail_dirs: vec![dir],
            }
        }
    }

    impl VideoEncoder for StubEncoder {
        fn encode_stream(
            &self,
            episode_dir: &Path,
            camera: &CameraMeta,
            _tick_rate_hz: u32,
        ) -> Result<PathBuf> {
            if self.fail_dirs.iter().any(|d| d == episode_dir) {
                return Err(TelerecError::camera(&camera.id, "stub failure"));
            }
            self.encoded
                .lock()
                .push((episode_dir.to_path_buf(), camera.id.clone()));
            Ok(video_artifact_path(episode_dir, &camera.id))
        }
    }

    fn camera(id: &str) -> CameraMeta {
        CameraMeta {
            id: id.to_string(),
            width: 2,
            height: 2,
            fps: 30,
        }
    }

    fn job(index: u64, dir: &Path) -> EncodeJob {
        EncodeJob {
            episode_index: index,
            episode_dir: dir.join(format!("episode_{:06}", index)),
            cameras: vec![camera("top")],
            tick_rate_hz: 30,
            keep_raw: true,
        }
    }

    #[test]
    fn test_jobs_run_and_report() {
        let tmp = tempfile::tempdir().unwrap();
        let encoder = Arc::new(StubEncoder::new());
        let mut pipeline = EncodePipeline::new(encoder.clone(), 2, 8, 1);

        for i in 0..3 {
            pipeline.submit(job(i, tmp.path()));
        }
        let events = pipeline.finish();

        let finished: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                EncodeEvent::Finished { episode_index, result } => {
                    assert!(result.is_ok());
                    Some(*episode_index)
                }
                _ => None,
            })
            .collect();
        assert_eq!(finished.len(), 3);
        assert_eq!(encoder.encoded.lock().len(), 3);
    }

    #[test]
    fn test_batching_holds_jobs_back() {
        let tmp = tempfile::tempdir().unwrap();
        let encoder = Arc::new(StubEncoder::new());
        let mut pipeline = EncodePipeline::new(encoder.clone(), 1, 8, 3);

        pipeline.submit(job(0, tmp.path()));
        pipeline.submit(job(1, tmp.path()));
        assert_eq!(pipeline.queued(), 2);
        std::thread::sleep(Duration::from_millis(50));
        assert!(encoder.encoded.lock().is_empty());

        // The third submission completes the batch
        pipeline.submit(job(2, tmp.path()));
        assert_eq!(pipeline.queued(), 0);

        let events = pipeline.finish();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, EncodeEvent::Finished { .. }))
                .count(),
            3
        );
    }

    #[test]
    fn test_one_failure_does_not_block_others() {
        let tmp = tempfile::tempdir().unwrap();
        let bad_dir = tmp.path().join("episode_000001");
        let encoder = Arc::new(StubEncoder::failing_on(bad_dir));
        let mut pipeline = EncodePipeline::new(encoder, 1, 8, 1);

        for i in 0..3 {
            pipeline.submit(job(i, tmp.path()));
        }
        let events = pipeline.finish();

        let mut ok = Vec::new();
        let mut failed = Vec::new();
        for event in &events {
            if let EncodeEvent::Finished { episode_index, result } = event {
                match result {
                    Ok(()) => ok.push(*episode_index),
                    Err(_) => failed.push(*episode_index),
                }
            }
        }
        assert_eq!(ok, vec![0, 2]);
        assert_eq!(failed, vec![1]);
    }

    #[test]
    fn test_full_queue_defers_instead_of_blocking() {
        let tmp = tempfile::tempdir().unwrap();
        // Depth 1: the queue is full whenever the single worker is busy
        let encoder = Arc::new(StubEncoder::new());
        let mut pipeline = EncodePipeline::new(encoder, 1, 1, 1);

        for i in 0..6 {
            pipeline.submit(job(i, tmp.path()));
        }
        // Deferred jobs are not lost; finish pushes them through
        let events = pipeline.finish();
        let finished = events
            .iter()
            .filter(|e| matches!(e, EncodeEvent::Finished { .. }))
            .count();
        assert_eq!(finished, 6);
    }

    #[test]
    fn test_successful_encode_removes_raw_when_asked() {
        let tmp = tempfile::tempdir().unwrap();
        let mut raw_job = job(0, tmp.path());
        raw_job.keep_raw = false;
        std::fs::create_dir_all(&raw_job.episode_dir).unwrap();
        let raw = raw_artifact_path(&raw_job.episode_dir, "top");
        std::fs::write(&raw, [0u8; 12]).unwrap();

        let mut pipeline = EncodePipeline::new(Arc::new(StubEncoder::new()), 1, 4, 1);
        pipeline.submit(raw_job);
        pipeline.finish();

        assert!(!raw.exists());
    }
}
