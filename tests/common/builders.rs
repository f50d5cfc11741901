//! Test data builders for session configs and a stub encoder

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use telerec_rs::config::{CameraConfig, CameraTransport, SessionConfig};
use telerec_rs::encode::VideoEncoder;
use telerec_rs::episode::CameraMeta;
use telerec_rs::error::{Result, TelerecError};

/// Builder for small, fast session configs backed by simulated devices
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new(root: &Path, name: &str) -> Self {
        let mut config = SessionConfig::default();
        config.leader.joints = 3;
        config.follower.joints = 3;
        config.record.tick_rate_hz = 100;
        config.record.sample_target = Some(4);
        config.record.num_episodes = 1;
        config.record.reset_secs = 0.0;
        config.record.task = "integration test".to_string();
        config.record.max_consecutive_failures = 3;
        config.dataset.root = Some(root.to_path_buf());
        config.dataset.name = name.to_string();
        Self { config }
    }

    /// Add one synthetic camera with a small frame size
    pub fn camera(mut self, id: &str) -> Self {
        self.config.cameras.push(CameraConfig {
            id: id.to_string(),
            transport: CameraTransport::Synthetic,
            index_or_path: "0".to_string(),
            width: 32,
            height: 24,
            fps: 60,
        });
        self
    }

    pub fn episodes(mut self, count: u32) -> Self {
        self.config.record.num_episodes = count;
        self
    }

    pub fn samples(mut self, count: u64) -> Self {
        self.config.record.sample_target = Some(count);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.encoding.batch_size = size;
        self
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.config.encoding.workers = count;
        self
    }

    pub fn keep_raw(mut self) -> Self {
        self.config.encoding.keep_raw = true;
        self
    }

    pub fn resume(mut self) -> Self {
        self.config.dataset.resume = true;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

/// Encoder double that records its calls instead of running ffmpeg
///
/// Fails any episode directory registered through
/// [`fail_for`](Self::fail_for); everything else succeeds without
/// touching the filesystem.
pub struct StubEncoder {
    calls: Mutex<Vec<PathBuf>>,
    fail_dirs: Mutex<Vec<PathBuf>>,
}

impl StubEncoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_dirs: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_for(&self, episode_dir: PathBuf) {
        self.fail_dirs.lock().push(episode_dir);
    }

    /// Episode directories passed to `encode_stream`, one per camera
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().clone()
    }
}

impl VideoEncoder for StubEncoder {
    fn encode_stream(
        &self,
        episode_dir: &Path,
        camera: &CameraMeta,
        _tick_rate_hz: u32,
    ) -> Result<PathBuf> {
        self.calls.lock().push(episode_dir.to_path_buf());
        if self.fail_dirs.lock().iter().any(|dir| dir == episode_dir) {
            return Err(TelerecError::camera(&camera.id, "stub encode failure"));
        }
        Ok(telerec_rs::dataset::video_artifact_path(
            episode_dir,
            &camera.id,
        ))
    }
}
