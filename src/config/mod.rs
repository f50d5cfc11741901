//! Configuration module for telerec-rs
//!
//! This module handles session configuration:
//! - The TOML config file describing arms, cameras, recording, and encoding
//! - Platform data-dir resolution for the default dataset root
//! - Validation before a session starts
//!
//! # Config File Location
//!
//! The binary loads `telerec.toml` from the working directory, or from the
//! path in the `TELEREC_CONFIG` environment variable when set. A missing
//! file yields defaults (simulated arms, one synthetic camera); a malformed
//! file is an error.
//!
//! # Dataset Location
//!
//! When no root is configured, datasets live under the platform data dir:
//! - **Linux**: `~/.local/share/telerec-rs/datasets/`
//! - **macOS**: `~/Library/Application Support/telerec-rs/datasets/`
//! - **Windows**: `%APPDATA%\telerec-rs\datasets\`
//!
//! A dataset with no configured name derives one as
//! `{follower id}_{day of year}`.

use crate::error::{Result, TelerecError};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "telerec-rs";

/// Default config filename, resolved against the working directory
pub const CONFIG_FILE: &str = "telerec.toml";

/// Environment variable overriding the config file path
pub const CONFIG_ENV: &str = "TELEREC_CONFIG";

/// Default control-loop rate in Hz
pub const DEFAULT_TICK_RATE_HZ: u32 = 30;

/// Default recording duration of one episode in seconds
pub const DEFAULT_EPISODE_SECS: f64 = 30.0;

/// Default reset window between episodes in seconds
pub const DEFAULT_RESET_SECS: f64 = 10.0;

/// Default number of episodes per session
pub const DEFAULT_NUM_EPISODES: u32 = 50;

/// Default joint count per arm bus
pub const DEFAULT_JOINTS: usize = 7;

/// Default serial baud rate for servo buses
pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

/// Default timeout for one bus read/write in milliseconds
pub const DEFAULT_BUS_TIMEOUT_MS: u64 = 100;

/// Default bounded wait for a camera frame in milliseconds
pub const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 200;

/// Consecutive failed ticks tolerated before the episode is truncated
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// Default camera geometry
pub const DEFAULT_CAMERA_WIDTH: u32 = 640;
pub const DEFAULT_CAMERA_HEIGHT: u32 = 480;
pub const DEFAULT_CAMERA_FPS: u32 = 30;

/// Default number of sealed episodes accumulated before encoding starts
pub const DEFAULT_ENCODE_BATCH: usize = 1;

/// Default encode worker thread count
pub const DEFAULT_ENCODE_WORKERS: usize = 2;

/// Default bound on the encode job queue
pub const DEFAULT_ENCODE_QUEUE_DEPTH: usize = 8;

// ==================== Data Directories ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Default dataset root under the application data directory
pub fn default_dataset_root() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join("datasets"))
}

// ==================== Arm Configuration ====================

/// Transport backing an arm bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArmTransport {
    /// USB-serial servo bus
    Serial,
    /// Simulated arm, no hardware required
    #[default]
    Sim,
}

impl std::fmt::Display for ArmTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArmTransport::Serial => write!(f, "serial"),
            ArmTransport::Sim => write!(f, "sim"),
        }
    }
}

/// Configuration for one logical arm (single- or dual-bus)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmConfig {
    /// Identifier used in logs and dataset naming
    #[serde(default = "default_arm_id")]
    pub id: String,

    /// Transport selection
    #[serde(default)]
    pub transport: ArmTransport,

    /// Primary bus port (e.g. `/dev/ttyACM0`)
    #[serde(default = "default_follower_port")]
    pub port: String,

    /// Secondary bus port for dual-bus (bimanual) arms; both buses must
    /// open for the arm to be usable
    #[serde(default)]
    pub port_right: Option<String>,

    /// Joints per bus
    #[serde(default = "default_joints")]
    pub joints: usize,

    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Per-operation bus timeout in milliseconds
    #[serde(default = "default_bus_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_arm_id() -> String {
    "arm".to_string()
}

fn default_follower_port() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_joints() -> usize {
    DEFAULT_JOINTS
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_bus_timeout_ms() -> u64 {
    DEFAULT_BUS_TIMEOUT_MS
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            id: default_arm_id(),
            transport: ArmTransport::Sim,
            port: default_follower_port(),
            port_right: None,
            joints: DEFAULT_JOINTS,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_BUS_TIMEOUT_MS,
        }
    }
}

impl ArmConfig {
    /// Whether this arm spans two buses
    pub fn is_dual(&self) -> bool {
        self.port_right.is_some()
    }

    /// Total joint count across buses
    pub fn total_joints(&self) -> usize {
        if self.is_dual() {
            self.joints * 2
        } else {
            self.joints
        }
    }
}

// ==================== Camera Configuration ====================

/// Backend used to grab frames from a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraTransport {
    /// Platform camera via nokhwa
    Native,
    /// Deterministic generated frames, no hardware required
    #[default]
    Synthetic,
}

impl std::fmt::Display for CameraTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraTransport::Native => write!(f, "native"),
            CameraTransport::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// Configuration for one camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Identifier used in logs, sample frames, and artifact filenames
    pub id: String,

    /// Transport selection
    #[serde(default)]
    pub transport: CameraTransport,

    /// Device index (`"0"`) or device path (`"/dev/video0"`)
    #[serde(default = "default_index_or_path")]
    pub index_or_path: String,

    /// Capture width in pixels
    #[serde(default = "default_camera_width")]
    pub width: u32,

    /// Capture height in pixels
    #[serde(default = "default_camera_height")]
    pub height: u32,

    /// Native capture rate in frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
}

fn default_index_or_path() -> String {
    "0".to_string()
}

fn default_camera_width() -> u32 {
    DEFAULT_CAMERA_WIDTH
}

fn default_camera_height() -> u32 {
    DEFAULT_CAMERA_HEIGHT
}

fn default_camera_fps() -> u32 {
    DEFAULT_CAMERA_FPS
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            id: "cam".to_string(),
            transport: CameraTransport::Synthetic,
            index_or_path: default_index_or_path(),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            fps: DEFAULT_CAMERA_FPS,
        }
    }
}

impl CameraConfig {
    /// Interpret `index_or_path` as a device index, when it is one
    pub fn native_index(&self) -> Option<u32> {
        self.index_or_path.parse().ok()
    }
}

// ==================== Recording Configuration ====================

/// Control-loop and episode timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConfig {
    /// Target control-loop rate in Hz
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,

    /// Recording duration of one episode in seconds
    #[serde(default = "default_episode_secs")]
    pub episode_secs: f64,

    /// Reset window between episodes in seconds
    #[serde(default = "default_reset_secs")]
    pub reset_secs: f64,

    /// Episodes to record before the session completes
    #[serde(default = "default_num_episodes")]
    pub num_episodes: u32,

    /// Optional sample-count target ending an episode early
    #[serde(default)]
    pub sample_target: Option<u64>,

    /// Task description recorded in episode metadata
    #[serde(default)]
    pub task: String,

    /// Consecutive failed ticks tolerated before truncating the episode
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Bounded wait for a camera frame at each tick, in milliseconds
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
}

fn default_tick_rate_hz() -> u32 {
    DEFAULT_TICK_RATE_HZ
}

fn default_episode_secs() -> f64 {
    DEFAULT_EPISODE_SECS
}

fn default_reset_secs() -> f64 {
    DEFAULT_RESET_SECS
}

fn default_num_episodes() -> u32 {
    DEFAULT_NUM_EPISODES
}

fn default_max_consecutive_failures() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_FAILURES
}

fn default_capture_timeout_ms() -> u64 {
    DEFAULT_CAPTURE_TIMEOUT_MS
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            episode_secs: DEFAULT_EPISODE_SECS,
            reset_secs: DEFAULT_RESET_SECS,
            num_episodes: DEFAULT_NUM_EPISODES,
            sample_target: None,
            task: String::new(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            capture_timeout_ms: DEFAULT_CAPTURE_TIMEOUT_MS,
        }
    }
}

// ==================== Dataset Configuration ====================

/// Dataset identity and storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatasetConfig {
    /// Root directory holding datasets; platform data dir when unset
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Dataset name; derived as `{follower id}_{day of year}` when empty
    #[serde(default)]
    pub name: String,

    /// Continue an existing dataset instead of failing on conflict
    #[serde(default)]
    pub resume: bool,
}

// ==================== Encoding Configuration ====================

/// Video encoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// Encode camera streams to video; when false, raw frames are the
    /// terminal artifact and episodes seal directly to `done`
    #[serde(default = "default_true")]
    pub video: bool,

    /// Sealed episodes accumulated before a batch is dispatched
    #[serde(default = "default_encode_batch")]
    pub batch_size: usize,

    /// Encode worker thread count
    #[serde(default = "default_encode_workers")]
    pub workers: usize,

    /// Bound on the encode job queue
    #[serde(default = "default_encode_queue_depth")]
    pub queue_depth: usize,

    /// x264 preset passed to the encoder
    #[serde(default = "default_preset")]
    pub preset: String,

    /// x264 constant rate factor
    #[serde(default = "default_crf")]
    pub crf: u32,

    /// Keep per-camera raw frame blobs after a successful encode
    #[serde(default)]
    pub keep_raw: bool,
}

fn default_true() -> bool {
    true
}

fn default_encode_batch() -> usize {
    DEFAULT_ENCODE_BATCH
}

fn default_encode_workers() -> usize {
    DEFAULT_ENCODE_WORKERS
}

fn default_encode_queue_depth() -> usize {
    DEFAULT_ENCODE_QUEUE_DEPTH
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_crf() -> u32 {
    23
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            video: true,
            batch_size: DEFAULT_ENCODE_BATCH,
            workers: DEFAULT_ENCODE_WORKERS,
            queue_depth: DEFAULT_ENCODE_QUEUE_DEPTH,
            preset: default_preset(),
            crf: 23,
            keep_raw: false,
        }
    }
}

// ==================== Session Configuration ====================

/// Complete configuration for one recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Operator-driven reference arm (read-only)
    #[serde(default = "default_leader")]
    pub leader: ArmConfig,

    /// Actuated arm mirroring the leader
    #[serde(default = "default_follower")]
    pub follower: ArmConfig,

    /// Cameras captured alongside arm state
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,

    /// Loop and episode timing
    #[serde(default)]
    pub record: RecordConfig,

    /// Dataset identity and storage
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Video encoding
    #[serde(default)]
    pub encoding: EncodingConfig,
}

fn default_leader() -> ArmConfig {
    ArmConfig {
        id: "leader".to_string(),
        port: "/dev/ttyACM1".to_string(),
        ..Default::default()
    }
}

fn default_follower() -> ArmConfig {
    ArmConfig {
        id: "follower".to_string(),
        port: "/dev/ttyACM0".to_string(),
        ..Default::default()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self {
            leader: default_leader(),
            follower: default_follower(),
            cameras: Vec::new(),
            record: RecordConfig::default(),
            dataset: DatasetConfig::default(),
            encoding: EncodingConfig::default(),
        }
    }

    /// A runnable configuration with simulated devices: sim arms plus one
    /// small synthetic camera, short episodes
    pub fn sample() -> Self {
        let mut config = Self::new();
        config.cameras.push(CameraConfig {
            id: "top".to_string(),
            transport: CameraTransport::Synthetic,
            width: 320,
            height: 240,
            fps: 30,
            ..Default::default()
        });
        config.record.episode_secs = 5.0;
        config.record.reset_secs = 2.0;
        config.record.num_episodes = 2;
        config.record.task = "sample task".to_string();
        config
    }

    /// Load a session config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TelerecError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            TelerecError::Config(format!("Failed to parse config {:?}: {}", path, e))
        })
    }

    /// Resolve the config path from `TELEREC_CONFIG` or the working
    /// directory, loading defaults when neither exists
    pub fn load_or_default() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.exists() {
            tracing::info!("Loading config from {:?}", path);
            Self::load(&path)
        } else {
            tracing::warn!("No config at {:?}, using defaults (sim devices)", path);
            Ok(Self::sample())
        }
    }

    /// Save the config as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| {
            TelerecError::Config(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, content).map_err(|e| {
            TelerecError::Config(format!("Failed to write config {:?}: {}", path, e))
        })
    }

    /// Validate the configuration before a session starts
    pub fn validate(&self) -> Result<()> {
        if self.record.tick_rate_hz == 0 {
            return Err(TelerecError::Config("tick_rate_hz must be > 0".to_string()));
        }
        if self.record.episode_secs <= 0.0 {
            return Err(TelerecError::Config("episode_secs must be > 0".to_string()));
        }
        if self.record.reset_secs < 0.0 {
            return Err(TelerecError::Config("reset_secs must be >= 0".to_string()));
        }
        if self.record.num_episodes == 0 {
            return Err(TelerecError::Config("num_episodes must be > 0".to_string()));
        }
        if self.encoding.batch_size == 0 {
            return Err(TelerecError::Config(
                "encoding.batch_size must be > 0".to_string(),
            ));
        }
        if self.encoding.workers == 0 {
            return Err(TelerecError::Config(
                "encoding.workers must be > 0".to_string(),
            ));
        }
        if self.leader.joints == 0 || self.follower.joints == 0 {
            return Err(TelerecError::Config("arm joints must be > 0".to_string()));
        }

        for cam in &self.cameras {
            if cam.id.is_empty() {
                return Err(TelerecError::Config("camera id must not be empty".to_string()));
            }
            if cam.fps == 0 || cam.width == 0 || cam.height == 0 {
                return Err(TelerecError::Config(format!(
                    "camera '{}' has invalid geometry or fps",
                    cam.id
                )));
            }
        }
        let mut ids: Vec<&str> = self.cameras.iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.cameras.len() {
            return Err(TelerecError::Config("camera ids must be unique".to_string()));
        }

        Ok(())
    }

    /// Dataset name, deriving `{follower id}_{day of year}` when unset
    pub fn dataset_name(&self) -> String {
        if self.dataset.name.is_empty() {
            let day = chrono::Utc::now().ordinal();
            format!("{}_{}", self.follower.id, day)
        } else {
            self.dataset.name.clone()
        }
    }

    /// Resolve the directory holding this session's dataset
    pub fn dataset_dir(&self) -> Result<PathBuf> {
        let root = match &self.dataset.root {
            Some(root) => root.clone(),
            None => default_dataset_root().ok_or_else(|| {
                TelerecError::Config("Could not determine dataset root directory".to_string())
            })?,
        };
        Ok(root.join(self.dataset_name()))
    }

    /// Tick period derived from the configured rate
    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.record.tick_rate_hz as f64)
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::new();
        assert_eq!(config.record.tick_rate_hz, 30);
        assert_eq!(config.leader.port, "/dev/ttyACM1");
        assert_eq!(config.follower.port, "/dev/ttyACM0");
        assert_eq!(config.leader.transport, ArmTransport::Sim);
        assert!(config.cameras.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sample_config_validates() {
        let config = SessionConfig::sample();
        assert_eq!(config.cameras.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = SessionConfig::sample();
        config.follower.port_right = Some("/dev/ttyACM2".to_string());
        config.dataset.name = "bench_test".to_string();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: SessionConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.follower.port_right, Some("/dev/ttyACM2".to_string()));
        assert_eq!(parsed.dataset.name, "bench_test");
        assert_eq!(parsed.cameras[0].id, "top");
        assert!(parsed.follower.is_dual());
        assert_eq!(parsed.follower.total_joints(), 14);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: SessionConfig = toml::from_str(
            r#"
            [record]
            tick_rate_hz = 60

            [[cameras]]
            id = "wrist"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.record.tick_rate_hz, 60);
        assert_eq!(parsed.record.num_episodes, DEFAULT_NUM_EPISODES);
        assert_eq!(parsed.cameras[0].width, DEFAULT_CAMERA_WIDTH);
        assert_eq!(parsed.cameras[0].transport, CameraTransport::Synthetic);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = SessionConfig::new();
        config.record.tick_rate_hz = 0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::new();
        config.encoding.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::new();
        config.cameras.push(CameraConfig {
            id: "a".to_string(),
            ..Default::default()
        });
        config.cameras.push(CameraConfig {
            id: "a".to_string(),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dataset_name_derivation() {
        let mut config = SessionConfig::new();
        assert!(config
            .dataset_name()
            .starts_with(&format!("{}_", config.follower.id)));

        config.dataset.name = "pick_place_v1".to_string();
        assert_eq!(config.dataset_name(), "pick_place_v1");
    }

    #[test]
    fn test_camera_native_index() {
        let mut cam = CameraConfig::default();
        assert_eq!(cam.native_index(), Some(0));

        cam.index_or_path = "/dev/video2".to_string();
        assert_eq!(cam.native_index(), None);
    }

    // env vars are process-global, so the env-driven tests run serially

    #[test]
    #[serial_test::serial]
    fn test_load_or_default_honors_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("override.toml");
        let mut config = SessionConfig::sample();
        config.dataset.name = "from_env".to_string();
        config.save(&path).unwrap();

        std::env::set_var(CONFIG_ENV, &path);
        let loaded = SessionConfig::load_or_default().unwrap();
        std::env::remove_var(CONFIG_ENV);

        assert_eq!(loaded.dataset.name, "from_env");
    }

    #[test]
    #[serial_test::serial]
    fn test_load_or_default_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "not [valid toml").unwrap();

        std::env::set_var(CONFIG_ENV, &path);
        let result = SessionConfig::load_or_default();
        std::env::remove_var(CONFIG_ENV);

        assert!(result.is_err());
    }

    #[test]
    fn test_tick_period() {
        let config = SessionConfig::new();
        assert_eq!(
            config.tick_period(),
            std::time::Duration::from_secs_f64(1.0 / 30.0)
        );
    }
}
