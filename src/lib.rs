//! # Telerec-RS: Teleoperated Robot Data Recorder
//!
//! A data-collection tool for robot imitation learning. An operator moves a
//! leader arm; a follower arm mirrors it at a fixed tick rate while cameras
//! record. Every tick captures one sample (observation, action, one frame per
//! camera), samples are cut into episodes, and episodes are committed to an
//! on-disk dataset that survives crashes and resumes cleanly.
//!
//! ## Architecture
//!
//! - **Devices**: Serial servo buses (or simulated arms) and camera capture
//!   threads publishing into latest-frame cells
//! - **Session**: The fixed-rate control loop pairing leader actions with
//!   follower observations and camera frames
//! - **Dataset**: Durable episode artifacts plus an atomically-replaced
//!   index, so a crash never leaves a half-visible episode
//! - **Encoding**: A batched worker pool turning raw frame streams into
//!   video files with ffmpeg, off the tick path
//! - **Communication**: Crossbeam channels between the loop and the encode
//!   workers; single-slot cells between cameras and the loop
//!
//! ## Configuration
//!
//! Sessions are described by `telerec.toml` in the working directory (or the
//! path in `TELEREC_CONFIG`). Datasets default to the platform data
//! directory under `telerec-rs/datasets/`; see [`config`] for the full
//! layout and defaults.
//!
//! ## Example
//!
//! ```ignore
//! use telerec_rs::{
//!     clock::SystemClock,
//!     config::SessionConfig,
//!     session::SessionRunner,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = SessionConfig::load_or_default()?;
//!     let (mut runner, stop) = SessionRunner::new(config, Arc::new(SystemClock::new()))?;
//!
//!     // Stop from any thread; the episode in flight seals as aborted
//!     std::thread::spawn(move || {
//!         let mut line = String::new();
//!         let _ = std::io::stdin().read_line(&mut line);
//!         stop.stop();
//!     });
//!
//!     let outcome = runner.run()?;
//!     println!("recorded {} episode(s)", outcome.completed());
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod dataset;
pub mod device;
pub mod encode;
pub mod episode;
pub mod error;
pub mod session;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock, TickScheduler};
pub use config::SessionConfig;
pub use dataset::DatasetStore;
pub use device::{ArmBus, Camera, SimArmBus};
pub use error::{Result, TelerecError};
pub use session::{SessionOutcome, SessionRunner, StopHandle};
pub use types::{EpisodeStatus, Sample, StateVector};
