//! Device adapter module
//!
//! Uniform capability interfaces over the heterogeneous hardware a
//! recording session drives: bus-attached robot arms (single or dual-bus
//! bimanual configurations) and cameras. All device I/O failures are local
//! to one device; the control loop degrades that tick's coverage and keeps
//! running.
//!
//! # Components
//!
//! - [`ArmBus`] - Capability interface for arms: readable state plus
//!   writable command
//! - [`BusHealth`] - Per-bus success/latency tracking with a rolling window
//! - [`SerialArmBus`] - USB-serial servo bus implementation
//! - [`SimArmBus`] - Simulated arm driven by waveform patterns
//! - [`DualArmBus`] - Two buses composed into one logical bimanual arm
//! - [`Camera`] / [`FrameGrabber`] - Capability interface for cameras,
//!   with native (nokhwa) and synthetic grabbers
//!
//! Transports are selected at runtime from configuration; simulated
//! devices are ordinary backends, not a compile-time feature, so a session
//! can run end-to-end on a machine with no hardware attached.

pub mod camera;
pub mod dual;
pub mod serial_bus;
pub mod sim;

pub use camera::{open_cameras, Camera, FrameGrabber, FrameSnapshot, LatestFrameCell};
pub use dual::DualArmBus;
pub use serial_bus::SerialArmBus;
pub use sim::{SimArmBus, WaveformPattern};

use crate::config::{ArmConfig, ArmTransport};
use crate::error::Result;
use crate::types::StateVector;
use std::collections::VecDeque;

/// Size of the rolling window for recent bus read times
const RECENT_WINDOW_SIZE: usize = 100;

/// Which side of the teleoperation pair a device plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    /// Operator-driven reference arm, read-only
    Leader,
    /// Actuated arm mirroring the leader
    Follower,
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRole::Leader => write!(f, "leader"),
            DeviceRole::Follower => write!(f, "follower"),
        }
    }
}

/// Health tracking for one arm bus
///
/// Tracks totals, a rolling latency window, and the current run of
/// consecutive failures across reads and writes.
#[derive(Debug, Clone)]
pub struct BusHealth {
    /// Total successful state reads
    pub successful_reads: u64,
    /// Total failed state reads
    pub failed_reads: u64,
    /// Total successful command writes
    pub successful_writes: u64,
    /// Total failed command writes
    pub failed_writes: u64,
    /// Length of the current run of failures (reads or writes)
    pub consecutive_failures: u32,
    /// Total read time in microseconds
    pub total_read_time_us: u64,
    /// Last read time in microseconds
    pub last_read_time_us: u64,
    /// Rolling window of recent read times
    pub recent_read_times: VecDeque<u64>,
}

impl Default for BusHealth {
    fn default() -> Self {
        Self {
            successful_reads: 0,
            failed_reads: 0,
            successful_writes: 0,
            failed_writes: 0,
            consecutive_failures: 0,
            total_read_time_us: 0,
            last_read_time_us: 0,
            recent_read_times: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
        }
    }
}

impl BusHealth {
    /// Record a successful state read with its latency
    pub fn record_read_success(&mut self, time_us: u64) {
        self.successful_reads += 1;
        self.total_read_time_us += time_us;
        self.last_read_time_us = time_us;
        self.consecutive_failures = 0;

        self.recent_read_times.push_back(time_us);
        if self.recent_read_times.len() > RECENT_WINDOW_SIZE {
            self.recent_read_times.pop_front();
        }
    }

    /// Record a failed state read
    pub fn record_read_failure(&mut self) {
        self.failed_reads += 1;
        self.consecutive_failures += 1;
    }

    /// Record a successful command write
    pub fn record_write_success(&mut self) {
        self.successful_writes += 1;
        self.consecutive_failures = 0;
    }

    /// Record a failed command write
    pub fn record_write_failure(&mut self) {
        self.failed_writes += 1;
        self.consecutive_failures += 1;
    }

    /// Average read time in microseconds
    pub fn avg_read_time_us(&self) -> f64 {
        if self.successful_reads == 0 {
            0.0
        } else {
            self.total_read_time_us as f64 / self.successful_reads as f64
        }
    }

    /// Success rate across reads and writes, as a percentage
    pub fn success_rate(&self) -> f64 {
        let ok = self.successful_reads + self.successful_writes;
        let failed = self.failed_reads + self.failed_writes;
        let total = ok + failed;
        if total == 0 {
            100.0
        } else {
            (ok as f64 / total as f64) * 100.0
        }
    }

    /// Jitter (max - min) over the recent window in microseconds
    pub fn jitter_us(&self) -> u64 {
        let min = self.recent_read_times.iter().min().copied().unwrap_or(0);
        let max = self.recent_read_times.iter().max().copied().unwrap_or(0);
        max.saturating_sub(min)
    }

    /// Reset all health counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Capability interface for a robot arm bus
///
/// Leaders are read-only users of this trait; followers also receive
/// commands. Implementations must be `Send` so the session can own the
/// device on its control thread regardless of where it was built.
pub trait ArmBus: Send {
    /// Open the bus; all sub-buses of a composite arm must be ready for
    /// the arm to count as open
    fn open(&mut self) -> Result<()>;

    /// Close the bus, releasing the port
    fn close(&mut self);

    /// Whether the bus is open
    fn is_open(&self) -> bool;

    /// Identity used in logs and errors
    fn name(&self) -> &str;

    /// Joint names in the order `read_state` and `write_command` use
    fn joint_names(&self) -> Vec<String>;

    /// Number of joints
    fn joint_count(&self) -> usize {
        self.joint_names().len()
    }

    /// Read the current joint positions
    fn read_state(&mut self) -> Result<StateVector>;

    /// Send target joint positions
    fn write_command(&mut self, command: &StateVector) -> Result<()>;

    /// Health counters for this bus
    fn health(&self) -> &BusHealth;

    /// Mutable health counters
    fn health_mut(&mut self) -> &mut BusHealth;

    /// Reset health counters
    fn reset_health(&mut self) {
        self.health_mut().reset();
    }
}

/// Default joint naming for an arm: `motor_0` .. `motor_{n-1}`
pub fn default_joint_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("motor_{}", i)).collect()
}

/// Build and open the arm for a role from its configuration
///
/// Dual-bus configurations compose two buses and require both to open;
/// a partial open is rolled back before the error is returned.
pub fn open_arm(role: DeviceRole, config: &ArmConfig) -> Result<Box<dyn ArmBus>> {
    let mut arm = build_arm(role, config);
    arm.open()?;
    tracing::info!(
        "Opened {} arm '{}' ({} joints, {} transport)",
        role,
        arm.name(),
        arm.joint_count(),
        config.transport
    );
    Ok(arm)
}

/// Build the arm for a role without opening it
pub fn build_arm(role: DeviceRole, config: &ArmConfig) -> Box<dyn ArmBus> {
    match &config.port_right {
        Some(port_right) => {
            let left = build_single(role, config, &config.port, &format!("{}_left", config.id));
            let right = build_single(role, config, port_right, &format!("{}_right", config.id));
            Box::new(DualArmBus::new(config.id.clone(), left, right))
        }
        None => build_single(role, config, &config.port, &config.id),
    }
}

fn build_single(
    role: DeviceRole,
    config: &ArmConfig,
    port: &str,
    name: &str,
) -> Box<dyn ArmBus> {
    match config.transport {
        ArmTransport::Serial => Box::new(SerialArmBus::new(
            name,
            port,
            config.joints,
            config.baud_rate,
            std::time::Duration::from_millis(config.timeout_ms),
        )),
        ArmTransport::Sim => match role {
            DeviceRole::Leader => Box::new(SimArmBus::leader(name, config.joints)),
            DeviceRole::Follower => Box::new(SimArmBus::follower(name, config.joints)),
        },
    }
}
