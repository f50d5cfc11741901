//! Simulated Arm Implementation
//!
//! This module provides a simulated arm bus that can be used to run a full
//! recording session without real hardware. Leader-side instances generate
//! joint motion from configurable waveform patterns; follower-side
//! instances echo the last command they were sent, like a servo bus
//! reading back its own targets.
//!
//! # Features
//!
//! - **Pattern-based motion**: Per-joint waveforms with phase variation
//! - **Command echo**: Follower mode reads back the last written command
//! - **Noise simulation**: Add configurable noise to generated positions
//! - **Failure injection**: Script open and read failures for tests
//!
//! # Waveform Patterns
//!
//! - [`WaveformPattern::Constant`] - Fixed position
//! - [`WaveformPattern::Sine`] - Sinusoidal sweep with configurable
//!   frequency and amplitude
//! - [`WaveformPattern::Sawtooth`] - Linear ramp that resets periodically
//! - [`WaveformPattern::Triangle`] - Triangle sweep

use crate::error::{Result, TelerecError};
use crate::types::StateVector;
use std::time::Instant;

use super::{default_joint_names, ArmBus, BusHealth};

/// Pattern for generating simulated joint motion
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaveformPattern {
    /// Constant position
    Constant(f64),
    /// Sine sweep with frequency and amplitude
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Sawtooth sweep
    Sawtooth { period: f64, amplitude: f64 },
    /// Triangle sweep
    Triangle { period: f64, amplitude: f64 },
}

impl Default for WaveformPattern {
    fn default() -> Self {
        WaveformPattern::Sine {
            frequency: 0.25,
            amplitude: 30.0,
            offset: 0.0,
        }
    }
}

impl WaveformPattern {
    /// Evaluate the pattern at an elapsed time with a phase offset
    pub fn value_at(&self, elapsed_secs: f64, phase: f64) -> f64 {
        match *self {
            WaveformPattern::Constant(v) => v,
            WaveformPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => {
                offset
                    + amplitude
                        * (2.0 * std::f64::consts::PI * frequency * elapsed_secs + phase).sin()
            }
            WaveformPattern::Sawtooth { period, amplitude } => {
                let shift = phase / (2.0 * std::f64::consts::PI) * period;
                let t = (elapsed_secs + shift) % period;
                amplitude * (t / period)
            }
            WaveformPattern::Triangle { period, amplitude } => {
                let shift = phase / (2.0 * std::f64::consts::PI) * period;
                let t = (elapsed_secs + shift) % period;
                let half = period / 2.0;
                if t < half {
                    amplitude * (2.0 * t / half - 1.0)
                } else {
                    amplitude * (1.0 - 2.0 * (t - half) / half)
                }
            }
        }
    }
}

/// Simple pseudo-random number generator (no external dependency)
fn rand_unit() -> f64 {
    use std::cell::Cell;
    thread_local! {
        static SEED: Cell<u64> = Cell::new(0x5DEECE66D);
    }
    SEED.with(|seed| {
        let mut s = seed.get();
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        seed.set(s);
        (s as f64) / (u64::MAX as f64)
    })
}

/// How the simulated bus produces joint positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimMode {
    /// Generate positions from waveform patterns (leader side)
    Pattern,
    /// Read back the last written command (follower side)
    Echo,
}

/// Simulated arm bus for running sessions without hardware
pub struct SimArmBus {
    /// Identity used in logs and errors
    name: String,
    /// Whether the bus is "open"
    open: bool,
    /// Position source
    mode: SimMode,
    /// Joint names in read order
    joint_names: Vec<String>,
    /// Per-joint waveform (pattern mode)
    patterns: Vec<WaveformPattern>,
    /// Last command written (echo mode reads this back)
    last_command: Option<StateVector>,
    /// Time base for pattern generation
    start_time: Instant,
    /// Noise amplitude added to every position (0.0 = no noise)
    noise_amplitude: f64,
    /// Simulated bus latency per transaction in microseconds
    read_delay_us: u64,
    /// Remaining scripted read failures
    fail_reads: u32,
    /// Fail the next `open` call
    fail_open: bool,
    /// Bus health counters
    health: BusHealth,
}

impl SimArmBus {
    /// Create a leader-side simulated arm with default sine motion
    pub fn leader(name: impl Into<String>, joints: usize) -> Self {
        Self::with_mode(name, joints, SimMode::Pattern)
    }

    /// Create a follower-side simulated arm that echoes commands
    pub fn follower(name: impl Into<String>, joints: usize) -> Self {
        Self::with_mode(name, joints, SimMode::Echo)
    }

    fn with_mode(name: impl Into<String>, joints: usize, mode: SimMode) -> Self {
        Self {
            name: name.into(),
            open: false,
            mode,
            joint_names: default_joint_names(joints),
            patterns: vec![WaveformPattern::default(); joints],
            last_command: None,
            start_time: Instant::now(),
            noise_amplitude: 0.0,
            read_delay_us: 100,
            fail_reads: 0,
            fail_open: false,
            health: BusHealth::default(),
        }
    }

    /// Set the waveform for every joint
    pub fn with_pattern(mut self, pattern: WaveformPattern) -> Self {
        self.patterns = vec![pattern; self.patterns.len()];
        self
    }

    /// Set the waveform for one joint
    pub fn set_joint_pattern(&mut self, joint: usize, pattern: WaveformPattern) {
        if let Some(slot) = self.patterns.get_mut(joint) {
            *slot = pattern;
        }
    }

    /// Add noise to generated positions
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    /// Set the simulated per-transaction latency
    pub fn with_read_delay(mut self, delay_us: u64) -> Self {
        self.read_delay_us = delay_us;
        self
    }

    /// Make the next `open` call fail
    pub fn with_open_failure(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Fail the next `count` state reads
    pub fn inject_read_failures(&mut self, count: u32) {
        self.fail_reads = count;
    }

    fn generate_state(&self) -> StateVector {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let joints = self.joint_names.len();
        let values = match self.mode {
            SimMode::Echo => match &self.last_command {
                Some(command) => command.0.clone(),
                None => vec![0.0; joints],
            },
            SimMode::Pattern => self
                .patterns
                .iter()
                .enumerate()
                .map(|(i, pattern)| {
                    // Unique phase per joint so the arm does not move in lockstep
                    let phase = i as f64 / joints.max(1) as f64 * 2.0 * std::f64::consts::PI;
                    pattern.value_at(elapsed, phase)
                })
                .collect(),
        };

        let values = if self.noise_amplitude > 0.0 {
            values
                .into_iter()
                .map(|v| v + (rand_unit() - 0.5) * 2.0 * self.noise_amplitude)
                .collect()
        } else {
            values
        };

        StateVector(values)
    }
}

impl ArmBus for SimArmBus {
    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            self.fail_open = false;
            return Err(TelerecError::device(
                &self.name,
                "simulated open failure".to_string(),
            ));
        }
        self.open = true;
        self.start_time = Instant::now();
        tracing::debug!("Simulated arm '{}' opened", self.name);
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        tracing::debug!("Simulated arm '{}' closed", self.name);
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn joint_names(&self) -> Vec<String> {
        self.joint_names.clone()
    }

    fn read_state(&mut self) -> Result<StateVector> {
        if !self.open {
            self.health.record_read_failure();
            return Err(TelerecError::device(&self.name, "bus not open".to_string()));
        }

        let start = Instant::now();
        if self.read_delay_us > 0 {
            std::thread::sleep(std::time::Duration::from_micros(self.read_delay_us));
        }

        if self.fail_reads > 0 {
            self.fail_reads -= 1;
            self.health.record_read_failure();
            return Err(TelerecError::device(
                &self.name,
                "simulated read failure".to_string(),
            ));
        }

        let state = self.generate_state();
        // Minimum 1us to keep latency stats non-degenerate
        let elapsed = start.elapsed().as_micros().max(1) as u64;
        self.health.record_read_success(elapsed);
        Ok(state)
    }

    fn write_command(&mut self, command: &StateVector) -> Result<()> {
        if !self.open {
            self.health.record_write_failure();
            return Err(TelerecError::device(&self.name, "bus not open".to_string()));
        }
        if command.len() != self.joint_names.len() {
            self.health.record_write_failure();
            return Err(TelerecError::device(
                &self.name,
                format!(
                    "command has {} values, arm has {} joints",
                    command.len(),
                    self.joint_names.len()
                ),
            ));
        }

        self.last_command = Some(command.clone());
        self.health.record_write_success();
        Ok(())
    }

    fn health(&self) -> &BusHealth {
        &self.health
    }

    fn health_mut(&mut self) -> &mut BusHealth {
        &mut self.health
    }
}
