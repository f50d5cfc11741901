//! Dual-Bus Composite Arm
//!
//! Two physical buses presented as one logical bimanual arm. State reads
//! concatenate the left half before the right half; commands are split the
//! same way. Joint names carry `left_` and `right_` prefixes so a dataset
//! records which bus each value came from.
//!
//! Opening is all-or-nothing: if either bus fails to open, any bus that
//! did open is closed again and the composite reports closed. A session
//! never starts against half an arm.

use crate::error::Result;
use crate::types::StateVector;
use std::time::Instant;

use super::{ArmBus, BusHealth};

/// Two buses composed into one logical arm
pub struct DualArmBus {
    /// Identity used in logs and errors
    name: String,
    left: Box<dyn ArmBus>,
    right: Box<dyn ArmBus>,
    /// Composite health; the halves keep their own counters too
    health: BusHealth,
}

impl DualArmBus {
    pub fn new(name: impl Into<String>, left: Box<dyn ArmBus>, right: Box<dyn ArmBus>) -> Self {
        Self {
            name: name.into(),
            left,
            right,
            health: BusHealth::default(),
        }
    }

    /// Health counters of the left bus
    pub fn left_health(&self) -> &BusHealth {
        self.left.health()
    }

    /// Health counters of the right bus
    pub fn right_health(&self) -> &BusHealth {
        self.right.health()
    }
}

impl ArmBus for DualArmBus {
    fn open(&mut self) -> Result<()> {
        self.left.open()?;
        if let Err(e) = self.right.open() {
            tracing::warn!(
                "Arm '{}': right bus failed to open, closing left bus",
                self.name
            );
            self.left.close();
            return Err(e);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.left.close();
        self.right.close();
    }

    fn is_open(&self) -> bool {
        self.left.is_open() && self.right.is_open()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn joint_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .left
            .joint_names()
            .iter()
            .map(|n| format!("left_{}", n))
            .collect();
        names.extend(self.right.joint_names().iter().map(|n| format!("right_{}", n)));
        names
    }

    fn read_state(&mut self) -> Result<StateVector> {
        let start = Instant::now();

        let left = match self.left.read_state() {
            Ok(state) => state,
            Err(e) => {
                self.health.record_read_failure();
                return Err(e);
            }
        };
        let right = match self.right.read_state() {
            Ok(state) => state,
            Err(e) => {
                self.health.record_read_failure();
                return Err(e);
            }
        };

        let elapsed = start.elapsed().as_micros().max(1) as u64;
        self.health.record_read_success(elapsed);
        Ok(StateVector::concat(&left, &right))
    }

    fn write_command(&mut self, command: &StateVector) -> Result<()> {
        let (left_cmd, right_cmd) = command.split(self.left.joint_count());

        if let Err(e) = self.left.write_command(&left_cmd) {
            self.health.record_write_failure();
            return Err(e);
        }
        if let Err(e) = self.right.write_command(&right_cmd) {
            self.health.record_write_failure();
            return Err(e);
        }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::SimArmBus;

    fn dual(left: SimArmBus, right: SimArmBus) -> DualArmBus {
        DualArmBus::new("pair", Box::new(left), Box::new(right))
    }

    #[test]
    fn test_joint_names_prefixed() {
        let arm = dual(
            SimArmBus::leader("pair_left", 2),
            SimArmBus::leader("pair_right", 2),
        );
        assert_eq!(
            arm.joint_names(),
            vec!["left_motor_0", "left_motor_1", "right_motor_0", "right_motor_1"]
        );
        assert_eq!(arm.joint_count(), 4);
    }

    #[test]
    fn test_open_is_all_or_nothing() {
        let mut arm = dual(
            SimArmBus::leader("pair_left", 2),
            SimArmBus::leader("pair_right", 2).with_open_failure(),
        );

        assert!(arm.open().is_err());
        assert!(!arm.is_open());

        // Both halves must be closed after the rollback
        assert!(arm.read_state().is_err());
    }

    #[test]
    fn test_read_concatenates_halves() {
        let mut arm = dual(
            SimArmBus::follower("pair_left", 2).with_read_delay(0),
            SimArmBus::follower("pair_right", 2).with_read_delay(0),
        );
        arm.open().unwrap();

        arm.write_command(&StateVector(vec![1.0, 2.0, 3.0, 4.0]))
            .unwrap();

        let state = arm.read_state().unwrap();
        assert_eq!(state.0, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(arm.health().successful_reads, 1);
    }

    #[test]
    fn test_half_failure_fails_the_whole_read() {
        let mut left = SimArmBus::leader("pair_left", 2).with_read_delay(0);
        left.inject_read_failures(1);
        let mut arm = dual(left, SimArmBus::leader("pair_right", 2).with_read_delay(0));
        arm.open().unwrap();

        assert!(arm.read_state().is_err());
        assert_eq!(arm.health().failed_reads, 1);
        assert_eq!(arm.health().consecutive_failures, 1);

        assert!(arm.read_state().is_ok());
        assert_eq!(arm.health().consecutive_failures, 0);
    }
}
