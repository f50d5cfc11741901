//! Serial Servo Bus Implementation
//!
//! Arm bus over a USB-serial servo chain. Each joint is one servo with a
//! 1-based id; joint state is the present-position register of every servo
//! read in id order, and a command writes every goal-position register.
//!
//! Packets use the classic half-duplex servo framing: `0xFF 0xFF` header,
//! id, length, instruction, parameters, and a ones-complement checksum.
//! Positions are raw 12-bit counts (0..=4095) carried as `f64`.

use crate::error::{Result, TelerecError};
use crate::types::StateVector;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use super::{default_joint_names, ArmBus, BusHealth};

const HEADER: [u8; 2] = [0xFF, 0xFF];
const INSTR_READ: u8 = 0x02;
const INSTR_WRITE: u8 = 0x03;
/// Goal position register (2 bytes, little endian)
const REG_GOAL_POSITION: u8 = 0x2A;
/// Present position register (2 bytes, little endian)
const REG_PRESENT_POSITION: u8 = 0x38;
/// Position counts span a 12-bit space
const POSITION_MAX: f64 = 4095.0;

/// Ones-complement checksum over id, length, instruction, and parameters
fn checksum(payload: &[u8]) -> u8 {
    !payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Build a read-register packet
fn read_packet(id: u8, reg: u8, count: u8) -> Vec<u8> {
    let payload = [id, 4, INSTR_READ, reg, count];
    let mut packet = Vec::with_capacity(HEADER.len() + payload.len() + 1);
    packet.extend_from_slice(&HEADER);
    packet.extend_from_slice(&payload);
    packet.push(checksum(&payload));
    packet
}

/// Build a write-register packet for a 2-byte value
fn write_packet(id: u8, reg: u8, value: u16) -> Vec<u8> {
    let [lo, hi] = value.to_le_bytes();
    let payload = [id, 5, INSTR_WRITE, reg, lo, hi];
    let mut packet = Vec::with_capacity(HEADER.len() + payload.len() + 1);
    packet.extend_from_slice(&HEADER);
    packet.extend_from_slice(&payload);
    packet.push(checksum(&payload));
    packet
}

/// Parse an 8-byte read response carrying a 2-byte value
fn parse_read_response(resp: &[u8; 8], expected_id: u8) -> std::result::Result<u16, String> {
    if resp[0..2] != HEADER {
        return Err(format!("bad header {:02X} {:02X}", resp[0], resp[1]));
    }
    if resp[2] != expected_id {
        return Err(format!("response from servo {} expected {}", resp[2], expected_id));
    }
    if resp[4] != 0 {
        return Err(format!("servo error status 0x{:02X}", resp[4]));
    }
    if checksum(&resp[2..7]) != resp[7] {
        return Err("checksum mismatch".to_string());
    }
    Ok(u16::from_le_bytes([resp[5], resp[6]]))
}

/// Parse a 6-byte status response to a write
fn parse_status_response(resp: &[u8; 6], expected_id: u8) -> std::result::Result<(), String> {
    if resp[0..2] != HEADER {
        return Err(format!("bad header {:02X} {:02X}", resp[0], resp[1]));
    }
    if resp[2] != expected_id {
        return Err(format!("response from servo {} expected {}", resp[2], expected_id));
    }
    if resp[4] != 0 {
        return Err(format!("servo error status 0x{:02X}", resp[4]));
    }
    if checksum(&resp[2..5]) != resp[5] {
        return Err("checksum mismatch".to_string());
    }
    Ok(())
}

/// Arm bus over a USB-serial servo chain
pub struct SerialArmBus {
    /// Identity used in logs and errors
    name: String,
    /// Serial device path, e.g. `/dev/ttyACM0`
    port_path: String,
    /// Joint names in servo-id order
    joint_names: Vec<String>,
    /// Baud rate for the servo chain
    baud_rate: u32,
    /// Per-transaction timeout
    timeout: Duration,
    /// Open port handle, `None` when closed
    port: Option<Box<dyn serialport::SerialPort>>,
    /// Bus health counters
    health: BusHealth,
}

impl SerialArmBus {
    pub fn new(
        name: impl Into<String>,
        port_path: impl Into<String>,
        joints: usize,
        baud_rate: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            port_path: port_path.into(),
            joint_names: default_joint_names(joints),
            baud_rate,
            timeout,
            port: None,
            health: BusHealth::default(),
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        let name = &self.name;
        self.port
            .as_mut()
            .ok_or_else(|| TelerecError::device(name, "bus not open"))
    }

    /// One read transaction: request a 2-byte register from one servo
    fn read_register(&mut self, id: u8, reg: u8) -> Result<u16> {
        let name = self.name.clone();
        let packet = read_packet(id, reg, 2);
        let port = self.port_mut()?;

        port.write_all(&packet)
            .map_err(|e| TelerecError::device(&name, format!("write to servo {}: {}", id, e)))?;

        let mut resp = [0u8; 8];
        port.read_exact(&mut resp)
            .map_err(|e| TelerecError::device(&name, format!("read from servo {}: {}", id, e)))?;

        parse_read_response(&resp, id).map_err(|msg| TelerecError::device(&name, msg))
    }

    /// One write transaction: set a 2-byte register on one servo
    fn write_register(&mut self, id: u8, reg: u8, value: u16) -> Result<()> {
        let name = self.name.clone();
        let packet = write_packet(id, reg, value);
        let port = self.port_mut()?;

        port.write_all(&packet)
            .map_err(|e| TelerecError::device(&name, format!("write to servo {}: {}", id, e)))?;

        let mut resp = [0u8; 6];
        port.read_exact(&mut resp)
            .map_err(|e| TelerecError::device(&name, format!("status from servo {}: {}", id, e)))?;

        parse_status_response(&resp, id).map_err(|msg| TelerecError::device(&name, msg))
    }
}

impl ArmBus for SerialArmBus {
    fn open(&mut self) -> Result<()> {
        let port = serialport::new(&self.port_path, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| {
                TelerecError::device(&self.name, format!("open {}: {}", self.port_path, e))
            })?;

        port.clear(serialport::ClearBuffer::All)
            .map_err(|e| TelerecError::device(&self.name, format!("clear buffers: {}", e)))?;

        self.port = Some(port);
        tracing::debug!(
            "Serial arm '{}' opened on {} at {} baud",
            self.name,
            self.port_path,
            self.baud_rate
        );
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::debug!("Serial arm '{}' closed", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn joint_names(&self) -> Vec<String> {
        self.joint_names.clone()
    }

    fn read_state(&mut self) -> Result<StateVector> {
        let start = Instant::now();
        let mut values = Vec::with_capacity(self.joint_names.len());

        // Servo ids are 1-based on the chain
        for id in 1..=self.joint_names.len() as u8 {
            match self.read_register(id, REG_PRESENT_POSITION) {
                Ok(raw) => values.push(raw as f64),
                Err(e) => {
                    self.health.record_read_failure();
                    return Err(e);
                }
            }
        }

        let elapsed = start.elapsed().as_micros().max(1) as u64;
        self.health.record_read_success(elapsed);
        Ok(StateVector(values))
    }

    fn write_command(&mut self, command: &StateVector) -> Result<()> {
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

        for (i, value) in command.0.iter().enumerate() {
            let id = (i + 1) as u8;
            let counts = value.round().clamp(0.0, POSITION_MAX) as u16;
            if let Err(e) = self.write_register(id, REG_GOAL_POSITION, counts) {
                self.health.record_write_failure();
                return Err(e);
            }
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

    #[test]
    fn test_checksum() {
        // Read present position of servo 1: sum = 1+4+2+0x38+2 = 0x41
        assert_eq!(checksum(&[1, 4, INSTR_READ, REG_PRESENT_POSITION, 2]), 0xBE);
    }

    #[test]
    fn test_read_packet_layout() {
        let packet = read_packet(3, REG_PRESENT_POSITION, 2);
        assert_eq!(packet.len(), 8);
        assert_eq!(&packet[0..2], &HEADER);
        assert_eq!(packet[2], 3);
        assert_eq!(packet[3], 4);
        assert_eq!(packet[4], INSTR_READ);
        assert_eq!(packet[5], REG_PRESENT_POSITION);
        assert_eq!(packet[6], 2);
        assert_eq!(packet[7], checksum(&packet[2..7]));
    }

    #[test]
    fn test_write_packet_layout() {
        let packet = write_packet(1, REG_GOAL_POSITION, 0x0208);
        assert_eq!(packet.len(), 9);
        assert_eq!(packet[4], INSTR_WRITE);
        // Little endian value bytes
        assert_eq!(packet[6], 0x08);
        assert_eq!(packet[7], 0x02);
        assert_eq!(packet[8], checksum(&packet[2..8]));
    }

    #[test]
    fn test_parse_read_response_roundtrip() {
        let payload = [1u8, 4, 0, 0x10, 0x02];
        let mut resp = [0u8; 8];
        resp[0..2].copy_from_slice(&HEADER);
        resp[2..7].copy_from_slice(&payload);
        resp[7] = checksum(&payload);

        assert_eq!(parse_read_response(&resp, 1).unwrap(), 0x0210);
        assert!(parse_read_response(&resp, 2).is_err());

        resp[7] ^= 0xFF;
        assert!(parse_read_response(&resp, 1).unwrap_err().contains("checksum"));
    }

    #[test]
    fn test_parse_status_response_error_bit() {
        let payload = [5u8, 2, 0x20];
        let mut resp = [0u8; 6];
        resp[0..2].copy_from_slice(&HEADER);
        resp[2..5].copy_from_slice(&payload);
        resp[5] = checksum(&payload);

        let err = parse_status_response(&resp, 5).unwrap_err();
        assert!(err.contains("0x20"));
    }

    #[test]
    fn test_open_missing_port_fails() {
        let mut arm = SerialArmBus::new(
            "arm",
            "/dev/nonexistent-telerec-port",
            6,
            1_000_000,
            Duration::from_millis(50),
        );
        assert!(arm.open().is_err());
        assert!(!arm.is_open());
    }
}
