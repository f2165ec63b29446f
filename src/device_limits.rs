//! # Device Limits Configuration
//!
//! Per-drive limits used when planning poll reads.
//!
//! A drive may refuse FC03 reads longer than some model-specific count even
//! though Modbus allows 125 registers, and slow RS-485 converters need a
//! pause between consecutive requests. The poll plan honours both.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_READ_REGISTERS;
use crate::error::DriveError;

/// Longest FC03 read Modbus allows
pub const DEFAULT_MAX_READ_REGISTERS: u16 = MAX_READ_REGISTERS as u16;

/// Default pause between the reads of one poll tick (milliseconds)
pub const DEFAULT_INTER_REQUEST_DELAY_MS: u64 = 0;

/// Read-size and pacing limits of one drive.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use vfd_modbus::DeviceLimits;
///
/// // A drive that only answers reads of up to 8 registers
/// let limits = DeviceLimits::new()
///     .with_max_read_registers(8)
///     .with_inter_request_delay_ms(10);
///
/// assert_eq!(limits.read_block_size(), 8);
/// assert_eq!(limits.inter_request_delay(), Duration::from_millis(10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceLimits {
    /// Maximum registers per FC03 read
    pub max_read_registers: u16,
    /// Pause between the reads of one poll tick (milliseconds)
    pub inter_request_delay_ms: u64,
}

impl DeviceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum read registers.
    pub fn with_max_read_registers(mut self, count: u16) -> Self {
        self.max_read_registers = count;
        self
    }

    /// Set inter-request delay in milliseconds.
    pub fn with_inter_request_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inter_request_delay_ms = delay_ms;
        self
    }

    /// Registers per planned read, forced into 1..=125
    pub fn read_block_size(&self) -> u16 {
        self.max_read_registers.clamp(1, DEFAULT_MAX_READ_REGISTERS)
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_millis(self.inter_request_delay_ms)
    }

    /// Reject limits no drive could work with
    pub fn validate(&self) -> Result<(), DriveError> {
        if !(1..=DEFAULT_MAX_READ_REGISTERS).contains(&self.max_read_registers) {
            return Err(DriveError::configuration(format!(
                "max_read_registers {} outside 1..={}",
                self.max_read_registers, DEFAULT_MAX_READ_REGISTERS
            )));
        }
        Ok(())
    }
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_read_registers: DEFAULT_MAX_READ_REGISTERS,
            inter_request_delay_ms: DEFAULT_INTER_REQUEST_DELAY_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_allow_full_reads() {
        let limits = DeviceLimits::default();
        assert_eq!(limits.read_block_size(), 125);
        assert!(limits.inter_request_delay().is_zero());
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_block_size_is_clamped() {
        assert_eq!(DeviceLimits::new().with_max_read_registers(0).read_block_size(), 1);
        assert_eq!(DeviceLimits::new().with_max_read_registers(500).read_block_size(), 125);
        assert_eq!(DeviceLimits::new().with_max_read_registers(4).read_block_size(), 4);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(DeviceLimits::new().with_max_read_registers(0).validate().is_err());
        assert!(DeviceLimits::new().with_max_read_registers(126).validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let limits: DeviceLimits =
            serde_json::from_str(r#"{ "inter_request_delay_ms": 15 }"#).unwrap();
        assert_eq!(limits.max_read_registers, 125);
        assert_eq!(limits.inter_request_delay(), Duration::from_millis(15));
    }
}
