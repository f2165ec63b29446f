//! Modbus RTU and drive-link constants
//!
//! Frame sizes follow the Modbus over serial line specification:
//! - RS485 ADU: 256 bytes maximum (station + PDU + CRC)
//! - Register limits are derived from the PDU size

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum RTU ADU size on an RS485 line
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Maximum PDU (Protocol Data Unit) size
///
/// RS485 ADU (256 bytes) - Station Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = MAX_RTU_FRAME_SIZE - 3;

/// Smallest frame that can carry a CRC: station + function + CRC(2)
pub const MIN_FRAME_LEN: usize = 4;

/// Exception frame: station + (function | 0x80) + exception code + CRC(2)
pub const EXCEPTION_FRAME_LEN: usize = 5;

/// FC03 request and FC06 request/response: station + fc + 2×u16 + CRC(2)
pub const FIXED_FRAME_LEN: usize = 8;

/// FC03 response overhead: station + fc + byte count + CRC(2)
pub const READ_RESPONSE_OVERHEAD: usize = 5;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03 (Read Holding Registers)
///
/// Calculation for response PDU:
/// - Function Code: 1 byte
/// - Byte Count: 1 byte
/// - Register Data: N × 2 bytes
/// - Total: 1 + 1 + (N × 2) ≤ 253
/// - Therefore: N ≤ (253 - 2) / 2 = 125.5 → 125 registers
pub const MAX_READ_REGISTERS: usize = 125;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Bit set in the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Station Addressing
// ============================================================================

/// Broadcast station: every drive applies the request, none answers
pub const BROADCAST_STATION: u8 = 0;

/// Highest unicast station address
pub const MAX_STATION_ADDRESS: u8 = 247;

/// Factory default station address of the drives
pub const DEFAULT_STATION: u8 = 1;

// ============================================================================
// Serial Link Defaults (19200 8E1)
// ============================================================================

/// Default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 19_200;

/// Default data bits
pub const DEFAULT_DATA_BITS: u8 = 8;

/// Default stop bits
pub const DEFAULT_STOP_BITS: u8 = 1;

// ============================================================================
// Transaction and Session Defaults
// ============================================================================

/// Per-transaction response timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Resends after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Poll tick period
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Consecutive failed polls before the session reports Faulted
pub const DEFAULT_FAULT_THRESHOLD: u32 = 3;

/// Pending jobs the transaction queue accepts before callers wait
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(MAX_RTU_FRAME_SIZE, 256);
        assert_eq!(MAX_PDU_SIZE, 253);
        assert_eq!(MIN_FRAME_LEN, 4);
        assert_eq!(EXCEPTION_FRAME_LEN, MIN_FRAME_LEN + 1);
    }

    #[test]
    fn test_register_limits() {
        // Verify read register limit calculation
        let read_pdu_size = 1 + 1 + (MAX_READ_REGISTERS * 2);
        assert!(read_pdu_size <= MAX_PDU_SIZE);
        assert_eq!(MAX_READ_REGISTERS, 125);

        // Largest FC03 response still fits an RS485 ADU
        let frame = READ_RESPONSE_OVERHEAD + MAX_READ_REGISTERS * 2;
        assert!(frame <= MAX_RTU_FRAME_SIZE);
    }

    #[test]
    fn test_exception_flag_masks_function() {
        assert_eq!(FC_READ_HOLDING_REGISTERS | EXCEPTION_FLAG, 0x83);
        assert_eq!(FC_WRITE_SINGLE_REGISTER | EXCEPTION_FLAG, 0x86);
    }
}
