//! Modbus protocol definitions for the drive link
//!
//! Function codes, exception codes, and the request/response pair exchanged
//! with a drive. Only the two function codes the drives implement are modelled:
//! read holding registers (0x03) and write single register (0x06).

use std::fmt;

use crate::codec::{self, Frame};
use crate::constants::{
    self, BROADCAST_STATION, FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_REGISTER,
    MAX_READ_REGISTERS, MAX_STATION_ADDRESS,
};
use crate::error::{FrameError, TransactionError};
use crate::pdu::{ModbusPdu, PduBuilder};

/// Station address of a drive on the shared line (1-247, 0 = broadcast)
pub type StationAddress = u8;

/// Supported Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = FC_READ_HOLDING_REGISTERS,
    /// Write Single Register (0x06)
    WriteSingleRegister = FC_WRITE_SINGLE_REGISTER,
}

impl FunctionCode {
    /// Convert from u8, rejecting unsupported codes
    pub fn from_u8(code: u8) -> Result<Self, FrameError> {
        match code {
            FC_READ_HOLDING_REGISTERS => Ok(Self::ReadHoldingRegisters),
            FC_WRITE_SINGLE_REGISTER => Ok(Self::WriteSingleRegister),
            _ => Err(FrameError::UnknownFunction { code }),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::WriteSingleRegister => "Write Single Register",
        };
        write!(f, "{} (0x{:02X})", name, self.to_u8())
    }
}

/// Modbus exception code reported by a drive.
///
/// Kept as a newtype rather than an enum so codes outside the standard table
/// are still carried through to the caller unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExceptionCode(pub u8);

impl ExceptionCode {
    pub const ILLEGAL_FUNCTION: Self = Self(constants::EXCEPTION_ILLEGAL_FUNCTION);
    pub const ILLEGAL_DATA_ADDRESS: Self = Self(constants::EXCEPTION_ILLEGAL_DATA_ADDRESS);
    pub const ILLEGAL_DATA_VALUE: Self = Self(constants::EXCEPTION_ILLEGAL_DATA_VALUE);
    pub const SERVER_DEVICE_FAILURE: Self = Self(constants::EXCEPTION_SERVER_DEVICE_FAILURE);
    pub const ACKNOWLEDGE: Self = Self(constants::EXCEPTION_ACKNOWLEDGE);
    pub const SERVER_DEVICE_BUSY: Self = Self(constants::EXCEPTION_SERVER_DEVICE_BUSY);
    pub const MEMORY_PARITY_ERROR: Self = Self(constants::EXCEPTION_MEMORY_PARITY_ERROR);
    pub const GATEWAY_PATH_UNAVAILABLE: Self =
        Self(constants::EXCEPTION_GATEWAY_PATH_UNAVAILABLE);
    pub const GATEWAY_TARGET_FAILED: Self = Self(constants::EXCEPTION_GATEWAY_TARGET_FAILED);

    /// Raw code byte
    pub fn code(self) -> u8 {
        self.0
    }

    /// Human-readable description
    pub fn description(self) -> &'static str {
        match self.0 {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Server Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Server Device Busy",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }
    }

    /// Exceptions meaning the drive cannot service requests at all.
    ///
    /// These count toward the session fault threshold; illegal
    /// function/address/value point at the request instead.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            Self::SERVER_DEVICE_FAILURE
                | Self::SERVER_DEVICE_BUSY
                | Self::GATEWAY_PATH_UNAVAILABLE
                | Self::GATEWAY_TARGET_FAILED
        )
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} ({})", self.0, self.description())
    }
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        Self(code)
    }
}

/// Check that a station address can be polled (1-247)
pub fn is_unicast_station(station: StationAddress) -> bool {
    station != BROADCAST_STATION && station <= MAX_STATION_ADDRESS
}

// ============================================================================
// Request
// ============================================================================

/// A parameter-level request: read N consecutive registers or write one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// FC03: read `quantity` registers starting at `address`
    ReadHolding { address: u16, quantity: u16 },
    /// FC06: store the raw `value` at `address`
    WriteSingle { address: u16, value: u16 },
}

impl Request {
    /// Create a read request
    pub fn read(address: u16, quantity: u16) -> Self {
        Self::ReadHolding { address, quantity }
    }

    /// Create a write request
    pub fn write(address: u16, value: u16) -> Self {
        Self::WriteSingle { address, value }
    }

    /// Function code carried by the request
    pub fn function(&self) -> FunctionCode {
        match self {
            Self::ReadHolding { .. } => FunctionCode::ReadHoldingRegisters,
            Self::WriteSingle { .. } => FunctionCode::WriteSingleRegister,
        }
    }

    /// First register addressed
    pub fn address(&self) -> u16 {
        match self {
            Self::ReadHolding { address, .. } | Self::WriteSingle { address, .. } => *address,
        }
    }

    /// Reject requests the drive could never answer
    pub fn validate(&self) -> Result<(), TransactionError> {
        if let Self::ReadHolding { address, quantity } = *self {
            if quantity == 0 || quantity as usize > MAX_READ_REGISTERS {
                return Err(TransactionError::invalid_request(format!(
                    "read quantity {} outside 1..={}",
                    quantity, MAX_READ_REGISTERS
                )));
            }
            if address.checked_add(quantity - 1).is_none() {
                return Err(TransactionError::invalid_request(format!(
                    "read of {} registers from 0x{:04X} overflows the address space",
                    quantity, address
                )));
            }
        }
        Ok(())
    }

    /// Build the request PDU
    pub fn to_pdu(&self) -> Result<ModbusPdu, FrameError> {
        match *self {
            Self::ReadHolding { address, quantity } => {
                PduBuilder::read_request(address, quantity)
            }
            Self::WriteSingle { address, value } => {
                PduBuilder::write_request(address, value)
            }
        }
    }

    /// Encode the complete RTU frame for `station`
    pub fn encode(&self, station: StationAddress) -> Result<bytes::Bytes, FrameError> {
        codec::encode_pdu(station, &self.to_pdu()?)
    }

    /// Length of a successful response frame to this request
    pub fn expected_response_len(&self) -> usize {
        match self {
            Self::ReadHolding { quantity, .. } => {
                constants::READ_RESPONSE_OVERHEAD + *quantity as usize * 2
            }
            Self::WriteSingle { .. } => constants::FIXED_FRAME_LEN,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadHolding { address, quantity } => {
                write!(f, "read {} @ 0x{:04X}", quantity, address)
            }
            Self::WriteSingle { address, value } => {
                write!(f, "write 0x{:04X} @ 0x{:04X}", value, address)
            }
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// Decoded payload of a successful response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    /// FC03 register values in request order
    Registers(Vec<u16>),
    /// FC06 echo of the stored register
    WriteConfirmation { address: u16, value: u16 },
}

/// Successful answer from a drive, correlated with its request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Echoed station address
    pub station: StationAddress,
    /// Echoed function code
    pub function: FunctionCode,
    /// Register values or write confirmation
    pub payload: ResponsePayload,
}

impl Response {
    /// Correlate a decoded, non-exception frame with the request that caused it.
    ///
    /// Any mismatch (station, function, byte count, write echo) is reported as
    /// [`FrameError::Unexpected`] so the engine treats it as line noise.
    pub fn from_frame(
        frame: &Frame,
        request: &Request,
        station: StationAddress,
    ) -> Result<Self, FrameError> {
        if frame.station != station {
            return Err(FrameError::unexpected(format!(
                "station mismatch: expected {}, got {}",
                station, frame.station
            )));
        }
        if frame.function != request.function() {
            return Err(FrameError::unexpected(format!(
                "function mismatch: expected 0x{:02X}, got 0x{:02X}",
                request.function().to_u8(),
                frame.function.to_u8()
            )));
        }
        if frame.exception {
            return Err(FrameError::unexpected("exception frame has no payload"));
        }

        let data = frame.payload.as_ref();
        let payload = match *request {
            Request::ReadHolding { quantity, .. } => {
                let expected = quantity as usize * 2;
                if data.first().map(|&n| n as usize) != Some(expected)
                    || data.len() != expected + 1
                {
                    return Err(FrameError::unexpected(format!(
                        "byte count mismatch: expected {} data bytes for {} registers, got {}",
                        expected,
                        quantity,
                        data.len().saturating_sub(1)
                    )));
                }
                ResponsePayload::Registers(
                    data[1..]
                        .chunks_exact(2)
                        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                        .collect(),
                )
            }
            Request::WriteSingle { address, value } => {
                if data.len() != 4 {
                    return Err(FrameError::unexpected(format!(
                        "write echo of {} bytes",
                        data.len()
                    )));
                }
                let echoed_address = u16::from_be_bytes([data[0], data[1]]);
                let echoed_value = u16::from_be_bytes([data[2], data[3]]);
                if echoed_address != address || echoed_value != value {
                    return Err(FrameError::unexpected(format!(
                        "write echo mismatch: sent 0x{:04X}=0x{:04X}, got 0x{:04X}=0x{:04X}",
                        address, value, echoed_address, echoed_value
                    )));
                }
                ResponsePayload::WriteConfirmation { address, value }
            }
        };

        Ok(Self {
            station: frame.station,
            function: frame.function,
            payload,
        })
    }

    /// Register values of a read response
    pub fn registers(&self) -> Option<&[u16]> {
        match &self.payload {
            ResponsePayload::Registers(values) => Some(values),
            ResponsePayload::WriteConfirmation { .. } => None,
        }
    }

    /// Consume into register values of a read response
    pub fn into_registers(self) -> Option<Vec<u16>> {
        match self.payload {
            ResponsePayload::Registers(values) => Some(values),
            ResponsePayload::WriteConfirmation { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_code_conversion() {
        assert_eq!(
            FunctionCode::from_u8(0x03).unwrap(),
            FunctionCode::ReadHoldingRegisters
        );
        assert_eq!(FunctionCode::WriteSingleRegister.to_u8(), 0x06);
        assert_eq!(
            FunctionCode::from_u8(0x10),
            Err(FrameError::UnknownFunction { code: 0x10 })
        );
    }

    #[test]
    fn test_exception_code_display() {
        assert_eq!(
            ExceptionCode::ILLEGAL_DATA_ADDRESS.to_string(),
            "0x02 (Illegal Data Address)"
        );
        assert_eq!(ExceptionCode(0x42).description(), "Unknown Exception");
    }

    #[test]
    fn test_critical_exceptions() {
        assert!(ExceptionCode::SERVER_DEVICE_FAILURE.is_critical());
        assert!(ExceptionCode::SERVER_DEVICE_BUSY.is_critical());
        assert!(ExceptionCode::GATEWAY_TARGET_FAILED.is_critical());
        assert!(!ExceptionCode::ILLEGAL_FUNCTION.is_critical());
        assert!(!ExceptionCode::ILLEGAL_DATA_ADDRESS.is_critical());
        assert!(!ExceptionCode::ILLEGAL_DATA_VALUE.is_critical());
    }

    #[test]
    fn test_request_validation() {
        assert!(Request::read(0, 1).validate().is_ok());
        assert!(Request::read(0, 125).validate().is_ok());
        assert!(Request::read(0, 0).validate().is_err());
        assert!(Request::read(0, 126).validate().is_err());
        assert!(Request::read(0xFFFF, 2).validate().is_err());
        assert!(Request::write(0xFFFF, 1).validate().is_ok());
    }

    #[test]
    fn test_request_encoding() {
        // Read 2 registers from 0x0001 on station 1
        let frame = Request::read(0x0001, 2).encode(1).unwrap();
        assert_eq!(&frame[..6], &[0x01, 0x03, 0x00, 0x01, 0x00, 0x02]);
        assert_eq!(frame.len(), 8);

        let frame = Request::write(0x0002, 255).encode(1).unwrap();
        assert_eq!(&frame[..6], &[0x01, 0x06, 0x00, 0x02, 0x00, 0xFF]);
    }

    #[test]
    fn test_expected_response_len() {
        assert_eq!(Request::read(0, 9).expected_response_len(), 23);
        assert_eq!(Request::write(0, 9).expected_response_len(), 8);
    }

    #[test]
    fn test_response_from_read_frame() {
        let bytes = codec::encode(1, 0x03, &[0x04, 0x01, 0xF4, 0x00, 0xFF]);
        let frame = codec::decode(&bytes).unwrap();
        let response = Response::from_frame(&frame, &Request::read(0x0001, 2), 1).unwrap();
        assert_eq!(response.registers(), Some(&[500u16, 255][..]));
    }

    #[test]
    fn test_response_station_mismatch() {
        let bytes = codec::encode(2, 0x03, &[0x02, 0x00, 0x01]);
        let frame = codec::decode(&bytes).unwrap();
        let err = Response::from_frame(&frame, &Request::read(0, 1), 1).unwrap_err();
        assert!(matches!(err, FrameError::Unexpected { .. }));
    }

    #[test]
    fn test_response_byte_count_mismatch() {
        let bytes = codec::encode(1, 0x03, &[0x02, 0x00, 0x01]);
        let frame = codec::decode(&bytes).unwrap();
        assert!(Response::from_frame(&frame, &Request::read(0, 2), 1).is_err());
    }

    #[test]
    fn test_write_confirmation() {
        let bytes = codec::encode(1, 0x06, &[0x00, 0x02, 0x00, 0xFF]);
        let frame = codec::decode(&bytes).unwrap();
        let response = Response::from_frame(&frame, &Request::write(0x0002, 255), 1).unwrap();
        assert_eq!(
            response.payload,
            ResponsePayload::WriteConfirmation {
                address: 0x0002,
                value: 255
            }
        );

        // Echo of a different value is not a confirmation
        assert!(Response::from_frame(&frame, &Request::write(0x0002, 256), 1).is_err());
    }

    #[test]
    fn test_unicast_station() {
        assert!(!is_unicast_station(0));
        assert!(is_unicast_station(1));
        assert!(is_unicast_station(247));
        assert!(!is_unicast_station(248));
    }
}
