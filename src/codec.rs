//! # Frame Codec
//!
//! Pure, stateless Modbus RTU framing:
//!
//! ```text
//! +---------+----------+-------------+-----------+
//! | station | function |   payload   | CRC (LE)  |
//! | 1 byte  |  1 byte  |   N bytes   |  2 bytes  |
//! +---------+----------+-------------+-----------+
//! ```
//!
//! The CRC is CRC-16/Modbus (reflected polynomial 0xA001, initial value
//! 0xFFFF) computed over every preceding byte and appended low byte first.
//! RTU has no length prefix; [`expected_frame_len`] predicts the length of a
//! frame from its header so a reader knows when a frame is complete.

use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use tracing::debug;

use crate::constants::{
    EXCEPTION_FLAG, EXCEPTION_FRAME_LEN, FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_REGISTER,
    FIXED_FRAME_LEN, MAX_RTU_FRAME_SIZE, MIN_FRAME_LEN, READ_RESPONSE_OVERHEAD,
};
use crate::error::FrameError;
use crate::pdu::ModbusPdu;
use crate::protocol::{ExceptionCode, FunctionCode, StationAddress};

/// CRC calculator for RTU
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute the CRC-16/Modbus of `data`
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// A CRC-verified RTU frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Station address
    pub station: StationAddress,
    /// Function code with the exception bit masked off
    pub function: FunctionCode,
    /// Exception bit was set in the function byte
    pub exception: bool,
    /// Bytes between the function code and the CRC
    pub payload: Bytes,
}

impl Frame {
    /// Function byte as sent on the wire
    pub fn function_byte(&self) -> u8 {
        if self.exception {
            self.function.to_u8() | EXCEPTION_FLAG
        } else {
            self.function.to_u8()
        }
    }

    /// Exception code of an exception frame
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        if self.exception {
            self.payload.first().copied().map(ExceptionCode)
        } else {
            None
        }
    }

    /// Re-encode the frame with a fresh CRC
    pub fn encode(&self) -> Bytes {
        encode(self.station, self.function_byte(), &self.payload)
    }
}

/// Build a complete RTU frame
pub fn encode(station: StationAddress, function_code: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + MIN_FRAME_LEN);
    buf.put_u8(station);
    buf.put_u8(function_code);
    buf.extend_from_slice(payload);
    let crc = crc16(&buf);
    buf.put_u16_le(crc);
    buf.freeze()
}

/// Build a complete RTU frame around a PDU
pub fn encode_pdu(station: StationAddress, pdu: &ModbusPdu) -> Result<Bytes, FrameError> {
    let (&function_code, payload) =
        pdu.as_slice()
            .split_first()
            .ok_or(FrameError::Truncated {
                expected: 1,
                actual: 0,
            })?;
    Ok(encode(station, function_code, payload))
}

/// Decode and verify an RTU frame.
///
/// Checks, in order: minimum length, maximum length, CRC, function code, and
/// the fixed length of exception and FC06 frames. FC03 byte counts are
/// checked against the request by [`crate::protocol::Response::from_frame`].
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(FrameError::Truncated {
            expected: MIN_FRAME_LEN,
            actual: bytes.len(),
        });
    }
    if bytes.len() > MAX_RTU_FRAME_SIZE {
        return Err(FrameError::Oversized {
            len: bytes.len(),
            max: MAX_RTU_FRAME_SIZE,
        });
    }

    let body_len = bytes.len() - 2;
    let expected = crc16(&bytes[..body_len]);
    let received = u16::from_le_bytes([bytes[body_len], bytes[body_len + 1]]);
    if expected != received {
        debug!(
            "CRC mismatch: computed {:04X}, received {:04X}",
            expected, received
        );
        return Err(FrameError::ChecksumMismatch { expected, received });
    }

    let station = bytes[0];
    let function_byte = bytes[1];
    let exception = function_byte & EXCEPTION_FLAG != 0;
    let function = FunctionCode::from_u8(function_byte & !EXCEPTION_FLAG)?;

    let required = if exception {
        EXCEPTION_FRAME_LEN
    } else if function == FunctionCode::WriteSingleRegister {
        FIXED_FRAME_LEN
    } else {
        MIN_FRAME_LEN
    };
    if bytes.len() < required {
        return Err(FrameError::Truncated {
            expected: required,
            actual: bytes.len(),
        });
    }
    if exception && bytes.len() != EXCEPTION_FRAME_LEN {
        return Err(FrameError::unexpected(format!(
            "exception frame of {} bytes",
            bytes.len()
        )));
    }
    if !exception && function == FunctionCode::WriteSingleRegister && bytes.len() != FIXED_FRAME_LEN
    {
        return Err(FrameError::Oversized {
            len: bytes.len(),
            max: FIXED_FRAME_LEN,
        });
    }

    debug!(
        "Frame decoded: station={}, FC={:02X}, payload_len={}",
        station,
        function_byte,
        body_len - 2
    );

    Ok(Frame {
        station,
        function,
        exception,
        payload: Bytes::copy_from_slice(&bytes[2..body_len]),
    })
}

/// Which side of the exchange produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Master to drive
    Request,
    /// Drive to master
    Response,
}

/// Predict the total length of the frame starting at `buf[0]`.
///
/// Returns `None` until enough of the header has arrived to tell. Frames
/// with an unsupported function code have no known length; whatever has
/// arrived is taken as the frame (the line falls silent after it).
pub fn expected_frame_len(direction: Direction, buf: &[u8]) -> Option<usize> {
    let function_byte = *buf.get(1)?;
    if function_byte & EXCEPTION_FLAG != 0 {
        return Some(EXCEPTION_FRAME_LEN);
    }
    match (direction, function_byte) {
        (_, FC_WRITE_SINGLE_REGISTER) => Some(FIXED_FRAME_LEN),
        (Direction::Request, FC_READ_HOLDING_REGISTERS) => Some(FIXED_FRAME_LEN),
        (Direction::Response, FC_READ_HOLDING_REGISTERS) => buf
            .get(2)
            .map(|&byte_count| READ_RESPONSE_OVERHEAD + byte_count as usize),
        _ => Some(buf.len().max(MIN_FRAME_LEN)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_crc_known_vector() {
        // 01 03 00 00 00 0A -> CRC C5CD, sent as CD C5
        let frame = encode(0x01, 0x03, &[0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(frame.as_ref(), &[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]);
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_decode_read_response() {
        let bytes = encode(0x01, 0x03, &[0x02, 0x01, 0xF4]);
        let frame = decode(&bytes).unwrap();
        assert_eq!(frame.station, 1);
        assert_eq!(frame.function, FunctionCode::ReadHoldingRegisters);
        assert!(!frame.exception);
        assert_eq!(frame.payload.as_ref(), &[0x02, 0x01, 0xF4]);
        assert_eq!(frame.encode(), bytes);
    }

    #[test]
    fn test_decode_exception() {
        let bytes = encode(0x01, 0x83, &[0x02]);
        let frame = decode(&bytes).unwrap();
        assert!(frame.exception);
        assert_eq!(frame.exception_code(), Some(ExceptionCode::ILLEGAL_DATA_ADDRESS));
        assert_eq!(frame.function_byte(), 0x83);
    }

    #[test]
    fn test_decode_truncated() {
        assert_eq!(
            decode(&[0x01, 0x03, 0x00]),
            Err(FrameError::Truncated {
                expected: 4,
                actual: 3
            })
        );

        // Exception frame without its code byte
        let bytes = encode(0x01, 0x83, &[]);
        assert_eq!(
            decode(&bytes),
            Err(FrameError::Truncated {
                expected: 5,
                actual: 4
            })
        );

        // FC06 frames are always 8 bytes
        let bytes = encode(0x01, 0x06, &[0x00, 0x02]);
        assert!(matches!(decode(&bytes), Err(FrameError::Truncated { .. })));
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let mut bytes = encode(0x01, 0x06, &[0x00, 0x02, 0x00, 0xFF]).to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            decode(&bytes),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_unknown_function() {
        let bytes = encode(0x01, 0x10, &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(decode(&bytes), Err(FrameError::UnknownFunction { code: 0x10 }));

        // Exception flag is masked before the check
        let bytes = encode(0x01, 0x90, &[0x01]);
        assert_eq!(decode(&bytes), Err(FrameError::UnknownFunction { code: 0x10 }));
    }

    #[test]
    fn test_decode_oversized() {
        let bytes = vec![0u8; MAX_RTU_FRAME_SIZE + 1];
        assert!(matches!(decode(&bytes), Err(FrameError::Oversized { .. })));
    }

    #[test]
    fn test_decode_rejects_long_write_frame() {
        let bytes = encode(0x01, 0x06, &[0x00, 0x02, 0x00, 0xFF, 0x00]);
        assert_eq!(
            decode(&bytes),
            Err(FrameError::Oversized {
                len: 9,
                max: FIXED_FRAME_LEN
            })
        );
    }

    #[test]
    fn test_expected_frame_len() {
        assert_eq!(expected_frame_len(Direction::Response, &[0x01]), None);
        assert_eq!(expected_frame_len(Direction::Response, &[0x01, 0x03]), None);
        assert_eq!(
            expected_frame_len(Direction::Response, &[0x01, 0x03, 0x04]),
            Some(9)
        );
        assert_eq!(
            expected_frame_len(Direction::Request, &[0x01, 0x03]),
            Some(8)
        );
        assert_eq!(
            expected_frame_len(Direction::Response, &[0x01, 0x86]),
            Some(5)
        );
        assert_eq!(
            expected_frame_len(Direction::Response, &[0x01, 0x06]),
            Some(8)
        );
        assert_eq!(
            expected_frame_len(Direction::Request, &[0x01, 0x2B, 0x0E, 0x01, 0x00, 0x00]),
            Some(6)
        );
    }

    proptest! {
        #[test]
        fn prop_round_trip(station in any::<u8>(), payload in proptest::collection::vec(any::<u8>(), 0..=251)) {
            let bytes = encode(station, 0x03, &payload);
            let frame = decode(&bytes).unwrap();
            prop_assert_eq!(frame.station, station);
            prop_assert_eq!(frame.payload.as_ref(), payload.as_slice());
        }

        #[test]
        fn prop_round_trip_write(station in any::<u8>(), address in any::<u16>(), value in any::<u16>()) {
            let mut payload = address.to_be_bytes().to_vec();
            payload.extend_from_slice(&value.to_be_bytes());
            let bytes = encode(station, 0x06, &payload);
            prop_assert_eq!(expected_frame_len(Direction::Response, &bytes), Some(bytes.len()));
            let frame = decode(&bytes).unwrap();
            prop_assert_eq!(frame.payload.as_ref(), payload.as_slice());
        }

        #[test]
        fn prop_single_bit_flip_detected(
            payload in proptest::collection::vec(any::<u8>(), 1..=64),
            index in any::<proptest::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut bytes = encode(0x01, 0x03, &payload).to_vec();
            let position = 2 + index.index(payload.len());
            bytes[position] ^= 1 << bit;
            let is_checksum_mismatch = matches!(decode(&bytes), Err(FrameError::ChecksumMismatch { .. }));
            prop_assert!(is_checksum_mismatch);
        }

        #[test]
        fn prop_read_response_len_predicted(values in proptest::collection::vec(any::<u16>(), 1..=125)) {
            let mut payload = vec![(values.len() * 2) as u8];
            for value in &values {
                payload.extend_from_slice(&value.to_be_bytes());
            }
            let bytes = encode(0x01, 0x03, &payload);
            prop_assert_eq!(expected_frame_len(Direction::Response, &bytes), Some(bytes.len()));
        }
    }
}
