//! Stack-allocated Modbus PDU
//!
//! The PDU is the function byte plus its payload, without station address or
//! CRC. Requests on the poll path and the simulated drive's answers are built
//! here into a fixed array, then framed by [`crate::codec::encode_pdu`].

use std::fmt;

use tracing::debug;

use crate::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_REGISTER, MAX_PDU_SIZE,
    MAX_READ_REGISTERS,
};
use crate::error::FrameError;
use crate::protocol::ExceptionCode;

/// Function byte and payload in a fixed stack buffer
#[derive(Clone)]
pub struct ModbusPdu {
    buf: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    #[inline]
    fn empty() -> Self {
        Self {
            buf: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Copy a PDU out of a frame body
    pub fn from_slice(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut pdu = Self::empty();
        pdu.put_slice(bytes)?;
        Ok(pdu)
    }

    fn put_slice(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        let end = self.len + bytes.len();
        if end > MAX_PDU_SIZE {
            return Err(FrameError::Oversized {
                len: end,
                max: MAX_PDU_SIZE,
            });
        }
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    /// Bytes as they go between station address and CRC
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Function byte, exception bit included
    #[inline]
    pub fn function_byte(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    /// Everything after the function byte
    #[inline]
    pub fn payload(&self) -> &[u8] {
        self.as_slice().get(1..).unwrap_or(&[])
    }

    /// Exception code, when the exception bit is set
    pub fn exception(&self) -> Option<ExceptionCode> {
        match self.as_slice() {
            [fc, code, ..] if fc & EXCEPTION_FLAG != 0 => Some(ExceptionCode(*code)),
            _ => None,
        }
    }
}

impl fmt::Debug for ModbusPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModbusPdu[")?;
        for (i, byte) in self.as_slice().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        write!(f, "]")
    }
}

impl PartialEq for ModbusPdu {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ModbusPdu {}

/// Name of a function byte, for logs
pub fn function_name(function_byte: u8) -> &'static str {
    match function_byte & !EXCEPTION_FLAG {
        FC_READ_HOLDING_REGISTERS => "Read Holding Registers",
        FC_WRITE_SINGLE_REGISTER => "Write Single Register",
        _ => "Unsupported Function",
    }
}

/// Builds the four PDU shapes a drive link exchanges
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl PduBuilder {
    fn start(function_byte: u8) -> Self {
        let mut pdu = ModbusPdu::empty();
        pdu.buf[0] = function_byte;
        pdu.len = 1;
        Self { pdu }
    }

    fn word(mut self, value: u16) -> Result<Self, FrameError> {
        self.pdu.put_slice(&value.to_be_bytes())?;
        Ok(self)
    }

    fn finish(self) -> ModbusPdu {
        let pdu = self.pdu;
        if let Some(fc) = pdu.function_byte() {
            debug!(
                "PDU built: FC={:02X} ({}), {} bytes",
                fc,
                function_name(fc),
                pdu.len()
            );
        }
        pdu
    }

    /// FC03 request: start address and register count
    pub fn read_request(address: u16, quantity: u16) -> Result<ModbusPdu, FrameError> {
        Ok(Self::start(FC_READ_HOLDING_REGISTERS)
            .word(address)?
            .word(quantity)?
            .finish())
    }

    /// FC06 request. The drive echoes the same PDU as its confirmation.
    pub fn write_request(address: u16, value: u16) -> Result<ModbusPdu, FrameError> {
        Ok(Self::start(FC_WRITE_SINGLE_REGISTER)
            .word(address)?
            .word(value)?
            .finish())
    }

    /// FC03 answer: byte count, then the words big-endian
    pub fn read_response(values: &[u16]) -> Result<ModbusPdu, FrameError> {
        if values.len() > MAX_READ_REGISTERS {
            return Err(FrameError::Oversized {
                len: 2 + values.len() * 2,
                max: MAX_PDU_SIZE,
            });
        }
        let mut builder = Self::start(FC_READ_HOLDING_REGISTERS);
        builder.pdu.put_slice(&[(values.len() * 2) as u8])?;
        for &value in values {
            builder = builder.word(value)?;
        }
        Ok(builder.finish())
    }

    /// Exception answer to `function`
    pub fn exception(function: u8, code: ExceptionCode) -> ModbusPdu {
        let mut builder = Self::start(function | EXCEPTION_FLAG);
        builder.pdu.buf[1] = code.code();
        builder.pdu.len = 2;
        builder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_request_layout() {
        let pdu = PduBuilder::read_request(0x0000, 9).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x00, 0x00, 0x09]);
        assert_eq!(pdu.function_byte(), Some(0x03));
        assert_eq!(pdu.payload(), &[0x00, 0x00, 0x00, 0x09]);
        assert_eq!(pdu.exception(), None);
    }

    #[test]
    fn test_write_request_layout() {
        let pdu = PduBuilder::write_request(0x0002, 255).unwrap();
        assert_eq!(pdu.as_slice(), &[0x06, 0x00, 0x02, 0x00, 0xFF]);
    }

    #[test]
    fn test_read_response_layout() {
        let pdu = PduBuilder::read_response(&[500, 0xFF06]).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x04, 0x01, 0xF4, 0xFF, 0x06]);

        let too_many = vec![0u16; MAX_READ_REGISTERS + 1];
        assert!(matches!(
            PduBuilder::read_response(&too_many),
            Err(FrameError::Oversized { .. })
        ));
    }

    #[test]
    fn test_exception_layout() {
        let pdu = PduBuilder::exception(0x06, ExceptionCode::ILLEGAL_DATA_VALUE);
        assert_eq!(pdu.as_slice(), &[0x86, 0x03]);
        assert_eq!(pdu.exception(), Some(ExceptionCode::ILLEGAL_DATA_VALUE));
    }

    #[test]
    fn test_from_slice_bounds() {
        let pdu = ModbusPdu::from_slice(&[0u8; MAX_PDU_SIZE]).unwrap();
        assert_eq!(pdu.len(), MAX_PDU_SIZE);
        assert!(ModbusPdu::from_slice(&[0u8; MAX_PDU_SIZE + 1]).is_err());
        assert!(ModbusPdu::from_slice(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_debug_is_hex() {
        let pdu = PduBuilder::write_request(0x0010, 1).unwrap();
        assert_eq!(format!("{:?}", pdu), "ModbusPdu[06 00 10 00 01]");
    }

    #[test]
    fn test_function_name() {
        assert_eq!(function_name(0x83), "Read Holding Registers");
        assert_eq!(function_name(0x10), "Unsupported Function");
    }
}
