//! Tag-less binary codec for inter-node messages.
//!
//! Values are written in sequence with no type tags and no overall length
//! prefix; both ends of a channel must agree on the field order for each
//! message kind. All multi-byte quantities are big-endian. A failed encode
//! yields no buffer at all, so a truncated payload can never be sent; a
//! failed decode reports exactly what went wrong so the caller can log and
//! discard that one message.

use crate::id::PlayerId;
use thiserror::Error;

/// Decode and encode failures. None of these are fatal to the node; the
/// policy everywhere is "log and drop the message".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("text field of {0} bytes exceeds the u16 length prefix")]
    TextTooLong(usize),

    #[error("buffer underrun: needed {needed} more bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("text field is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),

    #[error("unrecognized opcode {0:?}")]
    UnknownOpcode(String),
}

/// One field of a wire tuple. The set of supported types is closed; anything
/// a node wants to transmit has to be expressed through these.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Text(String),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Id(PlayerId),
}

/// Encodes an ordered tuple of values into a byte buffer.
///
/// Any field failure aborts the whole encode; the caller never sees a
/// partially written buffer.
pub fn encode(values: &[WireValue]) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    for value in values {
        match value {
            WireValue::Text(text) => write_text(&mut buf, text)?,
            WireValue::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
            WireValue::Long(v) => buf.extend_from_slice(&v.to_be_bytes()),
            WireValue::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
            WireValue::Double(v) => buf.extend_from_slice(&v.to_be_bytes()),
            WireValue::Bool(v) => buf.push(u8::from(*v)),
            WireValue::Id(id) => buf.extend_from_slice(&id.to_bytes()),
        }
    }
    Ok(buf)
}

/// Appends one length-prefixed UTF-8 text field to `buf`.
///
/// The prefix is a 2-byte big-endian unsigned length of the encoded bytes,
/// so texts longer than 65535 bytes are rejected.
pub(crate) fn write_text(buf: &mut Vec<u8>, text: &str) -> Result<(), CodecError> {
    let bytes = text.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(CodecError::TextTooLong(bytes.len()));
    }
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Sequential reader over a received byte buffer.
///
/// The channel and message purpose dictate the field order; the reader just
/// consumes fields in whatever order the caller asks for them. Underruns and
/// malformed fields come back as `CodecError` values, never panics.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        WireReader { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consumes and returns everything left in the buffer.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let slice = self.take(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }

    pub fn read_text(&mut self) -> Result<String, CodecError> {
        let len = u16::from_be_bytes(self.take_array::<2>()?) as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_int(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.take_array::<4>()?))
    }

    pub fn read_long(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take_array::<8>()?))
    }

    pub fn read_float(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_be_bytes(self.take_array::<4>()?))
    }

    pub fn read_double(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_be_bytes(self.take_array::<8>()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.take_array::<1>()?[0] {
            0x00 => Ok(false),
            0x01 => Ok(true),
            byte => Err(CodecError::InvalidBool(byte)),
        }
    }

    pub fn read_id(&mut self) -> Result<PlayerId, CodecError> {
        Ok(PlayerId::from_bytes(self.take_array::<16>()?))
    }
}
