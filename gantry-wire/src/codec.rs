//! Frame codec.
//!
//! Wire record: `flags:u8`, length (1 byte, or 8 bytes BE when LONG), body.
//!
//! ```text
//! flags: bit0 MORE | bit1 LONG | bit2 COMMAND | bits 3..7 reserved (zero)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use gantry_core::GantryError;
use thiserror::Error;

pub const FLAG_MORE: u8 = 0x01;
pub const FLAG_LONG: u8 = 0x02;
pub const FLAG_COMMAND: u8 = 0x04;
const RESERVED_MASK: u8 = 0xF8;

const SHORT_HEADER: usize = 2;
const LONG_HEADER: usize = 9;

/// Command frames are bounded independently of `max_frame_size`; a READY
/// with the largest identity is well under this.
pub const MAX_COMMAND_SIZE: usize = 4096;

/// Framing errors. Each one ends the offending connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("reserved flag bits set: {0:#04x}")]
    ReservedBits(u8),

    #[error("frame length {0} has the most significant bit set")]
    LengthOverflow(u64),

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: u64, max: usize },

    #[error("multipart message exceeds {0} frames")]
    TooManyFrames(usize),

    #[error("command frame inside a multipart message")]
    CommandInMessage,

    #[error("malformed command: {0}")]
    MalformedCommand(&'static str),
}

impl From<CodecError> for GantryError {
    fn from(err: CodecError) -> Self {
        GantryError::protocol(err.to_string())
    }
}

/// One decoded wire record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    pub flags: u8,
    pub payload: Bytes,
}

impl WireFrame {
    pub fn data(payload: Bytes, more: bool) -> Self {
        Self {
            flags: if more { FLAG_MORE } else { 0 },
            payload,
        }
    }

    pub fn command(payload: Bytes) -> Self {
        Self {
            flags: FLAG_COMMAND,
            payload,
        }
    }

    #[inline]
    pub const fn more(&self) -> bool {
        (self.flags & FLAG_MORE) != 0
    }

    #[inline]
    pub const fn is_command(&self) -> bool {
        (self.flags & FLAG_COMMAND) != 0
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        encode_frame(dst, self.flags, &self.payload);
    }
}

/// Bytes a frame with a `body_len` body occupies on the wire.
#[inline]
pub const fn encoded_len(body_len: usize) -> usize {
    if body_len <= u8::MAX as usize {
        SHORT_HEADER + body_len
    } else {
        LONG_HEADER + body_len
    }
}

/// Write one record; the LONG bit is chosen from the body length.
pub fn encode_frame(dst: &mut impl BufMut, flags: u8, body: &[u8]) {
    let flags = flags & !FLAG_LONG;
    if body.len() <= u8::MAX as usize {
        dst.put_u8(flags);
        dst.put_u8(body.len() as u8);
    } else {
        dst.put_u8(flags | FLAG_LONG);
        dst.put_u64(body.len() as u64);
    }
    dst.put_slice(body);
}

/// Encode one message: MORE on every frame but the last.
pub fn encode_message(dst: &mut Vec<u8>, frames: &[Bytes]) {
    let last = frames.len().saturating_sub(1);
    for (i, frame) in frames.iter().enumerate() {
        let flags = if i < last { FLAG_MORE } else { 0 };
        encode_frame(dst, flags, frame);
    }
}

/// Encode a batch of messages into one contiguous write buffer.
pub fn encode_batch(messages: &[Vec<Bytes>]) -> Vec<u8> {
    let size = messages
        .iter()
        .flat_map(|m| m.iter())
        .map(|f| encoded_len(f.len()))
        .sum();
    let mut out = Vec::with_capacity(size);
    for msg in messages {
        encode_message(&mut out, msg);
    }
    out
}

/// Incremental decoder.
///
/// Bytes arrive through [`extend`](Self::extend) in whatever chunks the
/// transport delivers; [`decode`](Self::decode) yields complete frames and
/// keeps partial ones buffered for the next call.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_size: Option<usize>,
}

impl FrameDecoder {
    pub fn new(max_frame_size: Option<usize>) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, `Ok(None)` when more input is needed.
    ///
    /// Length violations are reported as soon as the header is complete,
    /// without waiting for the body.
    pub fn decode(&mut self) -> Result<Option<WireFrame>, CodecError> {
        let Some(&flags) = self.buf.first() else {
            return Ok(None);
        };
        if flags & RESERVED_MASK != 0 {
            return Err(CodecError::ReservedBits(flags));
        }

        let long = flags & FLAG_LONG != 0;
        let header_len = if long { LONG_HEADER } else { SHORT_HEADER };
        if self.buf.len() < header_len {
            return Ok(None);
        }

        let body_len = if long {
            let mut len = &self.buf[1..LONG_HEADER];
            let size = len.get_u64();
            if size & (1 << 63) != 0 {
                return Err(CodecError::LengthOverflow(size));
            }
            size
        } else {
            u64::from(self.buf[1])
        };

        let limit = if flags & FLAG_COMMAND != 0 {
            Some(MAX_COMMAND_SIZE)
        } else {
            self.max_frame_size
        };
        if let Some(max) = limit {
            if body_len > max as u64 {
                return Err(CodecError::FrameTooLarge {
                    size: body_len,
                    max,
                });
            }
        }
        let body_len = usize::try_from(body_len).map_err(|_| CodecError::FrameTooLarge {
            size: body_len,
            max: usize::MAX,
        })?;

        if self.buf.len() - header_len < body_len {
            return Ok(None);
        }

        self.buf.advance(header_len);
        let payload = self.buf.split_to(body_len).freeze();
        Ok(Some(WireFrame {
            flags: flags & !FLAG_LONG,
            payload,
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(None)
    }
}
