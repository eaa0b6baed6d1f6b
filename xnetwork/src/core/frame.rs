//! Frame definition and serialization.
//!
//! A frame is the unit written to and read from the transport. One
//! frame carries one IO buffer element (or one acknowledgment).
//!
//! # Frame Format
//!
//! ```text
//! +-----------+------------+----------+-------------------+-------------+
//! | Stream ID | Frame Type | Sequence | Payload Length    | Payload ... |
//! |  1 byte   |   1 byte   |  1 byte  | LEB128, 1-5 bytes |             |
//! +-----------+------------+----------+-------------------+-------------+
//! ```
//!
//! ACK frames have an empty payload; the acknowledged sequence number is
//! the sequence field and the stream id is the one of the data stream
//! being acknowledged.

use crate::error::{Error, Result};

/// Size of the fixed part of the header (id, type, sequence).
pub const FRAME_FIXED_HEADER_SIZE: usize = 3;

/// Largest possible header: fixed part plus a five byte length.
pub const FRAME_MAX_HEADER_SIZE: usize = FRAME_FIXED_HEADER_SIZE + 5;

/// Stream id carried by ping and pong frames.
pub const CONTROL_STREAM_ID: u8 = 0;

/// Frame type indicating the purpose of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Data frame carrying one element.
    Data = 0x01,

    /// Acknowledgment of a data frame.
    Ack = 0x02,

    /// Latency probe.
    Ping = 0x03,

    /// Answer to a latency probe.
    Pong = 0x04,
}

impl FrameType {
    /// Converts a byte to a FrameType.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Data),
            0x02 => Some(Self::Ack),
            0x03 => Some(Self::Ping),
            0x04 => Some(Self::Pong),
            _ => None,
        }
    }
}

/// A frame borrowing its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Stream the frame belongs to.
    pub stream_id: u8,

    /// Frame type.
    pub frame_type: FrameType,

    /// Per-stream sequence number.
    pub seq: u8,

    /// Frame payload data.
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Creates a data frame.
    pub fn data(stream_id: u8, seq: u8, payload: &'a [u8]) -> Self {
        Self {
            stream_id,
            frame_type: FrameType::Data,
            seq,
            payload,
        }
    }

    /// Creates an ACK frame for `seq` on `stream_id`.
    pub fn ack(stream_id: u8, seq: u8) -> Self {
        Self {
            stream_id,
            frame_type: FrameType::Ack,
            seq,
            payload: &[],
        }
    }

    /// Creates a PING frame.
    pub fn ping(seq: u8, payload: &'a [u8]) -> Self {
        Self {
            stream_id: CONTROL_STREAM_ID,
            frame_type: FrameType::Ping,
            seq,
            payload,
        }
    }

    /// Creates a PONG frame echoing a PING payload.
    pub fn pong(seq: u8, payload: &'a [u8]) -> Self {
        Self {
            stream_id: CONTROL_STREAM_ID,
            frame_type: FrameType::Pong,
            seq,
            payload,
        }
    }

    /// Returns the serialized size of a frame carrying `payload_len` bytes.
    pub fn max_encoded_len(payload_len: usize) -> usize {
        FRAME_FIXED_HEADER_SIZE + varint_len(payload_len as u32) + payload_len
    }

    /// Returns the serialized size of this frame.
    pub fn encoded_len(&self) -> usize {
        Self::max_encoded_len(self.payload.len())
    }

    /// Appends the serialized frame to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.encoded_len());
        buf.push(self.stream_id);
        buf.push(self.frame_type as u8);
        buf.push(self.seq);
        put_varint(buf, self.payload.len() as u32);
        buf.extend_from_slice(self.payload);
    }

    /// Deserializes one frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes consumed.
    pub fn decode(buf: &'a [u8]) -> Result<(Self, usize)> {
        if buf.len() < FRAME_FIXED_HEADER_SIZE + 1 {
            return Err(Error::InvalidFrame);
        }

        let stream_id = buf[0];
        let frame_type = FrameType::from_u8(buf[1]).ok_or(Error::InvalidFrame)?;
        let seq = buf[2];
        let (payload_len, len_size) = get_varint(&buf[FRAME_FIXED_HEADER_SIZE..])?;

        let start = FRAME_FIXED_HEADER_SIZE + len_size;
        let end = start
            .checked_add(payload_len as usize)
            .ok_or(Error::InvalidFrame)?;
        if buf.len() < end {
            return Err(Error::InvalidFrame);
        }
        if frame_type == FrameType::Ack && payload_len != 0 {
            return Err(Error::InvalidFrame);
        }

        Ok((
            Self {
                stream_id,
                frame_type,
                seq,
                payload: &buf[start..end],
            },
            end,
        ))
    }
}

/// Iterator over the frames packed in one datagram.
///
/// Stops at the end of input or at the first malformed frame.
pub struct FrameIter<'a> {
    remaining: &'a [u8],
    failed: bool,
}

impl<'a> FrameIter<'a> {
    /// Creates an iterator over `datagram`.
    pub fn new(datagram: &'a [u8]) -> Self {
        Self {
            remaining: datagram,
            failed: false,
        }
    }

    /// Returns true if iteration stopped on a malformed frame.
    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() || self.failed {
            return None;
        }
        match Frame::decode(self.remaining) {
            Ok((frame, consumed)) => {
                self.remaining = &self.remaining[consumed..];
                Some(frame)
            }
            Err(_) => {
                self.failed = true;
                None
            }
        }
    }
}

fn varint_len(mut value: u32) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

fn put_varint(buf: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn get_varint(buf: &[u8]) -> Result<(u32, usize)> {
    let mut value: u32 = 0;
    for (i, &byte) in buf.iter().take(5).enumerate() {
        let bits = (byte & 0x7F) as u32;
        if i == 4 && bits > 0x0F {
            return Err(Error::InvalidFrame);
        }
        value |= bits << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::InvalidFrame)
}
