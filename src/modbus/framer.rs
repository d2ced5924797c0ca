//! Stream framing for the GivEnergy transparent protocol
//!
//! Every message on the wire starts with a seven byte MBAP-like header:
//! `tid=0x5959 pid=0x0001 len uid` followed by a one byte function id. The
//! data adapter interleaves heartbeats with responses and occasionally emits
//! truncated or garbled frames, so the decoder resynchronises on the header
//! marker instead of trusting the stream position.

use crate::error::TransportError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Header marker: transaction id 0x5959 followed by protocol id 0x0001
pub const FRAME_MARKER: [u8; 4] = [0x59, 0x59, 0x00, 0x01];

/// Bytes preceding the body: tid, pid, len, uid, fid
pub const HEADER_LEN: usize = 8;

/// Shortest frame the device ever sends
pub const MIN_FRAME_LEN: usize = 18;

/// Largest `len` header value considered plausible
pub const MAX_HEADER_LEN: u16 = 300;

/// Outer frame function id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFunction {
    Heartbeat = 1,
    Transparent = 2,
}

impl FrameFunction {
    pub fn from_u8(fid: u8) -> Option<Self> {
        match fid {
            1 => Some(FrameFunction::Heartbeat),
            2 => Some(FrameFunction::Transparent),
            _ => None,
        }
    }
}

/// A complete frame with its header stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub function: FrameFunction,
    pub body: Bytes,
}

impl Frame {
    pub fn new(function: FrameFunction, body: impl Into<Bytes>) -> Self {
        Self {
            function,
            body: body.into(),
        }
    }
}

/// `tokio_util` codec splitting a byte stream into [`Frame`]s
#[derive(Debug, Default)]
pub struct FrameCodec {
    discarded: u64,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes thrown away while resynchronising
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    fn discard(&mut self, src: &mut BytesMut, count: usize) {
        if count == 0 {
            return;
        }
        tracing::debug!("Discarding {} bytes while seeking frame marker", count);
        src.advance(count);
        self.discarded += count as u64;
    }
}

fn find_marker(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(FRAME_MARKER.len())
        .position(|w| w == FRAME_MARKER)
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, TransportError> {
        loop {
            let Some(start) = find_marker(src) else {
                // Keep a possible partial marker at the tail
                let keep = src.len().min(FRAME_MARKER.len() - 1);
                let drop = src.len() - keep;
                self.discard(src, drop);
                return Ok(None);
            };
            self.discard(src, start);

            if src.len() < HEADER_LEN {
                return Ok(None);
            }

            let len = u16::from_be_bytes([src[4], src[5]]);
            let uid = src[6];
            let function = FrameFunction::from_u8(src[7]);
            let frame_len = 6 + len as usize;

            let Some(function) = function else {
                self.discard(src, 1);
                continue;
            };
            if len > MAX_HEADER_LEN || uid > 1 || frame_len < MIN_FRAME_LEN {
                self.discard(src, 1);
                continue;
            }

            // A second marker this close means the current frame was cut short
            let scan_end = src.len().min(MIN_FRAME_LEN);
            if let Some(next) = find_marker(&src[1..scan_end]) {
                self.discard(src, next + 1);
                continue;
            }

            if src.len() < frame_len {
                src.reserve(frame_len - src.len());
                return Ok(None);
            }

            let mut frame = src.split_to(frame_len);
            frame.advance(HEADER_LEN);
            return Ok(Some(Frame {
                function,
                body: frame.freeze(),
            }));
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), TransportError> {
        let len = u16::try_from(item.body.len() + 2)
            .ok()
            .filter(|len| *len <= MAX_HEADER_LEN)
            .ok_or_else(|| {
                TransportError::corrupt(format!("frame body of {} bytes", item.body.len()))
            })?;
        dst.reserve(HEADER_LEN + item.body.len());
        dst.put_slice(&FRAME_MARKER);
        dst.put_u16(len);
        dst.put_u8(0x01);
        dst.put_u8(item.function as u8);
        dst.put_slice(&item.body);
        Ok(())
    }
}
