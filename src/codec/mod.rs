//! Wire codecs for RTP and RTCP (RFC 3550).
//!
//! Everything here is pure: byte slices in, typed packets out (and back).
//! No sockets, no session state.
//!
//! Every field is read through [`Reader`], which checks bounds before each
//! access, so a truncated or lying datagram becomes a
//! [`Malformed`](crate::RtpError::Malformed) error rather than a panic.
//! Variable-length lists (CSRCs, report blocks, SDES items, BYE sources)
//! are walked using the counts and lengths declared in the headers, never
//! by looking at how many bytes happen to be left.
//!
//! All multi-byte fields are big-endian on the wire.

pub mod rtcp;
pub mod rtp;

use crate::error::{MalformedKind, Result, RtpError};

/// RTP/RTCP protocol version carried in the top two bits of every packet.
pub const RTP_VERSION: u8 = 2;

/// Bounds-checked big-endian cursor over a received datagram.
#[derive(Debug, Clone)]
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(RtpError::malformed(MalformedKind::Truncated));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    /// Split off the next `len` bytes as an independent reader.
    pub fn sub_reader(&mut self, len: usize) -> Result<Reader<'a>> {
        self.read_bytes(len).map(Reader::new)
    }
}

/// Strip RFC 3550 §5.1 padding from `body` when the P bit is set.
///
/// The last octet counts the padding bytes, itself included, so it must be
/// at least 1 and no larger than `body`.
pub(crate) fn strip_padding(body: &[u8], padded: bool) -> Result<&[u8]> {
    if !padded {
        return Ok(body);
    }
    let count = *body
        .last()
        .ok_or(RtpError::malformed(MalformedKind::BadPadding(0)))?;
    if count == 0 || usize::from(count) > body.len() {
        return Err(RtpError::malformed(MalformedKind::BadPadding(count)));
    }
    Ok(&body[..body.len() - usize::from(count)])
}
