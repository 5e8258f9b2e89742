//! RTP data packet header (RFC 3550 §5.1).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! |                    CSRC list (CC x 32 bits)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! When X is set a header extension follows the CSRC list: a 16-bit
//! profile-defined value, a 16-bit length in 32-bit words, then the data.

use super::{RTP_VERSION, Reader, strip_padding};
use crate::error::{MalformedKind, Result, RtpError};

/// Size of the fixed part of the RTP header.
pub const FIXED_HEADER_LEN: usize = 12;

/// Maximum number of CSRC identifiers (4-bit CC field).
pub const MAX_CSRC: usize = 15;

/// RTP header extension block (RFC 3550 §5.3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderExtension {
    /// Profile-defined identifier.
    pub profile: u16,
    /// Extension data, a multiple of 4 bytes.
    pub data: Vec<u8>,
}

/// Decoded RTP fixed header plus CSRC list and optional extension.
///
/// Version is not stored: decoding rejects anything but 2 and encoding
/// always writes 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// P bit. Padding has already been stripped from the decoded payload.
    pub padding: bool,
    /// Marker bit; for video usually the last packet of a frame.
    pub marker: bool,
    /// Payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    /// Synchronization source identifier.
    pub ssrc: u32,
    /// Contributing sources, at most [`MAX_CSRC`].
    pub csrcs: Vec<u32>,
    pub extension: Option<HeaderExtension>,
}

/// A decoded RTP packet borrowing its payload from the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub header: RtpHeader,
    /// Payload with any padding removed.
    pub payload: &'a [u8],
}

impl RtpHeader {
    /// Create a bare header with no CSRCs or extension.
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            padding: false,
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            csrcs: Vec::new(),
            extension: None,
        }
    }

    /// Header length in bytes: 12 + 4×CC, plus the extension block if any.
    pub fn len(&self) -> usize {
        FIXED_HEADER_LEN
            + 4 * self.csrcs.len()
            + self.extension.as_ref().map_or(0, |ext| 4 + ext.data.len())
    }

    /// Serialize the header into `out`.
    ///
    /// The padding flag is written as-is; callers that set it are
    /// responsible for appending the padding bytes after the payload.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.csrcs.len() > MAX_CSRC {
            return Err(RtpError::EncodeFailure("more than 15 CSRCs"));
        }
        if self.payload_type > 0x7F {
            return Err(RtpError::EncodeFailure("payload type wider than 7 bits"));
        }

        let first_byte = (RTP_VERSION << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension.is_some() as u8) << 4)
            | self.csrcs.len() as u8;
        let second_byte = ((self.marker as u8) << 7) | self.payload_type;

        out.reserve(self.len());
        out.push(first_byte);
        out.push(second_byte);
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        for csrc in &self.csrcs {
            out.extend_from_slice(&csrc.to_be_bytes());
        }

        if let Some(ext) = &self.extension {
            if ext.data.len() % 4 != 0 {
                return Err(RtpError::EncodeFailure("extension data not word aligned"));
            }
            let words = u16::try_from(ext.data.len() / 4)
                .map_err(|_| RtpError::EncodeFailure("extension too long"))?;
            out.extend_from_slice(&ext.profile.to_be_bytes());
            out.extend_from_slice(&words.to_be_bytes());
            out.extend_from_slice(&ext.data);
        }
        Ok(())
    }
}

impl<'a> RtpPacket<'a> {
    /// Decode an RTP datagram.
    ///
    /// Fails with [`Malformed`](RtpError::Malformed) if the version is not
    /// 2, the CSRC list or extension runs past the datagram, or the padding
    /// count does not fit the payload.
    pub fn decode(buf: &'a [u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(RtpError::malformed(MalformedKind::Empty));
        }
        let mut r = Reader::new(buf);

        let first_byte = r.read_u8()?;
        let version = first_byte >> 6;
        if version != RTP_VERSION {
            return Err(RtpError::malformed(MalformedKind::BadVersion(version)));
        }
        let padding = first_byte & 0x20 != 0;
        let has_extension = first_byte & 0x10 != 0;
        let csrc_count = usize::from(first_byte & 0x0F);

        let second_byte = r.read_u8()?;
        let marker = second_byte & 0x80 != 0;
        let payload_type = second_byte & 0x7F;

        let sequence = r.read_u16()?;
        let timestamp = r.read_u32()?;
        let ssrc = r.read_u32()?;

        let csrcs = (0..csrc_count)
            .map(|_| r.read_u32())
            .collect::<Result<Vec<_>>>()?;

        let extension = if has_extension {
            let profile = r.read_u16()?;
            let words = usize::from(r.read_u16()?);
            let data = r.read_bytes(words * 4)?.to_vec();
            Some(HeaderExtension { profile, data })
        } else {
            None
        };

        let body = &buf[r.position()..];
        let payload = strip_padding(body, padding)?;

        Ok(RtpPacket {
            header: RtpHeader {
                padding,
                marker,
                payload_type,
                sequence,
                timestamp,
                ssrc,
                csrcs,
                extension,
            },
            payload,
        })
    }
}
