//! Source description (RFC 3550 §6.5).
//!
//! ```text
//! chunk:  SSRC/CSRC (32 bits)
//!         item: type(8) | length(8) | text (length octets, not NUL-terminated)
//!         item: ...
//!         END:  one zero octet, then zero octets up to the next 32-bit boundary
//! ```

use std::borrow::Cow;

use super::header::CommonHeader;
use crate::codec::Reader;
use crate::error::{MalformedKind, Result, RtpError};

/// SDES item type. `End` only exists on the wire as the chunk terminator
/// and never appears in a decoded item list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdesType {
    End,
    Cname,
    Name,
    Email,
    Phone,
    Loc,
    Tool,
    Note,
    Priv,
    /// Types past PRIV are carried through untouched.
    Other(u8),
}

impl From<u8> for SdesType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::End,
            1 => Self::Cname,
            2 => Self::Name,
            3 => Self::Email,
            4 => Self::Phone,
            5 => Self::Loc,
            6 => Self::Tool,
            7 => Self::Note,
            8 => Self::Priv,
            other => Self::Other(other),
        }
    }
}

impl From<SdesType> for u8 {
    fn from(value: SdesType) -> Self {
        match value {
            SdesType::End => 0,
            SdesType::Cname => 1,
            SdesType::Name => 2,
            SdesType::Email => 3,
            SdesType::Phone => 4,
            SdesType::Loc => 5,
            SdesType::Tool => 6,
            SdesType::Note => 7,
            SdesType::Priv => 8,
            SdesType::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesItem {
    pub kind: SdesType,
    /// Raw item text, at most 255 octets.
    pub text: Vec<u8>,
}

impl SdesItem {
    pub fn new(kind: SdesType, text: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn cname(text: impl Into<Vec<u8>>) -> Self {
        Self::new(SdesType::Cname, text)
    }

    /// Item text as UTF-8, replacing invalid sequences.
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }
}

/// One SSRC and its items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    pub ssrc: u32,
    pub items: Vec<SdesItem>,
}

impl SdesChunk {
    /// First item of the given type, if present.
    pub fn item(&self, kind: SdesType) -> Option<&SdesItem> {
        self.items.iter().find(|item| item.kind == kind)
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let start = r.position();
        let ssrc = r.read_u32()?;
        let mut items = Vec::new();

        loop {
            let kind = r
                .read_u8()
                .map_err(|_| RtpError::malformed(MalformedKind::SdesUnterminated))?;
            if kind == 0 {
                break;
            }
            let len = r
                .read_u8()
                .map_err(|_| RtpError::malformed(MalformedKind::SdesItemOverrun))?;
            let text = r
                .read_bytes(usize::from(len))
                .map_err(|_| RtpError::malformed(MalformedKind::SdesItemOverrun))?;
            items.push(SdesItem::new(SdesType::from(kind), text));
        }

        // Skip the null octets that pad the chunk to a word boundary.
        let used = r.position() - start;
        r.skip((4 - used % 4) % 4)
            .map_err(|_| RtpError::malformed(MalformedKind::SdesUnterminated))?;

        Ok(Self { ssrc, items })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        for item in &self.items {
            if item.kind == SdesType::End {
                return Err(RtpError::EncodeFailure("END is not an SDES item"));
            }
            let len = u8::try_from(item.text.len())
                .map_err(|_| RtpError::EncodeFailure("SDES text longer than 255 octets"))?;
            out.push(item.kind.into());
            out.push(len);
            out.extend_from_slice(&item.text);
        }
        // END plus padding: always at least one zero octet.
        let used = out.len() - start;
        out.resize(out.len() + 4 - used % 4, 0);
        Ok(())
    }
}

/// Source description packet (PT=202).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescription {
    pub chunks: Vec<SdesChunk>,
}

impl SourceDescription {
    pub(crate) fn decode_body(count: u8, body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let chunks = (0..count)
            .map(|_| {
                if r.remaining() < 4 {
                    return Err(RtpError::malformed(MalformedKind::SdesChunkCount { count }));
                }
                SdesChunk::decode(&mut r)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { chunks })
    }

    pub(crate) fn write_body(&self, out: &mut Vec<u8>) -> Result<u8> {
        if self.chunks.len() > CommonHeader::MAX_COUNT {
            return Err(RtpError::EncodeFailure("more than 31 SDES chunks"));
        }
        for chunk in &self.chunks {
            chunk.write(out)?;
        }
        Ok(self.chunks.len() as u8)
    }
}
