use std::borrow::Cow;

use super::header::CommonHeader;
use crate::codec::Reader;
use crate::error::{MalformedKind, Result, RtpError};

/// Goodbye packet (PT=203, RFC 3550 §6.6).
///
/// ```text
/// header (count = number of sources)
/// SSRC/CSRC × count
/// optional: length(8) | reason (length octets, not NUL-terminated) | zero padding
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bye {
    pub sources: Vec<u32>,
    /// Raw reason text, at most 255 octets.
    pub reason: Option<Vec<u8>>,
}

impl Bye {
    pub fn new(sources: Vec<u32>, reason: Option<&str>) -> Self {
        Self {
            sources,
            reason: reason.map(|r| r.as_bytes().to_vec()),
        }
    }

    pub fn reason_lossy(&self) -> Option<Cow<'_, str>> {
        self.reason.as_deref().map(String::from_utf8_lossy)
    }

    pub(crate) fn decode_body(count: u8, body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        if usize::from(count) * 4 > r.remaining() {
            return Err(RtpError::malformed(MalformedKind::ByeSourcesOverrun { count }));
        }
        let sources = (0..count)
            .map(|_| r.read_u32())
            .collect::<Result<Vec<_>>>()?;

        let reason = if r.is_empty() {
            None
        } else {
            let len = usize::from(r.read_u8()?);
            let text = r
                .read_bytes(len)
                .map_err(|_| RtpError::malformed(MalformedKind::ByeReasonOverrun))?;
            Some(text.to_vec())
        };

        Ok(Self { sources, reason })
    }

    pub(crate) fn write_body(&self, out: &mut Vec<u8>) -> Result<u8> {
        if self.sources.len() > CommonHeader::MAX_COUNT {
            return Err(RtpError::EncodeFailure("more than 31 BYE sources"));
        }
        for ssrc in &self.sources {
            out.extend_from_slice(&ssrc.to_be_bytes());
        }
        if let Some(reason) = &self.reason {
            let len = u8::try_from(reason.len())
                .map_err(|_| RtpError::EncodeFailure("BYE reason longer than 255 octets"))?;
            let start = out.len();
            out.push(len);
            out.extend_from_slice(reason);
            let used = out.len() - start;
            out.resize(out.len() + (4 - used % 4) % 4, 0);
        }
        Ok(self.sources.len() as u8)
    }
}
