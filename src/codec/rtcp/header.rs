use crate::codec::{RTP_VERSION, Reader};
use crate::error::{MalformedKind, Result, RtpError};

/// RTCP packet type (RFC 3550 §12.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Bye = 203,
    App = 204,
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            200 => Ok(Self::SenderReport),
            201 => Ok(Self::ReceiverReport),
            202 => Ok(Self::SourceDescription),
            203 => Ok(Self::Bye),
            204 => Ok(Self::App),
            other => Err(other),
        }
    }
}

/// The 4-byte header shared by every RTCP packet.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|  Count  |      PT       |             Length            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// `count` is the report-block count for SR/RR, the chunk count for SDES,
/// the source count for BYE and the subtype for APP. `length` is the packet
/// length in 32-bit words minus one, header included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    pub padding: bool,
    pub count: u8,
    pub packet_type: u8,
    pub length: u16,
}

impl CommonHeader {
    pub const LEN: usize = 4;

    /// Largest value the 5-bit count field can carry.
    pub const MAX_COUNT: usize = 31;

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let first_byte = r.read_u8()?;
        let version = first_byte >> 6;
        if version != RTP_VERSION {
            return Err(RtpError::malformed(MalformedKind::BadVersion(version)));
        }
        Ok(Self {
            padding: first_byte & 0x20 != 0,
            count: first_byte & 0x1F,
            packet_type: r.read_u8()?,
            length: r.read_u16()?,
        })
    }

    /// Number of body bytes following this header.
    pub fn body_len(&self) -> usize {
        usize::from(self.length) * 4
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push((RTP_VERSION << 6) | ((self.padding as u8) << 5) | (self.count & 0x1F));
        out.push(self.packet_type);
        out.extend_from_slice(&self.length.to_be_bytes());
    }
}
