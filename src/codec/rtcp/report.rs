//! Sender and receiver reports (RFC 3550 §6.4).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::header::CommonHeader;
use crate::codec::Reader;
use crate::error::{MalformedKind, Result, RtpError};

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// 64-bit NTP timestamp: seconds since 1900 in the high word, binary
/// fraction of a second in the low word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NtpTimestamp(pub u64);

impl NtpTimestamp {
    pub fn new(seconds: u32, fraction: u32) -> Self {
        Self((u64::from(seconds) << 32) | u64::from(fraction))
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let seconds = since_unix.as_secs().wrapping_add(NTP_UNIX_OFFSET_SECS) as u32;
        let fraction = ((u64::from(since_unix.subsec_nanos()) << 32) / 1_000_000_000) as u32;
        Self::new(seconds, fraction)
    }

    pub fn seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn fraction(self) -> u32 {
        self.0 as u32
    }

    /// The "compact" form used in the LSR field of a report block.
    pub fn middle_32(self) -> u32 {
        (self.0 >> 16) as u32
    }
}

/// One reception report block (24 bytes).
///
/// ```text
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |                 SSRC_1 (SSRC of first source)                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | fraction lost |       cumulative number of packets lost       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           extended highest sequence number received           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      interarrival jitter                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         last SR (LSR)                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                   delay since last SR (DLSR)                  |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportBlock {
    /// Source this block reports on.
    pub ssrc: u32,
    /// Fraction lost since the previous report, as a fixed-point /256 value.
    pub fraction_lost: u8,
    /// Cumulative packets lost; 24-bit signed on the wire.
    pub cumulative_lost: i32,
    pub extended_highest_seq: u32,
    /// Interarrival jitter in timestamp units.
    pub jitter: u32,
    /// Middle 32 bits of the NTP timestamp of the last SR, 0 if none.
    pub last_sr: u32,
    /// Delay since that SR in units of 1/65536 s.
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    pub const LEN: usize = 24;

    /// Largest and smallest values the 24-bit lost field can carry.
    pub const MAX_LOST: i32 = 0x7F_FFFF;
    pub const MIN_LOST: i32 = -0x80_0000;

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let ssrc = r.read_u32()?;
        let word = r.read_u32()?;
        Ok(Self {
            ssrc,
            fraction_lost: (word >> 24) as u8,
            // Sign-extend the low 24 bits.
            cumulative_lost: ((word << 8) as i32) >> 8,
            extended_highest_seq: r.read_u32()?,
            jitter: r.read_u32()?,
            last_sr: r.read_u32()?,
            delay_since_last_sr: r.read_u32()?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let lost = self.cumulative_lost.clamp(Self::MIN_LOST, Self::MAX_LOST) as u32 & 0x00FF_FFFF;
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.extend_from_slice(&((u32::from(self.fraction_lost) << 24) | lost).to_be_bytes());
        out.extend_from_slice(&self.extended_highest_seq.to_be_bytes());
        out.extend_from_slice(&self.jitter.to_be_bytes());
        out.extend_from_slice(&self.last_sr.to_be_bytes());
        out.extend_from_slice(&self.delay_since_last_sr.to_be_bytes());
    }
}

fn decode_blocks(r: &mut Reader<'_>, count: u8) -> Result<Vec<ReportBlock>> {
    if usize::from(count) * ReportBlock::LEN > r.remaining() {
        return Err(RtpError::malformed(MalformedKind::ReportBlocksOverrun { count }));
    }
    (0..count).map(|_| ReportBlock::decode(r)).collect()
}

fn write_blocks(blocks: &[ReportBlock], out: &mut Vec<u8>) -> Result<u8> {
    if blocks.len() > CommonHeader::MAX_COUNT {
        return Err(RtpError::EncodeFailure("more than 31 report blocks"));
    }
    for block in blocks {
        block.write(out);
    }
    Ok(blocks.len() as u8)
}

/// Sender information carried by an SR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderInfo {
    /// Wallclock time at which the report was sent.
    pub ntp_timestamp: NtpTimestamp,
    /// Same instant as `ntp_timestamp`, in RTP timestamp units.
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

/// Sender report (PT=200).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    pub sender_info: SenderInfo,
    pub reports: Vec<ReportBlock>,
}

impl SenderReport {
    pub(crate) fn decode_body(count: u8, body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let ssrc = r.read_u32()?;
        let seconds = r.read_u32()?;
        let fraction = r.read_u32()?;
        let sender_info = SenderInfo {
            ntp_timestamp: NtpTimestamp::new(seconds, fraction),
            rtp_timestamp: r.read_u32()?,
            packet_count: r.read_u32()?,
            octet_count: r.read_u32()?,
        };
        // Anything after the blocks is a profile-specific extension.
        let reports = decode_blocks(&mut r, count)?;
        Ok(Self {
            ssrc,
            sender_info,
            reports,
        })
    }

    pub(crate) fn write_body(&self, out: &mut Vec<u8>) -> Result<u8> {
        let info = &self.sender_info;
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.extend_from_slice(&info.ntp_timestamp.seconds().to_be_bytes());
        out.extend_from_slice(&info.ntp_timestamp.fraction().to_be_bytes());
        out.extend_from_slice(&info.rtp_timestamp.to_be_bytes());
        out.extend_from_slice(&info.packet_count.to_be_bytes());
        out.extend_from_slice(&info.octet_count.to_be_bytes());
        write_blocks(&self.reports, out)
    }
}

/// Receiver report (PT=201).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    /// SSRC of the receiver generating the report.
    pub ssrc: u32,
    pub reports: Vec<ReportBlock>,
}

impl ReceiverReport {
    pub(crate) fn decode_body(count: u8, body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let ssrc = r.read_u32()?;
        let reports = decode_blocks(&mut r, count)?;
        Ok(Self { ssrc, reports })
    }

    pub(crate) fn write_body(&self, out: &mut Vec<u8>) -> Result<u8> {
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        write_blocks(&self.reports, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_is_sign_extended() {
        let mut bytes = vec![0; 24];
        bytes[4..8].copy_from_slice(&[0x40, 0xFF, 0xFF, 0xFE]);
        let block = ReportBlock::decode(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(block.fraction_lost, 0x40);
        assert_eq!(block.cumulative_lost, -2);
    }

    #[test]
    fn lost_is_clamped_to_24_bits() {
        let block = ReportBlock {
            cumulative_lost: 10_000_000,
            ..Default::default()
        };
        let mut out = Vec::new();
        block.write(&mut out);
        assert_eq!(&out[4..8], &[0x00, 0x7F, 0xFF, 0xFF]);

        let block = ReportBlock {
            cumulative_lost: -10_000_000,
            fraction_lost: 0xFF,
            ..Default::default()
        };
        out.clear();
        block.write(&mut out);
        assert_eq!(&out[4..8], &[0xFF, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn ntp_middle_bits() {
        let ntp = NtpTimestamp::new(0x1234_5678, 0x9ABC_DEF0);
        assert_eq!(ntp.middle_32(), 0x5678_9ABC);
    }

    #[test]
    fn ntp_from_unix_epoch() {
        let ntp = NtpTimestamp::from_system_time(UNIX_EPOCH + Duration::from_millis(1500));
        assert_eq!(ntp.seconds(), 2_208_988_801);
        assert_eq!(ntp.fraction(), 0x8000_0000);
    }

    #[test]
    fn report_count_beyond_body_is_malformed() {
        // SSRC plus one block, but count claims two.
        let body = vec![0; 4 + 24];
        assert!(matches!(
            ReceiverReport::decode_body(2, &body),
            Err(RtpError::Malformed {
                kind: MalformedKind::ReportBlocksOverrun { count: 2 }
            })
        ));
    }

    #[test]
    fn sender_report_too_short_is_malformed() {
        assert!(SenderReport::decode_body(0, &[0; 20]).is_err());
    }
}
