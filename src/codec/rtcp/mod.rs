//! RTCP compound packets (RFC 3550 §6).
//!
//! A datagram on the control port carries one or more RTCP packets back to
//! back. Each starts with a [`CommonHeader`] whose length field is
//! authoritative: the decoder slices exactly that many bytes for the body,
//! parses the body by its packet type and moves on.
//!
//! Decoding is all-or-nothing. If any entry is malformed, or bytes are left
//! over that cannot form another header, the whole datagram is rejected so
//! callers never act on half a compound.

pub mod app;
pub mod bye;
pub mod header;
pub mod report;
pub mod sdes;

pub use app::App;
pub use bye::Bye;
pub use header::{CommonHeader, PacketType};
pub use report::{NtpTimestamp, ReceiverReport, ReportBlock, SenderInfo, SenderReport};
pub use sdes::{SdesChunk, SdesItem, SdesType, SourceDescription};

use super::{Reader, strip_padding};
use crate::error::{MalformedKind, Result, RtpError};

/// One entry of a compound RTCP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(SourceDescription),
    Bye(Bye),
    App(App),
    /// Packet types outside SR/RR/SDES/BYE/APP (e.g. feedback or XR). The
    /// body is kept verbatim and otherwise ignored.
    Unknown {
        packet_type: u8,
        count: u8,
        body: Vec<u8>,
    },
}

impl RtcpPacket {
    /// Wire packet type.
    pub fn packet_type(&self) -> u8 {
        match self {
            Self::SenderReport(_) => PacketType::SenderReport as u8,
            Self::ReceiverReport(_) => PacketType::ReceiverReport as u8,
            Self::SourceDescription(_) => PacketType::SourceDescription as u8,
            Self::Bye(_) => PacketType::Bye as u8,
            Self::App(_) => PacketType::App as u8,
            Self::Unknown { packet_type, .. } => *packet_type,
        }
    }

    fn decode_body(header: &CommonHeader, body: &[u8]) -> Result<Self> {
        let count = header.count;
        Ok(match PacketType::try_from(header.packet_type) {
            Ok(PacketType::SenderReport) => {
                Self::SenderReport(SenderReport::decode_body(count, body)?)
            }
            Ok(PacketType::ReceiverReport) => {
                Self::ReceiverReport(ReceiverReport::decode_body(count, body)?)
            }
            Ok(PacketType::SourceDescription) => {
                Self::SourceDescription(SourceDescription::decode_body(count, body)?)
            }
            Ok(PacketType::Bye) => Self::Bye(Bye::decode_body(count, body)?),
            Ok(PacketType::App) => Self::App(App::decode_body(count, body)?),
            Err(packet_type) => Self::Unknown {
                packet_type,
                count,
                body: body.to_vec(),
            },
        })
    }

    /// Append this packet, header included, to `out`.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        // Header is patched once the body length is known.
        out.extend_from_slice(&[0; CommonHeader::LEN]);

        let count = match self {
            Self::SenderReport(sr) => sr.write_body(out),
            Self::ReceiverReport(rr) => rr.write_body(out),
            Self::SourceDescription(sdes) => sdes.write_body(out),
            Self::Bye(bye) => bye.write_body(out),
            Self::App(app) => app.write_body(out),
            Self::Unknown { count, body, .. } => {
                out.extend_from_slice(body);
                Ok(*count)
            }
        };
        let count = match count {
            Ok(count) => count,
            Err(e) => {
                out.truncate(start);
                return Err(e);
            }
        };

        let total = out.len() - start;
        if total % 4 != 0 {
            out.truncate(start);
            return Err(RtpError::EncodeFailure("RTCP packet not word aligned"));
        }
        let Ok(length) = u16::try_from(total / 4 - 1) else {
            out.truncate(start);
            return Err(RtpError::EncodeFailure("RTCP packet longer than 65535 words"));
        };

        let mut header = Vec::with_capacity(CommonHeader::LEN);
        CommonHeader {
            padding: false,
            count,
            packet_type: self.packet_type(),
            length,
        }
        .write(&mut header);
        out[start..start + CommonHeader::LEN].copy_from_slice(&header);
        Ok(())
    }
}

/// Decode a compound RTCP datagram into its packets, in order.
///
/// Fails with [`Malformed`](RtpError::Malformed) when the datagram is empty,
/// a header has the wrong version, a length field points past the end of
/// the datagram, or a body does not parse; and with
/// [`TrailingData`](RtpError::TrailingData) when fewer than four bytes
/// remain after the last complete packet.
pub fn decode_compound(buf: &[u8]) -> Result<Vec<RtcpPacket>> {
    if buf.is_empty() {
        return Err(RtpError::malformed(MalformedKind::Empty));
    }

    let mut r = Reader::new(buf);
    let mut packets = Vec::new();

    while !r.is_empty() {
        if r.remaining() < CommonHeader::LEN {
            if packets.is_empty() {
                return Err(RtpError::malformed(MalformedKind::Truncated));
            }
            return Err(RtpError::TrailingData {
                remaining: r.remaining(),
            });
        }

        let header = CommonHeader::decode(&mut r)?;
        let body_len = header.body_len();
        if body_len > r.remaining() {
            return Err(RtpError::malformed(MalformedKind::LengthExceedsBuffer {
                declared: body_len + CommonHeader::LEN,
                available: r.remaining() + CommonHeader::LEN,
            }));
        }
        let body = strip_padding(r.read_bytes(body_len)?, header.padding)?;
        packets.push(RtcpPacket::decode_body(&header, body)?);
    }

    Ok(packets)
}

/// Encode packets back to back into one datagram.
pub fn encode_compound(packets: &[RtcpPacket]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for packet in packets {
        packet.write(&mut out)?;
    }
    Ok(out)
}

/// Whether a compound follows the RFC 3550 §6.1 convention of starting
/// with an SR or RR. Decoding accepts either way; this is for diagnostics.
pub fn is_conventional(packets: &[RtcpPacket]) -> bool {
    matches!(
        packets.first(),
        Some(RtcpPacket::SenderReport(_) | RtcpPacket::ReceiverReport(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(ssrc: u32) -> ReportBlock {
        ReportBlock {
            ssrc,
            fraction_lost: 12,
            cumulative_lost: -3,
            extended_highest_seq: 0x0001_0005,
            jitter: 77,
            last_sr: 0x1234_5678,
            delay_since_last_sr: 65536,
        }
    }

    fn sender_report() -> RtcpPacket {
        RtcpPacket::SenderReport(SenderReport {
            ssrc: 0xCAFEBABE,
            sender_info: SenderInfo {
                ntp_timestamp: NtpTimestamp::new(3_900_000_000, 0x8000_0000),
                rtp_timestamp: 123_456,
                packet_count: 1000,
                octet_count: 1_200_000,
            },
            reports: vec![block(1), block(2)],
        })
    }

    #[test]
    fn sender_report_round_trip() {
        let packets = vec![sender_report()];
        let bytes = encode_compound(&packets).unwrap();
        assert_eq!(bytes.len(), 4 + 24 + 2 * 24);
        assert_eq!(bytes[0], 0x82);
        assert_eq!(bytes[1], 200);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 18);
        assert_eq!(decode_compound(&bytes).unwrap(), packets);
    }

    #[test]
    fn receiver_report_round_trip() {
        for reports in [vec![], vec![block(7)]] {
            let packets = vec![RtcpPacket::ReceiverReport(ReceiverReport {
                ssrc: 0x1111,
                reports,
            })];
            let bytes = encode_compound(&packets).unwrap();
            assert_eq!(decode_compound(&bytes).unwrap(), packets);
        }
    }

    #[test]
    fn sdes_cname_round_trip() {
        let packets = vec![RtcpPacket::SourceDescription(SourceDescription {
            chunks: vec![SdesChunk {
                ssrc: 0x2222,
                items: vec![SdesItem::cname("cam1")],
            }],
        })];
        let bytes = encode_compound(&packets).unwrap();
        let decoded = decode_compound(&bytes).unwrap();
        assert_eq!(decoded, packets);
        let RtcpPacket::SourceDescription(sdes) = &decoded[0] else {
            panic!("expected SDES");
        };
        assert_eq!(sdes.chunks[0].items, vec![SdesItem::cname("cam1")]);
    }

    #[test]
    fn bye_round_trip() {
        for reason in [None, Some("camera rebooting")] {
            let packets = vec![RtcpPacket::Bye(Bye::new(vec![0x3333, 0x4444], reason))];
            let bytes = encode_compound(&packets).unwrap();
            assert_eq!(bytes.len() % 4, 0);
            assert_eq!(decode_compound(&bytes).unwrap(), packets);
        }
    }

    #[test]
    fn compound_keeps_order() {
        let packets = vec![
            RtcpPacket::ReceiverReport(ReceiverReport {
                ssrc: 5,
                reports: vec![],
            }),
            RtcpPacket::SourceDescription(SourceDescription {
                chunks: vec![SdesChunk {
                    ssrc: 5,
                    items: vec![SdesItem::cname("rx"), SdesItem::new(SdesType::Tool, "t")],
                }],
            }),
            RtcpPacket::Bye(Bye::new(vec![5], None)),
        ];
        let bytes = encode_compound(&packets).unwrap();
        let decoded = decode_compound(&bytes).unwrap();
        assert!(is_conventional(&decoded));
        assert_eq!(decoded, packets);
    }

    #[test]
    fn truncated_mid_entry_is_malformed() {
        let bytes = encode_compound(&[sender_report()]).unwrap();
        for cut in [5, 20, bytes.len() - 1] {
            assert!(
                matches!(
                    decode_compound(&bytes[..cut]),
                    Err(RtpError::Malformed {
                        kind: MalformedKind::LengthExceedsBuffer { .. }
                    })
                ),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn bad_second_entry_rejects_whole_compound() {
        let mut bytes = encode_compound(&[sender_report()]).unwrap();
        // BYE whose count claims 4 sources but carries only 1.
        bytes.extend_from_slice(&[0x84, 203, 0x00, 0x01, 0, 0, 0, 1]);
        assert!(matches!(
            decode_compound(&bytes),
            Err(RtpError::Malformed {
                kind: MalformedKind::ByeSourcesOverrun { count: 4 }
            })
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode_compound(&[RtcpPacket::Bye(Bye::new(vec![1], None))]).unwrap();
        bytes.extend_from_slice(&[0x80, 0x00]);
        assert!(matches!(
            decode_compound(&bytes),
            Err(RtpError::TrailingData { remaining: 2 })
        ));
    }

    #[test]
    fn empty_datagram_is_malformed() {
        assert!(matches!(
            decode_compound(&[]),
            Err(RtpError::Malformed {
                kind: MalformedKind::Empty
            })
        ));
    }

    #[test]
    fn unknown_types_are_skipped_not_rejected() {
        // Transport-layer feedback (205) followed by an RR.
        let mut bytes = vec![0x81, 205, 0x00, 0x02, 0, 0, 0, 1, 0, 0, 0, 2];
        bytes.extend(
            encode_compound(&[RtcpPacket::ReceiverReport(ReceiverReport {
                ssrc: 9,
                reports: vec![],
            })])
            .unwrap(),
        );
        let decoded = decode_compound(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].packet_type(), 205);
        assert!(!is_conventional(&decoded));
    }

    #[test]
    fn padded_entry_is_accepted() {
        // BYE for one source, P bit set, 4 bytes of padding.
        let bytes = [0xA1, 203, 0x00, 0x02, 0, 0, 0, 9, 0, 0, 0, 4];
        let decoded = decode_compound(&bytes).unwrap();
        assert_eq!(decoded, vec![RtcpPacket::Bye(Bye::new(vec![9], None))]);
    }

    #[test]
    fn failed_encode_leaves_buffer_untouched() {
        let mut out = vec![0xEE];
        let bye = RtcpPacket::Bye(Bye {
            sources: vec![1],
            reason: Some(vec![b'x'; 300]),
        });
        assert!(bye.write(&mut out).is_err());
        assert_eq!(out, vec![0xEE]);
    }
}
