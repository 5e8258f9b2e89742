//! Outbound RTCP built from session state.
//!
//! Reports are sent as receiver (never relay), so no CSRCs appear. An RR
//! carries one report block once an SR has been correlated with received
//! RTP, and none before that.

use std::time::Instant;

use super::SessionState;
use crate::codec::rtcp::{
    Bye, ReceiverReport, RtcpPacket, SdesChunk, SdesItem, SourceDescription, encode_compound,
};
use crate::error::Result;

/// Receiver report for the current state. Starts a new loss interval when
/// a block is included.
pub fn receiver_report(state: &mut SessionState, now: Instant) -> ReceiverReport {
    let reports = match state.snapshot_for_report(now) {
        Ok(block) => vec![block],
        Err(e) => {
            tracing::trace!(reason = %e, "receiver report without report block");
            Vec::new()
        }
    };
    ReceiverReport {
        ssrc: state.local_ssrc(),
        reports,
    }
}

/// Source description carrying our CNAME.
pub fn source_description(state: &SessionState, cname: &str) -> SourceDescription {
    SourceDescription {
        chunks: vec![SdesChunk {
            ssrc: state.local_ssrc(),
            items: vec![SdesItem::cname(cname)],
        }],
    }
}

/// BYE for our own SSRC.
pub fn bye(state: &SessionState, reason: Option<&str>) -> Bye {
    Bye::new(vec![state.local_ssrc()], reason)
}

/// Encode a standalone RR packet.
pub fn encode_receiver_report(state: &mut SessionState, now: Instant) -> Result<Vec<u8>> {
    encode_compound(&[RtcpPacket::ReceiverReport(receiver_report(state, now))])
}

/// Encode a standalone SDES packet.
pub fn encode_source_description(state: &SessionState, cname: &str) -> Result<Vec<u8>> {
    encode_compound(&[RtcpPacket::SourceDescription(source_description(state, cname))])
}

/// Encode a standalone BYE packet.
pub fn encode_bye(state: &SessionState, reason: Option<&str>) -> Result<Vec<u8>> {
    encode_compound(&[RtcpPacket::Bye(bye(state, reason))])
}

/// Periodic report compound: RR, then SDES when `with_sdes` is set.
pub fn report_compound(state: &mut SessionState, now: Instant, with_sdes: bool) -> Result<Vec<u8>> {
    let mut packets = vec![RtcpPacket::ReceiverReport(receiver_report(state, now))];
    if with_sdes {
        let cname = state.cname().to_string();
        packets.push(RtcpPacket::SourceDescription(source_description(state, &cname)));
    }
    encode_compound(&packets)
}

/// Final compound sent on teardown: RR then BYE.
pub fn goodbye_compound(
    state: &mut SessionState,
    now: Instant,
    reason: Option<&str>,
) -> Result<Vec<u8>> {
    encode_compound(&[
        RtcpPacket::ReceiverReport(receiver_report(state, now)),
        RtcpPacket::Bye(bye(state, reason)),
    ])
}
