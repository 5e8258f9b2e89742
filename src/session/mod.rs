//! Shared per-source RTP session state.
//!
//! One [`SessionState`] exists per received media source. It is created
//! when the source's RTSP session is set up and dropped at teardown. Both
//! the RTP data loop and the RTCP control loop hold a [`Session`] handle
//! and mutate the state through it:
//!
//! ```text
//! data loop    ── RTP packet ──▶ update_on_rtp_receive  ─┐
//!                                                        ├─ Mutex<SessionState>
//! control loop ── SR/SDES/BYE ▶ update_on_sender_report ─┤
//!              ◀─ RR/SDES/BYE ─ snapshot_for_report     ─┘
//! ```
//!
//! The mutex is held for one update or snapshot at a time and never
//! across a socket call.

pub mod report;
pub mod stats;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};

use crate::codec::rtcp::{
    Bye, NtpTimestamp, ReceiverReport, ReportBlock, SdesChunk, SdesItem, SdesType,
};
use crate::error::{Result, RtpError};
pub use stats::{JitterEstimator, SequenceTracker, SequenceUpdate};

/// Other SSRCs tracked as members beyond ourselves and the source. Caps
/// how far spoofed RTCP can stretch the report interval.
pub const MAX_OTHER_MEMBERS: usize = 16;

/// The most recent sender report from the remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastSenderReport {
    pub ntp_timestamp: NtpTimestamp,
    pub rtp_timestamp: u32,
    /// Local time the SR arrived, for the DLSR field.
    pub received_at: Instant,
    pub packet_count: u32,
    pub octet_count: u32,
}

/// What the remote source has told us about itself over RTCP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerState {
    /// SDES items from the source's most recent chunk.
    pub items: Vec<SdesItem>,
    /// Set once the source sends BYE.
    pub gone: bool,
    pub bye_reason: Option<String>,
    /// Last RR seen on the control port, kept for diagnostics.
    pub last_receiver_report: Option<ReceiverReport>,
}

impl PeerState {
    /// The source's canonical name, if it sent one.
    pub fn cname(&self) -> Option<String> {
        self.items
            .iter()
            .find(|item| item.kind == SdesType::Cname)
            .map(|item| item.text_lossy().into_owned())
    }
}

/// Point-in-time view of reception quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceptionStatistics {
    pub packets_received: u64,
    pub octets_received: u64,
    pub cumulative_lost: i64,
    pub extended_highest_seq: u32,
    /// Interarrival jitter in timestamp units.
    pub jitter: u32,
    pub sender_reports: u64,
}

/// Receiver-side state for one RTP source (RFC 3550 §6.4, Appendix A).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Remote sender's SSRC; `None` until locked in when accepting the
    /// first source seen.
    source_ssrc: Option<u32>,
    local_ssrc: u32,
    cname: String,
    clock_rate: u32,
    /// Reference point for converting arrival instants to timestamp units.
    epoch: Instant,
    sequence: SequenceTracker,
    jitter: JitterEstimator,
    octets_received: u64,
    sender_reports: u64,
    last_sr: Option<LastSenderReport>,
    peer: PeerState,
    /// Other SSRCs seen on the control port, with when they were last
    /// heard from. Excludes ourselves and the source.
    others: HashMap<u32, Instant>,
}

impl SessionState {
    pub fn new(local_ssrc: u32, source_ssrc: Option<u32>, cname: &str, clock_rate: u32) -> Self {
        Self {
            source_ssrc,
            local_ssrc,
            cname: cname.to_string(),
            clock_rate,
            epoch: Instant::now(),
            sequence: SequenceTracker::new(),
            jitter: JitterEstimator::new(),
            octets_received: 0,
            sender_reports: 0,
            last_sr: None,
            peer: PeerState::default(),
            others: HashMap::new(),
        }
    }

    pub fn local_ssrc(&self) -> u32 {
        self.local_ssrc
    }

    pub fn source_ssrc(&self) -> Option<u32> {
        self.source_ssrc
    }

    pub fn cname(&self) -> &str {
        &self.cname
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn peer(&self) -> &PeerState {
        &self.peer
    }

    pub fn last_sender_report(&self) -> Option<&LastSenderReport> {
        self.last_sr.as_ref()
    }

    pub fn has_sender_report(&self) -> bool {
        self.last_sr.is_some()
    }

    pub fn sequence(&self) -> &SequenceTracker {
        &self.sequence
    }

    /// Session members still present: ourselves, the source until it
    /// says BYE, and tracked others.
    pub fn member_count(&self) -> usize {
        let source = usize::from(self.source_ssrc.is_some() && !self.peer.gone);
        1 + source + self.others.len()
    }

    /// Drop other members not heard from since `cutoff` (RFC 3550 §6.3.5).
    /// Returns how many were removed.
    pub fn prune_members(&mut self, cutoff: Instant) -> usize {
        let before = self.others.len();
        self.others.retain(|_, last_seen| *last_seen >= cutoff);
        before - self.others.len()
    }

    fn note_member(&mut self, ssrc: u32, now: Instant) {
        if ssrc == self.local_ssrc || self.is_source(ssrc) {
            return;
        }
        if let Some(last_seen) = self.others.get_mut(&ssrc) {
            *last_seen = now;
        } else if self.others.len() < MAX_OTHER_MEMBERS {
            self.others.insert(ssrc, now);
        } else {
            tracing::debug!(ssrc, "member table full, not tracking SSRC");
        }
    }

    /// Check `ssrc` against the session's source, locking it in if the
    /// session accepts the first source seen.
    pub fn accept_source(&mut self, ssrc: u32) -> Result<()> {
        match self.source_ssrc {
            Some(expected) if expected == ssrc => Ok(()),
            Some(_) => Err(RtpError::UnexpectedSource { ssrc }),
            None => {
                tracing::debug!(ssrc, "source SSRC locked in");
                self.source_ssrc = Some(ssrc);
                self.others.remove(&ssrc);
                Ok(())
            }
        }
    }

    /// Whether `ssrc` is the source this session reports on.
    pub fn is_source(&self, ssrc: u32) -> bool {
        self.source_ssrc == Some(ssrc)
    }

    /// Convert a local instant to RTP timestamp units since the session epoch.
    pub fn arrival_units(&self, at: Instant) -> u32 {
        let nanos = at.saturating_duration_since(self.epoch).as_nanos();
        (nanos * u128::from(self.clock_rate) / 1_000_000_000) as u32
    }

    /// Account for a received RTP packet. `arrival` is in timestamp units
    /// (see [`arrival_units`](Self::arrival_units)).
    ///
    /// Returns how the sequence number related to the stream so far; a
    /// [`SequenceUpdate::Jump`] leaves jitter untouched.
    pub fn update_on_rtp_receive(
        &mut self,
        seq: u16,
        timestamp: u32,
        arrival: u32,
    ) -> SequenceUpdate {
        let update = self.sequence.update(seq);
        match update {
            SequenceUpdate::Jump => {}
            SequenceUpdate::Restarted => {
                self.jitter.reset();
                self.jitter.update(timestamp, arrival);
            }
            _ => self.jitter.update(timestamp, arrival),
        }
        update
    }

    /// Add payload bytes of an accepted packet to the octet count.
    pub fn record_payload(&mut self, len: usize) {
        self.octets_received += len as u64;
    }

    /// Remember a sender report from the source.
    pub fn update_on_sender_report(
        &mut self,
        ntp_timestamp: NtpTimestamp,
        rtp_timestamp: u32,
        received_at: Instant,
        packet_count: u32,
        octet_count: u32,
    ) {
        self.sender_reports += 1;
        self.last_sr = Some(LastSenderReport {
            ntp_timestamp,
            rtp_timestamp,
            received_at,
            packet_count,
            octet_count,
        });
    }

    /// Build the reception report block for the source and start a new
    /// loss interval.
    ///
    /// Fails with [`EncodeFailure`](RtpError::EncodeFailure) until both an
    /// SR and at least one RTP packet have been received.
    pub fn snapshot_for_report(&mut self, now: Instant) -> Result<ReportBlock> {
        let last_sr = self
            .last_sr
            .ok_or(RtpError::EncodeFailure("no sender report received"))?;
        let ssrc = self
            .source_ssrc
            .ok_or(RtpError::EncodeFailure("source SSRC unknown"))?;
        if !self.sequence.is_initialized() {
            return Err(RtpError::EncodeFailure("no RTP packets received"));
        }

        let delay = now.saturating_duration_since(last_sr.received_at);
        Ok(ReportBlock {
            ssrc,
            fraction_lost: self.sequence.take_interval_fraction(),
            cumulative_lost: self
                .sequence
                .cumulative_lost()
                .clamp(ReportBlock::MIN_LOST.into(), ReportBlock::MAX_LOST.into())
                as i32,
            extended_highest_seq: self.sequence.extended_max(),
            jitter: self.jitter.jitter(),
            last_sr: last_sr.ntp_timestamp.middle_32(),
            delay_since_last_sr: (delay.as_secs_f64() * 65536.0).min(f64::from(u32::MAX)) as u32,
        })
    }

    pub fn statistics(&self) -> ReceptionStatistics {
        ReceptionStatistics {
            packets_received: self.sequence.received(),
            octets_received: self.octets_received,
            cumulative_lost: self.sequence.cumulative_lost(),
            extended_highest_seq: self.sequence.extended_max(),
            jitter: self.jitter.jitter(),
            sender_reports: self.sender_reports,
        }
    }

    /// Fold a received SDES chunk into peer metadata.
    pub fn record_source_description(&mut self, chunk: &SdesChunk, now: Instant) {
        if chunk.ssrc == self.local_ssrc {
            return;
        }
        self.note_member(chunk.ssrc, now);
        if self.is_source(chunk.ssrc) {
            self.peer.items = chunk.items.clone();
        }
    }

    /// Keep a received RR for diagnostics.
    pub fn record_receiver_report(&mut self, rr: &ReceiverReport, now: Instant) {
        self.note_member(rr.ssrc, now);
        self.peer.last_receiver_report = Some(rr.clone());
    }

    /// Apply a received BYE. Returns `true` if it names the source.
    ///
    /// Only membership and the peer's `gone` flag change; reception
    /// statistics are left as they are.
    pub fn record_bye(&mut self, bye: &Bye) -> bool {
        for ssrc in &bye.sources {
            self.others.remove(ssrc);
        }
        let Some(source) = self.source_ssrc else {
            return false;
        };
        if !bye.sources.contains(&source) {
            return false;
        }
        self.peer.gone = true;
        self.peer.bye_reason = bye.reason_lossy().map(|r| r.into_owned());
        true
    }
}

/// Cloneable handle to one session's shared state and its stop signal.
///
/// Each loop gets a clone at construction. Stopping is cooperative:
/// [`stop`](Self::stop) sets a flag that both loops check at least once
/// per receive timeout.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
    stop: Arc<AtomicBool>,
    report_requested: Arc<AtomicBool>,
}

impl Session {
    pub fn new(state: SessionState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            stop: Arc::new(AtomicBool::new(false)),
            report_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Lock the state. Keep the guard for one update; never hold it
    /// across socket I/O.
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    /// Signal both loops to exit at their next wake-up.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Ask the control loop to send a receiver report at its next wake-up.
    pub fn request_report(&self) {
        self.report_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_report_request(&self) -> bool {
        self.report_requested.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const SOURCE: u32 = 0xAABBCCDD;
    const LOCAL: u32 = 0x11223344;

    fn state() -> SessionState {
        SessionState::new(LOCAL, Some(SOURCE), "rx@test", 90_000)
    }

    fn sender_report(state: &mut SessionState, at: Instant) {
        let ntp = NtpTimestamp::new(0x0001_0002, 0x0003_0004);
        state.update_on_sender_report(ntp, 9000, at, 10, 1000);
    }

    #[test]
    fn accept_source_checks_expected() {
        let mut s = state();
        assert!(s.accept_source(SOURCE).is_ok());
        assert!(matches!(
            s.accept_source(0x1),
            Err(RtpError::UnexpectedSource { ssrc: 1 })
        ));
    }

    #[test]
    fn first_seen_source_is_locked_in() {
        let mut s = SessionState::new(LOCAL, None, "rx", 8000);
        assert!(s.accept_source(0x5).is_ok());
        assert_eq!(s.source_ssrc(), Some(0x5));
        assert!(s.accept_source(0x6).is_err());
        assert_eq!(s.member_count(), 2);
    }

    #[test]
    fn snapshot_requires_sender_report() {
        let mut s = state();
        s.update_on_rtp_receive(1, 0, 0);
        assert!(matches!(
            s.snapshot_for_report(Instant::now()),
            Err(RtpError::EncodeFailure(_))
        ));
    }

    #[test]
    fn snapshot_requires_rtp() {
        let mut s = state();
        sender_report(&mut s, Instant::now());
        assert!(s.snapshot_for_report(Instant::now()).is_err());
    }

    #[test]
    fn snapshot_fields() {
        let mut s = state();
        let t0 = Instant::now();
        for (i, seq) in [10u16, 11, 13, 14].into_iter().enumerate() {
            let ts = i as u32 * 3000;
            s.update_on_rtp_receive(seq, ts, ts);
        }
        sender_report(&mut s, t0);

        let block = s.snapshot_for_report(t0 + Duration::from_millis(500)).unwrap();
        assert_eq!(block.ssrc, SOURCE);
        assert_eq!(block.extended_highest_seq, 14);
        assert_eq!(block.cumulative_lost, 1);
        assert_eq!(block.fraction_lost, 51);
        assert_eq!(block.jitter, 0);
        assert_eq!(block.last_sr, 0x0002_0003);
        assert_eq!(block.delay_since_last_sr, 32768);

        // Next interval has no new loss.
        let block = s.snapshot_for_report(t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(block.fraction_lost, 0);
        assert_eq!(block.cumulative_lost, 1);
    }

    #[test]
    fn arrival_units_follow_clock_rate() {
        let s = state();
        let at = s.epoch + Duration::from_millis(100);
        assert_eq!(s.arrival_units(at), 9000);
    }

    #[test]
    fn bye_for_source_marks_peer_gone_only() {
        let mut s = state();
        s.update_on_rtp_receive(5, 0, 0);
        sender_report(&mut s, Instant::now());
        let before = s.clone();

        assert!(s.record_bye(&Bye::new(vec![SOURCE], Some("shutdown"))));
        assert!(s.peer().gone);
        assert_eq!(s.peer().bye_reason.as_deref(), Some("shutdown"));
        assert_eq!(s.statistics(), before.statistics());
        assert_eq!(s.last_sender_report(), before.last_sender_report());
        assert_eq!(s.source_ssrc(), before.source_ssrc());
    }

    #[test]
    fn bye_for_other_source_is_ignored() {
        let mut s = state();
        assert!(!s.record_bye(&Bye::new(vec![0x99], None)));
        assert!(!s.peer().gone);
    }

    #[test]
    fn sdes_from_source_sets_cname() {
        let mut s = state();
        let now = Instant::now();
        s.record_source_description(
            &SdesChunk {
                ssrc: SOURCE,
                items: vec![SdesItem::cname("cam1")],
            },
            now,
        );
        assert_eq!(s.peer().cname().as_deref(), Some("cam1"));

        s.record_source_description(
            &SdesChunk {
                ssrc: 0x77,
                items: vec![SdesItem::cname("other")],
            },
            now,
        );
        assert_eq!(s.peer().cname().as_deref(), Some("cam1"));
        assert_eq!(s.member_count(), 3);
    }

    #[test]
    fn member_table_is_capped() {
        let mut s = state();
        let now = Instant::now();
        for ssrc in 0..100_000u32 {
            s.record_receiver_report(
                &ReceiverReport {
                    ssrc,
                    reports: vec![],
                },
                now,
            );
        }
        assert_eq!(s.member_count(), 2 + MAX_OTHER_MEMBERS);
    }

    #[test]
    fn silent_members_are_pruned() {
        let mut s = state();
        let t0 = Instant::now();
        let chunk = |ssrc| SdesChunk {
            ssrc,
            items: vec![],
        };
        s.record_source_description(&chunk(0x10), t0);
        s.record_source_description(&chunk(0x20), t0 + Duration::from_secs(30));
        assert_eq!(s.member_count(), 4);

        assert_eq!(s.prune_members(t0 + Duration::from_secs(10)), 1);
        assert_eq!(s.member_count(), 3);
        // Ourselves and the source are never pruned.
        assert_eq!(s.prune_members(t0 + Duration::from_secs(60)), 1);
        assert_eq!(s.member_count(), 2);
    }

    #[test]
    fn source_bye_leaves_membership() {
        let mut s = state();
        assert_eq!(s.member_count(), 2);
        s.record_bye(&Bye::new(vec![SOURCE], None));
        assert_eq!(s.member_count(), 1);
    }

    #[test]
    fn session_flags() {
        let session = Session::new(state());
        assert!(!session.is_stopped());
        session.request_report();
        assert!(session.take_report_request());
        assert!(!session.take_report_request());
        session.clone().stop();
        assert!(session.is_stopped());
    }
}
