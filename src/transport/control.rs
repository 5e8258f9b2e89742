//! RTCP control loop.
//!
//! The loop moves through four states:
//!
//! ```text
//! Idle ──start──▶ AwaitingTraffic ──first SR──▶ Active ──stop──▶ Terminating
//!                        └────────────────stop──────────────────────┘
//! ```
//!
//! Receiver reports go out only while `Active`, once per scaled and
//! randomised interval (RFC 3550 §6.3) or when a report is requested. On
//! stop a final RR + BYE compound is sent if a peer address is known.

use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use rand::RngExt;

use crate::codec::rtcp::{RtcpPacket, decode_compound, is_conventional};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::session::{Session, report};

/// e - 3/2, the compensation factor for timer reconsideration (RFC 3550 §6.3.1).
const COMPENSATION: f64 = std::f64::consts::E - 1.5;

/// Report intervals of silence after which another member is dropped
/// (RFC 3550 §6.3.5).
const MEMBER_TIMEOUT_INTERVALS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Idle,
    AwaitingTraffic,
    Active,
    Terminating,
}

/// What an applied RTCP datagram means for the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inbound {
    /// An SR or SDES chunk in it came from the session's source.
    pub from_source: bool,
    /// An SR arrived and immediate answers are configured.
    pub answer: bool,
}

/// Socket-free half of the control loop: applies inbound RTCP and decides
/// when and what to send.
pub struct Controller {
    session: Session,
    state: ControlState,
    base_interval: Duration,
    sdes_every: u32,
    report_on_sender_report: bool,
    bye_reason: Option<String>,
    reports_sent: u32,
    next_report: Option<Instant>,
}

impl Controller {
    pub fn new(session: Session, config: &SessionConfig) -> Self {
        Self {
            session,
            state: ControlState::Idle,
            base_interval: config.rtcp_interval,
            sdes_every: config.sdes_every.max(1),
            report_on_sender_report: config.report_on_sender_report,
            bye_reason: config.bye_reason.clone(),
            reports_sent: 0,
            next_report: None,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn next_report(&self) -> Option<Instant> {
        self.next_report
    }

    /// Begin waiting for traffic. The first report is scheduled at half an
    /// interval.
    pub fn start(&mut self, now: Instant) {
        if self.state != ControlState::Idle {
            return;
        }
        self.state = ControlState::AwaitingTraffic;
        self.next_report = Some(now + self.interval() / 2);
    }

    /// Apply one inbound RTCP datagram.
    ///
    /// The compound is decoded in full before anything is applied, so a
    /// malformed datagram leaves the session untouched.
    pub fn handle_datagram(&mut self, datagram: &[u8], now: Instant) -> Result<Inbound> {
        let packets = decode_compound(datagram)?;
        if !is_conventional(&packets) {
            tracing::debug!(count = packets.len(), "compound does not start with SR/RR");
        }

        let mut sender_report = false;
        let mut from_source = false;
        {
            let mut state = self.session.lock();
            for packet in &packets {
                match packet {
                    RtcpPacket::SenderReport(sr) => {
                        if let Err(e) = state.accept_source(sr.ssrc) {
                            tracing::debug!(error = %e, "ignoring sender report");
                            continue;
                        }
                        let info = &sr.sender_info;
                        state.update_on_sender_report(
                            info.ntp_timestamp,
                            info.rtp_timestamp,
                            now,
                            info.packet_count,
                            info.octet_count,
                        );
                        tracing::debug!(
                            ssrc = sr.ssrc,
                            rtp_ts = info.rtp_timestamp,
                            packets = info.packet_count,
                            "sender report"
                        );
                        sender_report = true;
                        from_source = true;
                    }
                    RtcpPacket::ReceiverReport(rr) => state.record_receiver_report(rr, now),
                    RtcpPacket::SourceDescription(sdes) => {
                        for chunk in &sdes.chunks {
                            from_source |= state.is_source(chunk.ssrc);
                            state.record_source_description(chunk, now);
                        }
                    }
                    RtcpPacket::Bye(bye) => {
                        if state.record_bye(bye) {
                            let reason = bye.reason_lossy().unwrap_or_default();
                            tracing::info!(reason = %reason, "source left the session");
                        }
                    }
                    RtcpPacket::App(app) => {
                        let name = String::from_utf8_lossy(&app.name);
                        tracing::trace!(name = %name, subtype = app.subtype, "ignoring APP");
                    }
                    RtcpPacket::Unknown { packet_type, .. } => {
                        tracing::trace!(packet_type, "ignoring unknown RTCP packet");
                    }
                }
            }
        }

        if sender_report && self.state == ControlState::AwaitingTraffic {
            tracing::info!("first sender report, starting receiver reports");
            self.state = ControlState::Active;
        }
        Ok(Inbound {
            from_source,
            answer: sender_report
                && self.report_on_sender_report
                && self.state == ControlState::Active,
        })
    }

    /// Build the next scheduled or requested report, if one is due.
    ///
    /// Nothing is built before the first SR. A due timer is rearmed
    /// whether or not a report goes out.
    pub fn poll_report(&mut self, now: Instant) -> Result<Option<Vec<u8>>> {
        let requested = self.session.take_report_request();
        let due = self.next_report.is_some_and(|at| at <= now);
        if !due && !requested {
            return Ok(None);
        }
        if due {
            self.prune_members(now);
            self.next_report = Some(now + self.interval());
        }
        if self.state != ControlState::Active {
            tracing::trace!(state = ?self.state, "report suppressed");
            return Ok(None);
        }
        self.report_now(now).map(Some)
    }

    /// Build a report compound immediately: RR, plus SDES every
    /// `sdes_every` reports starting with the first.
    pub fn report_now(&mut self, now: Instant) -> Result<Vec<u8>> {
        let with_sdes = self.reports_sent % self.sdes_every == 0;
        let bytes = report::report_compound(&mut self.session.lock(), now, with_sdes)?;
        self.reports_sent = self.reports_sent.wrapping_add(1);
        Ok(bytes)
    }

    /// Enter `Terminating` and build the final RR + BYE compound.
    pub fn goodbye(&mut self, now: Instant) -> Result<Vec<u8>> {
        self.state = ControlState::Terminating;
        self.next_report = None;
        report::goodbye_compound(&mut self.session.lock(), now, self.bye_reason.as_deref())
    }

    /// Deterministic part of the report interval: the base scaled by half
    /// the membership, never below the base.
    pub fn scaled_interval(&self) -> Duration {
        let members = self.session.lock().member_count();
        let scale = (members as f64 / 2.0).max(1.0);
        self.base_interval.mul_f64(scale)
    }

    fn prune_members(&self, now: Instant) {
        let timeout = self.scaled_interval() * MEMBER_TIMEOUT_INTERVALS;
        let Some(cutoff) = now.checked_sub(timeout) else {
            return;
        };
        let removed = self.session.lock().prune_members(cutoff);
        if removed > 0 {
            tracing::debug!(removed, "timed out silent members");
        }
    }

    fn interval(&self) -> Duration {
        let jitter = rand::rng().random::<f64>() + 0.5;
        self.scaled_interval().mul_f64(jitter / COMPENSATION)
    }
}

/// RTCP loop for one media source: receives on the control socket and
/// sends reports to the peer.
pub struct ControlLoop {
    socket: UdpSocket,
    controller: Controller,
    peer: Option<SocketAddr>,
    buf: Vec<u8>,
    recv_timeout: Duration,
}

impl ControlLoop {
    /// With `peer` unset, reports go to wherever the first RTCP datagram
    /// carrying the source's SR or SDES came from.
    pub fn new(
        socket: UdpSocket,
        controller: Controller,
        peer: Option<SocketAddr>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            socket,
            controller,
            peer,
            buf: vec![0; config.max_datagram],
            recv_timeout: config.recv_timeout.max(Duration::from_millis(1)),
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Run until the session is stopped or the socket fails.
    ///
    /// A stopped loop sends its BYE before returning. A failed socket
    /// returns the error without one.
    pub fn run(&mut self) -> Result<()> {
        let local = self.socket.local_addr()?;
        tracing::info!(%local, peer = ?self.peer, "RTCP control loop started");
        self.controller.start(Instant::now());

        let session = self.controller.session.clone();
        while !session.is_stopped() {
            let now = Instant::now();
            match self.controller.poll_report(now) {
                Ok(Some(bytes)) => self.send(&bytes),
                Ok(None) => {}
                Err(e) => tracing::debug!(error = %e, "skipping report cycle"),
            }

            // Wake for the next report even if nothing arrives.
            let wait = self
                .controller
                .next_report()
                .map(|at| at.saturating_duration_since(now))
                .unwrap_or(self.recv_timeout)
                .clamp(Duration::from_millis(1), self.recv_timeout);
            self.socket.set_read_timeout(Some(wait))?;

            let (len, from) = match self.socket.recv_from(&mut self.buf) {
                Ok(received) => received,
                Err(e) if super::is_transient(&e) => continue,
                Err(e) => {
                    tracing::warn!(%local, error = %e, "RTCP socket failed");
                    return Err(e.into());
                }
            };

            match self.controller.handle_datagram(&self.buf[..len], Instant::now()) {
                Ok(inbound) => {
                    if self.peer.is_none() && inbound.from_source {
                        tracing::info!(peer = %from, "learned RTCP peer address");
                        self.peer = Some(from);
                    }
                    if inbound.answer {
                        match self.controller.report_now(Instant::now()) {
                            Ok(bytes) => self.send(&bytes),
                            Err(e) => tracing::debug!(error = %e, "no answer to sender report"),
                        }
                    }
                }
                Err(e) => tracing::debug!(%from, error = %e, "dropped RTCP datagram"),
            }
        }

        match self.controller.goodbye(Instant::now()) {
            Ok(bytes) => self.send(&bytes),
            Err(e) => tracing::warn!(error = %e, "could not build BYE"),
        }
        tracing::info!(%local, "RTCP control loop stopped");
        Ok(())
    }

    /// Best-effort send to the peer; failures are logged, never fatal.
    fn send(&self, bytes: &[u8]) {
        let Some(peer) = self.peer else {
            tracing::debug!(len = bytes.len(), "no RTCP peer yet, report not sent");
            return;
        };
        match self.socket.send_to(bytes, peer) {
            Ok(_) => tracing::trace!(%peer, len = bytes.len(), "sent RTCP"),
            Err(e) => tracing::warn!(%peer, error = %e, "RTCP send failed"),
        }
    }
}
