use std::net::UdpSocket;
use std::time::{Duration, Instant};

use crate::codec::rtp::RtpPacket;
use crate::config::SessionConfig;
use crate::error::{Result, RtpError};
use crate::media::MediaSink;
use crate::session::{SequenceUpdate, Session};

/// Socket-free half of the data loop: validates one RTP datagram, updates
/// the session and delivers the payload.
pub struct RtpReceiver {
    session: Session,
    sink: Box<dyn MediaSink>,
    payload_types: Vec<u8>,
}

impl RtpReceiver {
    /// An empty `payload_types` accepts every payload type.
    pub fn new(session: Session, sink: Box<dyn MediaSink>, payload_types: Vec<u8>) -> Self {
        Self {
            session,
            sink,
            payload_types,
        }
    }

    /// Handle one datagram that arrived at `at`.
    ///
    /// Malformed packets and packets from the wrong SSRC or with an
    /// unnegotiated payload type are rejected before any state changes.
    /// A sequence [`Jump`](SequenceUpdate::Jump) is accounted but not
    /// delivered.
    pub fn process(&mut self, datagram: &[u8], at: Instant) -> Result<SequenceUpdate> {
        let packet = RtpPacket::decode(datagram)?;
        let header = &packet.header;

        if !self.payload_types.is_empty() && !self.payload_types.contains(&header.payload_type) {
            return Err(RtpError::UnexpectedPayloadType {
                payload_type: header.payload_type,
            });
        }

        let update = {
            let mut state = self.session.lock();
            state.accept_source(header.ssrc)?;
            let arrival = state.arrival_units(at);
            let update = state.update_on_rtp_receive(header.sequence, header.timestamp, arrival);
            if update.is_valid() {
                state.record_payload(packet.payload.len());
            }
            update
        };

        match update {
            SequenceUpdate::Jump => {
                tracing::debug!(seq = header.sequence, "sequence jump, packet held back");
            }
            SequenceUpdate::Restarted => {
                tracing::info!(seq = header.sequence, "source restarted its sequence numbers");
                self.sink.deliver(header.timestamp, header.marker, packet.payload);
            }
            _ => {
                tracing::trace!(
                    seq = header.sequence,
                    ts = header.timestamp,
                    marker = header.marker,
                    len = packet.payload.len(),
                    "RTP packet"
                );
                self.sink.deliver(header.timestamp, header.marker, packet.payload);
            }
        }
        Ok(update)
    }
}

/// RTP receive loop for one media source.
///
/// Blocks on the data socket with a read timeout, checking the session's
/// stop flag between reads. Bad packets are dropped and logged; only a
/// socket error ends the loop early.
pub struct DataLoop {
    socket: UdpSocket,
    receiver: RtpReceiver,
    buf: Vec<u8>,
    recv_timeout: Duration,
}

impl DataLoop {
    pub fn new(socket: UdpSocket, receiver: RtpReceiver, config: &SessionConfig) -> Self {
        Self {
            socket,
            receiver,
            buf: vec![0; config.max_datagram],
            recv_timeout: config.recv_timeout.max(Duration::from_millis(1)),
        }
    }

    /// Run until the session is stopped or the socket fails.
    pub fn run(&mut self) -> Result<()> {
        self.socket.set_read_timeout(Some(self.recv_timeout))?;
        let local = self.socket.local_addr()?;
        tracing::info!(%local, "RTP data loop started");

        let mut dropped = 0u64;
        while !self.receiver.session.is_stopped() {
            let (len, from) = match self.socket.recv_from(&mut self.buf) {
                Ok(received) => received,
                Err(e) if super::is_transient(&e) => continue,
                Err(e) => {
                    tracing::warn!(%local, error = %e, "RTP socket failed");
                    return Err(e.into());
                }
            };

            if let Err(e) = self.receiver.process(&self.buf[..len], Instant::now()) {
                dropped += 1;
                tracing::debug!(%from, error = %e, dropped, "dropped RTP datagram");
            }
        }

        tracing::info!(%local, dropped, "RTP data loop stopped");
        Ok(())
    }
}
