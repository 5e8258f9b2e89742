//! Integration test: one whole session over loopback UDP.
//!
//! A fake camera sends RTP and an SR to the session's sockets, then reads
//! the receiver's RTCP (RR + SDES, then BYE on stop) from its own socket.

use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use rtp_session::codec::rtcp::{
    Bye, NtpTimestamp, RtcpPacket, SdesChunk, SdesItem, SenderInfo, SenderReport, SourceDescription,
    decode_compound, encode_compound,
};
use rtp_session::codec::rtp::RtpHeader;
use rtp_session::{
    Coordinator, MediaPacket, SessionConfig, SessionEvent, SessionHandle, SessionParams,
};

const CAMERA_SSRC: u32 = 0xCA3E_7A01;
const LOCAL_SSRC: u32 = 0x0000_BEEF;
const SR_NTP: NtpTimestamp = NtpTimestamp(0x0000_1234_5678_0000);

struct Camera {
    rtp: UdpSocket,
    rtcp: UdpSocket,
}

impl Camera {
    fn new() -> Self {
        let rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
        let rtcp = UdpSocket::bind("127.0.0.1:0").unwrap();
        rtcp.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        Self { rtp, rtcp }
    }

    fn send_rtp(&self, to: SocketAddr, seq: u16, marker: bool) {
        let mut header = RtpHeader::new(96, seq, u32::from(seq) * 3000, CAMERA_SSRC);
        header.marker = marker;
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        buf.extend_from_slice(&[seq as u8; 100]);
        self.rtp.send_to(&buf, to).unwrap();
    }

    fn send_sender_report(&self, to: SocketAddr) {
        let compound = encode_compound(&[
            RtcpPacket::SenderReport(SenderReport {
                ssrc: CAMERA_SSRC,
                sender_info: SenderInfo {
                    ntp_timestamp: SR_NTP,
                    rtp_timestamp: 42_000,
                    packet_count: 5,
                    octet_count: 500,
                },
                reports: vec![],
            }),
            RtcpPacket::SourceDescription(SourceDescription {
                chunks: vec![SdesChunk {
                    ssrc: CAMERA_SSRC,
                    items: vec![SdesItem::cname("cam1")],
                }],
            }),
        ])
        .unwrap();
        self.rtcp.send_to(&compound, to).unwrap();
    }

    /// Read RTCP until a compound matches, or panic after the deadline.
    fn expect_rtcp(&self, what: &str, matches: impl Fn(&[RtcpPacket]) -> bool) -> Vec<RtcpPacket> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut buf = [0u8; 1500];
        while Instant::now() < deadline {
            let Ok((len, _)) = self.rtcp.recv_from(&mut buf) else {
                continue;
            };
            let packets = decode_compound(&buf[..len]).expect("receiver sent malformed RTCP");
            if matches(&packets) {
                return packets;
            }
        }
        panic!("no {what} from receiver");
    }
}

fn start(config: SessionConfig) -> (Coordinator, SessionHandle, mpsc::Receiver<MediaPacket>) {
    let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let params = SessionParams::new(any, any, 90_000)
        .with_payload_type(96)
        .with_remote_ssrc(CAMERA_SSRC)
        .with_local_ssrc(LOCAL_SSRC)
        .with_cname("viewer@test");
    let (tx, rx) = mpsc::channel();
    let mut coordinator = Coordinator::with_config(config);
    let handle = coordinator.start(params, Box::new(tx)).expect("session start");
    (coordinator, handle, rx)
}

fn has_rr_block(packets: &[RtcpPacket]) -> bool {
    matches!(packets.first(), Some(RtcpPacket::ReceiverReport(rr)) if rr.reports.len() == 1)
}

#[test]
fn full_session_rtp_in_reports_out_bye_on_stop() {
    let (mut coordinator, handle, media) = start(SessionConfig {
        recv_timeout: Duration::from_millis(10),
        rtcp_interval: Duration::from_millis(100),
        ..Default::default()
    });
    let camera = Camera::new();

    // Garbage on both ports must not take the loops down.
    camera.rtp.send_to(&[0x00, 0x01, 0x02], handle.rtp_addr()).unwrap();
    camera.rtcp.send_to(&[0x80, 0xC9, 0x00], handle.rtcp_addr()).unwrap();

    for (seq, marker) in [(10, false), (11, false), (13, false), (12, false), (14, true)] {
        camera.send_rtp(handle.rtp_addr(), seq, marker);
    }
    let delivered: Vec<MediaPacket> = (0..5)
        .map(|_| media.recv_timeout(Duration::from_secs(3)).expect("payload delivered"))
        .collect();
    let first_bytes: Vec<u8> = delivered.iter().map(|p| p.payload[0]).collect();
    assert_eq!(first_bytes, vec![10, 11, 13, 12, 14]);
    assert!(delivered[4].marker);

    camera.send_sender_report(handle.rtcp_addr());

    let report = camera.expect_rtcp("receiver report", has_rr_block);
    let RtcpPacket::ReceiverReport(rr) = &report[0] else {
        unreachable!()
    };
    assert_eq!(rr.ssrc, LOCAL_SSRC);
    let block = &rr.reports[0];
    assert_eq!(block.ssrc, CAMERA_SSRC);
    assert_eq!(block.extended_highest_seq, 14);
    assert_eq!(block.cumulative_lost, 0);
    assert_eq!(block.last_sr, SR_NTP.middle_32());

    let stats = handle.statistics();
    assert_eq!(stats.packets_received, 5);
    assert_eq!(stats.octets_received, 500);
    assert_eq!(stats.sender_reports, 1);
    assert_eq!(handle.session().lock().peer().cname().as_deref(), Some("cam1"));

    coordinator.stop(handle.id()).unwrap();

    let goodbye = camera.expect_rtcp("BYE", |packets| {
        packets.iter().any(|p| matches!(p, RtcpPacket::Bye(_)))
    });
    assert!(matches!(goodbye[0], RtcpPacket::ReceiverReport(_)));
    assert_eq!(
        goodbye.last(),
        Some(&RtcpPacket::Bye(Bye::new(vec![LOCAL_SSRC], Some("session closed"))))
    );

    let mut stopped = 0;
    while let Some(event) = coordinator.try_event() {
        match event {
            SessionEvent::Stopped { session, .. } => {
                assert_eq!(session, handle.id());
                stopped += 1;
            }
            SessionEvent::Fatal { error, .. } => panic!("loop failed: {error}"),
        }
    }
    assert_eq!(stopped, 2);
}

#[test]
fn requested_report_is_sent_without_waiting_for_interval() {
    let (mut coordinator, handle, media) = start(SessionConfig {
        recv_timeout: Duration::from_millis(10),
        rtcp_interval: Duration::from_secs(600),
        ..Default::default()
    });
    let camera = Camera::new();

    camera.send_rtp(handle.rtp_addr(), 1, true);
    media.recv_timeout(Duration::from_secs(3)).expect("payload delivered");
    camera.send_sender_report(handle.rtcp_addr());

    // The report only goes out once the SR has been applied.
    let deadline = Instant::now() + Duration::from_secs(3);
    while !handle.session().lock().has_sender_report() {
        assert!(Instant::now() < deadline, "sender report never applied");
        std::thread::sleep(Duration::from_millis(5));
    }
    handle.request_report();

    let report = camera.expect_rtcp("receiver report", has_rr_block);
    let RtcpPacket::ReceiverReport(rr) = &report[0] else {
        unreachable!()
    };
    assert_eq!(rr.reports[0].extended_highest_seq, 1);

    coordinator.stop(handle.id()).unwrap();
}

#[test]
fn packets_from_other_sources_are_not_delivered() {
    let (mut coordinator, handle, media) = start(SessionConfig {
        recv_timeout: Duration::from_millis(10),
        ..Default::default()
    });
    let intruder = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut buf = Vec::new();
    RtpHeader::new(96, 1, 0, 0x1234_5678).write(&mut buf).unwrap();
    buf.extend_from_slice(b"cross-talk");
    intruder.send_to(&buf, handle.rtp_addr()).unwrap();

    let camera = Camera::new();
    camera.send_rtp(handle.rtp_addr(), 7, false);

    let packet = media.recv_timeout(Duration::from_secs(3)).expect("payload delivered");
    assert_eq!(packet.payload[0], 7);
    assert!(media.try_recv().is_err());
    assert_eq!(handle.statistics().packets_received, 1);

    coordinator.stop(handle.id()).unwrap();
}
