use std::net::SocketAddr;
use std::time::Duration;

use rand::RngExt;

/// Loop tuning shared by every session a coordinator starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Socket read timeout. Bounds how long a stop request takes to be seen.
    pub recv_timeout: Duration,
    /// Base RTCP report interval before scaling and randomisation
    /// (RFC 3550 §6.2 recommends 5 s).
    pub rtcp_interval: Duration,
    /// Include SDES with every Nth receiver report.
    pub sdes_every: u32,
    /// Receive buffer size; larger datagrams are truncated by the OS.
    pub max_datagram: usize,
    /// Reason text for the final BYE.
    pub bye_reason: Option<String>,
    /// Also answer every received SR with an immediate RR.
    pub report_on_sender_report: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_millis(100),
            rtcp_interval: Duration::from_secs(5),
            sdes_every: 3,
            max_datagram: 65_536,
            bye_reason: Some("session closed".to_string()),
            report_on_sender_report: false,
        }
    }
}

/// Parameters negotiated by RTSP/SDP for one media source.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Payload types announced in SDP. Packets with any other type are dropped.
    pub payload_types: Vec<u8>,
    /// RTP clock rate in Hz, used to convert arrival times for jitter.
    pub clock_rate: u32,
    /// SSRC the camera will send from; `None` accepts the first one seen.
    pub remote_ssrc: Option<u32>,
    /// SSRC for our reports.
    pub local_ssrc: u32,
    /// CNAME sent in our SDES.
    pub cname: String,
    /// Local address for the RTP socket.
    pub rtp_bind: SocketAddr,
    /// Local address for the RTCP socket.
    pub rtcp_bind: SocketAddr,
    /// Where to send reports; `None` learns it from the first inbound RTCP.
    pub peer_rtcp: Option<SocketAddr>,
}

impl SessionParams {
    /// Parameters with a random local SSRC (RFC 3550 §8.1) and the given
    /// bind addresses; everything else accepts what arrives.
    pub fn new(rtp_bind: SocketAddr, rtcp_bind: SocketAddr, clock_rate: u32) -> Self {
        Self {
            payload_types: Vec::new(),
            clock_rate,
            remote_ssrc: None,
            local_ssrc: rand::rng().random::<u32>(),
            cname: default_cname(),
            rtp_bind,
            rtcp_bind,
            peer_rtcp: None,
        }
    }

    pub fn with_payload_type(mut self, pt: u8) -> Self {
        self.payload_types.push(pt);
        self
    }

    pub fn with_remote_ssrc(mut self, ssrc: u32) -> Self {
        self.remote_ssrc = Some(ssrc);
        self
    }

    pub fn with_local_ssrc(mut self, ssrc: u32) -> Self {
        self.local_ssrc = ssrc;
        self
    }

    pub fn with_cname(mut self, cname: &str) -> Self {
        self.cname = cname.to_string();
        self
    }

    pub fn with_peer_rtcp(mut self, addr: SocketAddr) -> Self {
        self.peer_rtcp = Some(addr);
        self
    }
}

/// `user@host`-style CNAME from the environment, falling back to a fixed name.
fn default_cname() -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "rtp".to_string());
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{user}@{host}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_params() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let params = SessionParams::new(addr, addr, 90_000)
            .with_payload_type(96)
            .with_payload_type(97)
            .with_remote_ssrc(7)
            .with_local_ssrc(8)
            .with_cname("viewer");
        assert_eq!(params.payload_types, vec![96, 97]);
        assert_eq!(params.remote_ssrc, Some(7));
        assert_eq!(params.local_ssrc, 8);
        assert_eq!(params.cname, "viewer");
        assert!(params.peer_rtcp.is_none());
    }

    #[test]
    fn random_local_ssrc_differs() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = SessionParams::new(addr, addr, 8000);
        let b = SessionParams::new(addr, addr, 8000);
        assert_ne!(a.local_ssrc, b.local_ssrc);
    }
}
