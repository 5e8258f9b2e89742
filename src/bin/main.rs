use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use rtp_session::{Coordinator, MediaSink, SessionConfig, SessionEvent, SessionParams};

#[derive(Parser)]
#[command(name = "rtp-recv", about = "Receive one RTP stream and report on it over RTCP")]
struct Args {
    /// Local RTP address (host:port)
    #[arg(long, default_value = "0.0.0.0:5004")]
    rtp_bind: SocketAddr,

    /// Local RTCP address (host:port)
    #[arg(long, default_value = "0.0.0.0:5005")]
    rtcp_bind: SocketAddr,

    /// Sender's RTCP address; learned from its first report when omitted
    #[arg(long)]
    peer_rtcp: Option<SocketAddr>,

    /// Expected sender SSRC in hex; the first one seen when omitted
    #[arg(long, value_parser = parse_ssrc)]
    ssrc: Option<u32>,

    /// Accepted payload type (repeatable); any when omitted
    #[arg(long = "payload-type")]
    payload_types: Vec<u8>,

    /// RTP clock rate in Hz
    #[arg(long, default_value_t = 90_000)]
    clock_rate: u32,

    /// CNAME for our source descriptions
    #[arg(long)]
    cname: Option<String>,

    /// Base RTCP report interval in seconds
    #[arg(long, default_value_t = 5.0)]
    interval_secs: f64,
}

fn parse_ssrc(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid SSRC {s:?}: {e}"))
}

/// Logs frame boundaries instead of decoding.
struct FrameLog {
    packets: u64,
    bytes: usize,
}

impl MediaSink for FrameLog {
    fn deliver(&mut self, timestamp: u32, marker: bool, payload: &[u8]) {
        self.packets += 1;
        self.bytes += payload.len();
        if marker {
            tracing::debug!(timestamp, packets = self.packets, bytes = self.bytes, "frame");
            self.packets = 0;
            self.bytes = 0;
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let interval = match Duration::try_from_secs_f64(args.interval_secs) {
        Ok(interval) => interval,
        Err(e) => {
            eprintln!("Invalid --interval-secs: {}", e);
            return;
        }
    };
    let config = SessionConfig {
        rtcp_interval: interval,
        ..Default::default()
    };

    let mut params = SessionParams::new(args.rtp_bind, args.rtcp_bind, args.clock_rate);
    params.payload_types = args.payload_types;
    params.remote_ssrc = args.ssrc;
    params.peer_rtcp = args.peer_rtcp;
    if let Some(cname) = &args.cname {
        params = params.with_cname(cname);
    }

    let mut coordinator = Coordinator::with_config(config);
    let handle = match coordinator.start(params, Box::new(FrameLog { packets: 0, bytes: 0 })) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to start session: {}", e);
            return;
        }
    };

    println!(
        "Receiving RTP on {} and RTCP on {}; press Enter to stop",
        handle.rtp_addr(),
        handle.rtcp_addr()
    );
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        eprintln!("Failed to read stdin: {}", e);
    }

    let stats = handle.statistics();
    let source = handle.session().lock().peer().cname();
    println!(
        "source {}: {} packets, {} bytes, {} lost, highest seq {}, jitter {}, {} sender reports",
        source.as_deref().unwrap_or("(unknown)"),
        stats.packets_received,
        stats.octets_received,
        stats.cumulative_lost,
        stats.extended_highest_seq,
        stats.jitter,
        stats.sender_reports
    );

    if let Err(e) = coordinator.stop(handle.id()) {
        eprintln!("Failed to stop session: {}", e);
    }
    while let Some(event) = coordinator.try_event() {
        if let SessionEvent::Fatal { kind, error, .. } = event {
            eprintln!("{:?} loop failed: {}", kind, error);
        }
    }
}
