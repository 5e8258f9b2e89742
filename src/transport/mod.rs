//! The two per-source receive loops.
//!
//! An RTP session uses a split transport model:
//!
//! - **Data** ([`data`]): RTP media on an even port. The loop decodes,
//!   validates against the session and hands payload to the media sink.
//!
//! - **Control** ([`control`]): RTCP on the next port up. The loop folds
//!   sender reports and peer metadata into the session and sends receiver
//!   reports back on a timer.
//!
//! Each loop owns its socket and runs on its own thread. They share
//! nothing but the [`Session`](crate::session::Session) handle. Both block
//! in `recv_from` with a read timeout so the stop flag is seen promptly.

pub mod control;
pub mod data;

pub use control::{ControlLoop, ControlState, Controller, Inbound};
pub use data::{DataLoop, RtpReceiver};

use std::io;

/// Receive errors that mean "try again" rather than "socket is gone".
///
/// Timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows.
/// ICMP port-unreachable from an earlier send can surface as a reset or
/// refusal on the next receive.
pub(crate) fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_transient() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::NotConnected)));
    }
}
