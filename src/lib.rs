//! Receiver-side RTP/RTCP session engine.
//!
//! Once RTSP/SDP negotiation has settled on ports, payload types and
//! clock rate for a media source, a [`Coordinator`] binds the RTP and
//! RTCP sockets and runs two loops per source: one feeding validated
//! payload to a [`MediaSink`], the other tracking sender reports and
//! answering with receiver reports (RFC 3550).

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod media;
pub mod session;
pub mod transport;

pub use config::{SessionConfig, SessionParams};
pub use coordinator::{Coordinator, LoopKind, SessionEvent, SessionHandle};
pub use error::{MalformedKind, Result, RtpError};
pub use media::{MediaPacket, MediaSink};
pub use session::{ReceptionStatistics, Session, SessionState};
