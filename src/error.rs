//! Error types for the RTP/RTCP session engine.

use std::fmt;

/// Errors that can occur while receiving or reporting on an RTP session.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Codec**: [`Malformed`](Self::Malformed), [`TrailingData`](Self::TrailingData)
///   are structurally invalid datagrams. Loops drop the datagram and continue.
/// - **Validation**: [`UnexpectedSource`](Self::UnexpectedSource),
///   [`UnexpectedPayloadType`](Self::UnexpectedPayloadType). Dropped locally.
/// - **Reporting**: [`EncodeFailure`](Self::EncodeFailure). The report cycle is skipped.
/// - **Transport**: [`Io`](Self::Io). The only error that ends a loop.
/// - **Coordinator**: [`AlreadyRunning`](Self::AlreadyRunning),
///   [`SessionNotFound`](Self::SessionNotFound).
#[derive(Debug, thiserror::Error)]
pub enum RtpError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Datagram is not a structurally valid RTP or RTCP packet.
    #[error("malformed packet: {kind}")]
    Malformed { kind: MalformedKind },

    /// Bytes left over after the last complete RTCP packet of a compound.
    #[error("{remaining} trailing bytes after last RTCP packet")]
    TrailingData { remaining: usize },

    /// RTP packet from an SSRC other than the session's source.
    #[error("unexpected SSRC {ssrc:#010X}")]
    UnexpectedSource { ssrc: u32 },

    /// RTP payload type outside the negotiated set.
    #[error("payload type {payload_type} was not negotiated")]
    UnexpectedPayloadType { payload_type: u8 },

    /// A report could not be built from the current session state, or a
    /// field does not fit its wire width.
    #[error("cannot encode report: {0}")]
    EncodeFailure(&'static str),

    /// [`Coordinator::start`](crate::Coordinator::start) was called for a
    /// session that is already running.
    #[error("session already running")]
    AlreadyRunning,

    /// No running session with the given ID.
    #[error("session not found: {0}")]
    SessionNotFound(u64),
}

impl RtpError {
    pub(crate) fn malformed(kind: MalformedKind) -> Self {
        Self::Malformed { kind }
    }

    /// Whether the error is fatal to the loop that hit it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Specific kind of structural fault in a received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedKind {
    /// Datagram carried no bytes.
    Empty,
    /// A fixed-size field would read past the end of the buffer.
    Truncated,
    /// Version bits are not 2.
    BadVersion(u8),
    /// An RTCP length field points past the end of the datagram.
    LengthExceedsBuffer { declared: usize, available: usize },
    /// Padding count is zero or larger than the space it pads.
    BadPadding(u8),
    /// The report-block count does not fit the packet body.
    ReportBlocksOverrun { count: u8 },
    /// An SDES item's length would read past the packet body.
    SdesItemOverrun,
    /// An SDES chunk ran to the end of the body without an END item.
    SdesUnterminated,
    /// SDES chunk count does not match the chunks present.
    SdesChunkCount { count: u8 },
    /// The BYE source list does not fit the packet body.
    ByeSourcesOverrun { count: u8 },
    /// The BYE reason length would read past the packet body.
    ByeReasonOverrun,
    /// APP packet body is shorter than SSRC and name.
    AppTooShort,
}

impl fmt::Display for MalformedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty datagram"),
            Self::Truncated => write!(f, "truncated"),
            Self::BadVersion(v) => write!(f, "bad version {v}"),
            Self::LengthExceedsBuffer {
                declared,
                available,
            } => write!(f, "declared length {declared} exceeds {available} available bytes"),
            Self::BadPadding(count) => write!(f, "bad padding count {count}"),
            Self::ReportBlocksOverrun { count } => {
                write!(f, "{count} report blocks overrun packet body")
            }
            Self::SdesItemOverrun => write!(f, "SDES item overruns chunk"),
            Self::SdesUnterminated => write!(f, "SDES chunk missing END item"),
            Self::SdesChunkCount { count } => write!(f, "expected {count} SDES chunks"),
            Self::ByeSourcesOverrun { count } => {
                write!(f, "{count} BYE sources overrun packet body")
            }
            Self::ByeReasonOverrun => write!(f, "BYE reason overruns packet body"),
            Self::AppTooShort => write!(f, "APP packet too short"),
        }
    }
}

/// Convenience alias for `Result<T, RtpError>`.
pub type Result<T> = std::result::Result<T, RtpError>;
