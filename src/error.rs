//! Error types for the RTSP client library.

use std::fmt;

/// Errors that can occur in the RTSP client library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Authentication**: [`Auth`](Self::Auth) — unusable Digest parameters;
///   [`AuthFailed`](Self::AuthFailed) — server rejected valid credentials.
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP messages;
///   [`ProtocolState`](Self::ProtocolState) — method illegal in the current
///   session state; [`ProtocolSync`](Self::ProtocolSync) — CSeq mismatch;
///   [`ProtocolTimeout`](Self::ProtocolTimeout) — no response within bound.
/// - **Transport**: [`Io`](Self::Io) — socket failures;
///   [`Closed`](Self::Closed) — the peer closed the connection.
/// - **Media**: [`Decode`](Self::Decode) — malformed RTP/RTCP unit (the unit
///   is dropped, the loop continues).
/// - **Muxer**: [`CorruptFrame`](Self::CorruptFrame),
///   [`EmptySegment`](Self::EmptySegment) — the offending segment is
///   discarded, never written to the sink.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A Digest parameter required to compute a response is missing or empty.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The server answered a credentialed retry with a second 401.
    #[error("authentication rejected by server")]
    AuthFailed,

    /// The requested RTSP method is not a legal transition from the current
    /// session state (RFC 2326 §A.1). Nothing was sent.
    #[error("method {method} illegal in state {state}")]
    ProtocolState {
        method: &'static str,
        state: &'static str,
    },

    /// The response CSeq did not match the request CSeq (RFC 2326 §12.17).
    /// The session is forced to TornDown.
    #[error("CSeq mismatch: sent {sent}, received {received}")]
    ProtocolSync { sent: u32, received: u32 },

    /// No response arrived within the configured round-trip bound.
    #[error("RTSP request timed out")]
    ProtocolTimeout,

    /// The peer closed the control connection or data socket.
    #[error("connection closed by peer")]
    Closed,

    /// The server answered with a non-success status the client cannot
    /// recover from (e.g. 454 Session Not Found).
    #[error("server returned {code} {reason}")]
    Status { code: u16, reason: String },

    /// Failed to parse an RTSP response message (RFC 2326 §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A malformed RTP or RTCP unit was dropped.
    #[error("decode error: {kind}")]
    Decode { kind: DecodeErrorKind },

    /// A frame reaching the muxer contained a NAL unit that cannot be
    /// length-prefixed (empty payload from a broken reassembly upstream).
    #[error("corrupt frame, media segment discarded")]
    CorruptFrame,

    /// Attempted to finalize a media segment containing zero frames.
    #[error("media segment has no frames")]
    EmptySegment,
}

/// Specific kind of RTSP response parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no status line).
    EmptyResponse,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Specific kind of binary decode failure (RTP/RTCP/payload).
#[derive(Debug)]
pub enum DecodeErrorKind {
    /// Packet shorter than the fixed minimum for its type.
    Truncated,
    /// RTP/RTCP version field was not 2.
    BadVersion,
    /// The payload-header type code is not one this client handles.
    UnsupportedPayload,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated packet"),
            Self::BadVersion => write!(f, "unsupported version"),
            Self::UnsupportedPayload => write!(f, "unsupported payload type"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
