//! RTSP wire protocol: request building, response parsing, Digest
//! authentication, and the minimal SDP subset needed to configure a track.

pub mod auth;
pub mod request;
pub mod response;
pub mod sdp;

pub use auth::{Credential, DigestAuth};
pub use request::{Method, RtspRequest};
pub use response::RtspResponse;
pub use sdp::TrackInfo;

/// Client identification string sent in every request (RFC 2326 §12.41).
pub const USER_AGENT: &str = "rtsp-mux/0.1";
