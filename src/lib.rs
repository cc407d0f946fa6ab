pub mod client;
pub mod error;
pub mod media;
pub mod mp4;
pub mod protocol;
pub mod rtcp;
pub mod session;
pub mod transport;

pub use client::{Client, ClientConfig, SegmentSink, StopHandle};
pub use error::{Result, RtspError};
pub use protocol::{Credential, TrackInfo};
pub use session::{RtspSession, SessionState, TransportPreference};
