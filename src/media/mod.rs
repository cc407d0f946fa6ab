//! Media-plane processing: RTP packet parsing and sequence tracking,
//! H.264 payload depacketization into access units, and frame timing.

pub mod frame;
pub mod h264;
pub mod rtp;

pub use frame::{Frame, FrameBuilder};
pub use h264::{AccessUnit, Depacketizer};
pub use rtp::{RtpPacket, SequenceStatus, SequenceTracker};
