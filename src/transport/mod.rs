//! Delivery of RTP/RTCP data, either interleaved on the control connection
//! or over a dual-socket UDP pair. Selected once at SETUP time.

pub mod tcp;
pub mod udp;

use crate::error::Result;
pub use tcp::{InterleavedChannel, InterleavedSender};
pub use udp::{UdpChannelPair, UdpSender};

/// Which of the two logical channels a unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Rtp,
    Rtcp,
}

/// Outcome of one bounded receive attempt.
#[derive(Debug)]
pub enum Received {
    Packet(ChannelKind, Vec<u8>),
    /// Nothing arrived within the read bound; the caller decides whether to
    /// poll again or give up.
    Timeout,
    /// The peer closed the underlying connection.
    Closed,
}

/// Reading half of the negotiated transport. Owned by the single task that
/// drains the network.
pub enum TransportChannel {
    Interleaved(InterleavedChannel),
    Udp(UdpChannelPair),
}

impl TransportChannel {
    /// Timeout-bounded receive of the next RTP/RTCP unit.
    pub fn receive(&mut self) -> Result<Received> {
        match self {
            Self::Interleaved(ch) => ch.receive(),
            Self::Udp(ch) => ch.receive(),
        }
    }

    /// A cloneable sending half, usable from another task while this half
    /// keeps draining.
    pub fn sender(&self) -> Result<TransportSender> {
        Ok(match self {
            Self::Interleaved(ch) => TransportSender::Interleaved(ch.sender()?),
            Self::Udp(ch) => TransportSender::Udp(ch.sender()),
        })
    }
}

/// Sending half of the transport.
#[derive(Clone)]
pub enum TransportSender {
    Interleaved(InterleavedSender),
    Udp(UdpSender),
}

impl TransportSender {
    pub fn send(&self, kind: ChannelKind, payload: &[u8]) -> Result<()> {
        match self {
            Self::Interleaved(s) => s.send(kind, payload),
            Self::Udp(s) => s.send(kind, payload),
        }
    }
}
