use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use super::{ChannelKind, Received};
use crate::error::{Result, RtspError};

/// Largest datagram this client accepts. RTP over UDP stays within the path
/// MTU in practice; 4 KiB leaves headroom for jumbo-frame senders.
const MAX_DATAGRAM: usize = 4096;

/// How long the control socket is polled after the data socket times out.
const RTCP_POLL: Duration = Duration::from_millis(1);

/// Dual-socket UDP delivery: RTP on the even client port, RTCP on the odd
/// one (RFC 3550 §11). No inherent reliability or ordering — loss,
/// duplication, and reordering are the upper layers' problem.
pub struct UdpChannelPair {
    rtp: Arc<UdpSocket>,
    rtcp: Arc<UdpSocket>,
}

impl UdpChannelPair {
    /// Bind the client port pair and connect each socket to its server
    /// counterpart so stray traffic from other hosts is filtered out.
    pub fn bind(
        server_ip: IpAddr,
        client_ports: (u16, u16),
        server_ports: (u16, u16),
        read_timeout: Duration,
    ) -> Result<Self> {
        let rtp = UdpSocket::bind(("0.0.0.0", client_ports.0))?;
        let rtcp = UdpSocket::bind(("0.0.0.0", client_ports.1))?;
        rtp.set_read_timeout(Some(read_timeout))?;
        rtcp.set_read_timeout(Some(RTCP_POLL))?;
        if server_ports.0 != 0 {
            rtp.connect(SocketAddr::new(server_ip, server_ports.0))?;
        }
        if server_ports.1 != 0 {
            rtcp.connect(SocketAddr::new(server_ip, server_ports.1))?;
        }
        tracing::debug!(
            rtp_port = client_ports.0,
            rtcp_port = client_ports.1,
            "UDP channel pair bound"
        );
        Ok(Self {
            rtp: Arc::new(rtp),
            rtcp: Arc::new(rtcp),
        })
    }

    pub(super) fn sender(&self) -> UdpSender {
        UdpSender {
            rtp: self.rtp.clone(),
            rtcp: self.rtcp.clone(),
        }
    }

    /// Bounded receive. The data socket is polled with the configured
    /// timeout, then the control socket with a short poll — one OS thread
    /// owns both sockets, and RTCP traffic is sparse compared to media.
    pub fn receive(&mut self) -> Result<Received> {
        let mut buf = [0u8; MAX_DATAGRAM];

        match self.rtp.recv(&mut buf) {
            Ok(n) => {
                tracing::trace!(bytes = n, "RTP datagram");
                return Ok(Received::Packet(ChannelKind::Rtp, buf[..n].to_vec()));
            }
            Err(e) if is_timeout(&e) => {}
            Err(e) => return Err(RtspError::Io(e)),
        }

        match self.rtcp.recv(&mut buf) {
            Ok(n) => {
                tracing::trace!(bytes = n, "RTCP datagram");
                Ok(Received::Packet(ChannelKind::Rtcp, buf[..n].to_vec()))
            }
            Err(e) if is_timeout(&e) => Ok(Received::Timeout),
            Err(e) => Err(RtspError::Io(e)),
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Cloneable sending half of the UDP pair.
#[derive(Clone)]
pub struct UdpSender {
    rtp: Arc<UdpSocket>,
    rtcp: Arc<UdpSocket>,
}

impl UdpSender {
    pub fn send(&self, kind: ChannelKind, payload: &[u8]) -> Result<()> {
        let socket = match kind {
            ChannelKind::Rtp => &self.rtp,
            ChannelKind::Rtcp => &self.rtcp,
        };
        socket.send(payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bind a pair on ephemeral ports against a fake "server" socket pair.
    fn setup() -> (UdpSocket, UdpSocket, UdpChannelPair) {
        let server_rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_rtcp = UdpSocket::bind("127.0.0.1:0").unwrap();
        let pair = UdpChannelPair::bind(
            "127.0.0.1".parse().unwrap(),
            (0, 0), // ephemeral for the test; real SETUP uses even/odd
            (
                server_rtp.local_addr().unwrap().port(),
                server_rtcp.local_addr().unwrap().port(),
            ),
            Duration::from_millis(100),
        )
        .unwrap();
        // Teach the fake server where the client sockets ended up.
        let client_rtp = pair.rtp.local_addr().unwrap();
        let client_rtcp = pair.rtcp.local_addr().unwrap();
        server_rtp.connect(client_rtp).unwrap();
        server_rtcp.connect(client_rtcp).unwrap();
        (server_rtp, server_rtcp, pair)
    }

    #[test]
    fn receives_rtp_datagram() {
        let (server_rtp, _server_rtcp, mut pair) = setup();
        server_rtp.send(b"media").unwrap();
        match pair.receive().unwrap() {
            Received::Packet(ChannelKind::Rtp, p) => assert_eq!(p, b"media"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn receives_rtcp_on_control_socket() {
        let (_server_rtp, server_rtcp, mut pair) = setup();
        server_rtcp.send(b"report").unwrap();
        match pair.receive().unwrap() {
            Received::Packet(ChannelKind::Rtcp, p) => assert_eq!(p, b"report"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn timeout_when_idle() {
        let (_s1, _s2, mut pair) = setup();
        assert!(matches!(pair.receive().unwrap(), Received::Timeout));
    }

    #[test]
    fn sender_targets_correct_socket() {
        let (server_rtp, server_rtcp, pair) = setup();
        let sender = pair.sender();
        sender.send(ChannelKind::Rtp, b"to-rtp").unwrap();
        sender.send(ChannelKind::Rtcp, b"to-rtcp").unwrap();

        let mut buf = [0u8; 64];
        server_rtp
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let n = server_rtp.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"to-rtp");
        server_rtcp
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let n = server_rtcp.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"to-rtcp");
    }
}
