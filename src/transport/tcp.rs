use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ChannelKind, Received};
use crate::error::{Result, RtspError};

/// Frame marker introducing every interleaved block (RFC 2326 §10.12).
const FRAME_MARKER: u8 = b'$';

/// Reader for RTP/RTCP interleaved on the RTSP control connection.
///
/// Each unit is framed as:
///
/// ```text
/// '$' | channel id (1 byte) | length (2 bytes BE) | payload
/// ```
///
/// Anything that is not a frame where a frame is expected — RTSP replies to
/// keep-alive requests share this stream, as does garbage after a partial
/// read — is skipped by scanning forward to the next `$`. That resync is a
/// recoverable condition, logged and counted, never an error value.
pub struct InterleavedChannel {
    stream: TcpStream,
    rtp_channel: u8,
    rtcp_channel: u8,
    resyncs: u64,
}

impl InterleavedChannel {
    /// Take over a stream whose read timeout has already been installed.
    pub fn new(stream: TcpStream, rtp_channel: u8, rtcp_channel: u8) -> Self {
        Self {
            stream,
            rtp_channel,
            rtcp_channel,
            resyncs: 0,
        }
    }

    /// How many resynchronization scans have happened so far.
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }

    /// Shut down the stream so a blocked read returns, unblocking the reader
    /// task during cooperative stop.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    pub(super) fn sender(&self) -> Result<InterleavedSender> {
        Ok(InterleavedSender {
            stream: Arc::new(Mutex::new(self.stream.try_clone()?)),
            rtp_channel: self.rtp_channel,
            rtcp_channel: self.rtcp_channel,
        })
    }

    /// Read the next interleaved block, resynchronizing if the stream is not
    /// positioned at a frame marker.
    pub fn receive(&mut self) -> Result<Received> {
        let mut byte = [0u8; 1];
        let mut skipped = 0usize;

        loop {
            match self.stream.read(&mut byte) {
                Ok(0) => return Ok(Received::Closed),
                Ok(_) => {}
                Err(e) => return map_read_err(e),
            }
            if byte[0] == FRAME_MARKER {
                break;
            }
            skipped += 1;
        }
        if skipped > 0 {
            self.resyncs += 1;
            tracing::warn!(skipped, "resynchronized interleaved stream");
        }

        let mut header = [0u8; 3];
        if let Err(e) = self.stream.read_exact(&mut header) {
            return map_read_err(e);
        }
        let channel = header[0];
        let length = u16::from_be_bytes([header[1], header[2]]) as usize;

        let mut payload = vec![0u8; length];
        if let Err(e) = self.stream.read_exact(&mut payload) {
            return map_read_err(e);
        }

        let kind = if channel == self.rtp_channel {
            ChannelKind::Rtp
        } else if channel == self.rtcp_channel {
            ChannelKind::Rtcp
        } else {
            // A channel we did not set up; skip the block.
            tracing::trace!(channel, length, "ignoring unknown interleaved channel");
            return Ok(Received::Timeout);
        };

        tracing::trace!(?kind, length, "interleaved block");
        Ok(Received::Packet(kind, payload))
    }
}

fn map_read_err(e: std::io::Error) -> Result<Received> {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Ok(Received::Timeout),
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected => Ok(Received::Closed),
        _ => Err(RtspError::Io(e)),
    }
}

/// Cloneable writer for interleaved frames (receiver reports flow upstream
/// on the same connection). Writes are serialized through a mutex so a frame
/// is never torn by a concurrent keep-alive.
#[derive(Clone)]
pub struct InterleavedSender {
    stream: Arc<Mutex<TcpStream>>,
    rtp_channel: u8,
    rtcp_channel: u8,
}

impl InterleavedSender {
    pub fn send(&self, kind: ChannelKind, payload: &[u8]) -> Result<()> {
        let channel = match kind {
            ChannelKind::Rtp => self.rtp_channel,
            ChannelKind::Rtcp => self.rtcp_channel,
        };
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.push(FRAME_MARKER);
        frame.push(channel);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(payload);
        self.stream.lock().write_all(&frame)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener;
    use std::time::Duration;

    /// Loopback pair: the test writes raw bytes on one end, the channel
    /// reads framed blocks from the other.
    fn pair() -> (TcpStream, InterleavedChannel) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        (client, InterleavedChannel::new(server, 0, 1))
    }

    fn frame(channel: u8, payload: &[u8]) -> Vec<u8> {
        let mut f = vec![b'$', channel];
        f.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        f.extend_from_slice(payload);
        f
    }

    #[test]
    fn reads_rtp_and_rtcp_blocks() {
        let (mut tx, mut ch) = pair();
        tx.write_all(&frame(0, b"rtp-bytes")).unwrap();
        tx.write_all(&frame(1, b"rtcp")).unwrap();

        match ch.receive().unwrap() {
            Received::Packet(ChannelKind::Rtp, p) => assert_eq!(p, b"rtp-bytes"),
            other => panic!("unexpected: {other:?}"),
        }
        match ch.receive().unwrap() {
            Received::Packet(ChannelKind::Rtcp, p) => assert_eq!(p, b"rtcp"),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(ch.resync_count(), 0);
    }

    #[test]
    fn resyncs_past_rtsp_reply_text() {
        let (mut tx, mut ch) = pair();
        // A keep-alive reply precedes the next frame on the shared stream.
        tx.write_all(b"RTSP/1.0 200 OK\r\nCSeq: 9\r\n\r\n").unwrap();
        tx.write_all(&frame(0, b"after-reply")).unwrap();

        match ch.receive().unwrap() {
            Received::Packet(ChannelKind::Rtp, p) => assert_eq!(p, b"after-reply"),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(ch.resync_count(), 1);
    }

    #[test]
    fn unknown_channel_is_skipped() {
        let (mut tx, mut ch) = pair();
        tx.write_all(&frame(6, b"other-track")).unwrap();
        tx.write_all(&frame(0, b"ours")).unwrap();

        assert!(matches!(ch.receive().unwrap(), Received::Timeout));
        match ch.receive().unwrap() {
            Received::Packet(ChannelKind::Rtp, p) => assert_eq!(p, b"ours"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn timeout_when_no_data() {
        let (_tx, mut ch) = pair();
        assert!(matches!(ch.receive().unwrap(), Received::Timeout));
    }

    #[test]
    fn closed_when_peer_disconnects() {
        let (tx, mut ch) = pair();
        drop(tx);
        assert!(matches!(ch.receive().unwrap(), Received::Closed));
    }

    #[test]
    fn sender_frames_payload() {
        let (mut tx, ch) = pair();
        let sender = ch.sender().unwrap();
        sender.send(ChannelKind::Rtcp, &[0x80, 0xc9, 0x00, 0x01]).unwrap();

        let mut buf = [0u8; 8];
        tx.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        tx.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, &[b'$', 1, 0, 4, 0x80, 0xc9, 0x00, 0x01]);
    }
}
