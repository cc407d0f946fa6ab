//! The pull pipeline: handshake, a reader thread draining the transport
//! into a bounded queue, and a consumer turning packets into fragmented-MP4
//! segments.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write as _};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, RtspError};
use crate::media::frame::FrameBuilder;
use crate::media::h264::Depacketizer;
use crate::media::rtp::{RtpPacket, SequenceStatus, SequenceTracker};
use crate::mp4::Mp4Muxer;
use crate::protocol::Credential;
use crate::rtcp::RtcpExchange;
use crate::session::{RtspSession, TransportMode, TransportPreference};
use crate::transport::{
    ChannelKind, InterleavedChannel, Received, TransportChannel, UdpChannelPair,
};

/// Where finished segments go. Each call receives one complete segment:
/// first the init segment, then media segments in production order.
pub trait SegmentSink {
    fn write_segment(&mut self, data: &[u8]) -> Result<()>;
}

impl SegmentSink for Vec<u8> {
    fn write_segment(&mut self, data: &[u8]) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

impl SegmentSink for File {
    fn write_segment(&mut self, data: &[u8]) -> Result<()> {
        self.write_all(data)?;
        Ok(())
    }
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: TransportPreference,
    /// Bound on every blocking socket read.
    pub read_timeout: Duration,
    /// Packets buffered between the reader thread and the consumer; the
    /// oldest packet is dropped when the queue is full.
    pub queue_capacity: usize,
    /// Spacing of outgoing RTCP receiver reports.
    pub report_interval: Duration,
    /// Frames batched into one media segment.
    pub frames_per_segment: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportPreference::TcpInterleaved,
            read_timeout: Duration::from_secs(5),
            queue_capacity: 512,
            report_interval: crate::rtcp::DEFAULT_REPORT_INTERVAL,
            frames_per_segment: 8,
        }
    }
}

/// Bounded drop-oldest packet queue between the reader and the consumer.
///
/// Live ingest prefers losing the oldest packet to stalling the socket:
/// the depacketizer already treats the resulting discontinuity as loss.
struct PacketQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity: usize,
}

struct QueueInner {
    items: VecDeque<(ChannelKind, Vec<u8>)>,
    closed: bool,
    dropped: u64,
}

/// Outcome of one bounded queue wait.
enum Popped {
    Item(ChannelKind, Vec<u8>),
    /// Timed out with nothing queued; the consumer runs its periodic work
    /// and waits again.
    Empty,
    /// Closed and drained.
    Closed,
}

impl PacketQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, kind: ChannelKind, payload: Vec<u8>) {
        let mut inner = self.inner.lock();
        if inner.items.len() == self.capacity {
            inner.items.pop_front();
            inner.dropped += 1;
            if inner.dropped.is_power_of_two() {
                tracing::warn!(dropped = inner.dropped, "queue full, dropping oldest packet");
            }
        }
        inner.items.push_back((kind, payload));
        drop(inner);
        self.available.notify_one();
    }

    /// Blocks up to `timeout` for the next packet.
    fn pop(&self, timeout: Duration) -> Popped {
        let mut inner = self.inner.lock();
        loop {
            if let Some((kind, payload)) = inner.items.pop_front() {
                return Popped::Item(kind, payload);
            }
            if inner.closed {
                return Popped::Closed;
            }
            if self.available.wait_for(&mut inner, timeout).timed_out() {
                if let Some((kind, payload)) = inner.items.pop_front() {
                    return Popped::Item(kind, payload);
                }
                return if inner.closed { Popped::Closed } else { Popped::Empty };
            }
        }
    }

    fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// Requests a cooperative stop from any thread.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    control: Arc<Mutex<Option<TcpStream>>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // Unblock any read stuck on the control connection.
        if let Some(stream) = self.control.lock().as_ref() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

/// One-shot pull client: connects, negotiates, and runs the pipeline until
/// the stream ends, an unrecoverable error occurs, or [`StopHandle::stop`]
/// is called.
pub struct Client {
    url: String,
    credential: Option<Credential>,
    config: ClientConfig,
    stop: Arc<AtomicBool>,
    control: Arc<Mutex<Option<TcpStream>>>,
}

impl Client {
    pub fn new(url: &str, credential: Option<Credential>, config: ClientConfig) -> Self {
        Self {
            url: url.to_string(),
            credential,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            control: Arc::new(Mutex::new(None)),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: self.stop.clone(),
            control: self.control.clone(),
        }
    }

    /// Run the full pipeline. Only complete segments reach the sink; a
    /// partial fragment or an open segment at stop time is discarded.
    pub fn run(&mut self, sink: &mut dyn SegmentSink) -> Result<()> {
        let (host, port) = host_port(&self.url)?;
        tracing::info!(%host, port, "connecting");
        let control = TcpStream::connect((host.as_str(), port))?;
        control.set_read_timeout(Some(self.config.read_timeout))?;
        *self.control.lock() = Some(control.try_clone()?);

        let mut session =
            RtspSession::new(control.try_clone()?, &self.url, self.credential.clone());
        let outcome = self.negotiate_and_pull(&mut session, &control, sink);

        // Best-effort TEARDOWN over whatever is left of the connection.
        let _ = session.teardown();
        *self.control.lock() = None;
        outcome
    }

    fn negotiate_and_pull(
        &self,
        session: &mut RtspSession<TcpStream>,
        control: &TcpStream,
        sink: &mut dyn SegmentSink,
    ) -> Result<()> {
        session.options()?;
        session.describe()?;
        session.setup(self.config.transport)?;
        session.play()?;

        let mode = session.transport().ok_or(RtspError::Closed)?;
        let channel = match mode {
            TransportMode::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => TransportChannel::Interleaved(InterleavedChannel::new(
                control.try_clone()?,
                rtp_channel,
                rtcp_channel,
            )),
            TransportMode::Udp {
                client_rtp_port,
                client_rtcp_port,
                server_rtp_port,
                server_rtcp_port,
            } => TransportChannel::Udp(UdpChannelPair::bind(
                control.peer_addr()?.ip(),
                (client_rtp_port, client_rtcp_port),
                (server_rtp_port, server_rtcp_port),
                self.config.read_timeout,
            )?),
        };
        let interleaved = matches!(mode, TransportMode::Interleaved { .. });
        let sender = channel.sender()?;

        let queue = Arc::new(PacketQueue::new(self.config.queue_capacity));
        let reader_error: Arc<Mutex<Option<RtspError>>> = Arc::new(Mutex::new(None));
        let reader = self.spawn_reader(channel, queue.clone(), reader_error.clone());

        let result = self.consume(session, sink, &queue, &sender, interleaved);
        queue.close();
        let _ = reader.join();

        if self.stop.load(Ordering::SeqCst) {
            tracing::info!("stopped");
            return Ok(());
        }
        if let Some(e) = reader_error.lock().take() {
            return Err(e);
        }
        result
    }

    fn spawn_reader(
        &self,
        mut channel: TransportChannel,
        queue: Arc<PacketQueue>,
        error: Arc<Mutex<Option<RtspError>>>,
    ) -> std::thread::JoinHandle<()> {
        let stop = self.stop.clone();
        std::thread::spawn(move || {
            loop {
                if stop.load(Ordering::SeqCst) || queue.is_closed() {
                    break;
                }
                match channel.receive() {
                    Ok(Received::Packet(kind, payload)) => queue.push(kind, payload),
                    Ok(Received::Timeout) => continue,
                    Ok(Received::Closed) => {
                        tracing::info!("stream closed by server");
                        break;
                    }
                    Err(e) => {
                        *error.lock() = Some(e);
                        break;
                    }
                }
            }
            queue.close();
        })
    }

    fn consume(
        &self,
        session: &mut RtspSession<TcpStream>,
        sink: &mut dyn SegmentSink,
        queue: &PacketQueue,
        sender: &crate::transport::TransportSender,
        interleaved: bool,
    ) -> Result<()> {
        let track = session.track().ok_or(RtspError::Closed)?.clone();
        let mut tracker = SequenceTracker::new();
        let mut depacketizer = Depacketizer::new();
        let mut builder = FrameBuilder::new(track.clock_rate);
        let mut rtcp = RtcpExchange::new(self.config.report_interval);
        let mut muxer: Option<Mp4Muxer> = None;
        let mut pending_params: (Option<Vec<u8>>, Option<Vec<u8>>) =
            (track.sps.clone(), track.pps.clone());

        let started = Instant::now();
        let keep_alive_every = Duration::from_secs(session.timeout_secs().max(2) / 2);
        let mut last_keep_alive = Instant::now();

        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            if last_keep_alive.elapsed() >= keep_alive_every {
                // Interleaved replies are consumed by the reader's resync
                // scan, so only UDP mode waits for one.
                if let Err(e) = session.keep_alive(!interleaved) {
                    tracing::warn!(error = %e, "keep-alive failed");
                    return Err(e);
                }
                last_keep_alive = Instant::now();
            }

            if let Some(report) = rtcp.poll_report(&mut tracker)
                && let Err(e) = sender.send(ChannelKind::Rtcp, &report)
            {
                tracing::warn!(error = %e, "receiver report send failed");
            }

            let (kind, payload) = match queue.pop(Duration::from_millis(100)) {
                Popped::Item(kind, payload) => (kind, payload),
                Popped::Empty => continue,
                Popped::Closed => break,
            };

            match kind {
                ChannelKind::Rtcp => {
                    if let Err(e) = rtcp.handle_packet(&payload) {
                        tracing::warn!(error = %e, "malformed RTCP packet dropped");
                    }
                }
                ChannelKind::Rtp => {
                    let packet = match RtpPacket::parse(&payload) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(error = %e, "malformed RTP packet dropped");
                            continue;
                        }
                    };
                    if packet.payload_type != track.payload_type {
                        continue;
                    }
                    tracker.set_ssrc(packet.ssrc);
                    let arrival = (started.elapsed().as_micros() as u64
                        * track.clock_rate as u64
                        / 1_000_000) as u32;
                    match tracker.observe(&packet, arrival) {
                        SequenceStatus::Duplicate | SequenceStatus::Late => continue,
                        SequenceStatus::Gap(lost) => {
                            tracing::debug!(lost, "sequence gap");
                        }
                        SequenceStatus::InOrder => {}
                    }

                    let unit = match depacketizer.push(&packet) {
                        Ok(Some(unit)) => unit,
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "payload dropped");
                            continue;
                        }
                    };

                    if muxer.is_none() {
                        harvest_parameter_sets(&unit.nalus, &mut pending_params);
                        if let (Some(sps), Some(pps)) = (&pending_params.0, &pending_params.1) {
                            let m = Mp4Muxer::new(&track, sps.clone(), pps.clone());
                            sink.write_segment(&m.init_segment())?;
                            muxer = Some(m);
                        } else {
                            // Undecodable until parameter sets arrive.
                            continue;
                        }
                    }
                    let Some(muxer) = muxer.as_mut() else { continue };

                    let frame = builder.push(unit, rtcp.anchor());
                    match muxer.push_frame(frame) {
                        Ok(()) => {}
                        Err(RtspError::CorruptFrame) => continue,
                        Err(e) => return Err(e),
                    }
                    if muxer.pending_frames() >= self.config.frames_per_segment {
                        let segment = muxer.finalize_segment()?;
                        sink.write_segment(&segment)?;
                    }
                }
            }
        }

        if let Some(m) = muxer.as_mut() {
            m.discard_pending();
        }
        Ok(())
    }
}

/// Pick in-band SPS (type 7) and PPS (type 8) out of an access unit when
/// the SDP did not announce them.
fn harvest_parameter_sets(
    nalus: &[Vec<u8>],
    params: &mut (Option<Vec<u8>>, Option<Vec<u8>>),
) {
    for nal in nalus {
        match nal.first().map(|b| b & 0x1f) {
            Some(7) if params.0.is_none() => params.0 = Some(nal.clone()),
            Some(8) if params.1.is_none() => params.1 = Some(nal.clone()),
            _ => {}
        }
    }
}

/// Split `rtsp://[user:pass@]host[:port]/...` into host and port.
fn host_port(url: &str) -> Result<(String, u16)> {
    let rest = url
        .strip_prefix("rtsp://")
        .ok_or_else(|| bad_url("missing rtsp:// scheme"))?;
    let authority = rest.split('/').next().unwrap_or(rest);
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    match host_port.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port.parse().map_err(|_| bad_url("invalid port"))?;
            Ok((host.to_string(), port))
        }
        _ if !host_port.is_empty() => Ok((host_port.to_string(), 554)),
        _ => Err(bad_url("missing host")),
    }
}

fn bad_url(detail: &str) -> RtspError {
    RtspError::Io(io::Error::new(io::ErrorKind::InvalidInput, detail.to_string()))
}
