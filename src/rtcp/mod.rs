//! RTCP sender-report parsing and receiver-report generation (RFC 3550
//! §6.4). Only SR and RR are handled; other packet types are ignored.

use std::time::{Duration, Instant};

use rand::RngExt;

use crate::error::{DecodeErrorKind, Result, RtspError};
use crate::media::frame::WallClockAnchor;
use crate::media::rtp::{ReceptionStats, SequenceTracker};

pub const PT_SENDER_REPORT: u8 = 200;
pub const PT_RECEIVER_REPORT: u8 = 201;

/// Offset between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// Default spacing between outgoing receiver reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

fn decode(kind: DecodeErrorKind) -> RtspError {
    RtspError::Decode { kind }
}

/// A parsed sender report.
///
/// ```text
/// header (4) | SSRC (4) | NTP sec (4) | NTP frac (4) | RTP ts (4)
/// | packet count (4) | octet count (4) | report blocks (24 each)
/// ```
#[derive(Debug)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_seconds: u32,
    pub ntp_fraction: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub reports: Vec<ReportBlock>,
}

impl SenderReport {
    /// Parse a complete SR packet, header included. Undersized input or a
    /// bad version field is a `Decode` error; the caller drops the packet.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 28 {
            return Err(decode(DecodeErrorKind::Truncated));
        }
        if data[0] >> 6 != 2 {
            return Err(decode(DecodeErrorKind::BadVersion));
        }
        if data[1] != PT_SENDER_REPORT {
            return Err(decode(DecodeErrorKind::UnsupportedPayload));
        }
        let count = (data[0] & 0x1f) as usize;
        if data.len() < 28 + count * 24 {
            return Err(decode(DecodeErrorKind::Truncated));
        }

        let word = |off: usize| u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]);
        let mut reports = Vec::with_capacity(count);
        for i in 0..count {
            reports.push(ReportBlock::parse(&data[28 + i * 24..28 + (i + 1) * 24]));
        }

        Ok(SenderReport {
            ssrc: word(4),
            ntp_seconds: word(8),
            ntp_fraction: word(12),
            rtp_timestamp: word(16),
            packet_count: word(20),
            octet_count: word(24),
            reports,
        })
    }

    /// NTP timestamp converted to microseconds since the Unix epoch.
    pub fn wall_micros(&self) -> i64 {
        let secs = self.ntp_seconds as i64 - NTP_UNIX_OFFSET_SECS as i64;
        let micros = (self.ntp_fraction as u64 * 1_000_000) >> 32;
        secs * 1_000_000 + micros as i64
    }

    /// Middle 32 bits of the NTP timestamp, echoed back as LSR.
    fn ntp_mid(&self) -> u32 {
        (self.ntp_seconds << 16) | (self.ntp_fraction >> 16)
    }

    pub fn anchor(&self) -> WallClockAnchor {
        WallClockAnchor {
            wall_micros: self.wall_micros(),
            rtp_timestamp: self.rtp_timestamp,
        }
    }
}

/// A parsed receiver report: the reporter's SSRC followed by report
/// blocks, no sender info (RFC 3550 §6.4.2). The block count comes from
/// the common header.
#[derive(Debug)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub reports: Vec<ReportBlock>,
}

impl ReceiverReport {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(decode(DecodeErrorKind::Truncated));
        }
        if data[0] >> 6 != 2 {
            return Err(decode(DecodeErrorKind::BadVersion));
        }
        if data[1] != PT_RECEIVER_REPORT {
            return Err(decode(DecodeErrorKind::UnsupportedPayload));
        }
        let count = (data[0] & 0x1f) as usize;
        if data.len() < 8 + count * 24 {
            return Err(decode(DecodeErrorKind::Truncated));
        }

        let ssrc = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let mut reports = Vec::with_capacity(count);
        for i in 0..count {
            reports.push(ReportBlock::parse(&data[8 + i * 24..8 + (i + 1) * 24]));
        }
        Ok(ReceiverReport { ssrc, reports })
    }
}

/// One 24-byte reception report block.
#[derive(Debug, Clone, Copy)]
pub struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: u32,
    pub extended_highest_seq: u32,
    pub jitter: u32,
    pub last_sr: u32,
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    fn parse(data: &[u8]) -> Self {
        let word = |off: usize| u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]);
        ReportBlock {
            ssrc: word(0),
            fraction_lost: data[4],
            cumulative_lost: word(4) & 0x00ff_ffff,
            extended_highest_seq: word(8),
            jitter: word(12),
            last_sr: word(16),
            delay_since_last_sr: word(20),
        }
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        let lost = (self.fraction_lost as u32) << 24 | (self.cumulative_lost & 0x00ff_ffff);
        buf.extend_from_slice(&lost.to_be_bytes());
        buf.extend_from_slice(&self.extended_highest_seq.to_be_bytes());
        buf.extend_from_slice(&self.jitter.to_be_bytes());
        buf.extend_from_slice(&self.last_sr.to_be_bytes());
        buf.extend_from_slice(&self.delay_since_last_sr.to_be_bytes());
    }
}

/// Serialize one receiver report with a single report block.
pub fn build_receiver_report(our_ssrc: u32, block: &ReportBlock) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    buf.push(0x80 | 1); // V=2, P=0, RC=1
    buf.push(PT_RECEIVER_REPORT);
    // Length in 32-bit words minus one: 8-byte header + one 24-byte block.
    buf.extend_from_slice(&7u16.to_be_bytes());
    buf.extend_from_slice(&our_ssrc.to_be_bytes());
    block.write_to(&mut buf);
    buf
}

/// Incoming-SR / outgoing-RR state for the single media source.
///
/// Keeps the most recent wall-clock anchor for frame timing and schedules
/// receiver reports on a fixed interval, independent of frame cadence.
pub struct RtcpExchange {
    ssrc: u32,
    interval: Duration,
    last_sent: Instant,
    anchor: Option<WallClockAnchor>,
    last_sr_ntp_mid: u32,
    last_sr_at: Option<Instant>,
    last_peer_report: Option<ReceiverReport>,
}

impl RtcpExchange {
    pub fn new(interval: Duration) -> Self {
        Self {
            ssrc: rand::rng().random::<u32>(),
            interval,
            last_sent: Instant::now(),
            anchor: None,
            last_sr_ntp_mid: 0,
            last_sr_at: None,
            last_peer_report: None,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// The latest sender-report correlation, if any SR has arrived.
    pub fn anchor(&self) -> Option<WallClockAnchor> {
        self.anchor
    }

    /// Ingest one RTCP packet. Sender reports update the anchor, receiver
    /// reports are decoded and recorded; any other well-formed type is
    /// ignored.
    pub fn handle_packet(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 4 {
            return Err(decode(DecodeErrorKind::Truncated));
        }
        match data[1] {
            PT_SENDER_REPORT => {
                let sr = SenderReport::parse(data)?;
                tracing::debug!(
                    ssrc = sr.ssrc,
                    rtp_timestamp = sr.rtp_timestamp,
                    "sender report"
                );
                self.last_sr_ntp_mid = sr.ntp_mid();
                self.last_sr_at = Some(Instant::now());
                self.anchor = Some(sr.anchor());
            }
            PT_RECEIVER_REPORT => {
                let rr = ReceiverReport::parse(data)?;
                tracing::debug!(ssrc = rr.ssrc, blocks = rr.reports.len(), "receiver report");
                self.last_peer_report = Some(rr);
            }
            other => tracing::trace!(packet_type = other, "ignoring RTCP packet"),
        }
        Ok(())
    }

    /// The most recent receiver report heard from the peer, if any.
    pub fn peer_report(&self) -> Option<&ReceiverReport> {
        self.last_peer_report.as_ref()
    }

    /// When the report interval has elapsed, snapshot the tracker and
    /// serialize one receiver report.
    pub fn poll_report(&mut self, tracker: &mut SequenceTracker) -> Option<Vec<u8>> {
        let now = Instant::now();
        if now.duration_since(self.last_sent) < self.interval {
            return None;
        }
        self.last_sent = now;

        let stats = tracker.report();
        let delay = self
            .last_sr_at
            .map(|at| (now.duration_since(at).as_secs_f64() * 65536.0) as u32)
            .unwrap_or(0);
        Some(build_receiver_report(self.ssrc, &block_from_stats(&stats, self.last_sr_ntp_mid, delay)))
    }
}

fn block_from_stats(stats: &ReceptionStats, last_sr: u32, delay: u32) -> ReportBlock {
    ReportBlock {
        ssrc: stats.ssrc,
        fraction_lost: stats.fraction_lost,
        cumulative_lost: stats.cumulative_lost,
        extended_highest_seq: stats.extended_highest_seq,
        jitter: stats.jitter,
        last_sr,
        delay_since_last_sr: delay,
    }
}
