use crate::error::{DecodeErrorKind, RtspError};

/// Late packets older than this many sequence numbers are classified as
/// stale rather than retransmissions.
const REORDER_WINDOW: u16 = 64;

/// A parsed RTP packet (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Ephemeral — constructed per datagram/interleaved block and consumed
/// immediately by the depacketizer.
#[derive(Debug)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    /// 16-bit wrapping sequence number.
    pub sequence: u16,
    /// 32-bit wrapping media timestamp in clock-rate units.
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Parse one RTP packet: 12-byte fixed header, then CSRC list and
    /// header extension skipped per the flag bits, padding stripped.
    ///
    /// Packets with a version other than 2 are rejected with
    /// [`RtspError::Decode`] — the caller drops and logs them.
    pub fn parse(data: &[u8]) -> crate::error::Result<Self> {
        if data.len() < 12 {
            return Err(decode(DecodeErrorKind::Truncated));
        }
        let version = data[0] >> 6;
        if version != 2 {
            return Err(decode(DecodeErrorKind::BadVersion));
        }
        let padding = data[0] & 0x20 != 0;
        let extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0f) as usize;
        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7f;
        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = 12 + csrc_count * 4;
        if extension {
            if data.len() < offset + 4 {
                return Err(decode(DecodeErrorKind::Truncated));
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + words * 4;
        }
        if data.len() < offset {
            return Err(decode(DecodeErrorKind::Truncated));
        }

        let mut end = data.len();
        if padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || pad > end - offset {
                return Err(decode(DecodeErrorKind::Truncated));
            }
            end -= pad;
        }

        Ok(RtpPacket {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload: data[offset..end].to_vec(),
        })
    }
}

fn decode(kind: DecodeErrorKind) -> RtspError {
    RtspError::Decode { kind }
}

/// Classification of a packet relative to the last-seen sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    /// The immediate successor of the previous packet.
    InOrder,
    /// One or more packets are presumed lost; carries the presumed count.
    Gap(u16),
    /// Already seen (or a retransmission within the reorder window).
    Duplicate,
    /// Older than the reorder window; dropped.
    Late,
}

/// Per-source sequence-number continuity and reception statistics
/// (RFC 3550 §A.1, §A.3 — simplified for a single source).
///
/// Sequence numbers are compared modulo 2^16 with signed-difference
/// arithmetic so wrap-around never classifies a fresh packet as old.
/// Counters feed the outgoing receiver reports; the cumulative-lost value
/// is clamped to be monotonically non-decreasing (a late arrival never
/// retracts an already-reported loss).
#[derive(Debug, Default)]
pub struct SequenceTracker {
    initialized: bool,
    ssrc: u32,
    max_seq: u16,
    cycles: u32,
    base_seq: u32,
    received: u64,
    cumulative_lost: u32,
    // Interval counters for fraction-lost (reset per report).
    expected_prior: u64,
    received_prior: u64,
    // Interarrival jitter state (RFC 3550 §A.8), in clock-rate units.
    jitter: f64,
    last_transit: Option<i64>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Record one packet arrival. `arrival_clock` is the local receive time
    /// expressed in the media clock rate (for jitter).
    pub fn observe(&mut self, packet: &RtpPacket, arrival_clock: u32) -> SequenceStatus {
        let status = self.classify(packet.sequence);

        if !matches!(status, SequenceStatus::Late) {
            self.received += 1;
        }
        if matches!(status, SequenceStatus::InOrder | SequenceStatus::Gap(_)) {
            // Jitter per RFC 3550 A.8: smoothed |transit - previous transit|.
            let transit = arrival_clock.wrapping_sub(packet.timestamp) as i32 as i64;
            if let Some(prev) = self.last_transit {
                let d = (transit - prev).unsigned_abs() as f64;
                self.jitter += (d - self.jitter) / 16.0;
            }
            self.last_transit = Some(transit);
        }
        status
    }

    /// Classify `seq` against the last-seen highest sequence number and
    /// advance the extended-sequence state.
    pub fn classify(&mut self, seq: u16) -> SequenceStatus {
        if !self.initialized {
            self.initialized = true;
            self.max_seq = seq;
            self.base_seq = seq as u32;
            return SequenceStatus::InOrder;
        }

        let delta = seq.wrapping_sub(self.max_seq) as i16;
        if delta == 0 {
            return SequenceStatus::Duplicate;
        }
        if delta < 0 {
            return if delta.unsigned_abs() <= REORDER_WINDOW {
                SequenceStatus::Duplicate
            } else {
                SequenceStatus::Late
            };
        }

        if seq < self.max_seq {
            self.cycles += 1;
        }
        self.max_seq = seq;
        if delta == 1 {
            SequenceStatus::InOrder
        } else {
            SequenceStatus::Gap(delta as u16 - 1)
        }
    }

    /// Extended highest sequence number received: cycle count in the high
    /// 16 bits (RFC 3550 §6.4.1).
    pub fn extended_highest_seq(&self) -> u32 {
        (self.cycles << 16) | self.max_seq as u32
    }

    /// Set once from the first packet of the source.
    pub fn set_ssrc(&mut self, ssrc: u32) {
        self.ssrc = ssrc;
    }

    /// Snapshot the reception statistics for one receiver report and reset
    /// the per-interval counters.
    pub fn report(&mut self) -> ReceptionStats {
        let extended = self.extended_highest_seq();
        let expected = (extended as u64).saturating_sub(self.base_seq as u64) + 1;
        let lost = expected.saturating_sub(self.received);
        // Monotonic: a late arrival may shrink `lost`, never the report.
        self.cumulative_lost = self.cumulative_lost.max(lost.min(0x00ff_ffff) as u32);

        let expected_interval = expected - self.expected_prior;
        let received_interval = self.received - self.received_prior;
        self.expected_prior = expected;
        self.received_prior = self.received;

        let lost_interval = expected_interval.saturating_sub(received_interval);
        let fraction_lost = if expected_interval == 0 {
            0
        } else {
            ((lost_interval * 256) / expected_interval).min(255) as u8
        };

        ReceptionStats {
            ssrc: self.ssrc,
            fraction_lost,
            cumulative_lost: self.cumulative_lost,
            extended_highest_seq: extended,
            jitter: self.jitter as u32,
        }
    }
}

/// One report's worth of reception statistics for a source.
#[derive(Debug, Clone, Copy)]
pub struct ReceptionStats {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: u32,
    pub extended_highest_seq: u32,
    pub jitter: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seq: u16) -> Vec<u8> {
        let mut p = vec![0x80, 96, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        p[2..4].copy_from_slice(&seq.to_be_bytes());
        p.push(0xAB);
        p
    }

    // --- Parsing ---

    #[test]
    fn parse_fixed_header() {
        let mut data = vec![0x80, 0xE0, 0x12, 0x34, 0, 0, 0x0B, 0xB8, 0xDE, 0xAD, 0xBE, 0xEF];
        data.extend_from_slice(&[1, 2, 3]);
        let p = RtpPacket::parse(&data).unwrap();
        assert!(p.marker);
        assert_eq!(p.payload_type, 96);
        assert_eq!(p.sequence, 0x1234);
        assert_eq!(p.timestamp, 3000);
        assert_eq!(p.ssrc, 0xDEADBEEF);
        assert_eq!(p.payload, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_bad_version() {
        let data = vec![0x40, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        assert!(matches!(
            RtpPacket::parse(&data),
            Err(RtspError::Decode { kind: DecodeErrorKind::BadVersion })
        ));
    }

    #[test]
    fn rejects_truncated() {
        assert!(RtpPacket::parse(&[0x80, 96, 0]).is_err());
    }

    #[test]
    fn skips_csrc_and_extension() {
        // CC=1, X=1: one CSRC word, then a 4-byte extension header with one word.
        let mut data = vec![0x80 | 0x10 | 0x01, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        data.extend_from_slice(&[0xCC; 4]); // CSRC
        data.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01]); // ext header, 1 word
        data.extend_from_slice(&[0xEE; 4]); // ext body
        data.extend_from_slice(&[9, 9]); // payload
        let p = RtpPacket::parse(&data).unwrap();
        assert_eq!(p.payload, vec![9, 9]);
    }

    #[test]
    fn strips_padding() {
        let mut data = vec![0x80 | 0x20, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        data.extend_from_slice(&[7, 7, 0, 0, 3]); // 2 payload bytes + 3 pad
        let p = RtpPacket::parse(&data).unwrap();
        assert_eq!(p.payload, vec![7, 7]);
    }

    // --- Sequence classification ---

    #[test]
    fn in_order_run() {
        let mut t = SequenceTracker::new();
        assert_eq!(t.classify(10), SequenceStatus::InOrder);
        assert_eq!(t.classify(11), SequenceStatus::InOrder);
        assert_eq!(t.classify(12), SequenceStatus::InOrder);
    }

    #[test]
    fn wrap_boundary_is_in_order() {
        let mut t = SequenceTracker::new();
        assert_eq!(t.classify(65535), SequenceStatus::InOrder);
        assert_eq!(t.classify(0), SequenceStatus::InOrder);
        assert_eq!(t.extended_highest_seq(), 0x0001_0000);
    }

    #[test]
    fn gap_counts_missing_packets() {
        let mut t = SequenceTracker::new();
        t.classify(100);
        assert_eq!(t.classify(104), SequenceStatus::Gap(3));
    }

    #[test]
    fn duplicate_and_late() {
        let mut t = SequenceTracker::new();
        t.classify(1000);
        assert_eq!(t.classify(1000), SequenceStatus::Duplicate);
        assert_eq!(t.classify(999), SequenceStatus::Duplicate); // inside window
        assert_eq!(t.classify(500), SequenceStatus::Late); // beyond window
    }

    #[test]
    fn cumulative_lost_is_monotonic() {
        let mut t = SequenceTracker::new();
        let mut seq: u16 = 0;
        // 10 in-order packets, then drop every other packet.
        for _ in 0..10 {
            let p = RtpPacket::parse(&packet(seq)).unwrap();
            t.observe(&p, 0);
            seq += 1;
        }
        let r1 = t.report();
        assert_eq!(r1.cumulative_lost, 0);

        let mut prev = r1.cumulative_lost;
        for _ in 0..5 {
            seq += 1; // lost
            let p = RtpPacket::parse(&packet(seq)).unwrap();
            t.observe(&p, 0);
            seq += 1;
            let r = t.report();
            assert!(r.cumulative_lost >= prev);
            prev = r.cumulative_lost;
        }
        assert!(prev > 0);
    }

    #[test]
    fn fraction_lost_reflects_interval() {
        let mut t = SequenceTracker::new();
        for seq in 0u16..8 {
            let p = RtpPacket::parse(&packet(seq)).unwrap();
            t.observe(&p, 0);
        }
        t.report(); // clean interval
        // Next interval: receive 8..12 but skip 9 (one lost of five expected).
        for seq in [8u16, 10, 11, 12] {
            let p = RtpPacket::parse(&packet(seq)).unwrap();
            t.observe(&p, 0);
        }
        let r = t.report();
        assert_eq!(r.cumulative_lost, 1);
        assert_eq!(r.fraction_lost, (256 / 5) as u8);
    }
}
