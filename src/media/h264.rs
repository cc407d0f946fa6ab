//! H.264 RTP payload handling (RFC 6184): single NAL units, STAP-A
//! aggregation, and FU-A fragmentation, reassembled into access units.

use crate::error::{DecodeErrorKind, Result, RtspError};

use super::rtp::RtpPacket;

const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_STAP_A: u8 = 24;
const NAL_TYPE_FU_A: u8 = 28;

const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;

/// One complete access unit: every NAL that shares an RTP timestamp, closed
/// by the marker bit.
#[derive(Debug)]
pub struct AccessUnit {
    pub rtp_timestamp: u32,
    pub nalus: Vec<Vec<u8>>,
    /// True when the unit contains an IDR slice.
    pub keyframe: bool,
}

/// Reassembles RTP payloads into access units.
///
/// A sequence discontinuity while a fragmented unit is in flight discards
/// the partial buffer; a torn NAL is never emitted and the next FU-A start
/// flag arms a fresh assembly. NALs already collected for the current access
/// unit are kept — only the fragment in progress is unrecoverable.
#[derive(Debug, Default)]
pub struct Depacketizer {
    last_seq: Option<u16>,
    /// In-flight FU-A reassembly buffer, starting with the restored NAL
    /// header byte.
    fragment: Option<Vec<u8>>,
    nalus: Vec<Vec<u8>>,
    timestamp: u32,
}

impl Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet in arrival order. Returns a completed access unit
    /// when the packet carried the marker bit.
    pub fn push(&mut self, packet: &RtpPacket) -> Result<Option<AccessUnit>> {
        if let Some(last) = self.last_seq {
            let delta = packet.sequence.wrapping_sub(last);
            if delta != 1 && self.fragment.take().is_some() {
                tracing::warn!(
                    last,
                    seq = packet.sequence,
                    "sequence gap, discarding partial fragment"
                );
            }
        }
        self.last_seq = Some(packet.sequence);

        if packet.payload.is_empty() {
            return Err(RtspError::Decode {
                kind: DecodeErrorKind::Truncated,
            });
        }
        self.timestamp = packet.timestamp;

        let nal_type = packet.payload[0] & 0x1f;
        match nal_type {
            1..=23 => self.nalus.push(packet.payload.clone()),
            NAL_TYPE_STAP_A => self.unpack_stap_a(&packet.payload[1..])?,
            NAL_TYPE_FU_A => self.push_fu_a(&packet.payload)?,
            other => {
                tracing::warn!(nal_type = other, "unsupported payload structure");
                return Err(RtspError::Decode {
                    kind: DecodeErrorKind::UnsupportedPayload,
                });
            }
        }

        if packet.marker {
            return Ok(self.close_unit());
        }
        Ok(None)
    }

    /// STAP-A: a run of 16-bit-length-prefixed NAL units after the
    /// aggregation header (RFC 6184 §5.7.1).
    fn unpack_stap_a(&mut self, mut body: &[u8]) -> Result<()> {
        while !body.is_empty() {
            if body.len() < 2 {
                return Err(RtspError::Decode {
                    kind: DecodeErrorKind::Truncated,
                });
            }
            let len = u16::from_be_bytes([body[0], body[1]]) as usize;
            body = &body[2..];
            if len == 0 || body.len() < len {
                return Err(RtspError::Decode {
                    kind: DecodeErrorKind::Truncated,
                });
            }
            self.nalus.push(body[..len].to_vec());
            body = &body[len..];
        }
        Ok(())
    }

    /// FU-A: indicator byte, then a fragment header carrying start/end flags
    /// and the original NAL type (RFC 6184 §5.8).
    fn push_fu_a(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() < 2 {
            return Err(RtspError::Decode {
                kind: DecodeErrorKind::Truncated,
            });
        }
        let indicator = payload[0];
        let fu_header = payload[1];
        let body = &payload[2..];

        if fu_header & FU_START != 0 {
            // Restore the original header: NRI from the indicator, type from
            // the fragment header.
            let mut buf = Vec::with_capacity(1 + body.len());
            buf.push((indicator & 0xe0) | (fu_header & 0x1f));
            buf.extend_from_slice(body);
            self.fragment = Some(buf);
        } else {
            match self.fragment.as_mut() {
                Some(buf) => buf.extend_from_slice(body),
                None => {
                    // Mid-stream join or a fragment already discarded.
                    tracing::trace!("fragment continuation without start, dropped");
                    return Ok(());
                }
            }
        }

        if fu_header & FU_END != 0
            && let Some(nal) = self.fragment.take()
        {
            self.nalus.push(nal);
        }
        Ok(())
    }

    fn close_unit(&mut self) -> Option<AccessUnit> {
        if self.nalus.is_empty() {
            return None;
        }
        let nalus = std::mem::take(&mut self.nalus);
        let keyframe = nalus
            .iter()
            .any(|n| !n.is_empty() && n[0] & 0x1f == NAL_TYPE_IDR);
        Some(AccessUnit {
            rtp_timestamp: self.timestamp,
            nalus,
            keyframe,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seq: u16, marker: bool, payload: &[u8]) -> RtpPacket {
        RtpPacket {
            marker,
            payload_type: 96,
            sequence: seq,
            timestamp: 90_000,
            ssrc: 1,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn single_nalu_with_marker() {
        let mut d = Depacketizer::new();
        let unit = d
            .push(&packet(1, true, &[0x65, 1, 2, 3]))
            .unwrap()
            .expect("unit");
        assert_eq!(unit.nalus, vec![vec![0x65, 1, 2, 3]]);
        assert!(unit.keyframe);
        assert_eq!(unit.rtp_timestamp, 90_000);
    }

    #[test]
    fn non_idr_slice_is_not_keyframe() {
        let mut d = Depacketizer::new();
        let unit = d.push(&packet(1, true, &[0x41, 9])).unwrap().expect("unit");
        assert!(!unit.keyframe);
    }

    #[test]
    fn stap_a_unpacks_all_units() {
        let mut d = Depacketizer::new();
        // STAP-A header, then two length-prefixed NALs (SPS-like + PPS-like).
        let mut payload = vec![0x18];
        payload.extend_from_slice(&[0, 3, 0x67, 0xAA, 0xBB]);
        payload.extend_from_slice(&[0, 2, 0x68, 0xCC]);
        let unit = d.push(&packet(1, true, &payload)).unwrap().expect("unit");
        assert_eq!(unit.nalus, vec![vec![0x67, 0xAA, 0xBB], vec![0x68, 0xCC]]);
    }

    #[test]
    fn fu_a_three_fragments_yield_one_nal() {
        let mut d = Depacketizer::new();
        // Indicator 0x7C (NRI 3, type 28); original NAL type 5.
        assert!(d.push(&packet(10, false, &[0x7c, 0x85, 1, 2])).unwrap().is_none());
        assert!(d.push(&packet(11, false, &[0x7c, 0x05, 3, 4])).unwrap().is_none());
        let unit = d
            .push(&packet(12, true, &[0x7c, 0x45, 5, 6]))
            .unwrap()
            .expect("unit");
        assert_eq!(unit.nalus, vec![vec![0x65, 1, 2, 3, 4, 5, 6]]);
        assert!(unit.keyframe);
    }

    #[test]
    fn missing_middle_fragment_emits_nothing() {
        let mut d = Depacketizer::new();
        assert!(d.push(&packet(10, false, &[0x7c, 0x85, 1, 2])).unwrap().is_none());
        // Sequence 11 lost; the end fragment arrives with a gap.
        assert!(d.push(&packet(12, true, &[0x7c, 0x45, 5, 6])).unwrap().is_none());

        // State is clean: the next complete run yields exactly one unit.
        assert!(d.push(&packet(13, false, &[0x7c, 0x85, 7])).unwrap().is_none());
        let unit = d
            .push(&packet(14, true, &[0x7c, 0x45, 8]))
            .unwrap()
            .expect("unit");
        assert_eq!(unit.nalus, vec![vec![0x65, 7, 8]]);
    }

    #[test]
    fn continuation_without_start_is_ignored() {
        let mut d = Depacketizer::new();
        assert!(d.push(&packet(5, false, &[0x7c, 0x05, 1])).unwrap().is_none());
        assert!(d.push(&packet(6, true, &[0x7c, 0x45, 2])).unwrap().is_none());
    }

    #[test]
    fn gap_keeps_completed_nalus() {
        let mut d = Depacketizer::new();
        // A finished single NAL, then a torn fragment, then the marker.
        assert!(d.push(&packet(1, false, &[0x41, 1])).unwrap().is_none());
        assert!(d.push(&packet(2, false, &[0x7c, 0x81, 2])).unwrap().is_none());
        let unit = d
            .push(&packet(4, true, &[0x41, 3]))
            .unwrap()
            .expect("unit");
        assert_eq!(unit.nalus, vec![vec![0x41, 1], vec![0x41, 3]]);
    }

    #[test]
    fn unsupported_type_is_decode_error() {
        let mut d = Depacketizer::new();
        // Type 29 (FU-B) is not handled.
        assert!(matches!(
            d.push(&packet(1, false, &[0x7d, 0x85, 1])),
            Err(RtspError::Decode {
                kind: DecodeErrorKind::UnsupportedPayload
            })
        ));
    }

    #[test]
    fn truncated_stap_a_is_decode_error() {
        let mut d = Depacketizer::new();
        assert!(d.push(&packet(1, false, &[0x18, 0, 5, 0x67])).is_err());
    }
}
