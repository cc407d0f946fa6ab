//! Frame timing: access units stamped with a monotonic presentation
//! timeline and, once sender reports arrive, a wall-clock mapping.

use super::h264::AccessUnit;

/// Latest (wall clock, RTP timestamp) pair taken from a sender report.
#[derive(Debug, Clone, Copy)]
pub struct WallClockAnchor {
    /// Microseconds since the Unix epoch at the anchor instant.
    pub wall_micros: i64,
    /// The RTP timestamp corresponding to that instant.
    pub rtp_timestamp: u32,
}

/// A timed video frame ready for the muxer. Timestamps are in track
/// clock-rate units on a timeline starting at zero.
#[derive(Debug)]
pub struct Frame {
    pub keyframe: bool,
    pub pts: i64,
    pub dts: i64,
    pub duration: u32,
    /// Absolute presentation time, present once a sender report has been
    /// correlated.
    pub wall_pts_micros: Option<i64>,
    pub nalus: Vec<Vec<u8>>,
}

/// Stamps access units in arrival order. Only the previous RTP timestamp
/// and the accumulated timeline position are carried between calls; frames
/// are never reordered or delayed.
#[derive(Debug)]
pub struct FrameBuilder {
    clock_rate: u32,
    default_duration: u32,
    last_ts: Option<u32>,
    position: i64,
}

impl FrameBuilder {
    /// `default_duration` stands in until two frames establish a real
    /// timestamp delta. 1/25 s is a serviceable guess for live video.
    pub fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate,
            default_duration: (clock_rate / 25).max(1),
            last_ts: None,
            position: 0,
        }
    }

    pub fn with_default_duration(mut self, ticks: u32) -> Self {
        self.default_duration = ticks.max(1);
        self
    }

    pub fn push(&mut self, unit: AccessUnit, anchor: Option<WallClockAnchor>) -> Frame {
        let duration = match self.last_ts {
            None => self.default_duration,
            Some(last) => {
                // Wrap-safe signed delta; a backwards step keeps the default.
                let delta = unit.rtp_timestamp.wrapping_sub(last) as i32 as i64;
                self.position += delta;
                if delta > 0 {
                    delta as u32
                } else {
                    self.default_duration
                }
            }
        };
        self.last_ts = Some(unit.rtp_timestamp);

        let wall_pts_micros = anchor.map(|a| {
            let delta = unit.rtp_timestamp.wrapping_sub(a.rtp_timestamp) as i32 as i64;
            a.wall_micros + delta * 1_000_000 / self.clock_rate as i64
        });

        Frame {
            keyframe: unit.keyframe,
            pts: self.position,
            dts: self.position,
            duration,
            wall_pts_micros,
            nalus: unit.nalus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(ts: u32, keyframe: bool) -> AccessUnit {
        AccessUnit {
            rtp_timestamp: ts,
            nalus: vec![vec![if keyframe { 0x65 } else { 0x41 }, 0]],
            keyframe,
        }
    }

    #[test]
    fn timeline_starts_at_zero_and_accumulates() {
        let mut b = FrameBuilder::new(90_000);
        let f0 = b.push(unit(1_000_000, true), None);
        assert_eq!(f0.pts, 0);
        assert_eq!(f0.duration, 3600); // default until a delta exists
        let f1 = b.push(unit(1_003_600, false), None);
        assert_eq!(f1.pts, 3600);
        assert_eq!(f1.duration, 3600);
        assert_eq!(f1.dts, f1.pts);
    }

    #[test]
    fn timestamp_wrap_stays_monotonic() {
        let mut b = FrameBuilder::new(90_000);
        b.push(unit(u32::MAX - 1_799, true), None);
        let f = b.push(unit(1_800, false), None);
        assert_eq!(f.pts, 3600);
        assert_eq!(f.duration, 3600);
    }

    #[test]
    fn backwards_timestamp_keeps_default_duration() {
        let mut b = FrameBuilder::new(90_000);
        b.push(unit(10_000, true), None);
        let f = b.push(unit(9_000, false), None);
        assert_eq!(f.duration, 3600);
        assert_eq!(f.pts, -1000);
    }

    #[test]
    fn anchor_yields_wall_clock_pts() {
        let mut b = FrameBuilder::new(90_000);
        let anchor = WallClockAnchor {
            wall_micros: 1_700_000_000_000_000,
            rtp_timestamp: 90_000,
        };
        let f = b.push(unit(180_000, true), Some(anchor));
        // 90000 ticks past the anchor = exactly one second.
        assert_eq!(f.wall_pts_micros, Some(1_700_000_001_000_000));
    }

    #[test]
    fn no_anchor_means_no_wall_clock() {
        let mut b = FrameBuilder::new(90_000);
        let f = b.push(unit(5, true), None);
        assert!(f.wall_pts_micros.is_none());
    }
}
