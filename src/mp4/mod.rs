//! Fragmented-MP4 serialization: one init segment (`ftyp` + `moov`) built
//! from the track parameters, then a `moof` + `mdat` pair per frame batch
//! (ISO/IEC 14496-12).

use crate::error::{Result, RtspError};
use crate::media::frame::Frame;
use crate::protocol::sdp::TrackInfo;

/// Movie-level timescale for `mvhd`. Track boxes use the RTP clock rate.
const MOVIE_TIMESCALE: u32 = 1000;
const TRACK_ID: u32 = 1;

/// Pixel dimensions written when the SDP does not announce any.
const FALLBACK_DIMENSIONS: (u32, u32) = (1920, 1080);

const MATRIX_IDENTITY: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// Sample flags for `trun` (ISO 14496-12 §8.8.3.1): sync sample vs.
/// non-sync depending on a prior sample.
const SAMPLE_FLAGS_KEY: u32 = 0x0200_0000;
const SAMPLE_FLAGS_NON_KEY: u32 = 0x0101_0000;

/// Append one box: the content is composed first, then the 4-byte size
/// (header included) and tag are prefixed. Sizes are always derived from
/// the bytes just written, never cached.
fn push_box(buf: &mut Vec<u8>, tag: &[u8; 4], fill: impl FnOnce(&mut Vec<u8>)) {
    let mut content = Vec::new();
    fill(&mut content);
    buf.extend_from_slice(&((8 + content.len()) as u32).to_be_bytes());
    buf.extend_from_slice(tag);
    buf.extend_from_slice(&content);
}

fn push_full_box_header(buf: &mut Vec<u8>, version: u8, flags: u32) {
    buf.extend_from_slice(&((version as u32) << 24 | (flags & 0x00ff_ffff)).to_be_bytes());
}

/// Accumulates timed frames and serializes them as fragments.
///
/// One muxer per stream: it owns the fragment sequence number and the
/// running base decode time, so segments are self-consistent as long as
/// they are written in production order.
pub struct Mp4Muxer {
    clock_rate: u32,
    dimensions: (u32, u32),
    sps: Vec<u8>,
    pps: Vec<u8>,
    sequence_number: u32,
    base_decode_time: u64,
    frames: Vec<Frame>,
}

impl Mp4Muxer {
    /// Parameter sets come from the SDP when announced, otherwise the
    /// caller extracts them from the first in-band parameter NAL units.
    pub fn new(track: &TrackInfo, sps: Vec<u8>, pps: Vec<u8>) -> Self {
        Self {
            clock_rate: track.clock_rate,
            dimensions: track.dimensions.unwrap_or(FALLBACK_DIMENSIONS),
            sps,
            pps,
            sequence_number: 0,
            base_decode_time: 0,
            frames: Vec::new(),
        }
    }

    /// Serialize the initialization segment: `ftyp` followed by a `moov`
    /// with a single video track and an empty sample table.
    pub fn init_segment(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1024);

        push_box(&mut buf, b"ftyp", |b| {
            b.extend_from_slice(b"iso5");
            b.extend_from_slice(&512u32.to_be_bytes());
            b.extend_from_slice(b"iso5");
            b.extend_from_slice(b"iso6");
            b.extend_from_slice(b"mp41");
        });

        push_box(&mut buf, b"moov", |moov| {
            self.push_mvhd(moov);
            self.push_trak(moov);
            push_box(moov, b"mvex", |mvex| {
                push_box(mvex, b"trex", |b| {
                    push_full_box_header(b, 0, 0);
                    b.extend_from_slice(&TRACK_ID.to_be_bytes());
                    b.extend_from_slice(&1u32.to_be_bytes()); // description index
                    b.extend_from_slice(&0u32.to_be_bytes()); // default duration
                    b.extend_from_slice(&0u32.to_be_bytes()); // default size
                    b.extend_from_slice(&0u32.to_be_bytes()); // default flags
                });
            });
        });

        tracing::debug!(bytes = buf.len(), "init segment built");
        buf
    }

    /// Queue one frame for the open segment. An empty NAL unit marks the
    /// whole batch corrupt; it is discarded and never reaches a segment.
    pub fn push_frame(&mut self, frame: Frame) -> Result<()> {
        if frame.nalus.iter().any(|n| n.is_empty()) {
            tracing::warn!(
                queued = self.frames.len(),
                "empty NAL unit, discarding open segment"
            );
            self.frames.clear();
            return Err(RtspError::CorruptFrame);
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Frames queued in the open segment.
    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    /// Drop the open segment without emitting it (used on shutdown).
    pub fn discard_pending(&mut self) {
        self.frames.clear();
    }

    /// Close the open segment and serialize it as `moof` + `mdat`.
    pub fn finalize_segment(&mut self) -> Result<Vec<u8>> {
        if self.frames.is_empty() {
            return Err(RtspError::EmptySegment);
        }

        // The trun data offset points past the moof header into mdat, and
        // the moof size does not depend on that value: build once to
        // measure, once more with the real offset.
        let moof_len = self.build_moof(0).len();
        let mut buf = self.build_moof(moof_len as i32 + 8);

        push_box(&mut buf, b"mdat", |b| {
            for frame in &self.frames {
                for nal in &frame.nalus {
                    b.extend_from_slice(&(nal.len() as u32).to_be_bytes());
                    b.extend_from_slice(nal);
                }
            }
        });

        let elapsed: u64 = self.frames.iter().map(|f| f.duration as u64).sum();
        self.base_decode_time += elapsed;
        self.sequence_number += 1;
        tracing::debug!(
            sequence = self.sequence_number,
            frames = self.frames.len(),
            bytes = buf.len(),
            "media segment finalized"
        );
        self.frames.clear();
        Ok(buf)
    }

    fn build_moof(&self, data_offset: i32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        push_box(&mut buf, b"moof", |moof| {
            push_box(moof, b"mfhd", |b| {
                push_full_box_header(b, 0, 0);
                b.extend_from_slice(&(self.sequence_number + 1).to_be_bytes());
            });
            push_box(moof, b"traf", |traf| {
                // default-base-is-moof
                push_box(traf, b"tfhd", |b| {
                    push_full_box_header(b, 0, 0x020000);
                    b.extend_from_slice(&TRACK_ID.to_be_bytes());
                });
                push_box(traf, b"tfdt", |b| {
                    push_full_box_header(b, 1, 0);
                    b.extend_from_slice(&self.base_decode_time.to_be_bytes());
                });
                // data-offset + per-sample duration/size/flags/cts
                push_box(traf, b"trun", |b| {
                    push_full_box_header(b, 0, 0x000f01);
                    b.extend_from_slice(&(self.frames.len() as u32).to_be_bytes());
                    b.extend_from_slice(&data_offset.to_be_bytes());
                    for frame in &self.frames {
                        let size: usize = frame.nalus.iter().map(|n| 4 + n.len()).sum();
                        let flags = if frame.keyframe {
                            SAMPLE_FLAGS_KEY
                        } else {
                            SAMPLE_FLAGS_NON_KEY
                        };
                        b.extend_from_slice(&frame.duration.to_be_bytes());
                        b.extend_from_slice(&(size as u32).to_be_bytes());
                        b.extend_from_slice(&flags.to_be_bytes());
                        b.extend_from_slice(&0u32.to_be_bytes()); // cts
                    }
                });
                push_box(traf, b"sdtp", |b| {
                    push_full_box_header(b, 0, 0);
                    for frame in &self.frames {
                        // depends-on / is-depended-on bits
                        b.push(if frame.keyframe { 0x24 } else { 0x10 });
                    }
                });
            });
        });
        buf
    }

    fn push_mvhd(&self, moov: &mut Vec<u8>) {
        push_box(moov, b"mvhd", |b| {
            push_full_box_header(b, 0, 0);
            b.extend_from_slice(&0u32.to_be_bytes()); // creation time
            b.extend_from_slice(&0u32.to_be_bytes()); // modification time
            b.extend_from_slice(&MOVIE_TIMESCALE.to_be_bytes());
            b.extend_from_slice(&0u32.to_be_bytes()); // duration (live)
            b.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
            b.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
            b.extend_from_slice(&[0u8; 10]); // reserved
            for w in MATRIX_IDENTITY {
                b.extend_from_slice(&w.to_be_bytes());
            }
            b.extend_from_slice(&[0u8; 24]); // pre_defined
            b.extend_from_slice(&2u32.to_be_bytes()); // next track id
        });
    }

    fn push_trak(&self, moov: &mut Vec<u8>) {
        let (width, height) = self.dimensions;
        push_box(moov, b"trak", |trak| {
            // enabled + in movie
            push_box(trak, b"tkhd", |b| {
                push_full_box_header(b, 0, 3);
                b.extend_from_slice(&0u32.to_be_bytes()); // creation time
                b.extend_from_slice(&0u32.to_be_bytes()); // modification time
                b.extend_from_slice(&TRACK_ID.to_be_bytes());
                b.extend_from_slice(&0u32.to_be_bytes()); // reserved
                b.extend_from_slice(&0u32.to_be_bytes()); // duration
                b.extend_from_slice(&[0u8; 8]); // reserved
                b.extend_from_slice(&0u16.to_be_bytes()); // layer
                b.extend_from_slice(&0u16.to_be_bytes()); // alternate group
                b.extend_from_slice(&0u16.to_be_bytes()); // volume (video)
                b.extend_from_slice(&0u16.to_be_bytes()); // reserved
                for w in MATRIX_IDENTITY {
                    b.extend_from_slice(&w.to_be_bytes());
                }
                b.extend_from_slice(&(width << 16).to_be_bytes()); // 16.16 fixed
                b.extend_from_slice(&(height << 16).to_be_bytes());
            });
            push_box(trak, b"mdia", |mdia| {
                push_box(mdia, b"mdhd", |b| {
                    push_full_box_header(b, 0, 0);
                    b.extend_from_slice(&0u32.to_be_bytes());
                    b.extend_from_slice(&0u32.to_be_bytes());
                    b.extend_from_slice(&self.clock_rate.to_be_bytes());
                    b.extend_from_slice(&0u32.to_be_bytes());
                    b.extend_from_slice(&0x55c4u16.to_be_bytes()); // und
                    b.extend_from_slice(&0u16.to_be_bytes());
                });
                push_box(mdia, b"hdlr", |b| {
                    push_full_box_header(b, 0, 0);
                    b.extend_from_slice(&0u32.to_be_bytes());
                    b.extend_from_slice(b"vide");
                    b.extend_from_slice(&[0u8; 12]); // reserved
                    b.extend_from_slice(b"VideoHandler\0");
                });
                push_box(mdia, b"minf", |minf| {
                    push_box(minf, b"vmhd", |b| {
                        push_full_box_header(b, 0, 1);
                        b.extend_from_slice(&[0u8; 8]); // graphicsmode + opcolor
                    });
                    push_box(minf, b"dinf", |dinf| {
                        push_box(dinf, b"dref", |b| {
                            push_full_box_header(b, 0, 0);
                            b.extend_from_slice(&1u32.to_be_bytes());
                            push_box(b, b"url ", |u| {
                                push_full_box_header(u, 0, 1); // self-contained
                            });
                        });
                    });
                    self.push_stbl(minf);
                });
            });
        });
    }

    fn push_stbl(&self, minf: &mut Vec<u8>) {
        push_box(minf, b"stbl", |stbl| {
            push_box(stbl, b"stsd", |b| {
                push_full_box_header(b, 0, 0);
                b.extend_from_slice(&1u32.to_be_bytes());
                self.push_avc1(b);
            });
            for tag in [b"stts", b"stsc", b"stco"] {
                push_box(stbl, tag, |b| {
                    push_full_box_header(b, 0, 0);
                    b.extend_from_slice(&0u32.to_be_bytes()); // entry count
                });
            }
            push_box(stbl, b"stsz", |b| {
                push_full_box_header(b, 0, 0);
                b.extend_from_slice(&0u32.to_be_bytes()); // sample size
                b.extend_from_slice(&0u32.to_be_bytes()); // sample count
            });
        });
    }

    fn push_avc1(&self, stsd: &mut Vec<u8>) {
        let (width, height) = self.dimensions;
        push_box(stsd, b"avc1", |b| {
            b.extend_from_slice(&[0u8; 6]); // reserved
            b.extend_from_slice(&1u16.to_be_bytes()); // data reference index
            b.extend_from_slice(&[0u8; 16]); // pre_defined + reserved
            b.extend_from_slice(&(width as u16).to_be_bytes());
            b.extend_from_slice(&(height as u16).to_be_bytes());
            b.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // 72 dpi
            b.extend_from_slice(&0x0048_0000u32.to_be_bytes());
            b.extend_from_slice(&0u32.to_be_bytes()); // reserved
            b.extend_from_slice(&1u16.to_be_bytes()); // frame count
            b.extend_from_slice(&[0u8; 32]); // compressor name
            b.extend_from_slice(&0x0018u16.to_be_bytes()); // depth
            b.extend_from_slice(&0xffffu16.to_be_bytes()); // pre_defined
            self.push_avcc(b);
        });
    }

    /// AVCDecoderConfigurationRecord from the SPS and PPS (ISO 14496-15).
    fn push_avcc(&self, avc1: &mut Vec<u8>) {
        push_box(avc1, b"avcC", |b| {
            b.push(1); // configuration version
            // profile / compatibility / level come from the SPS itself
            b.push(self.sps.get(1).copied().unwrap_or(0));
            b.push(self.sps.get(2).copied().unwrap_or(0));
            b.push(self.sps.get(3).copied().unwrap_or(0));
            b.push(0xff); // 4-byte NAL length prefixes
            b.push(0xe1); // one SPS
            b.extend_from_slice(&(self.sps.len() as u16).to_be_bytes());
            b.extend_from_slice(&self.sps);
            b.push(1); // one PPS
            b.extend_from_slice(&(self.pps.len() as u16).to_be_bytes());
            b.extend_from_slice(&self.pps);
        });
    }
}
