use base64::prelude::{BASE64_STANDARD, Engine as _};

/// Track configuration extracted from the DESCRIBE session description.
///
/// Created once from the first video media block, completed by SETUP (which
/// fills the negotiated transport), and read-only for every downstream stage.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// Media type from the `m=` line (`video`).
    pub media: String,
    /// Dynamic RTP payload type (RFC 3551, typically 96).
    pub payload_type: u8,
    /// Codec name from `a=rtpmap` (`H264`).
    pub codec: String,
    /// RTP clock rate in Hz from `a=rtpmap` (90000 for video).
    pub clock_rate: u32,
    /// Track control URI from `a=control`, relative or absolute.
    pub control: String,
    /// Sequence parameter set from `sprop-parameter-sets`, if announced.
    pub sps: Option<Vec<u8>>,
    /// Picture parameter set from `sprop-parameter-sets`, if announced.
    pub pps: Option<Vec<u8>>,
    /// Pixel dimensions from `a=x-dimensions`, if announced.
    pub dimensions: Option<(u32, u32)>,
}

impl TrackInfo {
    /// Resolve the track control URI against the presentation base URI.
    pub fn control_uri(&self, base: &str) -> String {
        if self.control.starts_with("rtsp://") {
            self.control.clone()
        } else {
            format!("{}/{}", base.trim_end_matches('/'), self.control)
        }
    }
}

/// Parse the minimum SDP subset needed to configure a video track
/// (RFC 2327 lines `m=`, `a=rtpmap`, `a=fmtp`, `a=control`).
///
/// Only the first `m=video` block is considered — this is a single-stream
/// client. Attributes outside that block (session-level `a=control` etc.)
/// are ignored. Returns `None` when no video media is announced.
pub fn parse_video_track(sdp: &str) -> Option<TrackInfo> {
    let mut in_video = false;
    let mut track: Option<TrackInfo> = None;

    for line in sdp.lines() {
        let line = line.trim_end();
        if let Some(media) = line.strip_prefix("m=") {
            if track.is_some() {
                break; // next media block ends the video one
            }
            // `m=video 0 RTP/AVP 96`
            let mut parts = media.split_whitespace();
            let kind = parts.next().unwrap_or("");
            in_video = kind == "video";
            if in_video {
                let payload_type = parts.nth(2).and_then(|p| p.parse().ok()).unwrap_or(96);
                track = Some(TrackInfo {
                    media: kind.to_string(),
                    payload_type,
                    codec: String::new(),
                    clock_rate: 90000,
                    control: String::new(),
                    sps: None,
                    pps: None,
                    dimensions: None,
                });
            }
            continue;
        }

        if !in_video {
            continue;
        }
        let Some(t) = track.as_mut() else { continue };

        if let Some(rtpmap) = line.strip_prefix("a=rtpmap:") {
            // `96 H264/90000`
            let mut parts = rtpmap.split_whitespace();
            let pt: u8 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
            if pt == t.payload_type {
                if let Some(codec_clock) = parts.next() {
                    let mut cc = codec_clock.split('/');
                    t.codec = cc.next().unwrap_or("").to_string();
                    t.clock_rate = cc.next().and_then(|c| c.parse().ok()).unwrap_or(90000);
                }
            }
        } else if let Some(control) = line.strip_prefix("a=control:") {
            t.control = control.to_string();
        } else if let Some(fmtp) = line.strip_prefix("a=fmtp:") {
            parse_fmtp(fmtp, t);
        } else if let Some(dim) = line.strip_prefix("a=x-dimensions:") {
            // `1920,1080` — vendor attribute carried by many IP cameras.
            let mut parts = dim.split(',');
            let w = parts.next().and_then(|v| v.trim().parse().ok());
            let h = parts.next().and_then(|v| v.trim().parse().ok());
            if let (Some(w), Some(h)) = (w, h) {
                t.dimensions = Some((w, h));
            }
        }
    }

    if let Some(t) = &track {
        tracing::debug!(
            codec = %t.codec,
            payload_type = t.payload_type,
            clock_rate = t.clock_rate,
            control = %t.control,
            has_sprop = t.sps.is_some(),
            "video track parsed from SDP"
        );
    }
    track
}

/// Extract `sprop-parameter-sets` from an fmtp line (RFC 6184 §8.1):
/// base64 SPS and PPS separated by a comma.
fn parse_fmtp(fmtp: &str, track: &mut TrackInfo) {
    let Some((pt, params)) = fmtp.split_once(' ') else {
        return;
    };
    if pt.trim().parse::<u8>().ok() != Some(track.payload_type) {
        return;
    }
    for param in params.split(';') {
        let param = param.trim();
        if let Some(sets) = param.strip_prefix("sprop-parameter-sets=") {
            let mut parts = sets.split(',');
            track.sps = parts.next().and_then(|s| BASE64_STANDARD.decode(s).ok());
            track.pps = parts.next().and_then(|s| BASE64_STANDARD.decode(s).ok());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\n\
        o=- 0 0 IN IP4 10.0.0.5\r\n\
        s=Stream\r\n\
        t=0 0\r\n\
        m=video 0 RTP/AVP 96\r\n\
        a=rtpmap:96 H264/90000\r\n\
        a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAHukBQHsg,aM4xUg==\r\n\
        a=control:track1\r\n\
        a=x-dimensions:1920,1080\r\n";

    #[test]
    fn parse_full_video_block() {
        let t = parse_video_track(SDP).expect("video track");
        assert_eq!(t.media, "video");
        assert_eq!(t.payload_type, 96);
        assert_eq!(t.codec, "H264");
        assert_eq!(t.clock_rate, 90000);
        assert_eq!(t.control, "track1");
        assert_eq!(t.dimensions, Some((1920, 1080)));
        assert_eq!(t.sps.as_deref(), Some(&[0x67, 0x42, 0x00, 0x1e, 0xe9, 0x01, 0x40, 0x7b, 0x20][..]));
        assert_eq!(t.pps.as_deref(), Some(&[0x68, 0xce, 0x31, 0x52][..]));
    }

    #[test]
    fn relative_control_resolved_against_base() {
        let t = parse_video_track(SDP).unwrap();
        assert_eq!(
            t.control_uri("rtsp://cam:554/stream/"),
            "rtsp://cam:554/stream/track1"
        );
    }

    #[test]
    fn absolute_control_kept() {
        let sdp = "m=video 0 RTP/AVP 96\r\na=control:rtsp://cam/stream/track=1\r\n";
        let t = parse_video_track(sdp).unwrap();
        assert_eq!(t.control_uri("rtsp://other/"), "rtsp://cam/stream/track=1");
    }

    #[test]
    fn audio_only_sdp_yields_none() {
        let sdp = "v=0\r\nm=audio 0 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";
        assert!(parse_video_track(sdp).is_none());
    }

    #[test]
    fn stops_at_next_media_block() {
        let sdp = "m=video 0 RTP/AVP 96\r\n\
                   a=control:track1\r\n\
                   m=audio 0 RTP/AVP 0\r\n\
                   a=control:track2\r\n";
        let t = parse_video_track(sdp).unwrap();
        assert_eq!(t.control, "track1");
    }
}
