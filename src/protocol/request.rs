/// RTSP method verbs used by a pull client (RFC 2326 §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
    GetParameter,
}

impl Method {
    /// The wire spelling of the method token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
        }
    }
}

/// An outgoing RTSP request (RFC 2326 §6).
///
/// Serializes to the standard text format:
///
/// ```text
/// DESCRIBE rtsp://camera/stream RTSP/1.0\r\n
/// CSeq: 2\r\n
/// User-Agent: rtsp-mux/0.1\r\n
/// Accept: application/sdp\r\n
/// \r\n
/// ```
///
/// Uses a builder pattern — chain [`add_header`](Self::add_header), then call
/// [`serialize`](Self::serialize). CSeq and User-Agent are always present.
#[must_use]
pub struct RtspRequest {
    pub method: Method,
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    pub fn new(method: Method, uri: &str, cseq: u32) -> Self {
        RtspRequest {
            method,
            uri: uri.to_string(),
            headers: vec![
                ("CSeq".to_string(), cseq.to_string()),
                ("User-Agent".to_string(), super::USER_AGENT.to_string()),
            ],
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        let mut request = format!("{} {} RTSP/1.0\r\n", self.method.as_str(), self.uri);
        for (name, value) in &self.headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request.push_str("\r\n");
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_options() {
        let req = RtspRequest::new(Method::Options, "rtsp://localhost:8554/stream", 1);
        let s = req.serialize();
        assert!(s.starts_with("OPTIONS rtsp://localhost:8554/stream RTSP/1.0\r\n"));
        assert!(s.contains("CSeq: 1\r\n"));
        assert!(s.contains("User-Agent: rtsp-mux/0.1\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn serialize_setup_with_transport() {
        let req = RtspRequest::new(Method::Setup, "rtsp://localhost/stream/track1", 3)
            .add_header("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1");
        let s = req.serialize();
        assert!(s.starts_with("SETUP rtsp://localhost/stream/track1 RTSP/1.0\r\n"));
        assert!(s.contains("Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n"));
    }

    #[test]
    fn method_tokens() {
        assert_eq!(Method::GetParameter.as_str(), "GET_PARAMETER");
        assert_eq!(Method::Teardown.as_str(), "TEARDOWN");
    }
}
