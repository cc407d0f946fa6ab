use crate::error::{ParseErrorKind, RtspError};

/// A parsed RTSP response (RFC 2326 §7).
///
/// RTSP responses follow HTTP/1.1 syntax:
///
/// ```text
/// RTSP-Version SP Status-Code SP Reason-Phrase CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. The body, when
/// present, is read separately by the caller using `Content-Length` and
/// attached via [`with_body`](Self::with_body) — the header block and the
/// body arrive in different reads on a buffered stream.
#[derive(Debug)]
pub struct RtspResponse {
    /// Numeric status code (e.g. 200, 401, 454).
    pub status_code: u16,
    /// Reason phrase (e.g. `OK`, `Unauthorized`).
    pub reason: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Message body (SDP for DESCRIBE), if any.
    pub body: Option<String>,
}

impl RtspResponse {
    /// Parse an RTSP response header block from its text representation.
    ///
    /// Expects the status line, headers, and trailing blank line. Returns
    /// [`RtspError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines();

        let status_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyResponse,
        })?;

        // `RTSP/1.0 200 OK` — the reason phrase may itself contain spaces.
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        let code = parts.next().unwrap_or("");
        let reason = parts.next().unwrap_or("").to_string();

        if !version.starts_with("RTSP/") {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidStatusLine,
            });
        }
        let status_code: u16 = code.parse().map_err(|_| RtspError::Parse {
            kind: ParseErrorKind::InvalidStatusLine,
        })?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon_pos = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();
            headers.push((name, value));
        }

        Ok(RtspResponse {
            status_code,
            reason,
            headers,
            body: None,
        })
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value parsed as a number (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq").and_then(|v| v.trim().parse().ok())
    }

    /// Declared body length from `Content-Length`, zero when absent.
    pub fn content_length(&self) -> usize {
        self.get_header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status_code == 401
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ok_response() {
        let raw = "RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.reason, "OK");
        assert_eq!(resp.cseq(), Some(1));
        assert_eq!(resp.get_header("Public"), Some("OPTIONS, DESCRIBE"));
        assert!(resp.is_ok());
    }

    #[test]
    fn parse_unauthorized_with_challenge() {
        let raw = "RTSP/1.0 401 Unauthorized\r\n\
                   CSeq: 2\r\n\
                   WWW-Authenticate: Digest realm=\"cam\", nonce=\"abc\"\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert!(resp.is_unauthorized());
        assert_eq!(
            resp.get_header("www-authenticate"),
            Some("Digest realm=\"cam\", nonce=\"abc\"")
        );
    }

    #[test]
    fn parse_multiword_reason() {
        let resp = RtspResponse::parse("RTSP/1.0 454 Session Not Found\r\n\r\n").unwrap();
        assert_eq!(resp.status_code, 454);
        assert_eq!(resp.reason, "Session Not Found");
    }

    #[test]
    fn content_length_lookup() {
        let raw = "RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: 142\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.content_length(), 142);
    }

    #[test]
    fn parse_empty_response() {
        assert!(RtspResponse::parse("").is_err());
    }

    #[test]
    fn parse_non_rtsp_status_line() {
        assert!(RtspResponse::parse("HTTP/1.1 200 OK\r\n\r\n").is_err());
        assert!(RtspResponse::parse("RTSP/1.0 abc OK\r\n\r\n").is_err());
    }
}
