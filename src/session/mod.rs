//! RTSP client session state machine (RFC 2326 §A.1, client view).
//!
//! The session drives the method sequence against a single server:
//!
//! ```text
//! Init      --DESCRIBE ok-->  Described
//! Described --SETUP ok----->  SetUp      (captures TrackInfo + session id)
//! SetUp     --PLAY ok------>  Playing
//! Playing  <--PAUSE/PLAY-->   Paused
//! any non-terminal --TEARDOWN or stop--> TornDown
//! ```
//!
//! Transitions happen only on successful server responses. A method that is
//! not the current state's legal next step fails with
//! [`RtspError::ProtocolState`] before any bytes are written. On a 401 with
//! a Digest challenge the request is transparently reissued once; a second
//! 401 is terminal. Request/response pairs are matched by CSeq — a mismatch
//! is [`RtspError::ProtocolSync`] and forces TornDown.

pub mod transport;

use std::io::{Read, Write};

use crate::error::{Result, RtspError};
use crate::protocol::{Credential, DigestAuth, Method, RtspRequest, RtspResponse, TrackInfo};
pub use transport::{TransportMode, TransportPreference, parse_session_header};

/// Keep-alive bound assumed when the server advertises none (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// Client-side RTSP session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Described,
    SetUp,
    Playing,
    Paused,
    TornDown,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::Described => "Described",
            Self::SetUp => "SetUp",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::TornDown => "TornDown",
        }
    }
}

/// A client session over a control stream `S`.
///
/// Generic over the stream so the state machine is testable against an
/// in-memory transcript; production use is `RtspSession<TcpStream>` with a
/// read timeout installed on the socket (timeouts surface as
/// [`RtspError::ProtocolTimeout`]).
pub struct RtspSession<S: Read + Write> {
    stream: S,
    url: String,
    state: SessionState,
    cseq: u32,
    auth: Option<DigestAuth>,
    session_id: Option<String>,
    timeout_secs: u64,
    track: Option<TrackInfo>,
    transport: Option<TransportMode>,
}

impl<S: Read + Write> RtspSession<S> {
    pub fn new(stream: S, url: &str, credential: Option<Credential>) -> Self {
        Self {
            stream,
            url: url.to_string(),
            state: SessionState::Init,
            cseq: 0,
            auth: credential.map(DigestAuth::new),
            session_id: None,
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            track: None,
            transport: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Keep-alive bound advertised by the server (or the RFC default).
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Track configuration, available once DESCRIBE has succeeded.
    pub fn track(&self) -> Option<&TrackInfo> {
        self.track.as_ref()
    }

    /// Negotiated delivery mode, available once SETUP has succeeded.
    pub fn transport(&self) -> Option<TransportMode> {
        self.transport
    }

    // --- Method sequence ---

    /// OPTIONS — legal in any non-terminal state, no transition.
    pub fn options(&mut self) -> Result<()> {
        self.require(Method::Options, &[])?;
        self.exchange(Method::Options, &self.url.clone(), &[])?;
        Ok(())
    }

    /// DESCRIBE — Init → Described; parses the SDP body into [`TrackInfo`].
    pub fn describe(&mut self) -> Result<()> {
        self.require(Method::Describe, &[SessionState::Init])?;
        let url = self.url.clone();
        let resp = self.exchange(
            Method::Describe,
            &url,
            &[("Accept", "application/sdp")],
        )?;
        let sdp = resp.body.as_deref().unwrap_or("");
        let track = crate::protocol::sdp::parse_video_track(sdp).ok_or(RtspError::Parse {
            kind: crate::error::ParseErrorKind::EmptyResponse,
        })?;
        tracing::info!(codec = %track.codec, clock_rate = track.clock_rate, "stream described");
        self.track = Some(track);
        self.transition(SessionState::Described);
        Ok(())
    }

    /// SETUP — Described → SetUp; negotiates the transport and captures the
    /// session id plus keep-alive timeout.
    pub fn setup(&mut self, preference: TransportPreference) -> Result<()> {
        self.require(Method::Setup, &[SessionState::Described])?;
        let track = self.track.as_ref().ok_or(RtspError::ProtocolState {
            method: Method::Setup.as_str(),
            state: self.state.as_str(),
        })?;
        let uri = track.control_uri(&self.url);
        let transport_header = preference.header_value();
        let resp = self.exchange(Method::Setup, &uri, &[("Transport", &transport_header)])?;

        let session_value = resp.get_header("Session").ok_or(RtspError::Parse {
            kind: crate::error::ParseErrorKind::InvalidHeader,
        })?;
        let (id, timeout) = parse_session_header(session_value);
        self.session_id = Some(id);
        if let Some(t) = timeout {
            self.timeout_secs = t;
        }

        let mode = resp
            .get_header("Transport")
            .map(|h| TransportMode::parse(h, preference))
            .unwrap_or_else(|| TransportMode::parse("", preference));
        tracing::info!(?mode, session_id = %self.session_id.as_deref().unwrap_or(""), "transport negotiated");
        self.transport = Some(mode);
        self.transition(SessionState::SetUp);
        Ok(())
    }

    /// PLAY — SetUp/Paused → Playing.
    pub fn play(&mut self) -> Result<()> {
        self.require(Method::Play, &[SessionState::SetUp, SessionState::Paused])?;
        let url = self.url.clone();
        let extra: &[(&str, &str)] = if self.state == SessionState::SetUp {
            &[("Range", "npt=0.000-")]
        } else {
            &[]
        };
        self.exchange(Method::Play, &url, extra)?;
        self.transition(SessionState::Playing);
        Ok(())
    }

    /// PAUSE — Playing → Paused.
    pub fn pause(&mut self) -> Result<()> {
        self.require(Method::Pause, &[SessionState::Playing])?;
        let url = self.url.clone();
        self.exchange(Method::Pause, &url, &[])?;
        self.transition(SessionState::Paused);
        Ok(())
    }

    /// GET_PARAMETER keep-alive — legal once a session exists, no transition.
    ///
    /// In interleaved mode the reply shares the stream with media data and is
    /// consumed by the interleaved reader's resync scan, so `wait_for_reply`
    /// must be false there; in UDP mode the control connection is quiet and
    /// the reply is read normally.
    pub fn keep_alive(&mut self, wait_for_reply: bool) -> Result<()> {
        self.require(
            Method::GetParameter,
            &[SessionState::SetUp, SessionState::Playing, SessionState::Paused],
        )?;
        let url = self.url.clone();
        if wait_for_reply {
            match self.exchange(Method::GetParameter, &url, &[]) {
                // Servers that do not implement GET_PARAMETER still accept
                // OPTIONS as a liveness signal.
                Err(RtspError::Status { code: 405 | 501, .. }) => {
                    self.exchange(Method::Options, &url, &[])?;
                }
                Err(e) => return Err(e),
                Ok(_) => {}
            }
        } else {
            self.send_request(Method::GetParameter, &url, &[])?;
        }
        tracing::trace!("keep-alive sent");
        Ok(())
    }

    /// TEARDOWN — any non-terminal state → TornDown.
    ///
    /// Best-effort: the request is sent and the state becomes TornDown even
    /// when the reply cannot be read (stop paths tear down over streams that
    /// still carry interleaved data).
    pub fn teardown(&mut self) -> Result<()> {
        if self.state == SessionState::TornDown {
            return Ok(());
        }
        let url = self.url.clone();
        let result = self.send_request(Method::Teardown, &url, &[]);
        self.transition(SessionState::TornDown);
        result.map(|_| ())
    }

    // --- Internals ---

    /// Enforce the legal-edge rule: `allowed` lists the states the method may
    /// be issued from (empty = any non-terminal). Nothing is sent on failure.
    fn require(&self, method: Method, allowed: &[SessionState]) -> Result<()> {
        if self.state == SessionState::TornDown
            || (!allowed.is_empty() && !allowed.contains(&self.state))
        {
            return Err(RtspError::ProtocolState {
                method: method.as_str(),
                state: self.state.as_str(),
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = self.state.as_str(), to = next.as_str(), "state transition");
        self.state = next;
    }

    /// One request/response round trip with CSeq matching and a single
    /// transparent retry on a Digest challenge. A further 401 that carries
    /// `stale=true` means the nonce expired (credentials were fine), which
    /// earns one more retry with the fresh nonce; any other repeat 401 is a
    /// terminal credential rejection.
    fn exchange(
        &mut self,
        method: Method,
        uri: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<RtspResponse> {
        let mut challenged = false;
        let mut stale_retry_used = false;
        loop {
            let sent = self.send_request(method, uri, extra_headers)?;
            let resp = self.read_response()?;
            self.check_cseq(sent, &resp)?;

            if !resp.is_unauthorized() {
                return self.check_status(resp);
            }

            let challenge = resp
                .get_header("WWW-Authenticate")
                .ok_or(RtspError::AuthFailed)?
                .to_string();
            let auth = self.auth.as_mut().ok_or(RtspError::AuthFailed)?;
            auth.set_challenge(&challenge)?;

            if !challenged {
                challenged = true;
                tracing::debug!(method = method.as_str(), "retrying with Digest credentials");
                continue;
            }
            if auth.is_stale() && !stale_retry_used {
                stale_retry_used = true;
                tracing::debug!(method = method.as_str(), "nonce expired, retrying once");
                continue;
            }
            self.transition(SessionState::TornDown);
            return Err(RtspError::AuthFailed);
        }
    }

    /// Serialize and write one request; returns the CSeq used.
    fn send_request(
        &mut self,
        method: Method,
        uri: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<u32> {
        self.cseq += 1;
        let mut request = RtspRequest::new(method, uri, self.cseq);
        if let Some(id) = &self.session_id {
            request = request.add_header("Session", id);
        }
        if let Some(auth) = self.auth.as_mut()
            && auth.has_challenge()
        {
            let value = auth.respond(method.as_str(), uri, &[])?;
            request = request.add_header("Authorization", &value);
        }
        for (name, value) in extra_headers {
            request = request.add_header(name, value);
        }

        tracing::debug!(method = method.as_str(), uri, cseq = self.cseq, "request");
        self.stream
            .write_all(request.serialize().as_bytes())
            .map_err(map_io)?;
        Ok(self.cseq)
    }

    /// Read one response: header block then `Content-Length` body bytes.
    ///
    /// Reads byte-wise so that nothing past the blank line (which may be
    /// interleaved media data once PLAY succeeds) is consumed into a buffer
    /// the transport layer can no longer see.
    fn read_response(&mut self) -> Result<RtspResponse> {
        let mut head = Vec::with_capacity(512);
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(RtspError::Closed),
                Ok(_) => head.push(byte[0]),
                Err(e) => return Err(map_io(e)),
            }
            if head.len() > 16 * 1024 {
                return Err(RtspError::Parse {
                    kind: crate::error::ParseErrorKind::InvalidHeader,
                });
            }
        }

        let text = String::from_utf8_lossy(&head);
        let mut resp = RtspResponse::parse(&text)?;

        let len = resp.content_length();
        if len > 0 {
            let mut body = vec![0u8; len];
            self.stream.read_exact(&mut body).map_err(map_io)?;
            resp = resp.with_body(String::from_utf8_lossy(&body).into_owned());
        }

        tracing::debug!(status = resp.status_code, cseq = ?resp.cseq(), "response");
        Ok(resp)
    }

    fn check_cseq(&mut self, sent: u32, resp: &RtspResponse) -> Result<()> {
        let received = resp.cseq().unwrap_or(0);
        if received != sent {
            tracing::warn!(sent, received, "CSeq mismatch, tearing down");
            self.transition(SessionState::TornDown);
            return Err(RtspError::ProtocolSync { sent, received });
        }
        Ok(())
    }

    fn check_status(&self, resp: RtspResponse) -> Result<RtspResponse> {
        if resp.is_ok() {
            Ok(resp)
        } else {
            Err(RtspError::Status {
                code: resp.status_code,
                reason: resp.reason,
            })
        }
    }
}

fn map_io(e: std::io::Error) -> RtspError {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
            RtspError::ProtocolTimeout
        }
        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset => {
            RtspError::Closed
        }
        _ => RtspError::Io(e),
    }
}
