use md5::{Digest, Md5};
use rand::RngExt;

use crate::error::{Result, RtspError};

/// Username/password pair supplied once by the caller, immutable afterward.
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// Digest challenge-response negotiator (RFC 2617 §3).
///
/// The server challenges with `WWW-Authenticate: Digest realm=..., nonce=...`
/// and the client answers with an `Authorization` header carrying a hash of
/// the credentials instead of the plaintext password:
///
/// ```text
/// HA1      = MD5(username:realm:password)
/// HA2      = MD5(method:uri)                      qop absent or "auth"
/// HA2      = MD5(method:uri:MD5(entity-body))     qop "auth-int"
/// response = MD5(HA1:nonce:HA2)                   qop absent
/// response = MD5(HA1:nonce:nc:cnonce:qop:HA2)     qop present
/// ```
///
/// The nonce-count `nc` increments on every [`respond`](Self::respond) call
/// under the same challenge and resets to zero when a new challenge replaces
/// the old one, so the server can detect request replays.
#[derive(Debug)]
pub struct DigestAuth {
    credential: Credential,
    realm: String,
    nonce: String,
    qop: String,
    stale: bool,
    nc: u32,
    cnonce: String,
}

impl DigestAuth {
    /// Create a negotiator with a random client nonce.
    pub fn new(credential: Credential) -> Self {
        let cnonce = format!("{:032x}", rand::rng().random::<u128>());
        Self::with_cnonce(credential, &cnonce)
    }

    /// Create a negotiator with a caller-supplied client nonce (tests, or
    /// callers that manage nonce material themselves).
    pub fn with_cnonce(credential: Credential, cnonce: &str) -> Self {
        Self {
            credential,
            realm: String::new(),
            nonce: String::new(),
            qop: String::new(),
            stale: false,
            nc: 0,
            cnonce: cnonce.to_string(),
        }
    }

    /// Whether a challenge has been installed yet.
    pub fn has_challenge(&self) -> bool {
        !self.nonce.is_empty()
    }

    /// Whether the last challenge flagged the previous nonce as expired
    /// (`stale=true`), meaning a retry with fresh nonce material is wanted
    /// rather than a credential failure.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Install a server challenge from a `WWW-Authenticate` header value,
    /// replacing any previous challenge wholesale and resetting the
    /// nonce-count (RFC 2617 §3.2.1).
    ///
    /// Directive order is free, unknown directives are ignored, and directive
    /// keys are matched case-sensitively. `stale` is true exactly when the
    /// server sends a `stale` directive valued `true` (value compared
    /// ASCII-case-insensitively, as header directive values are tokens).
    pub fn set_challenge(&mut self, header_value: &str) -> Result<()> {
        let space = header_value.find(' ').ok_or_else(|| {
            RtspError::Auth("malformed Digest challenge: no scheme separator".into())
        })?;
        let scheme = &header_value[..space];
        if scheme != "Digest" {
            return Err(RtspError::Auth(format!(
                "unsupported authentication scheme: {scheme}"
            )));
        }

        let mut realm = String::new();
        let mut nonce = String::new();
        let mut qop = String::new();
        let mut stale = false;

        for item in header_value[space + 1..].split(',') {
            let Some(eq) = item.find('=') else { continue };
            let key = item[..eq].trim();
            let value = item[eq + 1..].trim().trim_matches('"');
            match key {
                "realm" => realm = value.to_string(),
                "nonce" => nonce = value.to_string(),
                // The directive may list alternatives ("auth,auth-int");
                // keep the first one this client can compute.
                "qop" => {
                    qop = value
                        .split(',')
                        .map(str::trim)
                        .find(|q| matches!(*q, "auth" | "auth-int"))
                        .unwrap_or("")
                        .to_string();
                }
                "stale" => stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        tracing::debug!(%realm, qop = %qop, stale, "Digest challenge installed");

        self.realm = realm;
        self.nonce = nonce;
        self.qop = qop;
        self.stale = stale;
        self.nc = 0;
        Ok(())
    }

    /// Compute the `Authorization` header value for one request.
    ///
    /// Increments the nonce-count. Fails with [`RtspError::Auth`] when realm,
    /// nonce, method, or uri is empty — a response computed from incomplete
    /// parameters would be silently wrong.
    pub fn respond(&mut self, method: &str, uri: &str, entity_body: &[u8]) -> Result<String> {
        if self.realm.is_empty() {
            return Err(RtspError::Auth("realm is empty".into()));
        }
        if self.nonce.is_empty() {
            return Err(RtspError::Auth("nonce is empty".into()));
        }
        if method.is_empty() {
            return Err(RtspError::Auth("method is empty".into()));
        }
        if uri.is_empty() {
            return Err(RtspError::Auth("uri is empty".into()));
        }

        self.nc += 1;
        let response = self.compute_response(method, uri, entity_body);

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", ",
            self.credential.username, self.realm, self.nonce, uri
        );
        if self.qop.is_empty() {
            header.push_str(&format!("response=\"{response}\""));
        } else {
            header.push_str(&format!(
                "response=\"{response}\", qop={}, nc={:08x}, cnonce=\"{}\"",
                self.qop, self.nc, self.cnonce
            ));
        }
        Ok(header)
    }

    fn compute_response(&self, method: &str, uri: &str, entity_body: &[u8]) -> String {
        let ha1 = md5_hex(
            format!(
                "{}:{}:{}",
                self.credential.username, self.realm, self.credential.password
            )
            .as_bytes(),
        );

        let a2 = if self.qop == "auth-int" {
            format!("{}:{}:{}", method, uri, md5_hex(entity_body))
        } else {
            format!("{method}:{uri}")
        };
        let ha2 = md5_hex(a2.as_bytes());

        if self.qop.is_empty() {
            md5_hex(format!("{ha1}:{}:{ha2}", self.nonce).as_bytes())
        } else {
            md5_hex(
                format!(
                    "{ha1}:{}:{:08x}:{}:{}:{ha2}",
                    self.nonce, self.nc, self.cnonce, self.qop
                )
                .as_bytes(),
            )
        }
    }
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_with(cnonce: &str) -> DigestAuth {
        DigestAuth::with_cnonce(Credential::new("Mufasa", "Circle Of Life"), cnonce)
    }

    // --- Challenge parsing ---

    #[test]
    fn parse_challenge_any_order() {
        let mut a = auth_with("x");
        a.set_challenge("Digest qop=\"auth\", nonce=\"n1\", realm=\"r1\"")
            .unwrap();
        assert!(a.has_challenge());
        assert_eq!(a.realm, "r1");
        assert_eq!(a.nonce, "n1");
        assert_eq!(a.qop, "auth");
    }

    #[test]
    fn parse_challenge_ignores_unknown_directives() {
        let mut a = auth_with("x");
        a.set_challenge("Digest realm=\"r\", nonce=\"n\", opaque=\"zz\", algorithm=MD5")
            .unwrap();
        assert_eq!(a.realm, "r");
        assert_eq!(a.nonce, "n");
    }

    #[test]
    fn stale_true_only_when_server_says_true() {
        let mut a = auth_with("x");
        a.set_challenge("Digest realm=\"r\", nonce=\"n\", stale=\"TRUE\"")
            .unwrap();
        assert!(a.is_stale());

        // Some cameras send stale="FALSE"; that is not a stale nonce.
        a.set_challenge("Digest realm=\"r\", nonce=\"n2\", stale=\"FALSE\"")
            .unwrap();
        assert!(!a.is_stale());

        a.set_challenge("Digest realm=\"r\", nonce=\"n3\"").unwrap();
        assert!(!a.is_stale());
    }

    #[test]
    fn qop_list_picks_first_supported_token() {
        let mut a = auth_with("x");
        a.set_challenge("Digest realm=\"r\", nonce=\"n\", qop=\"auth,auth-int\"")
            .unwrap();
        assert_eq!(a.qop, "auth");
        let header = a.respond("DESCRIBE", "rtsp://cam/s", &[]).unwrap();
        assert!(header.contains("qop=auth,"));
        assert!(!header.contains("auth-int"));

        a.set_challenge("Digest realm=\"r\", nonce=\"n2\", qop=\"auth-int, auth\"")
            .unwrap();
        assert_eq!(a.qop, "auth-int");
    }

    #[test]
    fn unsupported_qop_list_falls_back_to_no_qop() {
        let mut a = auth_with("x");
        a.set_challenge("Digest realm=\"r\", nonce=\"n\", qop=\"token68\"")
            .unwrap();
        assert_eq!(a.qop, "");
        let header = a.respond("DESCRIBE", "rtsp://cam/s", &[]).unwrap();
        assert!(!header.contains("qop="));
    }

    #[test]
    fn rejects_non_digest_scheme() {
        let mut a = auth_with("x");
        assert!(a.set_challenge("Basic realm=\"r\"").is_err());
        assert!(a.set_challenge("Digest").is_err());
    }

    #[test]
    fn new_challenge_resets_nonce_count() {
        let mut a = auth_with("x");
        a.set_challenge("Digest realm=\"r\", nonce=\"n\", qop=\"auth\"")
            .unwrap();
        a.respond("DESCRIBE", "rtsp://cam/stream", &[]).unwrap();
        a.respond("DESCRIBE", "rtsp://cam/stream", &[]).unwrap();
        assert_eq!(a.nc, 2);
        a.set_challenge("Digest realm=\"r\", nonce=\"n2\", qop=\"auth\"")
            .unwrap();
        assert_eq!(a.nc, 0);
    }

    // --- Response computation ---

    /// RFC 2617 §3.5 worked example: the response hash is fully determined
    /// by the documented two-stage formula.
    #[test]
    fn rfc2617_known_vector() {
        let mut a = auth_with("0a4f113b");
        a.set_challenge(
            "Digest realm=\"testrealm@host.com\", qop=\"auth\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\"",
        )
        .unwrap();
        let header = a.respond("GET", "/dir/index.html", &[]).unwrap();
        assert!(header.contains("response=\"6629fae49393a05397450978507c4ef1\""));
        assert!(header.contains("nc=00000001"));
        assert!(header.contains("qop=auth"));
        assert!(header.contains("cnonce=\"0a4f113b\""));
    }

    #[test]
    fn no_qop_uses_short_formula() {
        let mut a = auth_with("unused");
        a.set_challenge("Digest realm=\"testrealm@host.com\", nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\"")
            .unwrap();
        let header = a.respond("GET", "/dir/index.html", &[]).unwrap();
        // MD5(HA1:nonce:HA2) with the RFC 2617 example inputs.
        assert!(header.contains("response=\"670fd8c2df070c60b045671b8b24ff02\""));
        assert!(!header.contains("nc="));
        assert!(!header.contains("cnonce="));
    }

    #[test]
    fn auth_int_hashes_entity_body() {
        let mut a = auth_with("0a4f113b");
        a.set_challenge("Digest realm=\"r\", nonce=\"n\", qop=\"auth-int\"")
            .unwrap();
        let with_body = a.respond("DESCRIBE", "rtsp://cam/s", b"body").unwrap();
        let mut b = auth_with("0a4f113b");
        b.set_challenge("Digest realm=\"r\", nonce=\"n\", qop=\"auth-int\"")
            .unwrap();
        let empty_body = b.respond("DESCRIBE", "rtsp://cam/s", &[]).unwrap();
        assert_ne!(with_body, empty_body);
    }

    #[test]
    fn missing_fields_are_errors() {
        let mut a = auth_with("x");
        assert!(a.respond("DESCRIBE", "rtsp://cam/s", &[]).is_err()); // no challenge

        a.set_challenge("Digest realm=\"r\", nonce=\"n\"").unwrap();
        assert!(a.respond("", "rtsp://cam/s", &[]).is_err());
        assert!(a.respond("DESCRIBE", "", &[]).is_err());
    }

    #[test]
    fn deterministic_given_same_inputs() {
        let mut a = auth_with("c1");
        a.set_challenge("Digest realm=\"r\", nonce=\"n\"").unwrap();
        let h1 = a.respond("PLAY", "rtsp://cam/s", &[]).unwrap();
        let h2 = a.respond("PLAY", "rtsp://cam/s", &[]).unwrap();
        // Without qop the nonce-count does not feed the hash.
        assert_eq!(h1, h2);
    }
}
