/// Client-side delivery preference, chosen once before SETUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPreference {
    /// RTP/RTCP interleaved on the control connection (RFC 2326 §10.12).
    TcpInterleaved,
    /// Dual datagram sockets; RTP on the even port, RTCP on the odd one
    /// (RFC 3550 §11).
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
    },
}

impl TransportPreference {
    /// The `Transport` request header value announcing this preference
    /// (RFC 2326 §12.39).
    pub fn header_value(&self) -> String {
        match self {
            Self::TcpInterleaved => "RTP/AVP/TCP;unicast;interleaved=0-1".to_string(),
            Self::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => format!("RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port}"),
        }
    }
}

/// Negotiated RTP/RTCP delivery parameters from the SETUP response
/// (RFC 2326 §12.39). Immutable once captured.
///
/// ## Wire format examples
///
/// ```text
/// Transport: RTP/AVP/TCP;unicast;interleaved=0-1
/// Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Interleaved binary framing on the control connection.
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
    /// Dual-socket UDP delivery.
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
        server_rtp_port: u16,
        server_rtcp_port: u16,
    },
}

impl TransportMode {
    /// Parse the server's `Transport` response header. Falls back to the
    /// channels/ports the client requested when the server echoes nothing
    /// (some cameras omit parameters they accepted verbatim).
    pub fn parse(header: &str, requested: TransportPreference) -> Self {
        let mut interleaved: Option<(u8, u8)> = None;
        let mut server_port: Option<(u16, u16)> = None;
        let mut client_port: Option<(u16, u16)> = None;

        for part in header.split(';') {
            let part = part.trim();
            if let Some(pair) = part.strip_prefix("interleaved=") {
                interleaved = parse_pair(pair);
            } else if let Some(pair) = part.strip_prefix("server_port=") {
                server_port = parse_pair(pair);
            } else if let Some(pair) = part.strip_prefix("client_port=") {
                client_port = parse_pair(pair);
            }
        }

        match requested {
            TransportPreference::TcpInterleaved => {
                let (rtp, rtcp) = interleaved.unwrap_or((0, 1));
                TransportMode::Interleaved {
                    rtp_channel: rtp,
                    rtcp_channel: rtcp,
                }
            }
            TransportPreference::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => {
                let (client_rtp, client_rtcp) =
                    client_port.unwrap_or((client_rtp_port, client_rtcp_port));
                let (server_rtp, server_rtcp) = server_port.unwrap_or((0, 0));
                TransportMode::Udp {
                    client_rtp_port: client_rtp,
                    client_rtcp_port: client_rtcp,
                    server_rtp_port: server_rtp,
                    server_rtcp_port: server_rtcp,
                }
            }
        }
    }
}

fn parse_pair<T: std::str::FromStr + Copy>(pair: &str) -> Option<(T, T)> {
    let (a, b) = pair.split_once('-')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Parsed `Session` response header: id plus optional keep-alive timeout
/// (RFC 2326 §12.37), e.g. `"28fde31;timeout=60"`.
pub fn parse_session_header(value: &str) -> (String, Option<u64>) {
    let mut parts = value.split(';');
    let id = parts.next().unwrap_or("").trim().to_string();
    let timeout = parts
        .filter_map(|p| p.trim().strip_prefix("timeout="))
        .find_map(|t| t.trim().parse().ok());
    (id, timeout)
}
