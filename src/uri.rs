//! Parsing of `opc.tcp://host:port[/path]`-shaped endpoint URIs.

use crate::config::URI_HARD_MAX_LEN;
use crate::error::SocketsError;

const URI_HOSTNAME_SEP: char = '/';
const URI_PREFIX_SEP: &str = "://";
const URI_PORT_SEP: char = ':';

/// The transport scheme named by a URI's prefix.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Scheme {
    TcpUa,
    UdpUa,
    EthUa,
    MqttUa,
}

impl Scheme {
    fn from_prefix(prefix: &str) -> Option<Scheme> {
        match prefix {
            "opc.tcp" => Some(Scheme::TcpUa),
            "opc.udp" => Some(Scheme::UdpUa),
            "opc.eth" => Some(Scheme::EthUa),
            "MqttUa" => Some(Scheme::MqttUa),
            _ => None,
        }
    }
}

/// Splits an endpoint URI into its scheme, host and port, same as
/// [`split_uri`] but against the hard ceiling ([`URI_HARD_MAX_LEN`]) only.
pub fn split_uri(uri: &str) -> Result<(Scheme, String, String), SocketsError> {
    split_uri_with_max_len(uri, URI_HARD_MAX_LEN)
}

/// Splits an endpoint URI into its scheme, host and port.
///
/// `host` keeps its surrounding brackets when the URI uses a bracketed
/// IPv6 literal (e.g. `"[::1]"`); callers that need the bare address strip
/// them themselves. Any trailing `/path` is accepted but discarded.
///
/// `max_len` lets a caller enforce a tighter cap than [`URI_HARD_MAX_LEN`]
/// (see [`crate::config::SocketsConfig::effective_uri_max_len`]); it is
/// never interpreted as looser than the hard ceiling.
pub fn split_uri_with_max_len(
    uri: &str,
    max_len: usize,
) -> Result<(Scheme, String, String), SocketsError> {
    let max_len = max_len.min(URI_HARD_MAX_LEN);
    if uri.is_empty() || uri.len() > max_len {
        return Err(SocketsError::invalid_parameters(
            "uri is empty or exceeds the maximum length",
        ));
    }

    let (prefix, rest) = uri.split_once(URI_PREFIX_SEP).ok_or_else(|| {
        SocketsError::invalid_parameters("uri is missing the '://' scheme separator")
    })?;
    let scheme = Scheme::from_prefix(prefix)
        .ok_or_else(|| SocketsError::invalid_parameters("unrecognized uri scheme"))?;

    let (host, after_host) = split_host(rest)?;
    if host.is_empty() {
        return Err(SocketsError::invalid_parameters("uri has an empty host"));
    }

    let after_port = after_host
        .strip_prefix(URI_PORT_SEP)
        .ok_or_else(|| SocketsError::invalid_parameters("uri is missing a port"))?;
    let port_end = after_port
        .find(URI_HOSTNAME_SEP)
        .unwrap_or(after_port.len());
    let (port, _path) = after_port.split_at(port_end);
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SocketsError::invalid_parameters(
            "uri port is empty or not numeric",
        ));
    }

    Ok((scheme, host.to_string(), port.to_string()))
}

/// Consumes the host portion of `rest`, honoring a bracketed IPv6 literal,
/// and returns `(host, remainder starting at ':')`.
fn split_host(rest: &str) -> Result<(&str, &str), SocketsError> {
    let bytes = rest.as_bytes();
    if bytes.first() == Some(&b'[') {
        let mut bracket_depth: i32 = 0;
        for (i, b) in bytes.iter().enumerate() {
            match b {
                b'[' => bracket_depth += 1,
                b']' => {
                    bracket_depth -= 1;
                    if bracket_depth == 0 {
                        return Ok((&rest[..=i], &rest[i + 1..]));
                    }
                    if bracket_depth < 0 {
                        return Err(SocketsError::invalid_parameters(
                            "uri has unbalanced ']' in host",
                        ));
                    }
                }
                _ => {}
            }
        }
        return Err(SocketsError::invalid_parameters(
            "uri has an unterminated '[' in host",
        ));
    }

    let end = rest
        .find(URI_PORT_SEP)
        .ok_or_else(|| SocketsError::invalid_parameters("uri is missing a port"))?;
    Ok((&rest[..end], &rest[end..]))
}
