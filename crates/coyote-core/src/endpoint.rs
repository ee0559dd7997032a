//! Endpoint resolution: layered configuration to a canonical session identity.
//!
//! An explicit URI always wins over the separate scheme/host/port fields.
//! The resolved identity is the key the session manager uses to decide
//! whether an existing session can be reused.

use std::fmt;

use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("invalid endpoint URI {uri:?}: {detail}")]
    InvalidUri { uri: String, detail: String },

    #[error("unsupported scheme {0:?}: only ws and wss are supported")]
    UnsupportedScheme(String),

    #[error("endpoint host must not be empty")]
    MissingHost,

    #[error("invalid endpoint port {0:?}: expected an integer in 1..=65535")]
    InvalidPort(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Ws,
    Wss,
}

impl Scheme {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ws" => Some(Scheme::Ws),
            "wss" => Some(Scheme::Wss),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }
}

/// Canonical `scheme://host:port` identity of a device session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl SessionIdentity {
    /// Parse a full `ws://host:port` URI. The port must be written out.
    pub fn parse(uri: &str) -> Result<Self, EndpointError> {
        let raw = uri.trim();
        let invalid = |detail: &str| EndpointError::InvalidUri {
            uri: raw.to_string(),
            detail: detail.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let scheme = Scheme::parse(url.scheme())
            .ok_or_else(|| EndpointError::UnsupportedScheme(url.scheme().to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?;

        // `Url` hides a port equal to the scheme default, so check the raw text.
        let port = match url.port() {
            Some(p) => p,
            None if authority_has_port(raw) => url
                .port_or_known_default()
                .ok_or_else(|| invalid("missing port"))?,
            None => return Err(invalid("missing port")),
        };
        if port == 0 {
            return Err(EndpointError::InvalidPort(port.to_string()));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    /// The canonical URI string, identical to the `Display` output.
    pub fn uri(&self) -> String {
        self.to_string()
    }

    /// Host without IPv6 brackets, suitable for socket binding.
    pub fn bind_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

/// Resolve a session identity from layered configuration.
///
/// * `explicit_uri` -- when non-empty, parsed as a full URI and used alone.
/// * `scheme`       -- `ws` (default when absent or empty) or `wss`.
/// * `host`         -- required when no URI is given.
/// * `port`         -- decimal text in `1..=65535`.
pub fn resolve(
    explicit_uri: Option<&str>,
    scheme: Option<&str>,
    host: &str,
    port: &str,
) -> Result<SessionIdentity, EndpointError> {
    if let Some(uri) = explicit_uri.map(str::trim).filter(|u| !u.is_empty()) {
        return SessionIdentity::parse(uri);
    }

    let host = host.trim();
    if host.is_empty() {
        return Err(EndpointError::MissingHost);
    }

    let scheme = match scheme.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Scheme::parse(s).ok_or_else(|| EndpointError::UnsupportedScheme(s.to_string()))?,
        None => Scheme::Ws,
    };

    let port = parse_port(port)?;

    Ok(SessionIdentity {
        scheme,
        host: host.to_string(),
        port,
    })
}

fn parse_port(raw: &str) -> Result<u16, EndpointError> {
    let trimmed = raw.trim();
    match trimmed.parse::<u32>() {
        Ok(p) if (1..=u32::from(u16::MAX)).contains(&p) => Ok(p as u16),
        _ => Err(EndpointError::InvalidPort(trimmed.to_string())),
    }
}

/// Whether the authority section of `raw` spells out a `:port`.
fn authority_has_port(raw: &str) -> bool {
    let Some((_, rest)) = raw.split_once("://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let port = if host_port.starts_with('[') {
        host_port
            .split_once(']')
            .and_then(|(_, tail)| tail.strip_prefix(':'))
    } else {
        host_port.rsplit_once(':').map(|(_, p)| p)
    };
    port.is_some_and(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}
