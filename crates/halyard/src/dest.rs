//! Destination keys for the pool registry.

use std::fmt;

use crate::error::{HalyardError, HalyardResult};

/// A logical pool key: `(host, port, tls)`.
///
/// Two requests share a pool (and therefore keep-alive sockets) iff their
/// destinations are equal. The key is immutable; pool configuration is
/// established by the first checkout against it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }

    /// Split an absolute `http://` or `https://` URL into a destination and
    /// the path-and-query to put on the request line.
    ///
    /// Only the two schemes this client speaks are accepted; default ports
    /// are 80 and 443.
    pub fn from_url(url: &str) -> HalyardResult<(Destination, String)> {
        let (tls, rest) = if let Some(rest) = url.strip_prefix("http://") {
            (false, rest)
        } else if let Some(rest) = url.strip_prefix("https://") {
            (true, rest)
        } else {
            return Err(HalyardError::InvalidRequest(format!(
                "unsupported URL scheme in {url:?}"
            )));
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(HalyardError::InvalidRequest(format!(
                "missing host in {url:?}"
            )));
        }

        // IPv6 literals carry their own brackets and colons.
        let (host, port) = if let Some(end) = authority.strip_prefix('[').and_then(|a| {
            a.find(']').map(|i| (a[..i].to_string(), &a[i + 1..]))
        }) {
            let (host, after) = end;
            match after.strip_prefix(':') {
                Some(p) => (host, Some(p)),
                None if after.is_empty() => (host, None),
                None => {
                    return Err(HalyardError::InvalidRequest(format!(
                        "malformed authority in {url:?}"
                    )))
                }
            }
        } else {
            match authority.rsplit_once(':') {
                Some((h, p)) => (h.to_string(), Some(p)),
                None => (authority.to_string(), None),
            }
        };

        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| {
                HalyardError::InvalidRequest(format!("invalid port in {url:?}"))
            })?,
            None if tls => 443,
            None => 80,
        };

        Ok((Destination::new(host, port, tls), path.to_string()))
    }

    /// Whether the port is the default for the scheme, which keeps it out of
    /// the `Host` header.
    pub fn is_default_port(&self) -> bool {
        (self.tls && self.port == 443) || (!self.tls && self.port == 80)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tls {
            write!(f, "{}:{} (tls)", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
