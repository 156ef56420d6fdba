use std::{
    fmt::Display,
    net::{Ipv4Addr, SocketAddrV4},
    str::FromStr,
};

use crate::error::ProbeError;

/// Protocols a candidate can be validated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Socks4,
    Socks5,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "HTTP"),
            Self::Socks4 => write!(f, "SOCKS4"),
            Self::Socks5 => write!(f, "SOCKS5"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "socks4" => Ok(Self::Socks4),
            "socks5" => Ok(Self::Socks5),
            other => Err(ProbeError::config(format!(
                "invalid proxy type {:?}, expected one of: http, socks4, socks5",
                other
            ))),
        }
    }
}

/// A proxy endpoint awaiting or undergoing validation.
///
/// Two candidates are the same when their normalized `host:port` forms match,
/// so an address listed without a port collides with the same address listed
/// with the default port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    /// Hostname or IP literal, without IPv6 brackets.
    pub host: String,
    /// Port the proxy listens on.
    pub port: u16,
}

impl Candidate {
    /// Parses `host[:port]`, falling back to `default_port` when no port is given.
    ///
    /// IPv6 literals must be bracketed when a port is present (`[::1]:1080`).
    ///
    /// # Arguments
    ///
    /// * `address`: The candidate as written by the ingestion side.
    /// * `default_port`: Port used when `address` has none.
    ///
    /// # Returns
    ///
    /// The parsed candidate, or a configuration error for an empty host or a
    /// port segment that is not a valid `u16`.
    pub fn parse(address: &str, default_port: u16) -> Result<Self, ProbeError> {
        let address = address.trim();

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                ProbeError::config(format!("unterminated IPv6 literal in {:?}", address))
            })?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => {
                    return Err(ProbeError::config(format!(
                        "unexpected trailing data in {:?}",
                        address
                    )))
                }
            }
        } else {
            match address.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (address, None),
            }
        };

        let host = host.trim();
        if host.is_empty() {
            return Err(ProbeError::config(format!(
                "missing host in candidate {:?}",
                address
            )));
        }

        let port = match port {
            Some(port) => port.trim().parse::<u16>().map_err(|e| {
                ProbeError::config(format!("invalid port in candidate {:?}: {}", address, e))
            })?,
            None => default_port,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Returns the candidate in its normalized `host:port` form.
    pub fn as_text(&self) -> String {
        self.to_string()
    }
}

impl Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Where a tunnel should lead once the proxy handshake completes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    Ipv4(SocketAddrV4),
    /// A hostname (or any non-IPv4 literal), at most 255 bytes long.
    Domain(String, u16),
}

impl TargetAddr {
    /// Builds a target, preferring the IPv4 encoding when `host` is an IPv4 literal.
    pub fn new(host: &str, port: u16) -> Result<Self, ProbeError> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(Self::Ipv4(SocketAddrV4::new(ip, port)));
        }
        if host.is_empty() {
            return Err(ProbeError::config("target host is empty"));
        }
        if host.len() > 255 {
            return Err(ProbeError::config(format!(
                "target host is {} bytes long, the limit is 255",
                host.len()
            )));
        }
        Ok(Self::Domain(host.to_string(), port))
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Ipv4(addr) => addr.port(),
            Self::Domain(_, port) => *port,
        }
    }
}

impl From<SocketAddrV4> for TargetAddr {
    fn from(addr: SocketAddrV4) -> Self {
        Self::Ipv4(addr)
    }
}

impl Display for TargetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ipv4(addr) => write!(f, "{}", addr),
            Self::Domain(host, port) if host.contains(':') => write!(f, "[{}]:{}", host, port),
            Self::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_without_port_uses_default() {
        let candidate = Candidate::parse(" 10.0.0.1 ", 3128).unwrap();
        assert_eq!(candidate.host, "10.0.0.1");
        assert_eq!(candidate.port, 3128);
        assert_eq!(candidate, Candidate::parse("10.0.0.1:3128", 80).unwrap());
    }

    #[test]
    fn candidate_with_bracketed_ipv6() {
        let candidate = Candidate::parse("[2001:db8::1]:1080", 80).unwrap();
        assert_eq!(candidate.host, "2001:db8::1");
        assert_eq!(candidate.port, 1080);
        assert_eq!(candidate.as_text(), "[2001:db8::1]:1080");
    }

    #[test]
    fn candidate_with_bad_port_is_rejected() {
        let err = Candidate::parse("10.0.0.1:http", 80).unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
        assert!(Candidate::parse("10.0.0.1:70000", 80).is_err());
        assert!(Candidate::parse(":8080", 80).is_err());
    }

    #[test]
    fn protocol_is_case_insensitive() {
        assert_eq!("SOCKS5".parse::<Protocol>().unwrap(), Protocol::Socks5);
        assert_eq!("http".parse::<Protocol>().unwrap(), Protocol::Http);
        assert!("https".parse::<Protocol>().is_err());
    }

    #[test]
    fn target_prefers_ipv4_encoding() {
        assert_eq!(
            TargetAddr::new("1.2.3.4", 25).unwrap(),
            TargetAddr::Ipv4("1.2.3.4:25".parse().unwrap())
        );
        assert_eq!(
            TargetAddr::new("mail.example.com", 25).unwrap(),
            TargetAddr::Domain("mail.example.com".into(), 25)
        );
        assert!(TargetAddr::new(&"a".repeat(256), 25).is_err());
        assert!(TargetAddr::new(&"a".repeat(255), 25).is_ok());
    }
}
