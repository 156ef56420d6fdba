use std::{
    fmt::Display,
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddrV4},
    path::Path,
    time::Duration,
};

use serde::Deserialize;

use crate::{error::ProbeError, proxy::models::Protocol};

/// Options for configuring the proxy validating process.
///
/// Loaded once before scanning starts and never mutated afterwards. Every
/// field has a default, so a configuration file only needs the keys it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Protocol to check candidates with: `http`, `socks4` or `socks5`.
    pub proxy_type: String,
    /// Maximum number of probes in flight.
    pub threads: usize,
    /// Port assumed for candidates listed without one.
    pub default_port: u16,
    /// Scheduler poll interval in milliseconds.
    pub poll_interval: u64,
    /// Per-protocol timeouts.
    pub timeout: Timeouts,
    /// Destination of the standard SOCKS4/SOCKS5 connectivity check.
    pub socks_target: SocketAddrV4,
    /// Sites every HTTP proxy must serve correctly.
    pub check_sites: Vec<CheckSite>,
    /// Request headers used for check-sites.
    pub headers: Headers,
    pub print_ips: PrintIps,
    pub raw_socket_test: RawSocketTest,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_type: "http".into(),
            threads: 500,
            default_port: 8080,
            poll_interval: 50,
            timeout: Timeouts::default(),
            socks_target: SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 80),
            check_sites: vec![CheckSite {
                url: "http://www.google.com/".into(),
                ..Default::default()
            }],
            headers: Headers::default(),
            print_ips: PrintIps::default(),
            raw_socket_test: RawSocketTest::default(),
        }
    }
}

impl Config {
    /// Reads a JSON configuration file.
    ///
    /// # Arguments
    ///
    /// * `path`: Location of the file.
    ///
    /// # Returns
    ///
    /// The parsed configuration, or an error if the file is unreadable or malformed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Resolves the configured protocol mode.
    pub fn protocol(&self) -> Result<Protocol, ProbeError> {
        self.proxy_type.parse()
    }

    /// Returns the handshake timeout for `protocol`.
    pub fn protocol_timeout(&self, protocol: Protocol) -> Duration {
        let millis = match protocol {
            Protocol::Http => self.timeout.http,
            Protocol::Socks4 => self.timeout.socks4,
            Protocol::Socks5 => self.timeout.socks5,
        };
        Duration::from_millis(millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval.max(1))
    }
}

/// Timeouts in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub http: u64,
    pub socks4: u64,
    pub socks5: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            http: 5000,
            socks4: 5000,
            socks5: 5000,
        }
    }
}

/// A page fetched through an HTTP proxy to prove it works.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckSite {
    pub url: String,
    /// Expected status code, 200 when unset.
    pub status_code: Option<u16>,
    /// Substrings the body must contain.
    pub response_contains: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Headers {
    /// Sent as `User-Agent`; a random browser agent is used when empty.
    pub user_agent: String,
    /// Sent as `Accept`; omitted when empty.
    pub accept: String,
}

impl Default for Headers {
    fn default() -> Self {
        Self {
            user_agent: String::new(),
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrintIps {
    pub enabled: bool,
}

/// Socket family used to reach candidates in raw-socket mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Tcp4,
    Tcp6,
}

impl Transport {
    /// Whether an address of this family may be dialed.
    pub fn accepts(&self, ip: &IpAddr) -> bool {
        match self {
            Self::Tcp => true,
            Self::Tcp4 => ip.is_ipv4(),
            Self::Tcp6 => ip.is_ipv6(),
        }
    }
}

impl Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Tcp4 => write!(f, "tcp4"),
            Self::Tcp6 => write!(f, "tcp6"),
        }
    }
}

/// Replaces the fixed connectivity check with an arbitrary exchange through the tunnel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawSocketTest {
    pub enabled: bool,
    /// Socket family used to dial the candidate.
    #[serde(alias = "transport")]
    pub protocol: Transport,
    /// Timeout in milliseconds; `0` falls back to the protocol timeout.
    pub timeout: u64,
    pub target_host: String,
    pub target_port: u16,
    /// Hex-encoded payload written once the tunnel is up.
    pub send_hex: String,
    pub expect_response: bool,
    /// Minimum number of response bytes, `0` accepts any non-empty response.
    pub response_min_size: usize,
}

impl Default for RawSocketTest {
    fn default() -> Self {
        Self {
            enabled: false,
            protocol: Transport::Tcp,
            timeout: 0,
            target_host: "8.8.8.8".into(),
            target_port: 80,
            send_hex: String::new(),
            expect_response: false,
            response_min_size: 0,
        }
    }
}

impl RawSocketTest {
    /// Decodes the configured payload.
    ///
    /// # Returns
    ///
    /// `None` when no payload is configured, or a configuration error for malformed hex.
    pub fn payload(&self) -> Result<Option<Vec<u8>>, ProbeError> {
        let hex_str = self.send_hex.trim();
        if hex_str.is_empty() {
            return Ok(None);
        }
        hex::decode(hex_str)
            .map(Some)
            .map_err(|e| ProbeError::config(format!("invalid send_hex {:?}: {}", hex_str, e)))
    }

    /// Returns the raw test timeout, falling back to `fallback` when unset.
    pub fn timeout_or(&self, fallback: Duration) -> Duration {
        if self.timeout == 0 {
            fallback
        } else {
            Duration::from_millis(self.timeout)
        }
    }
}
