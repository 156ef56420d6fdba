use std::{net::SocketAddrV4, time::Duration};

use tokio::{
    net::TcpStream,
    time::{timeout_at, Instant},
};

use super::tail::Tail;
use crate::{
    config::{Config, Transport},
    error::ProbeError,
    negotiators::{
        HttpConnectNegotiator, NegotiatorTrait, ReplyFraming, Socks4Negotiator, Socks5Negotiator,
    },
    proxy::{
        client::{ProxyClient, RequestHeaders, Site},
        models::{Candidate, Protocol, TargetAddr},
    },
    resolver,
};

/// Raw-socket mode settings, resolved once at startup.
#[derive(Debug, Clone)]
pub(crate) struct RawProbe {
    transport: Transport,
    timeout: Duration,
    target: TargetAddr,
    tail: Tail,
}

/// Everything a probe needs, derived from the configuration once.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub protocol: Protocol,
    timeout: Duration,
    socks_target: TargetAddr,
    sites: Vec<Site>,
    headers: RequestHeaders,
    raw: Option<RawProbe>,
}

impl Plan {
    /// Validates the configuration and prepares the probe settings.
    ///
    /// Every configuration error a probe could hit (unknown mode, malformed
    /// payload, oversized target hostname, bad check-site URL) is reported
    /// here, before any candidate is dispatched.
    pub fn from_config(config: &Config) -> Result<Self, ProbeError> {
        let protocol = config.protocol()?;
        let timeout = config.protocol_timeout(protocol);

        let raw = if config.raw_socket_test.enabled {
            let raw = &config.raw_socket_test;
            let timeout = raw.timeout_or(timeout);
            Some(RawProbe {
                transport: raw.protocol,
                timeout,
                target: TargetAddr::new(raw.target_host.trim(), raw.target_port)?,
                tail: Tail::new(raw, timeout)?,
            })
        } else {
            None
        };

        let sites = if protocol == Protocol::Http && raw.is_none() {
            config
                .check_sites
                .iter()
                .map(Site::from_config)
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        #[cfg(feature = "log")]
        if protocol == Protocol::Http && raw.is_none() && sites.is_empty() {
            log::warn!("no check sites configured, every reachable HTTP proxy will pass");
        }

        Ok(Self {
            protocol,
            timeout,
            socks_target: config.socks_target.into(),
            sites,
            headers: RequestHeaders::from_config(&config.headers),
            raw,
        })
    }
}

/// Dials `candidate` and runs `negotiator` against it, both bounded by `deadline`.
async fn open_tunnel<N>(
    candidate: &Candidate,
    negotiator: &N,
    target: &TargetAddr,
    transport: Transport,
    deadline: Instant,
) -> Result<TcpStream, ProbeError>
where
    N: NegotiatorTrait + Sync,
{
    let mut stream = timeout_at(
        deadline,
        resolver::dial(&candidate.host, candidate.port, transport),
    )
    .await??;
    timeout_at(deadline, negotiator.negotiate(&mut stream, target)).await??;
    Ok(stream)
}

/// Standard SOCKS check: a tunnel to the fixed target is enough.
async fn check_tunnel<N>(plan: &Plan, candidate: &Candidate, negotiator: &N) -> Result<(), ProbeError>
where
    N: NegotiatorTrait + Sync,
{
    let deadline = Instant::now() + plan.timeout;
    open_tunnel(
        candidate,
        negotiator,
        &plan.socks_target,
        Transport::Tcp,
        deadline,
    )
    .await
    .map(drop)
}

/// Raw-socket check: open a tunnel to `target` and run the payload exchange.
///
/// `deadline` bounds everything up to the response read.
async fn check_raw<N>(
    raw: &RawProbe,
    candidate: &Candidate,
    negotiator: &N,
    target: &TargetAddr,
    deadline: Instant,
) -> Result<(), ProbeError>
where
    N: NegotiatorTrait + Sync,
{
    let mut stream = open_tunnel(candidate, negotiator, target, raw.transport, deadline).await?;
    raw.tail.exchange(&mut stream, deadline).await.map(drop)
}

/// Standard HTTP check: every site must answer as configured, the first
/// failure ends the probe.
async fn check_sites(plan: &Plan, candidate: &Candidate) -> Result<(), ProbeError> {
    let client = ProxyClient::new(candidate, &plan.headers, plan.timeout);
    for site in &plan.sites {
        let (status, body) = client.fetch(site).await?;
        if status.as_u16() != site.expected_status {
            return Err(ProbeError::status(format!(
                "{} answered {}, expected {}",
                site.uri, status, site.expected_status
            )));
        }

        let body = String::from_utf8_lossy(&body);
        if let Some(missing) = site
            .response_contains
            .iter()
            .find(|needle| !body.contains(needle.as_str()))
        {
            return Err(ProbeError::status(format!(
                "{} response is missing {:?}",
                site.uri, missing
            )));
        }
    }
    Ok(())
}

/// Runs one complete probe of `candidate` according to `plan`.
pub(crate) async fn probe(plan: &Plan, candidate: &Candidate) -> Result<(), ProbeError> {
    let raw = match (plan.protocol, &plan.raw) {
        (Protocol::Http, None) => return check_sites(plan, candidate).await,
        (Protocol::Socks4, None) => return check_tunnel(plan, candidate, &Socks4Negotiator).await,
        (Protocol::Socks5, None) => {
            let negotiator = Socks5Negotiator::new(ReplyFraming::Fixed);
            return check_tunnel(plan, candidate, &negotiator).await;
        }
        (_, Some(raw)) => raw,
    };

    let deadline = Instant::now() + raw.timeout;
    match plan.protocol {
        Protocol::Http => {
            check_raw(raw, candidate, &HttpConnectNegotiator, &raw.target, deadline).await
        }
        Protocol::Socks4 => {
            // SOCKS4 carries no hostnames; resolution counts against the same deadline.
            let target = match &raw.target {
                TargetAddr::Ipv4(addr) => TargetAddr::Ipv4(*addr),
                TargetAddr::Domain(host, port) => {
                    let ip = timeout_at(deadline, resolver::first_ipv4(host)).await??;
                    TargetAddr::Ipv4(SocketAddrV4::new(ip, *port))
                }
            };
            check_raw(raw, candidate, &Socks4Negotiator, &target, deadline).await
        }
        Protocol::Socks5 => {
            let negotiator = Socks5Negotiator::new(ReplyFraming::Variable);
            check_raw(raw, candidate, &negotiator, &raw.target, deadline).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckSite;

    #[test]
    fn plan_rejects_bad_payload() {
        let mut config = Config {
            proxy_type: "socks5".into(),
            ..Default::default()
        };
        config.raw_socket_test.enabled = true;
        config.raw_socket_test.send_hex = "not hex".into();
        assert!(matches!(
            Plan::from_config(&config),
            Err(ProbeError::Config(_))
        ));
    }

    #[test]
    fn plan_rejects_long_target_host() {
        let mut config = Config {
            proxy_type: "socks5".into(),
            ..Default::default()
        };
        config.raw_socket_test.enabled = true;
        config.raw_socket_test.target_host = "h".repeat(300);
        assert!(Plan::from_config(&config).is_err());
    }

    #[test]
    fn raw_timeout_falls_back_to_protocol_timeout() {
        let mut config = Config {
            proxy_type: "socks4".into(),
            ..Default::default()
        };
        config.timeout.socks4 = 1234;
        config.raw_socket_test.enabled = true;
        config.raw_socket_test.target_host = "example.com".into();

        let plan = Plan::from_config(&config).unwrap();
        let raw = plan.raw.unwrap();
        assert_eq!(raw.timeout, Duration::from_millis(1234));
        assert_eq!(raw.target, TargetAddr::Domain("example.com".into(), 80));
    }

    #[test]
    fn sites_only_matter_for_standard_http() {
        let config = Config {
            proxy_type: "socks4".into(),
            check_sites: vec![CheckSite {
                url: "not a url".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let plan = Plan::from_config(&config).unwrap();
        assert!(plan.sites.is_empty());

        let config = Config {
            proxy_type: "http".into(),
            ..config
        };
        assert!(Plan::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn http_without_sites_passes_without_dialing() {
        let config = Config {
            proxy_type: "http".into(),
            check_sites: Vec::new(),
            ..Default::default()
        };
        let plan = Plan::from_config(&config).unwrap();
        let unreachable = Candidate::parse("127.0.0.1:1", 8080).unwrap();
        assert!(probe(&plan, &unreachable).await.is_ok());
    }
}
