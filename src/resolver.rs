use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::OnceLock,
};

use cached::proc_macro::cached;
use tokio::net::{TcpSocket, TcpStream};
use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::ResolveErrorKind,
    TokioAsyncResolver,
};

use crate::{config::Transport, error::ProbeError};

fn resolver() -> &'static TokioAsyncResolver {
    static RESOLVER: OnceLock<TokioAsyncResolver> = OnceLock::new();
    RESOLVER.get_or_init(|| {
        TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            #[cfg(feature = "log")]
            log::warn!("failed to read system resolver configuration: {}", e);
            #[cfg(not(feature = "log"))]
            let _ = e;
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        })
    })
}

/// Resolves `host` to its addresses. IP literals are returned as-is.
pub async fn lookup(host: &str) -> Result<Vec<IpAddr>, ProbeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    lookup_name(host.to_string()).await
}

/// Successful answers are kept for five minutes, candidates and raw targets
/// repeat the same few names many times over a scan. At most 4096 names are
/// kept.
#[cached(size = 4096, time = 300, result = true)]
async fn lookup_name(host: String) -> Result<Vec<IpAddr>, ProbeError> {
    match resolver().lookup_ip(host.as_str()).await {
        Ok(answer) => Ok(answer.iter().collect()),
        Err(e) => {
            #[cfg(feature = "log")]
            log::trace!("failed to resolve {}: {}", host, e);
            if matches!(e.kind(), ResolveErrorKind::Timeout) {
                Err(ProbeError::Timeout)
            } else {
                Err(ProbeError::Connection(io::Error::new(
                    io::ErrorKind::NotFound,
                    e,
                )))
            }
        }
    }
}

/// Resolves `host` and returns its first IPv4 address.
///
/// # Returns
///
/// The address, or a connection error when the host has no IPv4 record.
pub async fn first_ipv4(host: &str) -> Result<Ipv4Addr, ProbeError> {
    lookup(host)
        .await?
        .into_iter()
        .find_map(|ip| match ip {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| {
            ProbeError::connection(
                io::ErrorKind::AddrNotAvailable,
                format!("{} has no IPv4 address", host),
            )
        })
}

/// Opens a keep-alive TCP connection to `host:port` over `transport`.
///
/// The caller bounds this with its own deadline.
///
/// # Arguments
///
/// * `host`: Hostname or IP literal to connect to.
/// * `port`: Destination port.
/// * `transport`: Address family restriction.
///
/// # Returns
///
/// The connected stream, or the error that prevented the connection.
pub async fn dial(host: &str, port: u16, transport: Transport) -> Result<TcpStream, ProbeError> {
    let addr = lookup(host)
        .await?
        .into_iter()
        .find(|ip| transport.accepts(ip))
        .map(|ip| SocketAddr::new(ip, port))
        .ok_or_else(|| {
            ProbeError::connection(
                io::ErrorKind::AddrNotAvailable,
                format!("{} has no {} address", host, transport),
            )
        })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_keepalive(true)?;
    Ok(socket.connect(addr).await?)
}

#[cfg(test)]
mod tests {
    use cached::Cached;

    use super::*;

    #[tokio::test]
    async fn literals_skip_dns() {
        assert_eq!(
            first_ipv4("192.0.2.7").await.unwrap(),
            Ipv4Addr::new(192, 0, 2, 7)
        );
        let err = first_ipv4("2001:db8::7").await.unwrap_err();
        assert!(matches!(err, ProbeError::Connection(_)));
    }

    #[tokio::test]
    async fn literals_never_reach_the_cache() {
        for last in 0..=255u8 {
            let host = format!("198.51.100.{}", last);
            assert_eq!(lookup(&host).await.unwrap().len(), 1);
        }

        let mut cache = LOOKUP_NAME.lock().await;
        assert!(cache.cache_get(&"198.51.100.7".to_string()).is_none());
        assert_eq!(cache.cache_capacity(), Some(4096));
    }

    #[tokio::test]
    async fn system_resolver_answers_localhost() {
        let ips = lookup("localhost").await.unwrap();
        assert!(ips.iter().any(|ip| ip.is_loopback()));
        assert_eq!(
            first_ipv4("localhost").await.unwrap(),
            Ipv4Addr::LOCALHOST
        );
    }

    #[tokio::test]
    async fn dial_respects_transport() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(dial("127.0.0.1", port, Transport::Tcp4).await.is_ok());
        let err = dial("127.0.0.1", port, Transport::Tcp6).await.unwrap_err();
        assert!(matches!(err, ProbeError::Connection(_)));
    }
}
