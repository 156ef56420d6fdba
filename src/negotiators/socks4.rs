use std::{io::Cursor, net::SocketAddrV4};

use async_trait::async_trait;
use byteorder::BigEndian;
use byteorder_pack::PackTo;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::NegotiatorTrait;
use crate::{error::ProbeError, proxy::models::TargetAddr};

const GRANTED: u8 = 0x5A;

/// A negotiator for SOCKS4 proxies.
///
/// SOCKS4 only knows IPv4 destinations, hostnames must be resolved first.
pub struct Socks4Negotiator;

impl Socks4Negotiator {
    /// Builds the 9-byte CONNECT request with an empty user id.
    fn connect_request(target: SocketAddrV4) -> Result<Vec<u8>, ProbeError> {
        let data = (4u8, 1u8, target.port(), target.ip().octets(), 0u8);
        let mut cursor = Cursor::new(Vec::with_capacity(9));
        data.pack_to::<BigEndian, _>(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}

#[async_trait]
impl NegotiatorTrait for Socks4Negotiator {
    async fn negotiate<S>(&self, stream: &mut S, target: &TargetAddr) -> Result<(), ProbeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let TargetAddr::Ipv4(addr) = target else {
            return Err(ProbeError::config(format!(
                "SOCKS4 can only reach IPv4 targets, got {}",
                target
            )));
        };

        let packet = Self::connect_request(*addr)?;
        self.log_trace(target, "sending CONNECT request");
        stream.write_all(&packet).await?;

        let mut response = [0u8; 8];
        stream.read_exact(&mut response).await?;

        match response[1] {
            GRANTED => {}
            0x5B => return Err(ProbeError::status("request rejected or failed")),
            0x5C => {
                return Err(ProbeError::status(
                    "request rejected because SOCKS server cannot connect to identd on the client",
                ))
            }
            0x5D => {
                return Err(ProbeError::status(
                    "request rejected because the client program and identd report different user-ids",
                ))
            }
            code => {
                return Err(ProbeError::status(format!(
                    "invalid reply code {:#04x}",
                    code
                )))
            }
        }

        self.log_trace(target, "request granted");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SOCKS4"
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::error::Outcome;

    async fn negotiate_against(reply: [u8; 8]) -> (Result<(), ProbeError>, Vec<u8>) {
        let (mut client, mut proxy) = duplex(64);
        let server = tokio::spawn(async move {
            let mut request = vec![0u8; 9];
            proxy.read_exact(&mut request).await.unwrap();
            proxy.write_all(&reply).await.unwrap();
            request
        });

        let target = TargetAddr::Ipv4("8.8.8.8:80".parse().unwrap());
        let result = Socks4Negotiator.negotiate(&mut client, &target).await;
        (result, server.await.unwrap())
    }

    #[tokio::test]
    async fn sends_fixed_connect_request() {
        let (result, request) = negotiate_against([0x00, 0x5A, 0, 0, 0, 0, 0, 0]).await;
        assert!(result.is_ok());
        assert_eq!(request, [0x04, 0x01, 0x00, 0x50, 8, 8, 8, 8, 0x00]);
    }

    #[tokio::test]
    async fn rejected_reply_is_a_status_error() {
        let (result, _) = negotiate_against([0x00, 0x5B, 1, 2, 3, 4, 5, 6]).await;
        assert_eq!(result.unwrap_err().outcome(), Outcome::StatusError);
    }

    #[tokio::test]
    async fn short_reply_is_a_connection_error() {
        let (mut client, mut proxy) = duplex(64);
        tokio::spawn(async move {
            let mut request = [0u8; 9];
            proxy.read_exact(&mut request).await.unwrap();
            proxy.write_all(&[0x00, 0x5A, 0x00]).await.unwrap();
        });

        let target = TargetAddr::Ipv4("8.8.8.8:80".parse().unwrap());
        let err = Socks4Negotiator
            .negotiate(&mut client, &target)
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), Outcome::ConnectionError);
    }

    #[tokio::test]
    async fn domain_targets_are_refused() {
        let (mut client, _proxy) = duplex(64);
        let target = TargetAddr::Domain("example.com".into(), 80);
        let err = Socks4Negotiator
            .negotiate(&mut client, &target)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }
}
