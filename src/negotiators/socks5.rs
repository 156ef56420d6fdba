use std::io::{self, Cursor};

use async_trait::async_trait;
use byteorder::{BigEndian, WriteBytesExt};
use byteorder_pack::PackTo;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::NegotiatorTrait;
use crate::{error::ProbeError, proxy::models::TargetAddr};

const VERSION: u8 = 0x05;
const NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const SUCCEEDED: u8 = 0x00;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// How the CONNECT reply is read off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFraming {
    /// Read exactly 10 bytes, the size of a reply carrying an IPv4 bound address.
    Fixed,
    /// Parse the address type and drain exactly the bytes it announces.
    Variable,
}

/// A negotiator for SOCKS5 proxies, using the no-authentication method.
pub struct Socks5Negotiator {
    framing: ReplyFraming,
}

impl Socks5Negotiator {
    pub fn new(framing: ReplyFraming) -> Self {
        Self { framing }
    }

    /// Builds the CONNECT request for `target`.
    fn connect_request(target: &TargetAddr) -> Result<Vec<u8>, ProbeError> {
        match target {
            TargetAddr::Ipv4(addr) => {
                let data = (
                    VERSION,
                    CMD_CONNECT,
                    0u8,
                    ATYP_IPV4,
                    addr.ip().octets(),
                    addr.port(),
                );
                let mut cursor = Cursor::new(Vec::with_capacity(10));
                data.pack_to::<BigEndian, _>(&mut cursor)?;
                Ok(cursor.into_inner())
            }
            TargetAddr::Domain(host, port) => {
                let len = u8::try_from(host.len()).map_err(|_| {
                    ProbeError::config(format!("hostname too long for SOCKS5: {}", host))
                })?;
                let mut packet = Vec::with_capacity(7 + host.len());
                packet.extend_from_slice(&[VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, len]);
                packet.extend_from_slice(host.as_bytes());
                WriteBytesExt::write_u16::<BigEndian>(&mut packet, *port)?;
                Ok(packet)
            }
        }
    }
}

fn reply_message(code: u8) -> String {
    match code {
        0x01 => "general SOCKS server failure".into(),
        0x02 => "connection not allowed by ruleset".into(),
        0x03 => "network unreachable".into(),
        0x04 => "host unreachable".into(),
        0x05 => "connection refused".into(),
        0x06 => "TTL expired".into(),
        0x07 => "command not supported".into(),
        0x08 => "address type not supported".into(),
        code => format!("unknown reply code {:#04x}", code),
    }
}

/// Reads a complete CONNECT reply, including the bound address and port.
///
/// The reply is self-delimiting: a 4-byte header whose last byte announces
/// the address type, then 4 (IPv4), 16 (IPv6) or 1 + n (domain) address bytes
/// and a 2-byte port. All of it is drained so the stream is positioned at the
/// first byte coming from the target.
pub async fn read_reply<S>(stream: &mut S) -> Result<(), ProbeError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    if header[1] != SUCCEEDED {
        return Err(ProbeError::status(reply_message(header[1])));
    }

    let addr_len = match header[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => stream.read_u8().await? as usize,
        atyp => {
            return Err(ProbeError::status(format!(
                "unknown bound address type {:#04x}",
                atyp
            )))
        }
    };

    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;
    Ok(())
}

#[async_trait]
impl NegotiatorTrait for Socks5Negotiator {
    async fn negotiate<S>(&self, stream: &mut S, target: &TargetAddr) -> Result<(), ProbeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        // Version, number of methods, no authentication
        stream.write_all(&[VERSION, 1, NO_AUTH]).await?;

        let mut method = [0u8; 2];
        stream.read_exact(&mut method).await?;
        if method != [VERSION, NO_AUTH] {
            return Err(ProbeError::connection(
                io::ErrorKind::InvalidData,
                format!("no-auth method not accepted, got {:02x?}", method),
            ));
        }

        let request = Self::connect_request(target)?;
        self.log_trace(target, "sending CONNECT request");
        stream.write_all(&request).await?;

        match self.framing {
            ReplyFraming::Fixed => {
                let mut reply = [0u8; 10];
                stream.read_exact(&mut reply).await?;
                if reply[1] != SUCCEEDED {
                    return Err(ProbeError::status(reply_message(reply[1])));
                }
            }
            ReplyFraming::Variable => read_reply(stream).await?,
        }

        self.log_trace(target, "request granted");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SOCKS5"
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, DuplexStream};

    use super::*;
    use crate::error::Outcome;

    /// Feeds `bytes` to `read_reply` and returns whatever it left unread.
    async fn leftover_after_reply(bytes: &[u8]) -> (Result<(), ProbeError>, Vec<u8>) {
        let (mut client, mut proxy) = duplex(1024);
        proxy.write_all(bytes).await.unwrap();
        drop(proxy);

        let result = read_reply(&mut client).await;
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        (result, rest)
    }

    #[tokio::test]
    async fn ipv4_reply_consumes_six_trailing_bytes() {
        let (result, rest) = leftover_after_reply(&[
            0x05, 0x00, 0x00, 0x01, 10, 0, 0, 1, 0x1F, 0x90, b'N', b'E', b'X', b'T',
        ])
        .await;
        assert!(result.is_ok());
        assert_eq!(rest, b"NEXT");
    }

    #[tokio::test]
    async fn domain_reply_consumes_length_plus_port() {
        let mut reply = vec![0x05, 0x00, 0x00, 0x03, 0x05];
        reply.extend_from_slice(b"hello");
        reply.extend_from_slice(&[0x00, 0x19]);
        reply.extend_from_slice(b"NEXT");

        let (result, rest) = leftover_after_reply(&reply).await;
        assert!(result.is_ok());
        assert_eq!(rest, b"NEXT");
    }

    #[tokio::test]
    async fn ipv6_reply_consumes_eighteen_trailing_bytes() {
        let mut reply = vec![0x05, 0x00, 0x00, 0x04];
        reply.extend_from_slice(&[0u8; 16]);
        reply.extend_from_slice(&[0x01, 0xBB]);
        reply.extend_from_slice(b"NEXT");

        let (result, rest) = leftover_after_reply(&reply).await;
        assert!(result.is_ok());
        assert_eq!(rest, b"NEXT");
    }

    #[tokio::test]
    async fn failed_reply_code_is_a_status_error() {
        let (result, _) =
            leftover_after_reply(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await;
        assert_eq!(result.unwrap_err().outcome(), Outcome::StatusError);
    }

    async fn serve_handshake(proxy: &mut DuplexStream, method_reply: [u8; 2]) -> Vec<u8> {
        let mut greeting = [0u8; 3];
        proxy.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [0x05, 0x01, 0x00]);
        proxy.write_all(&method_reply).await.unwrap();

        let mut head = [0u8; 4];
        if proxy.read_exact(&mut head).await.is_err() {
            return Vec::new();
        }
        let mut request = head.to_vec();
        let rest = match head[3] {
            ATYP_IPV4 => 6,
            ATYP_DOMAIN => proxy.read_u8().await.unwrap() as usize + 2,
            _ => unreachable!(),
        };
        if head[3] == ATYP_DOMAIN {
            request.push((rest - 2) as u8);
        }
        let mut tail = vec![0u8; rest];
        proxy.read_exact(&mut tail).await.unwrap();
        request.extend_from_slice(&tail);
        request
    }

    #[tokio::test]
    async fn fixed_framing_against_ipv4_target() {
        let (mut client, mut proxy) = duplex(1024);
        let server = tokio::spawn(async move {
            let request = serve_handshake(&mut proxy, [0x05, 0x00]).await;
            proxy
                .write_all(&[0x05, 0x00, 0x00, 0x01, 1, 2, 3, 4, 0x00, 0x50])
                .await
                .unwrap();
            request
        });

        let target = TargetAddr::Ipv4("8.8.8.8:80".parse().unwrap());
        Socks5Negotiator::new(ReplyFraming::Fixed)
            .negotiate(&mut client, &target)
            .await
            .unwrap();
        assert_eq!(
            server.await.unwrap(),
            [0x05, 0x01, 0x00, 0x01, 8, 8, 8, 8, 0x00, 0x50]
        );
    }

    #[tokio::test]
    async fn domain_target_is_length_prefixed() {
        let (mut client, mut proxy) = duplex(1024);
        let server = tokio::spawn(async move {
            let request = serve_handshake(&mut proxy, [0x05, 0x00]).await;
            proxy
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            request
        });

        let target = TargetAddr::Domain("smtp.test".into(), 25);
        Socks5Negotiator::new(ReplyFraming::Variable)
            .negotiate(&mut client, &target)
            .await
            .unwrap();

        let mut expected = vec![0x05, 0x01, 0x00, 0x03, 9];
        expected.extend_from_slice(b"smtp.test");
        expected.extend_from_slice(&[0x00, 0x19]);
        assert_eq!(server.await.unwrap(), expected);
    }

    #[tokio::test]
    async fn refused_method_is_a_connection_error() {
        let (mut client, mut proxy) = duplex(1024);
        tokio::spawn(async move {
            serve_handshake(&mut proxy, [0x05, 0xFF]).await;
        });

        let target = TargetAddr::Ipv4("8.8.8.8:80".parse().unwrap());
        let err = Socks5Negotiator::new(ReplyFraming::Fixed)
            .negotiate(&mut client, &target)
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), Outcome::ConnectionError);
    }
}
