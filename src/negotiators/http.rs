use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::NegotiatorTrait;
use crate::{error::ProbeError, proxy::models::TargetAddr};

/// Upper bound on the size of a CONNECT reply header block.
const MAX_REPLY_HEAD: usize = 4096;

/// A negotiator for HTTP proxies supporting the CONNECT method.
pub struct HttpConnectNegotiator;

impl HttpConnectNegotiator {
    /// Generates a CONNECT request to be sent to the proxy server.
    ///
    /// # Arguments
    ///
    /// * `target`: The `host:port` to tunnel to.
    ///
    /// # Returns
    ///
    /// A `String` containing the raw bytes of the CONNECT request.
    fn generate_connect_request(&self, target: &TargetAddr) -> String {
        format!(
            "CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n",
            target, target
        )
    }
}

/// Reads the reply header block one byte at a time, stopping right after the
/// blank line so bytes sent by the target are left in the stream.
async fn read_reply_head<S>(stream: &mut S) -> Result<Vec<u8>, ProbeError>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(128);
    while head.len() < MAX_REPLY_HEAD && !head.ends_with(b"\r\n\r\n") {
        let mut byte = [0u8; 1];
        if stream.read(&mut byte).await? == 0 {
            break;
        }
        head.push(byte[0]);
    }

    if head.is_empty() {
        return Err(ProbeError::connection(
            std::io::ErrorKind::UnexpectedEof,
            "proxy closed the connection without replying",
        ));
    }
    Ok(head)
}

/// Whether a CONNECT reply reports an established tunnel.
fn is_established(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    text.contains("200") || text.contains("Connection established")
}

/// Describes the status line of a reply for error messages.
fn describe(head: &[u8]) -> String {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(head) {
        Ok(_) => format!(
            "{} {}",
            response.code.unwrap_or_default(),
            response.reason.unwrap_or("Unknown reason")
        ),
        Err(_) => format!("{:?}", String::from_utf8_lossy(head)),
    }
}

#[async_trait]
impl NegotiatorTrait for HttpConnectNegotiator {
    async fn negotiate<S>(&self, stream: &mut S, target: &TargetAddr) -> Result<(), ProbeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let connect_request = self.generate_connect_request(target);

        self.log_trace(target, "sending CONNECT request");
        stream.write_all(connect_request.as_bytes()).await?;

        let head = read_reply_head(stream).await?;
        if !is_established(&head) {
            return Err(ProbeError::status(format!(
                "got response {}, expecting 200 Connection established",
                describe(&head)
            )));
        }

        self.log_trace(target, "tunnel established");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "HTTP"
    }
}
