mod http;
mod socks4;
mod socks5;

use std::fmt::Display;

use async_trait::async_trait;
pub use http::HttpConnectNegotiator;
pub use socks4::Socks4Negotiator;
pub use socks5::{read_reply, ReplyFraming, Socks5Negotiator};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{error::ProbeError, proxy::models::TargetAddr};

/// A proxy handshake that turns a fresh connection into a tunnel.
#[async_trait]
pub trait NegotiatorTrait {
    /// Runs the handshake on `stream`, asking the proxy to connect to `target`.
    ///
    /// On success every byte of the proxy's reply has been consumed, so the
    /// next read on `stream` returns data from the target. The caller owns the
    /// deadline.
    async fn negotiate<S>(&self, stream: &mut S, target: &TargetAddr) -> Result<(), ProbeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send;

    /// Short protocol name used in log lines.
    fn name(&self) -> &'static str;

    /// Logs a trace message.
    ///
    /// # Arguments
    ///
    /// * `target`: The destination being negotiated.
    /// * `msg`: The message to log.
    #[allow(unused_variables)]
    fn log_trace<S>(&self, target: &TargetAddr, msg: S)
    where
        S: Display,
    {
        #[cfg(feature = "log")]
        log::trace!("{} -> {}: {}", self.name(), target, msg);
    }
}
