use std::{io, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::{timeout, timeout_at, Instant},
};

use crate::{config::RawSocketTest, error::ProbeError};

/// Size of the buffer the raw response is read into.
const RESPONSE_BUFFER: usize = 4096;

/// The payload exchange that follows a successful handshake in raw-socket mode.
#[derive(Debug, Clone)]
pub struct Tail {
    payload: Option<Vec<u8>>,
    expect_response: bool,
    min_size: usize,
    read_timeout: Duration,
}

impl Tail {
    /// Prepares the exchange, decoding the hex payload once.
    ///
    /// # Arguments
    ///
    /// * `raw`: The raw-socket section of the configuration.
    /// * `read_timeout`: Budget for the response read.
    ///
    /// # Returns
    ///
    /// The prepared tail, or a configuration error for a malformed payload.
    pub fn new(raw: &RawSocketTest, read_timeout: Duration) -> Result<Self, ProbeError> {
        Ok(Self {
            payload: raw.payload()?,
            expect_response: raw.expect_response,
            min_size: raw.response_min_size,
            read_timeout,
        })
    }

    /// Writes the payload through the tunnel and validates the answer.
    ///
    /// The write is bounded by `deadline`; the response read gets a fresh
    /// deadline of its own and a single read must return at least the
    /// configured minimum number of bytes.
    ///
    /// # Returns
    ///
    /// The number of response bytes read, `0` when no response is expected.
    pub async fn exchange<S>(&self, stream: &mut S, deadline: Instant) -> Result<usize, ProbeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(payload) = &self.payload {
            timeout_at(deadline, stream.write_all(payload)).await??;
            timeout_at(deadline, stream.flush()).await??;
        }

        if !self.expect_response {
            return Ok(0);
        }

        let mut buf = [0u8; RESPONSE_BUFFER];
        let n = timeout(self.read_timeout, stream.read(&mut buf)).await??;
        if n == 0 {
            return Err(ProbeError::connection(
                io::ErrorKind::UnexpectedEof,
                "tunnel closed before the target responded",
            ));
        }
        if n < self.min_size {
            return Err(ProbeError::status(format!(
                "target sent {} bytes, expected at least {}",
                n, self.min_size
            )));
        }
        Ok(n)
    }
}
