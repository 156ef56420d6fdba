use std::io;

use thiserror::Error;
use tokio::time::error::Elapsed;

/// Final classification of a single probe run.
///
/// Every probe produces exactly one of these; the first failing step decides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The candidate completed every check.
    Success,
    /// Dialing, reading or writing failed.
    ConnectionError,
    /// A deadline expired. Also counted as a connection error.
    TimeoutError,
    /// The proxy answered, but with a negative or malformed result.
    StatusError,
}

/// Errors raised while probing a candidate or while preparing a scanner.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection error: {0}")]
    Connection(#[source] io::Error),

    #[error("deadline exceeded")]
    Timeout,

    #[error("unexpected response: {0}")]
    Status(String),

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ProbeError {
    pub fn status<S: Into<String>>(msg: S) -> Self {
        Self::Status(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Builds a connection error that has no underlying OS error.
    pub fn connection<S: Into<String>>(kind: io::ErrorKind, msg: S) -> Self {
        Self::Connection(io::Error::new(kind, msg.into()))
    }

    /// Maps the error onto the counter it belongs to.
    ///
    /// Configuration problems that surface while probing are charged to the
    /// connection error counter, the candidate itself is not at fault but it
    /// was not validated either.
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Timeout => Outcome::TimeoutError,
            Self::Http(err) if err.is_timeout() => Outcome::TimeoutError,
            Self::Status(_) => Outcome::StatusError,
            Self::Connection(_) | Self::Http(_) | Self::Tls(_) | Self::Config(_) => {
                Outcome::ConnectionError
            }
        }
    }
}

impl From<io::Error> for ProbeError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            Self::Timeout
        } else {
            Self::Connection(err)
        }
    }
}

impl From<Elapsed> for ProbeError {
    fn from(_: Elapsed) -> Self {
        Self::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_io_errors_become_timeouts() {
        let err = ProbeError::from(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(matches!(err, ProbeError::Timeout));
        assert_eq!(err.outcome(), Outcome::TimeoutError);
    }

    #[test]
    fn other_io_errors_are_connection_errors() {
        let err = ProbeError::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(err.outcome(), Outcome::ConnectionError);
    }

    #[test]
    fn negative_replies_are_status_errors() {
        assert_eq!(
            ProbeError::status("rejected").outcome(),
            Outcome::StatusError
        );
    }
}
