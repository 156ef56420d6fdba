use std::{
    fmt::Display,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::error::Outcome;

/// Outcome counters shared by every probe of a validator.
///
/// Only ever touched through atomic increments.
#[derive(Debug, Default)]
pub struct Counters {
    checked: AtomicU64,
    success: AtomicU64,
    connection_errors: AtomicU64,
    timeout_errors: AtomicU64,
    status_errors: AtomicU64,
}

impl Counters {
    /// Records the outcome of one probe. Timeouts also count as connection errors.
    pub fn record(&self, outcome: Outcome) {
        match outcome {
            Outcome::Success => {
                self.success.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::ConnectionError => {
                self.connection_errors.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::TimeoutError => {
                self.connection_errors.fetch_add(1, Ordering::Relaxed);
                self.timeout_errors.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::StatusError => {
                self.status_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn inc_checked(&self) {
        self.checked.fetch_add(1, Ordering::Release);
    }

    /// Reads every counter.
    ///
    /// The values are read one by one, so a snapshot taken while probes are
    /// running may be off by the probes completing in between.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            checked: self.checked.load(Ordering::Acquire),
            success: self.success.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            timeout_errors: self.timeout_errors.load(Ordering::Relaxed),
            status_errors: self.status_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub checked: u64,
    pub success: u64,
    pub connection_errors: u64,
    pub timeout_errors: u64,
    pub status_errors: u64,
}

impl Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "checked: {} | good: {} | connection errors: {} (timeouts: {}) | bad responses: {}",
            self.checked,
            self.success,
            self.connection_errors,
            self.timeout_errors,
            self.status_errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_connection_errors_too() {
        let counters = Counters::default();
        counters.record(Outcome::TimeoutError);
        counters.record(Outcome::ConnectionError);
        counters.record(Outcome::StatusError);
        counters.record(Outcome::Success);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.connection_errors, 2);
        assert_eq!(snapshot.timeout_errors, 1);
        assert_eq!(snapshot.status_errors, 1);
        assert_eq!(snapshot.success, 1);
        assert_eq!(snapshot.checked, 0);
    }
}
