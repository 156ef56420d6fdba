mod checker;
mod counters;
mod tail;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use hashbrown::HashSet;
use tokio::{task::JoinHandle, time};

use checker::Plan;
pub use counters::{Counters, Snapshot};

use crate::{
    config::Config,
    error::{Outcome, ProbeError},
    exporter::Exporter,
    printer::Printer,
    proxy::models::{Candidate, Protocol},
};

/// Candidates waiting for a probe and candidates being probed.
///
/// Both sets live behind one lock so that picking a candidate and marking it
/// as processing happen in a single step.
#[derive(Debug, Default)]
struct Queue {
    pending: HashSet<Candidate>,
    processing: HashSet<Candidate>,
}

impl Queue {
    fn take_next(&mut self) -> Option<Candidate> {
        let candidate = self
            .pending
            .iter()
            .find(|candidate| !self.processing.contains(*candidate))
            .cloned()?;
        self.pending.remove(&candidate);
        self.processing.insert(candidate.clone());
        Some(candidate)
    }
}

struct Shared {
    plan: Plan,
    default_port: u16,
    threads: usize,
    poll_interval: Duration,
    queue: Mutex<Queue>,
    in_flight: AtomicUsize,
    counters: Counters,
    exporter: Arc<dyn Exporter>,
    printer: Option<Arc<dyn Printer>>,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases a dispatched candidate once its probe is over, however it ends.
struct Slot {
    shared: Arc<Shared>,
    candidate: Candidate,
}

impl Drop for Slot {
    fn drop(&mut self) {
        // `checked` must be visible before the slot is released.
        self.shared.counters.inc_checked();
        self.shared.queue().processing.remove(&self.candidate);
        self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Proxy scanner: accepts candidates, dispatches bounded concurrent probes and
/// keeps the outcome counters.
///
/// Cloning is cheap; every clone drives the same scanner.
#[derive(Clone)]
pub struct ProxyValidator {
    shared: Arc<Shared>,
}

impl ProxyValidator {
    /// Creates a new scanner.
    ///
    /// # Arguments
    ///
    /// * `config`: The scanner configuration, validated here.
    /// * `exporter`: Receives the address of every working proxy.
    /// * `printer`: Notified of every working proxy when `print_ips.enabled` is set.
    ///
    /// # Returns
    ///
    /// The scanner, or a configuration error for an unknown mode, a malformed
    /// payload, an oversized raw target hostname or an invalid check-site.
    pub fn new(
        config: &Config,
        exporter: Arc<dyn Exporter>,
        printer: Option<Arc<dyn Printer>>,
    ) -> Result<Self, ProbeError> {
        let plan = Plan::from_config(config)?;

        #[cfg(feature = "log")]
        log::info!(
            "scanning {} proxies with up to {} concurrent probes{}",
            plan.protocol,
            config.threads,
            if config.raw_socket_test.enabled {
                " (raw socket mode)"
            } else {
                ""
            }
        );

        Ok(Self {
            shared: Arc::new(Shared {
                plan,
                default_port: config.default_port,
                threads: config.threads.max(1),
                poll_interval: config.poll_interval(),
                queue: Mutex::new(Queue::default()),
                in_flight: AtomicUsize::new(0),
                counters: Counters::default(),
                exporter,
                printer: printer.filter(|_| config.print_ips.enabled),
            }),
        })
    }

    /// The probing mode every candidate is checked with.
    pub fn protocol(&self) -> Protocol {
        self.shared.plan.protocol
    }

    /// Queues a candidate address.
    ///
    /// # Arguments
    ///
    /// * `address`: `host`, `host:port` or `[v6]:port`; the configured default
    ///   port applies when the port is missing.
    ///
    /// # Returns
    ///
    /// `true` if the candidate was queued, `false` if it is already pending or
    /// being probed, or an error when the address cannot be parsed.
    pub fn insert(&self, address: &str) -> Result<bool, ProbeError> {
        let candidate = Candidate::parse(address, self.shared.default_port)?;
        let mut queue = self.shared.queue();
        if queue.processing.contains(&candidate) {
            return Ok(false);
        }
        Ok(queue.pending.insert(candidate))
    }

    /// Runs one scheduling step.
    ///
    /// # Returns
    ///
    /// The handle of the probe that was dispatched, or `None` when the
    /// concurrency ceiling is reached or nothing is pending.
    pub fn tick(&self) -> Option<JoinHandle<Outcome>> {
        if self.shared.in_flight.load(Ordering::Acquire) >= self.shared.threads {
            return None;
        }

        let candidate = self.shared.queue().take_next()?;
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);

        let slot = Slot {
            shared: Arc::clone(&self.shared),
            candidate,
        };
        Some(tokio::spawn(run_probe(slot)))
    }

    /// Runs the scheduling loop forever.
    pub async fn run(&self) {
        loop {
            self.tick();
            time::sleep(self.shared.poll_interval).await;
        }
    }

    /// Runs the scheduling loop until nothing is pending or in flight.
    pub async fn run_until_idle(&self) {
        loop {
            self.tick();
            if self.is_idle() {
                break;
            }
            time::sleep(self.shared.poll_interval).await;
        }
    }

    /// Returns the outcome counters.
    pub fn counters(&self) -> &Counters {
        &self.shared.counters
    }

    /// Number of probes currently running.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn pending_len(&self) -> usize {
        self.shared.queue().pending.len()
    }

    pub fn processing_len(&self) -> usize {
        self.shared.queue().processing.len()
    }

    /// `true` when nothing is pending, processing or in flight.
    pub fn is_idle(&self) -> bool {
        let queue = self.shared.queue();
        queue.pending.is_empty() && queue.processing.is_empty() && self.in_flight() == 0
    }
}

async fn run_probe(slot: Slot) -> Outcome {
    let shared = Arc::clone(&slot.shared);
    let candidate = &slot.candidate;

    #[cfg(feature = "log")]
    log::trace!("{}: probing as {}", candidate, shared.plan.protocol);

    let outcome = match checker::probe(&shared.plan, candidate).await {
        Ok(()) => {
            #[cfg(feature = "log")]
            log::debug!("{}: working {} proxy", candidate, shared.plan.protocol);

            if let Some(printer) = shared.printer.clone() {
                let protocol = shared.plan.protocol;
                let candidate = candidate.clone();
                tokio::spawn(async move { printer.print(protocol, &candidate) });
            }
            shared.exporter.add(candidate.to_string());
            Outcome::Success
        }
        Err(e) => {
            #[cfg(feature = "log")]
            log::trace!("{}: {}", candidate, e);
            e.outcome()
        }
    };

    shared.counters.record(outcome);
    outcome
}
