//! Bounded polling for UI state that has no event to await

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{E2eError, E2eResult};

/// Back-off between probes; the last entry repeats
pub const DEFAULT_INTERVALS: [Duration; 4] = [
    Duration::from_millis(100),
    Duration::from_millis(250),
    Duration::from_millis(500),
    Duration::from_millis(1000),
];

/// Outcome of a poll
#[derive(Debug, Clone, PartialEq)]
pub enum Polled<T> {
    Ready(T),
    TimedOut(Duration),
}

impl<T> Polled<T> {
    /// Turn a timeout into the caller's typed error
    pub fn ready_or(self, on_timeout: impl FnOnce(Duration) -> E2eError) -> E2eResult<T> {
        match self {
            Polled::Ready(value) => Ok(value),
            Polled::TimedOut(elapsed) => Err(on_timeout(elapsed)),
        }
    }
}

/// Runs a probe until it yields a value or the deadline passes
#[derive(Debug, Clone)]
pub struct Poller {
    timeout: Duration,
    intervals: Vec<Duration>,
}

impl Poller {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            intervals: DEFAULT_INTERVALS.to_vec(),
        }
    }

    pub fn with_intervals(mut self, intervals: &[Duration]) -> Self {
        if !intervals.is_empty() {
            self.intervals = intervals.to_vec();
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe until `Some`, a non-transient error, or the deadline.
    ///
    /// The probe always runs at least once. A probe that itself hangs is cut
    /// off at the deadline.
    pub async fn poll<T, F, Fut>(&self, mut probe: F) -> E2eResult<Polled<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = E2eResult<Option<T>>>,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut attempt = 0usize;

        loop {
            let remaining = deadline
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(50));

            match tokio::time::timeout(remaining, probe()).await {
                Ok(Ok(Some(value))) => return Ok(Polled::Ready(value)),
                Ok(Ok(None)) => {}
                Ok(Err(e)) if e.is_transient() => trace!("Transient failure while polling: {}", e),
                Ok(Err(e)) => return Err(e),
                Err(_) => trace!("Probe did not finish before the deadline"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Polled::TimedOut(start.elapsed()));
            }

            let interval = self
                .intervals
                .get(attempt)
                .or(self.intervals.last())
                .copied()
                .unwrap_or(DEFAULT_INTERVALS[0]);
            attempt += 1;

            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }
}
