//! Bounded polling between a mutation and its observable effect.
//!
//! Cluster and database convergence is asynchronous, so a wait that hits its deadline is reported
//! as success: callers treat "not yet observed" as best-effort, never as a failure.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::telemetry::SYNC_WAIT_TIMEOUTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Observed,
    DeadlineElapsed,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncWaiter {
    pub interval: Duration,
    pub timeout: Duration,
}

impl SyncWaiter {
    pub fn new(interval: Duration, timeout: Duration) -> Self { Self { interval, timeout } }

    /// Poll `check` every `interval` until it yields `Ok(true)` or `timeout` elapses.
    /// Predicate errors count as "not yet".
    pub async fn wait_for<F, Fut, E>(&self, what: &str, mut check: F) -> WaitOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: std::fmt::Display,
    {
        let deadline = Instant::now() + self.timeout;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match check().await {
                Ok(true) => {
                    debug!(what, attempt, "sync_wait.observed");
                    return WaitOutcome::Observed;
                }
                Ok(false) => {}
                Err(e) => debug!(what, attempt, error=%e, "sync_wait.check_failed"),
            }
            if Instant::now() + self.interval > deadline {
                warn!(what, attempt, timeout_ms=self.timeout.as_millis() as u64, "sync_wait.deadline_elapsed");
                SYNC_WAIT_TIMEOUTS.inc();
                return WaitOutcome::DeadlineElapsed;
            }
            sleep(self.interval).await;
        }
    }
}
