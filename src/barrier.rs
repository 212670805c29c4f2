//! Fleet rendezvous points.
//!
//! - all-registered / all-done: [`CountDownLatch`], waited on by the driver
//! - all-subscribed: [`tokio::sync::Barrier`], every worker arrives and waits
//! - all-received: [`ReceiveBarrier`] polls the received count and opens a
//!   [`Gate`] that workers wait behind

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Barrier, watch};
use tokio::time::{Instant, timeout};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::stats::LatencyRecorder;

/// Number of incomplete pairs reported with a stall.
const STALL_SAMPLE: usize = 16;

/// One-shot count-down latch.
#[derive(Debug)]
pub struct CountDownLatch {
    remaining: watch::Sender<usize>,
}

impl CountDownLatch {
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            remaining: watch::Sender::new(count),
        }
    }

    pub fn count_down(&self) {
        self.remaining.send_modify(|n| *n = n.saturating_sub(1));
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    /// Wait until the count reaches zero.
    pub async fn wait(&self) {
        let mut rx = self.remaining.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// A gate that stays open once opened.
#[derive(Debug)]
pub struct Gate {
    open: watch::Sender<bool>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: watch::Sender::new(false),
        }
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.open.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Barriers shared by every worker of one run.
#[derive(Debug)]
pub struct FleetBarriers {
    pub subscribed: Barrier,
    pub received: Gate,
    pub done: CountDownLatch,
}

impl FleetBarriers {
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            subscribed: Barrier::new(workers),
            received: Gate::new(),
            done: CountDownLatch::new(workers),
        }
    }
}

/// Polled receive-completion condition.
///
/// Every `poll_interval` the received count is logged and checked for a
/// stall; an exact match with `expected` wakes the barrier early. It
/// releases only on an exact match.
#[derive(Debug)]
pub struct ReceiveBarrier {
    progress: watch::Receiver<u64>,
    expected: u64,
    poll_interval: Duration,
    stall_timeout: Option<Duration>,
    recorder: Arc<LatencyRecorder>,
}

impl ReceiveBarrier {
    #[must_use]
    pub fn new(
        progress: watch::Receiver<u64>,
        expected: u64,
        poll_interval: Duration,
        recorder: Arc<LatencyRecorder>,
    ) -> Self {
        Self {
            progress,
            expected,
            poll_interval,
            stall_timeout: None,
            recorder,
        }
    }

    /// Fail instead of waiting forever when the count stops moving.
    #[must_use]
    pub fn with_stall_timeout(mut self, stall_timeout: Option<Duration>) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    #[must_use]
    pub const fn expected(&self) -> u64 {
        self.expected
    }

    /// Wait until exactly `expected` messages have been counted.
    ///
    /// # Errors
    ///
    /// - `Error::ReceiveStalled` if a stall timeout is set and the count
    ///   made no progress for that long
    /// - `Error::TaskFailed` if the stats collector stopped short
    pub async fn wait(&mut self) -> Result<u64> {
        let expected = self.expected;
        let mut last = *self.progress.borrow();
        let mut last_progress = Instant::now();

        loop {
            let waited = timeout(
                self.poll_interval,
                self.progress.wait_for(|received| *received == expected),
            )
            .await
            .map(|matched| matched.is_ok());

            match waited {
                Ok(true) => {
                    info!(received = expected, expected, "all messages received");
                    return Ok(expected);
                }
                Ok(false) => {
                    let received = *self.progress.borrow();
                    if received == expected {
                        return Ok(expected);
                    }
                    return Err(Error::TaskFailed(format!(
                        "stats collector stopped at {}/{} messages",
                        received, expected
                    )));
                }
                Err(_) => {
                    let received = *self.progress.borrow();
                    info!(received, expected, "waiting for messages");

                    if received != last {
                        last = received;
                        last_progress = Instant::now();
                    } else if let Some(limit) = self.stall_timeout {
                        if last_progress.elapsed() >= limit {
                            let missing = self.recorder.missing_pairs(STALL_SAMPLE);
                            warn!(received, expected, ?missing, "receive stalled");
                            return Err(Error::ReceiveStalled {
                                received,
                                expected,
                                missing,
                            });
                        }
                    }
                }
            }
        }
    }
}
