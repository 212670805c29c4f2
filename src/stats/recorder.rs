use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use super::clock::{FleetClock, elapsed_ms};
use super::collector::{Sample, SampleSender};
use super::table::PairTable;
use crate::client::{Delivery, DeliveryHandler};
use crate::error::{Error, Result};
use crate::protocol::Envelope;

/// What happened to one delivered payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Counted toward the fleet total.
    Recorded(Sample),
    /// Pair already received as often as accounting allows.
    Duplicate,
    /// Payload shorter than the envelope.
    Malformed,
    /// Envelope names a pair that was never sent.
    UnknownPair,
}

/// Per-message latency bookkeeping shared by every worker.
///
/// Send times, accumulated elapsed times and delivery counts live in
/// pre-sized lock-free tables indexed by `(origin, sequence)`. Aggregates
/// are not touched here: each counted delivery becomes a [`Sample`] for the
/// stats collector.
#[derive(Debug)]
pub struct LatencyRecorder {
    clock: FleetClock,
    /// Send time in clock nanoseconds; 0 means not yet sent.
    sent: PairTable,
    elapsed: PairTable,
    deliveries: PairTable,
    deliveries_per_pair: u64,
    fleet_start: OnceLock<u64>,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    samples: SampleSender,
}

impl LatencyRecorder {
    /// Size the tables for `publishers × messages` pairs, each counted up to
    /// `deliveries_per_pair` times.
    #[must_use]
    pub fn new(
        clock: FleetClock,
        publishers: usize,
        messages: u32,
        deliveries_per_pair: u64,
        samples: SampleSender,
    ) -> Self {
        let messages = messages as usize;
        Self {
            clock,
            sent: PairTable::new(publishers, messages),
            elapsed: PairTable::new(publishers, messages),
            deliveries: PairTable::new(publishers, messages),
            deliveries_per_pair,
            fleet_start: OnceLock::new(),
            duplicates: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            samples,
        }
    }

    #[must_use]
    pub const fn clock(&self) -> &FleetClock {
        &self.clock
    }

    /// Record the fleet start time. Only the first call has an effect;
    /// every call returns the recorded value.
    pub fn mark_fleet_start(&self) -> u64 {
        *self.fleet_start.get_or_init(|| self.clock.now_ns())
    }

    #[must_use]
    pub fn fleet_start_ns(&self) -> Option<u64> {
        self.fleet_start.get().copied()
    }

    /// Stamp the send time of `(origin, sequence)`.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownPair` if the pair lies outside the tables.
    pub fn mark_sent(&self, origin: u32, sequence: u32) -> Result<()> {
        let now = self.clock.now_ns().max(1);
        if self.sent.store(origin, sequence, now) {
            Ok(())
        } else {
            Err(Error::UnknownPair { origin, sequence })
        }
    }

    /// Account for one delivered payload.
    pub fn record(&self, payload: &[u8]) -> RecordOutcome {
        let received_ns = self.clock.now_ns();

        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "dropping malformed payload");
                return RecordOutcome::Malformed;
            }
        };
        let (origin, sequence) = (envelope.origin, envelope.sequence);

        let sent_ns = match self.sent.get(origin, sequence) {
            Some(ns) if ns != 0 => ns,
            _ => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(client = origin, seq = sequence, "dropping payload for unknown pair");
                return RecordOutcome::UnknownPair;
            }
        };

        let previous = self.deliveries.add(origin, sequence, 1).unwrap_or(u64::MAX);
        if previous >= self.deliveries_per_pair {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(client = origin, seq = sequence, "duplicate delivery");
            return RecordOutcome::Duplicate;
        }

        let elapsed_ms = elapsed_ms(sent_ns, received_ns);
        self.elapsed.add(origin, sequence, elapsed_ms);

        let sample = Sample {
            origin,
            sequence,
            elapsed_ms,
            received_ns,
        };
        // The collector stops listening once the expected total is reached.
        let _ = self.samples.send(sample);
        RecordOutcome::Recorded(sample)
    }

    /// Delivery callback feeding [`LatencyRecorder::record`].
    #[must_use]
    pub fn handler(self: &Arc<Self>) -> DeliveryHandler {
        let recorder = Arc::clone(self);
        Arc::new(move |delivery: &Delivery| {
            recorder.record(&delivery.payload);
        })
    }

    #[must_use]
    pub fn elapsed(&self) -> &PairTable {
        &self.elapsed
    }

    #[must_use]
    pub fn elapsed_ms(&self, origin: u32, sequence: u32) -> Option<u64> {
        self.elapsed.get(origin, sequence)
    }

    #[must_use]
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Up to `limit` pairs that have not yet been delivered often enough.
    #[must_use]
    pub fn missing_pairs(&self, limit: usize) -> Vec<(u32, u32)> {
        self.deliveries
            .iter()
            .filter(|(_, count)| *count < self.deliveries_per_pair)
            .map(|(pair, _)| pair)
            .take(limit)
            .collect()
    }
}
