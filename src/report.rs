//! Final aggregation and summary rendering.

use serde::Serialize;

use crate::stats::{GlobalStats, PairTable, elapsed_ms};

/// Inputs to [`report`], read once after every worker is done.
#[derive(Debug, Clone, Copy)]
pub struct ReportInput<'a> {
    pub elapsed: &'a PairTable,
    pub stats: &'a GlobalStats,
    pub fleet_start_ns: Option<u64>,
    /// Messages published by the whole fleet.
    pub published: u64,
    pub subscribers: usize,
    pub messages_per_client: u32,
    pub duplicates: u64,
    pub malformed: u64,
}

/// Fleet latency summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub published: u64,
    pub subscribers: usize,
    pub received: u64,
    /// Sum of every recorded round trip.
    pub serial_ms: u64,
    /// Wall clock from the first publish to the last counted receipt.
    pub parallel_ms: u64,
    pub max_ms: Option<u64>,
    pub min_ms: Option<u64>,
    /// `serial_ms / received`, 0 when nothing was received.
    pub avg_ms: u64,
    /// `serial_ms / (subscribers × messages_per_client)`. Under fan-out
    /// accounting this is the per-subscriber figure: every subscriber's
    /// round trips for one message slot, summed over publishers.
    pub subscriber_avg_ms: u64,
    pub duplicates: u64,
    pub malformed: u64,
}

/// Compute the summary of a finished run.
#[must_use]
pub fn report(input: ReportInput<'_>) -> Summary {
    let serial_ms = input.elapsed.sum();
    let received = input.stats.received;

    let parallel_ms = match (input.fleet_start_ns, input.stats.span_end_ns) {
        (Some(start), Some(end)) => elapsed_ms(start, end),
        _ => 0,
    };

    Summary {
        published: input.published,
        subscribers: input.subscribers,
        received,
        serial_ms,
        parallel_ms,
        max_ms: input.stats.max_latency_ms,
        min_ms: input.stats.min_latency_ms,
        avg_ms: serial_ms.checked_div(received).unwrap_or(0),
        subscriber_avg_ms: serial_ms
            .checked_div(input.subscribers as u64 * u64::from(input.messages_per_client))
            .unwrap_or(0),
        duplicates: input.duplicates,
        malformed: input.malformed,
    }
}

struct Ms(Option<u64>);

impl std::fmt::Display for Ms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(ms) => write!(f, "{} ms", ms),
            None => write!(f, "-"),
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Pub: {}, Sub: {}, Received: {}",
            self.published, self.subscribers, self.received
        )?;
        write!(
            f,
            "Serial: {} ms, Parallel: {} ms, Max: {}, Min: {}, Avg: {} ms, Sub avg: {} ms",
            self.serial_ms,
            self.parallel_ms,
            Ms(self.max_ms),
            Ms(self.min_ms),
            self.avg_ms,
            self.subscriber_avg_ms
        )?;
        if self.duplicates > 0 || self.malformed > 0 {
            write!(
                f,
                "\nDuplicates: {}, Malformed: {}",
                self.duplicates, self.malformed
            )?;
        }
        Ok(())
    }
}
