//! Latency measurement: per-pair tables, the delivery recorder and the
//! single-writer aggregate collector.

mod clock;
pub mod collector;
mod recorder;
mod table;

pub use clock::{FleetClock, elapsed_ms};
pub use collector::{GlobalStats, Sample, SampleSender, StatsCollector, channel};
pub use recorder::{LatencyRecorder, RecordOutcome};
pub use table::PairTable;
