use tokio::sync::{mpsc, watch};
use tracing::trace;

/// One counted delivery, sent from a recorder to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub origin: u32,
    pub sequence: u32,
    pub elapsed_ms: u64,
    pub received_ns: u64,
}

/// Fleet-wide aggregates, owned by the collector task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalStats {
    pub min_latency_ms: Option<u64>,
    pub max_latency_ms: Option<u64>,
    pub received: u64,
    /// Receipt time of the latest counted delivery.
    pub span_end_ns: Option<u64>,
}

impl GlobalStats {
    pub fn apply(&mut self, sample: &Sample) {
        self.min_latency_ms = Some(
            self.min_latency_ms
                .map_or(sample.elapsed_ms, |min| min.min(sample.elapsed_ms)),
        );
        self.max_latency_ms = Some(
            self.max_latency_ms
                .map_or(sample.elapsed_ms, |max| max.max(sample.elapsed_ms)),
        );
        self.span_end_ns = Some(
            self.span_end_ns
                .map_or(sample.received_ns, |end| end.max(sample.received_ns)),
        );
        self.received += 1;
    }
}

pub type SampleSender = mpsc::UnboundedSender<Sample>;

/// Single writer for [`GlobalStats`].
///
/// Consumes samples until `expected` have been counted or every sender is
/// gone, publishing the running count on a watch channel.
#[derive(Debug)]
pub struct StatsCollector {
    samples: mpsc::UnboundedReceiver<Sample>,
    progress: watch::Sender<u64>,
    expected: u64,
    stats: GlobalStats,
}

/// Create a collector expecting `expected` samples.
pub fn channel(expected: u64) -> (SampleSender, StatsCollector, watch::Receiver<u64>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (progress, progress_rx) = watch::channel(0);
    let collector = StatsCollector {
        samples: rx,
        progress,
        expected,
        stats: GlobalStats::default(),
    };
    (tx, collector, progress_rx)
}

impl StatsCollector {
    pub async fn run(mut self) -> GlobalStats {
        while self.stats.received < self.expected {
            let Some(sample) = self.samples.recv().await else {
                break;
            };
            self.stats.apply(&sample);
            trace!(
                client = sample.origin,
                seq = sample.sequence,
                elapsed_ms = sample.elapsed_ms,
                received = self.stats.received,
                "sample"
            );
            self.progress.send_replace(self.stats.received);
        }
        self.stats
    }
}
