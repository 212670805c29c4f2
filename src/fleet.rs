//! Run-mode driver.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::info;

use crate::barrier::{FleetBarriers, ReceiveBarrier};
use crate::config::FleetConfig;
use crate::credentials::ClientRecord;
use crate::error::{Error, Result};
use crate::report::{ReportInput, Summary, report};
use crate::stats::{self, FleetClock, LatencyRecorder};
use crate::transport::Transport;
use crate::worker::{ClientWorker, FleetContext, Role};

/// Run one measurement over `records` and return its summary.
///
/// At most `config.clients` records are used; their position becomes the
/// client index, and the first `config.publishing_clients` of them publish.
/// A failure in any worker aborts all of them.
///
/// # Errors
///
/// - `Error::InvalidConfig` for an invalid config or no records
/// - the first worker error (connect, subscribe, publish, unsubscribe)
/// - `Error::ReceiveStalled` if stall detection is enabled and triggers
pub async fn run_fleet<T: Transport>(
    transport: Arc<T>,
    records: Vec<ClientRecord>,
    config: FleetConfig,
) -> Result<Summary> {
    config.validate()?;

    let records: Vec<ClientRecord> = records
        .into_iter()
        .take(config.clients)
        .enumerate()
        .map(|(index, record)| ClientRecord { index, ..record })
        .collect();
    if records.is_empty() {
        return Err(Error::InvalidConfig("no client records to run".to_string()));
    }

    let subscribers = records.len();
    let publishers = config.publishers(subscribers);
    let expected = config.expected_receipts(subscribers);

    let (samples, collector, progress) = stats::channel(expected);
    let recorder = Arc::new(LatencyRecorder::new(
        FleetClock::new(),
        publishers,
        config.messages_per_client,
        config.accounting.deliveries_per_message(subscribers),
        samples,
    ));
    let collector = tokio::spawn(collector.run());
    let barriers = Arc::new(FleetBarriers::new(subscribers));

    info!(
        subscribers,
        publishers,
        messages = config.messages_per_client,
        expected,
        accounting = %config.accounting,
        topic = %config.topic,
        qos = %config.qos,
        "starting fleet"
    );

    let config = Arc::new(config);
    let ctx = FleetContext {
        config: Arc::clone(&config),
        transport,
        recorder: Arc::clone(&recorder),
        barriers: Arc::clone(&barriers),
    };

    let mut workers = JoinSet::new();
    for record in records {
        let role = if record.index < publishers {
            Role::PublisherAndSubscriber
        } else {
            Role::SubscriberOnly
        };
        workers.spawn(ClientWorker::new(record, role, ctx.clone()).run());

        if !config.spawn_pacing.is_zero() {
            tokio::time::sleep(config.spawn_pacing).await;
        }
    }
    drop(ctx);

    let mut receive = ReceiveBarrier::new(
        progress,
        expected,
        config.poll_interval,
        Arc::clone(&recorder),
    )
    .with_stall_timeout(config.stall_timeout);

    tokio::select! {
        received = receive.wait() => { received?; }
        Some(failure) = first_failure(&mut workers) => return Err(failure),
    }
    barriers.received.open();

    tokio::select! {
        () = barriers.done.wait() => {}
        Some(failure) = first_failure(&mut workers) => return Err(failure),
    }
    while let Some(joined) = workers.join_next().await {
        joined??;
    }

    let stats = collector.await?;
    let summary = report(ReportInput {
        elapsed: recorder.elapsed(),
        stats: &stats,
        fleet_start_ns: recorder.fleet_start_ns(),
        published: publishers as u64 * u64::from(config.messages_per_client),
        subscribers,
        messages_per_client: config.messages_per_client,
        duplicates: recorder.duplicates(),
        malformed: recorder.malformed(),
    });
    info!(
        received = summary.received,
        serial_ms = summary.serial_ms,
        parallel_ms = summary.parallel_ms,
        "fleet finished"
    );
    Ok(summary)
}

/// Wait for the first worker that fails. Workers finishing cleanly are
/// skipped; `None` once the set is empty.
async fn first_failure(workers: &mut JoinSet<Result<()>>) -> Option<Error> {
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Some(e),
            Err(e) => return Some(e.into()),
        }
    }
    None
}
