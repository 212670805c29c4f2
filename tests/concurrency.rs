//! Concurrency tests for the recorder, barriers and client sessions.
//!
//! Many tasks feed one recorder or share one broker; totals must come out
//! exact regardless of interleaving.

mod harness;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use harness::TestBroker;
use mqfleet::stats::{self, FleetClock};
use mqfleet::{
    BrokerAddr, ConnectOptions, CountDownLatch, Delivery, Envelope, LatencyRecorder, MqttClient,
    QoS, ReceiveBarrier,
};
use tokio::sync::{Barrier, mpsc};
use tokio::task::JoinSet;

const PUBLISHERS: usize = 8;
const MESSAGES: u32 = 50;

fn sent_recorder(per_pair: u64) -> (Arc<LatencyRecorder>, stats::StatsCollector, tokio::sync::watch::Receiver<u64>) {
    let expected = PUBLISHERS as u64 * u64::from(MESSAGES) * per_pair;
    let (samples, collector, progress) = stats::channel(expected);
    let recorder = Arc::new(LatencyRecorder::new(
        FleetClock::new(),
        PUBLISHERS,
        MESSAGES,
        per_pair,
        samples,
    ));
    for origin in 0..PUBLISHERS as u32 {
        for sequence in 0..MESSAGES {
            recorder.mark_sent(origin, sequence).unwrap();
        }
    }
    (recorder, collector, progress)
}

fn all_payloads() -> Vec<Bytes> {
    (0..PUBLISHERS as u32)
        .flat_map(|origin| (0..MESSAGES).map(move |seq| Envelope::new(origin, seq).to_payload(16)))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_fanout_recording_is_exact() {
    const SUBSCRIBERS: usize = 4;

    let (recorder, collector, _progress) = sent_recorder(SUBSCRIBERS as u64);
    let collector = tokio::spawn(collector.run());
    let barrier = Arc::new(Barrier::new(SUBSCRIBERS));

    let mut set = JoinSet::new();
    for _ in 0..SUBSCRIBERS {
        let recorder = recorder.clone();
        let barrier = barrier.clone();
        set.spawn(async move {
            barrier.wait().await;
            for payload in all_payloads() {
                recorder.record(&payload);
            }
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    let stats = collector.await.unwrap();
    assert_eq!(stats.received, PUBLISHERS as u64 * u64::from(MESSAGES) * SUBSCRIBERS as u64);
    assert_eq!(recorder.duplicates(), 0);
    assert!(recorder.missing_pairs(1).is_empty());
    assert_eq!(
        recorder.elapsed().len(),
        PUBLISHERS * MESSAGES as usize
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_first_delivery_counts_duplicates() {
    const SUBSCRIBERS: usize = 4;
    let total = PUBLISHERS as u64 * u64::from(MESSAGES);

    let (recorder, collector, _progress) = sent_recorder(1);
    let collector = tokio::spawn(collector.run());
    let barrier = Arc::new(Barrier::new(SUBSCRIBERS));

    let mut set = JoinSet::new();
    for _ in 0..SUBSCRIBERS {
        let recorder = recorder.clone();
        let barrier = barrier.clone();
        set.spawn(async move {
            barrier.wait().await;
            for payload in all_payloads() {
                recorder.record(&payload);
            }
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    let stats = collector.await.unwrap();
    assert_eq!(stats.received, total);
    assert_eq!(recorder.duplicates(), total * (SUBSCRIBERS as u64 - 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_receive_barrier_releases_under_concurrent_load() {
    let (recorder, collector, progress) = sent_recorder(1);
    let expected = PUBLISHERS as u64 * u64::from(MESSAGES);
    let collector = tokio::spawn(collector.run());

    let mut barrier = ReceiveBarrier::new(
        progress,
        expected,
        Duration::from_millis(10),
        recorder.clone(),
    );

    let mut set = JoinSet::new();
    for origin in 0..PUBLISHERS as u32 {
        let recorder = recorder.clone();
        set.spawn(async move {
            for seq in 0..MESSAGES {
                recorder.record(&Envelope::new(origin, seq).to_payload(8));
                tokio::task::yield_now().await;
            }
        });
    }

    let received = tokio::time::timeout(Duration::from_secs(10), barrier.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, expected);

    while let Some(result) = set.join_next().await {
        result.unwrap();
    }
    assert_eq!(collector.await.unwrap().received, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_latch_releases_after_all_count_down() {
    const TASKS: usize = 100;

    let latch = Arc::new(CountDownLatch::new(TASKS));
    let mut set = JoinSet::new();
    for _ in 0..TASKS {
        let latch = latch.clone();
        set.spawn(async move {
            tokio::task::yield_now().await;
            latch.count_down();
        });
    }

    tokio::time::timeout(Duration::from_secs(5), latch.wait())
        .await
        .unwrap();
    assert_eq!(latch.remaining(), 0);

    while let Some(result) = set.join_next().await {
        result.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_barrier_synchronized_connect() {
    const NUM_CLIENTS: usize = 50;

    let (broker, addr) = TestBroker::spawn().await;
    let barrier = Arc::new(Barrier::new(NUM_CLIENTS));
    let success_count = Arc::new(AtomicUsize::new(0));

    let mut set = JoinSet::new();
    for i in 0..NUM_CLIENTS {
        let barrier = barrier.clone();
        let success = success_count.clone();

        set.spawn(async move {
            barrier.wait().await;

            let options =
                ConnectOptions::new(BrokerAddr::from(addr)).with_client_id(format!("sync-{}", i));
            let client = MqttClient::connect(options).await.unwrap();
            assert!(client.is_connected());
            client.disconnect().await.unwrap();

            success.fetch_add(1, Ordering::Relaxed);
        });
    }

    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    assert_eq!(success_count.load(Ordering::Relaxed), NUM_CLIENTS);
    assert_eq!(broker.metrics().connections.load(Ordering::Relaxed), NUM_CLIENTS);
    broker.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_clients_receive_own_topics() {
    const NUM_CLIENTS: usize = 20;
    const MESSAGES_EACH: usize = 10;

    let (broker, addr) = TestBroker::spawn().await;
    let mut set = JoinSet::new();

    for i in 0..NUM_CLIENTS {
        set.spawn(async move {
            let options =
                ConnectOptions::new(BrokerAddr::from(addr)).with_client_id(format!("own-{}", i));
            let client = MqttClient::connect(options).await.unwrap();

            let topic = format!("clients/{}", i);
            let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
            let handler = Arc::new(move |delivery: &Delivery| {
                let _ = tx.send(delivery.payload.clone());
            });
            client.subscribe(&topic, QoS::AtLeastOnce, handler).await.unwrap();

            for n in 0..MESSAGES_EACH {
                let payload = Bytes::from(format!("{}:{}", i, n));
                client.publish(&topic, QoS::AtLeastOnce, payload).await.unwrap();
            }

            // Per-topic ordering holds for a single publisher.
            for n in 0..MESSAGES_EACH {
                let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(got, Bytes::from(format!("{}:{}", i, n)));
            }

            client.disconnect().await.unwrap();
        });
    }

    while let Some(result) = set.join_next().await {
        result.unwrap();
    }
    broker.shutdown().await;
}
