//! In-process MQTT broker for fleet tests.
//!
//! Speaks just enough MQTT 3.1.1 for the fleet: CONNECT with optional
//! refusal, SUBSCRIBE/UNSUBSCRIBE, PUBLISH fan-out to every matching
//! subscription at QoS 0/1/2, and PINGREQ. Deliveries can be delayed to
//! give measurable round trips.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use mqfleet::protocol::{ConnAck, Publish, SubAck, topic_matches};
use mqfleet::{Limits, MqttCodec, Packet, QoS};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// Knobs for misbehaving brokers.
#[derive(Debug, Clone, Default)]
pub struct BrokerOptions {
    /// Refuse CONNECT from these client ids with return code 5.
    pub refuse_client_ids: Vec<String>,
    /// Acknowledge but never route the first N publishes.
    pub drop_publishes: u64,
    /// Hold every outgoing PUBLISH this long before writing it.
    pub delivery_delay: Duration,
}

#[derive(Debug, Default)]
pub struct BrokerMetrics {
    pub connections: AtomicUsize,
    pub refused: AtomicUsize,
    pub publishes: AtomicU64,
    pub dropped: AtomicU64,
    pub deliveries: AtomicU64,
    pub disconnects: AtomicUsize,
}

impl BrokerMetrics {
    pub fn report(&self) {
        println!("\n=== Broker Report ===");
        println!(
            "Connections: {} ({} refused)",
            self.connections.load(Ordering::Relaxed),
            self.refused.load(Ordering::Relaxed)
        );
        println!(
            "Publishes:   {} ({} dropped)",
            self.publishes.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed)
        );
        println!("Deliveries:  {}", self.deliveries.load(Ordering::Relaxed));
        println!("Disconnects: {}", self.disconnects.load(Ordering::Relaxed));
        println!("=====================\n");
    }
}

struct Subscription {
    conn: u64,
    filter: String,
    qos: QoS,
    outbound: mpsc::UnboundedSender<Packet>,
    next_id: Arc<AtomicU16>,
}

struct BrokerState {
    options: BrokerOptions,
    subscriptions: Mutex<Vec<Subscription>>,
    metrics: BrokerMetrics,
    next_conn: AtomicU64,
}

impl BrokerState {
    fn route(&self, topic: &str, qos: QoS, payload: Bytes) {
        let subs = self.subscriptions.lock().unwrap();
        for sub in subs.iter().filter(|s| topic_matches(&s.filter, topic)) {
            let qos = qos.min(sub.qos);
            let packet_id = qos.needs_packet_id().then(|| next_packet_id(&sub.next_id));
            let delivery = Publish::new(topic, qos, packet_id, payload.clone());
            if sub.outbound.send(Packet::Publish(delivery)).is_ok() {
                self.metrics.deliveries.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn next_packet_id(counter: &AtomicU16) -> u16 {
    loop {
        let id = counter.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

pub struct TestBroker {
    state: Arc<BrokerState>,
    accept: JoinHandle<()>,
}

impl TestBroker {
    pub async fn spawn() -> (Self, SocketAddr) {
        Self::spawn_with(BrokerOptions::default()).await
    }

    pub async fn spawn_with(options: BrokerOptions) -> (Self, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(BrokerState {
            options,
            subscriptions: Mutex::new(Vec::new()),
            metrics: BrokerMetrics::default(),
            next_conn: AtomicU64::new(1),
        });

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let _ = stream.set_nodelay(true);
                connections.spawn(serve(Arc::clone(&accept_state), stream));
            }
        });

        (Self { state, accept }, addr)
    }

    /// Serve connections accepted through TLS.
    #[cfg(feature = "tls-rustls")]
    pub async fn spawn_tls(acceptor: tokio_rustls::TlsAcceptor) -> (Self, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(BrokerState {
            options: BrokerOptions::default(),
            subscriptions: Mutex::new(Vec::new()),
            metrics: BrokerMetrics::default(),
            next_conn: AtomicU64::new(1),
        });

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let state = Arc::clone(&accept_state);
                connections.spawn(async move {
                    if let Ok(tls) = acceptor.accept(stream).await {
                        serve(state, tls).await;
                    }
                });
            }
        });

        (Self { state, accept }, addr)
    }

    pub fn metrics(&self) -> &BrokerMetrics {
        &self.state.metrics
    }

    pub fn subscription_count(&self) -> usize {
        self.state.subscriptions.lock().unwrap().len()
    }

    /// Poll until at least `n` subscriptions exist.
    pub async fn wait_for_subscriptions(&self, n: usize) {
        while self.subscription_count() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Publish from the broker itself to every matching subscriber.
    pub fn inject(&self, topic: &str, payload: Bytes) {
        self.state.route(topic, QoS::AtMostOnce, payload);
    }

    pub async fn shutdown(self) {
        self.accept.abort();
        let _ = self.accept.await;
    }
}

async fn serve<S>(state: Arc<BrokerState>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let conn = state.next_conn.fetch_add(1, Ordering::Relaxed);
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = MqttCodec::new(read_half, Limits::default());
    let mut writer = MqttCodec::new(write_half, Limits::default());

    let client_id = match reader.read_packet().await {
        Ok(Packet::Connect(connect)) => connect.client_id,
        _ => return,
    };
    if state.options.refuse_client_ids.contains(&client_id) {
        state.metrics.refused.fetch_add(1, Ordering::Relaxed);
        let _ = writer
            .write_packet(&Packet::ConnAck(ConnAck {
                session_present: false,
                return_code: 5,
            }))
            .await;
        return;
    }
    state.metrics.connections.fetch_add(1, Ordering::Relaxed);

    let (outbound, mut queue) = mpsc::unbounded_channel::<Packet>();
    let _ = outbound.send(Packet::ConnAck(ConnAck {
        session_present: false,
        return_code: 0,
    }));
    let delivery_delay = state.options.delivery_delay;
    let write_task = tokio::spawn(async move {
        while let Some(packet) = queue.recv().await {
            if matches!(packet, Packet::Publish(_)) && !delivery_delay.is_zero() {
                tokio::time::sleep(delivery_delay).await;
            }
            let last = packet == Packet::Disconnect;
            if writer.write_packet(&packet).await.is_err() || last {
                break;
            }
        }
    });

    let next_id = Arc::new(AtomicU16::new(1));
    let mut inbound_qos2: HashSet<u16> = HashSet::new();

    while let Ok(packet) = reader.read_packet().await {
        match packet {
            Packet::Subscribe(sub) => {
                let mut granted = Vec::new();
                {
                    let mut subs = state.subscriptions.lock().unwrap();
                    for (filter, qos) in sub.filters {
                        subs.retain(|s| !(s.conn == conn && s.filter == filter));
                        subs.push(Subscription {
                            conn,
                            filter,
                            qos,
                            outbound: outbound.clone(),
                            next_id: Arc::clone(&next_id),
                        });
                        granted.push(Some(qos));
                    }
                }
                let _ = outbound.send(Packet::SubAck(SubAck {
                    packet_id: sub.packet_id,
                    granted,
                }));
            }
            Packet::Unsubscribe(unsub) => {
                state
                    .subscriptions
                    .lock()
                    .unwrap()
                    .retain(|s| !(s.conn == conn && unsub.filters.contains(&s.filter)));
                let _ = outbound.send(Packet::UnsubAck(unsub.packet_id));
            }
            Packet::Publish(publish) => {
                match (publish.qos, publish.packet_id) {
                    (QoS::AtLeastOnce, Some(id)) => {
                        let _ = outbound.send(Packet::PubAck(id));
                    }
                    (QoS::ExactlyOnce, Some(id)) => {
                        let _ = outbound.send(Packet::PubRec(id));
                        if !inbound_qos2.insert(id) {
                            continue;
                        }
                    }
                    _ => {}
                }

                let seen = state.metrics.publishes.fetch_add(1, Ordering::Relaxed);
                if seen < state.options.drop_publishes {
                    state.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                state.route(&publish.topic, publish.qos, publish.payload);
            }
            Packet::PubRel(id) => {
                inbound_qos2.remove(&id);
                let _ = outbound.send(Packet::PubComp(id));
            }
            Packet::PubRec(id) => {
                let _ = outbound.send(Packet::PubRel(id));
            }
            Packet::PingReq => {
                let _ = outbound.send(Packet::PingResp);
            }
            Packet::Disconnect => {
                state.metrics.disconnects.fetch_add(1, Ordering::Relaxed);
                break;
            }
            // PUBACK / PUBCOMP for our deliveries need no answer.
            _ => {}
        }
    }

    state.subscriptions.lock().unwrap().retain(|s| s.conn != conn);
    drop(outbound);
    let _ = write_task.await;
}
