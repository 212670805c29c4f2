use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::options::{ConnectOptions, Scheme};
use super::state::SessionState;
use super::{Delivery, DeliveryHandler};
use crate::codec::MqttCodec;
use crate::error::{Error, Result};
use crate::protocol::{
    Packet, Publish, QoS, Subscribe, Unsubscribe, topic_matches, validate_topic_filter,
    validate_topic_name,
};

trait BrokerStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> BrokerStream for T {}

type BoxedStream = Box<dyn BrokerStream>;

/// Completion of an outstanding request.
#[derive(Debug)]
enum Ack {
    PubAck,
    PubComp,
    SubAck(Vec<Option<QoS>>),
    UnsubAck,
}

type AckSender = oneshot::Sender<Result<Ack>>;

struct Route {
    filter: String,
    handler: DeliveryHandler,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the client handle and its reader task.
struct Shared {
    client_id: String,
    writer: AsyncMutex<MqttCodec<WriteHalf<BoxedStream>>>,
    state: Mutex<SessionState>,
    pending: Mutex<HashMap<u16, AckSender>>,
    /// QoS 2 packet ids delivered but not yet released.
    inbound_qos2: Mutex<HashSet<u16>>,
    routes: RwLock<Vec<Route>>,
    fallback: Option<DeliveryHandler>,
    next_id: AtomicU16,
}

impl Shared {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SessionState) -> SessionState {
        std::mem::replace(&mut *lock(&self.state), state)
    }

    fn next_packet_id(&self) -> u16 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    async fn send(&self, packet: &Packet) -> Result<()> {
        self.writer.lock().await.write_packet(packet).await
    }

    /// Send a packet and wait for the acknowledgement carrying `id`.
    async fn request(&self, id: u16, packet: Packet) -> Result<Ack> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        // close() flips the state before draining, so a request registered
        // after the drain is caught here.
        if !self.state().can_operate() {
            lock(&self.pending).remove(&id);
            return Err(Error::ConnectionClosed);
        }

        if let Err(e) = self.send(&packet).await {
            lock(&self.pending).remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    fn complete(&self, id: u16, ack: Ack) {
        match lock(&self.pending).remove(&id) {
            Some(tx) => {
                let _ = tx.send(Ok(ack));
            }
            None => warn!(client_id = %self.client_id, packet_id = id, ?ack, "acknowledgement for unknown packet id"),
        }
    }

    fn close(&self, reason: Error) {
        let previous = self.set_state(SessionState::Closed);
        match previous {
            SessionState::Closed => return,
            SessionState::Disconnecting => {
                debug!(client_id = %self.client_id, "session closed");
            }
            _ => {
                warn!(client_id = %self.client_id, error = %reason, "broker connection lost");
            }
        }

        let pending: Vec<_> = lock(&self.pending).drain().collect();
        for (_, tx) in pending {
            let _ = tx.send(Err(reason.clone()));
        }
    }

    fn dispatch(&self, delivery: &Delivery) {
        let handler = {
            let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            routes
                .iter()
                .find(|route| topic_matches(&route.filter, &delivery.topic))
                .map(|route| Arc::clone(&route.handler))
        };

        match handler.or_else(|| self.fallback.clone()) {
            Some(handler) => handler(delivery),
            None => debug!(
                client_id = %self.client_id,
                topic = %delivery.topic,
                len = delivery.payload.len(),
                "message on unsubscribed topic"
            ),
        }
    }

    async fn on_publish(&self, publish: Publish) -> Result<()> {
        let delivery = Delivery {
            topic: publish.topic,
            qos: publish.qos,
            retain: publish.retain,
            dup: publish.dup,
            payload: publish.payload,
        };

        match (delivery.qos, publish.packet_id) {
            (QoS::AtMostOnce, _) => {
                self.dispatch(&delivery);
                Ok(())
            }
            (QoS::AtLeastOnce, Some(id)) => {
                self.dispatch(&delivery);
                self.send(&Packet::PubAck(id)).await
            }
            (QoS::ExactlyOnce, Some(id)) => {
                let first = lock(&self.inbound_qos2).insert(id);
                if first {
                    self.dispatch(&delivery);
                }
                self.send(&Packet::PubRec(id)).await
            }
            (qos, None) => Err(Error::ProtocolViolation(format!(
                "{} PUBLISH without packet id",
                qos
            ))),
        }
    }

    async fn handle(&self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Publish(publish) => self.on_publish(publish).await,
            Packet::PubAck(id) => {
                self.complete(id, Ack::PubAck);
                Ok(())
            }
            Packet::PubRec(id) => self.send(&Packet::PubRel(id)).await,
            Packet::PubRel(id) => {
                lock(&self.inbound_qos2).remove(&id);
                self.send(&Packet::PubComp(id)).await
            }
            Packet::PubComp(id) => {
                self.complete(id, Ack::PubComp);
                Ok(())
            }
            Packet::SubAck(ack) => {
                self.complete(ack.packet_id, Ack::SubAck(ack.granted));
                Ok(())
            }
            Packet::UnsubAck(id) => {
                self.complete(id, Ack::UnsubAck);
                Ok(())
            }
            Packet::PingResp => {
                trace!(client_id = %self.client_id, "PINGRESP");
                Ok(())
            }
            other => Err(Error::ProtocolViolation(format!(
                "unexpected {:?} from broker",
                other.packet_type()
            ))),
        }
    }
}

fn keep_alive_timer(keep_alive: Duration) -> Option<Interval> {
    if keep_alive.is_zero() {
        return None;
    }
    let period = (keep_alive / 2).max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut reader: MqttCodec<ReadHalf<BoxedStream>>,
    keep_alive: Duration,
) {
    let mut ping = keep_alive_timer(keep_alive);

    let reason = loop {
        tokio::select! {
            packet = reader.read_packet() => {
                let handled = match packet {
                    Ok(packet) => shared.handle(packet).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = handled {
                    break e;
                }
            }
            () = tick(&mut ping) => {
                trace!(client_id = %shared.client_id, "PINGREQ");
                if let Err(e) = shared.send(&Packet::PingReq).await {
                    break e;
                }
            }
        }
    };

    shared.close(reason);
}

async fn open_stream(options: &ConnectOptions) -> Result<BoxedStream> {
    let addr = &options.broker;
    let tcp = TcpStream::connect((addr.host.as_str(), addr.port)).await?;
    tcp.set_nodelay(true)?;

    match addr.scheme {
        Scheme::Tcp => Ok(Box::new(tcp)),
        #[cfg(feature = "tls-rustls")]
        Scheme::Tls => {
            let config = options
                .tls
                .clone()
                .unwrap_or_else(crate::tls::client_config_with_webpki_roots);
            let stream = crate::tls::TlsConnector::new(config)
                .connect(&addr.host, tcp)
                .await?;
            Ok(Box::new(stream))
        }
        #[cfg(not(feature = "tls-rustls"))]
        Scheme::Tls => Err(Error::InvalidBrokerAddr(format!(
            "{} requires the tls-rustls feature",
            addr
        ))),
    }
}

/// A connected MQTT session.
///
/// Dropping the client aborts its reader task without sending DISCONNECT;
/// use [`MqttClient::disconnect`] for an orderly close.
pub struct MqttClient {
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for MqttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttClient")
            .field("client_id", &self.shared.client_id)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

impl MqttClient {
    /// Open the transport, send CONNECT and wait for an accepting CONNACK.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionRefused` if the broker answers with a non-zero return code
    /// - `Error::ConnectTimeout` if `options.connect_timeout` elapses first
    /// - I/O, TLS or protocol errors from the handshake
    pub async fn connect(options: ConnectOptions) -> Result<Self> {
        match options.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, Self::establish(&options))
                .await
                .map_err(|_| {
                    Error::ConnectTimeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))
                })?,
            None => Self::establish(&options).await,
        }
    }

    async fn establish(options: &ConnectOptions) -> Result<Self> {
        let stream = open_stream(options).await?;
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = MqttCodec::new(read_half, options.limits.clone());
        let mut writer = MqttCodec::new(write_half, options.limits.clone());

        writer
            .write_packet(&Packet::Connect(options.connect_packet()))
            .await?;

        match reader.read_packet().await? {
            Packet::ConnAck(ack) if ack.return_code == 0 => {}
            Packet::ConnAck(ack) => return Err(Error::ConnectionRefused(ack.return_code)),
            other => {
                return Err(Error::ProtocolViolation(format!(
                    "expected CONNACK, got {:?}",
                    other.packet_type()
                )));
            }
        }

        debug!(client_id = %options.client_id, broker = %options.broker, "connected");

        let shared = Arc::new(Shared {
            client_id: options.client_id.clone(),
            writer: AsyncMutex::new(writer),
            state: Mutex::new(SessionState::Connected),
            pending: Mutex::new(HashMap::new()),
            inbound_qos2: Mutex::new(HashSet::new()),
            routes: RwLock::new(Vec::new()),
            fallback: options.fallback.clone(),
            next_id: AtomicU16::new(1),
        });
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), reader, options.keep_alive));

        Ok(Self { shared, reader })
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().can_operate()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    /// Subscribe to `filter` and route matching deliveries to `handler`.
    ///
    /// The handler is installed before SUBSCRIBE is sent so that messages
    /// racing the SUBACK are not lost. Returns the granted QoS.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidTopic` for a malformed filter
    /// - `Error::SubscriptionRejected` if the broker refuses the filter
    pub async fn subscribe(&self, filter: &str, qos: QoS, handler: DeliveryHandler) -> Result<QoS> {
        validate_topic_filter(filter)?;
        self.ensure_connected()?;

        self.add_route(filter, handler);
        let id = self.shared.next_packet_id();
        let packet = Packet::Subscribe(Subscribe {
            packet_id: id,
            filters: vec![(filter.to_string(), qos)],
        });

        let granted = match self.shared.request(id, packet).await {
            Ok(Ack::SubAck(granted)) => granted.first().copied().flatten(),
            Ok(other) => {
                self.remove_route(filter);
                return Err(Error::ProtocolViolation(format!(
                    "expected SUBACK for packet {}, got {:?}",
                    id, other
                )));
            }
            Err(e) => {
                self.remove_route(filter);
                return Err(e);
            }
        };

        match granted {
            Some(granted) => {
                debug!(client_id = %self.shared.client_id, filter, %granted, "subscribed");
                Ok(granted)
            }
            None => {
                self.remove_route(filter);
                Err(Error::SubscriptionRejected(filter.to_string()))
            }
        }
    }

    /// Publish `payload` on `topic`.
    ///
    /// QoS 0 returns once the packet is written; QoS 1 waits for PUBACK and
    /// QoS 2 for PUBCOMP.
    pub async fn publish(&self, topic: &str, qos: QoS, payload: Bytes) -> Result<()> {
        validate_topic_name(topic)?;
        self.ensure_connected()?;

        if qos == QoS::AtMostOnce {
            return self
                .shared
                .send(&Packet::Publish(Publish::new(topic, qos, None, payload)))
                .await;
        }

        let id = self.shared.next_packet_id();
        let packet = Packet::Publish(Publish::new(topic, qos, Some(id), payload));
        match (qos, self.shared.request(id, packet).await?) {
            (QoS::AtLeastOnce, Ack::PubAck) | (QoS::ExactlyOnce, Ack::PubComp) => Ok(()),
            (_, other) => Err(Error::ProtocolViolation(format!(
                "unexpected {:?} for {} publish {}",
                other, qos, id
            ))),
        }
    }

    /// Unsubscribe from `filter` and drop its handler.
    pub async fn unsubscribe(&self, filter: &str) -> Result<()> {
        validate_topic_filter(filter)?;
        self.ensure_connected()?;

        let id = self.shared.next_packet_id();
        let packet = Packet::Unsubscribe(Unsubscribe {
            packet_id: id,
            filters: vec![filter.to_string()],
        });
        let ack = self.shared.request(id, packet).await?;
        self.remove_route(filter);

        match ack {
            Ack::UnsubAck => Ok(()),
            other => Err(Error::ProtocolViolation(format!(
                "expected UNSUBACK for packet {}, got {:?}",
                id, other
            ))),
        }
    }

    /// Send DISCONNECT and close the stream.
    ///
    /// Closing an already-lost session is not an error.
    pub async fn disconnect(self) -> Result<()> {
        if self.shared.set_state(SessionState::Disconnecting) == SessionState::Closed {
            self.shared.set_state(SessionState::Closed);
            return Ok(());
        }

        let result = async {
            let mut writer = self.shared.writer.lock().await;
            writer.write_packet(&Packet::Disconnect).await?;
            writer.shutdown().await
        }
        .await;

        self.reader.abort();
        self.shared.close(Error::ConnectionClosed);
        result
    }

    fn add_route(&self, filter: &str, handler: DeliveryHandler) {
        let mut routes = self
            .shared
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        routes.retain(|route| route.filter != filter);
        routes.push(Route {
            filter: filter.to_string(),
            handler,
        });
    }

    fn remove_route(&self, filter: &str) {
        self.shared
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|route| route.filter != filter);
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
