//! Async MQTT 3.1.1 client session.
//!
//! [`MqttClient`] owns one broker connection. A background reader task
//! routes inbound PUBLISH packets to per-filter handlers, acknowledges
//! QoS 1/2 deliveries, and completes outstanding requests (SUBACK,
//! PUBACK, PUBCOMP, UNSUBACK). Handlers run on the reader task, so they
//! should return quickly.

mod options;
mod session;
mod state;

pub use options::{BrokerAddr, ConnectOptions, Scheme};
pub use session::MqttClient;
pub use state::SessionState;

use std::sync::Arc;

use bytes::Bytes;

use crate::protocol::QoS;

/// A message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub payload: Bytes,
}

/// Callback invoked for every matching delivery.
pub type DeliveryHandler = Arc<dyn Fn(&Delivery) + Send + Sync>;
