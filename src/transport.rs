//! Broker transport seam.
//!
//! The fleet driver and workers only see [`Transport`] and [`Session`];
//! [`MqttTransport`] backs them with [`MqttClient`].

use std::future::Future;

use bytes::Bytes;

use crate::client::{ConnectOptions, DeliveryHandler, MqttClient};
use crate::credentials::ClientRecord;
use crate::error::Result;
use crate::protocol::QoS;

/// Opens one broker session per simulated client.
pub trait Transport: Send + Sync + 'static {
    type Session: Session;

    /// Connect as `record`; `fallback` receives deliveries that match no
    /// subscription.
    fn connect(
        &self,
        record: &ClientRecord,
        fallback: DeliveryHandler,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// A connected client session.
pub trait Session: Send + Sync + 'static {
    /// Subscribe and install `handler`; returns the granted QoS.
    fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: DeliveryHandler,
    ) -> impl Future<Output = Result<QoS>> + Send;

    /// Publish and wait for the acknowledgement `qos` calls for.
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        payload: Bytes,
    ) -> impl Future<Output = Result<()>> + Send;

    fn unsubscribe(&self, filter: &str) -> impl Future<Output = Result<()>> + Send;

    fn disconnect(self) -> impl Future<Output = Result<()>> + Send;
}

/// MQTT transport: every connection is built from a shared template with
/// the record's client id and credentials filled in.
#[derive(Debug, Clone)]
pub struct MqttTransport {
    template: ConnectOptions,
}

impl MqttTransport {
    #[must_use]
    pub fn new(template: ConnectOptions) -> Self {
        Self { template }
    }

    #[must_use]
    pub fn template(&self) -> &ConnectOptions {
        &self.template
    }

    fn options_for(&self, record: &ClientRecord, fallback: DeliveryHandler) -> ConnectOptions {
        self.template
            .clone()
            .with_client_id(record.client_id.as_str())
            .with_credentials(record.username.as_str(), record.password.as_str())
            .with_fallback(fallback)
    }
}

impl Transport for MqttTransport {
    type Session = MqttClient;

    async fn connect(&self, record: &ClientRecord, fallback: DeliveryHandler) -> Result<MqttClient> {
        MqttClient::connect(self.options_for(record, fallback)).await
    }
}

impl Session for MqttClient {
    async fn subscribe(&self, filter: &str, qos: QoS, handler: DeliveryHandler) -> Result<QoS> {
        MqttClient::subscribe(self, filter, qos, handler).await
    }

    async fn publish(&self, topic: &str, qos: QoS, payload: Bytes) -> Result<()> {
        MqttClient::publish(self, topic, qos, payload).await
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        MqttClient::unsubscribe(self, filter).await
    }

    async fn disconnect(self) -> Result<()> {
        MqttClient::disconnect(self).await
    }
}
