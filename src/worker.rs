//! One simulated client's lifecycle.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::barrier::FleetBarriers;
use crate::client::{Delivery, DeliveryHandler};
use crate::config::FleetConfig;
use crate::credentials::ClientRecord;
use crate::error::{Error, Result};
use crate::protocol::Envelope;
use crate::stats::LatencyRecorder;
use crate::transport::{Session, Transport};

/// What a worker does after subscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    SubscriberOnly,
    PublisherAndSubscriber,
}

impl Role {
    #[must_use]
    #[inline]
    pub const fn publishes(&self) -> bool {
        matches!(self, Role::PublisherAndSubscriber)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::SubscriberOnly => write!(f, "subscriber"),
            Role::PublisherAndSubscriber => write!(f, "publisher"),
        }
    }
}

/// Everything a worker shares with the rest of the fleet.
pub struct FleetContext<T> {
    pub config: Arc<FleetConfig>,
    pub transport: Arc<T>,
    pub recorder: Arc<LatencyRecorder>,
    pub barriers: Arc<FleetBarriers>,
}

impl<T> Clone for FleetContext<T> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            transport: Arc::clone(&self.transport),
            recorder: Arc::clone(&self.recorder),
            barriers: Arc::clone(&self.barriers),
        }
    }
}

/// Drives one client from connect to unsubscribe.
pub struct ClientWorker<T> {
    record: ClientRecord,
    role: Role,
    ctx: FleetContext<T>,
}

fn fallback_handler(client: usize) -> DeliveryHandler {
    Arc::new(move |delivery: &Delivery| {
        debug!(
            client,
            topic = %delivery.topic,
            len = delivery.payload.len(),
            "message outside the test subscription"
        );
    })
}

impl<T: Transport> ClientWorker<T> {
    #[must_use]
    pub fn new(record: ClientRecord, role: Role, ctx: FleetContext<T>) -> Self {
        Self { record, role, ctx }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Run every phase in order. Any transport error is returned at once
    /// and is fatal to the run.
    pub async fn run(self) -> Result<()> {
        let index = self.record.index;
        let config = &self.ctx.config;
        let barriers = &self.ctx.barriers;

        let session = self
            .ctx
            .transport
            .connect(&self.record, fallback_handler(index))
            .await?;
        debug!(client = index, client_id = %self.record.client_id, "connected");

        let granted = session
            .subscribe(&config.topic, config.qos, self.ctx.recorder.handler())
            .await?;
        debug!(client = index, topic = %config.topic, %granted, "subscribed");

        barriers.subscribed.wait().await;
        if !config.settle_delay.is_zero() {
            tokio::time::sleep(config.settle_delay).await;
        }

        if self.role.publishes() {
            self.publish_all(&session).await?;
        }

        barriers.received.wait().await;

        session.unsubscribe(&config.topic).await?;
        if let Err(e) = session.disconnect().await {
            warn!(client = index, error = %e, "disconnect failed");
        }
        debug!(client = index, "done");
        barriers.done.count_down();
        Ok(())
    }

    async fn publish_all(&self, session: &T::Session) -> Result<()> {
        let config = &self.ctx.config;
        let recorder = &self.ctx.recorder;
        let origin = u32::try_from(self.record.index).map_err(|_| {
            Error::InvalidConfig(format!("client index {} exceeds u32", self.record.index))
        })?;

        recorder.mark_fleet_start();
        info!(
            client = origin,
            messages = config.messages_per_client,
            "publishing"
        );

        for sequence in 0..config.messages_per_client {
            let payload = Envelope::new(origin, sequence).to_payload(config.payload_len());
            recorder.mark_sent(origin, sequence)?;
            session.publish(&config.topic, config.qos, payload).await?;
            debug!(client = origin, seq = sequence, "published");

            if !config.publish_interval.is_zero() {
                tokio::time::sleep(config.publish_interval).await;
            }
        }
        Ok(())
    }
}
