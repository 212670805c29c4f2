//! Configuration for provisioning and running a fleet.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{ENVELOPE_LEN, QoS, validate_topic_name};

/// Resource limits for a single broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single packet on the wire, in bytes.
    ///
    /// Default: 1 MB (1024 * 1024)
    pub max_packet_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_packet_size: 1024 * 1024,
        }
    }
}

impl Limits {
    /// Create limits with a custom packet ceiling.
    #[must_use]
    pub const fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    /// Validate that a packet size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PacketTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_packet_size(&self, size: usize) -> Result<()> {
        if size > self.max_packet_size {
            Err(Error::PacketTooLarge {
                size,
                max: self.max_packet_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Which deliveries count toward the expected receive total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReceiveAccounting {
    /// Each published message counts once, on whichever subscriber sees it
    /// first. Later deliveries of the same message are duplicates.
    #[default]
    FirstDelivery,
    /// Each published message counts once per subscriber; every receiver's
    /// round trip accumulates into the message's elapsed cell.
    Fanout,
}

impl ReceiveAccounting {
    /// Deliveries of one message that are recorded, given the subscriber count.
    #[must_use]
    pub const fn deliveries_per_message(self, subscribers: usize) -> u64 {
        match self {
            ReceiveAccounting::FirstDelivery => 1,
            ReceiveAccounting::Fanout => subscribers as u64,
        }
    }
}

impl std::fmt::Display for ReceiveAccounting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiveAccounting::FirstDelivery => write!(f, "first-delivery"),
            ReceiveAccounting::Fanout => write!(f, "fanout"),
        }
    }
}

/// Parameters of a run-mode fleet.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Topic every worker subscribes to and publishes on.
    ///
    /// Default: `topic_test`
    pub topic: String,

    /// QoS for both subscriptions and publishes.
    ///
    /// Default: 0
    pub qos: QoS,

    /// Requested payload length; raised to the 8-byte envelope if smaller.
    ///
    /// Default: 8
    pub message_len: usize,

    /// Maximum number of workers spawned from the credential file.
    ///
    /// Default: 1
    pub clients: usize,

    /// Number of workers (lowest indices first) that also publish.
    ///
    /// Default: 1
    pub publishing_clients: usize,

    /// Messages each publisher sends.
    ///
    /// Default: 1
    pub messages_per_client: u32,

    /// Sleep after each publish.
    ///
    /// Default: 1 second
    pub publish_interval: Duration,

    /// Wait after the all-subscribed barrier before publishing starts.
    ///
    /// Default: 2 seconds
    pub settle_delay: Duration,

    /// How often the receive-complete barrier checks the counter.
    ///
    /// Default: 2 seconds
    pub poll_interval: Duration,

    /// Delay between spawning consecutive workers.
    ///
    /// Default: 10 ms
    pub spawn_pacing: Duration,

    /// Receive accounting rule.
    ///
    /// Default: [`ReceiveAccounting::FirstDelivery`]
    pub accounting: ReceiveAccounting,

    /// Fail the run if the receive counter makes no progress for this long.
    ///
    /// If `None`, an incomplete run waits forever.
    /// Default: None
    pub stall_timeout: Option<Duration>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            topic: "topic_test".to_string(),
            qos: QoS::AtMostOnce,
            message_len: ENVELOPE_LEN,
            clients: 1,
            publishing_clients: 1,
            messages_per_client: 1,
            publish_interval: Duration::from_millis(1000),
            settle_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            spawn_pacing: Duration::from_millis(10),
            accounting: ReceiveAccounting::FirstDelivery,
            stall_timeout: None,
        }
    }
}

impl FleetConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    #[must_use]
    pub const fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub const fn with_message_len(mut self, len: usize) -> Self {
        self.message_len = len;
        self
    }

    #[must_use]
    pub const fn with_clients(mut self, clients: usize) -> Self {
        self.clients = clients;
        self
    }

    #[must_use]
    pub const fn with_publishing_clients(mut self, publishers: usize) -> Self {
        self.publishing_clients = publishers;
        self
    }

    #[must_use]
    pub const fn with_messages_per_client(mut self, messages: u32) -> Self {
        self.messages_per_client = messages;
        self
    }

    #[must_use]
    pub const fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_spawn_pacing(mut self, pacing: Duration) -> Self {
        self.spawn_pacing = pacing;
        self
    }

    #[must_use]
    pub const fn with_accounting(mut self, accounting: ReceiveAccounting) -> Self {
        self.accounting = accounting;
        self
    }

    #[must_use]
    pub const fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }

    /// Payload length actually published.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.message_len.max(ENVELOPE_LEN)
    }

    /// Publishers among `subscribers` spawned workers.
    #[must_use]
    pub fn publishers(&self, subscribers: usize) -> usize {
        self.publishing_clients.min(subscribers)
    }

    /// Total recorded receipts needed before the fleet is done.
    #[must_use]
    pub fn expected_receipts(&self, subscribers: usize) -> u64 {
        self.publishers(subscribers) as u64
            * u64::from(self.messages_per_client)
            * self.accounting.deliveries_per_message(subscribers)
    }

    /// Check the configuration for values that can never complete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] or [`Error::InvalidTopic`] describing
    /// the first problem found.
    pub fn validate(&self) -> Result<()> {
        validate_topic_name(&self.topic)?;
        if self.clients == 0 {
            return Err(Error::InvalidConfig("client count must be at least 1".into()));
        }
        if self.publishing_clients > self.clients {
            return Err(Error::InvalidConfig(format!(
                "{} publishing clients exceed {} clients",
                self.publishing_clients, self.clients
            )));
        }
        if self.publishing_clients > u32::MAX as usize {
            return Err(Error::InvalidConfig(
                "publishing client index does not fit the envelope".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig("poll interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Parameters of a registration-mode run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionConfig {
    /// Application key presented to the registration service.
    pub app_key: String,

    /// Number of clients to register.
    ///
    /// Default: 1
    pub clients: usize,

    /// Delay between spawning consecutive provisioners.
    ///
    /// Default: 10 ms
    pub spawn_pacing: Duration,
}

impl ProvisionConfig {
    #[must_use]
    pub fn new(app_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            clients: 1,
            spawn_pacing: Duration::from_millis(10),
        }
    }

    #[must_use]
    pub const fn with_clients(mut self, clients: usize) -> Self {
        self.clients = clients;
        self
    }

    #[must_use]
    pub const fn with_spawn_pacing(mut self, pacing: Duration) -> Self {
        self.spawn_pacing = pacing;
        self
    }
}
