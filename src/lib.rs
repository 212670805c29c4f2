//! # mqfleet - MQTT pub/sub fleet load tester
//!
//! `mqfleet` provisions a fleet of simulated MQTT clients, drives them
//! through a barrier-synchronized connect → subscribe → publish → receive
//! lifecycle, and reports fleet-wide round-trip latency.
//!
//! ## Features
//!
//! - **Envelope-tagged payloads**: every message carries its origin client
//!   and sequence number, so latency is keyed per message
//! - **Lock-free pair tables** sized before the run starts
//! - **Single-writer aggregation** of min/max/count through a collector task
//! - **Exact-match completion barrier** with optional stall detection
//! - **Built-in MQTT 3.1.1 client** with TLS support (`tls-rustls`)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mqfleet::{ConnectOptions, FleetConfig, MqttTransport, read_records, run_fleet};
//!
//! let transport = MqttTransport::new(ConnectOptions::new("tcp://127.0.0.1:1883".parse()?));
//! let records = read_records("./reg.info", 10).await?;
//! let config = FleetConfig::new().with_clients(10).with_messages_per_client(5);
//! let summary = run_fleet(Arc::new(transport), records, config).await?;
//! println!("{}", summary);
//! ```

pub mod barrier;
pub mod client;
pub mod codec;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fleet;
pub mod protocol;
pub mod provision;
pub mod register;
pub mod report;
pub mod stats;
pub mod transport;
pub mod worker;

#[cfg(feature = "tls-rustls")]
pub mod tls;

pub use barrier::{CountDownLatch, FleetBarriers, Gate, ReceiveBarrier};
pub use client::{BrokerAddr, ConnectOptions, Delivery, DeliveryHandler, MqttClient, SessionState};
pub use codec::MqttCodec;
pub use config::{FleetConfig, Limits, ProvisionConfig, ReceiveAccounting};
pub use credentials::{ClientRecord, CredentialWriter, read_records};
pub use error::{Error, ErrorKind, Result};
pub use fleet::run_fleet;
pub use protocol::{Envelope, ENVELOPE_LEN, Packet, QoS};
pub use provision::{device_id, provision, provision_fleet};
pub use register::{DEFAULT_REGISTRATION_URL, HttpRegistrar, Registrar, Registration};
pub use report::{Summary, report};
pub use stats::{GlobalStats, LatencyRecorder, RecordOutcome};
pub use transport::{MqttTransport, Session, Transport};
pub use worker::{ClientWorker, Role};
