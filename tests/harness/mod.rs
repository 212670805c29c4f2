//! Test harness utilities for fleet testing.
//!
//! An in-process MQTT broker, a scripted registration service and helpers
//! for building fleet inputs.

#![allow(dead_code)]

mod broker;
mod registrar;

pub use broker::{BrokerMetrics, BrokerOptions, TestBroker};
pub use registrar::ScriptedRegistrar;

use std::net::SocketAddr;
use std::time::Duration;

use mqfleet::{BrokerAddr, ClientRecord, ConnectOptions, FleetConfig, MqttTransport};

/// `n` records named `client-<i>`.
pub fn records(n: usize) -> Vec<ClientRecord> {
    (0..n)
        .map(|i| ClientRecord::new(i, format!("client-{}", i), format!("user-{}", i), "pw"))
        .collect()
}

pub fn transport(addr: SocketAddr) -> MqttTransport {
    MqttTransport::new(
        ConnectOptions::new(BrokerAddr::from(addr)).with_connect_timeout(Duration::from_secs(5)),
    )
}

/// Fleet config with every delay shortened for tests.
pub fn fast_config(clients: usize, publishers: usize, messages: u32) -> FleetConfig {
    FleetConfig::new()
        .with_topic("fleet/test")
        .with_clients(clients)
        .with_publishing_clients(publishers)
        .with_messages_per_client(messages)
        .with_publish_interval(Duration::ZERO)
        .with_settle_delay(Duration::from_millis(50))
        .with_poll_interval(Duration::from_millis(20))
        .with_spawn_pacing(Duration::ZERO)
        .with_stall_timeout(Duration::from_secs(10))
}
