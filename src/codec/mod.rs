//! MQTT packet codec for async I/O.
//!
//! This module provides packet-level encoding/decoding over async streams.

mod framed;

pub use framed::MqttCodec;
