//! MQTT 3.1.1 wire protocol and the measurement envelope.

pub mod envelope;
pub mod header;
pub mod packet;
pub mod qos;
pub mod topic;

pub use envelope::{ENVELOPE_LEN, Envelope};
pub use header::{FixedHeader, MAX_REMAINING_LENGTH, PacketType, parse_fixed_header};
pub use packet::{
    ConnAck, Connect, PROTOCOL_LEVEL_3_1, PROTOCOL_LEVEL_3_1_1, Packet, Publish, SubAck,
    Subscribe, Unsubscribe,
};
pub use qos::QoS;
pub use topic::{matches as topic_matches, validate_topic_filter, validate_topic_name};
