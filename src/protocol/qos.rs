//! MQTT quality-of-service levels.

use crate::error::{Error, Result};

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum QoS {
    /// At most once (0). Fire and forget; no acknowledgment.
    #[default]
    AtMostOnce = 0,

    /// At least once (1). Acknowledged with PUBACK.
    AtLeastOnce = 1,

    /// Exactly once (2). Four-step PUBREC/PUBREL/PUBCOMP exchange.
    ExactlyOnce = 2,
}

impl QoS {
    /// Create a QoS from its numeric level.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidQos` for values above 2.
    pub fn from_u8(level: u8) -> Result<Self> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(Error::InvalidQos(other)),
        }
    }

    /// Numeric level of this QoS.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if deliveries at this level carry a packet identifier.
    #[inline]
    #[must_use]
    pub const fn needs_packet_id(self) -> bool {
        !matches!(self, QoS::AtMostOnce)
    }
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self> {
        Self::from_u8(level)
    }
}

impl std::fmt::Display for QoS {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "QoS{}", self.as_u8())
    }
}
