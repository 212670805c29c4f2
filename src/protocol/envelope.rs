//! Measurement envelope embedded at the front of every published payload.
//!
//! ```text
//!  0               4               8
//! +---------------+---------------+---------------------------+
//! | origin (u32LE)| sequence (u32LE)|  padding (0x00 ...)     |
//! +---------------+---------------+---------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Size of the envelope header in bytes; also the minimum payload length.
pub const ENVELOPE_LEN: usize = 8;

/// Origin client index and sequence number of a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Envelope {
    pub origin: u32,
    pub sequence: u32,
}

impl Envelope {
    #[must_use]
    pub const fn new(origin: u32, sequence: u32) -> Self {
        Self { origin, sequence }
    }

    /// Decode the envelope from the first 8 bytes of `payload`.
    ///
    /// Bytes past the header are padding and ignored.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedPayload` if `payload` is shorter than
    /// [`ENVELOPE_LEN`].
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let Some(header) = payload.get(..ENVELOPE_LEN) else {
            return Err(Error::MalformedPayload {
                len: payload.len(),
                min: ENVELOPE_LEN,
            });
        };
        let origin = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let sequence = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        Ok(Self { origin, sequence })
    }

    /// Write the 8-byte header into the front of `payload`, leaving the
    /// padding untouched.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedPayload` if `payload` is shorter than
    /// [`ENVELOPE_LEN`].
    pub fn stamp(&self, payload: &mut [u8]) -> Result<()> {
        let len = payload.len();
        let Some(header) = payload.get_mut(..ENVELOPE_LEN) else {
            return Err(Error::MalformedPayload {
                len,
                min: ENVELOPE_LEN,
            });
        };
        header[..4].copy_from_slice(&self.origin.to_le_bytes());
        header[4..].copy_from_slice(&self.sequence.to_le_bytes());
        Ok(())
    }

    /// Build a fresh payload of `len` bytes (at least [`ENVELOPE_LEN`])
    /// carrying this envelope followed by zero padding.
    #[must_use]
    pub fn to_payload(&self, len: usize) -> Bytes {
        let len = len.max(ENVELOPE_LEN);
        let mut buf = BytesMut::with_capacity(len);
        buf.put_u32_le(self.origin);
        buf.put_u32_le(self.sequence);
        buf.put_bytes(0, len - ENVELOPE_LEN);
        buf.freeze()
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.origin, self.sequence)
    }
}
