//! MQTT fixed header and remaining-length encoding.

use bytes::BufMut;

use crate::error::{Error, Result};

/// Largest value the four-byte remaining-length varint can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Control packet types (upper nibble of the first header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Decode the packet type nibble.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPacketType` for 0 and 15 (reserved).
    pub fn from_u8(value: u8) -> Result<Self> {
        Ok(match value {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            other => return Err(Error::InvalidPacketType(other)),
        })
    }

    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Flag nibble the protocol mandates for this type, if it is fixed.
    ///
    /// PUBLISH carries DUP/QoS/RETAIN and has no fixed value.
    #[must_use]
    pub const fn required_flags(self) -> Option<u8> {
        match self {
            PacketType::Publish => None,
            PacketType::PubRel | PacketType::Subscribe | PacketType::Unsubscribe => Some(0x02),
            _ => Some(0x00),
        }
    }
}

/// Decoded fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    /// Length of the variable header plus payload.
    pub remaining_length: usize,
    /// Bytes taken by the fixed header itself (1 + varint length).
    pub header_len: usize,
}

impl FixedHeader {
    /// Total packet size on the wire.
    #[inline]
    #[must_use]
    pub const fn packet_len(&self) -> usize {
        self.header_len + self.remaining_length
    }
}

/// Parse the fixed header at the start of `buf`.
///
/// # Errors
///
/// - `Error::IncompletePacket` if the header is not fully buffered yet
/// - `Error::InvalidPacketType` for a reserved type nibble
/// - `Error::InvalidPacket` for a malformed varint or wrong fixed flags
pub fn parse_fixed_header(buf: &[u8]) -> Result<FixedHeader> {
    if buf.is_empty() {
        return Err(Error::IncompletePacket { needed: 2 });
    }

    let byte0 = buf[0];
    let packet_type = PacketType::from_u8(byte0 >> 4)?;
    let flags = byte0 & 0x0F;

    if let Some(required) = packet_type.required_flags() {
        if flags != required {
            return Err(Error::InvalidPacket(format!(
                "{:?} with flags {:#x}",
                packet_type, flags
            )));
        }
    }

    let mut remaining_length = 0usize;
    let mut multiplier = 1usize;
    let mut pos = 1;
    loop {
        if pos > 4 {
            return Err(Error::InvalidPacket("remaining length exceeds 4 bytes".into()));
        }
        let Some(&byte) = buf.get(pos) else {
            return Err(Error::IncompletePacket { needed: 1 });
        };
        remaining_length += (byte & 0x7F) as usize * multiplier;
        multiplier *= 128;
        pos += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }

    Ok(FixedHeader {
        packet_type,
        flags,
        remaining_length,
        header_len: pos,
    })
}

/// Number of bytes the varint encoding of `len` occupies.
#[must_use]
pub const fn remaining_length_size(len: usize) -> usize {
    match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Write a remaining-length varint.
///
/// # Errors
///
/// Returns `Error::PacketTooLarge` if `len` exceeds [`MAX_REMAINING_LENGTH`].
pub fn write_remaining_length(dst: &mut impl BufMut, mut len: usize) -> Result<usize> {
    if len > MAX_REMAINING_LENGTH {
        return Err(Error::PacketTooLarge {
            size: len,
            max: MAX_REMAINING_LENGTH,
        });
    }

    let mut written = 0;
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        dst.put_u8(byte);
        written += 1;
        if len == 0 {
            return Ok(written);
        }
    }
}
