//! MQTT 3.1.1 control packet parsing and serialization.
//!
//! Only the subset a measuring client (and the in-process test broker)
//! needs is modelled: will messages are parsed but not retained.

use bytes::{Buf, BufMut, Bytes};

use crate::error::{Error, Result};
use crate::protocol::QoS;
use crate::protocol::header::{
    FixedHeader, PacketType, parse_fixed_header, remaining_length_size, write_remaining_length,
};

/// Protocol level of MQTT 3.1.1.
pub const PROTOCOL_LEVEL_3_1_1: u8 = 4;

/// Protocol level of MQTT 3.1 (protocol name `MQIsdp`).
pub const PROTOCOL_LEVEL_3_1: u8 = 3;

/// CONNECT packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_level: u8,
    pub client_id: String,
    pub clean_session: bool,
    /// Keep-alive interval in seconds; 0 disables it.
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

impl Connect {
    fn protocol_name(&self) -> &'static str {
        if self.protocol_level == PROTOCOL_LEVEL_3_1 {
            "MQIsdp"
        } else {
            "MQTT"
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.clean_session {
            flags |= 0x02;
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        flags
    }
}

/// CONNACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    /// 0 = accepted, 1..=5 = refused (see MQTT 3.1.1 §3.2.2.3).
    pub return_code: u8,
}

/// PUBLISH packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present iff `qos > 0`.
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

impl Publish {
    /// Create a non-retained, first-attempt publish.
    #[must_use]
    pub fn new(topic: impl Into<String>, qos: QoS, packet_id: Option<u16>, payload: Bytes) -> Self {
        Self {
            dup: false,
            qos,
            retain: false,
            topic: topic.into(),
            packet_id,
            payload,
        }
    }
}

/// SUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filters: Vec<(String, QoS)>,
}

/// SUBACK packet. `None` entries are refusals (return code 0x80).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub granted: Vec<Option<QoS>>,
}

/// UNSUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

/// An MQTT control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(u16),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Control packet type of this packet.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    /// Parse one packet from the start of `buf`.
    ///
    /// Returns the packet and the number of bytes consumed. The payload is
    /// copied; use [`Packet::decode`] with a frozen buffer to avoid that.
    ///
    /// # Errors
    ///
    /// - `Error::IncompletePacket` if `buf` holds less than one full packet
    /// - `Error::InvalidPacket` / `Error::InvalidPacketType` / `Error::InvalidQos`
    ///   for malformed input
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = parse_fixed_header(buf)?;
        let total = header.packet_len();
        if buf.len() < total {
            return Err(Error::IncompletePacket {
                needed: total - buf.len(),
            });
        }
        let body = Bytes::copy_from_slice(&buf[header.header_len..total]);
        Ok((Self::decode(header, body)?, total))
    }

    /// Decode the variable header and payload of an already framed packet.
    ///
    /// `body` must be exactly `header.remaining_length` bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPacket` if the body is truncated, has trailing
    /// bytes, or violates a field rule.
    pub fn decode(header: FixedHeader, mut body: Bytes) -> Result<Self> {
        if body.len() != header.remaining_length {
            return Err(Error::InvalidPacket(format!(
                "body is {} bytes, header says {}",
                body.len(),
                header.remaining_length
            )));
        }

        let packet = match header.packet_type {
            PacketType::Connect => Packet::Connect(decode_connect(&mut body)?),
            PacketType::ConnAck => {
                let flags = read_u8(&mut body)?;
                let return_code = read_u8(&mut body)?;
                Packet::ConnAck(ConnAck {
                    session_present: flags & 0x01 != 0,
                    return_code,
                })
            }
            PacketType::Publish => {
                let qos = QoS::from_u8((header.flags >> 1) & 0x03)?;
                let topic = read_string(&mut body)?;
                let packet_id = if qos.needs_packet_id() {
                    Some(read_packet_id(&mut body)?)
                } else {
                    None
                };
                // The payload is whatever remains; nothing may trail it.
                let payload = body.split_to(body.len());
                Packet::Publish(Publish {
                    dup: header.flags & 0x08 != 0,
                    qos,
                    retain: header.flags & 0x01 != 0,
                    topic,
                    packet_id,
                    payload,
                })
            }
            PacketType::PubAck => Packet::PubAck(read_packet_id(&mut body)?),
            PacketType::PubRec => Packet::PubRec(read_packet_id(&mut body)?),
            PacketType::PubRel => Packet::PubRel(read_packet_id(&mut body)?),
            PacketType::PubComp => Packet::PubComp(read_packet_id(&mut body)?),
            PacketType::Subscribe => {
                let packet_id = read_packet_id(&mut body)?;
                let mut filters = Vec::new();
                while body.has_remaining() {
                    let filter = read_string(&mut body)?;
                    let qos = QoS::from_u8(read_u8(&mut body)?)?;
                    filters.push((filter, qos));
                }
                if filters.is_empty() {
                    return Err(Error::InvalidPacket("SUBSCRIBE without filters".into()));
                }
                Packet::Subscribe(Subscribe { packet_id, filters })
            }
            PacketType::SubAck => {
                let packet_id = read_packet_id(&mut body)?;
                let mut granted = Vec::with_capacity(body.remaining());
                while body.has_remaining() {
                    let code = body.get_u8();
                    granted.push(match code {
                        0x80 => None,
                        other => Some(QoS::from_u8(other)?),
                    });
                }
                Packet::SubAck(SubAck { packet_id, granted })
            }
            PacketType::Unsubscribe => {
                let packet_id = read_packet_id(&mut body)?;
                let mut filters = Vec::new();
                while body.has_remaining() {
                    filters.push(read_string(&mut body)?);
                }
                if filters.is_empty() {
                    return Err(Error::InvalidPacket("UNSUBSCRIBE without filters".into()));
                }
                Packet::Unsubscribe(Unsubscribe { packet_id, filters })
            }
            PacketType::UnsubAck => Packet::UnsubAck(read_packet_id(&mut body)?),
            PacketType::PingReq => Packet::PingReq,
            PacketType::PingResp => Packet::PingResp,
            PacketType::Disconnect => Packet::Disconnect,
        };

        if body.has_remaining() {
            return Err(Error::InvalidPacket(format!(
                "{} trailing bytes after {:?}",
                body.remaining(),
                header.packet_type
            )));
        }
        Ok(packet)
    }

    /// Length of the variable header plus payload.
    fn remaining_length(&self) -> usize {
        match self {
            Packet::Connect(c) => {
                let mut len = 2 + c.protocol_name().len() + 1 + 1 + 2 + 2 + c.client_id.len();
                if let Some(username) = &c.username {
                    len += 2 + username.len();
                }
                if let Some(password) = &c.password {
                    len += 2 + password.len();
                }
                len
            }
            Packet::ConnAck(_) => 2,
            Packet::Publish(p) => {
                2 + p.topic.len() + if p.qos.needs_packet_id() { 2 } else { 0 } + p.payload.len()
            }
            Packet::PubAck(_)
            | Packet::PubRec(_)
            | Packet::PubRel(_)
            | Packet::PubComp(_)
            | Packet::UnsubAck(_) => 2,
            Packet::Subscribe(s) => 2 + s.filters.iter().map(|(f, _)| 2 + f.len() + 1).sum::<usize>(),
            Packet::SubAck(s) => 2 + s.granted.len(),
            Packet::Unsubscribe(u) => 2 + u.filters.iter().map(|f| 2 + f.len()).sum::<usize>(),
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => 0,
        }
    }

    /// Calculate the total size of this packet on the wire.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        let remaining = self.remaining_length();
        1 + remaining_length_size(remaining) + remaining
    }

    fn first_byte(&self) -> u8 {
        let flags = match self {
            Packet::Publish(p) => {
                (u8::from(p.dup) << 3) | (p.qos.as_u8() << 1) | u8::from(p.retain)
            }
            other => other.packet_type().required_flags().unwrap_or(0),
        };
        (self.packet_type().as_u8() << 4) | flags
    }

    /// Serialize this packet into `dst`.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidPacket` if a PUBLISH packet id does not match its QoS,
    ///   or a string is longer than 65535 bytes
    /// - `Error::PacketTooLarge` if the packet exceeds the protocol maximum
    pub fn write(&self, dst: &mut impl BufMut) -> Result<usize> {
        if let Packet::Publish(p) = self {
            if p.qos.needs_packet_id() != p.packet_id.is_some() {
                return Err(Error::InvalidPacket(format!(
                    "PUBLISH at {} with packet id {:?}",
                    p.qos, p.packet_id
                )));
            }
        }

        let remaining = self.remaining_length();
        dst.put_u8(self.first_byte());
        let varint = write_remaining_length(dst, remaining)?;

        match self {
            Packet::Connect(c) => {
                write_string(dst, c.protocol_name())?;
                dst.put_u8(c.protocol_level);
                dst.put_u8(c.flags());
                dst.put_u16(c.keep_alive);
                write_string(dst, &c.client_id)?;
                if let Some(username) = &c.username {
                    write_string(dst, username)?;
                }
                if let Some(password) = &c.password {
                    write_binary(dst, password)?;
                }
            }
            Packet::ConnAck(ack) => {
                dst.put_u8(u8::from(ack.session_present));
                dst.put_u8(ack.return_code);
            }
            Packet::Publish(p) => {
                write_string(dst, &p.topic)?;
                if let Some(id) = p.packet_id {
                    dst.put_u16(id);
                }
                dst.put_slice(&p.payload);
            }
            Packet::PubAck(id)
            | Packet::PubRec(id)
            | Packet::PubRel(id)
            | Packet::PubComp(id)
            | Packet::UnsubAck(id) => dst.put_u16(*id),
            Packet::Subscribe(s) => {
                dst.put_u16(s.packet_id);
                for (filter, qos) in &s.filters {
                    write_string(dst, filter)?;
                    dst.put_u8(qos.as_u8());
                }
            }
            Packet::SubAck(s) => {
                dst.put_u16(s.packet_id);
                for granted in &s.granted {
                    dst.put_u8(granted.map_or(0x80, QoS::as_u8));
                }
            }
            Packet::Unsubscribe(u) => {
                dst.put_u16(u.packet_id);
                for filter in &u.filters {
                    write_string(dst, filter)?;
                }
            }
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => {}
        }

        Ok(1 + varint + remaining)
    }
}

fn decode_connect(body: &mut Bytes) -> Result<Connect> {
    let name = read_string(body)?;
    let protocol_level = read_u8(body)?;
    if name != "MQTT" && name != "MQIsdp" {
        return Err(Error::ProtocolViolation(format!(
            "unknown protocol name '{}'",
            name
        )));
    }
    let flags = read_u8(body)?;
    if flags & 0x01 != 0 {
        return Err(Error::InvalidPacket("CONNECT reserved flag set".into()));
    }
    let keep_alive = read_u16(body)?;
    let client_id = read_string(body)?;

    if flags & 0x04 != 0 {
        let _will_topic = read_string(body)?;
        let _will_message = read_binary(body)?;
    }
    let username = if flags & 0x80 != 0 {
        Some(read_string(body)?)
    } else {
        None
    };
    let password = if flags & 0x40 != 0 {
        Some(read_binary(body)?)
    } else {
        None
    };

    Ok(Connect {
        protocol_level,
        client_id,
        clean_session: flags & 0x02 != 0,
        keep_alive,
        username,
        password,
    })
}

fn truncated() -> Error {
    Error::InvalidPacket("truncated variable header".into())
}

fn read_u8(body: &mut Bytes) -> Result<u8> {
    if body.remaining() < 1 {
        return Err(truncated());
    }
    Ok(body.get_u8())
}

fn read_u16(body: &mut Bytes) -> Result<u16> {
    if body.remaining() < 2 {
        return Err(truncated());
    }
    Ok(body.get_u16())
}

fn read_packet_id(body: &mut Bytes) -> Result<u16> {
    match read_u16(body)? {
        0 => Err(Error::InvalidPacket("packet identifier 0".into())),
        id => Ok(id),
    }
}

fn read_binary(body: &mut Bytes) -> Result<Bytes> {
    let len = read_u16(body)? as usize;
    if body.remaining() < len {
        return Err(truncated());
    }
    Ok(body.split_to(len))
}

fn read_string(body: &mut Bytes) -> Result<String> {
    let raw = read_binary(body)?;
    Ok(std::str::from_utf8(&raw)?.to_owned())
}

fn write_binary(dst: &mut impl BufMut, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len())
        .map_err(|_| Error::InvalidPacket(format!("field of {} bytes exceeds 65535", data.len())))?;
    dst.put_u16(len);
    dst.put_slice(data);
    Ok(())
}

fn write_string(dst: &mut impl BufMut, s: &str) -> Result<()> {
    write_binary(dst, s.as_bytes())
}
