use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::{Packet, parse_fixed_header};

const READ_CHUNK: usize = 4096;

/// Buffered MQTT packet reader/writer over an async byte stream.
///
/// Reading and writing are independent: a codec wrapping only the read half
/// of a split stream needs just `AsyncRead`, and vice versa.
pub struct MqttCodec<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
    limits: Limits,
}

impl<T> MqttCodec<T> {
    #[must_use]
    pub fn new(io: T, limits: Limits) -> Self {
        Self {
            io,
            read_buf: BytesMut::with_capacity(8192),
            write_buf: BytesMut::with_capacity(8192),
            limits,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.io
    }
}

impl<T: AsyncRead + Unpin> MqttCodec<T> {
    /// Read the next complete packet.
    ///
    /// Cancel-safe: bytes already read stay buffered for the next call.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` on end of stream
    /// - `Error::PacketTooLarge` if the announced packet exceeds the limits
    /// - any parse error from [`Packet::decode`]
    pub async fn read_packet(&mut self) -> Result<Packet> {
        loop {
            match parse_fixed_header(&self.read_buf) {
                Ok(header) => {
                    let total = header.packet_len();
                    self.limits.check_packet_size(total)?;
                    if self.read_buf.len() >= total {
                        let mut frame = self.read_buf.split_to(total);
                        frame.advance(header.header_len);
                        return Packet::decode(header, frame.freeze());
                    }
                    self.read_buf.reserve(total - self.read_buf.len());
                }
                Err(Error::IncompletePacket { .. }) => {}
                Err(e) => return Err(e),
            }

            self.read_buf.reserve(READ_CHUNK);
            let n = self.io.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}

impl<T: AsyncWrite + Unpin> MqttCodec<T> {
    /// Serialize and write one packet, then flush.
    ///
    /// # Errors
    ///
    /// - `Error::PacketTooLarge` if the packet exceeds the limits
    /// - I/O errors from the underlying stream
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let wire_size = packet.wire_size();
        self.limits.check_packet_size(wire_size)?;

        self.write_buf.clear();
        self.write_buf.reserve(wire_size);
        packet.write(&mut self.write_buf)?;
        self.io.write_all(&self.write_buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}
