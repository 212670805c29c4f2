//! Error types for the load harness and its MQTT transport.
//!
//! Every variant belongs to one class of failure (see [`ErrorKind`]).
//! Registration, transport and stall errors are fatal for a run; malformed
//! payloads are recovered locally by the latency recorder.

use thiserror::Error;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credential issuance failed.
    Registration,
    /// Connect, subscribe, publish or unsubscribe failed.
    Transport,
    /// A received payload did not carry a usable envelope.
    MalformedPayload,
    /// The expected receive count was never reached.
    Stall,
    /// Invalid configuration or credential input.
    Config,
}

/// Errors that can occur while provisioning or running a fleet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Registration service unreachable or returned an unusable response.
    #[error("Registration failed: {0}")]
    Registration(String),

    /// Registration service answered with a non-zero error code.
    #[error("Registration rejected with code {code}")]
    RegistrationRejected {
        /// Application error code returned by the service.
        code: i64,
    },

    /// Invalid packet structure.
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Peer violated the MQTT protocol.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Incomplete packet data.
    #[error("Incomplete packet: need {needed} more bytes")]
    IncompletePacket {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Packet size exceeds configured maximum.
    #[error("Packet too large: {size} bytes (max: {max})")]
    PacketTooLarge {
        /// Actual packet size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Unknown control packet type.
    #[error("Invalid packet type: {0:#x}")]
    InvalidPacketType(u8),

    /// QoS value outside 0..=2.
    #[error("Invalid QoS: {0}")]
    InvalidQos(u8),

    /// Topic name or filter rejected.
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Broker refused the connection.
    #[error("Connection refused by broker: return code {0}")]
    ConnectionRefused(u8),

    /// Broker refused a subscription.
    #[error("Subscription to '{0}' rejected by broker")]
    SubscriptionRejected(String),

    /// Connection has been closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connect did not complete in the configured time.
    #[error("Connect timed out after {0} ms")]
    ConnectTimeout(u64),

    /// Broker address could not be parsed or is unsupported.
    #[error("Invalid broker address: {0}")]
    InvalidBrokerAddr(String),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Payload shorter than the envelope header.
    #[error("Malformed payload: {len} bytes (need at least {min})")]
    MalformedPayload {
        /// Received payload length.
        len: usize,
        /// Minimum envelope length.
        min: usize,
    },

    /// Envelope refers to a pair that was never scheduled for publishing.
    #[error("Unknown message pair: client {origin}, sequence {sequence}")]
    UnknownPair {
        /// Origin client index.
        origin: u32,
        /// Sequence number.
        sequence: u32,
    },

    /// Credential file line could not be parsed.
    #[error("Invalid credential record on line {line}: {reason}")]
    InvalidCredentialRecord {
        /// One-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Receive counter stopped making progress.
    #[error("Receive stalled at {received}/{expected} messages ({} incomplete pairs shown)", missing.len())]
    ReceiveStalled {
        /// Messages recorded so far.
        received: u64,
        /// Messages required for completion.
        expected: u64,
        /// Sample of `(origin, sequence)` pairs still incomplete.
        missing: Vec<(u32, u32)>,
    },

    /// A fleet task panicked or was cancelled.
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Error::Registration(_) | Error::RegistrationRejected { .. } => ErrorKind::Registration,
            Error::MalformedPayload { .. } | Error::UnknownPair { .. } => {
                ErrorKind::MalformedPayload
            }
            Error::ReceiveStalled { .. } => ErrorKind::Stall,
            Error::InvalidCredentialRecord { .. } | Error::InvalidConfig(_) => ErrorKind::Config,
            _ => ErrorKind::Transport,
        }
    }

    /// Returns `true` if this error must abort the whole run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self.kind(), ErrorKind::MalformedPayload)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidPacket("string is not valid UTF-8".into())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::TaskFailed(err.to_string())
    }
}
