//! Broker address and connect options.

use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "tls-rustls")]
use std::sync::Arc;

use bytes::Bytes;

use crate::client::DeliveryHandler;
use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::{Connect, PROTOCOL_LEVEL_3_1_1};

/// Transport scheme of a broker address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain TCP (`tcp://`, `mqtt://`).
    Tcp,
    /// TLS over TCP (`ssl://`, `tls://`, `mqtts://`).
    Tls,
}

impl Scheme {
    const fn default_port(self) -> u16 {
        match self {
            Scheme::Tcp => 1883,
            Scheme::Tls => 8883,
        }
    }
}

/// Parsed broker address, e.g. `tcp://127.0.0.1:1883`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerAddr {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl BrokerAddr {
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Tcp,
            host: host.into(),
            port,
        }
    }

    #[must_use]
    pub fn tls(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Tls,
            host: host.into(),
            port,
        }
    }
}

impl From<std::net::SocketAddr> for BrokerAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::tcp(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for BrokerAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = match s.split_once("://") {
            Some(("tcp" | "mqtt", rest)) => (Scheme::Tcp, rest),
            Some(("ssl" | "tls" | "mqtts", rest)) => (Scheme::Tls, rest),
            Some((other, _)) => {
                return Err(Error::InvalidBrokerAddr(format!(
                    "unsupported scheme '{}'",
                    other
                )));
            }
            None => (Scheme::Tcp, s),
        };
        let rest = rest.trim_end_matches('/');

        // Bracketed IPv6 literal: [::1]:1883
        let (host, port) = if let Some(v6) = rest.strip_prefix('[') {
            let (host, tail) = v6
                .split_once(']')
                .ok_or_else(|| Error::InvalidBrokerAddr(s.to_string()))?;
            (host, tail.strip_prefix(':'))
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(Error::InvalidBrokerAddr(format!("'{}' has no host", s)));
        }
        let port = match port {
            Some(p) => p
                .parse()
                .map_err(|_| Error::InvalidBrokerAddr(format!("bad port in '{}'", s)))?,
            None => scheme.default_port(),
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for BrokerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.scheme {
            Scheme::Tcp => "tcp",
            Scheme::Tls => "ssl",
        };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// Options for one broker connection.
#[derive(Clone)]
pub struct ConnectOptions {
    pub broker: BrokerAddr,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Default: true
    pub clean_session: bool,

    /// Keep-alive announced in CONNECT; PINGREQ is sent at half this period.
    /// Zero disables keep-alive.
    ///
    /// Default: 60 seconds
    pub keep_alive: Duration,

    /// Protocol level byte of CONNECT.
    ///
    /// Default: 4 (MQTT 3.1.1)
    pub protocol_level: u8,

    /// Bound on TCP connect + CONNACK.
    ///
    /// If `None`, connecting may block indefinitely.
    /// Default: None
    pub connect_timeout: Option<Duration>,

    pub limits: Limits,

    /// Receives messages that match no subscription.
    pub fallback: Option<DeliveryHandler>,

    /// TLS client config for `ssl://` brokers; bundled roots when `None`.
    #[cfg(feature = "tls-rustls")]
    pub tls: Option<Arc<tokio_rustls::rustls::ClientConfig>>,
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("broker", &self.broker)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("clean_session", &self.clean_session)
            .field("keep_alive", &self.keep_alive)
            .field("protocol_level", &self.protocol_level)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn new(broker: BrokerAddr) -> Self {
        Self {
            broker,
            client_id: String::new(),
            username: None,
            password: None,
            clean_session: true,
            keep_alive: Duration::from_secs(60),
            protocol_level: PROTOCOL_LEVEL_3_1_1,
            connect_timeout: None,
            limits: Limits::default(),
            fallback: None,
            #[cfg(feature = "tls-rustls")]
            tls: None,
        }
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub const fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn with_protocol_level(mut self, level: u8) -> Self {
        self.protocol_level = level;
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, handler: DeliveryHandler) -> Self {
        self.fallback = Some(handler);
        self
    }

    #[cfg(feature = "tls-rustls")]
    #[must_use]
    pub fn with_tls_config(mut self, config: Arc<tokio_rustls::rustls::ClientConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    /// Keep-alive in whole seconds as carried by CONNECT (saturating).
    #[must_use]
    pub fn keep_alive_secs(&self) -> u16 {
        u16::try_from(self.keep_alive.as_secs()).unwrap_or(u16::MAX)
    }

    pub(crate) fn connect_packet(&self) -> Connect {
        Connect {
            protocol_level: self.protocol_level,
            client_id: self.client_id.clone(),
            clean_session: self.clean_session,
            keep_alive: self.keep_alive_secs(),
            username: self.username.clone(),
            password: self.password.clone().map(Bytes::from),
        }
    }
}
