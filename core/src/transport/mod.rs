//! Transport adapters.
//!
//! # Design
//! A `Transport` sends one prepared `HttpRequest` and returns the
//! `RawResponse` as received, or an `Error::Transport`. Two adapters ship
//! with the crate: `SocketTransport` writes HTTP/1.0 straight onto a
//! `TcpStream`, `UreqTransport` delegates to the `ureq` HTTP client.
//!
//! Everything an adapter is configured with lives in `TransportSettings`, so
//! swapping adapters at runtime is snapshot, construct, apply: the client
//! clones the outgoing adapter's settings and builds the new one from them.

pub mod library;
pub mod socket;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http::{HttpRequest, RawResponse};

pub use library::UreqTransport;
pub use socket::SocketTransport;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5984;

/// Selects one of the built-in adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// HTTP/1.0 written directly to a TCP socket.
    Socket,
    /// The `ureq` HTTP client.
    #[default]
    Ureq,
}

/// Where requests go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// PEM certificate trusted for TLS connections.
    pub cert_path: Option<PathBuf>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
            cert_path: None,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }

    /// `scheme://host:port`, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host, self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

/// Read/write timeout split into whole seconds and microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RwTimeout {
    pub seconds: u64,
    pub microseconds: u32,
}

impl RwTimeout {
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.seconds) + Duration::from_micros(u64::from(self.microseconds))
    }
}

/// Connection-level timeouts. `None` leaves the platform default in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeouts {
    open: Option<u64>,
    rw: Option<RwTimeout>,
}

impl Timeouts {
    /// Seconds allowed for establishing the connection. Must be positive.
    pub fn set_open(&mut self, seconds: u64) -> Result<()> {
        if seconds < 1 {
            return Err(Error::validation("open timeout expects a positive number of seconds"));
        }
        self.open = Some(seconds);
        Ok(())
    }

    /// Socket read/write timeout. With zero microseconds the seconds must be
    /// at least one.
    pub fn set_rw(&mut self, seconds: u64, microseconds: u32) -> Result<()> {
        if microseconds >= 1_000_000 {
            return Err(Error::validation(
                "read/write timeout expects fewer than 1000000 microseconds",
            ));
        }
        if microseconds == 0 && seconds < 1 {
            return Err(Error::validation(
                "read/write timeout expects a positive number of seconds",
            ));
        }
        self.rw = Some(RwTimeout {
            seconds,
            microseconds,
        });
        Ok(())
    }

    pub fn open(&self) -> Option<Duration> {
        self.open.map(Duration::from_secs)
    }

    pub fn open_seconds(&self) -> Option<u64> {
        self.open
    }

    pub fn rw(&self) -> Option<RwTimeout> {
        self.rw
    }

    pub fn rw_duration(&self) -> Option<Duration> {
        self.rw.map(|rw| rw.as_duration())
    }
}

/// Per-adapter configuration carried across adapter swaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub endpoint: Endpoint,
    /// Decode `application/json` bodies into `serde_json::Value`.
    pub decode: bool,
    pub timeouts: Timeouts,
}

impl TransportSettings {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            decode: true,
            timeouts: Timeouts::default(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::new(Endpoint::default())
    }
}

/// Sends one HTTP request over some transport.
pub trait Transport: Send {
    /// Put `request` on the wire and return the response as received.
    ///
    /// Fails with `Error::Transport` on connection failure, timeout or TLS
    /// setup failure. Error statuses are returned as data, not errors.
    fn issue(&self, request: &HttpRequest) -> Result<RawResponse>;

    fn settings(&self) -> &TransportSettings;

    fn settings_mut(&mut self) -> &mut TransportSettings;

    /// Which built-in adapter this is, if any.
    fn kind(&self) -> Option<TransportKind> {
        None
    }
}

/// Build one of the built-in adapters from a settings snapshot.
pub fn build_transport(kind: TransportKind, settings: TransportSettings) -> Box<dyn Transport> {
    match kind {
        TransportKind::Socket => Box::new(SocketTransport::new(settings)),
        TransportKind::Ureq => Box::new(UreqTransport::new(settings)),
    }
}
