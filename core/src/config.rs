//! Client configuration.
//!
//! `ClientConfig` is plain data with serde support so callers can load it
//! from whatever source they use. Every field has a default; validation
//! happens when the client is built from it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::transport::{RwTimeout, TransportKind, DEFAULT_HOST, DEFAULT_PORT};

/// Settings for `SofaClient::from_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Database selected at startup.
    pub database: Option<String>,
    /// Prepended to every request path, for servers behind a path-routing proxy.
    pub path_prefix: String,
    pub transport: TransportKind,
    pub tls: bool,
    pub cert_path: Option<PathBuf>,
    /// Connect timeout in seconds.
    pub open_timeout: Option<u64>,
    pub rw_timeout: Option<RwTimeout>,
    /// Decode JSON bodies into values.
    pub decode: bool,
    /// Append `stale=ok` to every read.
    pub stale_default: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: None,
            path_prefix: String::new(),
            transport: TransportKind::default(),
            tls: false,
            cert_path: None,
            open_timeout: None,
            rw_timeout: None,
            decode: true,
            stale_default: false,
        }
    }
}
