//! Error taxonomy for the document store client.
//!
//! # Design
//! Failures fall into three buckets that tell the caller where things went
//! wrong: `Validation` fires before any I/O, `Transport` covers the wire
//! itself (connect, timeout, TLS, truncated bodies), and `Protocol` means the
//! server answered but refused (status >= 400 or an embedded `error` object).
//! `Cache` is reserved for filesystem failures of the durable cache store.
//! Nothing in the crate retries; every error surfaces to the public call that
//! triggered it.

use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the client, its transports and its cache stores.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad arguments to a public operation. No I/O has happened.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// Connection failure, timeout, TLS setup failure or a body that does
    /// not match its declared length.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server returned status >= 400 or a JSON body carrying `error`.
    #[error("remote error {status}: {message}")]
    Protocol { status: u16, message: String },

    /// A durable cache file could not be read, written or deleted.
    #[error("cache error at {}: {source}", path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    pub(crate) fn cache(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Cache {
            path: path.into(),
            source,
        }
    }

    /// Remote HTTP status carried by a `Protocol` error.
    pub fn code(&self) -> Option<u16> {
        match self {
            Error::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the server reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        self.code() == Some(404)
    }
}
