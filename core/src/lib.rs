//! Blocking client for CouchDB-style document databases.
//!
//! # Overview
//! Speaks HTTP/1.x to the server over one of two interchangeable transports,
//! turns each reply into a `NormalizedResponse`, and can keep fetched
//! documents in a `CacheStore` so repeated reads become `If-None-Match`
//! revalidations.
//!
//! # Design
//! - `Transport` is the only I/O boundary. `SocketTransport` writes the
//!   request by hand over a `TcpStream`; `UreqTransport` delegates to `ureq`.
//!   Both hand back the same `RawResponse`, and `normalize` does the rest.
//! - `build_request` and `normalize` are pure, so header defaults, error
//!   mapping and cookie parsing are tested without a server.
//! - Cache stores (`MemoryCache`, `FileCache`) only ever hold responses with
//!   an ETag and a JSON object or array body.
//! - All fallible calls return `error::Result`; the variants separate bad
//!   arguments, network failures, server-reported errors and cache I/O.

pub mod cache;
pub mod client;
pub mod config;
pub mod cookie;
mod endpoints;
pub mod error;
pub mod http;
pub mod request;
pub mod response;
pub mod session;
pub mod transport;
pub mod types;

pub use cache::{CacheStore, FileCache, MemoryCache, SetOutcome};
pub use client::SofaClient;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use http::{Headers, HttpMethod, HttpRequest, RawResponse};
pub use response::{Body, NormalizedResponse};
pub use session::{Auth, AuthMode, Session};
pub use transport::{Transport, TransportKind, TransportSettings};
pub use types::{AllDocsQuery, BulkDocs, Replication};
