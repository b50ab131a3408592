//! Blocking client for the document store.
//!
//! # Design
//! `SofaClient` composes three pieces: a `Transport` that moves bytes, the
//! normalizer that types the result, and an optional `CacheStore` that lets
//! reads revalidate instead of re-downloading.
//!
//! Every call funnels through `send`, which prepares the request from the
//! client's `Session` and path prefix, issues it, and normalizes the reply.
//! `get`, `put` and `delete` add the cache protocol on top:
//!
//! - `get` revalidates a cached entry with `If-None-Match`. A 304 returns the
//!   cached copy flagged `from_cache`; anything else drops the entry and the
//!   fresh response is offered back to the cache.
//! - `put` refreshes the entry from the document it just wrote plus the new
//!   `_rev`, saving the next read a download.
//! - `delete` drops the entry before the request goes out.
//!
//! The client holds no locks. Concurrent writers to the same resource can
//! leave an entry stale until its next revalidation.

use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, trace};

use crate::cache::{CacheStore, SetOutcome};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::http::{Headers, HttpMethod};
use crate::request::{build_request, encode_component, set_query_parameter};
use crate::response::{normalize, Body, NormalizedResponse};
use crate::session::Session;
use crate::transport::{build_transport, Endpoint, Transport, TransportKind, TransportSettings};

/// Synchronous client with an optional conditional-request cache.
pub struct SofaClient {
    transport: Box<dyn Transport>,
    pub(crate) session: Session,
    database: Option<String>,
    path_prefix: String,
    stale_default: bool,
    cache: Option<Box<dyn CacheStore>>,
}

impl SofaClient {
    /// Client for `host:port` using the default transport.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let settings = TransportSettings::new(Endpoint::new(host, port));
        Self::with_transport(build_transport(TransportKind::default(), settings))
    }

    /// Client over a caller-supplied transport.
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            session: Session::default(),
            database: None,
            path_prefix: String::new(),
            stale_default: false,
            cache: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut endpoint = Endpoint::new(config.host.clone(), config.port);
        endpoint.tls = config.tls;
        endpoint.cert_path = config.cert_path.clone();

        let mut settings = TransportSettings::new(endpoint);
        settings.decode = config.decode;
        if let Some(seconds) = config.open_timeout {
            settings.timeouts.set_open(seconds)?;
        }
        if let Some(rw) = config.rw_timeout {
            settings.timeouts.set_rw(rw.seconds, rw.microseconds)?;
        }

        let mut client = Self::with_transport(build_transport(config.transport, settings));
        client
            .set_path_prefix(&config.path_prefix)
            .set_stale_default(config.stale_default);
        if let Some(database) = &config.database {
            client.set_database(database)?;
        }
        Ok(client)
    }

    // -----------------------------------------------------------------------
    // Transport configuration
    // -----------------------------------------------------------------------

    /// Switch to a built-in adapter, carrying the current settings over.
    /// Selecting the adapter already in use is a no-op.
    pub fn set_transport(&mut self, kind: TransportKind) -> &mut Self {
        if self.transport.kind() == Some(kind) {
            return self;
        }
        let snapshot = self.transport.settings().clone();
        self.transport = build_transport(kind, snapshot);
        debug!(?kind, "transport switched");
        self
    }

    /// Install a custom adapter, applying the outgoing adapter's settings to it.
    pub fn replace_transport(&mut self, mut transport: Box<dyn Transport>) -> &mut Self {
        *transport.settings_mut() = self.transport.settings().clone();
        self.transport = transport;
        self
    }

    pub fn current_transport(&self) -> Option<TransportKind> {
        self.transport.kind()
    }

    pub fn transport_settings(&self) -> &TransportSettings {
        self.transport.settings()
    }

    /// Decode JSON response bodies into values (on by default).
    pub fn decode(&mut self, decode: bool) -> &mut Self {
        self.transport.settings_mut().decode = decode;
        self
    }

    pub fn set_open_timeout(&mut self, seconds: u64) -> Result<&mut Self> {
        self.transport.settings_mut().timeouts.set_open(seconds)?;
        Ok(self)
    }

    pub fn set_rw_timeout(&mut self, seconds: u64, microseconds: u32) -> Result<&mut Self> {
        self.transport
            .settings_mut()
            .timeouts
            .set_rw(seconds, microseconds)?;
        Ok(self)
    }

    pub fn use_tls(&mut self, tls: bool) -> &mut Self {
        self.transport.settings_mut().endpoint.tls = tls;
        self
    }

    pub fn using_tls(&self) -> bool {
        self.transport.settings().endpoint.tls
    }

    /// PEM certificate to trust for TLS, or `None` for the default roots.
    pub fn set_tls_cert(&mut self, path: Option<PathBuf>) -> &mut Self {
        self.transport.settings_mut().endpoint.cert_path = path;
        self
    }

    // -----------------------------------------------------------------------
    // Database, paths and session
    // -----------------------------------------------------------------------

    pub fn set_database(&mut self, name: &str) -> Result<&mut Self> {
        if name.is_empty() {
            return Err(Error::validation("database name must not be empty"));
        }
        self.database = Some(encode_component(name));
        Ok(self)
    }

    pub fn current_database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn set_path_prefix(&mut self, prefix: &str) -> &mut Self {
        self.path_prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    /// Ask the server for possibly stale but faster reads on every GET/HEAD.
    pub fn set_stale_default(&mut self, stale: bool) -> &mut Self {
        self.stale_default = stale;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Send `key=value` as a cookie on every request; `None` stops sending it.
    pub fn set_cookie(&mut self, key: &str, value: Option<&str>) -> Result<&mut Self> {
        if key.is_empty() {
            return Err(Error::validation("cookie key must not be empty"));
        }
        match value {
            Some(value) if !value.is_empty() => {
                self.session
                    .cookies
                    .insert(key.to_string(), value.to_string());
            }
            _ => {
                self.session.cookies.remove(key);
            }
        }
        Ok(self)
    }

    pub fn cookie(&self, key: &str) -> Option<&str> {
        self.session.cookies.get(key).map(String::as_str)
    }

    // -----------------------------------------------------------------------
    // Cache
    // -----------------------------------------------------------------------

    pub fn set_cache(&mut self, cache: Box<dyn CacheStore>) -> &mut Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&dyn CacheStore> {
        self.cache.as_deref()
    }

    pub fn cache_mut(&mut self) -> Option<&mut (dyn CacheStore + 'static)> {
        self.cache.as_deref_mut()
    }

    pub fn take_cache(&mut self) -> Option<Box<dyn CacheStore>> {
        self.cache.take()
    }

    fn cached(&self, url: &str) -> Result<Option<NormalizedResponse>> {
        match &self.cache {
            Some(cache) => cache.get(url),
            None => Ok(None),
        }
    }

    /// Offer a response to the cache. Returns whether it was kept.
    fn store(&mut self, url: &str, response: &NormalizedResponse) -> Result<bool> {
        let Some(cache) = self.cache.as_mut() else {
            return Ok(false);
        };
        let outcome = cache.set(url, response)?;
        match &outcome {
            SetOutcome::Rejected => trace!(url, "response not cacheable"),
            SetOutcome::Stored => debug!(url, "cache entry stored"),
            SetOutcome::Replaced(_) => debug!(url, "cache entry replaced"),
        }
        Ok(outcome.is_stored())
    }

    fn invalidate(&mut self, url: &str) -> Result<()> {
        if let Some(cache) = self.cache.as_mut() {
            if cache.remove(url)? {
                debug!(url, "cache entry invalidated");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    fn require_database(&self) -> Result<&str> {
        self.database
            .as_deref()
            .ok_or_else(|| Error::validation("no database selected"))
    }

    /// `/{database}{path}`, with a leading slash ensured on `path`.
    pub(crate) fn db_path(&self, path: &str) -> Result<String> {
        let database = self.require_database()?;
        if path.is_empty() || path.starts_with('/') {
            Ok(format!("/{database}{path}"))
        } else {
            Ok(format!("/{database}/{path}"))
        }
    }

    /// The path a read of `path` is issued and cached under.
    fn read_path(&self, path: &str) -> String {
        if self.stale_default {
            set_query_parameter(path, "stale", "ok")
        } else {
            path.to_string()
        }
    }

    pub(crate) fn document_path(&self, id: &str) -> Result<String> {
        if id.is_empty() {
            return Err(Error::validation("a document id is required"));
        }
        self.db_path(&format!("/{}", encode_component(id)))
    }

    /// Issue one request and normalize the response. No caching.
    ///
    /// `path` is relative to the server root; the path prefix is prepended.
    pub fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Vec<u8>>,
        headers: Headers,
    ) -> Result<NormalizedResponse> {
        self.send_as(&self.session, method, path, body, headers)
    }

    /// `send` on behalf of `session` instead of the client's own.
    pub(crate) fn send_as(
        &self,
        session: &Session,
        method: HttpMethod,
        path: &str,
        body: Option<Vec<u8>>,
        headers: Headers,
    ) -> Result<NormalizedResponse> {
        let request = build_request(
            session,
            &self.path_prefix,
            method,
            path,
            body,
            headers,
        )?;
        debug!(method = %request.method, path = %request.path, "sending request");

        let raw = self.transport.issue(&request)?;
        debug!(status = raw.status, bytes = raw.body.len(), "response received");

        normalize(raw, self.transport.settings().decode)
    }

    /// Read a resource of the current database, revalidating any cached copy.
    ///
    /// `path` is sent as given, so any document id in it must already be
    /// percent-encoded. Use `get_document` to read by id.
    pub fn get(&mut self, path: &str) -> Result<NormalizedResponse> {
        let url = self.read_path(&self.db_path(path)?);

        let mut fetched = None;
        if let Some(prior) = self.cached(&url)? {
            let etag = prior.etag().unwrap_or_default().to_string();
            if etag.is_empty() {
                self.invalidate(&url)?;
            } else {
                let headers: Headers = [("If-None-Match", etag)].into_iter().collect();
                match self.send(HttpMethod::Get, &url, None, headers) {
                    Ok(response) if response.status == 304 => {
                        debug!(url, "cache hit");
                        let mut hit = prior;
                        hit.from_cache = true;
                        return Ok(hit);
                    }
                    Ok(response) => {
                        self.invalidate(&url)?;
                        fetched = Some(response);
                    }
                    Err(err @ Error::Protocol { .. }) => {
                        self.invalidate(&url)?;
                        return Err(err);
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        let response = match fetched {
            Some(response) => response,
            None => self.send(HttpMethod::Get, &url, None, Headers::new())?,
        };
        self.store(&url, &response)?;
        Ok(response)
    }

    /// Read document `id`, cached under the same key `put` and `delete` use.
    pub fn get_document(&mut self, id: &str) -> Result<NormalizedResponse> {
        if id.is_empty() {
            return Err(Error::validation("a document id is required"));
        }
        self.get(&format!("/{}", encode_component(id)))
    }

    /// HEAD a resource of the current database. Never touches the cache.
    pub fn head(&self, path: &str) -> Result<NormalizedResponse> {
        let url = self.read_path(&self.db_path(path)?);
        self.send(HttpMethod::Head, &url, None, Headers::new())
    }

    /// Create or update document `id`.
    ///
    /// On success the cache entry for the document is rebuilt from `doc` and
    /// the revision the server assigned.
    pub fn put(&mut self, id: &str, doc: &Value) -> Result<NormalizedResponse> {
        if !doc.is_object() {
            return Err(Error::validation("put expects a JSON object document"));
        }
        let url = self.document_path(id)?;
        let body = serde_json::to_vec(doc)
            .map_err(|e| Error::validation(format!("document cannot be serialized: {e}")))?;

        let response = self.send(HttpMethod::Put, &url, Some(body), Headers::new())?;

        if self.cache.is_some() {
            let key = self.read_path(&url);
            let refreshed = match write_through_entry(&response, doc) {
                Some(entry) => self.store(&key, &entry)?,
                None => false,
            };
            if !refreshed {
                self.invalidate(&key)?;
            }
        }
        Ok(response)
    }

    /// Delete revision `rev` of document `id`.
    ///
    /// The cache entry is dropped before the request is sent, whether or not
    /// the delete succeeds.
    pub fn delete(&mut self, id: &str, rev: &str) -> Result<NormalizedResponse> {
        if rev.is_empty() {
            return Err(Error::validation("delete expects a document revision"));
        }
        let url = self.document_path(id)?;
        let key = self.read_path(&url);
        self.invalidate(&key)?;

        let target = format!("{url}?rev={}", encode_component(rev));
        self.send(HttpMethod::Delete, &target, None, Headers::new())
    }

    /// Drop the cached copy of document `id`, if any.
    pub(crate) fn invalidate_document(&mut self, id: &str) -> Result<()> {
        let key = self.read_path(&self.document_path(id)?);
        self.invalidate(&key)
    }
}

/// Cache entry for a document just written, or `None` when the server did
/// not confirm the write.
fn write_through_entry(response: &NormalizedResponse, doc: &Value) -> Option<NormalizedResponse> {
    let reply = response.document()?;
    if reply.get("ok").and_then(Value::as_bool) != Some(true) {
        return None;
    }

    let mut stored = doc.clone();
    if let (Some(fields), Some(rev)) = (stored.as_object_mut(), reply.get("rev")) {
        fields.insert("_rev".to_string(), rev.clone());
    }

    let mut entry = response.clone();
    entry.status = 200;
    entry.headers.remove("content-length");
    entry.body = Body::Json(stored);
    entry.from_cache = false;
    Some(entry)
}
