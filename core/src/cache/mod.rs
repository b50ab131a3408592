//! Conditional-request cache stores.
//!
//! # Design
//! A cache store maps resource URLs (path + query) to the last
//! `NormalizedResponse` seen for them. The client uses the stored ETag to
//! revalidate with `If-None-Match` and serves the stored copy on 304.
//!
//! Both stores share three pieces by composition:
//! - `may_cache`: only responses with a non-empty ETag and a decoded object
//!   or array body are kept.
//! - `cache_key`: SHA-256 hex of the URL, independent of host and scheme.
//! - `SizeLedger`: a configurable maximum and a usage counter. Accounting
//!   only; nothing is ever evicted to honour the maximum.

pub mod file;
pub mod memory;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::response::NormalizedResponse;

pub use file::FileCache;
pub use memory::MemoryCache;

/// Default maximum cache size in bytes.
pub const DEFAULT_MAX_SIZE: u64 = 1_000_000;

/// What `CacheStore::set` did with the item.
#[derive(Debug, Clone, PartialEq)]
pub enum SetOutcome {
    /// Stored, replacing this earlier entry.
    Replaced(NormalizedResponse),
    /// Stored; nothing was cached for the URL before.
    Stored,
    /// Not eligible for caching. The store was not touched.
    Rejected,
}

impl SetOutcome {
    pub fn is_stored(&self) -> bool {
        !matches!(self, SetOutcome::Rejected)
    }
}

/// Storage for revalidatable responses.
pub trait CacheStore: Send {
    fn get(&self, url: &str) -> Result<Option<NormalizedResponse>>;

    fn set(&mut self, url: &str, item: &NormalizedResponse) -> Result<SetOutcome>;

    /// Drop the entry for `url`. Returns whether there was one.
    fn remove(&mut self, url: &str) -> Result<bool>;

    /// Drop every entry. Returns whether all of them went away.
    fn clear(&mut self) -> Result<bool>;

    /// Configure the maximum size in bytes. Zero is rejected.
    fn set_size(&mut self, bytes: u64) -> Result<()>;

    fn size(&self) -> Result<u64>;

    /// Bytes currently held by this store.
    fn usage(&self) -> Result<u64>;
}

/// Derive the storage key for a resource URL.
pub fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether a response may be kept by a cache store.
pub fn may_cache(item: &NormalizedResponse) -> bool {
    let has_etag = item.etag().map(|etag| !etag.is_empty()).unwrap_or(false);
    has_etag && item.body.is_structured()
}

pub(crate) fn require_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(Error::validation("a URL is required to address the cache"));
    }
    Ok(())
}

/// Size accounting shared by stores that track usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeLedger {
    max_size: u64,
    usage: u64,
}

impl SizeLedger {
    pub fn new() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            usage: 0,
        }
    }

    pub fn set_max(&mut self, bytes: u64) -> Result<()> {
        if bytes == 0 {
            return Err(Error::validation("the cache size must be a positive number of bytes"));
        }
        self.max_size = bytes;
        Ok(())
    }

    pub fn max(&self) -> u64 {
        self.max_size
    }

    pub fn usage(&self) -> u64 {
        self.usage
    }

    pub fn add(&mut self, bytes: u64) {
        self.usage += bytes;
    }

    pub fn sub(&mut self, bytes: u64) {
        self.usage = self.usage.saturating_sub(bytes);
    }
}

impl Default for SizeLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::Value;

    use crate::http::Headers;
    use crate::response::{Body, NormalizedResponse};

    pub fn response(etag: Option<&str>, body: Body) -> NormalizedResponse {
        let mut headers = Headers::new();
        headers.insert("content-type", "application/json");
        if let Some(etag) = etag {
            headers.insert("etag", etag);
        }
        NormalizedResponse {
            status: 200,
            headers,
            body,
            cookies: Default::default(),
            from_cache: false,
        }
    }

    pub fn doc(etag: &str, body: Value) -> NormalizedResponse {
        response(Some(etag), Body::Json(body))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::response::Body;
    use serde_json::json;

    #[test]
    fn cache_key_is_stable_and_fixed_length() {
        let a = cache_key("/db/doc1");
        let b = cache_key("/db/doc1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cache_key_distinguishes_queries() {
        assert_ne!(cache_key("/db/doc1"), cache_key("/db/doc1?stale=ok"));
    }

    #[test]
    fn eligible_with_etag_and_object_body() {
        assert!(may_cache(&doc("\"1-a\"", json!({"a": 1}))));
        assert!(may_cache(&doc("\"1-a\"", json!([1, 2, 3]))));
    }

    #[test]
    fn ineligible_without_etag() {
        assert!(!may_cache(&response(None, Body::Json(json!({"a": 1})))));
        assert!(!may_cache(&response(Some(""), Body::Json(json!({"a": 1})))));
    }

    #[test]
    fn ineligible_with_scalar_or_raw_body() {
        assert!(!may_cache(&doc("\"1-a\"", json!("text"))));
        assert!(!may_cache(&doc("\"1-a\"", json!(42))));
        assert!(!may_cache(&response(Some("\"1-a\""), Body::Raw("{}".to_string()))));
    }

    #[test]
    fn ledger_tracks_usage_and_rejects_zero_size() {
        let mut ledger = SizeLedger::new();
        assert_eq!(ledger.max(), DEFAULT_MAX_SIZE);
        assert!(matches!(ledger.set_max(0), Err(Error::Validation(_))));
        ledger.set_max(2048).unwrap();
        assert_eq!(ledger.max(), 2048);

        ledger.add(100);
        ledger.add(50);
        ledger.sub(30);
        assert_eq!(ledger.usage(), 120);
        ledger.sub(500);
        assert_eq!(ledger.usage(), 0);
    }
}
