//! Unbounded in-process cache store.

use std::collections::HashMap;

use tracing::trace;

use crate::cache::{cache_key, may_cache, require_url, CacheStore, SetOutcome};
use crate::error::{Error, Result};
use crate::response::NormalizedResponse;

/// Keeps responses in a hash map for the lifetime of the process.
///
/// Entries are owned copies: mutating the response passed to `set`, or the
/// one returned by `get`, never affects what the store holds. There is no
/// eviction, so size accounting is not supported and those calls fail.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<String, NormalizedResponse>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn unsupported() -> Error {
    Error::validation("cache sizes are not supported by the memory cache; it is unbounded")
}

impl CacheStore for MemoryCache {
    fn get(&self, url: &str) -> Result<Option<NormalizedResponse>> {
        Ok(self.entries.get(&cache_key(url)).cloned())
    }

    fn set(&mut self, url: &str, item: &NormalizedResponse) -> Result<SetOutcome> {
        require_url(url)?;
        if !may_cache(item) {
            return Ok(SetOutcome::Rejected);
        }

        let mut stored = item.clone();
        stored.from_cache = false;
        trace!(url, "memory cache store");

        Ok(match self.entries.insert(cache_key(url), stored) {
            Some(previous) => SetOutcome::Replaced(previous),
            None => SetOutcome::Stored,
        })
    }

    fn remove(&mut self, url: &str) -> Result<bool> {
        Ok(self.entries.remove(&cache_key(url)).is_some())
    }

    fn clear(&mut self) -> Result<bool> {
        self.entries.clear();
        Ok(true)
    }

    fn set_size(&mut self, _bytes: u64) -> Result<()> {
        Err(unsupported())
    }

    fn size(&self) -> Result<u64> {
        Err(unsupported())
    }

    fn usage(&self) -> Result<u64> {
        Err(unsupported())
    }
}
