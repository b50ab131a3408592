//! Directory-backed cache store that survives restarts.
//!
//! Each entry is one file, `<sha256 of url>.sofa`, holding the JSON-serialized
//! `NormalizedResponse`. Usage is the sum of the on-disk sizes of those files:
//! it is seeded by scanning the directory at construction and then adjusted
//! by the measured size of every file written or deleted through this
//! instance. Other processes sharing the directory are not accounted for.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

use crate::cache::{cache_key, may_cache, require_url, CacheStore, SetOutcome, SizeLedger};
use crate::error::{Error, Result};
use crate::response::NormalizedResponse;

/// File extension of managed cache files.
pub const FILE_EXTENSION: &str = "sofa";

/// Cache store keeping one file per entry in a directory.
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    ledger: SizeLedger,
}

impl FileCache {
    /// Open a cache over an existing, readable and writable directory.
    ///
    /// Write access is checked by creating and dropping a scratch file.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        let metadata = fs::metadata(&dir).map_err(|_| {
            Error::validation(format!("{} is not a directory", dir.display()))
        })?;
        if !metadata.is_dir() {
            return Err(Error::validation(format!("{} is not a directory", dir.display())));
        }
        NamedTempFile::new_in(&dir).map_err(|_| {
            Error::validation(format!(
                "insufficient privileges on cache directory {}",
                dir.display()
            ))
        })?;

        let mut cache = Self {
            dir,
            ledger: SizeLedger::new(),
        };
        let files = cache.managed_files().map_err(|_| {
            Error::validation(format!(
                "insufficient privileges on cache directory {}",
                cache.dir.display()
            ))
        })?;
        for file in files {
            let size = fs::metadata(&file).map_err(|e| Error::cache(&file, e))?.len();
            cache.ledger.add(size);
        }
        debug!(dir = %cache.dir.display(), usage = cache.ledger.usage(), "file cache opened");

        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `url`.
    pub fn file_path(&self, url: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", cache_key(url), FILE_EXTENSION))
    }

    fn managed_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(FILE_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn read_entry(&self, path: &Path) -> Result<Option<NormalizedResponse>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::cache(path, e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring undecodable cache file");
                Ok(None)
            }
        }
    }

    /// Delete a managed file and release its size from the ledger.
    fn remove_file(&mut self, path: &Path) -> Result<bool> {
        let size = match fs::metadata(path) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::cache(path, e)),
        };
        fs::remove_file(path).map_err(|e| Error::cache(path, e))?;
        self.ledger.sub(size);
        Ok(true)
    }
}

impl CacheStore for FileCache {
    fn get(&self, url: &str) -> Result<Option<NormalizedResponse>> {
        self.read_entry(&self.file_path(url))
    }

    fn set(&mut self, url: &str, item: &NormalizedResponse) -> Result<SetOutcome> {
        require_url(url)?;
        if !may_cache(item) {
            return Ok(SetOutcome::Rejected);
        }

        let serialized = serde_json::to_vec(item)
            .map_err(|e| Error::validation(format!("response cannot be serialized: {e}")))?;
        let target = self.file_path(url);

        let previous = if target.is_file() {
            let previous = self.read_entry(&target)?;
            self.remove_file(&target)?;
            previous
        } else {
            None
        };

        fs::write(&target, &serialized).map_err(|e| Error::cache(&target, e))?;
        let written = fs::metadata(&target)
            .map_err(|e| Error::cache(&target, e))?
            .len();
        self.ledger.add(written);
        trace!(url, bytes = written, "file cache store");

        Ok(match previous {
            Some(previous) => SetOutcome::Replaced(previous),
            None => SetOutcome::Stored,
        })
    }

    fn remove(&mut self, url: &str) -> Result<bool> {
        let path = self.file_path(url);
        self.remove_file(&path)
    }

    fn clear(&mut self) -> Result<bool> {
        let files = self
            .managed_files()
            .map_err(|e| Error::cache(&self.dir, e))?;

        let mut all_removed = true;
        for file in files {
            if let Err(e) = self.remove_file(&file) {
                warn!(error = %e, "failed to remove cache file");
                all_removed = false;
            }
        }
        Ok(all_removed)
    }

    fn set_size(&mut self, bytes: u64) -> Result<()> {
        self.ledger.set_max(bytes)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.ledger.max())
    }

    fn usage(&self) -> Result<u64> {
        Ok(self.ledger.usage())
    }
}
