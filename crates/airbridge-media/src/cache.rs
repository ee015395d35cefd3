//! Per-session cache files.
//!
//! Each playback session owns exactly one cache file named
//! `{device_id}_{nonce}.mkv` under the configured cache directory. The
//! downloader creates it, the decoder reads it while it grows, and the
//! session deletes it on tear-down. Drop is a best-effort backstop so a
//! panicking session still cleans up.

use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, warn};

/// Handle to one session's cache file.
#[derive(Debug)]
pub struct CacheFile {
    path: PathBuf,
}

impl CacheFile {
    /// Allocate a fresh cache path for a device session.
    pub fn new(cache_dir: &Path, device_id: &str) -> Self {
        let nonce: u64 = rand::thread_rng().gen();
        let path = cache_dir.join(format!("{device_id}_{nonce:016x}.mkv"));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size in bytes; 0 before the downloader has created it.
    pub fn len(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete the file. Errors are logged and swallowed (tear-down
    /// contract: the session always advances).
    pub fn remove(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "cache file removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), %err, "failed to remove cache file"),
        }
    }
}

impl Drop for CacheFile {
    fn drop(&mut self) {
        self.remove();
    }
}
