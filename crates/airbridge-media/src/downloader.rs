//! Remux-copy downloader.
//!
//! Spawns ffmpeg in stream-copy mode to pull a remote URL into the session
//! cache file without re-encoding:
//!
//! ```text
//! ffmpeg -y [-ss pos] -i URL -vn -c:a copy -f matroska <cache>.mkv
//! ```
//!
//! The Matroska container accepts any audio codec, so the original
//! bitstream is preserved for the decoder to read while it grows.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use airbridge_core::error::FetchError;

use crate::process::{terminate_child, TERMINATE_TIMEOUT};

/// Terminal state of a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Running,
    Completed,
    Failed { code: i32, stderr: String },
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

struct Shared {
    child: Mutex<Option<Child>>,
    status: Mutex<DownloadStatus>,
}

/// Spawns and owns one ffmpeg copy process per session.
pub struct Downloader;

impl Downloader {
    /// Start downloading `url` into `cache_path`, optionally from a seek
    /// offset. Returns immediately; progress is observed through the
    /// returned handle.
    pub fn start(
        url: &str,
        seek_position_s: f64,
        cache_path: &Path,
    ) -> Result<DownloadHandle, FetchError> {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y").args(["-hide_banner", "-loglevel", "error"]);
        if seek_position_s > 0.0 {
            cmd.args(["-ss", &format!("{seek_position_s:.3}")]);
        }
        cmd.args(["-i", url, "-vn", "-c:a", "copy", "-f", "matroska"])
            .arg(cache_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        info!(url, seek = seek_position_s, cache = %cache_path.display(), "starting download");
        let mut child = cmd.spawn().map_err(FetchError::Spawn)?;
        let stderr = child.stderr.take();

        let shared = Arc::new(Shared {
            child: Mutex::new(Some(child)),
            status: Mutex::new(DownloadStatus::Running),
        });

        let monitor = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("dl-monitor".into())
                .spawn(move || monitor_download(shared, stderr))
                .map_err(FetchError::Spawn)?
        };

        Ok(DownloadHandle {
            shared,
            monitor: Some(monitor),
            cache_path: cache_path.to_path_buf(),
        })
    }
}

fn monitor_download(shared: Arc<Shared>, stderr: Option<std::process::ChildStderr>) {
    // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
    let stderr_thread = stderr.map(|mut pipe| {
        std::thread::spawn(move || {
            use std::io::Read;
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            // Keep only the tail; ffmpeg errors repeat context.
            const TAIL: usize = 512;
            if buf.len() > TAIL {
                buf.split_off(buf.len() - TAIL)
            } else {
                buf
            }
        })
    });

    let status = loop {
        let mut guard = shared.child.lock().unwrap();
        match guard.as_mut() {
            None => break None, // stopped externally
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    guard.take();
                    break Some(status);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(%err, "downloader wait failed");
                    guard.take();
                    break None;
                }
            },
        }
        drop(guard);
        std::thread::sleep(Duration::from_millis(50));
    };

    let stderr_tail = stderr_thread
        .and_then(|t| t.join().ok())
        .unwrap_or_default();

    let mut state = shared.status.lock().unwrap();
    if state.is_terminal() {
        return; // already cancelled
    }
    *state = match status {
        Some(s) if s.success() => {
            debug!("download completed");
            DownloadStatus::Completed
        }
        Some(s) => {
            let code = s.code().unwrap_or(-1);
            warn!(code, stderr = %stderr_tail.trim(), "download failed");
            DownloadStatus::Failed {
                code,
                stderr: stderr_tail.trim().to_string(),
            }
        }
        None => DownloadStatus::Cancelled,
    };
}

/// Owner handle for a running download.
pub struct DownloadHandle {
    shared: Arc<Shared>,
    monitor: Option<std::thread::JoinHandle<()>>,
    cache_path: PathBuf,
}

impl DownloadHandle {
    /// Bytes written to the cache file so far (the buffer-gate counter).
    pub fn bytes_downloaded(&self) -> u64 {
        std::fs::metadata(&self.cache_path)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub fn status(&self) -> DownloadStatus {
        self.shared.status.lock().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.status() == DownloadStatus::Running
    }

    /// Block until the cache file holds at least `gate_bytes`, the
    /// download terminates, or the timeout elapses. `cancelled` lets the
    /// session tear-down interrupt the wait.
    pub fn wait_for_bytes(
        &self,
        gate_bytes: u64,
        timeout: Duration,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<(), FetchError> {
        let deadline = Instant::now() + timeout;
        loop {
            if cancelled() {
                return Err(FetchError::Cancelled);
            }
            if self.bytes_downloaded() >= gate_bytes {
                return Ok(());
            }
            match self.status() {
                // A short track can complete below the gate; whatever
                // arrived is everything there is.
                DownloadStatus::Completed => return Ok(()),
                DownloadStatus::Failed { code, stderr } => {
                    return Err(FetchError::Exited { code, stderr })
                }
                DownloadStatus::Cancelled => return Err(FetchError::Cancelled),
                DownloadStatus::Running => {}
            }
            if Instant::now() >= deadline {
                return Err(FetchError::BufferGateTimeout(timeout.as_secs()));
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Stop the download: terminate the subprocess (bounded) and join the
    /// monitor. Idempotent; errors are swallowed per the tear-down
    /// contract.
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.status.lock().unwrap();
            if !state.is_terminal() {
                *state = DownloadStatus::Cancelled;
            }
        }
        if let Some(mut child) = self.shared.child.lock().unwrap().take() {
            terminate_child(&mut child, TERMINATE_TIMEOUT);
        }
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}

impl Drop for DownloadHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
