//! Subprocess management helpers shared by the downloader and decoder.

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use airbridge_core::error::{ConfigError, Result};

/// Graceful termination window before a subprocess is force-killed.
pub const TERMINATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Ask a child process to exit, wait up to `timeout`, then force-kill.
///
/// On unix the soft signal is SIGTERM so ffmpeg can flush its output;
/// elsewhere we go straight to `kill()`. Errors are logged and swallowed:
/// tear-down must always complete.
pub fn terminate_child(child: &mut Child, timeout: Duration) {
    #[cfg(unix)]
    {
        let pid = child.id() as libc::pid_t;
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(?status, "subprocess exited after SIGTERM");
                    return;
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(25)),
                Err(err) => {
                    warn!(%err, "try_wait failed during teardown");
                    break;
                }
            }
        }
    }
    if let Err(err) = child.kill() {
        debug!(%err, "kill after timeout (process likely already gone)");
    }
    if let Err(err) = child.wait() {
        warn!(%err, "failed to reap subprocess");
    }
}

fn binary_available(name: &str) -> bool {
    Command::new(name)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Verify ffmpeg and ffprobe are runnable. Called once at startup; a
/// missing binary is an irrecoverable configuration error.
pub fn check_ffmpeg() -> Result<()> {
    for name in ["ffmpeg", "ffprobe"] {
        if !binary_available(name) {
            return Err(ConfigError::MissingBinary(name.to_string()).into());
        }
    }
    Ok(())
}
