//! PCM decoder.
//!
//! Spawns ffmpeg to read the session cache file and emit interleaved raw
//! PCM on stdout:
//!
//! ```text
//! ffmpeg -hide_banner -loglevel error [-ss pos] -i <cache>
//!        -vn -acodec pcm_s16le -ar 44100 -ac 2 -f s16le pipe:1
//! ```
//!
//! The pipeline thread reads fixed-size blocks; a short read only means
//! the downloader has not written far enough yet, so the caller decides
//! whether to wait (downloader alive) or treat it as end-of-track.

use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use tracing::{debug, warn};

use airbridge_core::device::PcmFormat;
use airbridge_core::error::DecodeError;

use crate::process::{terminate_child, TERMINATE_TIMEOUT};

/// Decoder spawn parameters.
#[derive(Debug, Clone)]
pub struct DecoderSettings {
    pub format: PcmFormat,
    /// `-ss` start offset inside the input, seconds. The session normally
    /// passes 0 because the cache file already starts at the seek target.
    pub seek_position_s: f64,
}

impl DecoderSettings {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            format,
            seek_position_s: 0.0,
        }
    }
}

/// Result of one decoder read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes read; 0 is end of stream.
    Data(usize),
    /// Nothing available yet; wait and retry.
    NotReady,
}

/// One ffmpeg decode process, exclusively owned by its pipeline thread.
pub struct Decoder {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    format: PcmFormat,
}

impl Decoder {
    /// Spawn the decoder over `input`.
    pub fn spawn(input: &Path, settings: &DecoderSettings) -> Result<Self, DecodeError> {
        let fmt = settings.format;
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        if settings.seek_position_s > 0.0 {
            cmd.args(["-ss", &format!("{:.3}", settings.seek_position_s)]);
        }
        cmd.arg("-i")
            .arg(input)
            .args([
                "-vn",
                "-acodec",
                fmt.sample.ffmpeg_codec(),
                "-ar",
                &fmt.sample_rate.to_string(),
                "-ac",
                &fmt.channels.to_string(),
                "-f",
                fmt.sample.ffmpeg_format(),
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        debug!(input = %input.display(), ?fmt, "starting decoder");
        let mut child = cmd.spawn().map_err(DecodeError::Spawn)?;
        let stdout = child.stdout.take();

        // Non-blocking reads keep the pipeline cancellable: a stalled
        // pipe surfaces as WouldBlock instead of parking the thread.
        #[cfg(unix)]
        if let Some(pipe) = &stdout {
            use std::os::unix::io::AsRawFd;
            let fd = pipe.as_raw_fd();
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                if flags >= 0 {
                    libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                }
            }
        }

        Ok(Self {
            child: Some(child),
            stdout,
            format: fmt,
        })
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// True while the subprocess has not exited.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Exit code once the subprocess has terminated.
    pub fn exit_code(&mut self) -> Option<i32> {
        self.child
            .as_mut()
            .and_then(|c| c.try_wait().ok().flatten())
            .map(|s| s.code().unwrap_or(-1))
    }

    /// One read attempt of up to `buf.len()` PCM bytes.
    ///
    /// `Data(0)` is pipe EOF (the subprocess exited and the stream is
    /// drained); `NotReady` means the decoder has not produced more yet;
    /// the caller waits and retries.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, DecodeError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(ReadOutcome::Data(0));
        };
        match stdout.read(buf) {
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(ReadOutcome::NotReady),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => Ok(ReadOutcome::NotReady),
            Err(err) => Err(DecodeError::Pipe(err)),
        }
    }

    /// Terminate the subprocess (bounded soft wait, then kill).
    pub fn stop(&mut self) {
        self.stdout.take();
        if let Some(mut child) = self.child.take() {
            terminate_child(&mut child, TERMINATE_TIMEOUT);
        }
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        if self.child.is_some() {
            warn!("decoder dropped without stop(); terminating");
            self.stop();
        }
    }
}
