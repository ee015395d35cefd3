//! The per-session playback pipeline.
//!
//! One live pipeline per device:
//!
//! ```text
//! Downloader (ffmpeg copy) → cache file → Decoder (ffmpeg PCM)
//!     → DSP chain → Sink
//! ```
//!
//! The decoder does not start until the cache holds the buffer-gate
//! bytes. The decode → DSP → sink loop runs on a dedicated thread with
//! elevated scheduling priority where the host allows. Tear-down is
//! externally triggerable and bounded: soft-terminate the subprocesses,
//! then kill; the cache file is deleted; the sink stream is closed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use airbridge_core::device::{PcmFormat, SampleFormat};
use airbridge_core::events::StateError;
use airbridge_dsp::DspChain;
use airbridge_media::{CacheFile, Decoder, DecoderSettings, DownloadHandle, DownloadStatus, Downloader};
use airbridge_sink::{PcmChunk, Sink, WriteOutcome};

/// Sink shared between the device task (volume/mute) and the pipeline
/// thread (open/write/close). Locked per call, never across blocking
/// waits.
pub type SharedSink = Arc<Mutex<Box<dyn Sink>>>;

/// DSP chain shared between the device task (config) and the pipeline
/// thread (processing).
pub type SharedDsp = Arc<Mutex<DspChain>>;

/// What the pipeline reports back to its device task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEvent {
    pub session_id: u64,
    pub kind: PipelineEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEventKind {
    /// The sink accepted the first PCM block; TRANSITIONING ends here.
    Started,
    /// Clean end of track.
    Finished,
    /// The session died; the device transitions to STOPPED with this
    /// error code.
    Failed(StateError),
}

/// Pipeline tuning, provided by the device from the bridge config.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub cache_dir: PathBuf,
    pub buffer_gate_bytes: u64,
    pub buffer_gate_timeout: Duration,
    pub frames_per_block: usize,
}

impl PipelineSettings {
    pub fn new(cache_dir: PathBuf, buffer_gate_bytes: u64) -> Self {
        Self {
            cache_dir,
            buffer_gate_bytes,
            buffer_gate_timeout: Duration::from_secs(10),
            frames_per_block: 4096,
        }
    }
}

/// Try to elevate the current thread to real-time priority (Linux only).
#[cfg(target_os = "linux")]
fn set_realtime_priority() {
    unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = 40;
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) == 0 {
            debug!("pipeline thread running with SCHED_FIFO priority");
        } else {
            debug!("no real-time priority (needs CAP_SYS_NICE); continuing best-effort");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn set_realtime_priority() {}

/// A running session pipeline. Owns its downloader, decoder, and cache
/// file through the worker thread; `teardown` is bounded and idempotent.
pub struct SessionPipeline {
    session_id: u64,
    cancel: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

struct Worker {
    session_id: u64,
    url: String,
    seek_position_s: f64,
    format: PcmFormat,
    settings: PipelineSettings,
    sink: SharedSink,
    dsp: SharedDsp,
    cancel: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl SessionPipeline {
    /// Spawn the pipeline for one session. Returns immediately; progress
    /// arrives on `events`.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        session_id: u64,
        device_id: &str,
        url: String,
        seek_position_s: f64,
        format: PcmFormat,
        settings: PipelineSettings,
        sink: SharedSink,
        dsp: SharedDsp,
        events: mpsc::UnboundedSender<PipelineEvent>,
    ) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            session_id,
            url,
            seek_position_s,
            format,
            settings,
            sink,
            dsp,
            cancel: Arc::clone(&cancel),
            paused: Arc::clone(&paused),
            events,
        };
        let device_id = device_id.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("pipeline-{session_id}"))
            .spawn(move || worker.run(&device_id))
            .expect("spawn pipeline thread");
        Self {
            session_id,
            cancel,
            paused,
            worker: Some(handle),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Pause: the sink stops consuming, the downloader continues.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    /// Tear the session down completely: cancel the worker, wait for the
    /// subprocesses to die and the cache file to be deleted. Bounded by
    /// the subprocess terminate timeouts. Errors are swallowed; the
    /// device always advances to its target state.
    pub fn teardown(&mut self) {
        self.cancel.store(true, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(session = self.session_id, "pipeline worker panicked during teardown");
            }
        }
    }
}

impl Drop for SessionPipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Worker {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn emit(&self, kind: PipelineEventKind) {
        let _ = self.events.send(PipelineEvent {
            session_id: self.session_id,
            kind,
        });
    }

    fn run(self, device_id: &str) {
        let cache = CacheFile::new(&self.settings.cache_dir, device_id);
        let outcome = self.run_session(&cache);

        // Tear-down tail: decoder and downloader are stopped inside
        // run_session; delete the cache file, then close the sink
        // stream, so every exit path cleans up in contract order.
        cache.remove();
        {
            let mut sink = self.sink.lock().unwrap();
            sink.close();
        }

        if let Some(kind) = outcome {
            self.emit(kind);
        }
        debug!(session = self.session_id, "pipeline worker exited");
    }

    /// The session body. `None` means cancelled (no event: the device
    /// initiated the tear-down and owns the state transition).
    fn run_session(&self, cache: &CacheFile) -> Option<PipelineEventKind> {
        info!(
            session = self.session_id,
            url = %self.url,
            seek = self.seek_position_s,
            "session starting"
        );

        let mut download =
            match Downloader::start(&self.url, self.seek_position_s, cache.path()) {
                Ok(handle) => handle,
                Err(err) => {
                    warn!(%err, "downloader failed to start");
                    return Some(PipelineEventKind::Failed(StateError::UpstreamFetch));
                }
            };

        // Buffer gate: do not decode until enough of the track landed.
        let cancel = &self.cancel;
        let gate = download.wait_for_bytes(
            self.settings.buffer_gate_bytes,
            self.settings.buffer_gate_timeout,
            &|| cancel.load(Ordering::Acquire),
        );
        if let Err(err) = gate {
            download.stop();
            return match err {
                airbridge_core::error::FetchError::Cancelled => None,
                err => {
                    warn!(%err, "buffer gate failed");
                    Some(PipelineEventKind::Failed(StateError::UpstreamFetch))
                }
            };
        }

        let mut decoder =
            match Decoder::spawn(cache.path(), &DecoderSettings::new(self.format)) {
                Ok(decoder) => decoder,
                Err(err) => {
                    warn!(%err, "decoder failed to start");
                    download.stop();
                    return Some(PipelineEventKind::Failed(StateError::DecoderFailure));
                }
            };

        {
            let mut sink = self.sink.lock().unwrap();
            if let Err(err) = sink.open(self.format) {
                warn!(%err, "sink open failed");
                decoder.stop();
                download.stop();
                return Some(PipelineEventKind::Failed(StateError::SinkFailure));
            }
        }

        set_realtime_priority();
        let outcome = self.pump(&mut decoder, &download);

        decoder.stop();
        download.stop();
        outcome
    }

    /// The decode → DSP → sink loop.
    fn pump(&self, decoder: &mut Decoder, download: &DownloadHandle) -> Option<PipelineEventKind> {
        let bytes_per_frame = self.format.bytes_per_frame();
        let block_bytes = self.settings.frames_per_block * bytes_per_frame;
        let mut buf = vec![0u8; block_bytes];
        let mut started = false;

        loop {
            if self.cancelled() {
                return None;
            }
            while self.paused.load(Ordering::Acquire) {
                if self.cancelled() {
                    return None;
                }
                std::thread::sleep(Duration::from_millis(20));
            }

            // Fill one block. A short read only means the downloader has
            // not written far enough yet; wait and retry until the block
            // is full or the pipe ends.
            let mut filled = 0;
            let mut eof = false;
            while filled < block_bytes && !self.cancelled() {
                match decoder.read(&mut buf[filled..]) {
                    Ok(airbridge_media::ReadOutcome::Data(0)) => {
                        eof = true;
                        break;
                    }
                    Ok(airbridge_media::ReadOutcome::Data(n)) => filled += n,
                    Ok(airbridge_media::ReadOutcome::NotReady) => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(err) => {
                        warn!(%err, "decoder pipe error");
                        return Some(PipelineEventKind::Failed(StateError::DecoderFailure));
                    }
                }
            }

            // Whole frames only; a remainder at EOF is a truncated tail.
            let frames = filled / bytes_per_frame;
            if frames > 0 {
                let outcome = match self.format.sample {
                    SampleFormat::S16Le => self.deliver_s16(&buf[..frames * bytes_per_frame]),
                    SampleFormat::F32Le => self.deliver_f32(&buf[..frames * bytes_per_frame]),
                };
                match outcome {
                    Ok(()) => {
                        if !started {
                            started = true;
                            self.emit(PipelineEventKind::Started);
                        }
                    }
                    Err(kind) => return kind,
                }
            }

            if eof {
                // Pipe EOF: the decoder process is finishing. Give it a
                // bounded moment to be reaped, then classify the exit: a
                // clean exit after a clean download is end-of-track.
                let deadline = std::time::Instant::now() + Duration::from_secs(2);
                let mut code = decoder.exit_code();
                while code.is_none()
                    && std::time::Instant::now() < deadline
                    && !self.cancelled()
                {
                    std::thread::sleep(Duration::from_millis(20));
                    code = decoder.exit_code();
                }
                return match (code, download.status()) {
                    (Some(0), DownloadStatus::Completed) => Some(PipelineEventKind::Finished),
                    (Some(0), DownloadStatus::Running) => {
                        // Decode caught up with a still-running download;
                        // everything decodable was played.
                        debug!("decoder drained a still-growing cache");
                        Some(PipelineEventKind::Finished)
                    }
                    (Some(0), _) => Some(PipelineEventKind::Failed(StateError::UpstreamFetch)),
                    (code, _) => {
                        warn!(?code, "decoder exited abnormally");
                        Some(PipelineEventKind::Failed(StateError::DecoderFailure))
                    }
                };
            }
        }
    }

    fn deliver_s16(&self, bytes: &[u8]) -> Result<(), Option<PipelineEventKind>> {
        let mut samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        {
            let mut dsp = self.dsp.lock().unwrap();
            dsp.process_interleaved_i16(&mut samples);
        }
        self.write_to_sink(|| PcmChunk::S16(&samples))
    }

    fn deliver_f32(&self, bytes: &[u8]) -> Result<(), Option<PipelineEventKind>> {
        let mut samples: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|quad| f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
            .collect();
        {
            let mut dsp = self.dsp.lock().unwrap();
            dsp.process_interleaved_f32(&mut samples);
        }
        self.write_to_sink(|| PcmChunk::F32(&samples))
    }

    /// Write one chunk, honoring backpressure: `Overrun` retries the same
    /// block until accepted or the session is cancelled. No frames are
    /// dropped.
    fn write_to_sink<'a>(
        &self,
        chunk: impl Fn() -> PcmChunk<'a>,
    ) -> Result<(), Option<PipelineEventKind>> {
        loop {
            if self.cancelled() {
                return Err(None);
            }
            let result = {
                let mut sink = self.sink.lock().unwrap();
                sink.write(chunk())
            };
            match result {
                Ok(WriteOutcome::Ok) => return Ok(()),
                Ok(WriteOutcome::Overrun) => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(WriteOutcome::Closed) => {
                    warn!("sink closed mid-session");
                    return Err(Some(PipelineEventKind::Failed(StateError::SinkFailure)));
                }
                Err(err) => {
                    warn!(%err, "sink write error");
                    return Err(Some(PipelineEventKind::Failed(StateError::SinkFailure)));
                }
            }
        }
    }
}
