//! Shared helpers for the device integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use airbridge_core::bus::{EventBus, Subscription};
use airbridge_core::device::{DeviceId, DeviceKind, PcmFormat, SampleFormat, TransportState};
use airbridge_core::events::{Event, EventPayload, EventType, StateError};
use airbridge_core::error::SinkError;
use airbridge_device::{DeviceHandle, DeviceSpec, PipelineSettings, VirtualDevice};
use airbridge_sink::{PcmChunk, Sink, WriteOutcome};

/// A sink that records every call and accepts everything.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub frames_written: Arc<Mutex<usize>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn count_of(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

impl Sink for RecordingSink {
    fn preferred_format(&self) -> SampleFormat {
        SampleFormat::S16Le
    }

    fn open(&mut self, _format: PcmFormat) -> Result<(), SinkError> {
        self.record("open");
        Ok(())
    }

    fn write(&mut self, chunk: PcmChunk<'_>) -> Result<WriteOutcome, SinkError> {
        *self.frames_written.lock().unwrap() += chunk.frames(2);
        // Mild pacing so in-flight sessions stay observable from tests.
        std::thread::sleep(Duration::from_millis(5));
        Ok(WriteOutcome::Ok)
    }

    fn close(&mut self) {
        self.record("close");
    }

    fn set_volume(&mut self, volume: u8) -> Result<(), SinkError> {
        self.record(format!("volume:{volume}"));
        Ok(())
    }

    fn set_mute(&mut self, muted: bool) -> Result<(), SinkError> {
        self.record(format!("mute:{muted}"));
        Ok(())
    }
}

/// Test device wiring: bus + device + state-event subscription.
pub struct TestDevice {
    pub bus: Arc<EventBus>,
    pub id: DeviceId,
    pub handle: DeviceHandle,
    pub sink: RecordingSink,
    pub states: Subscription,
    pub cache_dir: PathBuf,
    _tempdir: tempfile::TempDir,
}

pub fn spawn_device() -> TestDevice {
    let tempdir = tempfile::tempdir().unwrap();
    let cache_dir = tempdir.path().to_path_buf();
    let bus = EventBus::new();
    let id = DeviceId::from("dev-a");
    let sink = RecordingSink::new();

    let states = bus.subscribe(
        &[
            EventType::StateChanged,
            EventType::VolumeChanged,
            EventType::DspChanged,
        ],
        Some(id.clone()),
    );

    let spec = DeviceSpec {
        id: id.clone(),
        name: "Kitchen [D]".into(),
        kind: DeviceKind::AirPlay,
        sample_rate: 44_100,
        channels: 2,
        pipeline: PipelineSettings {
            cache_dir: cache_dir.clone(),
            buffer_gate_bytes: 1024,
            buffer_gate_timeout: Duration::from_secs(5),
            frames_per_block: 1024,
        },
    };
    let handle = VirtualDevice::spawn(spec, Arc::clone(&bus), Box::new(sink.clone()));

    TestDevice {
        bus,
        id,
        handle,
        sink,
        states,
        cache_dir,
        _tempdir: tempdir,
    }
}

impl TestDevice {
    pub fn publish(&self, payload: EventPayload) {
        self.bus.publish(Event::new(self.id.clone(), payload));
    }

    /// Next state-topic event, bounded.
    pub async fn next_event(&mut self) -> EventPayload {
        tokio::time::timeout(Duration::from_secs(10), self.states.recv())
            .await
            .expect("timed out waiting for event")
            .expect("bus closed")
            .payload
    }

    /// Wait for the next StateChanged, skipping other state topics.
    pub async fn next_transport_state(&mut self) -> (TransportState, String, u64, f64, Option<StateError>) {
        loop {
            if let EventPayload::StateChanged {
                state,
                uri,
                session_id,
                elapsed_s,
                error,
            } = self.next_event().await
            {
                return (state, uri, session_id, elapsed_s, error);
            }
        }
    }

    pub fn cache_files(&self) -> Vec<PathBuf> {
        cache_files_in(&self.cache_dir)
    }
}

/// List cached session files in `dir`. Usable after a `TestDevice`'s
/// `handle` has been moved out by `shutdown`, when only `cache_dir` is
/// still available.
pub fn cache_files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().map(|x| x == "mkv").unwrap_or(false))
                .collect()
        })
        .unwrap_or_default()
}

/// Write a playable WAV file (s16le stereo 44.1 kHz sine) for ffmpeg to
/// remux and decode.
pub fn write_test_wav(path: &Path, seconds: f64) {
    let sample_rate = 44_100u32;
    let channels = 2u16;
    let frames = (seconds * sample_rate as f64) as u32;
    let data_len = frames * channels as u32 * 2;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
    bytes.extend_from_slice(&(channels * 2).to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for n in 0..frames {
        let s = (0.2 * (2.0 * std::f64::consts::PI * 440.0 * n as f64 / sample_rate as f64).sin()
            * 32767.0) as i16;
        bytes.extend_from_slice(&s.to_le_bytes());
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    std::fs::write(path, bytes).unwrap();
}

/// True when ffmpeg/ffprobe are runnable; media-driven tests skip
/// themselves otherwise.
pub fn ffmpeg_available() -> bool {
    airbridge_media::check_ffmpeg().is_ok()
}
