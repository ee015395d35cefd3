//! Local speaker sink.
//!
//! Opens a cpal output stream on a dedicated audio thread (the stream
//! handle is not `Send`) and feeds it through a bounded channel. A full
//! channel surfaces as `Overrun`, which stalls the decoder loop. Volume
//! and mute are software gain applied in the audio callback.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use airbridge_core::device::{PcmFormat, SampleFormat};
use airbridge_core::error::SinkError;

use crate::traits::{PcmChunk, Sink, WriteOutcome};

/// Blocks of audio queued towards the callback; at 4096-frame blocks this
/// is roughly three quarters of a second of headroom.
const QUEUE_BLOCKS: usize = 8;

/// Bound on stream construction.
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Gain control shared with the audio callback.
struct GainControl {
    /// f32 bits; AtomicU32 because there is no AtomicF32.
    gain_bits: AtomicU32,
    muted: AtomicBool,
}

impl GainControl {
    fn new() -> Self {
        Self {
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
        }
    }

    fn set_volume(&self, volume: u8) {
        let gain = (volume.min(100) as f32 / 100.0).powi(2); // perceptual taper
        self.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    fn effective_gain(&self) -> f32 {
        if self.muted.load(Ordering::Relaxed) {
            0.0
        } else {
            f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
        }
    }
}

enum AudioThreadMsg {
    Stop,
}

pub struct LocalSink {
    samples_tx: Option<Sender<Vec<f32>>>,
    control_tx: Option<Sender<AudioThreadMsg>>,
    thread: Option<std::thread::JoinHandle<()>>,
    gain: Arc<GainControl>,
}

impl LocalSink {
    pub fn new() -> Self {
        Self {
            samples_tx: None,
            control_tx: None,
            thread: None,
            gain: Arc::new(GainControl::new()),
        }
    }

    /// Whether the host has any output device at all (device-manager
    /// gate for creating the local-speaker virtual device).
    pub fn host_has_output() -> bool {
        cpal::default_host().default_output_device().is_some()
    }
}

impl Default for LocalSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs on the audio thread: owns the cpal stream for the whole session.
fn audio_thread_main(
    format: PcmFormat,
    samples_rx: Receiver<Vec<f32>>,
    control_rx: Receiver<AudioThreadMsg>,
    gain: Arc<GainControl>,
    ready_tx: Sender<Result<(), SinkError>>,
) {
    let device = match cpal::default_host().default_output_device() {
        Some(device) => device,
        None => {
            let _ = ready_tx.send(Err(SinkError::NoOutputDevice));
            return;
        }
    };

    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    // Carry-over for partially consumed blocks between callbacks.
    let mut leftover: Vec<f32> = Vec::new();
    let callback_gain = Arc::clone(&gain);
    let stream = device.build_output_stream(
        &config,
        move |out: &mut [f32], _| {
            let gain = callback_gain.effective_gain();
            let mut filled = 0;
            while filled < out.len() {
                if leftover.is_empty() {
                    match samples_rx.try_recv() {
                        Ok(block) => leftover = block,
                        // Underrun: pad with silence rather than stall
                        // the audio callback.
                        Err(_) => break,
                    }
                }
                let take = leftover.len().min(out.len() - filled);
                for (dst, src) in out[filled..filled + take].iter_mut().zip(leftover.drain(..take))
                {
                    *dst = src * gain;
                }
                filled += take;
            }
            out[filled..].iter_mut().for_each(|s| *s = 0.0);
        },
        |err| warn!(%err, "local output stream error"),
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(SinkError::Backend(err.to_string())));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = ready_tx.send(Err(SinkError::Backend(err.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Keep the stream alive until the sink closes.
    let _ = control_rx.recv();
    drop(stream);
    debug!("local audio thread exited");
}

impl Sink for LocalSink {
    fn preferred_format(&self) -> SampleFormat {
        SampleFormat::F32Le
    }

    fn open(&mut self, format: PcmFormat) -> Result<(), SinkError> {
        if format.sample != SampleFormat::F32Le {
            return Err(SinkError::UnsupportedFormat(
                "local sink takes F32LE input".into(),
            ));
        }
        self.close();

        let (samples_tx, samples_rx) = bounded(QUEUE_BLOCKS);
        let (control_tx, control_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded(1);
        let gain = Arc::clone(&self.gain);

        info!(rate = format.sample_rate, channels = format.channels, "opening local output");
        let thread = std::thread::Builder::new()
            .name("local-audio".into())
            .spawn(move || audio_thread_main(format, samples_rx, control_rx, gain, ready_tx))
            .map_err(|e| SinkError::Backend(e.to_string()))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                self.samples_tx = Some(samples_tx);
                self.control_tx = Some(control_tx);
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = control_tx.send(AudioThreadMsg::Stop);
                Err(SinkError::OpenTimeout(OPEN_TIMEOUT))
            }
        }
    }

    fn write(&mut self, chunk: PcmChunk<'_>) -> Result<WriteOutcome, SinkError> {
        let PcmChunk::F32(samples) = chunk else {
            return Err(SinkError::UnsupportedFormat(
                "local sink takes F32LE input".into(),
            ));
        };
        let Some(tx) = self.samples_tx.as_ref() else {
            return Ok(WriteOutcome::Closed);
        };
        match tx.try_send(samples.to_vec()) {
            Ok(()) => Ok(WriteOutcome::Ok),
            Err(TrySendError::Full(_)) => Ok(WriteOutcome::Overrun),
            Err(TrySendError::Disconnected(_)) => Ok(WriteOutcome::Closed),
        }
    }

    fn close(&mut self) {
        self.samples_tx.take();
        if let Some(control) = self.control_tx.take() {
            let _ = control.send(AudioThreadMsg::Stop);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn set_volume(&mut self, volume: u8) -> Result<(), SinkError> {
        self.gain.set_volume(volume);
        Ok(())
    }

    fn set_mute(&mut self, muted: bool) -> Result<(), SinkError> {
        self.gain.muted.store(muted, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for LocalSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod gain {
        use super::*;

        #[test]
        fn volume_taper_is_monotone() {
            let gain = GainControl::new();
            let mut last = -1.0;
            for v in [0u8, 10, 25, 50, 75, 100] {
                gain.set_volume(v);
                let g = gain.effective_gain();
                assert!(g > last, "gain {g} at volume {v}");
                last = g;
            }
            assert_eq!(last, 1.0);
        }

        #[test]
        fn mute_silences_regardless_of_volume() {
            let gain = GainControl::new();
            gain.set_volume(80);
            gain.muted.store(true, Ordering::Relaxed);
            assert_eq!(gain.effective_gain(), 0.0);
            gain.muted.store(false, Ordering::Relaxed);
            assert!(gain.effective_gain() > 0.0);
        }
    }

    mod contract {
        use super::*;

        #[test]
        fn write_before_open_is_closed() {
            let mut sink = LocalSink::new();
            assert_eq!(
                sink.write(PcmChunk::F32(&[0.0; 64])).unwrap(),
                WriteOutcome::Closed
            );
        }

        #[test]
        fn s16_input_is_rejected() {
            let mut sink = LocalSink::new();
            assert!(sink.write(PcmChunk::S16(&[0; 64])).is_err());
        }

        #[test]
        fn close_without_open_is_a_no_op() {
            let mut sink = LocalSink::new();
            sink.close();
            sink.close();
        }

        #[test]
        fn volume_and_mute_work_unopened() {
            let mut sink = LocalSink::new();
            sink.set_volume(40).unwrap();
            sink.set_mute(true).unwrap();
            sink.set_mute(false).unwrap();
        }
    }
}
