//! Feed-forward dynamic range compressor.
//!
//! Per-sample envelope follower with separate attack/release time
//! constants, a soft-knee gain computer in dB, makeup gain, and a smooth
//! limiter at ±1. The envelope runs per channel or linked across the
//! stereo pair per configuration.

use airbridge_core::dsp::CompressorConfig;

use crate::block::AudioBlock;

const ENVELOPE_FLOOR: f32 = 1e-6;

/// Where the output limiter starts bending.
const CLIP_KNEE: f32 = 0.95;

fn time_coefficient(ms: f32, sample_rate: f32) -> f32 {
    // One-pole smoothing: coefficient per sample for a time constant in ms.
    (-1.0 / (sample_rate * ms / 1000.0)).exp()
}

/// Smooth limiter: identity below `CLIP_KNEE`, tanh-shaped above, never
/// exceeding ±1.
fn soft_clip(x: f32) -> f32 {
    let magnitude = x.abs();
    if magnitude <= CLIP_KNEE {
        x
    } else {
        let over = (magnitude - CLIP_KNEE) / (1.0 - CLIP_KNEE);
        x.signum() * (CLIP_KNEE + (1.0 - CLIP_KNEE) * over.tanh())
    }
}

/// The compressor stage.
pub struct Compressor {
    config: CompressorConfig,
    attack: f32,
    release: f32,
    makeup: f32,
    /// Envelope state, one slot per channel (slot 0 when linked).
    envelope: Vec<f32>,
}

impl Compressor {
    pub fn new(config: CompressorConfig, sample_rate: f32, channels: usize) -> Self {
        let attack = time_coefficient(config.attack_ms, sample_rate);
        let release = time_coefficient(config.release_ms, sample_rate);
        let makeup = 10f32.powf(config.makeup_db / 20.0);
        Self {
            config,
            attack,
            release,
            makeup,
            envelope: vec![0.0; channels.max(1)],
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Gain (dB, <= 0) for a detector level in dB, with soft knee.
    fn gain_reduction_db(&self, level_db: f32) -> f32 {
        let over = level_db - self.config.threshold_db;
        let knee = self.config.knee_db;
        let slope = 1.0 / self.config.ratio - 1.0;
        if 2.0 * over <= -knee {
            0.0
        } else if knee > 0.0 && 2.0 * over.abs() <= knee {
            slope * (over + knee / 2.0).powi(2) / (2.0 * knee)
        } else {
            slope * over
        }
    }

    fn track_envelope(&mut self, slot: usize, level: f32) -> f32 {
        let env = &mut self.envelope[slot];
        let coeff = if level > *env { self.attack } else { self.release };
        *env = coeff * *env + (1.0 - coeff) * level;
        *env
    }

    pub fn process(&mut self, block: &mut AudioBlock) {
        if !self.config.enabled {
            return;
        }
        let channels = block.channel_count();
        let frames = block.frames();

        if self.config.link_stereo && channels >= 2 {
            for n in 0..frames {
                let peak = (0..channels)
                    .map(|ch| block.channel(ch)[n].abs())
                    .fold(0.0f32, f32::max);
                let env = self.track_envelope(0, peak);
                let level_db = 20.0 * env.max(ENVELOPE_FLOOR).log10();
                let gain = 10f32.powf(self.gain_reduction_db(level_db) / 20.0) * self.makeup;
                for ch in 0..channels {
                    let sample = &mut block.channel_mut(ch)[n];
                    *sample = soft_clip(*sample * gain);
                }
            }
        } else {
            for ch in 0..channels {
                for n in 0..frames {
                    let level = block.channel(ch)[n].abs();
                    let env = self.track_envelope(ch.min(self.envelope.len() - 1), level);
                    let level_db = 20.0 * env.max(ENVELOPE_FLOOR).log10();
                    let gain = 10f32.powf(self.gain_reduction_db(level_db) / 20.0) * self.makeup;
                    let sample = &mut block.channel_mut(ch)[n];
                    *sample = soft_clip(*sample * gain);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.envelope.iter_mut().for_each(|e| *e = 0.0);
    }
}
