//! Stereo enhancer: mid/side processing with an optional Haas delay.
//!
//! Mid = (L + R) / 2 carries center content, side = (L - R) / 2 carries
//! width. Gains on each adjust the image; a short delay on the side
//! signal (Haas effect) widens it further. Mono input passes through
//! unchanged.

use std::collections::VecDeque;

use airbridge_core::dsp::StereoConfig;

use crate::block::AudioBlock;

/// The stereo stage.
pub struct StereoEnhancer {
    config: StereoConfig,
    mid_gain: f32,
    side_gain: f32,
    /// Delay line for the side signal; empty when haas_ms is 0.
    haas_line: VecDeque<f32>,
    haas_samples: usize,
}

impl StereoEnhancer {
    pub fn new(config: StereoConfig, sample_rate: f32) -> Self {
        let mid_gain = 10f32.powf(config.mid_gain_db / 20.0);
        let side_gain = 10f32.powf(config.side_gain_db / 20.0);
        let haas_samples = (config.haas_ms / 1000.0 * sample_rate).round() as usize;
        Self {
            config,
            mid_gain,
            side_gain,
            haas_line: std::iter::repeat(0.0).take(haas_samples).collect(),
            haas_samples,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn process(&mut self, block: &mut AudioBlock) {
        if !self.config.enabled || block.channel_count() != 2 {
            return;
        }
        let frames = block.frames();
        let [left, right] = &mut block.channels_mut()[..2] else {
            return;
        };
        for n in 0..frames {
            let mid = (left[n] + right[n]) / 2.0 * self.mid_gain;
            let mut side = (left[n] - right[n]) / 2.0 * self.side_gain;

            if self.haas_samples > 0 {
                self.haas_line.push_back(side);
                side = self.haas_line.pop_front().unwrap_or(0.0);
            }

            left[n] = (mid + side).clamp(-1.0, 1.0);
            right[n] = (mid - side).clamp(-1.0, 1.0);
        }
    }

    pub fn reset(&mut self) {
        self.haas_line = std::iter::repeat(0.0).take(self.haas_samples).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(side_gain_db: f32) -> StereoConfig {
        StereoConfig {
            enabled: true,
            mid_gain_db: 0.0,
            side_gain_db,
            haas_ms: 0.0,
        }
    }

    fn stereo_block(left: f32, right: f32, frames: usize) -> AudioBlock {
        let mut block = AudioBlock::zeroed(2, frames);
        block.channel_mut(0).iter_mut().for_each(|s| *s = left);
        block.channel_mut(1).iter_mut().for_each(|s| *s = right);
        block
    }

    mod mid_side {
        use super::*;

        #[test]
        fn unity_gains_are_identity() {
            let mut enhancer = StereoEnhancer::new(config(0.0), 44_100.0);
            let mut block = stereo_block(0.5, -0.3, 64);
            let original = block.clone();
            enhancer.process(&mut block);
            for ch in 0..2 {
                for (a, b) in block.channel(ch).iter().zip(original.channel(ch)) {
                    assert!((a - b).abs() < 1e-6);
                }
            }
        }

        #[test]
        fn zero_side_gain_collapses_to_mono() {
            let mut enhancer = StereoEnhancer::new(
                StereoConfig {
                    enabled: true,
                    mid_gain_db: 0.0,
                    side_gain_db: -120.0,
                    haas_ms: 0.0,
                },
                44_100.0,
            );
            let mut block = stereo_block(0.5, -0.3, 64);
            enhancer.process(&mut block);
            for n in 0..64 {
                assert!((block.channel(0)[n] - block.channel(1)[n]).abs() < 1e-4);
                assert!((block.channel(0)[n] - 0.1).abs() < 1e-4); // the mid
            }
        }

        #[test]
        fn boosted_side_widens_the_image() {
            let mut enhancer = StereoEnhancer::new(config(6.0), 44_100.0);
            let mut block = stereo_block(0.5, 0.1, 64);
            enhancer.process(&mut block);
            // side was 0.2; doubled (≈6 dB) side gives l ≈ 0.7, r ≈ -0.1.
            assert!((block.channel(0)[0] - 0.699).abs() < 0.01);
            assert!((block.channel(1)[0] + 0.099).abs() < 0.01);
        }

        #[test]
        fn disabled_stage_is_identity() {
            let mut cfg = config(6.0);
            cfg.enabled = false;
            let mut enhancer = StereoEnhancer::new(cfg, 44_100.0);
            let mut block = stereo_block(0.5, 0.1, 16);
            let original = block.clone();
            enhancer.process(&mut block);
            assert_eq!(block, original);
        }

        #[test]
        fn mono_input_passes_through() {
            let mut enhancer = StereoEnhancer::new(config(6.0), 44_100.0);
            let mut block = AudioBlock::zeroed(1, 16);
            block.channel_mut(0).iter_mut().for_each(|s| *s = 0.4);
            let original = block.clone();
            enhancer.process(&mut block);
            assert_eq!(block, original);
        }
    }

    mod haas {
        use super::*;

        #[test]
        fn side_signal_is_delayed_by_the_configured_time() {
            let mut enhancer = StereoEnhancer::new(
                StereoConfig {
                    enabled: true,
                    mid_gain_db: 0.0,
                    side_gain_db: 0.0,
                    haas_ms: 1.0, // 44 samples at 44.1 kHz
                },
                44_100.0,
            );
            // Pure side impulse: L = +1, R = -1 on the first frame.
            let mut block = AudioBlock::zeroed(2, 256);
            block.channel_mut(0)[0] = 1.0;
            block.channel_mut(1)[0] = -1.0;
            enhancer.process(&mut block);

            let delay = 44;
            assert!(block.channel(0)[0].abs() < 1e-6);
            assert!((block.channel(0)[delay] - 1.0).abs() < 1e-6);
            assert!((block.channel(1)[delay] + 1.0).abs() < 1e-6);
        }
    }
}
