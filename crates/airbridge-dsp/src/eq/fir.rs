//! FIR EQ engine: direct-form linear-phase filter.
//!
//! Highest quality of the three engines (no phase distortion, response
//! limited only by tap count) and the highest CPU cost. Latency is the
//! group delay `(taps - 1) / 2`.

use airbridge_core::dsp::EqBand;

use crate::block::AudioBlock;
use crate::eq::design::design_fir;
use crate::eq::ToneEq;

/// Direct convolution with per-channel input history.
pub struct FirEq {
    taps: Vec<f32>,
    /// Last `taps - 1` input samples per channel.
    history: Vec<Vec<f32>>,
}

impl FirEq {
    pub fn new(bands: &[EqBand], sample_rate: f32, channels: usize, taps: usize) -> Self {
        let taps = design_fir(bands, sample_rate, taps);
        let history = vec![vec![0.0; taps.len() - 1]; channels];
        Self { taps, history }
    }

    pub fn tap_count(&self) -> usize {
        self.taps.len()
    }

    fn convolve_channel(&mut self, ch: usize, samples: &mut [f32]) {
        let taps = &self.taps;
        let order = taps.len() - 1;
        let history = &mut self.history[ch];

        // Extended input: history ++ samples, so x[n - k] is always
        // addressable without branching.
        let mut extended = Vec::with_capacity(order + samples.len());
        extended.extend_from_slice(history);
        extended.extend_from_slice(samples);

        for (n, out) in samples.iter_mut().enumerate() {
            let window = &extended[n..n + taps.len()];
            let mut acc = 0.0f32;
            for (k, &tap) in taps.iter().enumerate() {
                acc += tap * window[taps.len() - 1 - k];
            }
            *out = acc;
        }

        history.copy_from_slice(&extended[extended.len() - order..]);
    }
}

impl ToneEq for FirEq {
    fn process(&mut self, block: &mut AudioBlock) {
        let channels = block.channel_count().min(self.history.len());
        for ch in 0..channels {
            self.convolve_channel(ch, block.channel_mut(ch));
        }
    }

    fn latency_frames(&self) -> usize {
        (self.taps.len() - 1) / 2
    }

    fn reset(&mut self) {
        for history in &mut self.history {
            history.iter_mut().for_each(|s| *s = 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eq::tests::{measure_gain_db, sine_block};
    use airbridge_core::dsp::{BandType, EqBand};

    fn boost_1k() -> Vec<EqBand> {
        vec![EqBand {
            freq_hz: 1000.0,
            gain_db: 6.0,
            q: 1.0,
            band_type: BandType::Peaking,
        }]
    }

    mod latency {
        use super::*;

        #[test]
        fn flat_curve_is_a_pure_delay() {
            let mut eq = FirEq::new(&[EqBand::peaking(1000.0, 0.0)], 44_100.0, 1, 255);
            let delay = eq.latency_frames();
            assert_eq!(delay, 127);

            let mut block = AudioBlock::zeroed(1, 1024);
            block.channel_mut(0)[0] = 1.0;
            eq.process(&mut block);

            let out = block.channel(0);
            assert!((out[delay] - 1.0).abs() < 1e-3);
            for (i, &s) in out.iter().enumerate() {
                if i != delay {
                    assert!(s.abs() < 1e-2, "leakage {s} at {i}");
                }
            }
        }

        #[test]
        fn state_carries_across_block_boundaries() {
            // One big block and two half blocks must produce identical
            // output.
            let mut one = FirEq::new(&boost_1k(), 44_100.0, 1, 255);
            let mut two = FirEq::new(&boost_1k(), 44_100.0, 1, 255);

            let full = sine_block(1000.0, 44_100.0, 1, 2048);
            let mut a = full.clone();
            one.process(&mut a);

            let mut first = AudioBlock::zeroed(1, 1024);
            first
                .channel_mut(0)
                .copy_from_slice(&full.channel(0)[..1024]);
            let mut second = AudioBlock::zeroed(1, 1024);
            second
                .channel_mut(0)
                .copy_from_slice(&full.channel(0)[1024..]);
            two.process(&mut first);
            two.process(&mut second);

            for i in 0..1024 {
                assert!((a.channel(0)[i] - first.channel(0)[i]).abs() < 1e-5);
                assert!((a.channel(0)[1024 + i] - second.channel(0)[i]).abs() < 1e-5);
            }
        }
    }

    mod response {
        use super::*;

        #[test]
        fn boosts_the_band_center_by_its_gain() {
            let mut eq = FirEq::new(&boost_1k(), 44_100.0, 1, 511);
            let latency = eq.latency_frames();
            let gain = measure_gain_db(|b| eq.process(b), 1000.0, 44_100.0, latency);
            assert!((gain - 6.0).abs() < 0.5, "measured {gain} dB");
        }

        #[test]
        fn flat_curve_leaves_amplitude_within_a_tenth_db() {
            let mut eq = FirEq::new(&[EqBand::peaking(1000.0, 0.0)], 44_100.0, 1, 255);
            let latency = eq.latency_frames();
            let gain = measure_gain_db(|b| eq.process(b), 440.0, 44_100.0, latency);
            assert!(gain.abs() < 0.1, "measured {gain} dB");
        }
    }
}
