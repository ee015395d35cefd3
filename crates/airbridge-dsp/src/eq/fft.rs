//! FFT EQ engine: streaming overlap-save convolution.
//!
//! The band curve is rendered as a linear-phase kernel of length
//! `fft_size / 2 + 1`; each hop of `fft_size / 2` input samples costs one
//! forward and one inverse transform regardless of band count. Latency is
//! one hop of buffering plus the kernel group delay.

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use airbridge_core::dsp::EqBand;

use crate::block::AudioBlock;
use crate::eq::design::design_fir;
use crate::eq::ToneEq;

struct ChannelState {
    /// Input samples not yet convolved.
    pending: VecDeque<f32>,
    /// Last `kernel_len - 1` input samples (overlap-save history).
    history: Vec<f32>,
    /// Convolved samples ready to emit, primed with one hop of silence.
    ready: VecDeque<f32>,
}

/// Overlap-save convolver with per-channel streaming state.
pub struct FftEq {
    fft_size: usize,
    hop: usize,
    kernel_len: usize,
    kernel_fft: Vec<Complex<f32>>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    states: Vec<ChannelState>,
    scratch: Vec<Complex<f32>>,
}

impl FftEq {
    pub fn new(bands: &[EqBand], sample_rate: f32, channels: usize, fft_size: usize) -> Self {
        debug_assert!(fft_size.is_power_of_two());
        let kernel_len = fft_size / 2 + 1; // odd, so group delay is integral
        let hop = fft_size - kernel_len + 1; // = fft_size / 2

        let kernel = design_fir(bands, sample_rate, kernel_len);

        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let mut kernel_fft: Vec<Complex<f32>> = kernel
            .iter()
            .map(|&t| Complex::new(t, 0.0))
            .chain(std::iter::repeat(Complex::default()))
            .take(fft_size)
            .collect();
        forward.process(&mut kernel_fft);

        let states = (0..channels)
            .map(|_| ChannelState {
                pending: VecDeque::new(),
                history: vec![0.0; kernel_len - 1],
                ready: std::iter::repeat(0.0).take(hop).collect(),
            })
            .collect();

        Self {
            fft_size,
            hop,
            kernel_len,
            kernel_fft,
            forward,
            inverse,
            states,
            scratch: vec![Complex::default(); fft_size],
        }
    }

    fn convolve_hop(&mut self, ch: usize) {
        let Self {
            fft_size,
            hop,
            kernel_len,
            kernel_fft,
            forward,
            inverse,
            states,
            scratch,
        } = self;
        let state = &mut states[ch];

        // Segment = history ++ next hop of pending.
        for (i, &h) in state.history.iter().enumerate() {
            scratch[i] = Complex::new(h, 0.0);
        }
        for i in 0..*hop {
            scratch[*kernel_len - 1 + i] = Complex::new(state.pending[i], 0.0);
        }
        state.pending.drain(..*hop);

        // Save the tail of the segment as the next history window.
        for i in 0..*kernel_len - 1 {
            state.history[i] = scratch[*fft_size - (*kernel_len - 1) + i].re;
        }

        forward.process(scratch);
        for (bin, k) in scratch.iter_mut().zip(kernel_fft.iter()) {
            *bin *= k;
        }
        inverse.process(scratch);

        // Discard the first kernel_len - 1 samples (circular wrap), keep
        // the hop valid samples.
        let scale = 1.0 / *fft_size as f32;
        for i in 0..*hop {
            state
                .ready
                .push_back(scratch[*kernel_len - 1 + i].re * scale);
        }
    }
}

impl ToneEq for FftEq {
    fn process(&mut self, block: &mut AudioBlock) {
        let channels = block.channel_count().min(self.states.len());
        for ch in 0..channels {
            let frames = block.frames();
            self.states[ch].pending.extend(block.channel(ch).iter().copied());
            while self.states[ch].pending.len() >= self.hop {
                self.convolve_hop(ch);
            }
            let state = &mut self.states[ch];
            for sample in block.channel_mut(ch).iter_mut() {
                // The priming hop guarantees availability.
                *sample = state.ready.pop_front().unwrap_or(0.0);
            }
            debug_assert!(frames == block.channel(ch).len());
        }
    }

    fn latency_frames(&self) -> usize {
        self.hop + (self.kernel_len - 1) / 2
    }

    fn reset(&mut self) {
        for state in &mut self.states {
            state.pending.clear();
            state.history.iter_mut().for_each(|s| *s = 0.0);
            state.ready = std::iter::repeat(0.0).take(self.hop).collect();
        }
    }
}
