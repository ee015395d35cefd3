//! # airbridge-dsp
//!
//! The real-time DSP chain interposed between the decoder and the sink.
//!
//! Blocks of float32 samples in [-1, 1] flow through
//! EQ/tone → compressor → stereo enhancer; integer PCM is converted on
//! entry and back on exit. Three EQ engines render the same band curve
//! with different latency/quality trade-offs:
//!
//! - IIR: cascaded biquads, zero latency, phase distortion
//! - FFT: overlap-save convolution with a frequency-domain mask
//! - FIR: direct-form linear-phase filter from the same mask

pub mod block;
pub mod chain;
pub mod compressor;
pub mod eq;
pub mod stereo;

pub use block::AudioBlock;
pub use chain::DspChain;
pub use compressor::Compressor;
pub use eq::{EqStage, ToneEq};
pub use stereo::StereoEnhancer;
