//! EQ/tone stage with three interchangeable engines.

pub mod design;
mod fft;
mod fir;
mod iir;

pub use fft::FftEq;
pub use fir::FirEq;
pub use iir::IirEq;

use airbridge_core::dsp::{EqConfig, EqEngineKind};

use crate::block::AudioBlock;

/// Common capability of the three EQ engines.
pub trait ToneEq: Send {
    /// Process one block in place.
    fn process(&mut self, block: &mut AudioBlock);

    /// Constant latency this engine adds, in frames.
    fn latency_frames(&self) -> usize;

    /// Clear streaming state (on seek / new session).
    fn reset(&mut self);
}

/// The configured engine. Swapping variants is atomic at a block boundary
/// because the chain replaces the whole stage between `process` calls.
pub enum EqStage {
    Iir(IirEq),
    Fft(FftEq),
    Fir(FirEq),
}

impl EqStage {
    /// Build the stage described by `config`.
    pub fn build(config: &EqConfig, sample_rate: f32, channels: usize) -> Self {
        match config.engine {
            EqEngineKind::Iir => Self::Iir(IirEq::new(&config.bands, sample_rate, channels)),
            EqEngineKind::Fft => Self::Fft(FftEq::new(
                &config.bands,
                sample_rate,
                channels,
                config.block_size(),
            )),
            EqEngineKind::Fir => Self::Fir(FirEq::new(
                &config.bands,
                sample_rate,
                channels,
                config.taps(),
            )),
        }
    }

    pub fn kind(&self) -> EqEngineKind {
        match self {
            Self::Iir(_) => EqEngineKind::Iir,
            Self::Fft(_) => EqEngineKind::Fft,
            Self::Fir(_) => EqEngineKind::Fir,
        }
    }
}

impl ToneEq for EqStage {
    fn process(&mut self, block: &mut AudioBlock) {
        match self {
            Self::Iir(eq) => eq.process(block),
            Self::Fft(eq) => eq.process(block),
            Self::Fir(eq) => eq.process(block),
        }
    }

    fn latency_frames(&self) -> usize {
        match self {
            Self::Iir(eq) => eq.latency_frames(),
            Self::Fft(eq) => eq.latency_frames(),
            Self::Fir(eq) => eq.latency_frames(),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Iir(eq) => eq.reset(),
            Self::Fft(eq) => eq.reset(),
            Self::Fir(eq) => eq.reset(),
        }
    }
}
