//! The DSP chain: EQ/tone → compressor → stereo enhancer.
//!
//! Owned by a device and shared with its pipeline thread. Configuration
//! changes rebuild only the stages whose section actually changed, and
//! only between blocks, so an engine switch is atomic at a block boundary
//! and coefficients are never rebuilt per block.

use tracing::debug;

use airbridge_core::dsp::DspConfig;
use airbridge_core::error::DspError;

use crate::block::AudioBlock;
use crate::compressor::Compressor;
use crate::eq::{EqStage, ToneEq};
use crate::stereo::StereoEnhancer;

pub struct DspChain {
    sample_rate: f32,
    channels: usize,
    enabled: bool,
    config: DspConfig,
    eq: EqStage,
    compressor: Compressor,
    stereo: StereoEnhancer,
    /// Scratch for the integer entry point.
    int_scratch: Vec<i16>,
}

impl DspChain {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let config = DspConfig::default();
        let sample_rate = sample_rate as f32;
        let channels = channels as usize;
        Self {
            sample_rate,
            channels,
            enabled: false,
            eq: EqStage::build(&config.eq, sample_rate, channels),
            compressor: Compressor::new(config.compressor.clone(), sample_rate, channels),
            stereo: StereoEnhancer::new(config.stereo.clone(), sample_rate),
            config,
            int_scratch: Vec::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn config(&self) -> &DspConfig {
        &self.config
    }

    /// Validate and apply a new configuration. Stages are rebuilt only
    /// when their section changed; an invalid config leaves the chain
    /// untouched.
    pub fn apply_config(&mut self, config: &DspConfig) -> Result<(), DspError> {
        config.validate()?;

        if config.eq != self.config.eq {
            debug!(engine = ?config.eq.engine, bands = config.eq.bands.len(), "rebuilding eq stage");
            self.eq = EqStage::build(&config.eq, self.sample_rate, self.channels);
        }
        if config.compressor != self.config.compressor {
            self.compressor =
                Compressor::new(config.compressor.clone(), self.sample_rate, self.channels);
        }
        if config.stereo != self.config.stereo {
            self.stereo = StereoEnhancer::new(config.stereo.clone(), self.sample_rate);
        }
        self.config = config.clone();
        Ok(())
    }

    /// Reset to the default configuration, disabled.
    pub fn reset_to_defaults(&mut self) {
        self.enabled = false;
        let defaults = DspConfig::default();
        // Defaults always validate.
        let _ = self.apply_config(&defaults);
    }

    /// Total constant latency of the active chain, in frames.
    pub fn latency_frames(&self) -> usize {
        if self.enabled {
            self.eq.latency_frames()
        } else {
            0
        }
    }

    /// Clear all streaming state (new session or seek).
    pub fn reset_state(&mut self) {
        self.eq.reset();
        self.compressor.reset();
        self.stereo.reset();
    }

    /// Process one float block in place.
    pub fn process(&mut self, block: &mut AudioBlock) {
        if !self.enabled {
            return;
        }
        // The IIR engine at a flat curve is a true identity, skip it; the
        // mask engines keep running so their latency stays constant.
        let skip_eq = matches!(self.eq, EqStage::Iir(_)) && self.config.eq.is_flat();
        if !skip_eq {
            self.eq.process(block);
        }
        self.compressor.process(block);
        self.stereo.process(block);
    }

    /// Process interleaved 16-bit PCM in place (AirPlay path).
    pub fn process_interleaved_i16(&mut self, data: &mut [i16]) {
        if !self.enabled {
            return;
        }
        let mut block = AudioBlock::from_interleaved_i16(data, self.channels);
        self.process(&mut block);
        block.write_interleaved_i16(&mut self.int_scratch);
        data.copy_from_slice(&self.int_scratch);
    }

    /// Process interleaved float PCM in place (local speaker path).
    pub fn process_interleaved_f32(&mut self, data: &mut [f32]) {
        if !self.enabled {
            return;
        }
        let mut block = AudioBlock::from_interleaved_f32(data, self.channels);
        self.process(&mut block);
        let mut out = Vec::new();
        block.write_interleaved_f32(&mut out);
        data.copy_from_slice(&out);
    }
}
