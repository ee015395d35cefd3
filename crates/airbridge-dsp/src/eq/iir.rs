//! IIR EQ engine: cascaded biquad sections per band.
//!
//! Zero added latency; minimum-phase, so it introduces phase distortion.
//! CPU cost scales linearly with the number of active bands.

use biquad::{Biquad, Coefficients, DirectForm2Transposed};

use airbridge_core::dsp::EqBand;

use crate::block::AudioBlock;
use crate::eq::design::band_coefficients;
use crate::eq::ToneEq;

struct Section {
    coeffs: Coefficients<f32>,
    filters: Vec<DirectForm2Transposed<f32>>,
}

/// Cascade of per-band biquads with per-channel filter state.
pub struct IirEq {
    sections: Vec<Section>,
    channels: usize,
}

impl IirEq {
    pub fn new(bands: &[EqBand], sample_rate: f32, channels: usize) -> Self {
        let sections = bands
            .iter()
            .filter_map(|band| band_coefficients(band, sample_rate))
            .map(|coeffs| Section {
                coeffs,
                filters: (0..channels)
                    .map(|_| DirectForm2Transposed::<f32>::new(coeffs))
                    .collect(),
            })
            .collect();
        Self { sections, channels }
    }

    /// Number of active (non-identity) sections.
    pub fn active_sections(&self) -> usize {
        self.sections.len()
    }
}

impl ToneEq for IirEq {
    fn process(&mut self, block: &mut AudioBlock) {
        let channels = block.channel_count().min(self.channels);
        for section in &mut self.sections {
            for ch in 0..channels {
                let filter = &mut section.filters[ch];
                for sample in block.channel_mut(ch) {
                    *sample = filter.run(*sample);
                }
            }
        }
    }

    fn latency_frames(&self) -> usize {
        0
    }

    fn reset(&mut self) {
        for section in &mut self.sections {
            for filter in &mut section.filters {
                *filter = DirectForm2Transposed::<f32>::new(section.coeffs);
            }
        }
    }
}
