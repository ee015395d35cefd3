//! DSP configuration schema shared by the web API, the config store, and
//! the DSP chain itself.

use serde::{Deserialize, Serialize};

use crate::error::DspError;

/// The ten standard graphic-EQ center frequencies.
pub const GRAPHIC_EQ_BANDS: [f32; 10] = [
    31.0, 62.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

/// Default Q for peaking bands (smooth overlap between adjacent bands).
pub const DEFAULT_BAND_Q: f32 = 1.4;

/// Which EQ engine renders the band curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EqEngineKind {
    /// Cascaded biquads; zero latency, phase distortion.
    Iir,
    /// Overlap-save convolution with a frequency-domain mask.
    Fft,
    /// Direct-form linear-phase filter from the same mask.
    Fir,
}

/// Filter shape of one EQ band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandType {
    Peaking,
    LowShelf,
    HighShelf,
}

/// One parametric EQ band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    pub freq_hz: f32,
    pub gain_db: f32,
    pub q: f32,
    #[serde(rename = "type")]
    pub band_type: BandType,
}

impl EqBand {
    pub fn peaking(freq_hz: f32, gain_db: f32) -> Self {
        Self {
            freq_hz,
            gain_db,
            q: DEFAULT_BAND_Q,
            band_type: BandType::Peaking,
        }
    }
}

/// EQ stage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqConfig {
    pub engine: EqEngineKind,
    pub bands: Vec<EqBand>,
    /// FFT engine block size; power of two.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<usize>,
    /// FIR engine tap count; odd for linear phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taps: Option<usize>,
}

impl EqConfig {
    pub const DEFAULT_BLOCK_SIZE: usize = 2048;
    pub const DEFAULT_TAPS: usize = 1023;

    /// A flat ten-band IIR configuration.
    pub fn flat() -> Self {
        Self {
            engine: EqEngineKind::Iir,
            bands: GRAPHIC_EQ_BANDS
                .iter()
                .map(|&f| EqBand::peaking(f, 0.0))
                .collect(),
            block_size: None,
            taps: None,
        }
    }

    /// True when every band gain is zero.
    pub fn is_flat(&self) -> bool {
        self.bands.iter().all(|b| b.gain_db.abs() < 0.01)
    }

    pub fn block_size(&self) -> usize {
        self.block_size.unwrap_or(Self::DEFAULT_BLOCK_SIZE)
    }

    pub fn taps(&self) -> usize {
        self.taps.unwrap_or(Self::DEFAULT_TAPS)
    }
}

impl Default for EqConfig {
    fn default() -> Self {
        Self::flat()
    }
}

fn default_ratio() -> f32 {
    3.0
}

fn default_attack_ms() -> f32 {
    10.0
}

fn default_release_ms() -> f32 {
    100.0
}

fn default_knee_db() -> f32 {
    6.0
}

fn default_true() -> bool {
    true
}

/// Feed-forward dynamics compressor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub threshold_db: f32,
    #[serde(default = "default_ratio")]
    pub ratio: f32,
    #[serde(default = "default_attack_ms")]
    pub attack_ms: f32,
    #[serde(default = "default_release_ms")]
    pub release_ms: f32,
    #[serde(default)]
    pub makeup_db: f32,
    #[serde(default = "default_knee_db")]
    pub knee_db: f32,
    #[serde(default = "default_true")]
    pub link_stereo: bool,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_db: -12.0,
            ratio: default_ratio(),
            attack_ms: default_attack_ms(),
            release_ms: default_release_ms(),
            makeup_db: 0.0,
            knee_db: default_knee_db(),
            link_stereo: true,
        }
    }
}

/// Mid/side stereo enhancer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mid_gain_db: f32,
    #[serde(default)]
    pub side_gain_db: f32,
    /// Haas delay applied to the side signal, in milliseconds. 0 disables.
    #[serde(default)]
    pub haas_ms: f32,
}

impl Default for StereoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mid_gain_db: 0.0,
            side_gain_db: 2.0,
            haas_ms: 0.0,
        }
    }
}

/// Full per-device DSP configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DspConfig {
    #[serde(default)]
    pub eq: EqConfig,
    #[serde(default)]
    pub compressor: CompressorConfig,
    #[serde(default)]
    pub stereo: StereoConfig,
}

impl DspConfig {
    pub const MAX_BANDS: usize = 32;
    pub const MAX_GAIN_DB: f32 = 24.0;

    /// Validate the whole configuration. Invalid configs are rejected
    /// before they reach a running chain.
    pub fn validate(&self) -> Result<(), DspError> {
        if self.eq.bands.is_empty() {
            return Err(DspError::InvalidConfig("eq has no bands".into()));
        }
        if self.eq.bands.len() > Self::MAX_BANDS {
            return Err(DspError::InvalidConfig(format!(
                "eq has {} bands, maximum is {}",
                self.eq.bands.len(),
                Self::MAX_BANDS
            )));
        }
        for (index, band) in self.eq.bands.iter().enumerate() {
            if !(10.0..=20_000.0).contains(&band.freq_hz) {
                return Err(DspError::InvalidBand {
                    index,
                    reason: format!("frequency {} Hz out of range 10..20000", band.freq_hz),
                });
            }
            if band.gain_db.abs() > Self::MAX_GAIN_DB {
                return Err(DspError::InvalidBand {
                    index,
                    reason: format!("gain {} dB exceeds ±{} dB", band.gain_db, Self::MAX_GAIN_DB),
                });
            }
            if !(band.q > 0.0 && band.q <= 10.0) {
                return Err(DspError::InvalidBand {
                    index,
                    reason: format!("q {} out of range (0, 10]", band.q),
                });
            }
        }
        if let Some(block) = self.eq.block_size {
            if !block.is_power_of_two() || !(256..=16_384).contains(&block) {
                return Err(DspError::InvalidConfig(format!(
                    "fft block size {block} must be a power of two in 256..=16384"
                )));
            }
        }
        if let Some(taps) = self.eq.taps {
            if taps % 2 == 0 || !(63..=8191).contains(&taps) {
                return Err(DspError::InvalidConfig(format!(
                    "fir taps {taps} must be odd and in 63..=8191"
                )));
            }
        }
        let comp = &self.compressor;
        if comp.ratio < 1.0 {
            return Err(DspError::InvalidConfig(format!(
                "compressor ratio {} must be >= 1",
                comp.ratio
            )));
        }
        if comp.attack_ms <= 0.0 || comp.release_ms <= 0.0 {
            return Err(DspError::InvalidConfig(
                "compressor attack/release must be positive".into(),
            ));
        }
        if comp.knee_db < 0.0 {
            return Err(DspError::InvalidConfig("compressor knee must be >= 0".into()));
        }
        if self.stereo.haas_ms < 0.0 || self.stereo.haas_ms > 40.0 {
            return Err(DspError::InvalidConfig(format!(
                "haas delay {} ms out of range 0..=40",
                self.stereo.haas_ms
            )));
        }
        Ok(())
    }
}
