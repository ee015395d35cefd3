//! Filter design shared by the three EQ engines.
//!
//! Every engine renders the same band curve. The IIR engine runs the RBJ
//! biquads directly; the FFT and FIR engines evaluate the *same* biquad
//! transfer functions on a frequency grid to build their gain mask, so the
//! engines agree on the target response by construction.

use biquad::{Coefficients, ToHertz, Type};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use airbridge_core::dsp::{BandType, EqBand};

/// Gains below this are treated as identity and skipped.
pub const GAIN_EPSILON_DB: f32 = 0.01;

/// RBJ coefficients for one band, or `None` when the band is identity.
pub fn band_coefficients(band: &EqBand, sample_rate: f32) -> Option<Coefficients<f32>> {
    if band.gain_db.abs() < GAIN_EPSILON_DB {
        return None;
    }
    let filter = match band.band_type {
        BandType::Peaking => Type::PeakingEQ(band.gain_db),
        BandType::LowShelf => Type::LowShelf(band.gain_db),
        BandType::HighShelf => Type::HighShelf(band.gain_db),
    };
    Coefficients::<f32>::from_params(filter, sample_rate.hz(), band.freq_hz.hz(), band.q).ok()
}

/// |H(e^{jω})| of a normalized biquad at `freq_hz`.
pub fn magnitude_at(coeffs: &Coefficients<f32>, freq_hz: f32, sample_rate: f32) -> f32 {
    let w = 2.0 * std::f32::consts::PI * freq_hz / sample_rate;
    let (cos1, sin1) = (w.cos(), w.sin());
    let (cos2, sin2) = ((2.0 * w).cos(), (2.0 * w).sin());

    let num_re = coeffs.b0 + coeffs.b1 * cos1 + coeffs.b2 * cos2;
    let num_im = -(coeffs.b1 * sin1 + coeffs.b2 * sin2);
    let den_re = 1.0 + coeffs.a1 * cos1 + coeffs.a2 * cos2;
    let den_im = -(coeffs.a1 * sin1 + coeffs.a2 * sin2);

    let num = (num_re * num_re + num_im * num_im).sqrt();
    let den = (den_re * den_re + den_im * den_im).sqrt().max(1e-12);
    num / den
}

/// Combined band-curve magnitude at one frequency.
pub fn curve_magnitude(bands: &[EqBand], freq_hz: f32, sample_rate: f32) -> f32 {
    bands
        .iter()
        .filter_map(|b| band_coefficients(b, sample_rate))
        .map(|c| magnitude_at(&c, freq_hz, sample_rate))
        .product()
}

/// Per-bin gain mask over the positive half of an `fft_size`-point grid
/// (`fft_size / 2 + 1` bins, bin k at `k * sample_rate / fft_size` Hz).
pub fn gain_mask(bands: &[EqBand], sample_rate: f32, fft_size: usize) -> Vec<f32> {
    let coeffs: Vec<Coefficients<f32>> = bands
        .iter()
        .filter_map(|b| band_coefficients(b, sample_rate))
        .collect();
    (0..=fft_size / 2)
        .map(|k| {
            let freq = k as f32 * sample_rate / fft_size as f32;
            coeffs
                .iter()
                .map(|c| magnitude_at(c, freq, sample_rate))
                .product()
        })
        .collect()
}

/// Linear-phase FIR taps realizing the band curve, by the window method:
/// sample the mask on a dense grid, inverse-transform the zero-phase
/// spectrum, center, truncate to `taps`, and apply a Hann window.
///
/// `taps` must be odd (validated upstream) so the group delay is the
/// integer `(taps - 1) / 2`.
pub fn design_fir(bands: &[EqBand], sample_rate: f32, taps: usize) -> Vec<f32> {
    debug_assert!(taps % 2 == 1);

    // Dense design grid: comfortably above the tap count so truncation,
    // not grid resolution, limits accuracy.
    let design_size = (taps * 8).next_power_of_two().clamp(4096, 65_536);
    let mask = gain_mask(bands, sample_rate, design_size);

    // Zero-phase spectrum: real, hermitian-symmetric.
    let mut spectrum: Vec<Complex<f32>> = vec![Complex::default(); design_size];
    for (k, &gain) in mask.iter().enumerate() {
        spectrum[k] = Complex::new(gain, 0.0);
        if k > 0 && k < design_size / 2 {
            spectrum[design_size - k] = Complex::new(gain, 0.0);
        }
    }

    let mut planner = FftPlanner::new();
    planner.plan_fft_inverse(design_size).process(&mut spectrum);

    // The zero-phase impulse response is centered at index 0 with negative
    // time wrapped to the end; rotate so the peak sits at (taps-1)/2.
    let half = (taps - 1) / 2;
    let scale = 1.0 / design_size as f32;
    let mut kernel = Vec::with_capacity(taps);
    for i in 0..taps {
        let src = (i + design_size - half) % design_size;
        kernel.push(spectrum[src].re * scale);
    }

    // Hann window to control truncation ripple.
    let denom = (taps - 1) as f32;
    for (i, tap) in kernel.iter_mut().enumerate() {
        let w = 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos();
        *tap *= w;
    }
    kernel
}
