//! Helpers for synthesizing FM broadcast test signals.
#![allow(dead_code)]

use num_complex::Complex;
use std::f64::consts::PI;

pub const PILOT_FREQ: f64 = 19_000.0;

/// Frequency-modulate a multiplex signal onto a unit carrier at DC.
///
/// `freq_dev` is the frequency in Hz that a multiplex value of 1.0 maps to.
pub fn fm_modulate(mpx: &[f64], sample_rate: f64, freq_dev: f64) -> Vec<Complex<f32>> {
    let mut phase = 0.0f64;
    let mut out = Vec::with_capacity(mpx.len());
    for &m in mpx {
        out.push(Complex::new(phase.cos() as f32, phase.sin() as f32));
        phase = (phase + 2.0 * PI * freq_dev * m / sample_rate).rem_euclid(2.0 * PI);
    }
    out
}

/// Complex exponential at a fixed frequency offset.
pub fn carrier(freq: f64, sample_rate: f64, len: usize) -> Vec<Complex<f32>> {
    (0..len)
        .map(|k| {
            let phi = (2.0 * PI * freq * k as f64 / sample_rate).rem_euclid(2.0 * PI);
            Complex::new(phi.cos() as f32, phi.sin() as f32)
        })
        .collect()
}

/// Build a stereo multiplex from left/right audio signals.
///
/// Layout: (L+R)/2 at baseband, the pilot as a cosine, and (L-R)/2 on a
/// double-frequency cosine subcarrier phase-locked to the pilot.
pub fn stereo_mpx(
    left: &[f64],
    right: &[f64],
    pilot_amplitude: f64,
    sample_rate: f64,
) -> Vec<f64> {
    assert_eq!(left.len(), right.len());
    left.iter()
        .zip(right)
        .enumerate()
        .map(|(k, (&l, &r))| {
            let theta = 2.0 * PI * PILOT_FREQ * k as f64 / sample_rate;
            0.5 * (l + r) + pilot_amplitude * theta.cos() + 0.5 * (l - r) * (2.0 * theta).cos()
        })
        .collect()
}

/// Amplitude of the component at `freq` and the residual power of
/// everything else, estimated over the whole slice.
pub fn tone_and_residual_power(samples: &[f32], freq: f64, sample_rate: f64) -> (f64, f64) {
    let n = samples.len();
    let mut proj_sin = 0.0f64;
    let mut proj_cos = 0.0f64;
    let mut power = 0.0f64;
    for (k, &v) in samples.iter().enumerate() {
        let v = v as f64;
        let phi = 2.0 * PI * freq * k as f64 / sample_rate;
        proj_sin += v * phi.sin();
        proj_cos += v * phi.cos();
        power += v * v;
    }
    let proj_sin = 2.0 * proj_sin / n as f64;
    let proj_cos = 2.0 * proj_cos / n as f64;
    let tone_power = (proj_sin * proj_sin + proj_cos * proj_cos) / 2.0;
    let residual = (power / n as f64 - tone_power).max(0.0);
    (tone_power, residual)
}

/// RMS of a block of samples.
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>() / samples.len() as f64).sqrt()
}
