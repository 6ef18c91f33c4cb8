//! Recursive audio filters: the anti-alias low-pass ahead of the final
//! decimation, and the broadcast de-emphasis filter.

use std::f64::consts::PI;

use crate::dsp::RealBlock;

/// Second-order IIR section, transposed direct form II.
#[derive(Clone, Copy, Debug, Default)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    /// Low-pass section with the given resonance, normalized cutoff in
    /// (0, 0.5).
    fn lowpass(cutoff: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);

        let b0 = (1.0 - cos) * 0.5;
        let b1 = 1.0 - cos;
        let b2 = (1.0 - cos) * 0.5;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos;
        let a2 = 1.0 - alpha;

        let norm = 1.0 / a0;
        Self {
            b0: b0 * norm,
            b1: b1 * norm,
            b2: b2 * norm,
            a1: a1 * norm,
            a2: a2 * norm,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, x: f64) -> f64 {
        let y = x * self.b0 + self.z1;
        self.z1 = x * self.b1 + self.z2 - self.a1 * y;
        self.z2 = x * self.b2 - self.a2 * y;
        y
    }
}

/// 4th-order Butterworth low-pass as a cascade of two biquads.
///
/// Stable for any cutoff below 0.45 of the sample rate; used as the audio
/// anti-alias filter ahead of the PCM-rate decimator.
pub struct LowPassFilterRealIir {
    stages: [Biquad; 2],
}

impl LowPassFilterRealIir {
    /// Create a low-pass filter with `cutoff` in Hz at `sample_rate` Hz.
    pub fn new(cutoff: f64, sample_rate: f64) -> Self {
        let fc = cutoff / sample_rate;
        assert!(fc > 0.0 && fc < 0.45, "cutoff out of range: {}", fc);

        // Butterworth pole pairs of a 4th-order filter.
        let q1 = 1.0 / (2.0 * (PI / 8.0).cos());
        let q2 = 1.0 / (2.0 * (3.0 * PI / 8.0).cos());
        Self {
            stages: [Biquad::lowpass(fc, q1), Biquad::lowpass(fc, q2)],
        }
    }
}

impl RealBlock for LowPassFilterRealIir {
    fn process(&mut self, data: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(data.len());
        for &x in data {
            let mut y = x as f64;
            y = self.stages[0].process(y);
            y = self.stages[1].process(y);
            out.push(y as f32);
        }
        out
    }
}

/// Single-pole de-emphasis filter.
///
/// Inverts the transmitter's pre-emphasis: a first-order low-pass with time
/// constant `tau` (50 us in most of the world, 75 us in the Americas and
/// South Korea). The discrete pole is placed at `exp(-1/(tau*fs))` so the
/// sampled step response matches the continuous `1 - exp(-t/tau)` exactly.
pub struct DeEmphasis {
    a: f64,
    b: f64,
    y1: f64,
}

impl DeEmphasis {
    /// Create a de-emphasis filter for `sample_rate` Hz and time constant
    /// `tau` seconds.
    pub fn new(sample_rate: f64, tau: f64) -> Self {
        let a = (-1.0 / (tau * sample_rate)).exp();
        Self {
            a,
            b: 1.0 - a,
            y1: 0.0,
        }
    }
}

impl RealBlock for DeEmphasis {
    fn process(&mut self, data: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(data.len());
        for &x in data {
            self.y1 = self.b * x as f64 + self.a * self.y1;
            out.push(self.y1 as f32);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lowpass_dc_gain() {
        let mut lp = LowPassFilterRealIir::new(15_000.0, 250_000.0);
        let out = lp.process(&vec![1.0f32; 4000]);
        assert_relative_eq!(out[3999], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_lowpass_cutoff_attenuation() {
        // -3 dB at the cutoff frequency, as for any Butterworth.
        let fs = 250_000.0;
        let fc = 15_000.0;
        let mut lp = LowPassFilterRealIir::new(fc, fs);
        let input: Vec<f32> = (0..100_000)
            .map(|k| (2.0 * PI * fc * k as f64 / fs).sin() as f32)
            .collect();
        let out = lp.process(&input);
        let tail = &out[50_000..];
        let rms = (tail.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>()
            / tail.len() as f64)
            .sqrt();
        // Unit sine has RMS 1/sqrt(2); -3 dB on top of that gives 0.5.
        assert_relative_eq!(rms, 0.5, epsilon = 0.01);
    }

    #[test]
    fn test_lowpass_stopband() {
        let fs = 250_000.0;
        let mut lp = LowPassFilterRealIir::new(15_000.0, fs);
        let input: Vec<f32> = (0..50_000)
            .map(|k| (2.0 * PI * 60_000.0 * k as f64 / fs).sin() as f32)
            .collect();
        let out = lp.process(&input);
        // 4th order: 80 dB/decade; two octaves above cutoff is > 45 dB down.
        for &v in &out[10_000..] {
            assert!(v.abs() < 0.01, "stopband leak {}", v);
        }
    }

    #[test]
    fn test_lowpass_stable_near_upper_limit() {
        let mut lp = LowPassFilterRealIir::new(0.44, 1.0);
        let out = lp.process(&vec![1.0f32; 10_000]);
        assert!(out.iter().all(|v| v.is_finite()));
        assert_relative_eq!(out[9999], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_deemphasis_step_response() {
        let fs = 250_000.0;
        let tau = 50e-6;
        let mut deemph = DeEmphasis::new(fs, tau);
        let out = deemph.process(&vec![1.0f32; 200]);
        // After k samples the step response is 1 - exp(-k/(tau*fs)).
        for (k, &y) in out.iter().enumerate() {
            let expected = 1.0 - (-((k + 1) as f64) / (tau * fs)).exp();
            assert!(
                (y as f64 - expected).abs() < 1e-6,
                "k={} y={} expected={}",
                k,
                y,
                expected
            );
        }
    }

    #[test]
    fn test_deemphasis_attenuates_high_frequencies() {
        let fs = 250_000.0;
        let mut deemph = DeEmphasis::new(fs, 50e-6);
        let input: Vec<f32> = (0..50_000)
            .map(|k| (2.0 * PI * 19_000.0 * k as f64 / fs).sin() as f32)
            .collect();
        let out = deemph.process(&input);
        let tail = &out[25_000..];
        let rms = (tail.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>()
            / tail.len() as f64)
            .sqrt();
        // |H(f)| = 1/sqrt(1 + (2 pi f tau)^2) ~= 0.165 at 19 kHz.
        let expected = (0.5f64).sqrt() / (1.0 + (2.0 * PI * 19_000.0 * 50e-6).powi(2)).sqrt();
        assert_relative_eq!(rms, expected, epsilon = 0.01);
    }

    #[test]
    fn test_deemphasis_state_across_blocks() {
        let input: Vec<f32> = (0..1000)
            .map(|k| (0.02 * k as f64).sin() as f32)
            .collect();
        let mut whole = DeEmphasis::new(48_000.0, 75e-6);
        let mut split = DeEmphasis::new(48_000.0, 75e-6);

        let expected = whole.process(&input);
        let mut got = split.process(&input[..333]);
        got.extend(split.process(&input[333..]));
        assert_eq!(expected, got);
    }
}
