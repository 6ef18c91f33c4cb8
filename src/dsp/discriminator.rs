//! FM phase discriminator.
//!
//! Recovers the instantaneous frequency of the baseband signal from the
//! phase difference between consecutive samples,
//! `arg(z[k] * conj(z[k-1]))`, scaled so that the nominal peak deviation
//! maps to an output of 1.0.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};
use std::f64::consts::PI as PI64;

use num_complex::Complex;

/// FM demodulator producing the multiplex (MPX) signal.
pub struct PhaseDiscriminator {
    /// Previous input sample; starts at 1+0j.
    last: Complex<f32>,
    /// 1 / (2 pi * normalized peak deviation).
    gain: f32,
    precise: bool,
}

impl PhaseDiscriminator {
    /// Create a phase discriminator.
    ///
    /// * `freq_dev_norm` - peak frequency deviation relative to the sample
    ///   rate; a tone deviating by exactly this much demodulates to +/-1.
    /// * `precise` - use exact `atan2` instead of the polynomial
    ///   approximation (max error below 0.005 rad).
    pub fn new(freq_dev_norm: f64, precise: bool) -> Self {
        assert!(freq_dev_norm > 0.0, "deviation must be greater than 0");
        Self {
            last: Complex::new(1.0, 0.0),
            gain: (1.0 / (2.0 * PI64 * freq_dev_norm)) as f32,
            precise,
        }
    }

    /// Demodulate a block of complex samples.
    ///
    /// Output length equals input length. A zero-magnitude input sample
    /// (where the argument is undefined) demodulates to 0.
    pub fn process(&mut self, data: &[Complex<f32>]) -> Vec<f32> {
        let mut out = Vec::with_capacity(data.len());
        for &z in data {
            let d = z * self.last.conj();
            let phi = if self.precise {
                d.im.atan2(d.re)
            } else {
                fast_atan2(d.im, d.re)
            };
            out.push(if phi.is_finite() { phi * self.gain } else { 0.0 });
            self.last = z;
        }
        out
    }
}

/// Four-quadrant arctangent via an octant-folded polynomial.
///
/// Max error about 0.004 rad, a fraction of the quantization noise of the
/// subsequent audio path. Returns 0 at the origin.
fn fast_atan2(y: f32, x: f32) -> f32 {
    if y == 0.0 && x == 0.0 {
        return 0.0;
    }
    let ax = x.abs();
    let ay = y.abs();
    // Fold into the first octant so the polynomial argument stays in [0, 1].
    let (z, swapped) = if ay > ax { (ax / ay, true) } else { (ay / ax, false) };
    let mut a = z * (FRAC_PI_4 + 0.273 * (1.0 - z));
    if swapped {
        a = FRAC_PI_2 - a;
    }
    if x < 0.0 {
        a = PI - a;
    }
    if y < 0.0 {
        -a
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tone(freq_norm: f64, len: usize) -> Vec<Complex<f32>> {
        (0..len)
            .map(|k| {
                let phi = 2.0 * PI64 * freq_norm * k as f64;
                Complex::new(phi.cos() as f32, phi.sin() as f32)
            })
            .collect()
    }

    #[test]
    fn test_fast_atan2_accuracy() {
        for i in 0..1000 {
            let phi = -PI64 + (i as f64 + 0.5) * 2.0 * PI64 / 1000.0;
            let (y, x) = (phi.sin() as f32, phi.cos() as f32);
            let got = fast_atan2(y, x);
            let exact = y.atan2(x);
            assert!(
                (got - exact).abs() < 0.005,
                "phi={} got={} exact={}",
                phi,
                got,
                exact
            );
        }
        assert_eq!(fast_atan2(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_constant_tone_demodulates_to_frequency_ratio() {
        // A tone at frequency f demodulates to f_hz / f_dev. The polynomial
        // atan2 carries a small constant bias at a fixed phase step, so the
        // fast path gets a wider tolerance.
        let fs = 250_000.0;
        let f_dev = 75_000.0;
        let f = 10_000.0;
        for (precise, tolerance) in [(true, 1e-3), (false, 3e-3)] {
            let mut disc = PhaseDiscriminator::new(f_dev / fs, precise);
            let out = disc.process(&tone(f / fs, 1000));
            // Average over whole periods, skipping the start-up sample.
            let period = (fs / f) as usize;
            let n = (out.len() - 1) / period * period;
            let mean: f64 = out[1..1 + n].iter().map(|&v| v as f64).sum::<f64>() / n as f64;
            assert_relative_eq!(mean, (f / f_dev) as f64, epsilon = tolerance);
        }
    }

    #[test]
    fn test_peak_deviation_maps_to_unity() {
        let mut disc = PhaseDiscriminator::new(0.1, true);
        let out = disc.process(&tone(0.1, 100));
        for &v in &out[1..] {
            assert_relative_eq!(v, 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_silence_demodulates_to_zero() {
        let mut disc = PhaseDiscriminator::new(0.075, false);
        let out = disc.process(&vec![Complex::new(0.0, 0.0); 16]);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_first_sample_uses_unit_reference() {
        // First input equal to the implicit 1+0j reference gives zero output.
        let mut disc = PhaseDiscriminator::new(0.075, true);
        let out = disc.process(&[Complex::new(1.0, 0.0)]);
        assert_eq!(out, vec![0.0]);
    }

    #[test]
    fn test_state_carries_across_blocks() {
        let input = tone(0.04, 400);
        let mut whole = PhaseDiscriminator::new(0.075, false);
        let mut split = PhaseDiscriminator::new(0.075, false);

        let expected = whole.process(&input);
        let mut got = split.process(&input[..151]);
        got.extend(split.process(&input[151..]));

        assert_eq!(expected, got);
    }
}
