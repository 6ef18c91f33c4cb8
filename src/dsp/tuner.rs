//! IF fine tuning.
//!
//! The radio front end tunes in coarse steps; the residual offset between
//! the wanted station and the device center frequency is removed here by
//! multiplying the I/Q stream with a complex exponential. The rotation is
//! table-driven: the shift is quantized to whole cycles per `table_size`
//! samples so the table repeats exactly and no phase error accumulates.

use std::f64::consts::PI;

use num_complex::Complex;

use crate::dsp::DspBlock;

/// Stateful complex mixer shifting the spectrum by
/// `-freq_shift / table_size` cycles per sample.
pub struct FineTuner {
    table: Vec<Complex<f32>>,
    index: usize,
}

impl FineTuner {
    /// Create a fine tuner.
    ///
    /// `freq_shift` is the frequency shift in cycles per `table_size`
    /// samples; it may be negative. A shift of zero yields the identity.
    pub fn new(table_size: usize, freq_shift: i32) -> Self {
        assert!(table_size > 0, "table size must be greater than 0");
        let mut table = Vec::with_capacity(table_size);
        for i in 0..table_size {
            let k = (freq_shift as i64 * i as i64).rem_euclid(table_size as i64);
            let phi = -2.0 * PI * k as f64 / table_size as f64;
            table.push(Complex::new(phi.cos() as f32, phi.sin() as f32));
        }
        Self { table, index: 0 }
    }
}

impl DspBlock for FineTuner {
    fn process(&mut self, data: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let mut out = Vec::with_capacity(data.len());
        for &s in data {
            out.push(s * self.table[self.index]);
            self.index += 1;
            if self.index == self.table.len() {
                self.index = 0;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tone(freq_norm: f64, len: usize) -> Vec<Complex<f32>> {
        (0..len)
            .map(|k| {
                let phi = 2.0 * PI * freq_norm * k as f64;
                Complex::new(phi.cos() as f32, phi.sin() as f32)
            })
            .collect()
    }

    #[test]
    fn test_zero_shift_is_identity() {
        let mut tuner = FineTuner::new(64, 0);
        let input = tone(0.05, 200);
        let output = tuner.process(&input);
        for (o, i) in output.iter().zip(&input) {
            assert_relative_eq!(o.re, i.re, epsilon = 1e-6);
            assert_relative_eq!(o.im, i.im, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_magnitude_is_preserved() {
        let mut tuner = FineTuner::new(64, 7);
        let input = tone(0.11, 500);
        let output = tuner.process(&input);
        for (o, i) in output.iter().zip(&input) {
            assert_relative_eq!(o.norm(), i.norm(), epsilon = 1e-5);
        }
    }

    #[test]
    fn test_tone_is_shifted_to_dc() {
        // A tone at 4/64 cycles per sample, shifted down by 4 cycles per
        // 64 samples, becomes a constant phasor.
        let mut tuner = FineTuner::new(64, 4);
        let input = tone(4.0 / 64.0, 256);
        let output = tuner.process(&input);
        for o in &output {
            assert_relative_eq!(o.re, 1.0, epsilon = 1e-5);
            assert_relative_eq!(o.im, 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_state_carries_across_blocks() {
        let mut whole = FineTuner::new(64, 9);
        let mut split = FineTuner::new(64, 9);
        let input = tone(0.03, 300);

        let expected = whole.process(&input);
        let mut got = split.process(&input[..113]);
        got.extend(split.process(&input[113..]));

        assert_eq!(expected.len(), got.len());
        for (a, b) in expected.iter().zip(&got) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_negative_shift() {
        let mut tuner = FineTuner::new(64, -4);
        let input = tone(-4.0 / 64.0, 128);
        let output = tuner.process(&input);
        for o in &output {
            assert_relative_eq!(o.re, 1.0, epsilon = 1e-5);
            assert_relative_eq!(o.im, 0.0, epsilon = 1e-5);
        }
    }
}
