//! Channel-selection FIR filter with integer decimation.
//!
//! A linear-phase low-pass filter on complex samples that also downsamples
//! by an integer factor, used to reduce the IF rate to the baseband
//! processing rate. The filter is a Hamming-windowed sinc, normalized to
//! unity gain at DC, with the tap count derived from the cutoff so the
//! transition band stays proportional to the passband.

use std::f64::consts::PI;

use num_complex::Complex;

/// Low-pass FIR filter for complex samples, decimating by a fixed factor.
///
/// The filter history (`taps - 1` samples) is preserved across calls, so
/// block boundaries are invisible in the output: splitting an input stream
/// into blocks of arbitrary size yields bit-identical results.
pub struct LowPassFilterFirIq {
    coeff: Vec<f32>,
    state: Vec<Complex<f32>>,
    decim: usize,
    /// Input samples to skip before the next output is due.
    skip: usize,
}

impl LowPassFilterFirIq {
    /// Create a decimating low-pass filter.
    ///
    /// * `decim` - decimation factor (output rate = input rate / `decim`)
    /// * `cutoff` - cutoff frequency relative to the input sample rate,
    ///   in (0.0, 0.5)
    pub fn new(decim: usize, cutoff: f64) -> Self {
        assert!(decim > 0, "decimation factor must be greater than 0");
        assert!(
            cutoff > 0.0 && cutoff < 0.5,
            "cutoff must be in range (0.0, 0.5)"
        );

        // Tap count scales with the inverse of the cutoff; rounded up to an
        // odd length to keep the filter symmetric around a center tap.
        let mut taps = (4.0 / cutoff).ceil() as usize;
        if taps % 2 == 0 {
            taps += 1;
        }

        let mut coeff = Vec::with_capacity(taps);
        let mid = (taps / 2) as isize;

        // Hamming-windowed sinc
        for n in 0..taps {
            let x = n as isize - mid;
            let sinc = if x == 0 {
                2.0 * cutoff
            } else {
                (2.0 * cutoff * PI * x as f64).sin() / (PI * x as f64)
            };
            let window = 0.54 - 0.46 * ((2.0 * PI * n as f64) / (taps as f64 - 1.0)).cos();
            coeff.push((sinc * window) as f32);
        }

        // Normalize to unity gain at DC
        let norm: f32 = coeff.iter().sum();
        for v in coeff.iter_mut() {
            *v /= norm;
        }

        Self {
            state: vec![Complex::new(0.0, 0.0); taps - 1],
            coeff,
            decim,
            skip: 0,
        }
    }

    /// Number of filter taps.
    pub fn taps(&self) -> usize {
        self.coeff.len()
    }

    /// Filter and decimate a block of samples.
    ///
    /// One output sample is produced for every `decim` input samples,
    /// counted from the start of the stream. Each output is the dot product
    /// of the coefficients with the most recent `taps` input samples; the
    /// first windows are completed with implicit leading zeros.
    pub fn process(&mut self, data: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let taps = self.coeff.len();

        let mut buf = Vec::with_capacity(self.state.len() + data.len());
        buf.extend_from_slice(&self.state);
        buf.extend_from_slice(data);

        let mut out = Vec::with_capacity(data.len() / self.decim + 1);
        let mut pos = self.skip;
        while pos < data.len() {
            // The window for the output at input index `pos` ends at
            // buf[pos + taps - 1], which is the input sample itself.
            let mut acc = Complex::new(0.0, 0.0);
            for (j, &c) in self.coeff.iter().enumerate() {
                acc += buf[pos + taps - 1 - j] * c;
            }
            out.push(acc);
            pos += self.decim;
        }
        self.skip = pos - data.len();

        let keep_from = buf.len() - (taps - 1);
        self.state.clear();
        self.state.extend_from_slice(&buf[keep_from..]);

        out
    }
}
