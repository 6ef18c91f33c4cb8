//! Signal statistics: level metering, the moving average used by the PPM
//! display, and the optional FM-deviation histogram.

use num_complex::Complex;

/// Mean and RMS of a block of real samples.
pub fn mean_rms(samples: &[f32]) -> (f32, f32) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut sum = 0.0f64;
    let mut sumsq = 0.0f64;
    for &v in samples {
        let v = v as f64;
        sum += v;
        sumsq += v * v;
    }
    let n = samples.len() as f64;
    ((sum / n) as f32, (sumsq / n).sqrt() as f32)
}

/// RMS magnitude of a block of complex samples.
pub fn rms_iq(samples: &[Complex<f32>]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sumsq: f64 = samples
        .iter()
        .map(|z| (z.re as f64) * (z.re as f64) + (z.im as f64) * (z.im as f64))
        .sum();
    (sumsq / samples.len() as f64).sqrt() as f32
}

/// Sliding-window mean over the last `size` values fed.
pub struct MovingAverage {
    buf: Vec<f32>,
    pos: usize,
    sum: f64,
}

impl MovingAverage {
    /// Create a moving average over `size` entries, pre-filled with
    /// `initial`.
    pub fn new(size: usize, initial: f32) -> Self {
        assert!(size > 0, "window must be greater than 0");
        Self {
            buf: vec![initial; size],
            pos: 0,
            sum: initial as f64 * size as f64,
        }
    }

    /// Replace the oldest entry with `value`.
    pub fn feed(&mut self, value: f32) {
        self.sum += value as f64 - self.buf[self.pos] as f64;
        self.buf[self.pos] = value;
        self.pos += 1;
        if self.pos == self.buf.len() {
            self.pos = 0;
        }
    }

    pub fn average(&self) -> f32 {
        (self.sum / self.buf.len() as f64) as f32
    }
}

/// Number of 1 kHz bins on each side of the deviation histogram; deviations
/// beyond the last bin are counted in it (clip bucket).
pub const HISTOGRAM_BINS: usize = 151;

/// Per-block histogram of the instantaneous FM deviation, bucketed in
/// 1 kHz bins over -150..+150 kHz.
pub struct DeviationHistogram {
    /// Peak deviation in kHz; discriminator output 1.0 maps to this.
    freq_dev_khz: f64,
    negative: [u64; HISTOGRAM_BINS],
    positive: [u64; HISTOGRAM_BINS],
    magnitude: [u64; HISTOGRAM_BINS],
}

impl DeviationHistogram {
    /// Create a histogram for a discriminator scaled to `freq_dev` Hz peak
    /// deviation.
    pub fn new(freq_dev: f64) -> Self {
        Self {
            freq_dev_khz: freq_dev / 1000.0,
            negative: [0; HISTOGRAM_BINS],
            positive: [0; HISTOGRAM_BINS],
            magnitude: [0; HISTOGRAM_BINS],
        }
    }

    /// Count one block of discriminator output samples.
    pub fn feed(&mut self, samples: &[f32]) {
        for &v in samples {
            let khz = v as f64 * self.freq_dev_khz;
            let bin = (khz.abs().round() as usize).min(HISTOGRAM_BINS - 1);
            if khz < 0.0 {
                self.negative[bin] += 1;
            } else {
                self.positive[bin] += 1;
            }
            self.magnitude[bin] += 1;
        }
    }

    pub fn reset(&mut self) {
        self.negative = [0; HISTOGRAM_BINS];
        self.positive = [0; HISTOGRAM_BINS];
        self.magnitude = [0; HISTOGRAM_BINS];
    }

    /// Counters for negative deviations, bin k covering about -k kHz.
    pub fn negative(&self) -> &[u64; HISTOGRAM_BINS] {
        &self.negative
    }

    /// Counters for positive deviations, bin k covering about +k kHz.
    pub fn positive(&self) -> &[u64; HISTOGRAM_BINS] {
        &self.positive
    }

    /// Counters for the absolute deviation.
    pub fn magnitude(&self) -> &[u64; HISTOGRAM_BINS] {
        &self.magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_rms() {
        let (mean, rms) = mean_rms(&[1.0, -1.0, 1.0, -1.0]);
        assert_relative_eq!(mean, 0.0);
        assert_relative_eq!(rms, 1.0);
        assert_eq!(mean_rms(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_rms_iq() {
        let samples = vec![Complex::new(3.0f32, 4.0); 10];
        assert_relative_eq!(rms_iq(&samples), 5.0);
    }

    #[test]
    fn test_moving_average_window() {
        let mut avg = MovingAverage::new(4, 0.0);
        assert_relative_eq!(avg.average(), 0.0);
        for _ in 0..4 {
            avg.feed(2.0);
        }
        assert_relative_eq!(avg.average(), 2.0);
        // One outlier moves the mean by 1/size of its weight.
        avg.feed(6.0);
        assert_relative_eq!(avg.average(), 3.0);
    }

    #[test]
    fn test_histogram_binning() {
        let mut hist = DeviationHistogram::new(75_000.0);
        // 1.0 -> +75 kHz, -0.5 -> -37.5 -> bin 38, 4.0 -> clipped at 150.
        hist.feed(&[1.0, -0.5, 4.0]);
        assert_eq!(hist.positive()[75], 1);
        assert_eq!(hist.negative()[38], 1);
        assert_eq!(hist.positive()[150], 1);
        assert_eq!(hist.magnitude()[75], 1);
        assert_eq!(hist.magnitude()[38], 1);
        assert_eq!(hist.magnitude()[150], 1);

        hist.reset();
        assert!(hist.magnitude().iter().all(|&c| c == 0));
    }

    #[test]
    fn test_histogram_zero_is_positive_bin() {
        let mut hist = DeviationHistogram::new(75_000.0);
        hist.feed(&[0.0]);
        assert_eq!(hist.positive()[0], 1);
        assert_eq!(hist.negative()[0], 0);
        assert_eq!(hist.magnitude()[0], 1);
    }
}
