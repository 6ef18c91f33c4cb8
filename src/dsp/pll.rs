//! Stereo pilot phase-locked loop.
//!
//! Tracks the 19 kHz pilot tone embedded in the FM multiplex, derives the
//! phase-coherent 38 kHz reference needed to demodulate the stereo
//! difference channel, reports whether a pilot is present, and emits one
//! timing marker per second aligned to the pilot's zero crossings
//! (pulse-per-second events).
//!
//! The loop is a classic second-order PLL: a product phase detector, a
//! proportional-integral filter, and a phase accumulator clamped to a
//! narrow range around the nominal pilot frequency.

use std::f64::consts::PI;

/// Pulse-per-second event, addressed by pilot-cycle count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpsEvent {
    /// Ordinal of the second since stream start (first event is 1).
    pub pps_index: u64,
    /// Index of the baseband sample at which the second completed.
    pub sample_index: u64,
    /// Fractional position of the pilot zero crossing within the processed
    /// block, in [0, 1).
    pub block_position: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Unlocked,
    Locking,
    Locked,
}

/// Single boxcar average over a fixed window.
struct Boxcar {
    buf: Vec<f64>,
    pos: usize,
    sum: f64,
}

impl Boxcar {
    fn new(window: usize) -> Self {
        Self {
            buf: vec![0.0; window],
            pos: 0,
            sum: 0.0,
        }
    }

    #[inline]
    fn feed(&mut self, x: f64) -> f64 {
        self.sum += x - self.buf[self.pos];
        self.buf[self.pos] = x;
        self.pos += 1;
        if self.pos == self.buf.len() {
            self.pos = 0;
        }
        self.sum / self.buf.len() as f64
    }
}

/// Two cascaded boxcar averages; the first stage nulls the double-frequency
/// product of the phase detector, the second smooths the remainder.
struct TwoStageAverage {
    a: Boxcar,
    b: Boxcar,
}

impl TwoStageAverage {
    fn new(window: usize) -> Self {
        Self {
            a: Boxcar::new(window),
            b: Boxcar::new(window),
        }
    }

    #[inline]
    fn feed(&mut self, x: f64) -> f64 {
        let y = self.a.feed(x);
        self.b.feed(y)
    }
}

/// 19 kHz pilot PLL with stereo detection and PPS extraction.
pub struct PilotPhaseLock {
    sample_rate: f64,

    /// Loop phase in (-pi, pi], radians.
    phase: f64,
    /// Loop frequency, radians per sample.
    freq: f64,
    nominal_freq: f64,
    min_freq: f64,
    max_freq: f64,
    /// Proportional and integral loop gains.
    kp: f64,
    ki: f64,

    /// Pilot amplitude estimator (in-phase and quadrature products).
    level_i: TwoStageAverage,
    level_q: TwoStageAverage,
    min_signal: f64,
    /// Minimum estimator magnitude seen in the last block.
    block_level: f64,

    state: LockState,
    lock_count: usize,
    lock_delay: usize,

    /// Signed quadrature-error accumulator over the current lock-in
    /// window. A persistent one-sided error means the loop is riding a
    /// frequency offset rather than locked.
    error_accum: f64,

    /// Monotonic sample counter, never reset at block boundaries.
    sample_count: u64,
    /// Pilot cycles since the last completed second.
    period_count: u32,
    periods_per_second: u32,
    pps_index: u64,
    events: Vec<PpsEvent>,
}

impl PilotPhaseLock {
    /// Create a pilot PLL.
    ///
    /// * `sample_rate` - baseband sample rate in Hz
    /// * `pilot_freq` - nominal pilot frequency in Hz (19000 for broadcast FM)
    /// * `bandwidth` - closed-loop bandwidth in Hz (about 100 for a pilot
    ///   that must be tracked but not modulated)
    /// * `min_signal` - minimum estimator level accepted as a pilot
    pub fn new(sample_rate: f64, pilot_freq: f64, bandwidth: f64, min_signal: f64) -> Self {
        assert!(sample_rate > 2.0 * pilot_freq, "pilot above Nyquist");

        let nominal_freq = 2.0 * PI * pilot_freq / sample_rate;

        // Critically damped PI gains for the requested noise bandwidth.
        let b = bandwidth / sample_rate;
        let damping = std::f64::consts::FRAC_1_SQRT_2;
        let denom = 1.0 + 2.0 * damping * b + b * b;
        let kp = 4.0 * damping * b / denom;
        let ki = 4.0 * b * b / denom;

        let window = (sample_rate / pilot_freq).ceil() as usize;

        Self {
            sample_rate,
            phase: 0.0,
            freq: nominal_freq,
            nominal_freq,
            min_freq: nominal_freq * 0.99,
            max_freq: nominal_freq * 1.01,
            kp,
            ki,
            level_i: TwoStageAverage::new(window),
            level_q: TwoStageAverage::new(window),
            min_signal,
            block_level: 0.0,
            state: LockState::Unlocked,
            lock_count: 0,
            lock_delay: (0.5 * sample_rate) as usize,
            error_accum: 0.0,
            sample_count: 0,
            period_count: 0,
            periods_per_second: pilot_freq.round() as u32,
            pps_index: 0,
            events: Vec::new(),
        }
    }

    /// Track the pilot through one block of multiplex samples.
    ///
    /// Returns the demodulated 38 kHz subcarrier reference (peak-to-peak 2)
    /// and the lock state, one sample each per input sample. The per-sample
    /// lock state lets consumers switch between stereo and mono at the
    /// exact sample where lock changes, so the output does not depend on
    /// where block boundaries fall.
    pub fn process(&mut self, data: &[f32]) -> (Vec<f32>, Vec<bool>) {
        self.events.clear();
        let mut block_min = f64::MAX;
        let n = data.len();

        let mut out = Vec::with_capacity(n);
        let mut locked_mask = Vec::with_capacity(n);
        for (i, &sample) in data.iter().enumerate() {
            let x = sample as f64;
            let (s, c) = self.phase.sin_cos();

            // Product phase detector: in lock the quadrature product has no
            // DC component.
            let err = -s * x;

            // Subcarrier reference at twice the pilot phase, cos(2 phi).
            out.push((2.0 * c * c - 1.0) as f32);

            // Pilot amplitude estimate from the averaged phasor products.
            let level_i = self.level_i.feed(c * x);
            let level_q = self.level_q.feed(err);
            let level = (level_i * level_i + level_q * level_q).sqrt();
            if level < block_min {
                block_min = level;
            }

            // PI loop filter with the frequency clamped to the lock range.
            self.freq = (self.freq + self.ki * err).clamp(self.min_freq, self.max_freq);
            let in_range = self.freq > self.min_freq && self.freq < self.max_freq;

            let prev_phase = self.phase;
            self.phase += self.freq + self.kp * err;
            if self.phase > PI {
                self.phase -= 2.0 * PI;
            }

            self.update_lock_state(level, level_q, in_range);
            locked_mask.push(self.state == LockState::Locked);

            // One pilot cycle completes at each upward zero crossing of the
            // loop phase; a second completes every `pilot_freq` cycles.
            if prev_phase < 0.0 && self.phase >= 0.0 {
                self.period_count += 1;
                if self.period_count >= self.periods_per_second {
                    self.period_count = 0;
                    self.pps_index += 1;
                    if self.state == LockState::Locked {
                        let frac = -prev_phase / (self.phase - prev_phase);
                        let position = ((i as f64 + frac) / n as f64).clamp(0.0, 1.0 - 1e-9);
                        self.events.push(PpsEvent {
                            pps_index: self.pps_index,
                            sample_index: self.sample_count,
                            block_position: position,
                        });
                    }
                }
            }

            self.sample_count += 1;
        }

        if n > 0 {
            self.block_level = block_min;
        }
        (out, locked_mask)
    }

    fn update_lock_state(&mut self, level: f64, quadrature: f64, in_range: bool) {
        match self.state {
            LockState::Unlocked => {
                if level > self.min_signal {
                    self.state = LockState::Locking;
                    self.lock_count = 0;
                    self.error_accum = 0.0;
                }
            }
            LockState::Locking => {
                if level <= 0.5 * self.min_signal {
                    self.state = LockState::Unlocked;
                } else if level > self.min_signal && in_range {
                    self.lock_count += 1;
                    self.error_accum += quadrature;
                    if self.lock_count >= self.lock_delay {
                        // Frequency lock requires the quadrature error to
                        // average out over the whole delay; a one-sided sum
                        // means the loop is still slipping cycles.
                        if self.error_accum.abs() < self.min_signal * self.lock_delay as f64 {
                            self.state = LockState::Locked;
                        } else {
                            self.lock_count = 0;
                            self.error_accum = 0.0;
                        }
                    }
                } else {
                    self.lock_count = 0;
                    self.error_accum = 0.0;
                }
            }
            LockState::Locked => {
                if level < 0.5 * self.min_signal || !in_range {
                    self.state = LockState::Unlocked;
                    self.lock_count = 0;
                }
            }
        }
    }

    /// True while the loop tracks a pilot within the lock range.
    pub fn locked(&self) -> bool {
        self.state == LockState::Locked
    }

    /// Pilot level estimate over the last block.
    pub fn pilot_level(&self) -> f64 {
        2.0 * self.block_level
    }

    /// Apparent pilot frequency deviation from nominal, in Hz.
    pub fn freq_offset_hz(&self) -> f64 {
        (self.freq - self.nominal_freq) * self.sample_rate / (2.0 * PI)
    }

    /// PPS events recorded during the last block.
    pub fn pps_events(&self) -> &[PpsEvent] {
        &self.events
    }
}
