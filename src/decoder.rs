//! FM decoder: wires the DSP blocks into the complete demodulation chain.
//!
//! Signal flow, all within one thread:
//!
//! ```text
//! IQ -> FineTuner -> LowPassFilterFirIq -> PhaseDiscriminator -> MPX
//!   MPX -> PilotPhaseLock -> 38 kHz reference
//!   MPX + reference -> StereoDecoder -> L/R -> DeEmphasis -> Downsampler
//! ```
//!
//! The decoder owns every block and exposes per-block metrics (levels,
//! tuning offset, stereo state, PPS events) for monitoring; metrics never
//! feed back into the pipeline.

use tracing::{debug, warn};

use crate::dsp::discriminator::PhaseDiscriminator;
use crate::dsp::downsample::Downsampler;
use crate::dsp::fir::LowPassFilterFirIq;
use crate::dsp::iir::{DeEmphasis, LowPassFilterRealIir};
use crate::dsp::pll::{PilotPhaseLock, PpsEvent};
use crate::dsp::tuner::FineTuner;
use crate::dsp::{DspBlock, RealBlock};
use crate::error::{Error, Result};
use crate::stats::{mean_rms, rms_iq, DeviationHistogram};
use crate::{IQSample, Sample};

/// Default de-emphasis time constant in microseconds.
pub const DEFAULT_DEEMPHASIS: f64 = 50.0;
/// Default IF half-bandwidth in Hz (the common 200 kHz channel).
pub const DEFAULT_BANDWIDTH_IF: f64 = 100_000.0;
/// Default peak frequency deviation in Hz.
pub const DEFAULT_FREQ_DEV: f64 = 75_000.0;
/// Default audio low-pass cutoff in Hz.
pub const DEFAULT_BANDWIDTH_PCM: f64 = 15_000.0;
/// Default excess bandwidth fraction above the Nyquist-minimum passband.
pub const DEFAULT_EXCESS_BW: f64 = 0.075;
/// Default stereo subcarrier gain correction.
pub const DEFAULT_STEREO_SCALE: f64 = 1.17;

const PILOT_FREQ: f64 = 19_000.0;
const PILOT_LOOP_BANDWIDTH: f64 = 100.0;
const PILOT_MIN_SIGNAL: f64 = 0.01;
const TUNER_TABLE_SIZE: usize = 64;
/// Largest relative rounding error accepted for the audio decimation ratio.
const AUDIO_DECIM_TOLERANCE: f64 = 0.05;

/// Construction parameters for [`FmDecoder`].
pub struct FmDecoderConfig {
    /// IF sample rate in Hz.
    pub sample_rate_if: f64,
    /// Offset of the wanted station from the device center frequency, Hz.
    pub tuning_offset: f64,
    /// Audio sample rate in Hz.
    pub sample_rate_pcm: f64,
    /// Decode the stereo multiplex (mono fallback stays automatic).
    pub stereo: bool,
    /// De-emphasis time constant in microseconds.
    pub deemphasis: f64,
    /// IF half-bandwidth in Hz.
    pub bandwidth_if: f64,
    /// Peak frequency deviation in Hz.
    pub freq_dev: f64,
    /// Audio low-pass cutoff in Hz.
    pub bandwidth_pcm: f64,
    /// IF decimation factor down to the baseband rate.
    pub downsample: u32,
    /// Excess bandwidth fraction of the IF filter.
    pub excess_bw: f64,
    /// Multiplier on the discriminator output gain.
    pub freqscale: f64,
    /// Gain correction for the stereo difference channel.
    pub stereo_scale: f64,
    /// Collect the FM-deviation histogram.
    pub histogram: bool,
    /// Use exact atan2 in the discriminator.
    pub precise_atan: bool,
}

impl Default for FmDecoderConfig {
    fn default() -> Self {
        Self {
            sample_rate_if: 1_000_000.0,
            tuning_offset: 0.0,
            sample_rate_pcm: 48_000.0,
            stereo: true,
            deemphasis: DEFAULT_DEEMPHASIS,
            bandwidth_if: DEFAULT_BANDWIDTH_IF,
            freq_dev: DEFAULT_FREQ_DEV,
            bandwidth_pcm: DEFAULT_BANDWIDTH_PCM,
            downsample: 1,
            excess_bw: DEFAULT_EXCESS_BW,
            freqscale: 1.0,
            stereo_scale: DEFAULT_STEREO_SCALE,
            histogram: false,
            precise_atan: false,
        }
    }
}

/// Stereo matrix reconstruction from the multiplex and the demodulated
/// 38 kHz subcarrier reference.
pub struct StereoDecoder {
    sum_filter: LowPassFilterRealIir,
    diff_filter: LowPassFilterRealIir,
    scale: f32,
}

impl StereoDecoder {
    /// Create a stereo decoder running at the baseband rate with audio
    /// low-pass filters at `bandwidth` Hz.
    pub fn new(sample_rate: f64, bandwidth: f64, stereo_scale: f64) -> Self {
        Self {
            sum_filter: LowPassFilterRealIir::new(bandwidth, sample_rate),
            diff_filter: LowPassFilterRealIir::new(bandwidth, sample_rate),
            scale: stereo_scale as f32,
        }
    }

    /// Reconstruct left and right channels.
    ///
    /// The multiplex carries (L+R)/2 at baseband and (L-R)/2 on the
    /// subcarrier, so after demodulation the matrix is a plain sum and
    /// difference. `pilot_locked` carries the PLL lock state per sample:
    /// wherever the pilot is not locked both channels carry the sum path
    /// (mono fallback), switching at the exact sample where lock changes so
    /// the output is independent of block boundaries. The difference filter
    /// keeps running throughout so its state is warm when lock returns.
    pub fn process(
        &mut self,
        mpx: &[f32],
        ref38: &[f32],
        pilot_locked: &[bool],
    ) -> (Vec<f32>, Vec<f32>) {
        let sum = self.sum_filter.process(mpx);

        let diff_demod: Vec<f32> = mpx
            .iter()
            .zip(ref38)
            .map(|(&m, &r)| 2.0 * m * r * self.scale)
            .collect();
        let diff = self.diff_filter.process(&diff_demod);

        let mut left = Vec::with_capacity(mpx.len());
        let mut right = Vec::with_capacity(mpx.len());
        for i in 0..mpx.len() {
            if pilot_locked[i] {
                left.push(sum[i] + diff[i]);
                right.push(sum[i] - diff[i]);
            } else {
                left.push(sum[i]);
                right.push(sum[i]);
            }
        }
        (left, right)
    }
}

/// Complete FM broadcast decoder.
pub struct FmDecoder {
    finetuner: FineTuner,
    iffilter: LowPassFilterFirIq,
    discriminator: PhaseDiscriminator,
    pilot_pll: Option<PilotPhaseLock>,
    stereo_decoder: Option<StereoDecoder>,
    audio_filter: LowPassFilterRealIir,
    deemph: [DeEmphasis; 2],
    audio_down: [Downsampler; 2],
    histogram: Option<DeviationHistogram>,

    stereo_enabled: bool,
    freq_dev: f64,
    /// Frequency shift applied by the fine tuner, in Hz.
    tuned_offset: f64,

    if_level: f32,
    baseband_mean: f32,
    baseband_level: f32,
    stereo_detected: bool,
}

impl FmDecoder {
    /// Build the decoder chain, validating the configuration.
    pub fn new(config: &FmDecoderConfig) -> Result<Self> {
        if config.sample_rate_if <= 0.0 {
            return Err(Error::config("IF sample rate must be positive"));
        }
        if config.sample_rate_pcm <= 0.0 {
            return Err(Error::config("PCM sample rate must be positive"));
        }
        if config.downsample < 1 {
            return Err(Error::config("IF decimation factor must be at least 1"));
        }
        if config.freq_dev <= 0.0 || config.freqscale <= 0.0 {
            return Err(Error::config("frequency deviation must be positive"));
        }
        if config.deemphasis <= 0.0 {
            return Err(Error::config("de-emphasis time constant must be positive"));
        }

        let sample_rate_baseband = config.sample_rate_if / config.downsample as f64;

        let if_cutoff = config.bandwidth_if * (1.0 + config.excess_bw) / config.sample_rate_if;
        if if_cutoff <= 0.0 || if_cutoff >= 0.5 {
            return Err(Error::config(format!(
                "IF bandwidth {} Hz does not fit the {} Hz sample rate",
                config.bandwidth_if, config.sample_rate_if
            )));
        }

        let ratio = sample_rate_baseband / config.sample_rate_pcm;
        let audio_decim = ratio.round();
        if audio_decim < 1.0 {
            return Err(Error::config(format!(
                "PCM rate {} Hz exceeds the baseband rate {} Hz",
                config.sample_rate_pcm, sample_rate_baseband
            )));
        }
        if (ratio - audio_decim).abs() / ratio > AUDIO_DECIM_TOLERANCE {
            return Err(Error::config(format!(
                "baseband rate {} Hz is not an integer multiple of the PCM rate {} Hz",
                sample_rate_baseband, config.sample_rate_pcm
            )));
        }
        let audio_decim = audio_decim as usize;
        if (ratio - audio_decim as f64).abs() > 1e-9 {
            warn!(
                "audio decimation rounds {:.3} to {}; actual output rate is {:.0} Hz",
                ratio,
                audio_decim,
                sample_rate_baseband / audio_decim as f64
            );
        }

        if config.stereo && sample_rate_baseband < 2.0 * 53_000.0 {
            return Err(Error::config(format!(
                "baseband rate {} Hz is too low for the stereo multiplex; decode mono instead",
                sample_rate_baseband
            )));
        }

        let bandwidth_pcm = config
            .bandwidth_pcm
            .min(0.45 * sample_rate_baseband)
            .min(0.45 * config.sample_rate_pcm);

        let tuning_shift =
            (config.tuning_offset * TUNER_TABLE_SIZE as f64 / config.sample_rate_if).round();
        let tuned_offset = tuning_shift * config.sample_rate_if / TUNER_TABLE_SIZE as f64;

        let freq_dev_norm =
            config.freq_dev / sample_rate_baseband * config.freqscale;

        let tau = config.deemphasis * 1.0e-6;

        debug!(
            "baseband rate {:.0} Hz, IF cutoff {:.4}, audio decimation {}",
            sample_rate_baseband, if_cutoff, audio_decim
        );

        Ok(Self {
            finetuner: FineTuner::new(TUNER_TABLE_SIZE, tuning_shift as i32),
            iffilter: LowPassFilterFirIq::new(config.downsample as usize, if_cutoff),
            discriminator: PhaseDiscriminator::new(freq_dev_norm, config.precise_atan),
            pilot_pll: config.stereo.then(|| {
                PilotPhaseLock::new(
                    sample_rate_baseband,
                    PILOT_FREQ,
                    PILOT_LOOP_BANDWIDTH,
                    PILOT_MIN_SIGNAL,
                )
            }),
            stereo_decoder: config.stereo.then(|| {
                StereoDecoder::new(sample_rate_baseband, bandwidth_pcm, config.stereo_scale)
            }),
            audio_filter: LowPassFilterRealIir::new(bandwidth_pcm, sample_rate_baseband),
            deemph: [
                DeEmphasis::new(sample_rate_baseband, tau),
                DeEmphasis::new(sample_rate_baseband, tau),
            ],
            audio_down: [Downsampler::new(audio_decim), Downsampler::new(audio_decim)],
            histogram: config.histogram.then(|| DeviationHistogram::new(config.freq_dev)),
            stereo_enabled: config.stereo,
            freq_dev: config.freq_dev,
            tuned_offset,
            if_level: 0.0,
            baseband_mean: 0.0,
            baseband_level: 0.0,
            stereo_detected: false,
        })
    }

    /// Decode one block of IQ samples into audio.
    ///
    /// Returns mono samples, or interleaved stereo (even indices left, odd
    /// indices right) when stereo decoding is enabled.
    pub fn process(&mut self, input: &[IQSample]) -> Vec<Sample> {
        self.if_level = 0.95 * self.if_level + 0.05 * rms_iq(input);

        let tuned = self.finetuner.process(input);
        let ifsig = self.iffilter.process(&tuned);
        let baseband = self.discriminator.process(&ifsig);

        let (mean, rms) = mean_rms(&baseband);
        self.baseband_mean = 0.95 * self.baseband_mean + 0.05 * mean;
        self.baseband_level = 0.95 * self.baseband_level + 0.05 * rms;

        if let Some(hist) = &mut self.histogram {
            hist.feed(&baseband);
        }

        if let (Some(pll), Some(stereo)) =
            (self.pilot_pll.as_mut(), self.stereo_decoder.as_mut())
        {
            let (ref38, locked) = pll.process(&baseband);
            self.stereo_detected = pll.locked();

            let (left, right) = stereo.process(&baseband, &ref38, &locked);
            let left = self.deemph[0].process(&left);
            let right = self.deemph[1].process(&right);
            let left = self.audio_down[0].process(&left);
            let right = self.audio_down[1].process(&right);

            let mut audio = Vec::with_capacity(2 * left.len());
            for (&l, &r) in left.iter().zip(&right) {
                audio.push(l);
                audio.push(r);
            }
            audio
        } else {
            let mono = self.audio_filter.process(&baseband);
            let mono = self.deemph[0].process(&mono);
            self.audio_down[0].process(&mono)
        }
    }

    /// Number of interleaved audio channels produced per frame.
    pub fn channels(&self) -> usize {
        if self.stereo_enabled {
            2
        } else {
            1
        }
    }

    /// Smoothed RMS level of the IQ input.
    pub fn if_level(&self) -> f32 {
        self.if_level
    }

    /// Smoothed RMS level of the demodulated multiplex.
    pub fn baseband_level(&self) -> f32 {
        self.baseband_level
    }

    /// Estimated offset of the station from the device center frequency, Hz.
    ///
    /// Combines the fine-tuner shift with the DC component of the
    /// discriminator output; while the pilot is locked the apparent pilot
    /// frequency deviation refines the estimate.
    pub fn tuning_offset(&self) -> f64 {
        let mut offset = self.tuned_offset + self.baseband_mean as f64 * self.freq_dev;
        if self.stereo_detected {
            if let Some(pll) = &self.pilot_pll {
                offset += pll.freq_offset_hz();
            }
        }
        offset
    }

    /// True while the pilot PLL reports lock.
    pub fn stereo_detected(&self) -> bool {
        self.stereo_detected
    }

    /// Pilot level estimate over the last block (0 when decoding mono).
    pub fn pilot_level(&self) -> f64 {
        self.pilot_pll
            .as_ref()
            .map(|pll| pll.pilot_level())
            .unwrap_or(0.0)
    }

    /// PPS events recorded during the last block.
    pub fn pps_events(&self) -> &[PpsEvent] {
        self.pilot_pll
            .as_ref()
            .map(|pll| pll.pps_events())
            .unwrap_or(&[])
    }

    /// The deviation histogram, if enabled.
    pub fn histogram(&self) -> Option<&DeviationHistogram> {
        self.histogram.as_ref()
    }

    /// Reset the deviation histogram counters.
    pub fn reset_histogram(&mut self) {
        if let Some(hist) = &mut self.histogram {
            hist.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_mismatched_pcm_rate() {
        // 1 MHz / 4 = 250 kHz baseband; 44.1 kHz is 5.67x, too far from an
        // integer division.
        let config = FmDecoderConfig {
            sample_rate_if: 1_000_000.0,
            downsample: 4,
            sample_rate_pcm: 44_100.0,
            ..FmDecoderConfig::default()
        };
        assert!(FmDecoder::new(&config).is_err());
    }

    #[test]
    fn test_accepts_rounded_pcm_rate() {
        // 1.2 MHz / 6 = 200 kHz baseband; 48 kHz rounds to a factor of 4.
        let config = FmDecoderConfig {
            sample_rate_if: 1_200_000.0,
            downsample: 6,
            sample_rate_pcm: 48_000.0,
            ..FmDecoderConfig::default()
        };
        let decoder = FmDecoder::new(&config).unwrap();
        assert_eq!(decoder.channels(), 2);
    }

    #[test]
    fn test_rejects_pcm_above_baseband() {
        let config = FmDecoderConfig {
            sample_rate_if: 240_000.0,
            downsample: 1,
            sample_rate_pcm: 400_000.0,
            stereo: false,
            bandwidth_if: 50_000.0,
            ..FmDecoderConfig::default()
        };
        assert!(FmDecoder::new(&config).is_err());
    }

    #[test]
    fn test_rejects_stereo_on_narrow_baseband() {
        let config = FmDecoderConfig {
            sample_rate_if: 96_000.0,
            downsample: 1,
            sample_rate_pcm: 48_000.0,
            bandwidth_if: 20_000.0,
            ..FmDecoderConfig::default()
        };
        assert!(FmDecoder::new(&config).is_err());
    }

    #[test]
    fn test_mono_channel_count() {
        let config = FmDecoderConfig {
            stereo: false,
            downsample: 4,
            ..FmDecoderConfig::default()
        };
        let decoder = FmDecoder::new(&config).unwrap();
        assert_eq!(decoder.channels(), 1);
    }

    #[test]
    fn test_stereo_matrix_settles_to_sum_and_difference() {
        let fs = 250_000.0;
        let mut stereo = StereoDecoder::new(fs, 15_000.0, 1.0);
        // DC multiplex 0.25 with a constant unit reference: the difference
        // path demodulates to 2 * 0.25 = 0.5.
        let mpx = vec![0.25f32; 4000];
        let ref38 = vec![1.0f32; 4000];
        let locked = vec![true; 4000];
        let (left, right) = stereo.process(&mpx, &ref38, &locked);
        assert_relative_eq!(left[3999], 0.75, epsilon = 1e-3);
        assert_relative_eq!(right[3999], -0.25, epsilon = 1e-3);
    }

    #[test]
    fn test_mono_fallback_duplicates_sum_path() {
        let mut stereo = StereoDecoder::new(250_000.0, 15_000.0, 1.17);
        let mpx = vec![0.5f32; 4000];
        let ref38 = vec![1.0f32; 4000];
        let locked = vec![false; 4000];
        let (left, right) = stereo.process(&mpx, &ref38, &locked);
        assert_eq!(left, right);
        assert_relative_eq!(left[3999], 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_matrix_switches_at_lock_transition() {
        let mut stereo = StereoDecoder::new(250_000.0, 15_000.0, 1.0);
        let mpx = vec![0.25f32; 4000];
        let ref38 = vec![1.0f32; 4000];
        // Lock arrives mid-block: the matrix must engage on that sample.
        let mut locked = vec![false; 4000];
        for flag in locked.iter_mut().skip(3000) {
            *flag = true;
        }
        let (left, right) = stereo.process(&mpx, &ref38, &locked);
        assert_eq!(left[2999], right[2999]);
        assert_relative_eq!(left[3999], 0.75, epsilon = 1e-3);
        assert_relative_eq!(right[3999], -0.25, epsilon = 1e-3);
    }
}
