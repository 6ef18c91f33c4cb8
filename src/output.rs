//! Audio sinks.
//!
//! Decoded audio leaves the pipeline through an [`AudioOutput`]: raw
//! S16_LE samples on a file or stdout, a WAV file, or the default audio
//! device. Samples arrive in [-1, +1], mono or interleaved stereo.

use std::fs::File;
use std::io::{self, BufWriter, Write};

use crossbeam::channel;
use hound::{SampleFormat, WavSpec, WavWriter};
use tinyaudio::prelude::*;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::Sample;

/// A sink accepting blocks of audio samples.
pub trait AudioOutput: Send {
    fn write(&mut self, samples: &[Sample]) -> Result<()>;
}

#[inline]
fn to_i16(sample: Sample) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Writes raw signed 16-bit little-endian samples to a file or stdout.
pub struct RawAudioOutput {
    writer: Box<dyn Write + Send>,
}

impl RawAudioOutput {
    /// Open the output; `"-"` selects stdout.
    pub fn new(filename: &str) -> Result<Self> {
        let writer: Box<dyn Write + Send> = if filename == "-" {
            Box::new(io::stdout())
        } else {
            let file = File::create(filename)
                .map_err(|err| Error::sink(format!("creating '{}': {}", filename, err)))?;
            Box::new(BufWriter::new(file))
        };
        Ok(Self { writer })
    }
}

impl AudioOutput for RawAudioOutput {
    fn write(&mut self, samples: &[Sample]) -> Result<()> {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            bytes.extend_from_slice(&to_i16(s).to_le_bytes());
        }
        self.writer
            .write_all(&bytes)
            .map_err(|err| Error::sink(format!("write failed: {}", err)))
    }
}

/// Writes 16-bit PCM audio to a WAV file.
pub struct WavAudioOutput {
    writer: Option<WavWriter<BufWriter<File>>>,
}

impl WavAudioOutput {
    pub fn new(filename: &str, sample_rate: u32, stereo: bool) -> Result<Self> {
        let spec = WavSpec {
            channels: if stereo { 2 } else { 1 },
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(filename, spec)
            .map_err(|err| Error::sink(format!("creating '{}': {}", filename, err)))?;
        Ok(Self {
            writer: Some(writer),
        })
    }
}

impl AudioOutput for WavAudioOutput {
    fn write(&mut self, samples: &[Sample]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::sink("output already finalized"))?;
        for &s in samples {
            writer
                .write_sample(to_i16(s))
                .map_err(|err| Error::sink(format!("write failed: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for WavAudioOutput {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(err) = writer.finalize() {
                error!("finalizing WAV output: {}", err);
            }
        }
    }
}

/// Plays audio on the default output device.
///
/// The device callback drains a bounded ring; [`AudioOutput::write`] blocks
/// when the ring is full, which paces the whole pipeline at the hardware
/// rate.
pub struct PlaybackOutput {
    tx: channel::Sender<f32>,
    _device: OutputDevice,
}

impl PlaybackOutput {
    /// Open the default audio device at `sample_rate` with a ring of
    /// `buffer_samples` samples.
    pub fn new(sample_rate: u32, stereo: bool, buffer_samples: usize) -> Result<Self> {
        let (tx, rx) = channel::bounded::<f32>(buffer_samples.max(1024));

        let params = OutputDeviceParameters {
            channels_count: if stereo { 2 } else { 1 },
            sample_rate: sample_rate as usize,
            channel_sample_count: 1024,
        };
        let device = run_output_device(params, move |data| {
            for sample in data.iter_mut() {
                *sample = rx.try_recv().unwrap_or(0.0);
            }
        })
        .map_err(|err| Error::sink(format!("opening audio device: {}", err)))?;

        info!("playing audio on the default output device");
        Ok(Self {
            tx,
            _device: device,
        })
    }
}

impl AudioOutput for PlaybackOutput {
    fn write(&mut self, samples: &[Sample]) -> Result<()> {
        for &s in samples {
            self.tx
                .send(s)
                .map_err(|_| Error::sink("audio device stopped"))?;
        }
        Ok(())
    }
}
