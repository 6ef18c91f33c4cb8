//! WAV-file pseudo device.
//!
//! Plays back a quadrature recording stored as a 2-channel WAV file, the
//! left channel carrying I and the right channel Q. Supported encodings are
//! 16-bit PCM, 24-bit PCM and 32-bit float. The worker thread throttles
//! itself against the IQ queue so a fast disk does not flood the decoder.

use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hound::{SampleFormat, WavReader};
use tracing::{debug, error, info, warn};

use crate::buffer::SampleQueue;
use crate::error::{Error, Result};
use crate::source::{parse_kv, Source};
use crate::IQSample;

const DEFAULT_BLOCK_LENGTH: usize = 4 * 1024;
const MIN_BLOCK_LENGTH: usize = 1024;
const MAX_BLOCK_LENGTH: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
enum WaveFormat {
    Pcm16,
    Pcm24,
    Float32,
}

struct WaveStream {
    reader: WavReader<BufReader<File>>,
    format: WaveFormat,
    block_length: usize,
}

impl WaveStream {
    /// Read up to one block of IQ frames; an empty vector means end of file.
    fn read_block(&mut self) -> Result<Vec<IQSample>> {
        let mut out = Vec::with_capacity(self.block_length);
        match self.format {
            WaveFormat::Pcm16 => {
                let mut samples = self.reader.samples::<i16>();
                while out.len() < self.block_length {
                    let (i, q) = match (samples.next(), samples.next()) {
                        (Some(i), Some(q)) => (i, q),
                        _ => break,
                    };
                    let scale = 1.0 / 32768.0;
                    out.push(IQSample::new(
                        read_sample(i)? as f32 * scale,
                        read_sample(q)? as f32 * scale,
                    ));
                }
            }
            WaveFormat::Pcm24 => {
                let mut samples = self.reader.samples::<i32>();
                while out.len() < self.block_length {
                    let (i, q) = match (samples.next(), samples.next()) {
                        (Some(i), Some(q)) => (i, q),
                        _ => break,
                    };
                    let scale = 1.0 / 8_388_608.0;
                    out.push(IQSample::new(
                        read_sample(i)? as f32 * scale,
                        read_sample(q)? as f32 * scale,
                    ));
                }
            }
            WaveFormat::Float32 => {
                let mut samples = self.reader.samples::<f32>();
                while out.len() < self.block_length {
                    let (i, q) = match (samples.next(), samples.next()) {
                        (Some(i), Some(q)) => (i, q),
                        _ => break,
                    };
                    out.push(IQSample::new(read_sample(i)?, read_sample(q)?));
                }
            }
        }
        Ok(out)
    }
}

fn read_sample<T>(sample: std::result::Result<T, hound::Error>) -> Result<T> {
    sample.map_err(|err| Error::source(format!("reading samples: {}", err)))
}

/// Pseudo device streaming IQ samples from a WAV file.
pub struct WaveFileSource {
    stream: Option<WaveStream>,
    sample_rate: u32,
    configured_freq: f64,
    worker: Option<thread::JoinHandle<()>>,
}

impl WaveFileSource {
    pub fn new() -> Self {
        Self {
            stream: None,
            sample_rate: 0,
            configured_freq: 0.0,
            worker: None,
        }
    }
}

impl Default for WaveFileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for WaveFileSource {
    /// Configuration keys: `file=<path>` (required), `freq=<hz>` station
    /// frequency, `blklen=<frames>` preferred block length.
    fn configure(&mut self, config: &str) -> Result<()> {
        let options = parse_kv(config);

        let path = options
            .get("file")
            .ok_or_else(|| Error::config("wave source requires file=<path>"))?;

        let reader = WavReader::open(path)
            .map_err(|err| Error::source(format!("opening '{}': {}", path, err)))?;
        let spec = reader.spec();

        if spec.channels != 2 {
            return Err(Error::source(format!(
                "quadrature signal with I and Q channels required; input has {} channel(s)",
                spec.channels
            )));
        }
        if spec.sample_rate == 0 {
            return Err(Error::source("input declares a sample rate of 0 Hz"));
        }

        let format = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) => WaveFormat::Pcm16,
            (SampleFormat::Int, 24) => WaveFormat::Pcm24,
            (SampleFormat::Float, 32) => WaveFormat::Float32,
            (fmt, bits) => {
                return Err(Error::source(format!(
                    "unsupported input format {:?} with {} bits; \
                     use 16/24-bit PCM or 32-bit float",
                    fmt, bits
                )));
            }
        };

        let block_length = match options.get("blklen") {
            Some(value) => value
                .parse::<usize>()
                .map_err(|_| Error::config(format!("invalid blklen '{}'", value)))?,
            None => DEFAULT_BLOCK_LENGTH,
        };
        let block_length =
            block_length.clamp(MIN_BLOCK_LENGTH, MAX_BLOCK_LENGTH) / 1024 * 1024;

        self.configured_freq = match options.get("freq") {
            Some(value) => value
                .parse::<f64>()
                .map_err(|_| Error::config(format!("invalid freq '{}'", value)))?,
            None => {
                warn!("no station frequency configured; assuming the recording is centered");
                0.0
            }
        };

        info!(
            "wave input: {} Hz, {:?}, {} frames per block",
            spec.sample_rate, format, block_length
        );

        self.sample_rate = spec.sample_rate;
        self.stream = Some(WaveStream {
            reader,
            format,
            block_length,
        });
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frequency(&self) -> u32 {
        self.configured_freq as u32
    }

    fn configured_frequency(&self) -> f64 {
        self.configured_freq
    }

    fn start(
        &mut self,
        queue: Arc<SampleQueue<IQSample>>,
        stop_flag: Arc<AtomicBool>,
    ) -> Result<()> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| Error::source("source not configured or already started"))?;
        // Throttle when more than a second of input is already queued.
        let minfill = self.sample_rate as usize;
        self.worker = Some(thread::spawn(move || {
            worker_run(stream, queue, stop_flag, minfill);
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| Error::source("wave worker thread panicked"))?;
        }
        Ok(())
    }
}

fn worker_run(
    mut stream: WaveStream,
    queue: Arc<SampleQueue<IQSample>>,
    stop_flag: Arc<AtomicBool>,
    minfill: usize,
) {
    while !stop_flag.load(Ordering::Relaxed) {
        if queue.is_below(minfill) {
            match stream.read_block() {
                Ok(samples) => {
                    if samples.is_empty() {
                        debug!("end of input reached");
                        break;
                    }
                    if samples.len() < stream.block_length {
                        debug!(
                            "short read: {} of {} frames",
                            samples.len(),
                            stream.block_length
                        );
                    }
                    queue.push(samples);
                }
                Err(err) => {
                    error!("wave source: {}", err);
                    break;
                }
            }
        } else {
            thread::sleep(Duration::from_millis(10));
        }
    }
    // Always mark the end so downstream threads can drain and exit.
    queue.push_end();
}
