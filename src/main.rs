//! Software decoder for FM broadcast radio with stereo support.
//!
//! Reads complex baseband samples from a source device (a WAV-file pseudo
//! device carrying an I/Q recording), demodulates the FM multiplex with
//! stereo reconstruction, and plays or records the resulting audio.
//!
//! # Usage examples
//!
//! ```bash
//! # Play a stereo broadcast from an I/Q recording
//! stereofm -t wave -c file=capture.wav,freq=94800000
//!
//! # Mono, raw samples on stdout
//! stereofm -t wave -c file=capture.wav -M -R -
//!
//! # Decode to a WAV file and log pulse-per-second markers
//! stereofm -t wave -c file=capture.wav -W out.wav -T pps.log
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{ArgAction, Parser};
use tracing::{error, info, warn};

use stereofm::decoder::{
    FmDecoder, FmDecoderConfig, DEFAULT_BANDWIDTH_PCM, DEFAULT_EXCESS_BW, DEFAULT_STEREO_SCALE,
};
use stereofm::output::{AudioOutput, PlaybackOutput, RawAudioOutput, WavAudioOutput};
use stereofm::pipeline::{run_demod_loop, run_output_loop};
use stereofm::source::Source;
use stereofm::stats::{mean_rms, MovingAverage};
use stereofm::wave::WaveFileSource;
use stereofm::{Error, IQSample, Result, Sample, SampleQueue};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Software decoder for FM broadcast radio with stereo support",
    long_about = None
)]
struct Args {
    /// Source device type (available: wave)
    #[arg(short = 't', long = "devtype", default_value = "wave")]
    devtype: String,

    /// Comma separated key=value configuration pairs for the source,
    /// e.g. file=capture.wav,freq=94800000
    #[arg(short = 'c', long = "config", default_value = "")]
    config: String,

    /// Audio sample rate in Hz
    #[arg(short = 'r', long = "pcmrate", default_value_t = 48_000)]
    pcmrate: u32,

    /// Disable stereo decoding
    #[arg(short = 'M', long = "mono")]
    mono: bool,

    /// De-emphasis time constant in microseconds
    #[arg(short = 'e', long = "de-emphasis", default_value_t = 50.0)]
    deemphasis: f64,

    /// IF bandwidth in Hz (full channel width, halved internally)
    #[arg(short = 'B', long = "bandwidth", default_value_t = 200_000.0)]
    bandwidth: f64,

    /// Peak frequency deviation in Hz
    #[arg(short = 'D', long = "freq-deviation", default_value_t = 75_000.0)]
    freq_dev: f64,

    /// Excess bandwidth fraction above the Nyquist-minimum passband
    #[arg(short = 'E', long = "excess-bw", default_value_t = DEFAULT_EXCESS_BW)]
    excess_bw: f64,

    /// Gain correction for the stereo difference channel
    #[arg(short = 's', long = "stereo-scale", default_value_t = DEFAULT_STEREO_SCALE)]
    stereo_scale: f64,

    /// Multiplier for frequency-to-amplitude conversion
    #[arg(short = 'S', long = "freqscale", default_value_t = 1.0)]
    freqscale: f64,

    /// Collect a histogram of the instantaneous FM deviation
    #[arg(short = 'H', long = "histogram")]
    histogram: bool,

    /// Use exact atan2 in the phase discriminator
    #[arg(short = 'p', long = "precise")]
    precise: bool,

    /// Write raw S16_LE audio samples to a file ("-" for stdout)
    #[arg(short = 'R', long = "raw")]
    raw: Option<String>,

    /// Write audio to a WAV file
    #[arg(short = 'W', long = "wav")]
    wav: Option<String>,

    /// Write pulse-per-second timestamps ("-" for stdout)
    #[arg(short = 'T', long = "pps")]
    pps: Option<String>,

    /// Audio buffer size in seconds
    #[arg(short = 'b', long = "buffer")]
    buffer: Option<f64>,

    /// Verbosity level (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

/// Unix timestamp in seconds, as a float.
fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn main() {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(err) = run(args) {
        error!("{}", err);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    eprintln!("stereofm - software decoder for FM broadcast radio");

    let stereo = !args.mono;
    let bandwidth_if = 0.5 * args.bandwidth;
    if args.pcmrate == 0 {
        return Err(Error::config("PCM rate must be positive"));
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop_flag = Arc::clone(&stop_flag);
        ctrlc::set_handler(move || {
            stop_flag.store(true, Ordering::Relaxed);
            eprintln!("\ngot stop signal, stopping ...");
        })
        .map_err(|err| Error::config(format!("installing signal handler: {}", err)))?;
    }

    // Open and configure the source device.
    let mut source: Box<dyn Source> = match args.devtype.as_str() {
        "wave" => Box::new(WaveFileSource::new()),
        other => {
            return Err(Error::config(format!(
                "unknown device type '{}'; available: wave",
                other
            )));
        }
    };
    source.configure(&args.config)?;

    let freq = source.configured_frequency();
    let tuner_freq = source.frequency() as f64;
    let ifrate = source.sample_rate() as f64;
    info!("tuned for:         {:.6} MHz", freq * 1.0e-6);
    info!("device tuned for:  {:.6} MHz", tuner_freq * 1.0e-6);
    info!("input sample rate: {:.0} Hz", ifrate);

    // The baseband signal is empty above the channel bandwidth, so decimate
    // to just above twice that to speed up all later stages.
    let required_min_rate = 2.0 * bandwidth_if * (1.0 + args.excess_bw);
    let downsample = ((ifrate / required_min_rate).floor() as u32).max(1);
    info!("baseband decimation factor {}", downsample);
    info!(
        "processing sample rate {:.0} Hz",
        ifrate / downsample as f64
    );

    // Prevent aliasing at very low output sample rates.
    let bandwidth_pcm = DEFAULT_BANDWIDTH_PCM.min(0.45 * args.pcmrate as f64);
    info!("audio sample rate: {} Hz", args.pcmrate);
    info!("audio bandwidth:   {:.3} kHz", bandwidth_pcm * 1.0e-3);

    let mut decoder = FmDecoder::new(&FmDecoderConfig {
        sample_rate_if: ifrate,
        tuning_offset: freq - tuner_freq,
        sample_rate_pcm: args.pcmrate as f64,
        stereo,
        deemphasis: args.deemphasis,
        bandwidth_if,
        freq_dev: args.freq_dev,
        bandwidth_pcm,
        downsample,
        excess_bw: args.excess_bw,
        freqscale: args.freqscale,
        stereo_scale: args.stereo_scale,
        histogram: args.histogram,
        precise_atan: args.precise,
    })?;
    let nchannel = decoder.channels();

    // Open the PPS log.
    let mut pps_writer: Option<Box<dyn Write>> = match &args.pps {
        Some(name) if name == "-" => {
            info!("writing pulse-per-second markers to stdout");
            Some(Box::new(std::io::stdout()))
        }
        Some(name) => {
            info!("writing pulse-per-second markers to '{}'", name);
            let file = File::create(name)
                .map_err(|err| Error::config(format!("can not open '{}': {}", name, err)))?;
            Some(Box::new(BufWriter::new(file)))
        }
        None => None,
    };
    if let Some(writer) = pps_writer.as_mut() {
        writeln!(writer, "#pps_index sample_index   unix_time")?;
        writer.flush()?;
    }

    // Size the audio buffer: default to one second for interactive sinks.
    let interactive = args.raw.as_deref() == Some("-") || (args.raw.is_none() && args.wav.is_none());
    let bufsecs = args.buffer.unwrap_or(if interactive { 1.0 } else { 0.0 });
    if bufsecs < 0.0 {
        return Err(Error::config("buffer length must not be negative"));
    }
    let outputbuf_samples = (bufsecs * args.pcmrate as f64) as usize * nchannel;
    if outputbuf_samples > 0 {
        info!(
            "output buffer:     {:.1} seconds",
            outputbuf_samples as f64 / nchannel as f64 / args.pcmrate as f64
        );
    }

    // Open the audio sink.
    let mut output: Box<dyn AudioOutput> = if let Some(name) = &args.raw {
        info!("writing raw 16-bit audio samples to '{}'", name);
        Box::new(RawAudioOutput::new(name)?)
    } else if let Some(name) = &args.wav {
        info!("writing audio samples to '{}'", name);
        Box::new(WavAudioOutput::new(name, args.pcmrate, stereo)?)
    } else {
        Box::new(PlaybackOutput::new(
            args.pcmrate,
            stereo,
            outputbuf_samples.max(args.pcmrate as usize * nchannel),
        )?)
    };

    // Queues between the three threads.
    let iq_queue: Arc<SampleQueue<IQSample>> = Arc::new(SampleQueue::new());
    let audio_queue: Arc<SampleQueue<Sample>> = Arc::new(SampleQueue::new());

    source.start(Arc::clone(&iq_queue), Arc::clone(&stop_flag))?;

    let output_thread = {
        let audio_queue = Arc::clone(&audio_queue);
        let stop_flag = Arc::clone(&stop_flag);
        let minfill = outputbuf_samples;
        thread::spawn(move || {
            run_output_loop(&audio_queue, output.as_mut(), minfill, &stop_flag);
        })
    };

    // Per-block monitoring state.
    let delta_if = tuner_freq - freq;
    let mut ppm_average = MovingAverage::new(40, 0.0);
    let mut audio_level = 0.0f32;
    let mut got_stereo = false;
    let mut block_time = unix_time();

    run_demod_loop(
        &iq_queue,
        &audio_queue,
        &mut decoder,
        &stop_flag,
        0.5,
        (10.0 * ifrate) as usize,
        |block, fm, audio| {
            let prev_block_time = block_time;
            block_time = unix_time();

            let (_, audio_rms) = mean_rms(audio);
            audio_level = 0.95 * audio_level + 0.05 * audio_rms;

            // PPM correction still to make, relative to the device LO.
            if tuner_freq > 0.0 {
                ppm_average
                    .feed((((fm.tuning_offset() + delta_if) / tuner_freq) * -1.0e6) as f32);
            }

            eprint!(
                "\rblk={:6}  freq={:10.6}MHz  ppm={:+6.2}  IF={:+5.1}dB  BB={:+5.1}dB  audio={:+5.1}dB ",
                block,
                (tuner_freq + fm.tuning_offset()) * 1.0e-6,
                ppm_average.average(),
                20.0 * (fm.if_level() as f64).log10(),
                20.0 * (fm.baseband_level() as f64).log10() + 3.01,
                20.0 * (audio_level as f64).log10() + 3.01,
            );
            if outputbuf_samples > 0 {
                let buflen = audio_queue.queued_samples();
                eprint!(
                    " buf={:.1}s ",
                    buflen as f64 / nchannel as f64 / args.pcmrate as f64
                );
            }

            if fm.stereo_detected() != got_stereo {
                got_stereo = fm.stereo_detected();
                if got_stereo {
                    eprintln!();
                    info!(
                        "blk={}: got stereo signal (pilot level = {:.6})",
                        block,
                        fm.pilot_level()
                    );
                } else {
                    eprintln!();
                    info!("blk={}: no/lost stereo signal", block);
                }
            }

            if let Some(writer) = pps_writer.as_mut() {
                for event in fm.pps_events() {
                    let timestamp =
                        prev_block_time + event.block_position * (block_time - prev_block_time);
                    let result = writeln!(
                        writer,
                        "{:>8} {:>14} {:18.6}",
                        event.pps_index, event.sample_index, timestamp
                    )
                    .and_then(|_| writer.flush());
                    if let Err(err) = result {
                        warn!("writing PPS marker: {}", err);
                    }
                }
            }
        },
    );
    eprintln!();

    source.stop()?;
    output_thread
        .join()
        .map_err(|_| Error::sink("audio output thread panicked"))?;

    if let Some(hist) = decoder.histogram() {
        print_histogram(hist);
    }

    Ok(())
}

fn print_histogram(hist: &stereofm::stats::DeviationHistogram) {
    eprintln!("deviation histogram (1 kHz bins, last bin clips):");
    eprintln!("  kHz    negative    positive   magnitude");
    for (bin, ((neg, pos), mag)) in hist
        .negative()
        .iter()
        .zip(hist.positive())
        .zip(hist.magnitude())
        .enumerate()
    {
        if *mag > 0 {
            eprintln!("  {:3} {:11} {:11} {:11}", bin, neg, pos, mag);
        }
    }
}
