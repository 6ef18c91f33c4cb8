//! Thread bodies of the demodulation pipeline.
//!
//! Three threads connected by two queues:
//!
//! ```text
//! [source] --IQ--> [run_demod_loop] --PCM--> [run_output_loop]
//! ```
//!
//! The demodulator loop owns all DSP state; the queues and the stop flag
//! are the only shared mutable state in the program.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, warn};

use crate::buffer::SampleQueue;
use crate::decoder::FmDecoder;
use crate::output::AudioOutput;
use crate::{IQSample, Sample};

/// Pull IQ blocks, decode them, and push audio until the stream ends or the
/// stop flag is raised. Pushes the end marker on the audio queue before
/// returning so the sink can drain.
///
/// The first decoded block is discarded: the IF filters have not reached
/// steady state yet and would produce an audible click.
///
/// A one-shot warning is emitted when more than `backlog_limit` IQ samples
/// pile up in the input queue (normally 10 seconds worth); the source is
/// never blocked.
///
/// `monitor` is invoked once per block, after decoding and gain adjustment,
/// with the block index, the decoder (for its metrics) and the audio about
/// to be queued.
pub fn run_demod_loop<M>(
    iq_queue: &SampleQueue<IQSample>,
    audio_queue: &SampleQueue<Sample>,
    decoder: &mut FmDecoder,
    stop_flag: &AtomicBool,
    audio_gain: f32,
    backlog_limit: usize,
    mut monitor: M,
) where
    M: FnMut(u64, &FmDecoder, &[Sample]),
{
    let mut backlog_warned = false;
    let mut block = 0u64;

    while !stop_flag.load(Ordering::Relaxed) {
        if !backlog_warned && iq_queue.queued_samples() > backlog_limit {
            warn!("input buffer is growing; the system is too slow to keep up");
            backlog_warned = true;
        }

        let iq = iq_queue.pull();
        if iq.is_empty() {
            break;
        }

        let mut audio = decoder.process(&iq);
        for v in audio.iter_mut() {
            *v *= audio_gain;
        }

        monitor(block, decoder, &audio);

        // Filter warm-up: drop the first block.
        if block > 0 {
            audio_queue.push(audio);
        }
        block += 1;
    }

    audio_queue.push_end();
}

/// Pull audio blocks and hand them to the sink until the stream ends or the
/// stop flag is raised.
///
/// On underflow the sink waits until the queue is back at `minfill` samples
/// so short production hiccups do not turn into a stutter. A failed write
/// is logged and the stream continues; upstream data is never dropped for a
/// sink error.
pub fn run_output_loop(
    audio_queue: &SampleQueue<Sample>,
    output: &mut dyn AudioOutput,
    minfill: usize,
    stop_flag: &AtomicBool,
) {
    while !stop_flag.load(Ordering::Relaxed) {
        if audio_queue.queued_samples() == 0 {
            audio_queue.wait_for_fill(minfill);
        }
        if audio_queue.end_reached() {
            break;
        }
        let samples = audio_queue.pull();
        if samples.is_empty() {
            break;
        }
        if let Err(err) = output.write(&samples) {
            error!("audio output: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::FmDecoderConfig;
    use std::sync::Arc;
    use std::thread;

    fn test_decoder() -> FmDecoder {
        FmDecoder::new(&FmDecoderConfig {
            sample_rate_if: 1_000_000.0,
            downsample: 4,
            stereo: false,
            ..FmDecoderConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_first_block_is_discarded() {
        let iq_queue = SampleQueue::new();
        let audio_queue = SampleQueue::new();
        let stop = AtomicBool::new(false);
        let mut decoder = test_decoder();

        iq_queue.push(vec![IQSample::new(0.0, 0.0); 10_000]);
        iq_queue.push(vec![IQSample::new(0.0, 0.0); 10_000]);
        iq_queue.push_end();

        let mut blocks = 0u64;
        run_demod_loop(
            &iq_queue,
            &audio_queue,
            &mut decoder,
            &stop,
            0.5,
            usize::MAX,
            |_, _, _| blocks += 1,
        );

        assert_eq!(blocks, 2);
        // Only the second block was queued: 10000 / 4 / 5 samples.
        assert_eq!(audio_queue.queued_samples(), 500);
        let first = audio_queue.pull();
        assert_eq!(first.len(), 500);
        assert!(audio_queue.end_reached());
    }

    #[test]
    fn test_stop_flag_terminates_loop() {
        let iq_queue: Arc<SampleQueue<IQSample>> = Arc::new(SampleQueue::new());
        let audio_queue: Arc<SampleQueue<Sample>> = Arc::new(SampleQueue::new());
        let stop = Arc::new(AtomicBool::new(false));

        let demod = {
            let iq_queue = Arc::clone(&iq_queue);
            let audio_queue = Arc::clone(&audio_queue);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut decoder = test_decoder();
                run_demod_loop(
                    &iq_queue,
                    &audio_queue,
                    &mut decoder,
                    &stop,
                    0.5,
                    usize::MAX,
                    |_, _, _| {},
                );
            })
        };

        iq_queue.push(vec![IQSample::new(0.1, 0.0); 8_000]);
        stop.store(true, Ordering::Relaxed);
        // Unblock a pull that may already be parked.
        iq_queue.push_end();
        demod.join().unwrap();
        assert!(audio_queue.end_reached() || audio_queue.queued_samples() > 0);
    }
}
