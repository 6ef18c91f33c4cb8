//! Radio source abstraction.
//!
//! A [`Source`] delivers IQ sample blocks into the pipeline's input queue
//! from a worker thread it owns. Sources are configured with the same
//! comma-separated `key=value` strings the command line passes through,
//! so every device type can expose its own knobs without new CLI flags.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::buffer::SampleQueue;
use crate::error::Result;
use crate::IQSample;

/// A device that produces IQ samples in [-1, +1].
pub trait Source: Send {
    /// Apply a `key=value,key2=value2` configuration string. Must be called
    /// before [`Source::start`].
    fn configure(&mut self, config: &str) -> Result<()>;

    /// IF sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Device center frequency in Hz.
    fn frequency(&self) -> u32;

    /// Frequency of the wanted station in Hz.
    fn configured_frequency(&self) -> f64;

    /// Start streaming into `queue` on a worker thread. The worker checks
    /// `stop_flag` between blocks and always pushes the end marker on exit.
    fn start(
        &mut self,
        queue: Arc<SampleQueue<IQSample>>,
        stop_flag: Arc<AtomicBool>,
    ) -> Result<()>;

    /// Stop streaming and join the worker thread.
    fn stop(&mut self) -> Result<()>;
}

/// Parse a comma-separated `key=value` configuration string.
///
/// Keys without a value act as switches and map to an empty string.
/// Whitespace around keys and values is trimmed; empty entries are skipped.
pub fn parse_kv(config: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for entry in config.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once('=') {
            Some((key, value)) => {
                map.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => {
                map.insert(entry.to_string(), String::new());
            }
        }
    }
    map
}
