#![doc = include_str!("../readme.md")]

use num_complex::Complex;

pub mod buffer;
pub mod decoder;
pub mod dsp;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod source;
pub mod stats;
pub mod wave;

/// Complex baseband sample delivered by the radio front end, both parts in
/// [-1, +1].
pub type IQSample = Complex<f32>;

/// Real-valued audio or multiplex sample in [-1, +1].
pub type Sample = f32;

pub use buffer::SampleQueue;
pub use decoder::{FmDecoder, FmDecoderConfig};
pub use error::{Error, Result};
