//! Error handling for the stereofm library
//!
//! This module provides a unified error type covering configuration
//! validation, source devices and audio sinks. The DSP blocks themselves are
//! infallible: they accept arbitrary finite input and produce finite output.

use std::fmt;
use std::io;

/// A specialized Result type for stereofm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for stereofm operations
#[derive(Debug)]
pub enum Error {
    /// I/O error (file operations, pipes, etc.)
    Io(io::Error),

    /// Invalid configuration, rejected before streaming starts
    Config(String),

    /// Source device error (open, read, unsupported format)
    Source(String),

    /// Audio sink error (open, write)
    Sink(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Source(msg) => write!(f, "Source error: {}", msg),
            Error::Sink(msg) => write!(f, "Audio output error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

// Helper constructors for common error scenarios

impl Error {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create a source error with a custom message
    pub fn source<S: Into<String>>(msg: S) -> Self {
        Error::Source(msg.into())
    }

    /// Create an audio sink error with a custom message
    pub fn sink<S: Into<String>>(msg: S) -> Self {
        Error::Sink(msg.into())
    }
}
