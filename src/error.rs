use std::io;
use std::num::ParseFloatError;

use thiserror::Error;

/// Framing failures for a single length-prefixed line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {len} byte(s), need at least 2")]
    TooShort { len: usize },
    #[error("expected {expected} payload bytes, got {actual}: {preview:?}")]
    LengthMismatch {
        expected: usize,
        actual: usize,
        preview: String,
    },
    #[error("payload of {len} bytes does not fit a 16-bit length prefix")]
    TooLong { len: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("missing duration magnitude")]
    MissingMagnitude,
    #[error("missing duration unit")]
    MissingUnit,
    #[error("unrecognized time unit {0:?}")]
    UnrecognizedUnit(String),
    #[error("invalid duration magnitude: {0}")]
    InvalidMagnitude(#[from] ParseFloatError),
}

/// Per-endpoint query failures surfaced to the caller.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{addr}: connect failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("{addr}: failed to send status request: {source}")]
    Request {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("{addr}: incomplete apcupsd read")]
    Incomplete { addr: String },
}

impl QueryError {
    pub fn connect_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectFailed {
            addr: addr.into(),
            source,
        }
    }

    pub fn incomplete(addr: impl Into<String>) -> Self {
        Self::Incomplete { addr: addr.into() }
    }
}

#[derive(Debug, Error)]
#[error("failed to initialize logging: {0}")]
pub struct LoggingError(pub String);
