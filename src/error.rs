//! Error types shared by the analysis pipelines.
//!
//! Only structural problems are errors. Per-peak and per-window anomalies are
//! carried as [`Annotation`](crate::quality::Annotation)s on the results.

use crate::signal::Channel;
use thiserror::Error;

/// Errors that abort an analysis run before any result is produced.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A parameter is out of range (non-positive threshold, offset < 1, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The input buffer violates its structural invariants.
    #[error("malformed buffer: {0}")]
    MalformedBuffer(#[from] BufferDefect),
}

/// The specific way a signal buffer is malformed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BufferDefect {
    #[error("timestamp at index {index} does not increase")]
    NonIncreasingTimestamp { index: usize },

    #[error("channel {0} is missing")]
    MissingChannel(Channel),

    #[error("channel {channel} has {found} readings, expected {expected}")]
    LengthMismatch {
        channel: Channel,
        expected: usize,
        found: usize,
    },

    #[error("sample rate {0} Hz is not positive")]
    InvalidSampleRate(f64),
}

impl AnalysisError {
    /// Shorthand for an [`AnalysisError::InvalidConfiguration`].
    pub fn invalid(message: impl Into<String>) -> Self {
        AnalysisError::InvalidConfiguration(message.into())
    }
}
