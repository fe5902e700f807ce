//! Error types and result utilities for separation operations.

use thiserror::Error;

/// Convenience type alias for results that may contain SeparationError
pub type SeparationResult<T> = Result<T, SeparationError>;

/// Error types that can occur while analysing, separating or synthesizing audio.
#[derive(Error, Debug)]
pub enum SeparationError {
    /// The audio source does not deliver the canonical PCM layout.
    ///
    /// Normalising the source (sample rate, bit depth, channel count) is the job of the
    /// decoder in front of this crate. Fatal, never retried.
    #[error("Unsupported audio format: expected {expected}, got {actual}")]
    UnsupportedFormat {
        /// The format the analyzer was configured for.
        expected: String,
        /// The format the source reported.
        actual: String,
    },

    /// Error that occurs when matrix dimensions don't match expected values.
    ///
    /// This happens when a mask and a magnitude matrix differ in shape, or when the
    /// channels of a song disagree on their number of analysis frames.
    #[error("Dimension mismatch error: {0}")]
    DimensionMismatch(String),

    /// Error that occurs when invalid parameters are provided to an operation.
    #[error("Invalid parameter error: {0}")]
    InvalidParameter(String),

    /// A frame reached the overlap-add accumulator out of order, or after its flush.
    #[error("Frame {row} delivered out of order, expected frame {expected}")]
    FrameOrder {
        /// Row index of the offending frame.
        row: usize,
        /// Row index the accumulator was waiting for.
        expected: usize,
    },

    /// The audio sink rejected a block or a flush.
    #[error("Audio sink error: {0}")]
    Sink(String),

    /// The fixed-size worker pool could not be created.
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// One separation pipeline failed; its sibling was aborted.
    #[error("{name} pipeline failed: {source}")]
    Pipeline {
        /// Name of the failed pipeline.
        name: &'static str,
        /// The underlying error.
        source: Box<SeparationError>,
    },

    /// Both separation pipelines failed independently.
    #[error("Multiple pipelines failed: {count} errors")]
    MultiplePipelines {
        /// The number of failed pipelines.
        count: usize,
        /// The individual pipeline errors.
        errors: Vec<SeparationError>,
    },
}

impl SeparationError {
    /// Create a new unsupported format error.
    pub fn unsupported_format(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a new dimension mismatch error.
    pub fn dimension_mismatch(message: impl Into<String>) -> Self {
        Self::DimensionMismatch(message.into())
    }

    /// Create a new invalid parameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    /// Wrap an error raised inside the named pipeline.
    pub fn pipeline(name: &'static str, source: SeparationError) -> Self {
        Self::Pipeline {
            name,
            source: Box::new(source),
        }
    }

    /// Aggregate the errors of several failed pipelines into one.
    ///
    /// A single error is passed through unchanged.
    pub fn aggregate(mut errors: Vec<SeparationError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            count => Some(Self::MultiplePipelines { count, errors }),
        }
    }
}
