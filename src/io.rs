//! Audio source and sink collaborators.
//!
//! Decoding into canonical PCM and container writing live outside this crate. A source
//! only has to hand out the samples of one channel at a time; a sink receives
//! interleaved blocks in order, followed by exactly one flush or an abort.

use crate::repr::AudioFormat;
use crate::{SeparationError, SeparationResult};

/// Supplier of canonical PCM samples.
pub trait AudioSource: Send + Sync {
    /// Format of the delivered samples.
    fn format(&self) -> AudioFormat;

    /// Samples of one channel, in order.
    ///
    /// # Errors
    /// Implementations fail for an unknown channel or an unreadable source.
    fn channel_samples(&self, channel: usize) -> SeparationResult<Vec<f32>>;
}

/// Receiver of synthesized, interleaved sample blocks.
pub trait AudioSink: Send {
    /// Accepts the next block of interleaved samples in `format`.
    ///
    /// # Errors
    /// Implementations return [`SeparationError::Sink`] when the block cannot be stored.
    fn write_block(&mut self, samples: &[f32], format: &AudioFormat) -> SeparationResult<()>;

    /// Signals the end of the stream.
    ///
    /// # Errors
    /// Implementations return [`SeparationError::Sink`] when the stream cannot be finished.
    fn flush(&mut self) -> SeparationResult<()>;

    /// Signals that no further blocks will arrive and the stream is incomplete.
    ///
    /// Cleaning up partial output is left to the implementation.
    fn abort(&mut self) {}
}

/// In-memory source over an interleaved PCM buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct InterleavedSource {
    format: AudioFormat,
    samples: Vec<f32>,
}

impl InterleavedSource {
    /// Wraps an interleaved buffer.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidParameter`] for a format without channels and
    /// [`SeparationError::DimensionMismatch`] if the buffer does not hold whole frames.
    pub fn new(format: AudioFormat, samples: Vec<f32>) -> SeparationResult<Self> {
        format.validate()?;
        if samples.len() % format.channels != 0 {
            return Err(SeparationError::dimension_mismatch(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                format.channels
            )));
        }
        Ok(Self { format, samples })
    }

    /// Interleaves per-channel buffers of equal length.
    ///
    /// # Errors
    /// Returns [`SeparationError::DimensionMismatch`] if the channel count differs from
    /// the format or the buffers differ in length.
    pub fn from_channels(format: AudioFormat, channels: &[Vec<f32>]) -> SeparationResult<Self> {
        if channels.len() != format.channels {
            return Err(SeparationError::dimension_mismatch(format!(
                "Format declares {} channels, got {}",
                format.channels,
                channels.len()
            )));
        }
        let length = channels.first().map_or(0, Vec::len);
        if channels.iter().any(|c| c.len() != length) {
            return Err(SeparationError::dimension_mismatch(
                "Channel buffers differ in length",
            ));
        }
        let samples = (0..length)
            .flat_map(|index| channels.iter().map(move |channel| channel[index]))
            .collect();
        Self::new(format, samples)
    }

    /// Number of samples per channel.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels
    }
}

impl AudioSource for InterleavedSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn channel_samples(&self, channel: usize) -> SeparationResult<Vec<f32>> {
        if channel >= self.format.channels {
            return Err(SeparationError::invalid_parameter(format!(
                "Channel {channel} out of range for {} channels",
                self.format.channels
            )));
        }
        Ok(self
            .samples
            .iter()
            .skip(channel)
            .step_by(self.format.channels)
            .copied()
            .collect())
    }
}

/// Sink that keeps everything it receives in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySink {
    samples: Vec<f32>,
    format: Option<AudioFormat>,
    blocks: usize,
    flushed: bool,
    aborted: bool,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All received samples, interleaved.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Samples of one channel.
    pub fn channel(&self, channel: usize) -> Vec<f32> {
        let channels = self.format.map_or(1, |f| f.channels.max(1));
        self.samples
            .iter()
            .skip(channel)
            .step_by(channels)
            .copied()
            .collect()
    }

    /// Format of the last received block.
    pub const fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    /// Number of received blocks.
    pub const fn blocks(&self) -> usize {
        self.blocks
    }

    /// Whether the stream was finished.
    pub const fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Whether the stream was aborted.
    pub const fn is_aborted(&self) -> bool {
        self.aborted
    }
}

impl AudioSink for MemorySink {
    fn write_block(&mut self, samples: &[f32], format: &AudioFormat) -> SeparationResult<()> {
        if self.flushed || self.aborted {
            return Err(SeparationError::Sink(
                "Block written after the end of the stream".to_string(),
            ));
        }
        if samples.len() % format.channels.max(1) != 0 {
            return Err(SeparationError::Sink(format!(
                "Block of {} samples is not interleaved over {} channels",
                samples.len(),
                format.channels
            )));
        }
        self.samples.extend_from_slice(samples);
        self.format = Some(*format);
        self.blocks += 1;
        Ok(())
    }

    fn flush(&mut self) -> SeparationResult<()> {
        if self.flushed {
            return Err(SeparationError::Sink("Stream already flushed".to_string()));
        }
        self.flushed = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}
