//! Time-domain resynthesis of masked channels.
//!
//! Every row is turned back into a frame by iterative phase estimation: the original
//! time-domain frame seeds the phase, and each iteration projects the spectrum onto the
//! target magnitudes before transforming back. Frames are stitched with overlap-add,
//! strictly in row order; channels synthesize concurrently.

use std::sync::Arc;

use num_complex::Complex;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use tracing::{info, warn};

use crate::io::AudioSink;
use crate::pipeline::{CancellationToken, SeparationStatus};
use crate::repr::{Channel, FrameGeometry, Song};
use crate::{SeparationError, SeparationResult};

/// Options of the synthesis stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisOptions {
    /// Scaling applied to every synthesized sample.
    pub gain: f32,
    /// Number of forward/inverse projections per frame.
    pub phase_iterations: usize,
}

impl SynthesisOptions {
    /// Gain 0.2 and 5 iterations.
    pub const fn new() -> Self {
        Self {
            gain: 0.2,
            phase_iterations: 5,
        }
    }

    /// Validate the options.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidParameter`] for a non-finite gain or zero
    /// iterations.
    pub fn validate(&self) -> SeparationResult<()> {
        if !self.gain.is_finite() {
            return Err(SeparationError::invalid_parameter(format!(
                "Output gain must be finite, got {}",
                self.gain
            )));
        }
        if self.phase_iterations == 0 {
            return Err(SeparationError::invalid_parameter(
                "At least one phase iteration is required",
            ));
        }
        Ok(())
    }
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterative magnitude/phase frame estimate with cached transform plans.
#[derive(Clone)]
pub struct PhaseEstimator {
    length: usize,
    iterations: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for PhaseEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseEstimator")
            .field("length", &self.length)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl PhaseEstimator {
    /// Plans both transforms for frames of `length` samples.
    pub fn new(length: usize, iterations: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            length,
            iterations: iterations.max(1),
            forward: planner.plan_fft_forward(length),
            inverse: planner.plan_fft_inverse(length),
        }
    }

    /// Frame length the estimator was planned for.
    pub const fn length(&self) -> usize {
        self.length
    }

    /// Estimates a time-domain frame with the given half-spectrum magnitudes.
    ///
    /// `magnitudes` holds the first `length / 2` bins; the upper half of the spectrum is
    /// their mirror image and the Nyquist bin is zero.
    ///
    /// # Errors
    /// Returns [`SeparationError::DimensionMismatch`] for a seed of the wrong length or
    /// the wrong number of magnitudes.
    pub fn estimate(&self, magnitudes: &[f32], seed: &[f32]) -> SeparationResult<Vec<f32>> {
        if seed.len() != self.length || magnitudes.len() != self.length / 2 {
            return Err(SeparationError::dimension_mismatch(format!(
                "Expected a {}-sample seed and {} magnitudes, got {} and {}",
                self.length,
                self.length / 2,
                seed.len(),
                magnitudes.len()
            )));
        }

        let mut spectrum: Vec<Complex<f32>> =
            seed.iter().map(|&x| Complex::new(x, 0.0)).collect();
        self.forward.process(&mut spectrum);

        let scale = 1.0 / self.length as f32;
        let mut frame = vec![0.0; self.length];
        for iteration in 0..self.iterations {
            for (bin, value) in spectrum.iter_mut().enumerate() {
                *value = Complex::from_polar(self.target(magnitudes, bin), value.arg());
            }
            self.inverse.process(&mut spectrum);
            for (sample, value) in frame.iter_mut().zip(spectrum.iter_mut()) {
                *sample = value.re * scale;
                *value = Complex::new(*sample, 0.0);
            }
            if iteration + 1 < self.iterations {
                self.forward.process(&mut spectrum);
            }
        }
        Ok(frame)
    }

    #[inline]
    fn target(&self, magnitudes: &[f32], bin: usize) -> f32 {
        let half = self.length / 2;
        match bin.cmp(&half) {
            std::cmp::Ordering::Less => magnitudes[bin],
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Greater => magnitudes[self.length - bin],
        }
    }
}

/// Overlap-add accumulator for one channel.
///
/// Frames must arrive in strictly increasing row order, starting at row 0. Every push
/// emits the `hop_size` samples that no later frame can touch; [`OverlapAdd::flush`]
/// emits the remaining `slice_length - hop_size` samples exactly once.
#[derive(Debug, Clone)]
pub struct OverlapAdd {
    geometry: FrameGeometry,
    accumulator: Vec<f32>,
    next_row: usize,
    flushed: bool,
}

impl OverlapAdd {
    /// Creates an empty accumulator.
    pub fn new(geometry: FrameGeometry) -> Self {
        Self {
            geometry,
            accumulator: vec![0.0; geometry.slice_length()],
            next_row: 0,
            flushed: false,
        }
    }

    /// Number of frames pushed so far.
    pub const fn frames(&self) -> usize {
        self.next_row
    }

    /// Adds the frame of `row` and returns the next `hop_size` finished samples.
    ///
    /// # Errors
    /// Returns [`SeparationError::FrameOrder`] for a row other than the next one or after
    /// the flush, and [`SeparationError::DimensionMismatch`] for a frame of the wrong
    /// length.
    pub fn push(&mut self, row: usize, frame: &[f32]) -> SeparationResult<Vec<f32>> {
        if self.flushed || row != self.next_row {
            return Err(SeparationError::FrameOrder {
                row,
                expected: self.next_row,
            });
        }
        if frame.len() != self.geometry.slice_length() {
            return Err(SeparationError::dimension_mismatch(format!(
                "Frame must hold {} samples, got {}",
                self.geometry.slice_length(),
                frame.len()
            )));
        }

        for (sum, &sample) in self.accumulator.iter_mut().zip(frame) {
            *sum += sample;
        }
        let block: Vec<f32> = self.accumulator.drain(..self.geometry.hop_size()).collect();
        self.accumulator.resize(self.geometry.slice_length(), 0.0);
        self.next_row += 1;
        Ok(block)
    }

    /// Emits the trailing samples of the last frame.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidParameter`] on a second flush.
    pub fn flush(&mut self) -> SeparationResult<Vec<f32>> {
        if self.flushed {
            return Err(SeparationError::invalid_parameter(
                "Overlap-add accumulator already flushed",
            ));
        }
        self.flushed = true;
        if self.next_row == 0 {
            return Ok(Vec::new());
        }
        let tail = self.geometry.slice_length() - self.geometry.hop_size();
        Ok(self.accumulator[..tail].to_vec())
    }
}

/// Per-channel synthesis state: a phase estimator and an overlap-add accumulator.
#[derive(Debug)]
pub struct ChannelSynthesizer<'a> {
    channel: &'a Channel,
    estimator: PhaseEstimator,
    overlap_add: OverlapAdd,
}

impl<'a> ChannelSynthesizer<'a> {
    /// Prepares synthesis of `channel`.
    pub fn new(channel: &'a Channel, iterations: usize) -> Self {
        let geometry = *channel.geometry();
        Self {
            channel,
            estimator: PhaseEstimator::new(geometry.slice_length(), iterations),
            overlap_add: OverlapAdd::new(geometry),
        }
    }

    /// Synthesizes `row` and returns the next finished block.
    ///
    /// # Errors
    /// See [`OverlapAdd::push`].
    pub fn next_block(&mut self, row: usize) -> SeparationResult<Vec<f32>> {
        let magnitudes = self.channel.magnitudes().row(row);
        let seed = self.channel.samples().row(row);
        let frame = self.estimator.estimate(&magnitudes, &seed)?;
        self.overlap_add.push(row, &frame)
    }

    /// Emits the trailing samples of the channel.
    ///
    /// # Errors
    /// See [`OverlapAdd::flush`].
    pub fn flush(&mut self) -> SeparationResult<Vec<f32>> {
        self.overlap_add.flush()
    }
}

/// Interleaves equally long per-channel blocks, scaling every sample by `gain`.
///
/// # Errors
/// Returns [`SeparationError::DimensionMismatch`] if the blocks differ in length.
pub fn interleave(blocks: &[Vec<f32>], gain: f32) -> SeparationResult<Vec<f32>> {
    let Some(first) = blocks.first() else {
        return Ok(Vec::new());
    };
    if let Some(other) = blocks.iter().find(|b| b.len() != first.len()) {
        return Err(SeparationError::dimension_mismatch(format!(
            "Channel blocks differ in length: {} vs {}",
            first.len(),
            other.len()
        )));
    }
    Ok((0..first.len())
        .flat_map(|index| blocks.iter().map(move |block| block[index] * gain))
        .collect())
}

/// Synthesizes `song` row by row and streams interleaved blocks into `sink`.
///
/// The token is checked before every row; on cancellation the sink is aborted and
/// [`SeparationStatus::Cancelled`] returned. On an error the sink is aborted as well.
///
/// # Errors
/// Propagates synthesis and sink errors.
pub fn write_song(
    song: &Song,
    sink: &mut dyn AudioSink,
    options: &SynthesisOptions,
    token: &CancellationToken,
) -> SeparationResult<SeparationStatus> {
    match write_rows(song, sink, options, token) {
        Ok(SeparationStatus::Cancelled) => {
            warn!(rows = song.rows(), "Write cancelled, aborting sink");
            sink.abort();
            Ok(SeparationStatus::Cancelled)
        }
        Ok(status) => Ok(status),
        Err(e) => {
            warn!(error = %e, "Write failed, aborting sink");
            sink.abort();
            Err(e)
        }
    }
}

fn write_rows(
    song: &Song,
    sink: &mut dyn AudioSink,
    options: &SynthesisOptions,
    token: &CancellationToken,
) -> SeparationResult<SeparationStatus> {
    let format = song.format();
    let mut synthesizers: Vec<ChannelSynthesizer<'_>> = song
        .channels()
        .iter()
        .map(|channel| ChannelSynthesizer::new(channel, options.phase_iterations))
        .collect();

    for row in 0..song.rows() {
        if token.is_cancelled() {
            return Ok(SeparationStatus::Cancelled);
        }
        let blocks = synthesizers
            .par_iter_mut()
            .map(|synthesizer| synthesizer.next_block(row))
            .collect::<SeparationResult<Vec<_>>>()?;
        sink.write_block(&interleave(&blocks, options.gain)?, format)?;
    }

    let tails = synthesizers
        .iter_mut()
        .map(ChannelSynthesizer::flush)
        .collect::<SeparationResult<Vec<_>>>()?;
    let tail = interleave(&tails, options.gain)?;
    if !tail.is_empty() {
        sink.write_block(&tail, format)?;
    }
    sink.flush()?;

    info!(
        rows = song.rows(),
        channels = song.channels().len(),
        samples = song.output_length(),
        "Song written"
    );
    Ok(SeparationStatus::Completed)
}
