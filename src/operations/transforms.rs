//! Framing and magnitude spectra of one channel.
//!
//! Frames are taken with a rectangular window: row `r` holds the `slice_length` samples
//! starting at sample `r * hop_size`. Magnitudes are the first `slice_length / 2` bins of
//! each frame's FFT, computed with one cached `rustfft` plan.

use std::sync::Arc;

use ndarray::{Array2, Zip};
use rustfft::{Fft, FftPlanner, num_complex::Complex};

use crate::repr::FrameGeometry;
use crate::{SeparationError, SeparationResult};

/// Turns a sample stream into a frame matrix and a magnitude matrix.
#[derive(Clone)]
pub struct SpectralAnalyzer {
    geometry: FrameGeometry,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("geometry", &self.geometry)
            .finish_non_exhaustive()
    }
}

impl SpectralAnalyzer {
    /// Plans the forward transform for `geometry`.
    pub fn new(geometry: FrameGeometry) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(geometry.slice_length());
        Self { geometry, fft }
    }

    /// Frame geometry of the analyzer.
    pub const fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    /// Slices `samples` into overlapping frames, dropping a partial last frame.
    pub fn frames(&self, samples: &[f32]) -> Array2<f32> {
        let rows = self.geometry.frame_count(samples.len());
        let hop = self.geometry.hop_size();
        Array2::from_shape_fn((rows, self.geometry.slice_length()), |(row, column)| {
            samples[row * hop + column]
        })
    }

    /// Magnitudes of the first `slice_length / 2` bins of every frame, rows in parallel.
    ///
    /// # Errors
    /// Returns [`SeparationError::DimensionMismatch`] if the frames are not
    /// `slice_length` samples long.
    pub fn magnitudes(&self, frames: &Array2<f32>) -> SeparationResult<Array2<f32>> {
        if frames.ncols() != self.geometry.slice_length() {
            return Err(SeparationError::dimension_mismatch(format!(
                "Frames must hold {} samples, got {}",
                self.geometry.slice_length(),
                frames.ncols()
            )));
        }

        let mut magnitudes = Array2::zeros((frames.nrows(), self.geometry.bins()));
        Zip::from(magnitudes.rows_mut())
            .and(frames.rows())
            .par_for_each(|mut target, frame| {
                let mut buffer: Vec<Complex<f32>> =
                    frame.iter().map(|&x| Complex::new(x, 0.0)).collect();
                self.fft.process(&mut buffer);
                for (magnitude, bin) in target.iter_mut().zip(&buffer) {
                    *magnitude = bin.norm();
                }
            });
        Ok(magnitudes)
    }

    /// Frames `samples` and computes their magnitudes: `(frames, magnitudes)`.
    ///
    /// # Errors
    /// See [`SpectralAnalyzer::magnitudes`].
    pub fn analyze(&self, samples: &[f32]) -> SeparationResult<(Array2<f32>, Array2<f32>)> {
        let frames = self.frames(samples);
        let magnitudes = self.magnitudes(&frames)?;
        Ok((frames, magnitudes))
    }
}
