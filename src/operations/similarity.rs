//! Banded self-similarity of analysis frames.
//!
//! The engine runs in four stages:
//!
//! 1. every magnitude row is scaled to unit Euclidean norm (zero rows stay zero)
//! 2. a lazy banded view computes `max(0, 2 * dot(row_i, row_j) - 1)` for `|i - j| <= bandwidth`
//! 3. every diagonal of the band is median filtered into a new [`SymmetricBandMatrix`]
//! 4. a lazy sharpened view zeroes entries that have a strictly larger grid neighbour
//!
//! Stages 1 and 3 run in parallel, one row or one diagonal per task.

use std::sync::Arc;

use ndarray::parallel::prelude::*;
use ndarray::{Array2, Axis};
use tracing::debug;

use super::median_filter::diagonal_medians;
use crate::SeparationResult;
use crate::matrix::Matrix;
use crate::pipeline::CancellationToken;
use crate::utils::numeric::euclidean_norm;

/// Builds the sharpened, banded self-similarity matrix of a magnitude matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfSimilarity {
    bandwidth: usize,
    diagonal_half_window: usize,
}

impl SelfSimilarity {
    /// Half window of the diagonal median smoothing used by default.
    pub const DEFAULT_DIAGONAL_HALF_WINDOW: usize = 10;

    /// Creates an engine for the given band and diagonal median half window.
    pub const fn new(bandwidth: usize, diagonal_half_window: usize) -> Self {
        Self {
            bandwidth,
            diagonal_half_window,
        }
    }

    /// Largest row distance for which similarity is computed.
    pub const fn bandwidth(&self) -> usize {
        self.bandwidth
    }

    /// Scales every row to unit Euclidean norm, rows in parallel.
    pub fn normalize_rows(magnitudes: &Matrix) -> Array2<f32> {
        let mut features = magnitudes.materialize().into_owned();
        features
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .for_each(|mut row| {
                let norm = euclidean_norm(&row.view());
                if norm > 0.0 {
                    row.mapv_inplace(|v| v / norm);
                }
            });
        features
    }

    /// Lazy banded similarity of the normalized rows of `magnitudes`.
    pub fn similarity(&self, magnitudes: &Matrix) -> Matrix {
        let features = Self::normalize_rows(magnitudes);
        debug!(rows = features.nrows(), "Normalized magnitude rows");
        Matrix::SelfSimilarity {
            features: Arc::new(features),
            bandwidth: self.bandwidth,
        }
    }

    /// Runs all four stages, returning `Ok(None)` once `token` is cancelled.
    ///
    /// # Errors
    /// Propagates errors of the diagonal median stage.
    pub fn compute(
        &self,
        magnitudes: &Matrix,
        token: &CancellationToken,
    ) -> SeparationResult<Option<Matrix>> {
        let similarity = self.similarity(magnitudes);
        if token.is_cancelled() {
            return Ok(None);
        }
        let Some(smoothed) =
            diagonal_medians(&similarity, self.diagonal_half_window, self.bandwidth, token)?
        else {
            debug!("Similarity smoothing cancelled");
            return Ok(None);
        };
        debug!(
            size = smoothed.size(),
            bandwidth = smoothed.bandwidth(),
            half_window = self.diagonal_half_window,
            "Smoothed similarity diagonals"
        );
        let sharpened = Matrix::sharpened(Arc::new(Matrix::Band(smoothed)))?;
        debug!("Sharpened similarity ridges");
        Ok(Some(sharpened))
    }
}

impl Default for SelfSimilarity {
    fn default() -> Self {
        Self::new(usize::MAX, Self::DEFAULT_DIAGONAL_HALF_WINDOW)
    }
}
