//! Two-dimensional `f32` containers with materialized and lazy variants.
//!
//! A [`Matrix`] is either a materialized buffer that owns its storage or a view that
//! computes `get(row, column)` from its sources on demand. Views hold their sources
//! behind [`Arc`] and are never mutated; materialized buffers are only written by the
//! component that constructs them, before they are wrapped.

use std::borrow::Cow;
use std::sync::Arc;

use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayViewMut1, Axis, s};

use crate::utils::numeric::{logistic_mask, rescaled_similarity};
use crate::{SeparationError, SeparationResult};

/// Element-wise operators available to [`Matrix::Elementwise`] views.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementOp {
    /// `lhs * rhs` (Hadamard product).
    Multiply,
    /// `|lhs - 1|`, the complement of a mask in `[0, 1]`.
    Complement,
    /// [`logistic_mask`] with `lhs` as harmonic and `rhs` as percussive estimate.
    Logistic {
        /// Steepness of the logistic curve.
        k: f32,
    },
}

impl ElementOp {
    const fn is_binary(&self) -> bool {
        !matches!(self, ElementOp::Complement)
    }

    #[inline]
    fn apply(&self, lhs: f32, rhs: f32) -> f32 {
        match *self {
            ElementOp::Multiply => lhs * rhs,
            ElementOp::Complement => (lhs - 1.0).abs(),
            ElementOp::Logistic { k } => logistic_mask(k, lhs, rhs),
        }
    }
}

/// Square, symmetric matrix that only stores the diagonals within `bandwidth` of the
/// main diagonal. Entries outside the band read as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetricBandMatrix {
    size: usize,
    bandwidth: usize,
    /// `diagonals[[d, j]]` holds the entry at `(j + d, j)` and `(j, j + d)`.
    diagonals: Array2<f32>,
}

impl SymmetricBandMatrix {
    /// Creates a zero band matrix. The bandwidth is clamped to `size - 1`.
    pub fn zeros(size: usize, bandwidth: usize) -> Self {
        let bandwidth = bandwidth.min(size.saturating_sub(1));
        Self {
            size,
            bandwidth,
            diagonals: Array2::zeros((bandwidth + 1, size)),
        }
    }

    /// Number of rows (and columns).
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Largest stored distance from the main diagonal.
    pub const fn bandwidth(&self) -> usize {
        self.bandwidth
    }

    /// Returns the entry at `(row, column)`, zero outside the band.
    pub fn get(&self, row: usize, column: usize) -> f32 {
        let (low, high) = if row <= column { (row, column) } else { (column, row) };
        let offset = high - low;
        if offset > self.bandwidth || high >= self.size {
            return 0.0;
        }
        self.diagonals[[offset, low]]
    }

    /// Runs `fill(offset, diagonal)` for every stored diagonal on the current rayon pool.
    ///
    /// Each call exclusively owns its diagonal, a lane of length `size - offset`, so the
    /// closures never observe each other's writes.
    pub fn par_fill_diagonals<F>(&mut self, fill: F)
    where
        F: Fn(usize, ArrayViewMut1<'_, f32>) + Send + Sync,
    {
        let size = self.size;
        self.diagonals
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(offset, mut lane)| {
                let valid = size - offset;
                fill(offset, lane.slice_mut(s![..valid]));
            });
    }
}

/// A matrix of `f32` values, materialized or computed on demand.
#[derive(Debug, Clone)]
pub enum Matrix {
    /// Row-major buffer that owns its storage.
    Full(Array2<f32>),
    /// Banded symmetric buffer that owns its storage.
    Band(SymmetricBandMatrix),
    /// Element-wise combination of one or two sources of equal shape.
    Elementwise {
        /// First operand, which also defines the shape.
        lhs: Arc<Matrix>,
        /// Second operand for binary operators.
        rhs: Option<Arc<Matrix>>,
        /// Operator applied per element.
        op: ElementOp,
    },
    /// Banded self-similarity of the rows of a row-normalized feature matrix.
    ///
    /// `get(i, j)` is [`rescaled_similarity`] of rows `i` and `j` when `|i - j| <= bandwidth`
    /// and zero otherwise.
    SelfSimilarity {
        /// Feature rows, each of unit norm or all zero.
        features: Arc<Array2<f32>>,
        /// Largest row distance for which similarity is computed.
        bandwidth: usize,
    },
    /// Ridge-sharpened view of a square source: an entry reads zero whenever one of its
    /// four grid neighbours (clamped at the edges) holds a strictly larger value.
    Sharpened(Arc<Matrix>),
}

impl Matrix {
    /// Creates a materialized zero matrix.
    pub fn zeros(rows: usize, columns: usize) -> Self {
        Matrix::Full(Array2::zeros((rows, columns)))
    }

    /// Combines two matrices element-wise, lazily.
    ///
    /// # Errors
    /// Returns [`SeparationError::DimensionMismatch`] if the shapes differ.
    pub fn combine(lhs: Arc<Matrix>, rhs: Arc<Matrix>, op: ElementOp) -> SeparationResult<Self> {
        if !op.is_binary() {
            return Err(SeparationError::invalid_parameter(format!(
                "{op:?} is a unary operator"
            )));
        }
        if lhs.dim() != rhs.dim() {
            return Err(SeparationError::dimension_mismatch(format!(
                "Matrices must have same dimensions: {:?} vs {:?}",
                lhs.dim(),
                rhs.dim()
            )));
        }
        Ok(Matrix::Elementwise {
            lhs,
            rhs: Some(rhs),
            op,
        })
    }

    /// Lazy Hadamard product of two equally shaped matrices.
    ///
    /// # Errors
    /// Returns [`SeparationError::DimensionMismatch`] if the shapes differ.
    pub fn hadamard(lhs: Arc<Matrix>, rhs: Arc<Matrix>) -> SeparationResult<Self> {
        Self::combine(lhs, rhs, ElementOp::Multiply)
    }

    /// Lazy complement `|m - 1|` of a mask.
    pub const fn complement(source: Arc<Matrix>) -> Self {
        Matrix::Elementwise {
            lhs: source,
            rhs: None,
            op: ElementOp::Complement,
        }
    }

    /// Lazy ridge-sharpened view of a square matrix.
    ///
    /// # Errors
    /// Returns [`SeparationError::DimensionMismatch`] if the source is not square.
    pub fn sharpened(source: Arc<Matrix>) -> SeparationResult<Self> {
        let (rows, columns) = source.dim();
        if rows != columns {
            return Err(SeparationError::dimension_mismatch(format!(
                "Matrix must be square, got {rows}x{columns}"
            )));
        }
        Ok(Matrix::Sharpened(source))
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.dim().0
    }

    /// Number of columns.
    pub fn columns(&self) -> usize {
        self.dim().1
    }

    /// `(rows, columns)`.
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Matrix::Full(values) => values.dim(),
            Matrix::Band(band) => (band.size(), band.size()),
            Matrix::Elementwise { lhs, .. } => lhs.dim(),
            Matrix::SelfSimilarity { features, .. } => {
                let rows = features.nrows();
                (rows, rows)
            }
            Matrix::Sharpened(source) => source.dim(),
        }
    }

    /// Returns the value at `(row, column)`.
    ///
    /// # Panics
    /// Panics if the index is out of bounds for a materialized source.
    pub fn get(&self, row: usize, column: usize) -> f32 {
        match self {
            Matrix::Full(values) => values[[row, column]],
            Matrix::Band(band) => band.get(row, column),
            Matrix::Elementwise { lhs, rhs, op } => {
                let right = rhs.as_ref().map_or(0.0, |rhs| rhs.get(row, column));
                op.apply(lhs.get(row, column), right)
            }
            Matrix::SelfSimilarity {
                features,
                bandwidth,
            } => {
                if row.abs_diff(column) > *bandwidth {
                    return 0.0;
                }
                rescaled_similarity(&features.row(row), &features.row(column))
            }
            Matrix::Sharpened(source) => {
                let last = source.rows().saturating_sub(1);
                let value = source.get(row, column);
                let neighbours = [
                    ((row + 1).min(last), column),
                    (row.saturating_sub(1), column),
                    (row, (column + 1).min(last)),
                    (row, column.saturating_sub(1)),
                ];
                if neighbours
                    .iter()
                    .any(|&(r, c)| source.get(r, c) > value)
                {
                    0.0
                } else {
                    value
                }
            }
        }
    }

    /// Copies one row.
    pub fn row(&self, row: usize) -> Vec<f32> {
        match self {
            Matrix::Full(values) => values.row(row).to_vec(),
            _ => (0..self.columns()).map(|column| self.get(row, column)).collect(),
        }
    }

    /// Returns the values as a dense array, evaluating views row by row in parallel.
    pub fn materialize(&self) -> Cow<'_, Array2<f32>> {
        match self {
            Matrix::Full(values) => Cow::Borrowed(values),
            _ => {
                let mut values = Array2::zeros(self.dim());
                values
                    .axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .enumerate()
                    .for_each(|(row, mut lane)| {
                        for (column, value) in lane.iter_mut().enumerate() {
                            *value = self.get(row, column);
                        }
                    });
                Cow::Owned(values)
            }
        }
    }
}

impl From<Array2<f32>> for Matrix {
    fn from(values: Array2<f32>) -> Self {
        Matrix::Full(values)
    }
}

impl From<SymmetricBandMatrix> for Matrix {
    fn from(band: SymmetricBandMatrix) -> Self {
        Matrix::Band(band)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_band_matrix_is_symmetric_and_zero_outside_band() {
        let mut band = SymmetricBandMatrix::zeros(5, 1);
        band.par_fill_diagonals(|offset, mut lane| {
            if offset == 1 {
                lane[1] = 0.75;
            }
        });
        assert_eq!(band.get(1, 2), 0.75);
        assert_eq!(band.get(2, 1), 0.75);
        assert_eq!(band.get(0, 4), 0.0);
        assert_eq!(band.get(4, 5), 0.0);
    }

    #[test]
    fn test_band_width_clamped_to_size() {
        let band = SymmetricBandMatrix::zeros(3, 100);
        assert_eq!(band.bandwidth(), 2);
        let empty = SymmetricBandMatrix::zeros(0, 10);
        assert_eq!(empty.bandwidth(), 0);
    }

    #[test]
    fn test_par_fill_diagonals_writes_lanes() {
        let mut band = SymmetricBandMatrix::zeros(4, 2);
        band.par_fill_diagonals(|offset, mut lane| {
            assert_eq!(lane.len(), 4 - offset);
            lane.fill(offset as f32 + 1.0);
        });
        assert_eq!(band.get(0, 0), 1.0);
        assert_eq!(band.get(3, 2), 2.0);
        assert_eq!(band.get(1, 3), 3.0);
        assert_eq!(band.get(0, 3), 0.0);
    }

    #[test]
    fn test_complement_is_exact() {
        let mask = Arc::new(Matrix::Full(array![[0.0f32, 0.1, 0.25], [0.5, 0.9, 1.0]]));
        let inverse = Matrix::complement(mask.clone());
        for row in 0..2 {
            for column in 0..3 {
                assert_eq!(mask.get(row, column) + inverse.get(row, column), 1.0);
            }
        }
    }

    #[test]
    fn test_hadamard_dimension_mismatch() {
        let a = Arc::new(Matrix::zeros(2, 3));
        let b = Arc::new(Matrix::zeros(3, 2));
        assert!(matches!(
            Matrix::hadamard(a, b),
            Err(SeparationError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_hadamard_view() {
        let a = Arc::new(Matrix::Full(array![[1.0f32, 2.0], [3.0, 4.0]]));
        let b = Arc::new(Matrix::Full(array![[0.5f32, 0.0], [1.0, 0.25]]));
        let product = Matrix::hadamard(a, b).unwrap();
        assert!(matches!(product, Matrix::Elementwise { .. }));
        assert_eq!(
            product.materialize().into_owned(),
            array![[0.5f32, 0.0], [3.0, 1.0]]
        );
        assert_eq!(product.row(1), vec![3.0, 1.0]);
    }

    #[test]
    fn test_sharpened_keeps_ridges_only() {
        let source = Arc::new(Matrix::Full(array![
            [1.0f32, 0.2, 0.1],
            [0.2, 1.0, 0.5],
            [0.1, 0.5, 1.0],
        ]));
        let sharp = Matrix::sharpened(source).unwrap();
        assert_eq!(sharp.get(0, 0), 1.0);
        assert_eq!(sharp.get(1, 1), 1.0);
        assert_eq!(sharp.get(0, 1), 0.0);
        assert_eq!(sharp.get(1, 2), 0.0);
        // only neighbours are (0, 1) = 0.2 and (1, 2) = 0.5 after clamping
        assert_eq!(sharp.get(0, 2), 0.0);
    }

    #[test]
    fn test_sharpened_rejects_non_square() {
        let source = Arc::new(Matrix::zeros(2, 3));
        assert!(Matrix::sharpened(source).is_err());
    }
}
