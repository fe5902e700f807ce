//! Sliding median filters over rows, columns and diagonals.
//!
//! All filters pad their input by repeating the edge values, so the output has the same
//! length as the input and every window holds `2 * half_window + 1` values.

use ndarray::{Array2, ArrayView2, Zip};

use crate::matrix::{Matrix, SymmetricBandMatrix};
use crate::pipeline::CancellationToken;
use crate::utils::numeric::median_in_place;
use crate::{SeparationError, SeparationResult};

/// Median filter of `values` with a window of `2 * half_window + 1` samples.
///
/// `half_window == 0` returns the input unchanged.
pub fn median_filter(values: &[f32], half_window: usize) -> Vec<f32> {
    if half_window == 0 || values.len() < 2 {
        return values.to_vec();
    }

    let len = values.len();
    let last = len - 1;
    let mut window = Vec::with_capacity(2 * half_window + 1);

    (0..len)
        .map(|center| {
            window.clear();
            window.extend((0..=2 * half_window).map(|offset| {
                // edge padding: indices before 0 read values[0], after the end values[last]
                let index = (center + offset).saturating_sub(half_window).min(last);
                values[index]
            }));
            median_in_place(&mut window)
        })
        .collect()
}

/// Median filter applied independently to every row, rows in parallel.
///
/// Rows not yet started when `token` is cancelled are skipped and `None` is returned.
pub fn row_medians(
    matrix: ArrayView2<'_, f32>,
    half_window: usize,
    token: &CancellationToken,
) -> Option<Array2<f32>> {
    let mut filtered = Array2::zeros(matrix.dim());
    Zip::from(filtered.rows_mut())
        .and(matrix.rows())
        .par_for_each(|mut target, source| {
            if token.is_cancelled() {
                return;
            }
            let row = median_filter(&source.to_vec(), half_window);
            for (value, median) in target.iter_mut().zip(row) {
                *value = median;
            }
        });
    (!token.is_cancelled()).then_some(filtered)
}

/// Median filter applied independently to every column.
pub fn column_medians(
    matrix: ArrayView2<'_, f32>,
    half_window: usize,
    token: &CancellationToken,
) -> Option<Array2<f32>> {
    row_medians(matrix.t(), half_window, token).map(Array2::reversed_axes)
}

/// Median filter along every diagonal within `bandwidth` of the main diagonal of a
/// square `matrix`. Diagonals are read from the lower triangle and filtered in parallel.
///
/// Returns `Ok(None)` when `token` is cancelled; remaining diagonals are skipped.
///
/// # Errors
/// Returns [`SeparationError::DimensionMismatch`] if `matrix` is not square.
pub fn diagonal_medians(
    matrix: &Matrix,
    half_window: usize,
    bandwidth: usize,
    token: &CancellationToken,
) -> SeparationResult<Option<SymmetricBandMatrix>> {
    let (rows, columns) = matrix.dim();
    if rows != columns {
        return Err(SeparationError::dimension_mismatch(format!(
            "Diagonal medians need a square matrix, got {rows}x{columns}"
        )));
    }

    let mut band = SymmetricBandMatrix::zeros(rows, bandwidth);
    band.par_fill_diagonals(|offset, mut lane| {
        if token.is_cancelled() {
            return;
        }
        let diagonal: Vec<f32> = (0..rows - offset)
            .map(|j| matrix.get(j + offset, j))
            .collect();
        for (value, median) in lane.iter_mut().zip(median_filter(&diagonal, half_window)) {
            *value = median;
        }
    });
    Ok((!token.is_cancelled()).then_some(band))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_median_filter_removes_spike() {
        let filtered = median_filter(&[1.0, 1.0, 9.0, 1.0, 1.0], 1);
        assert_eq!(filtered, vec![1.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_median_filter_edge_padding() {
        // windows: [1,1,2] [1,2,3] [2,3,3]
        assert_eq!(median_filter(&[1.0, 2.0, 3.0], 1), vec![1.0, 2.0, 3.0]);
        // windows: [5,5,5,0,0] [5,5,0,0,0] [5,0,0,0,0]
        assert_eq!(median_filter(&[5.0, 0.0, 0.0], 2), vec![5.0, 0.0, 0.0]);
    }

    #[test]
    fn test_median_filter_constant_is_identity() {
        let values = vec![0.75f32; 17];
        for half in [0, 1, 4, 30] {
            assert_eq!(median_filter(&values, half), values);
        }
    }

    #[test]
    fn test_median_filter_zero_half_window() {
        assert_eq!(median_filter(&[3.0, 1.0, 2.0], 0), vec![3.0, 1.0, 2.0]);
        assert!(median_filter(&[], 3).is_empty());
    }

    #[test]
    fn test_row_and_column_medians() {
        let m = array![[1.0f32, 9.0, 1.0], [2.0, 2.0, 8.0], [3.0, 3.0, 3.0]];
        let token = CancellationToken::new();
        let rows = row_medians(m.view(), 1, &token).unwrap();
        assert_eq!(rows.row(0).to_vec(), vec![1.0, 1.0, 1.0]);
        assert_eq!(rows.row(1).to_vec(), vec![2.0, 2.0, 8.0]);

        let columns = column_medians(m.view(), 1, &token).unwrap();
        assert_eq!(columns.dim(), (3, 3));
        assert_eq!(columns.column(1).to_vec(), vec![9.0, 3.0, 3.0]);
        assert_eq!(columns.column(2).to_vec(), vec![1.0, 3.0, 3.0]);
    }

    #[test]
    fn test_diagonal_medians_symmetric_band() {
        let mut m = Array2::from_elem((5, 5), 1.0f32);
        m[[3, 1]] = 7.0;
        m[[1, 3]] = 7.0;
        let band = diagonal_medians(&m.into(), 1, 2, &CancellationToken::new())
            .unwrap()
            .unwrap();

        assert_eq!(band.bandwidth(), 2);
        for r in 0..5 {
            for c in 0..5 {
                assert_eq!(band.get(r, c), band.get(c, r));
            }
        }
        // the spike on diagonal 2 is filtered away
        assert_eq!(band.get(3, 1), 1.0);
        // outside the band
        assert_eq!(band.get(4, 0), 0.0);
    }

    #[test]
    fn test_diagonal_medians_rejects_non_square() {
        let m: Matrix = Array2::<f32>::zeros((2, 3)).into();
        assert!(diagonal_medians(&m, 1, 1, &CancellationToken::new()).is_err());
    }

    #[test]
    fn test_cancelled_token_skips_filtering() {
        let token = CancellationToken::new();
        token.cancel();
        let m = Array2::from_elem((6, 6), 1.0f32);
        assert!(row_medians(m.view(), 2, &token).is_none());
        assert!(column_medians(m.view(), 2, &token).is_none());
        assert!(diagonal_medians(&m.into(), 2, 3, &token).unwrap().is_none());
    }
}
