//! Stateless numeric primitives.
//!
//! These functions hold no global state and are safe to call from any worker.

use ndarray::ArrayView1;

/// Median of `values`, reordering the slice in place.
///
/// For an even number of values the lower of the two central order statistics is
/// returned, so every call site agrees on the same element. The median of an empty
/// slice is `0.0`.
pub fn median_in_place(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = (values.len() - 1) / 2;
    let (_, median, _) = values.select_nth_unstable_by(mid, f32::total_cmp);
    *median
}

/// Dot product of two equally long vectors.
pub fn dot_product(a: &ArrayView1<'_, f32>, b: &ArrayView1<'_, f32>) -> f32 {
    a.dot(b)
}

/// Euclidean (L2) norm of a vector.
pub fn euclidean_norm(a: &ArrayView1<'_, f32>) -> f32 {
    a.dot(a).sqrt()
}

/// Similarity of two unit vectors rescaled so that only the upper half of the cosine
/// range survives: an exact match yields 1, orthogonal or opposite vectors yield 0.
/// The result is clipped to `[0, 1]`.
pub fn rescaled_similarity(a: &ArrayView1<'_, f32>, b: &ArrayView1<'_, f32>) -> f32 {
    (2.0 * dot_product(a, b) - 1.0).clamp(0.0, 1.0)
}

/// Logistic soft mask from a harmonic and a percussive estimate.
///
/// `1 / (1 + exp(-k * (percussive / (harmonic + percussive) - 0.5)))`. When both estimates
/// are zero the ratio is taken as 0.5, which yields the neutral mask value 0.5.
pub fn logistic_mask(k: f32, harmonic: f32, percussive: f32) -> f32 {
    let total = harmonic + percussive;
    let ratio = if total == 0.0 { 0.5 } else { percussive / total };
    1.0 / (1.0 + (-k * (ratio - 0.5)).exp())
}

/// Duration of `frames` sample frames in milliseconds.
pub fn frames_to_milliseconds(frames: usize, sample_rate: u32) -> f64 {
    frames as f64 * 1000.0 / sample_rate as f64
}

/// Converts the length of a median region into the half-window `len` of a
/// `2 * len + 1` median, rounding half away from zero and clamping at 0.
pub fn region_to_half_window(region_length: f32) -> usize {
    ((region_length - 1.0) / 2.0).round().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median_in_place(&mut [5.0, 1.0, 3.0]), 3.0);
        // lower of the two central values
        assert_eq!(median_in_place(&mut [4.0, 1.0, 3.0, 2.0]), 2.0);
        assert_eq!(median_in_place(&mut [7.0]), 7.0);
        assert_eq!(median_in_place(&mut []), 0.0);
    }

    #[test]
    fn test_dot_and_norm() {
        let a = array![3.0f32, 4.0];
        let b = array![1.0f32, 0.0];
        assert_eq!(dot_product(&a.view(), &b.view()), 3.0);
        assert_eq!(euclidean_norm(&a.view()), 5.0);
    }

    #[test]
    fn test_rescaled_similarity_range() {
        let a = array![1.0f32, 0.0];
        let b = array![0.0f32, 1.0];
        let c = array![-1.0f32, 0.0];
        assert_eq!(rescaled_similarity(&a.view(), &a.view()), 1.0);
        assert_eq!(rescaled_similarity(&a.view(), &b.view()), 0.0);
        assert_eq!(rescaled_similarity(&a.view(), &c.view()), 0.0);
    }

    #[test]
    fn test_logistic_mask_neutral() {
        assert_eq!(logistic_mask(10.0, 2.0, 2.0), 0.5);
        assert_eq!(logistic_mask(10.0, 0.0, 0.0), 0.5);
        assert!(logistic_mask(10.0, 0.0, 1.0) > 0.99);
        assert!(logistic_mask(10.0, 1.0, 0.0) < 0.01);
    }

    #[test]
    fn test_region_to_half_window() {
        // 2048 * 1292 / 44100 bins
        assert_eq!(region_to_half_window(60.0), 30);
        // 325 ms at a hop of 512 / 44100 s
        let hop_ms = frames_to_milliseconds(512, 44100) as f32;
        assert_eq!(region_to_half_window(325.0 / hop_ms), 13);
        assert_eq!(region_to_half_window(0.5), 0);
    }
}
