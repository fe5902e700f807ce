//! Background/foreground separation by clustering repeated frames.
//!
//! Frames that repeat at musically plausible distances (between two beats and twenty
//! beats at an assumed tempo) are grouped into clusters through the sharpened
//! self-similarity matrix. The per-bin median of a cluster is its steady background
//! template; each frame keeps at most that much of its magnitude in the background mask.

use ndarray::Array2;
use rayon::prelude::*;
use tracing::debug;

use super::similarity::SelfSimilarity;
use super::traits::MaskingFunction;
use super::types::{BackgroundForegroundConfig, ClusterDistances};
use crate::SeparationResult;
use crate::matrix::Matrix;
use crate::pipeline::CancellationToken;
use crate::repr::{Channel, Mask};
use crate::utils::numeric::median_in_place;

/// Self-similarity based background/foreground masking function.
///
/// The mask side is the background (repeating) content, the inverse side the
/// foreground.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackgroundForegroundSeparation {
    config: BackgroundForegroundConfig,
}

impl BackgroundForegroundSeparation {
    /// Name reported in logs and pipeline errors.
    pub const NAME: &'static str = "background/foreground";

    /// Creates a separator from a validated configuration.
    ///
    /// # Errors
    /// Returns the validation error of `config`.
    pub fn new(config: BackgroundForegroundConfig) -> SeparationResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The separator configuration.
    pub const fn config(&self) -> &BackgroundForegroundConfig {
        &self.config
    }

    /// Candidate distances for the channel's sample rate and hop size.
    pub fn distances(&self, channel: &Channel) -> ClusterDistances {
        self.config
            .distances(channel.format().sample_rate, channel.geometry())
    }

    /// Bandwidth of the similarity matrix, clamped to the channel's rows.
    pub fn bandwidth(&self, channel: &Channel, distances: ClusterDistances) -> usize {
        self.config
            .similarity_bandwidth
            .unwrap_or(distances.max)
            .min(channel.rows().saturating_sub(1))
    }

    /// Groups the rows of a square similarity matrix into disjoint clusters.
    ///
    /// Rows are visited in order. An unvisited row seeds a cluster together with the
    /// unvisited rows at a distance within `distances` that have a positive similarity
    /// to it; candidates are ranked by descending similarity, then ascending row index,
    /// and the cluster is cut at `max_similar_rows` rows, the seed included. Every row
    /// ends up in exactly one cluster.
    ///
    /// `token` is polled before every seed row; a cancelled token yields `None`.
    pub fn clusters(
        &self,
        similarity: &Matrix,
        distances: ClusterDistances,
        token: &CancellationToken,
    ) -> Option<Vec<Vec<usize>>> {
        let rows = similarity.rows();
        let limit = self.config.max_similar_rows.max(1);
        let mut assigned = vec![false; rows];
        let mut clusters = Vec::new();

        for row in 0..rows {
            if assigned[row] {
                continue;
            }
            if token.is_cancelled() {
                return None;
            }

            let first = row.saturating_sub(distances.max);
            let last = row.saturating_add(distances.max).min(rows - 1);
            let mut candidates: Vec<(usize, f32)> = (first..=last)
                .filter(|&other| {
                    other != row && !assigned[other] && row.abs_diff(other) >= distances.min
                })
                .filter_map(|other| {
                    let value = similarity.get(row, other);
                    (value > 0.0).then_some((other, value))
                })
                .collect();
            candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

            let mut cluster = Vec::with_capacity(limit.min(candidates.len() + 1));
            cluster.push(row);
            cluster.extend(candidates.into_iter().take(limit - 1).map(|(other, _)| other));
            for &member in &cluster {
                assigned[member] = true;
            }
            clusters.push(cluster);
        }
        Some(clusters)
    }

    /// Mask rows of one cluster: `min(1, median / magnitude)` per bin, 0 for a zero
    /// magnitude, and 1 for the retained low bins.
    fn cluster_mask(&self, magnitudes: &Array2<f32>, cluster: &[usize]) -> Vec<(usize, Vec<f32>)> {
        let columns = magnitudes.ncols();
        let mut scratch = Vec::with_capacity(cluster.len());
        let template: Vec<f32> = (0..columns)
            .map(|column| {
                scratch.clear();
                scratch.extend(cluster.iter().map(|&row| magnitudes[[row, column]]));
                median_in_place(&mut scratch)
            })
            .collect();

        cluster
            .iter()
            .map(|&row| {
                let values = template
                    .iter()
                    .enumerate()
                    .map(|(column, &median)| {
                        if column < self.config.retained_low_bins {
                            return 1.0;
                        }
                        let magnitude = magnitudes[[row, column]];
                        if magnitude == 0.0 {
                            0.0
                        } else {
                            (median / magnitude).min(1.0)
                        }
                    })
                    .collect();
                (row, values)
            })
            .collect()
    }
}

impl MaskingFunction for BackgroundForegroundSeparation {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn mask(
        &self,
        channel: &Channel,
        token: &CancellationToken,
    ) -> SeparationResult<Option<Mask>> {
        let distances = self.distances(channel);
        let bandwidth = self.bandwidth(channel, distances);
        debug!(
            frames_per_beat = self
                .config
                .frames_per_beat(channel.format().sample_rate, channel.geometry()),
            min_distance = distances.min,
            max_distance = distances.max,
            bandwidth,
            "Background cluster distances"
        );

        let Some(similarity) =
            SelfSimilarity::new(bandwidth, self.config.diagonal_median_half_window)
                .compute(channel.magnitudes(), token)?
        else {
            return Ok(None);
        };
        let Some(clusters) = self.clusters(&similarity, distances, token) else {
            debug!(rows = channel.rows(), "Clustering cancelled");
            return Ok(None);
        };
        debug!(
            rows = channel.rows(),
            clusters = clusters.len(),
            "Clustered repeating frames"
        );

        let magnitudes = channel.magnitudes().materialize();
        let cluster_rows: Vec<Vec<(usize, Vec<f32>)>> = clusters
            .par_iter()
            .map(|cluster| self.cluster_mask(&magnitudes, cluster))
            .collect();

        let mut mask = Array2::zeros(magnitudes.dim());
        for (row, values) in cluster_rows.into_iter().flatten() {
            for (target, value) in mask.row_mut(row).iter_mut().zip(values) {
                *target = value;
            }
        }
        Mask::new(mask).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::{AudioFormat, FrameGeometry};
    use ndarray::array;

    /// 8 Hz channel whose hop equals its bin count: 4 bins give cluster distances of
    /// 2 to 20 frames, 6 or 8 bins give 1 to 10.
    fn channel(magnitudes: Array2<f32>) -> Channel {
        let bins = magnitudes.ncols();
        let rows = magnitudes.nrows();
        Channel::new(
            AudioFormat::new(8, 1, 16),
            FrameGeometry::new(bins * 2, bins).unwrap(),
            Matrix::zeros(rows, bins * 2),
            magnitudes.into(),
        )
        .unwrap()
    }

    fn pseudo_random(rows: usize, columns: usize) -> Array2<f32> {
        let mut state = 0x2545_f491_u32;
        Array2::from_shape_fn((rows, columns), |_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 1000) as f32 / 100.0
        })
    }

    fn full_mask(separator: &BackgroundForegroundSeparation, channel: &Channel) -> Mask {
        separator
            .mask(channel, &CancellationToken::new())
            .unwrap()
            .unwrap()
    }

    fn separator(retained_low_bins: usize, max_similar_rows: usize) -> BackgroundForegroundSeparation {
        let mut config = BackgroundForegroundConfig::new();
        config.retained_low_bins = retained_low_bins;
        config.max_similar_rows = max_similar_rows;
        config.diagonal_median_half_window = 1;
        BackgroundForegroundSeparation::new(config).unwrap()
    }

    #[test]
    fn test_distances_for_small_geometry() {
        let channel = channel(Array2::ones((8, 4)));
        let distances = BackgroundForegroundSeparation::default().distances(&channel);
        assert_eq!(distances, ClusterDistances { min: 2, max: 20 });
        assert_eq!(
            BackgroundForegroundSeparation::default().bandwidth(&channel, distances),
            7
        );
    }

    #[test]
    fn test_constant_repeating_spectrum_masks_to_one() {
        let magnitudes = Array2::from_shape_fn((8, 4), |(_, c)| c as f32 + 1.0);
        let channel = channel(magnitudes);
        let separator = separator(0, 10);

        let mask = full_mask(&separator, &channel);
        assert_eq!(mask.dim(), (8, 4));
        assert!(mask.values().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_clusters_cover_every_row_once() {
        let channel = channel(pseudo_random(40, 6));
        let separator = separator(5, 3);
        let distances = separator.distances(&channel);
        let token = CancellationToken::new();
        let similarity = SelfSimilarity::new(separator.bandwidth(&channel, distances), 1)
            .compute(channel.magnitudes(), &token)
            .unwrap()
            .unwrap();
        let clusters = separator.clusters(&similarity, distances, &token).unwrap();

        let mut seen = vec![0usize; 40];
        for cluster in &clusters {
            assert!(!cluster.is_empty() && cluster.len() <= 3);
            for &row in cluster {
                seen[row] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn test_clusters_rank_by_similarity_then_row() {
        let mut similarity = Array2::<f32>::zeros((6, 6));
        for (i, j, value) in [(0, 1, 0.5), (0, 2, 0.9), (0, 3, 0.5), (4, 5, 0.2)] {
            similarity[[i, j]] = value;
            similarity[[j, i]] = value;
        }
        let clusters = separator(5, 3)
            .clusters(
                &similarity.into(),
                ClusterDistances { min: 1, max: 5 },
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(clusters, vec![vec![0, 2, 1], vec![3], vec![4, 5]]);
    }

    #[test]
    fn test_clusters_respect_minimum_distance() {
        let similarity: Matrix = Array2::<f32>::ones((5, 5)).into();
        let clusters = separator(5, 10)
            .clusters(
                &similarity,
                ClusterDistances { min: 2, max: 3 },
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(clusters, vec![vec![0, 2, 3], vec![1, 4]]);
    }

    #[test]
    fn test_low_bins_are_always_retained() {
        let channel = channel(pseudo_random(30, 8));
        let mask = full_mask(&BackgroundForegroundSeparation::default(), &channel);
        for row in 0..30 {
            for column in 0..8 {
                let value = mask.get(row, column);
                if column < 5 {
                    assert_eq!(value, 1.0);
                } else {
                    assert!((0.0..=1.0).contains(&value));
                }
            }
        }
    }

    #[test]
    fn test_zero_energy_row_masks_to_zero() {
        let mut magnitudes = pseudo_random(12, 4);
        magnitudes.row_mut(5).fill(0.0);
        let mask = full_mask(&separator(0, 10), &channel(magnitudes.clone()));
        assert_eq!(mask.values().row(5).to_vec(), vec![0.0; 4]);
        assert!(mask.values().iter().all(|v| v.is_finite()));

        let mask = full_mask(&separator(2, 10), &channel(magnitudes));
        assert_eq!(mask.values().row(5).to_vec(), vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_cluster_mask_clamps_ratio() {
        let magnitudes = array![[2.0f32, 4.0], [4.0, 4.0], [8.0, 0.0]];
        let rows = separator(0, 10).cluster_mask(&magnitudes, &[0, 1, 2]);
        // template = [4, 4]
        assert_eq!(rows[0], (0, vec![1.0, 1.0]));
        assert_eq!(rows[1], (1, vec![1.0, 1.0]));
        assert_eq!(rows[2], (2, vec![0.5, 0.0]));
    }

    #[test]
    fn test_cancelled_token_stops_masking() {
        let channel = channel(pseudo_random(30, 8));
        let token = CancellationToken::new();
        token.cancel();
        let separator = BackgroundForegroundSeparation::default();
        assert!(separator.mask(&channel, &token).unwrap().is_none());

        let similarity: Matrix = Array2::<f32>::ones((5, 5)).into();
        assert!(
            separator
                .clusters(&similarity, ClusterDistances { min: 1, max: 3 }, &token)
                .is_none()
        );
    }
}
