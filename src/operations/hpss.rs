//! Harmonic/Percussive Source Separation (HPSS) by median filtering.
//!
//! Each magnitude matrix is median filtered twice: along every row with the percussive
//! half window and along every column with the harmonic half window. A logistic curve
//! over the percussive share of both estimates turns them into a soft mask.
//!
//! ## References
//!
//! - Fitzgerald, D. (2010). "Harmonic/percussive separation using median filtering"

use std::sync::Arc;

use tracing::info;

use super::median_filter::{column_medians, row_medians};
use super::traits::MaskingFunction;
use super::types::HarmonicPercussiveConfig;
use crate::SeparationResult;
use crate::matrix::{ElementOp, Matrix};
use crate::pipeline::CancellationToken;
use crate::repr::{Channel, Mask};

/// Median-filter masking function.
///
/// The mask side is the percussive content, the inverse side the harmonic content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarmonicPercussiveSeparation {
    config: HarmonicPercussiveConfig,
}

impl HarmonicPercussiveSeparation {
    /// Name reported in logs and pipeline errors.
    pub const NAME: &'static str = "harmonic/percussive";

    /// Creates a separator from a validated configuration.
    ///
    /// # Errors
    /// Returns the validation error of `config`.
    pub fn new(config: HarmonicPercussiveConfig) -> SeparationResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The separator configuration.
    pub const fn config(&self) -> &HarmonicPercussiveConfig {
        &self.config
    }

    /// `(harmonic, percussive)` median estimates of a channel's magnitudes, `None` once
    /// `token` is cancelled.
    pub fn medians(
        &self,
        channel: &Channel,
        token: &CancellationToken,
    ) -> Option<(Matrix, Matrix)> {
        let (harmonic_half, percussive_half) = self
            .config
            .half_windows(channel.format().sample_rate, channel.geometry());
        info!(harmonic_half, percussive_half, "Median filter half windows");

        let magnitudes = channel.magnitudes().materialize();
        let (harmonic, percussive) = rayon::join(
            || column_medians(magnitudes.view(), harmonic_half, token),
            || row_medians(magnitudes.view(), percussive_half, token),
        );
        Some((harmonic?.into(), percussive?.into()))
    }
}

impl MaskingFunction for HarmonicPercussiveSeparation {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn mask(
        &self,
        channel: &Channel,
        token: &CancellationToken,
    ) -> SeparationResult<Option<Mask>> {
        let Some((harmonic, percussive)) = self.medians(channel, token) else {
            return Ok(None);
        };
        let mask = Matrix::combine(
            Arc::new(harmonic),
            Arc::new(percussive),
            ElementOp::Logistic {
                k: self.config.k as f32,
            },
        )?;
        Mask::new(mask.materialize().into_owned()).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::{AudioFormat, FrameGeometry};
    use ndarray::Array2;

    /// 1 kHz channel with 16-sample slices and a 10 ms hop: a 50 ms harmonic and a
    /// 313 Hz percussive window both give a half window of 2.
    fn channel(magnitudes: Array2<f32>) -> Channel {
        let rows = magnitudes.nrows();
        Channel::new(
            AudioFormat::new(1000, 1, 16),
            FrameGeometry::new(16, 10).unwrap(),
            Matrix::zeros(rows, 16),
            magnitudes.into(),
        )
        .unwrap()
    }

    fn full_mask(separator: &HarmonicPercussiveSeparation, channel: &Channel) -> Mask {
        separator
            .mask(channel, &CancellationToken::new())
            .unwrap()
            .unwrap()
    }

    fn separator() -> HarmonicPercussiveSeparation {
        HarmonicPercussiveSeparation::new(HarmonicPercussiveConfig {
            harmonic_window_ms: 50,
            percussive_window_hz: 313,
            k: 10,
        })
        .unwrap()
    }

    #[test]
    fn test_neutral_mask_for_equal_estimates() {
        let mask = full_mask(&separator(), &channel(Array2::from_elem((6, 8), 3.0)));
        assert!(mask.values().iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_silence_is_neutral() {
        let mask = full_mask(
            &HarmonicPercussiveSeparation::default(),
            &channel(Array2::zeros((4, 8))),
        );
        assert!(mask.values().iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_click_is_percussive_and_tone_is_harmonic() {
        let mut magnitudes = Array2::from_elem((9, 8), 0.1f32);
        magnitudes.column_mut(2).fill(5.0);
        magnitudes.row_mut(4).fill(5.0);
        let mask = full_mask(&separator(), &channel(magnitudes));

        assert!(mask.get(4, 6) > 0.9);
        assert!(mask.get(0, 2) < 0.1);
        assert!(mask.values().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_half_windows_follow_geometry() {
        let channel = channel(Array2::zeros((2, 8)));
        let (harmonic_half, percussive_half) = separator()
            .config()
            .half_windows(channel.format().sample_rate, channel.geometry());
        assert_eq!((harmonic_half, percussive_half), (2, 2));
    }

    #[test]
    fn test_rejects_zero_windows() {
        let config = HarmonicPercussiveConfig {
            harmonic_window_ms: 0,
            ..HarmonicPercussiveConfig::new()
        };
        assert!(HarmonicPercussiveSeparation::new(config).is_err());
    }

    #[test]
    fn test_cancelled_token_skips_medians() {
        let token = CancellationToken::new();
        token.cancel();
        let channel = channel(Array2::from_elem((6, 8), 1.0));
        assert!(separator().medians(&channel, &token).is_none());
        assert!(separator().mask(&channel, &token).unwrap().is_none());
    }
}
