//! Analysis, separation and synthesis operations.
//!
//! ## Module Organization
//!
//! - [`traits`] - the [`MaskingFunction`] seam shared by both separators
//! - [`types`] - configuration types
//! - [`transforms`] - framing and magnitude spectra
//! - [`median_filter`] - sliding medians along rows, columns and diagonals
//! - [`similarity`] - banded self-similarity of analysis frames
//! - [`background_foreground`] - repeating/non-repeating separation
//! - [`hpss`] - harmonic/percussive separation
//! - [`synthesis`] - phase estimation and overlap-add resynthesis

pub mod traits;
pub mod types;

pub mod background_foreground;
pub mod hpss;
pub mod median_filter;
pub mod similarity;
pub mod synthesis;
pub mod transforms;

pub use background_foreground::BackgroundForegroundSeparation;
pub use hpss::HarmonicPercussiveSeparation;
pub use similarity::SelfSimilarity;
pub use synthesis::{ChannelSynthesizer, OverlapAdd, PhaseEstimator, SynthesisOptions};
pub use traits::MaskingFunction;
pub use transforms::SpectralAnalyzer;
pub use types::{
    BackgroundForegroundConfig, ClusterDistances, HarmonicPercussiveConfig, SeparatorConfig,
};
