// Correctness and logic
#![warn(clippy::unit_cmp)] // Detects comparing unit types
#![warn(clippy::match_same_arms)]
// Duplicate match arms

// Performance-focused
#![warn(clippy::inefficient_to_string)] // `format!("{}", x)` vs `x.to_string()`
#![warn(clippy::map_clone)] // Cloning inside `map()` unnecessarily
#![warn(clippy::unnecessary_to_owned)] // Detects redundant `.to_owned()` or `.clone()`
#![warn(clippy::large_stack_arrays)] // Helps avoid stack overflows
#![warn(clippy::needless_collect)] // Avoids `.collect().iter()` chains

// Style and idiomatic Rust
#![warn(clippy::redundant_clone)] // Detects unnecessary `.clone()`
#![warn(clippy::identity_op)] // e.g., `x + 0`, `x * 1`
#![warn(clippy::needless_return)] // Avoids `return` at the end of functions
#![warn(clippy::manual_map)] // Use `.map()` instead of manual `match`
#![warn(clippy::unwrap_used)] // Avoids using `unwrap()`

// Maintainability
#![warn(clippy::missing_panics_doc)] // Docs for functions that might panic
#![warn(clippy::missing_const_for_fn)] // Suggests making eligible functions `const`
#![deny(missing_docs)] // Documentation is a must for release

//! # audio_separator
//!
//! Separation of stereo recordings into two complementary pairs of signals:
//! harmonic vs. percussive content, and background (repeating) vs. foreground
//! (non-repeating) content.
//!
//! ## Overview
//!
//! A recording is analysed into a [`Song`]: per channel, a matrix of overlapping
//! time-domain frames and a matrix of their magnitude spectra. A [`MaskingFunction`]
//! derives a soft mask in `[0, 1]` from a channel; the channel is split into the masked
//! magnitudes and their complement, and both halves are resynthesized by iterative phase
//! estimation and overlap-add.
//!
//! Two masking functions are provided:
//!
//! - [`HarmonicPercussiveSeparation`] compares time-axis and frequency-axis median
//!   filtered magnitudes through a logistic curve.
//! - [`BackgroundForegroundSeparation`] clusters frames through a banded, smoothed and
//!   sharpened self-similarity matrix and keeps the per-cluster median as background.
//!
//! The [`Separator`] runs both on a fixed-size `rayon` pool and streams the four outputs
//! into [`AudioSink`]s. Decoding into canonical PCM and container writing are left to
//! the embedding application.
//!
//! ## Quick Start
//!
//! ```rust
//! use audio_separator::{
//!     AudioFormat, CancellationToken, InterleavedSource, MemorySink, SeparationSinks,
//!     Separator, SeparatorConfig, SeparationStatus,
//! };
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let format = AudioFormat::new(8000, 2, 16);
//! let samples: Vec<f32> = (0..4000).map(|i| (i as f32 * 0.01).sin() * 1000.0).collect();
//! let source = InterleavedSource::new(format, samples)?;
//!
//! let config = SeparatorConfig::new()
//!     .with_geometry(256, 64)
//!     .with_target_format(format);
//! let separator = Separator::new(config)?;
//!
//! let (mut background, mut foreground) = (MemorySink::new(), MemorySink::new());
//! let (mut percussive, mut harmonic) = (MemorySink::new(), MemorySink::new());
//! let status = separator.process(
//!     &source,
//!     SeparationSinks {
//!         background: &mut background,
//!         foreground: &mut foreground,
//!         percussive: &mut percussive,
//!         harmonic: &mut harmonic,
//!     },
//!     &CancellationToken::new(),
//! )?;
//! assert_eq!(status, SeparationStatus::Completed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! Progress is reported through the `tracing` facade; install a subscriber in the
//! application to see it.

pub mod error;
pub mod io;
pub mod matrix;
pub mod operations;
pub mod pipeline;
pub mod repr;
pub mod utils;

pub use error::{SeparationError, SeparationResult};
pub use io::{AudioSink, AudioSource, InterleavedSource, MemorySink};
pub use matrix::{ElementOp, Matrix, SymmetricBandMatrix};
pub use operations::{
    BackgroundForegroundConfig, BackgroundForegroundSeparation, HarmonicPercussiveConfig,
    HarmonicPercussiveSeparation, MaskingFunction, SeparatorConfig, SynthesisOptions,
};
pub use pipeline::{CancellationToken, SeparationSinks, SeparationStatus, Separator};
pub use repr::{AudioFormat, Channel, FrameGeometry, Mask, Song};
