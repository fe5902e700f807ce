//! Configuration types for the separators and the coordinator.

use serde::{Deserialize, Serialize};

use crate::operations::synthesis::SynthesisOptions;
use crate::repr::{AudioFormat, FrameGeometry};
use crate::utils::numeric::region_to_half_window;
use crate::{SeparationError, SeparationResult};

/// Top-level configuration of a [`Separator`](crate::Separator).
///
/// Missing fields take their defaults when deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparatorConfig {
    /// Frame advance between analysis frames, in samples.
    pub hop_size_in_frames: usize,
    /// Length of one analysis frame, in samples.
    pub slice_length_in_frames: usize,
    /// Extent of the harmonic median window across frames (the time axis), in
    /// milliseconds of hop time.
    pub harmonic_window_ms: u32,
    /// Extent of the percussive median window across bins (the frequency axis), in
    /// Hz-equivalent units of the slice length.
    pub percussive_window_hz: u32,
    /// Steepness of the harmonic/percussive logistic mask.
    pub k: i32,
    /// Bandwidth of the self-similarity matrix (None = the maximum cluster distance).
    pub similarity_bandwidth: Option<usize>,
    /// Maximum number of rows in one background cluster.
    pub max_similar_rows: usize,
    /// PCM layout the audio source must deliver.
    pub target_format: AudioFormat,
    /// Scaling applied to every synthesized sample before it reaches a sink.
    pub output_gain: f32,
    /// Number of forward/inverse projections per synthesized frame.
    pub phase_iterations: usize,
    /// Size of the worker pool (None = number of logical CPUs).
    pub worker_threads: Option<usize>,
}

impl SeparatorConfig {
    /// Create a new configuration with default settings.
    ///
    /// - 2048-sample slices advanced by 512 samples
    /// - 325 ms harmonic and 1292 Hz percussive windows, k = 10
    /// - clusters of at most 10 rows
    /// - canonical 44.1 kHz/16 bit/stereo input, output scaled by 0.2
    /// - 5 phase iterations
    pub const fn new() -> Self {
        Self {
            hop_size_in_frames: 512,
            slice_length_in_frames: 2048,
            harmonic_window_ms: 325,
            percussive_window_hz: 1292,
            k: 10,
            similarity_bandwidth: None,
            max_similar_rows: 10,
            target_format: AudioFormat::canonical(),
            output_gain: 0.2,
            phase_iterations: 5,
            worker_threads: None,
        }
    }

    /// Sets the analysis frame geometry.
    pub const fn with_geometry(mut self, slice_length: usize, hop_size: usize) -> Self {
        self.slice_length_in_frames = slice_length;
        self.hop_size_in_frames = hop_size;
        self
    }

    /// Sets the format the audio source must deliver.
    pub const fn with_target_format(mut self, format: AudioFormat) -> Self {
        self.target_format = format;
        self
    }

    /// Sets the size of the worker pool.
    pub const fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidParameter`] naming the first offending field.
    pub fn validate(&self) -> SeparationResult<()> {
        self.geometry()?;
        self.target_format.validate()?;
        self.harmonic_percussive().validate()?;
        self.background_foreground().validate()?;
        self.synthesis().validate()?;

        if self.worker_threads == Some(0) {
            return Err(SeparationError::invalid_parameter(
                "Worker thread count must be greater than 0",
            ));
        }
        Ok(())
    }

    /// The analysis frame geometry.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidParameter`] for an invalid slice/hop pair.
    pub fn geometry(&self) -> SeparationResult<FrameGeometry> {
        FrameGeometry::new(self.slice_length_in_frames, self.hop_size_in_frames)
    }

    /// Configuration of the harmonic/percussive separator.
    pub const fn harmonic_percussive(&self) -> HarmonicPercussiveConfig {
        HarmonicPercussiveConfig {
            harmonic_window_ms: self.harmonic_window_ms,
            percussive_window_hz: self.percussive_window_hz,
            k: self.k,
        }
    }

    /// Configuration of the background/foreground separator.
    pub const fn background_foreground(&self) -> BackgroundForegroundConfig {
        let mut config = BackgroundForegroundConfig::new();
        config.max_similar_rows = self.max_similar_rows;
        config.similarity_bandwidth = self.similarity_bandwidth;
        config
    }

    /// Options of the synthesis stage.
    pub const fn synthesis(&self) -> SynthesisOptions {
        SynthesisOptions {
            gain: self.output_gain,
            phase_iterations: self.phase_iterations,
        }
    }

    /// Number of workers the pool is built with.
    pub fn resolved_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for median-filter harmonic/percussive separation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarmonicPercussiveConfig {
    /// Harmonic window extent across frames, in milliseconds of hop time.
    pub harmonic_window_ms: u32,
    /// Percussive window extent across bins, in Hz-equivalent units.
    pub percussive_window_hz: u32,
    /// Logistic steepness.
    pub k: i32,
}

impl HarmonicPercussiveConfig {
    /// 325 ms / 1292 Hz / k = 10.
    pub const fn new() -> Self {
        Self {
            harmonic_window_ms: 325,
            percussive_window_hz: 1292,
            k: 10,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidParameter`] if a window is zero.
    pub fn validate(&self) -> SeparationResult<()> {
        if self.harmonic_window_ms == 0 {
            return Err(SeparationError::invalid_parameter(
                "Harmonic window must be greater than 0 ms",
            ));
        }
        if self.percussive_window_hz == 0 {
            return Err(SeparationError::invalid_parameter(
                "Percussive window must be greater than 0 Hz",
            ));
        }
        Ok(())
    }

    /// Half-window lengths `(harmonic, percussive)` for the given analysis geometry.
    ///
    /// The harmonic region spans `harmonic_window_ms / hop_ms` frames and the percussive
    /// region `slice_length * percussive_window_hz / sample_rate` bins.
    pub fn half_windows(&self, sample_rate: u32, geometry: &FrameGeometry) -> (usize, usize) {
        let hop_ms = geometry.hop_duration_ms(sample_rate);
        let harmonic_region = f64::from(self.harmonic_window_ms) / hop_ms;
        let percussive_region = geometry.slice_length() as f64
            * f64::from(self.percussive_window_hz)
            / f64::from(sample_rate);
        (
            region_to_half_window(harmonic_region as f32),
            region_to_half_window(percussive_region as f32),
        )
    }
}

impl Default for HarmonicPercussiveConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimum and maximum row distance of background cluster candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterDistances {
    /// Smallest admissible distance between a row and a candidate.
    pub min: usize,
    /// Largest admissible distance between a row and a candidate.
    pub max: usize,
}

/// Configuration for self-similarity background/foreground separation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackgroundForegroundConfig {
    /// Assumed tempo of the recording.
    pub tempo_bpm: f64,
    /// Minimum candidate distance in beats.
    pub min_distance_beats: f64,
    /// Maximum candidate distance as a multiple of the minimum.
    pub max_distance_factor: usize,
    /// Maximum number of rows in one cluster, the seed row included.
    pub max_similar_rows: usize,
    /// Bandwidth of the self-similarity matrix (None = the maximum distance).
    pub similarity_bandwidth: Option<usize>,
    /// Number of lowest bins the background mask always passes through.
    pub retained_low_bins: usize,
    /// Half window of the diagonal median smoothing.
    pub diagonal_median_half_window: usize,
}

impl BackgroundForegroundConfig {
    /// 100 BPM, 2-beat minimum distance, maximum 10 times that, clusters of 10 rows,
    /// 5 retained low bins and a diagonal median half window of 10.
    pub const fn new() -> Self {
        Self {
            tempo_bpm: 100.0,
            min_distance_beats: 2.0,
            max_distance_factor: 10,
            max_similar_rows: 10,
            similarity_bandwidth: None,
            retained_low_bins: 5,
            diagonal_median_half_window: 10,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidParameter`] for a non-positive tempo or distance
    /// and for empty clusters.
    pub fn validate(&self) -> SeparationResult<()> {
        if !(self.tempo_bpm.is_finite() && self.tempo_bpm > 0.0) {
            return Err(SeparationError::invalid_parameter(format!(
                "Tempo must be a positive number of BPM, got {}",
                self.tempo_bpm
            )));
        }
        if !(self.min_distance_beats.is_finite() && self.min_distance_beats > 0.0) {
            return Err(SeparationError::invalid_parameter(format!(
                "Minimum distance must be a positive number of beats, got {}",
                self.min_distance_beats
            )));
        }
        if self.max_distance_factor == 0 {
            return Err(SeparationError::invalid_parameter(
                "Maximum distance factor must be greater than 0",
            ));
        }
        if self.max_similar_rows == 0 {
            return Err(SeparationError::invalid_parameter(
                "Clusters must admit at least one row",
            ));
        }
        Ok(())
    }

    /// Number of analysis frames per beat at the configured tempo.
    pub fn frames_per_beat(&self, sample_rate: u32, geometry: &FrameGeometry) -> f64 {
        let hop_ms = geometry.hop_duration_ms(sample_rate);
        let beats_per_ms = self.tempo_bpm / 60.0 / 1000.0;
        1.0 / (beats_per_ms * hop_ms)
    }

    /// Candidate distances in frames for the given analysis geometry.
    pub fn distances(&self, sample_rate: u32, geometry: &FrameGeometry) -> ClusterDistances {
        let min = (self.frames_per_beat(sample_rate, geometry) * self.min_distance_beats) as usize;
        ClusterDistances {
            min,
            max: min * self.max_distance_factor,
        }
    }
}

impl Default for BackgroundForegroundConfig {
    fn default() -> Self {
        Self::new()
    }
}
