//! Core data structures: audio format, frame geometry, masks, channels and songs.
//!
//! A [`Song`] owns one [`Channel`] per audio channel. Every channel carries two matrices
//! that share their row indexing: `samples` (one analysis frame of `slice_length`
//! time-domain samples per row) and `magnitudes` (the first `slice_length / 2` magnitude
//! bins of that frame). Channels are immutable; separation produces new channels that
//! share the original `samples` as phase seeds.

use std::fmt;
use std::sync::Arc;

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::io::{AudioSink, AudioSource};
use crate::matrix::Matrix;
use crate::operations::synthesis::{SynthesisOptions, write_song};
use crate::operations::traits::MaskingFunction;
use crate::operations::transforms::SpectralAnalyzer;
use crate::pipeline::{CancellationToken, SeparationStatus};
use crate::utils::numeric::frames_to_milliseconds;
use crate::{SeparationError, SeparationResult};

/// PCM layout of a source or sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: usize,
    /// Bit depth of the PCM samples.
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Creates a new format descriptor.
    pub const fn new(sample_rate: u32, channels: usize, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// Signed 16-bit stereo PCM at 44.1 kHz, the layout the analyzer expects by default.
    pub const fn canonical() -> Self {
        Self::new(44100, 2, 16)
    }

    /// Validates the format descriptor.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidParameter`] for a zero sample rate, channel
    /// count or bit depth.
    pub fn validate(&self) -> SeparationResult<()> {
        if self.sample_rate == 0 {
            return Err(SeparationError::invalid_parameter(
                "Sample rate must be greater than 0",
            ));
        }
        if self.channels == 0 {
            return Err(SeparationError::invalid_parameter(
                "Channel count must be greater than 0",
            ));
        }
        if self.bits_per_sample == 0 {
            return Err(SeparationError::invalid_parameter(
                "Bits per sample must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::canonical()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} bit, {} channel(s)",
            self.sample_rate, self.bits_per_sample, self.channels
        )
    }
}

/// Slicing of a sample stream into overlapping analysis frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameGeometry {
    slice_length: usize,
    hop_size: usize,
}

impl FrameGeometry {
    /// Creates a validated geometry.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidParameter`] unless `1 <= hop_size <= slice_length`
    /// and `slice_length` is even and at least 2.
    pub fn new(slice_length: usize, hop_size: usize) -> SeparationResult<Self> {
        if hop_size == 0 {
            return Err(SeparationError::invalid_parameter(
                "Hop size must be greater than 0",
            ));
        }
        if slice_length < 2 || slice_length % 2 != 0 {
            return Err(SeparationError::invalid_parameter(format!(
                "Slice length must be even and at least 2, got {slice_length}"
            )));
        }
        if hop_size > slice_length {
            return Err(SeparationError::invalid_parameter(format!(
                "Hop size {hop_size} cannot be larger than slice length {slice_length}"
            )));
        }
        Ok(Self {
            slice_length,
            hop_size,
        })
    }

    /// Samples per analysis frame.
    pub const fn slice_length(&self) -> usize {
        self.slice_length
    }

    /// Frame advance in samples.
    pub const fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Number of magnitude bins per frame.
    pub const fn bins(&self) -> usize {
        self.slice_length / 2
    }

    /// Number of complete frames in a stream of `samples` samples.
    ///
    /// A partial trailing frame is dropped rather than zero-padded.
    pub const fn frame_count(&self, samples: usize) -> usize {
        if samples < self.slice_length {
            0
        } else {
            (samples - self.slice_length) / self.hop_size + 1
        }
    }

    /// Number of samples the overlap-add of `rows` frames produces.
    pub const fn output_length(&self, rows: usize) -> usize {
        if rows == 0 {
            0
        } else {
            (rows - 1) * self.hop_size + self.slice_length
        }
    }

    /// Duration of one hop in milliseconds.
    pub fn hop_duration_ms(&self, sample_rate: u32) -> f64 {
        frames_to_milliseconds(self.hop_size, sample_rate)
    }
}

/// Soft mask with every entry in `[0, 1]`, shaped like the magnitudes it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    values: Array2<f32>,
}

impl Mask {
    /// Wraps a materialized matrix of mask values.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidParameter`] if any value lies outside `[0, 1]`
    /// or is not a number.
    pub fn new(values: Array2<f32>) -> SeparationResult<Self> {
        if let Some(bad) = values.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(SeparationError::invalid_parameter(format!(
                "Mask values must lie in [0, 1], found {bad}"
            )));
        }
        Ok(Self { values })
    }

    /// `(rows, columns)`.
    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Value at `(row, column)`.
    pub fn get(&self, row: usize, column: usize) -> f32 {
        self.values[[row, column]]
    }

    /// The mask values.
    pub const fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// Converts the mask into a materialized matrix.
    pub fn into_matrix(self) -> Matrix {
        Matrix::Full(self.values)
    }
}

/// One audio channel of a [`Song`].
#[derive(Debug, Clone)]
pub struct Channel {
    format: AudioFormat,
    geometry: FrameGeometry,
    samples: Arc<Matrix>,
    magnitudes: Arc<Matrix>,
}

impl Channel {
    /// Creates a channel from its time-domain frames and magnitude spectra.
    ///
    /// # Errors
    /// Returns [`SeparationError::DimensionMismatch`] if the matrices disagree on their
    /// rows or do not match the geometry.
    pub fn new(
        format: AudioFormat,
        geometry: FrameGeometry,
        samples: Matrix,
        magnitudes: Matrix,
    ) -> SeparationResult<Self> {
        Self::from_shared(format, geometry, Arc::new(samples), Arc::new(magnitudes))
    }

    fn from_shared(
        format: AudioFormat,
        geometry: FrameGeometry,
        samples: Arc<Matrix>,
        magnitudes: Arc<Matrix>,
    ) -> SeparationResult<Self> {
        if samples.rows() != magnitudes.rows() {
            return Err(SeparationError::dimension_mismatch(format!(
                "Samples have {} rows but magnitudes have {}",
                samples.rows(),
                magnitudes.rows()
            )));
        }
        if samples.columns() != geometry.slice_length() {
            return Err(SeparationError::dimension_mismatch(format!(
                "Sample frames must hold {} samples, got {}",
                geometry.slice_length(),
                samples.columns()
            )));
        }
        if magnitudes.columns() != geometry.bins() {
            return Err(SeparationError::dimension_mismatch(format!(
                "Magnitude frames must hold {} bins, got {}",
                geometry.bins(),
                magnitudes.columns()
            )));
        }
        Ok(Self {
            format,
            geometry,
            samples,
            magnitudes,
        })
    }

    /// Format of the song this channel belongs to.
    pub const fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Frame geometry of the song this channel belongs to.
    pub const fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    /// Time-domain frames, one per row.
    pub fn samples(&self) -> &Matrix {
        &self.samples
    }

    /// Magnitude spectra, one per row.
    pub fn magnitudes(&self) -> &Matrix {
        &self.magnitudes
    }

    /// Number of analysis frames.
    pub fn rows(&self) -> usize {
        self.magnitudes.rows()
    }

    /// Splits the channel into `(magnitudes * mask, magnitudes * (1 - mask))`.
    ///
    /// Both halves are lazy views over this channel's magnitudes and keep its time-domain
    /// frames as phase seeds.
    ///
    /// # Errors
    /// Returns [`SeparationError::DimensionMismatch`] if the mask is shaped differently
    /// from the magnitudes.
    pub fn separate(&self, mask: Mask) -> SeparationResult<(Channel, Channel)> {
        let mask = Arc::new(mask.into_matrix());
        let inverse = Arc::new(Matrix::complement(mask.clone()));
        let first = Matrix::hadamard(self.magnitudes.clone(), mask)?;
        let second = Matrix::hadamard(self.magnitudes.clone(), inverse)?;
        Ok((
            Self::from_shared(
                self.format,
                self.geometry,
                self.samples.clone(),
                Arc::new(first),
            )?,
            Self::from_shared(
                self.format,
                self.geometry,
                self.samples.clone(),
                Arc::new(second),
            )?,
        ))
    }
}

/// A multi-channel recording in its analysed form.
#[derive(Debug, Clone)]
pub struct Song {
    format: AudioFormat,
    geometry: FrameGeometry,
    channels: Vec<Channel>,
}

impl Song {
    /// Creates a song from already analysed channels.
    ///
    /// # Errors
    /// Returns [`SeparationError::DimensionMismatch`] if the channel count differs from the
    /// format or the channels disagree on their number of frames.
    pub fn new(
        format: AudioFormat,
        geometry: FrameGeometry,
        channels: Vec<Channel>,
    ) -> SeparationResult<Self> {
        if channels.len() != format.channels {
            return Err(SeparationError::dimension_mismatch(format!(
                "Format declares {} channels, got {}",
                format.channels,
                channels.len()
            )));
        }
        if let Some(first) = channels.first() {
            if let Some(other) = channels.iter().find(|c| c.rows() != first.rows()) {
                return Err(SeparationError::dimension_mismatch(format!(
                    "Channels disagree on frame count: {} vs {}",
                    first.rows(),
                    other.rows()
                )));
            }
        }
        Ok(Self {
            format,
            geometry,
            channels,
        })
    }

    /// Reads and analyses every channel of `source`, channels in parallel.
    ///
    /// # Errors
    /// Returns [`SeparationError::UnsupportedFormat`] if the source does not deliver
    /// `expected`, and propagates source errors.
    pub fn read(
        source: &dyn AudioSource,
        geometry: FrameGeometry,
        expected: &AudioFormat,
    ) -> SeparationResult<Self> {
        let format = source.format();
        if format != *expected {
            return Err(SeparationError::unsupported_format(
                expected.to_string(),
                format.to_string(),
            ));
        }

        let analyzer = SpectralAnalyzer::new(geometry);
        let channels = (0..format.channels)
            .into_par_iter()
            .map(|index| {
                let samples = source.channel_samples(index)?;
                let (frames, magnitudes) = analyzer.analyze(&samples)?;
                info!(
                    channel = index,
                    rows = magnitudes.nrows(),
                    bins = magnitudes.ncols(),
                    %format,
                    "Read channel"
                );
                Channel::new(format, geometry, frames.into(), magnitudes.into())
            })
            .collect::<SeparationResult<Vec<_>>>()?;

        Self::new(format, geometry, channels)
    }

    /// Audio format of the song.
    pub const fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Frame geometry of the song.
    pub const fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    /// The channels in order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Number of analysis frames per channel.
    pub fn rows(&self) -> usize {
        self.channels.first().map_or(0, Channel::rows)
    }

    /// Number of samples per channel [`Song::write`] delivers.
    pub fn output_length(&self) -> usize {
        self.geometry.output_length(self.rows())
    }

    /// Separates the song into two complementary songs using one mask per channel.
    ///
    /// The first song carries the masked side, the second the inverse side. Masks are
    /// computed for all channels in parallel. Returns `None` when `token` is cancelled
    /// before every mask is finished.
    ///
    /// # Errors
    /// Propagates errors of the masking function and mask/magnitude shape mismatches.
    pub fn separate<M>(
        &self,
        function: &M,
        token: &CancellationToken,
    ) -> SeparationResult<Option<(Song, Song)>>
    where
        M: MaskingFunction + ?Sized,
    {
        let masks = self
            .channels
            .par_iter()
            .map(|channel| function.mask(channel, token))
            .collect::<SeparationResult<Option<Vec<_>>>>()?;
        let Some(masks) = masks else {
            return Ok(None);
        };

        let (first, second): (Vec<_>, Vec<_>) = self
            .channels
            .iter()
            .zip(masks)
            .map(|(channel, mask)| channel.separate(mask))
            .collect::<SeparationResult<Vec<_>>>()?
            .into_iter()
            .unzip();

        Ok(Some((
            Self::new(self.format, self.geometry, first)?,
            Self::new(self.format, self.geometry, second)?,
        )))
    }

    /// Synthesizes the song and streams it, interleaved, into `sink`.
    ///
    /// # Errors
    /// Propagates synthesis and sink errors; the sink is aborted first.
    pub fn write(
        &self,
        sink: &mut dyn AudioSink,
        options: &SynthesisOptions,
        token: &CancellationToken,
    ) -> SeparationResult<SeparationStatus> {
        write_song(self, sink, options, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::InterleavedSource;
    use approx_eq::assert_approx_eq;
    use ndarray::array;

    struct HalfMask;

    impl MaskingFunction for HalfMask {
        fn name(&self) -> &'static str {
            "half"
        }

        fn mask(
            &self,
            channel: &Channel,
            _token: &CancellationToken,
        ) -> SeparationResult<Option<Mask>> {
            Mask::new(Array2::from_elem(channel.magnitudes().dim(), 0.25)).map(Some)
        }
    }

    fn stereo_source(frames: usize, format: AudioFormat) -> InterleavedSource {
        let samples: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let t = i as f32;
                [(t * 0.3).sin() * 1000.0, (t * 0.7).cos() * 500.0]
            })
            .collect();
        InterleavedSource::new(format, samples).unwrap()
    }

    #[test]
    fn test_geometry_validation() {
        assert!(FrameGeometry::new(2048, 512).is_ok());
        assert!(FrameGeometry::new(2048, 0).is_err());
        assert!(FrameGeometry::new(512, 1024).is_err());
        assert!(FrameGeometry::new(7, 2).is_err());
    }

    #[test]
    fn test_geometry_frame_count_drops_partial_frame() {
        let geometry = FrameGeometry::new(8, 4).unwrap();
        assert_eq!(geometry.frame_count(7), 0);
        assert_eq!(geometry.frame_count(8), 1);
        assert_eq!(geometry.frame_count(15), 2);
        assert_eq!(geometry.frame_count(16), 3);
        assert_eq!(geometry.output_length(3), 16);
        assert_eq!(geometry.output_length(0), 0);
    }

    #[test]
    fn test_mask_rejects_out_of_range_values() {
        assert!(Mask::new(array![[0.0f32, 1.0]]).is_ok());
        assert!(Mask::new(array![[1.5f32]]).is_err());
        assert!(Mask::new(array![[f32::NAN]]).is_err());
    }

    #[test]
    fn test_read_rejects_unsupported_format() {
        let source = stereo_source(64, AudioFormat::new(48000, 2, 16));
        let geometry = FrameGeometry::new(16, 8).unwrap();
        let result = Song::read(&source, geometry, &AudioFormat::canonical());
        assert!(matches!(
            result,
            Err(SeparationError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_read_builds_one_channel_per_audio_channel() {
        let format = AudioFormat::canonical();
        let source = stereo_source(100, format);
        let geometry = FrameGeometry::new(16, 8).unwrap();
        let song = Song::read(&source, geometry, &format).unwrap();

        assert_eq!(song.channels().len(), 2);
        // (100 - 16) / 8 + 1
        assert_eq!(song.rows(), 11);
        for channel in song.channels() {
            assert_eq!(channel.samples().dim(), (11, 16));
            assert_eq!(channel.magnitudes().dim(), (11, 8));
        }
        let left = source.channel_samples(0).unwrap();
        assert_eq!(song.channels()[0].samples().get(2, 3), left[2 * 8 + 3]);
    }

    #[test]
    fn test_channel_separate_is_complementary() {
        let format = AudioFormat::canonical();
        let song = Song::read(
            &stereo_source(64, format),
            FrameGeometry::new(16, 8).unwrap(),
            &format,
        )
        .unwrap();
        let (a, b) = song
            .separate(&HalfMask, &CancellationToken::new())
            .unwrap()
            .unwrap();

        let halves = a.channels().iter().zip(b.channels());
        for (channel, (first, second)) in song.channels().iter().zip(halves) {
            let original = channel.magnitudes().materialize();
            let first = first.magnitudes().materialize();
            let second = second.magnitudes().materialize();
            for ((x, y), z) in original.iter().zip(first.iter()).zip(second.iter()) {
                assert_approx_eq!(*x as f64 + 1.0, (*y + *z) as f64 + 1.0, 1e-4);
            }
        }
        assert_eq!(
            a.channels()[0].magnitudes().get(1, 1),
            song.channels()[0].magnitudes().get(1, 1) * 0.25
        );
    }

    #[test]
    fn test_separate_stops_on_cancelled_token() {
        let format = AudioFormat::canonical();
        let song = Song::read(
            &stereo_source(200, format),
            FrameGeometry::new(16, 8).unwrap(),
            &format,
        )
        .unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let separated = song
            .separate(&crate::BackgroundForegroundSeparation::default(), &token)
            .unwrap();
        assert!(separated.is_none());
    }

    #[test]
    fn test_channel_separate_dimension_mismatch() {
        let format = AudioFormat::canonical();
        let song = Song::read(
            &stereo_source(64, format),
            FrameGeometry::new(16, 8).unwrap(),
            &format,
        )
        .unwrap();
        let mask = Mask::new(Array2::zeros((1, 1))).unwrap();
        assert!(matches!(
            song.channels()[0].separate(mask),
            Err(SeparationError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_song_rejects_mismatched_channels() {
        let format = AudioFormat::new(8, 2, 16);
        let geometry = FrameGeometry::new(4, 2).unwrap();
        let a = Channel::new(format, geometry, Matrix::zeros(3, 4), Matrix::zeros(3, 2)).unwrap();
        let b = Channel::new(format, geometry, Matrix::zeros(2, 4), Matrix::zeros(2, 2)).unwrap();
        assert!(Song::new(format, geometry, vec![a.clone(), b]).is_err());
        assert!(Song::new(format, geometry, vec![a]).is_err());
        assert!(Channel::new(format, geometry, Matrix::zeros(3, 4), Matrix::zeros(3, 3)).is_err());
    }
}
