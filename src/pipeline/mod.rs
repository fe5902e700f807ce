//! Coordinator that runs both separations on a fixed-size worker pool.
//!
//! [`Separator::separate`] runs the background/foreground and the harmonic/percussive
//! pipelines concurrently. Each pipeline computes its masks, splits the song in two and
//! writes both halves concurrently to their sinks. The call blocks until both pipelines
//! have finished.
//!
//! Cancelling the caller's token stops both pipelines before their next row and aborts
//! every sink still being written. A failing pipeline cancels the shared abort token so
//! its sibling stops as well; the failure is reported as a single
//! [`SeparationError::Pipeline`], or [`SeparationError::MultiplePipelines`] when both
//! failed on their own.

mod cancellation;

pub use cancellation::CancellationToken;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

use crate::io::{AudioSink, AudioSource};
use crate::operations::background_foreground::BackgroundForegroundSeparation;
use crate::operations::hpss::HarmonicPercussiveSeparation;
use crate::operations::synthesis::SynthesisOptions;
use crate::operations::traits::MaskingFunction;
use crate::operations::types::SeparatorConfig;
use crate::repr::{FrameGeometry, Song};
use crate::{SeparationError, SeparationResult};

/// Outcome of a write or a separation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparationStatus {
    /// Every sink received its whole stream and was flushed.
    Completed,
    /// Work stopped early on request; unfinished sinks were aborted.
    Cancelled,
}

impl SeparationStatus {
    /// Whether work stopped early.
    pub const fn is_cancelled(self) -> bool {
        matches!(self, SeparationStatus::Cancelled)
    }

    /// Combined status of two independent pieces of work.
    pub const fn and(self, other: Self) -> Self {
        if self.is_cancelled() || other.is_cancelled() {
            SeparationStatus::Cancelled
        } else {
            SeparationStatus::Completed
        }
    }
}

/// The four output streams of a separation.
pub struct SeparationSinks<'a> {
    /// Repeating content (mask side of background/foreground).
    pub background: &'a mut dyn AudioSink,
    /// Non-repeating content (inverse side of background/foreground).
    pub foreground: &'a mut dyn AudioSink,
    /// Percussive content (mask side of harmonic/percussive).
    pub percussive: &'a mut dyn AudioSink,
    /// Harmonic content (inverse side of harmonic/percussive).
    pub harmonic: &'a mut dyn AudioSink,
}

/// Reads songs and separates them into background/foreground and
/// harmonic/percussive pairs.
#[derive(Debug)]
pub struct Separator {
    config: SeparatorConfig,
    geometry: FrameGeometry,
    background_foreground: BackgroundForegroundSeparation,
    harmonic_percussive: HarmonicPercussiveSeparation,
    pool: ThreadPool,
}

impl Separator {
    /// Validates `config` and builds the worker pool.
    ///
    /// # Errors
    /// Returns the validation error of `config`, or [`SeparationError::WorkerPool`] if the
    /// pool cannot be created.
    pub fn new(config: SeparatorConfig) -> SeparationResult<Self> {
        config.validate()?;
        let geometry = config.geometry()?;
        let background_foreground =
            BackgroundForegroundSeparation::new(config.background_foreground())?;
        let harmonic_percussive = HarmonicPercussiveSeparation::new(config.harmonic_percussive())?;

        let threads = config.resolved_worker_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("separator-{index}"))
            .build()
            .map_err(|e| SeparationError::WorkerPool(format!("Thread pool creation failed: {e}")))?;
        info!(threads, "Worker pool ready");

        Ok(Self {
            config,
            geometry,
            background_foreground,
            harmonic_percussive,
            pool,
        })
    }

    /// The coordinator configuration.
    pub const fn config(&self) -> &SeparatorConfig {
        &self.config
    }

    /// Number of workers in the pool.
    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Analyses every channel of `source` on the worker pool.
    ///
    /// # Errors
    /// Returns [`SeparationError::UnsupportedFormat`] if the source does not deliver the
    /// configured target format, and propagates source errors.
    pub fn read(&self, source: &dyn AudioSource) -> SeparationResult<Song> {
        self.pool
            .install(|| Song::read(source, self.geometry, &self.config.target_format))
    }

    /// Runs both separations of `song` and streams the four outputs into `sinks`.
    ///
    /// # Errors
    /// Returns the aggregated error of the failed pipelines.
    pub fn separate(
        &self,
        song: &Song,
        sinks: SeparationSinks<'_>,
        token: &CancellationToken,
    ) -> SeparationResult<SeparationStatus> {
        let options = self.config.synthesis();
        self.pool.install(|| {
            separate_pair(
                song,
                &self.background_foreground,
                &self.harmonic_percussive,
                sinks,
                &options,
                token,
            )
        })
    }

    /// Reads `source` and separates it.
    ///
    /// # Errors
    /// See [`Separator::read`] and [`Separator::separate`].
    pub fn process(
        &self,
        source: &dyn AudioSource,
        sinks: SeparationSinks<'_>,
        token: &CancellationToken,
    ) -> SeparationResult<SeparationStatus> {
        let song = self.read(source)?;
        if token.is_cancelled() {
            abort_all(sinks);
            return Ok(SeparationStatus::Cancelled);
        }
        self.separate(&song, sinks, token)
    }
}

/// Runs `first` into the background/foreground sinks and `second` into the
/// percussive/harmonic sinks, concurrently, under one abort token derived from `token`.
fn separate_pair<A, B>(
    song: &Song,
    first: &A,
    second: &B,
    sinks: SeparationSinks<'_>,
    options: &SynthesisOptions,
    token: &CancellationToken,
) -> SeparationResult<SeparationStatus>
where
    A: MaskingFunction,
    B: MaskingFunction,
{
    let abort = token.child_token();
    let SeparationSinks {
        background,
        foreground,
        percussive,
        harmonic,
    } = sinks;

    let results = rayon::join(
        || run_pipeline(song, first, background, foreground, options, &abort),
        || run_pipeline(song, second, percussive, harmonic, options, &abort),
    );

    let mut status = SeparationStatus::Completed;
    let mut errors = Vec::new();
    for result in [results.0, results.1] {
        match result {
            Ok(pipeline_status) => status = status.and(pipeline_status),
            Err(e) => errors.push(e),
        }
    }
    if let Some(error) = SeparationError::aggregate(errors) {
        return Err(error);
    }

    info!(cancelled = status.is_cancelled(), "Separation finished");
    Ok(status)
}

fn abort_all(sinks: SeparationSinks<'_>) {
    sinks.background.abort();
    sinks.foreground.abort();
    sinks.percussive.abort();
    sinks.harmonic.abort();
}

/// Runs one pipeline, cancelling `abort` and tagging the error with the pipeline name
/// when it fails.
fn run_pipeline<M: MaskingFunction>(
    song: &Song,
    function: &M,
    first: &mut dyn AudioSink,
    second: &mut dyn AudioSink,
    options: &SynthesisOptions,
    abort: &CancellationToken,
) -> SeparationResult<SeparationStatus> {
    let name = function.name();
    separate_and_write(song, function, first, second, options, abort).map_err(|e| {
        abort.cancel();
        SeparationError::pipeline(name, e)
    })
}

fn separate_and_write<M: MaskingFunction>(
    song: &Song,
    function: &M,
    first: &mut dyn AudioSink,
    second: &mut dyn AudioSink,
    options: &SynthesisOptions,
    abort: &CancellationToken,
) -> SeparationResult<SeparationStatus> {
    let name = function.name();
    if abort.is_cancelled() {
        info!(pipeline = name, "Pipeline cancelled before start");
        first.abort();
        second.abort();
        return Ok(SeparationStatus::Cancelled);
    }

    info!(pipeline = name, rows = song.rows(), "Pipeline started");
    let (mask_side, inverse_side) = match song.separate(function, abort) {
        Ok(Some(pair)) => pair,
        Ok(None) => {
            info!(pipeline = name, "Pipeline cancelled while masking");
            first.abort();
            second.abort();
            return Ok(SeparationStatus::Cancelled);
        }
        Err(e) => {
            first.abort();
            second.abort();
            return Err(e);
        }
    };
    if abort.is_cancelled() {
        info!(pipeline = name, "Pipeline cancelled after masking");
        first.abort();
        second.abort();
        return Ok(SeparationStatus::Cancelled);
    }

    let (first_status, second_status) = rayon::join(
        || {
            mask_side
                .write(first, options, abort)
                .inspect_err(|_| abort.cancel())
        },
        || {
            inverse_side
                .write(second, options, abort)
                .inspect_err(|_| abort.cancel())
        },
    );
    let status = first_status?.and(second_status?);
    info!(
        pipeline = name,
        cancelled = status.is_cancelled(),
        "Pipeline finished"
    );
    Ok(status)
}
