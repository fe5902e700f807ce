//! Core trait definitions for separation operations.

use crate::SeparationResult;
use crate::pipeline::CancellationToken;
use crate::repr::{Channel, Mask};

/// A pure function from a channel to a soft mask over its magnitudes.
///
/// Implementations never mutate the channel. The returned mask has the shape of the
/// channel's magnitudes; [`Song::separate`](crate::Song::separate) assigns the mask side
/// to its first output and the inverse side to its second.
pub trait MaskingFunction: Send + Sync {
    /// Short name used in logs and pipeline errors.
    fn name(&self) -> &'static str;

    /// Computes the mask for one channel.
    ///
    /// Implementations poll `token` between units of work and return `Ok(None)` once it
    /// is cancelled.
    ///
    /// # Errors
    /// Implementations return an error for invalid configuration or malformed channels.
    fn mask(
        &self,
        channel: &Channel,
        token: &CancellationToken,
    ) -> SeparationResult<Option<Mask>>;
}
