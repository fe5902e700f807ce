//! Utility functions shared by the separation kernels.
//!
//! # Modules
//!
//! - [`numeric`] - Stateless numeric primitives (median, dot product, norms, logistic mask)

pub mod numeric;

pub use numeric::*;
