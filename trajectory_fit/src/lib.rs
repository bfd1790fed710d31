//! `trajectory_fit`: Piecewise-linear trajectory models for 2D hit clusters.
//!
//! # Module layout
//! - [`sliding_fit`]: Layer-indexed sliding linear fit and coordinate conversions
//! - [`error`]: Fit construction errors

pub mod error;
pub mod sliding_fit;

pub use error::{FitError, FitResult};
pub use sliding_fit::{LayerFitResult, SlidingFit, Vec2};
