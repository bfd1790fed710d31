//! Sliding fit error types

use thiserror::Error;

/// Result type for fit construction
pub type FitResult<T> = Result<T, FitError>;

/// Reasons a sliding fit cannot be built for a point set
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// Not enough points to define a line
    #[error("too few points for a sliding fit: {found} (need at least {required})")]
    TooFewPoints { found: usize, required: usize },

    /// All points coincide, so there is no principal axis
    #[error("degenerate point distribution: no principal axis")]
    DegenerateGeometry,

    /// Window of zero layers
    #[error("sliding fit window must span at least one layer")]
    ZeroWindow,

    /// Layer pitch not strictly positive
    #[error("layer pitch must be positive, got {0}")]
    InvalidPitch(f64),

    /// A coordinate is NaN or infinite
    #[error("point with non-finite coordinates")]
    NonFinitePoint,

    /// Cluster extent divided by the pitch exceeds the layer budget
    #[error("cluster extent {extent} over pitch {pitch} spans more than {max} layers")]
    LayerSpanTooLarge { extent: f64, pitch: f64, max: usize },

    /// No layer window contained enough longitudinal spread
    #[error("no layer window had enough spread for a linear fit")]
    NoLayerFits,
}
