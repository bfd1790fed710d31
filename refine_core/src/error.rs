//! Refinement error types

use crate::types::{ClusterId, HitId};
use thiserror::Error;

/// Result type for refinement operations
pub type RefinementResult<T> = Result<T, RefinementError>;

/// Fatal errors raised by the refinement engine.
///
/// Rejected associations and clusters without a usable fit are normal
/// outcomes and never surface here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefinementError {
    /// Configuration value out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Line segment length for the continuity check not strictly positive
    #[error("line segment length must be positive and nonzero, got {0}")]
    NonPositiveSegmentLength(f64),

    /// Track segmentation yielded fewer than two boundaries
    #[error("track segmentation produced {0} boundaries (need at least 2)")]
    TooFewSegmentBoundaries(usize),

    /// Cluster id not present in the store
    #[error("unknown cluster {0}")]
    UnknownCluster(ClusterId),

    /// Hit inserted twice
    #[error("hit {hit} already belongs to cluster {owner}")]
    DuplicateHit { hit: HitId, owner: ClusterId },

    /// Attempt to create a cluster without hits
    #[error("cannot create a cluster without hits")]
    EmptyCluster,

    /// Merge or transfer of a cluster into itself
    #[error("cluster {0} cannot be merged into itself")]
    SelfMerge(ClusterId),

    /// Partition does not hold exactly the source cluster's hits
    #[error("partition of cluster {cluster} does not conserve hits: expected {expected}, found {found}")]
    PartitionMismatch {
        cluster: ClusterId,
        expected: usize,
        found: usize,
    },

    /// Cluster needed for track building has no fits available
    #[error("cluster {0} has no sliding fits in the working set")]
    MissingFit(ClusterId),
}
