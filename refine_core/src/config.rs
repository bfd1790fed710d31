//! Refinement configuration.

use crate::error::{RefinementError, RefinementResult};
use serde::{Deserialize, Serialize};

/// Tunable thresholds for the refinement loop.
///
/// JSON keys are the PascalCase field names (`MinCaloHits`, `MaxTrackGaps`,
/// ...); missing keys take their default value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RefinementConfig {
    /// Minimum hit count for a cluster to enter the working set
    pub min_calo_hits: usize,
    /// Curviness pre-filter threshold (mean distance from the average line)
    pub max_curviness: f64,
    /// Half-window of the micro sliding fit, in layers
    pub micro_sliding_fit_window: usize,
    /// Half-window of the macro sliding fit, in layers
    pub macro_sliding_fit_window: usize,
    /// Fraction of a cluster's layers that must agree before a merge point is fixed
    pub stable_region_cluster_fraction: f64,
    /// Cosine a layer direction must exceed to agree with the partner cluster
    pub merge_point_min_cos_angle_deviation: f64,
    /// Half-width of the band around the connecting line
    pub distance_from_line: f64,
    /// Minimum share of a donor's hits that must be extrapolated before it is touched
    pub min_hit_fraction_for_hit_removal: f64,
    /// Absorption radius when the nearest cluster is the main track
    pub max_distance_from_main_track: f64,
    /// Absorption and fragmentation radius
    pub max_hit_distance_from_cluster: f64,
    /// Largest gap between consecutive hits of a connected cluster
    pub max_hit_separation_for_connected_cluster: f64,
    /// Consecutive empty segments tolerated along the connecting line
    pub max_track_gaps: usize,
    /// Segment length for the continuity check
    pub line_segment_length: f64,
    /// Upper bound on refinement iterations
    pub max_iterations: usize,
    /// Tolerance handed to the policy's boundary check
    pub boundary_tolerance: f64,
    /// Layer pitch of both sliding fits
    pub sliding_fit_pitch: f64,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            min_calo_hits: 50,
            max_curviness: 0.3,
            micro_sliding_fit_window: 20,
            macro_sliding_fit_window: 1000,
            stable_region_cluster_fraction: 0.05,
            merge_point_min_cos_angle_deviation: 0.999,
            distance_from_line: 0.35,
            min_hit_fraction_for_hit_removal: 0.05,
            max_distance_from_main_track: 0.75,
            max_hit_distance_from_cluster: 4.0,
            max_hit_separation_for_connected_cluster: 4.0,
            max_track_gaps: 3,
            line_segment_length: 3.0,
            max_iterations: 10,
            boundary_tolerance: 5.0,
            sliding_fit_pitch: 0.3,
        }
    }
}

impl RefinementConfig {
    /// Reject values the refinement loop cannot work with.
    pub fn validate(&self) -> RefinementResult<()> {
        if !(self.line_segment_length >= f64::EPSILON) {
            return Err(RefinementError::NonPositiveSegmentLength(
                self.line_segment_length,
            ));
        }
        if self.micro_sliding_fit_window == 0 || self.macro_sliding_fit_window == 0 {
            return Err(invalid("sliding fit windows must span at least one layer"));
        }
        if !(self.sliding_fit_pitch > 0.0) {
            return Err(invalid(format!(
                "SlidingFitPitch must be positive, got {}",
                self.sliding_fit_pitch
            )));
        }
        for (name, value) in [
            ("StableRegionClusterFraction", self.stable_region_cluster_fraction),
            ("MinHitFractionForHitRemoval", self.min_hit_fraction_for_hit_removal),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{name} must lie in [0, 1], got {value}")));
            }
        }
        if !(-1.0..=1.0).contains(&self.merge_point_min_cos_angle_deviation) {
            return Err(invalid(format!(
                "MergePointMinCosAngleDeviation must lie in [-1, 1], got {}",
                self.merge_point_min_cos_angle_deviation
            )));
        }
        for (name, value) in [
            ("MaxCurviness", self.max_curviness),
            ("DistanceFromLine", self.distance_from_line),
            ("MaxDistanceFromMainTrack", self.max_distance_from_main_track),
            ("MaxHitDistanceFromCluster", self.max_hit_distance_from_cluster),
            (
                "MaxHitSeparationForConnectedCluster",
                self.max_hit_separation_for_connected_cluster,
            ),
            ("BoundaryTolerance", self.boundary_tolerance),
        ] {
            if !(value >= 0.0) {
                return Err(invalid(format!("{name} must be non-negative, got {value}")));
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> RefinementError {
    RefinementError::InvalidConfig(msg.into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
