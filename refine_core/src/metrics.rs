//! Batch statistics over many refinement runs.

use crate::refinement::{RefinementReport, Termination};
use serde::{Deserialize, Serialize};

/// Accumulated counts over a batch of events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinementMetrics {
    pub n_events: u64,
    pub iterations: u64,
    pub associations_considered: u64,
    pub rejected_near_boundary: u64,
    pub rejected_continuity: u64,
    pub tracks_built: u64,
    pub hits_reassigned: u64,
    pub clusters_before: u64,
    pub clusters_after: u64,
    /// Runs stopped by `MaxIterations` rather than by running out of associations
    pub hit_iteration_limit: u64,
}

impl RefinementMetrics {
    pub fn accumulate(&mut self, report: &RefinementReport) {
        self.n_events += 1;
        self.iterations += report.iterations as u64;
        self.associations_considered += report.associations_considered as u64;
        self.rejected_near_boundary += report.rejected_near_boundary as u64;
        self.rejected_continuity += report.rejected_continuity as u64;
        self.tracks_built += report.tracks_built as u64;
        self.hits_reassigned += report.hits_reassigned as u64;
        self.clusters_before += report.clusters_before as u64;
        self.clusters_after += report.clusters_after as u64;
        if report.termination == Termination::IterationLimit {
            self.hit_iteration_limit += 1;
        }
    }

    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a RefinementReport>) -> Self {
        let mut metrics = Self::default();
        for report in reports {
            metrics.accumulate(report);
        }
        metrics
    }

    /// Share of considered associations that became tracks.
    pub fn acceptance_rate(&self) -> f64 {
        if self.associations_considered == 0 {
            return 0.0;
        }
        self.tracks_built as f64 / self.associations_considered as f64
    }

    pub fn mean_iterations(&self) -> f64 {
        if self.n_events == 0 {
            return 0.0;
        }
        self.iterations as f64 / self.n_events as f64
    }

    /// Fractional drop in cluster count over the batch.
    pub fn cluster_reduction(&self) -> f64 {
        if self.clusters_before == 0 {
            return 0.0;
        }
        1.0 - self.clusters_after as f64 / self.clusters_before as f64
    }
}
