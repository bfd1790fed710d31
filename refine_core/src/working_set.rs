//! Working set: clusters eligible for association, each with its fits.
//!
//! # Invariant
//! Every entry owns exactly one micro and one macro [`SlidingFit`]. Entries
//! are inserted and removed as a whole, so the cluster list and the fits can
//! never disagree. `update` applies all deletions before any insertion, which
//! lets a cluster that kept its id be re-fitted in place.

use crate::cluster_store::ClusterStore;
use crate::config::RefinementConfig;
use crate::types::{Cluster, ClusterId, Vec2};
use tracing::debug;
use trajectory_fit::SlidingFit;

/// Clusters with at least this many hits skip the curviness pre-filter.
pub const CURVINESS_FILTER_MAX_HITS: usize = 300;

/// A working-set entry.
#[derive(Clone, Debug)]
pub struct TrackedCluster {
    pub id: ClusterId,
    pub n_hits: usize,
    /// Local fit, window `MicroSlidingFitWindow`
    pub micro_fit: SlidingFit,
    /// Whole-cluster fit, window `MacroSlidingFitWindow`
    pub macro_fit: SlidingFit,
}

impl TrackedCluster {
    /// Fit `cluster`, or `None` if it is too small, too curved or cannot be
    /// fitted.
    pub fn build(cluster: &Cluster, config: &RefinementConfig) -> Option<Self> {
        let id = cluster.id();
        if cluster.n_hits() < config.min_calo_hits {
            return None;
        }

        let positions = cluster.positions();
        let fit = |window| SlidingFit::new(&positions, window, config.sliding_fit_pitch);
        let (micro_fit, macro_fit) = match (
            fit(config.micro_sliding_fit_window),
            fit(config.macro_sliding_fit_window),
        ) {
            (Ok(micro), Ok(macro_fit)) => (micro, macro_fit),
            (Err(e), _) | (_, Err(e)) => {
                debug!(cluster = %id, error = %e, "skipping cluster: no sliding fit");
                return None;
            }
        };

        if cluster.n_hits() < CURVINESS_FILTER_MAX_HITS {
            let direction = macro_fit.average_direction();
            let from_min =
                average_deviation_from_line(&positions, &macro_fit.global_min_layer_position(), &direction);
            let from_max =
                average_deviation_from_line(&positions, &macro_fit.global_max_layer_position(), &direction);
            if from_min > config.max_curviness && from_max > config.max_curviness {
                debug!(cluster = %id, from_min, from_max, "skipping cluster: too curved");
                return None;
            }
        }

        Some(Self {
            id,
            n_hits: cluster.n_hits(),
            micro_fit,
            macro_fit,
        })
    }
}

/// Mean perpendicular distance of `points` from the line through `anchor`
/// along the unit vector `direction`.
pub fn average_deviation_from_line(points: &[Vec2], anchor: &Vec2, direction: &Vec2) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let total: f64 = points
        .iter()
        .map(|p| direction.perp(&(p - anchor)).abs())
        .sum();
    total / points.len() as f64
}

/// Tracked clusters sorted by descending hit count, then ascending id.
#[derive(Clone, Debug, Default)]
pub struct WorkingSet {
    entries: Vec<TrackedCluster>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit every eligible cluster.
    pub fn initialise<'a>(
        clusters: impl IntoIterator<Item = &'a Cluster>,
        config: &RefinementConfig,
    ) -> Self {
        let mut set = Self {
            entries: clusters
                .into_iter()
                .filter_map(|c| TrackedCluster::build(c, config))
                .collect(),
        };
        set.sort();
        set
    }

    /// Remove `to_delete`, then fit and insert `to_add` (ids missing from the
    /// store are ignored).
    pub fn update(
        &mut self,
        store: &ClusterStore,
        to_add: &[ClusterId],
        to_delete: &[ClusterId],
        config: &RefinementConfig,
    ) {
        for &id in to_delete {
            self.remove(id);
        }
        for &id in to_add {
            // Entries are unique per id
            self.remove(id);
            if let Some(entry) = store.get(id).and_then(|c| TrackedCluster::build(c, config)) {
                self.entries.push(entry);
            }
        }
        self.sort();
    }

    /// Erase a cluster and its fits. Returns whether it was present.
    pub fn remove(&mut self, id: ClusterId) -> bool {
        self.take(id).is_some()
    }

    /// Erase a cluster and hand back its entry.
    pub fn take(&mut self, id: ClusterId) -> Option<TrackedCluster> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn get(&self, id: ClusterId) -> Option<&TrackedCluster> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: ClusterId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedCluster> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<ClusterId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| b.n_hits.cmp(&a.n_hits).then(a.id.cmp(&b.id)));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
