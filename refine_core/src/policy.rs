//! Association policy: the pluggable half of the refinement loop.
//!
//! The loop in [`crate::refinement`] is generic; a policy decides which
//! clusters to pair, which hits lie along the join and how the main track is
//! assembled. [`crate::endpoint_policy::EndpointPolicy`] joins the facing
//! endpoints of collinear fragments.

use crate::association::{Association, ExtrapolatedHitSet};
use crate::cluster_store::ClusterStore;
use crate::config::RefinementConfig;
use crate::error::RefinementResult;
use crate::types::ClusterId;
use crate::working_set::{TrackedCluster, WorkingSet};
use serde::Serialize;
use std::collections::BTreeMap;

/// Mutable state handed to [`AssociationPolicy::create_main_track`].
pub struct RefinementContext<'a> {
    pub store: &'a mut ClusterStore,
    pub working_set: &'a mut WorkingSet,
    /// Entries of the association's clusters, already taken out of the
    /// working set
    pub consumed: &'a BTreeMap<ClusterId, TrackedCluster>,
    pub config: &'a RefinementConfig,
}

/// Result of building one main track.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MainTrackOutcome {
    pub main_track: ClusterId,
    /// Surviving remnant clusters
    pub remnants: Vec<ClusterId>,
    /// Hits that joined the main track from other clusters
    pub hits_reassigned: usize,
}

pub trait AssociationPolicy {
    type Association: Association;

    /// Candidate associations among the working set, best first.
    fn find_best_associations(
        &self,
        working_set: &WorkingSet,
        store: &ClusterStore,
        config: &RefinementConfig,
    ) -> Vec<Self::Association>;

    /// Hits of every cluster that lie along the association's connecting line.
    fn extrapolated_hits(
        &self,
        association: &Self::Association,
        store: &ClusterStore,
        config: &RefinementConfig,
    ) -> ExtrapolatedHitSet;

    /// Whether the merge points sit close enough to their clusters' ends.
    fn is_extrapolated_endpoint_near_boundary(
        &self,
        association: &Self::Association,
        tolerance: f64,
    ) -> bool;

    /// Reassign hits to form the main track and bring the working set up to
    /// date.
    fn create_main_track(
        &self,
        association: &Self::Association,
        extrapolated: &ExtrapolatedHitSet,
        ctx: &mut RefinementContext<'_>,
    ) -> RefinementResult<MainTrackOutcome>;
}
