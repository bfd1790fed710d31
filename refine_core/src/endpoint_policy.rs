//! Endpoint-to-endpoint association policy.
//!
//! Pairs an upstream cluster's outermost end with a downstream cluster's
//! innermost end when both fragments point the same way and the gap between
//! them is short and lies along that direction.
//!
//! # Main track assembly
//! 1. Split the upstream cluster at its merge point, dropping hits beyond it.
//! 2. Split the downstream cluster at its merge point, dropping hits before it.
//! 3. Fold every other donor's extrapolated hits into the upstream main piece.
//! 4. Merge the downstream main piece into it.
//! 5. Fragment and re-home the remnants.
//! 6. Refresh the working set (deletions first).

use crate::association::{
    resolve_merge_point, Association, ClusterAssociation, ExtrapolatedHitSet,
};
use crate::cluster_store::ClusterStore;
use crate::config::RefinementConfig;
use crate::error::{RefinementError, RefinementResult};
use crate::policy::{AssociationPolicy, MainTrackOutcome, RefinementContext};
use crate::remnants::RemnantProcessor;
use crate::track_builder::{MergeOutcome, TrackBuilder};
use crate::types::{ClusterId, Vec2};
use crate::working_set::{TrackedCluster, WorkingSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Configuration for [`EndpointPolicy`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct EndpointPolicyConfig {
    /// Longest connecting line considered
    pub max_gap_length: f64,
    /// Minimum cosine between the two average directions, and between each
    /// of them and the connecting line
    pub min_direction_cos: f64,
}

impl Default for EndpointPolicyConfig {
    fn default() -> Self {
        Self {
            max_gap_length: 50.0,
            min_direction_cos: 0.98,
        }
    }
}

/// Association between the facing endpoints of two clusters.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EndpointAssociation {
    geometry: ClusterAssociation,
    upstream_cluster: ClusterId,
    downstream_cluster: ClusterId,
    upstream_merge_direction: Vec2,
    downstream_merge_direction: Vec2,
    upstream_endpoint: Vec2,
    downstream_endpoint: Vec2,
    combined_hits: usize,
}

impl EndpointAssociation {
    pub fn upstream_cluster(&self) -> ClusterId {
        self.upstream_cluster
    }

    pub fn downstream_cluster(&self) -> ClusterId {
        self.downstream_cluster
    }

    pub fn upstream_merge_direction(&self) -> Vec2 {
        self.upstream_merge_direction
    }

    pub fn downstream_merge_direction(&self) -> Vec2 {
        self.downstream_merge_direction
    }

    /// Fitted outermost point of the upstream cluster.
    pub fn upstream_endpoint(&self) -> Vec2 {
        self.upstream_endpoint
    }

    /// Fitted innermost point of the downstream cluster.
    pub fn downstream_endpoint(&self) -> Vec2 {
        self.downstream_endpoint
    }

    pub fn combined_hits(&self) -> usize {
        self.combined_hits
    }
}

impl Association for EndpointAssociation {
    fn geometry(&self) -> &ClusterAssociation {
        &self.geometry
    }

    fn clusters(&self) -> Vec<ClusterId> {
        vec![self.upstream_cluster, self.downstream_cluster]
    }
}

#[derive(Clone, Debug, Default)]
pub struct EndpointPolicy {
    pub config: EndpointPolicyConfig,
}

impl EndpointPolicy {
    pub fn new(config: EndpointPolicyConfig) -> Self {
        Self { config }
    }

    /// Try to join `upstream`'s outer end to `downstream`'s inner end.
    fn associate(
        &self,
        upstream: &TrackedCluster,
        downstream: &TrackedCluster,
        config: &RefinementConfig,
    ) -> Option<EndpointAssociation> {
        let min_cos = self.config.min_direction_cos;
        let up_direction = upstream.macro_fit.average_direction();
        let down_direction = downstream.macro_fit.average_direction();
        if up_direction.dot(&down_direction) < min_cos {
            return None;
        }

        let upstream_endpoint = upstream.micro_fit.global_max_layer_position();
        let downstream_endpoint = downstream.micro_fit.global_min_layer_position();
        let gap = downstream_endpoint - upstream_endpoint;
        if gap.dot(&up_direction) <= 0.0 || gap.norm() > self.config.max_gap_length {
            return None;
        }

        let up_merge = resolve_merge_point(
            &upstream.micro_fit,
            &upstream.macro_fit,
            &downstream.macro_fit,
            true,
            config,
        )?;
        let down_merge = resolve_merge_point(
            &downstream.micro_fit,
            &downstream.macro_fit,
            &upstream.macro_fit,
            false,
            config,
        )?;
        let geometry = ClusterAssociation::new(up_merge.position, down_merge.position)?;
        if geometry.length() > self.config.max_gap_length {
            return None;
        }
        let line = geometry.connecting_line_direction();
        if line.dot(&up_direction) < min_cos || line.dot(&down_direction) < min_cos {
            return None;
        }

        Some(EndpointAssociation {
            geometry,
            upstream_cluster: upstream.id,
            downstream_cluster: downstream.id,
            upstream_merge_direction: up_merge.direction,
            downstream_merge_direction: down_merge.direction,
            upstream_endpoint,
            downstream_endpoint,
            combined_hits: upstream.n_hits + downstream.n_hits,
        })
    }
}

impl AssociationPolicy for EndpointPolicy {
    type Association = EndpointAssociation;

    fn find_best_associations(
        &self,
        working_set: &WorkingSet,
        _store: &ClusterStore,
        config: &RefinementConfig,
    ) -> Vec<EndpointAssociation> {
        let mut found = Vec::new();
        for upstream in working_set.iter() {
            for downstream in working_set.iter() {
                if upstream.id == downstream.id {
                    continue;
                }
                if let Some(a) = self.associate(upstream, downstream, config) {
                    found.push(a);
                }
            }
        }
        found.sort_by(|a, b| {
            b.combined_hits
                .cmp(&a.combined_hits)
                .then_with(|| a.geometry.length().total_cmp(&b.geometry.length()))
                .then_with(|| a.upstream_cluster.cmp(&b.upstream_cluster))
                .then_with(|| a.downstream_cluster.cmp(&b.downstream_cluster))
        });
        found
    }

    fn extrapolated_hits(
        &self,
        association: &EndpointAssociation,
        store: &ClusterStore,
        config: &RefinementConfig,
    ) -> ExtrapolatedHitSet {
        let geometry = &association.geometry;
        let band = config.distance_from_line;
        let (up, down) = (geometry.upstream_merge_point(), geometry.downstream_merge_point());
        let (min_x, max_x) = (up.x.min(down.x) - band, up.x.max(down.x) + band);
        let (min_y, max_y) = (up.y.min(down.y) - band, up.y.max(down.y) + band);

        let mut set = ExtrapolatedHitSet::new();
        for cluster in store.iter() {
            for hit in cluster.hits() {
                let inside_box =
                    (min_x..=max_x).contains(&hit.x) && (min_y..=max_y).contains(&hit.y);
                if inside_box && geometry.distance_from_line(&hit.position()) <= band {
                    set.insert(cluster.id(), *hit);
                }
            }
        }
        set
    }

    fn is_extrapolated_endpoint_near_boundary(
        &self,
        association: &EndpointAssociation,
        tolerance: f64,
    ) -> bool {
        let geometry = &association.geometry;
        (geometry.upstream_merge_point() - association.upstream_endpoint).norm() <= tolerance
            && (geometry.downstream_merge_point() - association.downstream_endpoint).norm()
                <= tolerance
    }

    fn create_main_track(
        &self,
        association: &EndpointAssociation,
        extrapolated: &ExtrapolatedHitSet,
        ctx: &mut RefinementContext<'_>,
    ) -> RefinementResult<MainTrackOutcome> {
        let geometry = &association.geometry;
        let (up_id, down_id) = (association.upstream_cluster, association.downstream_cluster);
        let consumed = ctx.consumed;
        let upstream = consumed
            .get(&up_id)
            .ok_or(RefinementError::MissingFit(up_id))?;
        let downstream = consumed
            .get(&down_id)
            .ok_or(RefinementError::MissingFit(down_id))?;

        let builder = TrackBuilder::new(ctx.config);
        let mut remnants = Vec::new();
        let mut to_delete = vec![up_id, down_id];
        let mut hits_reassigned = 0;

        let up_split = builder.split_cluster_at_point(
            ctx.store,
            upstream,
            &geometry.upstream_merge_point(),
            false,
            extrapolated,
        )?;
        remnants.extend(up_split.remnants);
        let down_split = builder.split_cluster_at_point(
            ctx.store,
            downstream,
            &geometry.downstream_merge_point(),
            true,
            extrapolated,
        )?;
        remnants.extend(down_split.remnants);
        let main_track = up_split.main_track;

        for (donor, hits) in extrapolated.iter() {
            if donor == up_id || donor == down_id || !ctx.store.contains(donor) {
                continue;
            }
            match builder.merge_extrapolated_hits(ctx.store, main_track, donor, hits, geometry)? {
                MergeOutcome::Skipped => {}
                MergeOutcome::Absorbed { hits } => {
                    hits_reassigned += hits;
                    to_delete.push(donor);
                }
                MergeOutcome::Split {
                    transferred,
                    remnants: pieces,
                } => {
                    hits_reassigned += transferred;
                    to_delete.push(donor);
                    remnants.extend(pieces);
                }
            }
        }

        hits_reassigned += ctx.store.cluster(down_split.main_track)?.n_hits();
        ctx.store.merge_and_delete(main_track, down_split.main_track)?;

        let processed = RemnantProcessor::new(ctx.config).process(ctx.store, &remnants, main_track)?;
        trace!(
            %main_track,
            remnants = processed.created.len(),
            absorbers = processed.absorbed_into.len(),
            "processed remnants"
        );

        to_delete.extend(processed.absorbed_into.iter().copied());
        let mut to_add = vec![main_track];
        for &id in processed.created.iter().chain(&processed.absorbed_into) {
            if !to_add.contains(&id) {
                to_add.push(id);
            }
        }
        ctx.working_set
            .update(ctx.store, &to_add, &to_delete, ctx.config);

        debug!(
            upstream = %up_id,
            downstream = %down_id,
            %main_track,
            hits_reassigned,
            "built main track"
        );
        Ok(MainTrackOutcome {
            main_track,
            remnants: processed.created,
            hits_reassigned,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hit, HitId};
    use std::collections::BTreeMap;

    fn column(first_id: u64, n: usize, x: f64, y0: f64, step: f64) -> Vec<Hit> {
        (0..n)
            .map(|i| Hit::new(HitId(first_id + i as u64), x, y0 + step * i as f64, 1.0))
            .collect()
    }

    /// Two collinear fragments with a sparse bridge cluster between them.
    fn broken_column() -> ClusterStore {
        ClusterStore::from_hit_groups([
            column(0, 100, 0.0, 0.0, 0.3),
            column(1000, 100, 0.0, 45.0, 0.3),
            column(2000, 14, 0.0, 31.0, 1.0),
        ])
        .unwrap()
    }

    #[test]
    fn finds_facing_collinear_pair() {
        let cfg = RefinementConfig::default();
        let store = broken_column();
        let ws = WorkingSet::initialise(store.iter(), &cfg);
        let policy = EndpointPolicy::default();

        let found = policy.find_best_associations(&ws, &store, &cfg);
        assert_eq!(found.len(), 1);
        let a = &found[0];
        assert_eq!(a.clusters(), vec![ClusterId(0), ClusterId(1)]);
        assert_eq!(a.combined_hits(), 200);
        assert!(a.geometry().length() > 14.0 && a.geometry().length() < 16.5);
        assert!(policy.is_extrapolated_endpoint_near_boundary(a, 0.0));
    }

    #[test]
    fn side_by_side_clusters_are_not_paired() {
        let cfg = RefinementConfig::default();
        let store = ClusterStore::from_hit_groups([
            column(0, 100, 0.0, 0.0, 0.3),
            column(1000, 100, 20.0, 45.0, 0.3),
        ])
        .unwrap();
        let ws = WorkingSet::initialise(store.iter(), &cfg);
        assert!(EndpointPolicy::default()
            .find_best_associations(&ws, &store, &cfg)
            .is_empty());
    }

    #[test]
    fn extrapolated_hits_lie_along_the_line() {
        let cfg = RefinementConfig::default();
        let store = broken_column();
        let ws = WorkingSet::initialise(store.iter(), &cfg);
        let policy = EndpointPolicy::default();
        let a = policy.find_best_associations(&ws, &store, &cfg).remove(0);

        let set = policy.extrapolated_hits(&a, &store, &cfg);
        assert_eq!(set.get(ClusterId(2)).len(), 14);
        for hit in set.all_hits() {
            assert!(a.geometry().distance_from_line(&hit.position()) <= cfg.distance_from_line);
        }
    }

    #[test]
    fn main_track_absorbs_bridge_and_partner() {
        let cfg = RefinementConfig::default();
        let mut store = broken_column();
        let mut ws = WorkingSet::initialise(store.iter(), &cfg);
        let policy = EndpointPolicy::default();
        let a = policy.find_best_associations(&ws, &store, &cfg).remove(0);
        let set = policy.extrapolated_hits(&a, &store, &cfg);

        let consumed: BTreeMap<ClusterId, TrackedCluster> = a
            .clusters()
            .into_iter()
            .filter_map(|id| ws.take(id).map(|t| (id, t)))
            .collect();
        let mut ctx = RefinementContext {
            store: &mut store,
            working_set: &mut ws,
            consumed: &consumed,
            config: &cfg,
        };
        let out = policy.create_main_track(&a, &set, &mut ctx).unwrap();

        assert_eq!(out.main_track, ClusterId(0));
        assert_eq!(out.hits_reassigned, 114);
        assert!(out.remnants.is_empty());
        assert_eq!(store.ids(), vec![ClusterId(0)]);
        assert_eq!(store.cluster(ClusterId(0)).unwrap().n_hits(), 214);
        assert_eq!(ws.ids(), vec![ClusterId(0)]);
        assert_eq!(ws.get(ClusterId(0)).unwrap().n_hits, 214);
    }

    #[test]
    fn missing_fits_are_an_error() {
        let cfg = RefinementConfig::default();
        let mut store = broken_column();
        let mut ws = WorkingSet::initialise(store.iter(), &cfg);
        let policy = EndpointPolicy::default();
        let a = policy.find_best_associations(&ws, &store, &cfg).remove(0);
        let consumed = BTreeMap::new();
        let mut ctx = RefinementContext {
            store: &mut store,
            working_set: &mut ws,
            consumed: &consumed,
            config: &cfg,
        };
        assert_eq!(
            policy.create_main_track(&a, &ExtrapolatedHitSet::new(), &mut ctx),
            Err(RefinementError::MissingFit(ClusterId(0)))
        );
    }
}
