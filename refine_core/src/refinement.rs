//! Refinement loop orchestrator.
//!
//! # Per-iteration sequence
//! 1. Ask the policy for associations among the working set; stop if none.
//! 2. Take the best association's clusters out of the working set.
//! 3. Collect the hits lying along its connecting line.
//! 4. Reject it if a merge point is far from its cluster's end.
//! 5. Reject it if the connecting line has too many empty segments.
//! 6. Let the policy build the main track and refresh the working set.
//!
//! Rejected clusters stay out of the working set, so every iteration either
//! shrinks the candidate pool or builds a track; `MaxIterations` bounds the
//! loop regardless.

use crate::association::Association;
use crate::cluster_store::ClusterStore;
use crate::config::RefinementConfig;
use crate::continuity::is_track_continuous;
use crate::error::RefinementResult;
use crate::policy::{AssociationPolicy, RefinementContext};
use crate::types::ClusterId;
use crate::working_set::WorkingSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Why the loop stopped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The policy proposed no further association
    #[default]
    NoAssociation,
    /// `MaxIterations` reached
    IterationLimit,
}

/// Summary of one refinement run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinementReport {
    pub iterations: usize,
    pub associations_considered: usize,
    pub rejected_near_boundary: usize,
    pub rejected_continuity: usize,
    pub tracks_built: usize,
    pub hits_reassigned: usize,
    pub clusters_before: usize,
    pub clusters_after: usize,
    /// Main tracks in the order they were built
    pub main_tracks: Vec<ClusterId>,
    pub termination: Termination,
}

/// Iterative track refinement driven by an [`AssociationPolicy`].
pub struct TrackRefinement<P: AssociationPolicy> {
    config: RefinementConfig,
    policy: P,
}

impl<P: AssociationPolicy> TrackRefinement<P> {
    /// Validates `config` up front.
    pub fn new(config: RefinementConfig, policy: P) -> RefinementResult<Self> {
        config.validate()?;
        Ok(Self { config, policy })
    }

    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Refine the clusters of one event in place.
    pub fn run(&self, store: &mut ClusterStore) -> RefinementResult<RefinementReport> {
        let config = &self.config;
        let mut working_set = WorkingSet::initialise(store.iter(), config);
        let mut report = RefinementReport {
            clusters_before: store.len(),
            termination: Termination::IterationLimit,
            ..Default::default()
        };
        debug!(
            clusters = store.len(),
            tracked = working_set.len(),
            "working set initialised"
        );

        while report.iterations < config.max_iterations {
            report.iterations += 1;

            let associations = self
                .policy
                .find_best_associations(&working_set, store, config);
            let Some(association) = associations.into_iter().next() else {
                debug!(iteration = report.iterations, "no association found");
                report.termination = Termination::NoAssociation;
                break;
            };
            report.associations_considered += 1;

            let consumed: BTreeMap<_, _> = association
                .clusters()
                .into_iter()
                .filter_map(|id| working_set.take(id).map(|entry| (id, entry)))
                .collect();

            let extrapolated = self.policy.extrapolated_hits(&association, store, config);

            if !self
                .policy
                .is_extrapolated_endpoint_near_boundary(&association, config.boundary_tolerance)
            {
                debug!(clusters = ?association.clusters(), "merge point far from cluster end, rejected");
                report.rejected_near_boundary += 1;
                continue;
            }

            if !is_track_continuous(
                association.geometry(),
                &extrapolated,
                config.max_track_gaps,
                config.line_segment_length,
            )? {
                debug!(
                    clusters = ?association.clusters(),
                    n_extrapolated = extrapolated.len(),
                    "gap along connecting line, rejected"
                );
                report.rejected_continuity += 1;
                continue;
            }

            let mut ctx = RefinementContext {
                store: &mut *store,
                working_set: &mut working_set,
                consumed: &consumed,
                config,
            };
            let outcome = self
                .policy
                .create_main_track(&association, &extrapolated, &mut ctx)?;
            report.tracks_built += 1;
            report.hits_reassigned += outcome.hits_reassigned;
            report.main_tracks.push(outcome.main_track);
        }

        report.clusters_after = store.len();
        info!(
            iterations = report.iterations,
            tracks_built = report.tracks_built,
            rejected = report.rejected_near_boundary + report.rejected_continuity,
            hits_reassigned = report.hits_reassigned,
            clusters_before = report.clusters_before,
            clusters_after = report.clusters_after,
            termination = ?report.termination,
            "refinement finished"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::{ClusterAssociation, ExtrapolatedHitSet};
    use crate::endpoint_policy::EndpointPolicy;
    use crate::error::RefinementError;
    use crate::policy::MainTrackOutcome;
    use crate::types::{Hit, HitId, Vec2};
    use std::cell::Cell;

    fn column(first_id: u64, n: usize, x: f64, y0: f64, step: f64) -> Vec<Hit> {
        (0..n)
            .map(|i| Hit::new(HitId(first_id + i as u64), x, y0 + step * i as f64, 1.0))
            .collect()
    }

    fn all_hit_ids(store: &ClusterStore) -> Vec<HitId> {
        let mut ids: Vec<HitId> = store.iter().flat_map(|c| c.hit_ids()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn invalid_config_rejected_at_construction() {
        let cfg = RefinementConfig {
            line_segment_length: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            TrackRefinement::new(cfg, EndpointPolicy::default()),
            Err(RefinementError::NonPositiveSegmentLength(_))
        ));
    }

    #[test]
    fn bridged_gap_becomes_one_track() {
        let mut store = ClusterStore::from_hit_groups([
            column(0, 100, 0.0, 0.0, 0.3),
            column(1000, 100, 0.0, 45.0, 0.3),
            column(2000, 14, 0.0, 31.0, 1.0),
        ])
        .unwrap();
        let before = all_hit_ids(&store);

        let refinement =
            TrackRefinement::new(RefinementConfig::default(), EndpointPolicy::default()).unwrap();
        let report = refinement.run(&mut store).unwrap();

        assert_eq!(report.tracks_built, 1);
        assert_eq!(report.termination, Termination::NoAssociation);
        assert_eq!(report.iterations, 2);
        assert_eq!(report.clusters_before, 3);
        assert_eq!(report.clusters_after, 1);
        assert_eq!(report.main_tracks, vec![ClusterId(0)]);
        assert_eq!(all_hit_ids(&store), before);
    }

    #[test]
    fn empty_gap_is_rejected_and_not_retried() {
        let mut store = ClusterStore::from_hit_groups([
            column(0, 100, 0.0, 0.0, 0.3),
            column(1000, 100, 0.0, 50.0, 0.3),
        ])
        .unwrap();
        let refinement =
            TrackRefinement::new(RefinementConfig::default(), EndpointPolicy::default()).unwrap();
        let report = refinement.run(&mut store).unwrap();

        assert_eq!(report.tracks_built, 0);
        assert_eq!(report.rejected_continuity, 1);
        assert_eq!(report.associations_considered, 1);
        assert_eq!(report.termination, Termination::NoAssociation);
        assert_eq!(store.len(), 2);
    }

    /// Policy that proposes the same empty association forever.
    struct Stubborn {
        calls: Cell<usize>,
    }

    struct Nothing(ClusterAssociation);

    impl Association for Nothing {
        fn geometry(&self) -> &ClusterAssociation {
            &self.0
        }
        fn clusters(&self) -> Vec<ClusterId> {
            Vec::new()
        }
    }

    impl AssociationPolicy for Stubborn {
        type Association = Nothing;

        fn find_best_associations(
            &self,
            _: &WorkingSet,
            _: &ClusterStore,
            _: &RefinementConfig,
        ) -> Vec<Nothing> {
            self.calls.set(self.calls.get() + 1);
            let geometry =
                ClusterAssociation::new(Vec2::new(0.0, 0.0), Vec2::new(0.0, 1.0)).unwrap();
            vec![Nothing(geometry)]
        }

        fn extrapolated_hits(
            &self,
            _: &Nothing,
            _: &ClusterStore,
            _: &RefinementConfig,
        ) -> ExtrapolatedHitSet {
            ExtrapolatedHitSet::new()
        }

        fn is_extrapolated_endpoint_near_boundary(&self, _: &Nothing, _: f64) -> bool {
            false
        }

        fn create_main_track(
            &self,
            _: &Nothing,
            _: &ExtrapolatedHitSet,
            _: &mut RefinementContext<'_>,
        ) -> RefinementResult<MainTrackOutcome> {
            unreachable!("every association is rejected")
        }
    }

    #[test]
    fn loop_is_bounded_by_max_iterations() {
        let policy = Stubborn {
            calls: Cell::new(0),
        };
        let cfg = RefinementConfig {
            max_iterations: 7,
            ..Default::default()
        };
        let refinement = TrackRefinement::new(cfg, policy).unwrap();
        let report = refinement.run(&mut ClusterStore::new()).unwrap();
        assert_eq!(report.iterations, 7);
        assert_eq!(report.rejected_near_boundary, 7);
        assert_eq!(report.termination, Termination::IterationLimit);
        assert_eq!(refinement.policy().calls.get(), 7);
    }
}
