//! Hit reassignment: splitting a cluster at its merge point and folding
//! extrapolated donor hits into the main track.
//!
//! Both operations stage a [`Partition`] and commit it in one step, so they
//! either fully apply or leave the store untouched.

use crate::association::{ClusterAssociation, ExtrapolatedHitSet};
use crate::cluster_store::{ClusterStore, Partition};
use crate::config::RefinementConfig;
use crate::error::{RefinementError, RefinementResult};
use crate::types::{ClusterId, Hit, HitId, Vec2};
use crate::working_set::TrackedCluster;
use std::collections::HashSet;
use tracing::trace;

const MAIN: usize = 0;
const ABOVE: usize = 1;
const BELOW: usize = 2;

/// Line used to divide removed hits into two sides.
#[derive(Clone, Copy, Debug)]
struct SeparatingLine {
    vertical: bool,
    gradient: f64,
    intercept: f64,
}

impl SeparatingLine {
    fn through(point: &Vec2, direction: &Vec2) -> Self {
        let vertical = direction.x.abs() < f64::EPSILON;
        let gradient = if vertical { 0.0 } else { direction.y / direction.x };
        let intercept = if vertical {
            point.x
        } else {
            point.y - gradient * point.x
        };
        Self {
            vertical,
            gradient,
            intercept,
        }
    }

    fn is_above(&self, point: &Vec2) -> bool {
        let reference = if self.vertical { point.x } else { point.y };
        self.gradient * point.x + self.intercept < reference
    }

    fn side(&self, hit: &Hit) -> usize {
        if self.is_above(&hit.position()) {
            ABOVE
        } else {
            BELOW
        }
    }
}

/// Result of [`TrackBuilder::split_cluster_at_point`].
#[derive(Clone, Debug, PartialEq)]
pub struct SplitOutcome {
    /// Cluster holding the kept hits (the input id when nothing was split)
    pub main_track: ClusterId,
    /// Side clusters cut off beyond the split point
    pub remnants: Vec<ClusterId>,
}

/// Result of [`TrackBuilder::merge_extrapolated_hits`].
#[derive(Clone, Debug, PartialEq)]
pub enum MergeOutcome {
    /// Too few extrapolated hits; donor untouched
    Skipped,
    /// Donor merged whole and deleted
    Absorbed { hits: usize },
    /// Extrapolated hits moved, rest of the donor split into side clusters
    Split {
        transferred: usize,
        remnants: Vec<ClusterId>,
    },
}

pub struct TrackBuilder<'a> {
    config: &'a RefinementConfig,
}

impl<'a> TrackBuilder<'a> {
    pub fn new(config: &'a RefinementConfig) -> Self {
        Self { config }
    }

    /// Cut `cluster` at `split_point`.
    ///
    /// Non-extrapolated hits before the split point (`is_upstream_end`) or
    /// after it (otherwise) are removed and divided by a line through the
    /// split point along the cluster's average direction.
    pub fn split_cluster_at_point(
        &self,
        store: &mut ClusterStore,
        cluster: &TrackedCluster,
        split_point: &Vec2,
        is_upstream_end: bool,
        extrapolated: &ExtrapolatedHitSet,
    ) -> RefinementResult<SplitOutcome> {
        let id = cluster.id;
        let unchanged = SplitOutcome {
            main_track: id,
            remnants: Vec::new(),
        };
        let (split_l, _) = cluster.micro_fit.local_position(split_point);
        let separator =
            SeparatingLine::through(split_point, &cluster.macro_fit.average_direction());

        let mut partition = Partition::new(id, 3);
        for hit in store.cluster(id)?.hits() {
            let (l, _) = cluster.micro_fit.local_position(&hit.position());
            let beyond_split = if is_upstream_end { l < split_l } else { l > split_l };
            let group = if beyond_split && !extrapolated.contains_hit(id, hit.id) {
                separator.side(hit)
            } else {
                MAIN
            };
            partition.assign(group, *hit);
        }

        if partition.group(MAIN).is_empty()
            || (partition.group(ABOVE).is_empty() && partition.group(BELOW).is_empty())
        {
            return Ok(unchanged);
        }

        let removed = partition.group(ABOVE).len() + partition.group(BELOW).len();
        let created = store.commit(partition)?;
        let main_track = created
            .get(MAIN)
            .copied()
            .flatten()
            .ok_or(RefinementError::EmptyCluster)?;
        let remnants: Vec<ClusterId> = created.into_iter().skip(1).flatten().collect();
        trace!(source = %id, %main_track, removed, ?remnants, "split cluster at merge point");
        Ok(SplitOutcome {
            main_track,
            remnants,
        })
    }

    /// Move `hits` (extrapolated hits of `donor`) into `main_track`.
    pub fn merge_extrapolated_hits(
        &self,
        store: &mut ClusterStore,
        main_track: ClusterId,
        donor: ClusterId,
        hits: &[Hit],
        association: &ClusterAssociation,
    ) -> RefinementResult<MergeOutcome> {
        let donor_cluster = store.cluster(donor)?;
        let to_move: HashSet<HitId> = hits
            .iter()
            .map(|h| h.id)
            .filter(|&h| donor_cluster.contains_hit(h))
            .collect();
        if to_move.is_empty() {
            return Ok(MergeOutcome::Skipped);
        }

        let n_donor = donor_cluster.n_hits();
        let fraction = to_move.len() as f64 / n_donor as f64;
        if fraction < self.config.min_hit_fraction_for_hit_removal {
            trace!(%donor, fraction, "donor below hit fraction, skipped");
            return Ok(MergeOutcome::Skipped);
        }

        if to_move.len() == n_donor {
            store.merge_and_delete(main_track, donor)?;
            return Ok(MergeOutcome::Absorbed { hits: n_donor });
        }

        let separator = SeparatingLine::through(
            &association.upstream_merge_point(),
            &association.connecting_line_direction(),
        );
        // The main group stays empty; the main track keeps its id
        let mut partition = Partition::with_transfer(donor, main_track, 3);
        for hit in donor_cluster.hits() {
            if to_move.contains(&hit.id) {
                partition.transfer(*hit);
            } else {
                partition.assign(separator.side(hit), *hit);
            }
        }
        let transferred = partition.transferred().len();
        let remnants: Vec<ClusterId> = store.commit(partition)?.into_iter().flatten().collect();
        trace!(%donor, %main_track, transferred, ?remnants, "moved extrapolated hits");
        Ok(MergeOutcome::Split {
            transferred,
            remnants,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
