//! Cluster associations: the geometry joining two fragments, the hits that
//! lie along it, and merge-point resolution.
//!
//! # Merge points
//! A cluster's merge point is found by walking its micro fit from the end
//! facing the partner. The first run of at least `ceil(layers × fraction)`
//! consecutive layers whose local direction agrees with the partner's
//! average direction (cosine above `MergePointMinCosAngleDeviation`) fixes
//! the merge point at the run's first layer.

use crate::config::RefinementConfig;
use crate::types::{ClusterId, Hit, HitId, Vec2};
use serde::Serialize;
use std::collections::BTreeMap;
use trajectory_fit::SlidingFit;

/// Straight line between two merge points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ClusterAssociation {
    upstream_merge_point: Vec2,
    downstream_merge_point: Vec2,
    connecting_line_direction: Vec2,
}

impl ClusterAssociation {
    /// `None` when the merge points coincide.
    pub fn new(upstream_merge_point: Vec2, downstream_merge_point: Vec2) -> Option<Self> {
        let delta = downstream_merge_point - upstream_merge_point;
        let connecting_line_direction = delta.try_normalize(f64::EPSILON)?;
        Some(Self {
            upstream_merge_point,
            downstream_merge_point,
            connecting_line_direction,
        })
    }

    pub fn upstream_merge_point(&self) -> Vec2 {
        self.upstream_merge_point
    }

    pub fn downstream_merge_point(&self) -> Vec2 {
        self.downstream_merge_point
    }

    /// Unit vector from upstream to downstream.
    pub fn connecting_line_direction(&self) -> Vec2 {
        self.connecting_line_direction
    }

    pub fn length(&self) -> f64 {
        (self.downstream_merge_point - self.upstream_merge_point).norm()
    }

    /// Signed distance of `point` along the connecting line, from the
    /// upstream merge point.
    pub fn projection(&self, point: &Vec2) -> f64 {
        (point - self.upstream_merge_point).dot(&self.connecting_line_direction)
    }

    /// Perpendicular distance of `point` from the (infinite) connecting line.
    pub fn distance_from_line(&self, point: &Vec2) -> f64 {
        self.connecting_line_direction
            .perp(&(point - self.upstream_merge_point))
            .abs()
    }
}

/// An association variant produced by an [`AssociationPolicy`].
///
/// [`AssociationPolicy`]: crate::policy::AssociationPolicy
pub trait Association {
    fn geometry(&self) -> &ClusterAssociation;

    /// Clusters joined by the association. They leave the working set
    /// while the association is processed.
    fn clusters(&self) -> Vec<ClusterId>;
}

/// Donor cluster → hits lying along a connecting line.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtrapolatedHitSet {
    hits: BTreeMap<ClusterId, Vec<Hit>>,
}

impl ExtrapolatedHitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cluster: ClusterId, hit: Hit) {
        self.hits.entry(cluster).or_default().push(hit);
    }

    /// Extrapolated hits of one donor (empty if it has none).
    pub fn get(&self, cluster: ClusterId) -> &[Hit] {
        self.hits.get(&cluster).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_hit(&self, cluster: ClusterId, hit: HitId) -> bool {
        self.get(cluster).iter().any(|h| h.id == hit)
    }

    /// Donors in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ClusterId, &[Hit])> {
        self.hits.iter().map(|(&id, hits)| (id, hits.as_slice()))
    }

    pub fn clusters(&self) -> Vec<ClusterId> {
        self.hits.keys().copied().collect()
    }

    /// Every extrapolated hit, grouped by donor.
    pub fn all_hits(&self) -> Vec<Hit> {
        self.hits.values().flatten().copied().collect()
    }

    /// Total number of hits over all donors.
    pub fn len(&self) -> usize {
        self.hits.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Where and in which direction a cluster joins its partner.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MergePoint {
    pub position: Vec2,
    pub direction: Vec2,
}

/// Number of consecutive agreeing layers needed to fix a merge point.
pub fn stability_window(n_layers: usize, fraction: f64) -> usize {
    ((n_layers as f64 * fraction).ceil() as usize).max(1)
}

/// Resolve the merge point of a cluster facing `partner_macro`.
///
/// The upstream cluster (`is_upstream`) is walked from its outermost layer
/// inwards, the downstream cluster from its innermost layer outwards.
pub fn resolve_merge_point(
    micro_fit: &SlidingFit,
    macro_fit: &SlidingFit,
    partner_macro: &SlidingFit,
    is_upstream: bool,
    config: &RefinementConfig,
) -> Option<MergePoint> {
    let cluster_direction = macro_fit.average_direction();
    let partner_direction = partner_macro.average_direction();

    let layers = micro_fit.layer_fit_results();
    let window = stability_window(layers.len(), config.stable_region_cluster_fraction);
    let mut walk: Vec<_> = layers.values().collect();
    if is_upstream {
        walk.reverse();
    }

    let agrees = walk.iter().map(|result| {
        let direction = micro_fit.global_direction(result.gradient);
        direction.dot(&partner_direction) > config.merge_point_min_cos_angle_deviation
    });
    let first = first_stable_run(agrees, window)?;
    Some(MergePoint {
        position: micro_fit.global_fit_position(walk[first].l),
        direction: cluster_direction,
    })
}

/// Index of the first element of the first run of at least `window`
/// consecutive `true` values. Any `false` restarts the count.
pub fn first_stable_run(agrees: impl IntoIterator<Item = bool>, window: usize) -> Option<usize> {
    let mut run = 0;
    for (i, agree) in agrees.into_iter().enumerate() {
        if !agree {
            run = 0;
            continue;
        }
        run += 1;
        if run >= window {
            return Some(i + 1 - run);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn fit(points: &[Vec2], window: usize) -> SlidingFit {
        SlidingFit::new(points, window, 0.3).unwrap()
    }

    fn line_points(n: usize, start: Vec2, step: Vec2) -> Vec<Vec2> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn geometry_queries() {
        let a = ClusterAssociation::new(Vec2::new(1.0, 1.0), Vec2::new(1.0, 5.0)).unwrap();
        assert_abs_diff_eq!(a.length(), 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(a.connecting_line_direction(), Vec2::new(0.0, 1.0), epsilon = 1e-12);
        assert_abs_diff_eq!(a.projection(&Vec2::new(3.0, 2.0)), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(a.distance_from_line(&Vec2::new(3.0, 2.0)), 2.0, epsilon = 1e-12);
        assert!(ClusterAssociation::new(Vec2::new(1.0, 1.0), Vec2::new(1.0, 1.0)).is_none());
    }

    #[test]
    fn stability_window_is_at_least_one() {
        assert_eq!(stability_window(20, 0.05), 1);
        assert_eq!(stability_window(100, 0.05), 5);
        assert_eq!(stability_window(101, 0.05), 6);
        assert_eq!(stability_window(10, 0.0), 1);
    }

    #[test]
    fn broken_run_restarts_the_count() {
        let walk = [true, true, false, true, true, true, true];
        assert_eq!(first_stable_run(walk, 3), Some(3));
        assert_eq!(first_stable_run(walk, 2), Some(0));
        assert_eq!(first_stable_run(walk, 1), Some(0));
        assert_eq!(first_stable_run(walk, 5), None);
        assert_eq!(first_stable_run([false, true, false, true], 2), None);
        assert_eq!(first_stable_run([false, false, true], 1), Some(2));
    }

    #[test]
    fn aligned_upstream_cluster_merges_at_its_far_end() {
        let up = line_points(60, Vec2::new(0.0, 0.0), Vec2::new(0.0, 0.3));
        let down = line_points(60, Vec2::new(0.0, 30.0), Vec2::new(0.0, 0.3));
        let (micro, macro_fit, partner) = (fit(&up, 20), fit(&up, 1000), fit(&down, 1000));
        let cfg = RefinementConfig::default();

        let mp = resolve_merge_point(&micro, &macro_fit, &partner, true, &cfg).unwrap();
        let end = micro.global_max_layer_position();
        assert_abs_diff_eq!(mp.position, end, epsilon = 1e-9);
        assert_abs_diff_eq!(mp.direction, Vec2::new(0.0, 1.0), epsilon = 1e-9);

        let mp = resolve_merge_point(&micro, &macro_fit, &partner, false, &cfg).unwrap();
        assert_abs_diff_eq!(mp.position, micro.global_min_layer_position(), epsilon = 1e-9);
    }

    #[test]
    fn merge_point_skips_bent_end() {
        // Straight along y, then a hook bending away towards +x
        let mut pts = line_points(60, Vec2::new(0.0, 0.0), Vec2::new(0.0, 0.3));
        pts.extend(line_points(20, Vec2::new(0.3, 18.0), Vec2::new(0.3, 0.1)));
        let partner = line_points(60, Vec2::new(0.0, 40.0), Vec2::new(0.0, 0.3));
        let cfg = RefinementConfig {
            micro_sliding_fit_window: 3,
            ..Default::default()
        };
        let micro = fit(&pts, 3);
        let mp = resolve_merge_point(&micro, &fit(&pts, 1000), &fit(&partner, 1000), true, &cfg).unwrap();
        let end = micro.global_max_layer_position();
        assert!(mp.position.y < end.y - 1.0, "merge point should sit before the hook");
    }

    #[test]
    fn misaligned_partner_gives_no_merge_point() {
        let up = line_points(60, Vec2::new(0.0, 0.0), Vec2::new(0.0, 0.3));
        let across = line_points(60, Vec2::new(5.0, 30.0), Vec2::new(0.3, 0.0));
        let cfg = RefinementConfig::default();
        let up_micro = fit(&up, 20);
        let up_macro = fit(&up, 1000);
        assert!(resolve_merge_point(&up_micro, &up_macro, &fit(&across, 1000), true, &cfg).is_none());
    }

    #[test]
    fn extrapolated_hit_set_groups_by_donor() {
        let mut set = ExtrapolatedHitSet::new();
        set.insert(ClusterId(3), Hit::new(HitId(1), 0.0, 0.0, 1.0));
        set.insert(ClusterId(1), Hit::new(HitId(2), 0.0, 1.0, 1.0));
        set.insert(ClusterId(3), Hit::new(HitId(3), 0.0, 2.0, 1.0));
        assert_eq!(set.len(), 3);
        assert_eq!(set.clusters(), vec![ClusterId(1), ClusterId(3)]);
        assert!(set.contains_hit(ClusterId(3), HitId(3)));
        assert!(!set.contains_hit(ClusterId(1), HitId(3)));
        assert!(set.get(ClusterId(9)).is_empty());
    }
}
