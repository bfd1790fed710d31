//! Clean-up of the pieces left over after a track is built.
//!
//! Disconnected remnants are broken into spatially coherent fragments;
//! single-hit fragments are handed to the nearest cluster when one is close
//! enough.

use crate::cluster_store::{ClusterStore, Partition};
use crate::config::RefinementConfig;
use crate::error::RefinementResult;
use crate::types::{Cluster, ClusterId, Hit, Vec2};
use tracing::trace;

/// What became of a batch of remnants.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemnantOutcome {
    /// Surviving remnant clusters (fragments that were not absorbed)
    pub created: Vec<ClusterId>,
    /// Clusters that absorbed a single-hit fragment, without duplicates
    pub absorbed_into: Vec<ClusterId>,
}

pub struct RemnantProcessor<'a> {
    config: &'a RefinementConfig,
}

impl<'a> RemnantProcessor<'a> {
    pub fn new(config: &'a RefinementConfig) -> Self {
        Self { config }
    }

    /// Fragment disconnected remnants and re-home single-hit fragments.
    pub fn process(
        &self,
        store: &mut ClusterStore,
        remnants: &[ClusterId],
        main_track: ClusterId,
    ) -> RefinementResult<RemnantOutcome> {
        let mut fragments = Vec::new();
        for &remnant in remnants {
            let Some(cluster) = store.get(remnant) else {
                continue;
            };
            if self.is_disconnected(cluster) {
                fragments.extend(self.fragment(store, remnant)?);
            } else {
                fragments.push(remnant);
            }
        }

        let mut outcome = RemnantOutcome::default();
        for fragment in fragments {
            if store.cluster(fragment)?.n_hits() == 1 {
                if let Some(target) = self.add_to_nearest_cluster(store, fragment, main_track)? {
                    if !outcome.absorbed_into.contains(&target) {
                        outcome.absorbed_into.push(target);
                    }
                    continue;
                }
            }
            outcome.created.push(fragment);
        }
        Ok(outcome)
    }

    /// Whether consecutive hits (layer order) are ever further apart than
    /// `MaxHitSeparationForConnectedCluster`.
    pub fn is_disconnected(&self, cluster: &Cluster) -> bool {
        let max_separation_sq = self.config.max_hit_separation_for_connected_cluster.powi(2);
        cluster
            .hits()
            .windows(2)
            .any(|pair| pair[0].distance_squared_to(&pair[1].position()) > max_separation_sq)
    }

    /// Split a remnant into greedy nearest-neighbour fragments. Returns the
    /// fragment ids (the remnant itself if it forms a single fragment).
    pub fn fragment(
        &self,
        store: &mut ClusterStore,
        remnant: ClusterId,
    ) -> RefinementResult<Vec<ClusterId>> {
        let max_distance = self.config.max_hit_distance_from_cluster;
        let mut groups: Vec<Vec<Hit>> = Vec::new();
        for hit in store.cluster(remnant)?.hits() {
            let position = hit.position();
            let nearest = groups
                .iter()
                .enumerate()
                .map(|(i, g)| (i, closest_distance(g, &position)))
                .filter(|&(_, d)| d < max_distance)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            match nearest {
                Some((i, _)) => groups[i].push(*hit),
                None => groups.push(vec![*hit]),
            }
        }

        if groups.len() <= 1 {
            return Ok(vec![remnant]);
        }
        let n_groups = groups.len();
        let created = store.commit(Partition::from_groups(remnant, groups))?;
        trace!(%remnant, n_groups, "fragmented disconnected remnant");
        Ok(created.into_iter().flatten().collect())
    }

    /// Merge `fragment` into the nearest other cluster if it lies within
    /// `MaxHitDistanceFromCluster`; the main track only counts within
    /// `MaxDistanceFromMainTrack`. Returns the absorbing cluster.
    pub fn add_to_nearest_cluster(
        &self,
        store: &mut ClusterStore,
        fragment: ClusterId,
        main_track: ClusterId,
    ) -> RefinementResult<Option<ClusterId>> {
        let nearest = {
            let cluster = store.cluster(fragment)?;
            let mut nearest: Option<(ClusterId, f64)> = None;
            for other in store.iter() {
                if other.id() == fragment {
                    continue;
                }
                let distance = cluster.closest_distance(other);
                if other.id() == main_track && distance > self.config.max_distance_from_main_track {
                    continue;
                }
                if nearest.map_or(true, |(_, best)| distance < best) {
                    nearest = Some((other.id(), distance));
                }
            }
            nearest
        };

        match nearest {
            Some((target, distance)) if distance < self.config.max_hit_distance_from_cluster => {
                trace!(%fragment, %target, distance, "absorbing single-hit fragment");
                store.merge_and_delete(target, fragment)?;
                Ok(Some(target))
            }
            _ => Ok(None),
        }
    }
}

fn closest_distance(hits: &[Hit], point: &Vec2) -> f64 {
    hits.iter()
        .map(|h| h.distance_squared_to(point))
        .fold(f64::INFINITY, f64::min)
        .sqrt()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HitId;

    fn hit(id: u64, x: f64, y: f64) -> Hit {
        Hit::new(HitId(id), x, y, 1.0)
    }

    fn column(first_id: u64, n: usize, x: f64, y0: f64) -> Vec<Hit> {
        (0..n).map(|i| hit(first_id + i as u64, x, y0 + 0.5 * i as f64)).collect()
    }

    #[test]
    fn connectivity() {
        let cfg = RefinementConfig::default();
        let processor = RemnantProcessor::new(&cfg);
        let store = ClusterStore::from_hit_groups([
            column(0, 5, 0.0, 0.0),
            vec![hit(10, 0.0, 0.0), hit(11, 0.0, 10.0)],
            vec![hit(20, 3.0, 3.0)],
        ])
        .unwrap();
        assert!(!processor.is_disconnected(store.cluster(ClusterId(0)).unwrap()));
        assert!(processor.is_disconnected(store.cluster(ClusterId(1)).unwrap()));
        assert!(!processor.is_disconnected(store.cluster(ClusterId(2)).unwrap()));
    }

    #[test]
    fn fragmentation_conserves_hits() {
        let cfg = RefinementConfig::default();
        let mut hits = column(0, 4, 0.0, 0.0);
        hits.extend(column(10, 4, 0.0, 20.0));
        let mut store = ClusterStore::from_hit_groups([hits]).unwrap();

        let fragments = RemnantProcessor::new(&cfg).fragment(&mut store, ClusterId(0)).unwrap();
        assert_eq!(fragments.len(), 2);
        assert!(!store.contains(ClusterId(0)));
        let sizes: Vec<usize> = fragments
            .iter()
            .map(|&id| store.cluster(id).unwrap().n_hits())
            .collect();
        assert_eq!(sizes, vec![4, 4]);
    }

    #[test]
    fn single_hit_absorbed_only_when_close() {
        let cfg = RefinementConfig::default();
        let mut store = ClusterStore::from_hit_groups([
            column(0, 10, 0.0, 0.0),
            vec![hit(50, 0.5, 2.0)],
            vec![hit(60, 5.0, 2.0)],
        ])
        .unwrap();
        let processor = RemnantProcessor::new(&cfg);
        // Cluster 0 is an ordinary cluster here; main track is elsewhere
        let main = ClusterId(99);
        assert_eq!(
            processor.add_to_nearest_cluster(&mut store, ClusterId(1), main).unwrap(),
            Some(ClusterId(0))
        );
        assert_eq!(
            processor.add_to_nearest_cluster(&mut store, ClusterId(2), main).unwrap(),
            None
        );
        assert!(store.contains(ClusterId(2)));
        assert_eq!(store.cluster(ClusterId(0)).unwrap().n_hits(), 11);
    }

    #[test]
    fn main_track_has_a_tighter_radius() {
        let cfg = RefinementConfig::default();
        let mut store = ClusterStore::from_hit_groups([
            column(0, 10, 0.0, 0.0),
            vec![hit(50, 1.0, 2.0)],
            vec![hit(60, 0.5, 3.0)],
        ])
        .unwrap();
        let processor = RemnantProcessor::new(&cfg);
        // 1.0 from the main track is too far; hit 60 is ~1.1 away
        assert_eq!(
            processor.add_to_nearest_cluster(&mut store, ClusterId(1), ClusterId(0)).unwrap(),
            Some(ClusterId(2))
        );
        // 0.5 from the main track: close enough
        assert_eq!(
            processor.add_to_nearest_cluster(&mut store, ClusterId(2), ClusterId(0)).unwrap(),
            Some(ClusterId(0))
        );
    }

    #[test]
    fn process_mixes_fragmenting_and_absorption() {
        let cfg = RefinementConfig::default();
        // Main track, plus a remnant made of a lone hit near it and a 3-hit blob far away
        let mut remnant = vec![hit(100, 0.3, 1.0)];
        remnant.extend([hit(101, 20.0, 30.0), hit(102, 20.5, 30.0), hit(103, 21.0, 30.0)]);
        let mut store =
            ClusterStore::from_hit_groups([column(0, 10, 0.0, 0.0), remnant]).unwrap();
        let total = store.n_hits();

        let out = RemnantProcessor::new(&cfg)
            .process(&mut store, &[ClusterId(1)], ClusterId(0))
            .unwrap();
        assert_eq!(out.absorbed_into, vec![ClusterId(0)]);
        assert_eq!(out.created.len(), 1);
        assert_eq!(store.cluster(out.created[0]).unwrap().n_hits(), 3);
        assert_eq!(store.cluster(ClusterId(0)).unwrap().n_hits(), 11);
        assert_eq!(store.n_hits(), total);
    }
}
