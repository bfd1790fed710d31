//! Event-wide cluster arena.
//!
//! The store owns every cluster of an event and is the only place where hits
//! change hands. Three primitives mutate it: [`ClusterStore::insert`],
//! [`ClusterStore::merge_and_delete`] and [`ClusterStore::commit`]. Each one
//! either applies completely or leaves the store untouched.

use crate::error::{RefinementError, RefinementResult};
use crate::types::{Cluster, ClusterId, Hit, HitId};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::trace;

/// Re-partition of one source cluster's hits.
///
/// Hits are accumulated into numbered groups and optionally into a transfer
/// set destined for an existing cluster. [`ClusterStore::commit`] checks that
/// the partition holds exactly the source's hits before applying it.
#[derive(Clone, Debug)]
pub struct Partition {
    source: ClusterId,
    transfer_target: Option<ClusterId>,
    transferred: Vec<Hit>,
    groups: Vec<Vec<Hit>>,
}

impl Partition {
    /// Partition of `source` into `n_groups` new clusters.
    pub fn new(source: ClusterId, n_groups: usize) -> Self {
        Self {
            source,
            transfer_target: None,
            transferred: Vec::new(),
            groups: vec![Vec::new(); n_groups],
        }
    }

    /// Partition that additionally moves some hits into `target`.
    pub fn with_transfer(source: ClusterId, target: ClusterId, n_groups: usize) -> Self {
        Self {
            transfer_target: Some(target),
            ..Self::new(source, n_groups)
        }
    }

    /// Partition built from pre-grouped hits.
    pub fn from_groups(source: ClusterId, groups: Vec<Vec<Hit>>) -> Self {
        Self {
            source,
            transfer_target: None,
            transferred: Vec::new(),
            groups,
        }
    }

    pub fn source(&self) -> ClusterId {
        self.source
    }

    /// Assign a hit to a group. Out-of-range groups drop the hit, which the
    /// conservation check at commit time reports.
    pub fn assign(&mut self, group: usize, hit: Hit) {
        if let Some(g) = self.groups.get_mut(group) {
            g.push(hit);
        }
    }

    /// Mark a hit for transfer to the target cluster.
    pub fn transfer(&mut self, hit: Hit) {
        self.transferred.push(hit);
    }

    pub fn group(&self, group: usize) -> &[Hit] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn transferred(&self) -> &[Hit] {
        &self.transferred
    }

    fn n_hits(&self) -> usize {
        self.transferred.len() + self.groups.iter().map(Vec::len).sum::<usize>()
    }
}

/// All clusters of one event, keyed by monotonically increasing id.
#[derive(Clone, Debug, Default)]
pub struct ClusterStore {
    clusters: BTreeMap<ClusterId, Cluster>,
    owners: HashMap<HitId, ClusterId>,
    next_id: u64,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store with one cluster per hit group, ids assigned in order.
    pub fn from_hit_groups(
        groups: impl IntoIterator<Item = Vec<Hit>>,
    ) -> RefinementResult<Self> {
        let mut store = Self::new();
        for hits in groups {
            store.insert(hits)?;
        }
        Ok(store)
    }

    /// Create a new cluster from hits not yet owned by any cluster.
    pub fn insert(&mut self, hits: Vec<Hit>) -> RefinementResult<ClusterId> {
        if hits.is_empty() {
            return Err(RefinementError::EmptyCluster);
        }
        let mut seen = HashSet::with_capacity(hits.len());
        for hit in &hits {
            if let Some(&owner) = self.owners.get(&hit.id) {
                return Err(RefinementError::DuplicateHit { hit: hit.id, owner });
            }
            if !seen.insert(hit.id) {
                return Err(RefinementError::DuplicateHit {
                    hit: hit.id,
                    owner: ClusterId(self.next_id),
                });
            }
        }
        Ok(self.insert_unchecked(hits))
    }

    fn insert_unchecked(&mut self, hits: Vec<Hit>) -> ClusterId {
        let id = ClusterId(self.next_id);
        self.next_id += 1;
        for hit in &hits {
            self.owners.insert(hit.id, id);
        }
        self.clusters.insert(id, Cluster::new(id, hits));
        id
    }

    pub fn get(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(&id)
    }

    /// Like [`get`](Self::get) but unknown ids are an error.
    pub fn cluster(&self, id: ClusterId) -> RefinementResult<&Cluster> {
        self.clusters
            .get(&id)
            .ok_or(RefinementError::UnknownCluster(id))
    }

    pub fn contains(&self, id: ClusterId) -> bool {
        self.clusters.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn n_hits(&self) -> usize {
        self.owners.len()
    }

    pub fn ids(&self) -> Vec<ClusterId> {
        self.clusters.keys().copied().collect()
    }

    /// Clusters in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values()
    }

    pub fn owner_of(&self, hit: HitId) -> Option<ClusterId> {
        self.owners.get(&hit).copied()
    }

    /// Move every hit of `donor` into `target` and delete `donor`.
    pub fn merge_and_delete(&mut self, target: ClusterId, donor: ClusterId) -> RefinementResult<()> {
        if target == donor {
            return Err(RefinementError::SelfMerge(target));
        }
        if !self.contains(target) {
            return Err(RefinementError::UnknownCluster(target));
        }
        let hits = self
            .clusters
            .remove(&donor)
            .ok_or(RefinementError::UnknownCluster(donor))?
            .into_hits();
        trace!(%target, %donor, n_hits = hits.len(), "merging cluster");
        for hit in &hits {
            self.owners.insert(hit.id, target);
        }
        if let Some(cluster) = self.clusters.get_mut(&target) {
            cluster.extend(hits);
        }
        Ok(())
    }

    /// Apply a partition: the source cluster is deleted, transferred hits
    /// join the target and every non-empty group becomes a new cluster.
    ///
    /// Returns the new cluster id per group (`None` for empty groups).
    pub fn commit(&mut self, partition: Partition) -> RefinementResult<Vec<Option<ClusterId>>> {
        let source = self.cluster(partition.source)?;
        if let Some(target) = partition.transfer_target {
            if target == partition.source {
                return Err(RefinementError::SelfMerge(target));
            }
            if !self.contains(target) {
                return Err(RefinementError::UnknownCluster(target));
            }
        }

        let mismatch = || RefinementError::PartitionMismatch {
            cluster: partition.source,
            expected: source.n_hits(),
            found: partition.n_hits(),
        };
        if partition.transfer_target.is_none() && !partition.transferred.is_empty() {
            return Err(mismatch());
        }
        let mut expected = source.hit_ids();
        expected.sort_unstable();
        let mut found: Vec<HitId> = partition
            .transferred
            .iter()
            .chain(partition.groups.iter().flatten())
            .map(|h| h.id)
            .collect();
        found.sort_unstable();
        if expected != found {
            return Err(mismatch());
        }

        let Partition {
            source,
            transfer_target,
            transferred,
            groups,
        } = partition;
        self.clusters.remove(&source);

        if let Some(target) = transfer_target {
            trace!(%source, %target, n_hits = transferred.len(), "transferring hits");
            for hit in &transferred {
                self.owners.insert(hit.id, target);
            }
            if let Some(cluster) = self.clusters.get_mut(&target) {
                cluster.extend(transferred);
            }
        }

        let created = groups
            .into_iter()
            .map(|hits| (!hits.is_empty()).then(|| self.insert_unchecked(hits)))
            .collect();
        Ok(created)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
