//! Fundamental types used across the entire workspace.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// 2D position / direction vector (x = drift coordinate, y = wire coordinate)
pub use trajectory_fit::Vec2;

// ---------------------------------------------------------------------------
// Identifier types: newtype wrappers so IDs are never confused at compile time
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HitId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u64);

impl fmt::Display for HitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H{}", self.0)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Hit
// ---------------------------------------------------------------------------

/// A single detector hit in one 2D projection.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Unique hit identifier within an event
    pub id: HitId,
    /// Drift coordinate
    pub x: f64,
    /// Wire coordinate; hits are layered along it
    pub y: f64,
    /// Deposited charge, used only to break ordering ties
    pub pulse_height: f64,
}

impl Hit {
    pub fn new(id: HitId, x: f64, y: f64, pulse_height: f64) -> Self {
        Self {
            id,
            x,
            y,
            pulse_height,
        }
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn distance_squared_to(&self, point: &Vec2) -> f64 {
        (self.position() - point).norm_squared()
    }

    /// Detector layer order: wire coordinate, then drift coordinate, then id.
    pub fn layer_order(&self, other: &Hit) -> Ordering {
        self.y
            .total_cmp(&other.y)
            .then_with(|| self.x.total_cmp(&other.x))
            .then_with(|| self.id.cmp(&other.id))
    }
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// An ordered set of hits treated as one trajectory fragment.
///
/// Hits are kept in layer order. Clusters are created and mutated only
/// through [`crate::cluster_store::ClusterStore`], which guarantees that no
/// two clusters share a hit.
#[derive(Clone, Debug, Serialize)]
pub struct Cluster {
    id: ClusterId,
    hits: Vec<Hit>,
}

impl Cluster {
    pub(crate) fn new(id: ClusterId, mut hits: Vec<Hit>) -> Self {
        hits.sort_by(Hit::layer_order);
        Self { id, hits }
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    /// Hits in layer order.
    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    pub fn n_hits(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn positions(&self) -> Vec<Vec2> {
        self.hits.iter().map(Hit::position).collect()
    }

    pub fn hit_ids(&self) -> Vec<HitId> {
        self.hits.iter().map(|h| h.id).collect()
    }

    pub fn contains_hit(&self, id: HitId) -> bool {
        self.hits.iter().any(|h| h.id == id)
    }

    /// Smallest distance between `point` and any hit of the cluster.
    pub fn closest_distance_to(&self, point: &Vec2) -> f64 {
        self.hits
            .iter()
            .map(|h| h.distance_squared_to(point))
            .fold(f64::INFINITY, f64::min)
            .sqrt()
    }

    /// Smallest hit-to-hit distance between two clusters.
    pub fn closest_distance(&self, other: &Cluster) -> f64 {
        self.hits
            .iter()
            .map(|h| other.closest_distance_to(&h.position()))
            .fold(f64::INFINITY, f64::min)
    }

    pub(crate) fn extend(&mut self, hits: impl IntoIterator<Item = Hit>) {
        self.hits.extend(hits);
        self.hits.sort_by(Hit::layer_order);
    }

    pub(crate) fn into_hits(self) -> Vec<Hit> {
        self.hits
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
