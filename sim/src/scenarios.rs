//! Scenario definitions.
//!
//! A scenario is a set of true trajectories and a recipe saying which pieces
//! of which trajectory end up in which input cluster. Each call to
//! [`Scenario::event`] draws a fresh event from the recipe; all events are
//! deterministic given the scenario seed and the event index.

use crate::hit_sim::{HitSimParams, HitSimulator};
use crate::trajectory::{PathSpec, Trajectory};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use refine_core::error::RefinementResult;
use refine_core::types::Hit;
use refine_core::ClusterStore;
use serde::{Deserialize, Serialize};

/// Hit spacing along well-sampled track sections.
const TRACK_SPACING: f64 = 0.3;

/// Which pre-defined scenario to load.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// One track broken by a shower-like blob into two fragments and a messy middle cluster
    BrokenTrack,
    /// Two collinear fragments with a sparse bridge cluster in the gap
    CleanGap,
    /// Two collinear fragments with nothing in a 20-unit gap
    WideGap,
    /// Clean gap crossed at right angles by an unrelated track
    Crossing,
    /// 24 independent clean-gap tracks side by side
    Stress,
    /// A tightly curving track broken in two; both fragments are too curved to track
    CurvedTrack,
}

/// One ingredient of an input cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Piece {
    /// Hits along `tracks[track]` for arc length in `[from, to]`
    TrackSection {
        track: usize,
        from: f64,
        to: f64,
        spacing: f64,
    },
    /// Shower-like hits scattered over a disc
    Blob {
        centre: [f64; 2],
        radius: f64,
        n_hits: usize,
    },
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub params: HitSimParams,
    pub tracks: Vec<Trajectory>,
    /// Pieces of every input cluster, in cluster id order
    pub clusters: Vec<Vec<Piece>>,
}

/// Input clusters of one simulated event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub scenario_name: String,
    pub index: u64,
    pub seed: u64,
    pub clusters: Vec<Vec<Hit>>,
}

impl Event {
    pub fn n_hits(&self) -> usize {
        self.clusters.iter().map(Vec::len).sum()
    }

    /// Load the event into a fresh store; cluster ids follow the cluster order.
    pub fn to_store(&self) -> RefinementResult<ClusterStore> {
        ClusterStore::from_hit_groups(self.clusters.iter().cloned())
    }
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::BrokenTrack => Self::broken_track(seed),
            ScenarioKind::CleanGap => Self::clean_gap(seed),
            ScenarioKind::WideGap => Self::wide_gap(seed),
            ScenarioKind::Crossing => Self::crossing(seed),
            ScenarioKind::Stress => Self::stress(seed),
            ScenarioKind::CurvedTrack => Self::curved_track(seed),
        }
    }

    /// Draw event number `index`.
    pub fn event(&self, index: u64) -> Event {
        let seed = self.seed.wrapping_add(index.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mut sim = HitSimulator::new(self.params.clone(), seed);
        let clusters = self
            .clusters
            .iter()
            .map(|pieces| {
                pieces
                    .iter()
                    .flat_map(|piece| self.sample(&mut sim, piece))
                    .collect::<Vec<Hit>>()
            })
            .filter(|hits| !hits.is_empty())
            .collect();
        Event {
            scenario_name: self.name.clone(),
            index,
            seed,
            clusters,
        }
    }

    pub fn events(&self, n: u64) -> Vec<Event> {
        (0..n).map(|i| self.event(i)).collect()
    }

    fn sample(&self, sim: &mut HitSimulator, piece: &Piece) -> Vec<Hit> {
        match *piece {
            Piece::TrackSection {
                track,
                from,
                to,
                spacing,
            } => match self.tracks.get(track) {
                Some(t) => sim.sample_section(t, from, to, spacing),
                None => Vec::new(),
            },
            Piece::Blob {
                centre,
                radius,
                n_hits,
            } => sim.sample_blob(centre, radius, n_hits),
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 1: Broken track
    // -----------------------------------------------------------------------
    fn broken_track(seed: u64) -> Self {
        let track = Trajectory::straight(0, [20.0, 5.0], 10f64.to_radians(), 90.0);
        let blob_centre = track.point_at(42.5);
        let clusters = vec![
            vec![section(0, 0.0, 35.0, TRACK_SPACING)],
            vec![section(0, 50.0, 90.0, TRACK_SPACING)],
            // Too small to enter the working set on its own
            vec![
                section(0, 35.6, 49.7, 0.6),
                Piece::Blob {
                    centre: blob_centre,
                    radius: 4.0,
                    n_hits: 20,
                },
            ],
        ];
        Self {
            name: "BrokenTrack".into(),
            seed,
            params: HitSimParams::default(),
            tracks: vec![track],
            clusters,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 2: Clean gap
    // -----------------------------------------------------------------------
    fn clean_gap(seed: u64) -> Self {
        let track = Trajectory::straight(0, [20.0, 5.0], 10f64.to_radians(), 90.0);
        Self {
            name: "CleanGap".into(),
            seed,
            params: HitSimParams::default(),
            tracks: vec![track],
            clusters: gap_clusters(0, 47.0, true),
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 3: Wide gap
    // -----------------------------------------------------------------------
    fn wide_gap(seed: u64) -> Self {
        let track = Trajectory::straight(0, [20.0, 5.0], 10f64.to_radians(), 90.0);
        Self {
            name: "WideGap".into(),
            seed,
            params: HitSimParams::default(),
            tracks: vec![track],
            clusters: gap_clusters(0, 55.0, false),
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 4: Crossing
    // -----------------------------------------------------------------------
    fn crossing(seed: u64) -> Self {
        let main = Trajectory::straight(0, [20.0, 5.0], 10f64.to_radians(), 90.0);
        let angle = 100f64.to_radians();
        let through = main.point_at(41.0);
        let start = [through[0] - 25.0 * angle.sin(), through[1] - 25.0 * angle.cos()];
        let crosser = Trajectory::straight(1, start, angle, 50.0);

        let mut clusters = gap_clusters(0, 47.0, true);
        clusters.push(vec![section(1, 0.0, 50.0, TRACK_SPACING)]);
        Self {
            name: "Crossing".into(),
            seed,
            params: HitSimParams::default(),
            tracks: vec![main, crosser],
            clusters,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 5: Stress
    // -----------------------------------------------------------------------
    fn stress(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut tracks = Vec::new();
        let mut clusters = Vec::new();
        for i in 0..24 {
            let angle = rng.gen_range(-5.0f64..5.0).to_radians();
            tracks.push(Trajectory::straight(
                i as u64,
                [40.0 * i as f64, 5.0],
                angle,
                90.0,
            ));
            clusters.extend(gap_clusters(i, 47.0, true));
        }
        Self {
            name: "Stress".into(),
            seed,
            params: HitSimParams::default(),
            tracks,
            clusters,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 6: Curved track
    // -----------------------------------------------------------------------
    fn curved_track(seed: u64) -> Self {
        // Radius 20: each fragment turns through 80 degrees
        let track = Trajectory {
            id: 0,
            start: [20.0, 5.0],
            angle: -0.7,
            length: 60.0,
            path: PathSpec::Arc { curvature: 0.05 },
        };
        Self {
            name: "CurvedTrack".into(),
            seed,
            params: HitSimParams::default(),
            tracks: vec![track],
            clusters: vec![
                vec![section(0, 0.0, 28.0, TRACK_SPACING)],
                vec![section(0, 32.0, 60.0, TRACK_SPACING)],
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn section(track: usize, from: f64, to: f64, spacing: f64) -> Piece {
    Piece::TrackSection {
        track,
        from,
        to,
        spacing,
    }
}

/// Fragments `[0, 35]` and `[resume, end]` of `track`, plus a sparse bridge
/// cluster over the gap when `bridged`.
fn gap_clusters(track: usize, resume: f64, bridged: bool) -> Vec<Vec<Piece>> {
    let mut clusters = vec![
        vec![section(track, 0.0, 35.0, TRACK_SPACING)],
        vec![section(track, resume, 90.0, TRACK_SPACING)],
    ];
    if bridged {
        clusters.push(vec![section(track, 36.0, resume - 1.0, 1.0)]);
    }
    clusters
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
