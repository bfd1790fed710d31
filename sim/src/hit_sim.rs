//! Hit generator.
//!
//! Produces detector hits with:
//! - uniform position smearing on both coordinates
//! - per-hit inefficiency (1 − efficiency)
//! - uniformly distributed pulse heights
//! - shower-like blobs of hits scattered in a disc

use crate::trajectory::Trajectory;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use refine_core::types::{Hit, HitId};
use serde::{Deserialize, Serialize};

/// Detector response parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HitSimParams {
    /// Half-width of the uniform position smearing
    pub position_noise: f64,
    /// Probability that a crossing produces a hit
    pub efficiency: f64,
    pub pulse_mean: f64,
    /// Half-width of the uniform pulse-height spread
    pub pulse_spread: f64,
}

impl Default for HitSimParams {
    fn default() -> Self {
        Self {
            position_noise: 0.02,
            efficiency: 0.97,
            pulse_mean: 100.0,
            pulse_spread: 50.0,
        }
    }
}

/// Generates hits for one event; ids are unique within the event.
pub struct HitSimulator {
    pub params: HitSimParams,
    rng: ChaCha8Rng,
    next_id: u64,
}

impl HitSimulator {
    pub fn new(params: HitSimParams, seed: u64) -> Self {
        Self {
            params,
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_id: 0,
        }
    }

    fn smear(&mut self) -> f64 {
        (self.rng.gen::<f64>() * 2.0 - 1.0) * self.params.position_noise
    }

    fn make_hit(&mut self, x: f64, y: f64) -> Hit {
        let pulse = self.params.pulse_mean + (self.rng.gen::<f64>() * 2.0 - 1.0) * self.params.pulse_spread;
        let hit = Hit::new(HitId(self.next_id), x + self.smear(), y + self.smear(), pulse);
        self.next_id += 1;
        hit
    }

    /// Hits every `spacing` along `trajectory` for arc length in `[from, to]`.
    pub fn sample_section(
        &mut self,
        trajectory: &Trajectory,
        from: f64,
        to: f64,
        spacing: f64,
    ) -> Vec<Hit> {
        let mut hits = Vec::new();
        let (from, to) = (from.max(0.0), to.min(trajectory.length));
        if !(spacing > 0.0) || to < from {
            return hits;
        }
        // Slack keeps the far end when (to - from) is a multiple of spacing
        let n = ((to - from) / spacing + 1e-9).floor() as usize;
        for i in 0..=n {
            if self.rng.gen::<f64>() < self.params.efficiency {
                let [x, y] = trajectory.point_at(from + i as f64 * spacing);
                hits.push(self.make_hit(x, y));
            }
        }
        hits
    }

    /// `n_hits` hits scattered uniformly over a disc.
    pub fn sample_blob(&mut self, centre: [f64; 2], radius: f64, n_hits: usize) -> Vec<Hit> {
        (0..n_hits)
            .map(|_| {
                let r = radius * self.rng.gen::<f64>().sqrt();
                let phi = self.rng.gen::<f64>() * std::f64::consts::TAU;
                self.make_hit(centre[0] + r * phi.cos(), centre[1] + r * phi.sin())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_hits_stay_close_to_the_path() {
        let params = HitSimParams {
            efficiency: 1.0,
            ..Default::default()
        };
        let mut sim = HitSimulator::new(params, 7);
        let t = Trajectory::straight(0, [0.0, 0.0], 0.0, 30.0);
        let hits = sim.sample_section(&t, 0.0, 30.0, 0.3);
        assert_eq!(hits.len(), 101);
        assert!(hits.iter().all(|h| h.x.abs() <= 0.02));
        // Both ends of the section are sampled
        assert!(hits[0].y.abs() <= 0.02);
        assert!((hits[100].y - 30.0).abs() <= 0.02);
    }

    #[test]
    fn section_length_not_a_multiple_of_spacing() {
        let params = HitSimParams {
            efficiency: 1.0,
            ..Default::default()
        };
        let mut sim = HitSimulator::new(params, 1);
        let t = Trajectory::straight(0, [0.0, 0.0], 0.0, 100.0);
        assert_eq!(sim.sample_section(&t, 36.0, 46.0, 1.0).len(), 11);
        assert_eq!(sim.sample_section(&t, 0.0, 1.0, 0.4).len(), 3);
        assert!(sim.sample_section(&t, 5.0, 4.0, 0.3).is_empty());
    }

    #[test]
    fn blob_stays_inside_disc_and_ids_are_unique() {
        let mut sim = HitSimulator::new(HitSimParams::default(), 3);
        let hits = sim.sample_blob([5.0, 5.0], 2.0, 50);
        assert_eq!(hits.len(), 50);
        for h in &hits {
            let r = ((h.x - 5.0).powi(2) + (h.y - 5.0).powi(2)).sqrt();
            assert!(r <= 2.0 + 0.03);
        }
        let mut ids: Vec<_> = hits.iter().map(|h| h.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn same_seed_same_hits() {
        let t = Trajectory::straight(0, [0.0, 0.0], 0.3, 20.0);
        let a = HitSimulator::new(HitSimParams::default(), 11).sample_section(&t, 0.0, 20.0, 0.3);
        let b = HitSimulator::new(HitSimParams::default(), 11).sample_section(&t, 0.0, 20.0, 0.3);
        assert_eq!(a, b);
    }
}
