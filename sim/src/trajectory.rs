//! True particle trajectories in the 2D detector plane.
//!
//! A trajectory starts at `start`, heads along `angle` (radians, measured
//! from the +y wire axis towards +x) and runs for `length`. Positions are
//! addressed by arc length `s ∈ [0, length]`.

use serde::{Deserialize, Serialize};

/// Shape of a trajectory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PathSpec {
    /// Straight line
    Straight,
    /// Circular arc. Positive curvature bends towards +x.
    Arc { curvature: f64 },
}

/// A simulated particle trajectory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: u64,
    pub start: [f64; 2],
    pub angle: f64,
    pub length: f64,
    pub path: PathSpec,
}

impl Trajectory {
    pub fn straight(id: u64, start: [f64; 2], angle: f64, length: f64) -> Self {
        Self {
            id,
            start,
            angle,
            length,
            path: PathSpec::Straight,
        }
    }

    /// Heading at arc length `s`.
    pub fn angle_at(&self, s: f64) -> f64 {
        match self.path {
            PathSpec::Straight => self.angle,
            PathSpec::Arc { curvature } => self.angle + curvature * s,
        }
    }

    /// Unit direction at arc length `s`.
    pub fn direction_at(&self, s: f64) -> [f64; 2] {
        let a = self.angle_at(s);
        [a.sin(), a.cos()]
    }

    /// Position at arc length `s`.
    pub fn point_at(&self, s: f64) -> [f64; 2] {
        let [x0, y0] = self.start;
        match self.path {
            PathSpec::Arc { curvature } if curvature.abs() > 1e-12 => {
                // Integral of (sin θ, cos θ) with θ = angle + κ·s
                let a1 = self.angle_at(s);
                [
                    x0 + (self.angle.cos() - a1.cos()) / curvature,
                    y0 + (a1.sin() - self.angle.sin()) / curvature,
                ]
            }
            _ => {
                let [dx, dy] = self.direction_at(0.0);
                [x0 + dx * s, y0 + dy * s]
            }
        }
    }
}
