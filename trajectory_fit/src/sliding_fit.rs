//! Sliding linear fit: a layer-indexed, piecewise-linear trajectory model.
//!
//! # Coordinates
//! The fit axis `a` is the principal direction of the point cloud and `p₀`
//! its intercept (the innermost projected point). Each global point `p` maps
//! to a longitudinal coordinate `L` and a transverse coordinate `T`:
//!
//! L = a·(p − p₀),   T = a × (p − p₀),   p = p₀ + L·a + T·n,   n = (−a_y, a_x)
//!
//! # Layers
//! `layer = floor(L / pitch)`. For every layer between the innermost and the
//! outermost occupied layer a line T = c + g·L is fitted by least squares to
//! all points in layers `[layer − window, layer + window]`. A window wider than
//! the cluster gives every layer the same global fit, which is how a "macro"
//! fit yields an average direction.

use crate::error::{FitError, FitResult};
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 2D position / direction vector
pub type Vec2 = Vector2<f64>;

/// Minimum number of points for a fit.
const MIN_POINTS: usize = 2;

/// Eigenvalues / variances below this are treated as zero spread.
const SPREAD_EPSILON: f64 = 1e-12;

/// Largest number of layers a single fit may span.
pub const MAX_LAYER_SPAN: usize = 1 << 20;

/// Axis components smaller than this do not decide the axis orientation.
const ORIENTATION_TOLERANCE: f64 = 1e-3;

/// Fit sample for one layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerFitResult {
    /// Longitudinal coordinate of the layer centre
    pub l: f64,
    /// Fitted transverse coordinate at `l`
    pub fit_t: f64,
    /// Local gradient dT/dL
    pub gradient: f64,
    /// RMS transverse residual of the points inside the window
    pub rms: f64,
}

/// Running least-squares sums for a set of (L, T) samples.
#[derive(Clone, Copy, Debug, Default)]
struct WindowSums {
    n: usize,
    l: f64,
    t: f64,
    ll: f64,
    lt: f64,
    tt: f64,
}

impl WindowSums {
    fn push(&mut self, l: f64, t: f64) {
        self.n += 1;
        self.l += l;
        self.t += t;
        self.ll += l * l;
        self.lt += l * t;
        self.tt += t * t;
    }

    fn plus(&self, o: &Self) -> Self {
        Self {
            n: self.n + o.n,
            l: self.l + o.l,
            t: self.t + o.t,
            ll: self.ll + o.ll,
            lt: self.lt + o.lt,
            tt: self.tt + o.tt,
        }
    }

    fn minus(&self, o: &Self) -> Self {
        Self {
            n: self.n - o.n,
            l: self.l - o.l,
            t: self.t - o.t,
            ll: self.ll - o.ll,
            lt: self.lt - o.lt,
            tt: self.tt - o.tt,
        }
    }

    /// Least-squares line through the samples, evaluated at `l_centre`.
    /// `None` when the samples have no longitudinal spread.
    fn fit(&self, l_centre: f64) -> Option<LayerFitResult> {
        if self.n < MIN_POINTS {
            return None;
        }
        let n = self.n as f64;
        let denom = n * self.ll - self.l * self.l;
        if denom <= SPREAD_EPSILON * n * n {
            return None;
        }
        let gradient = (n * self.lt - self.l * self.t) / denom;
        let intercept = (self.t - gradient * self.l) / n;

        // Σ(t − c − g·l)² expanded in terms of the running sums
        let ss = self.tt + n * intercept * intercept + gradient * gradient * self.ll
            - 2.0 * intercept * self.t
            - 2.0 * gradient * self.lt
            + 2.0 * intercept * gradient * self.l;

        Some(LayerFitResult {
            l: l_centre,
            fit_t: intercept + gradient * l_centre,
            gradient,
            rms: (ss.max(0.0) / n).sqrt(),
        })
    }
}

/// Piecewise-linear trajectory model of one cluster at one window size.
#[derive(Clone, Debug)]
pub struct SlidingFit {
    window: usize,
    pitch: f64,
    axis_intercept: Vec2,
    axis_direction: Vec2,
    ortho_direction: Vec2,
    layer_fits: BTreeMap<i32, LayerFitResult>,
}

impl SlidingFit {
    /// Build the fit for `points` with a half-window of `window` layers of
    /// width `pitch`.
    pub fn new(points: &[Vec2], window: usize, pitch: f64) -> FitResult<Self> {
        if window == 0 {
            return Err(FitError::ZeroWindow);
        }
        if !(pitch > 0.0) {
            return Err(FitError::InvalidPitch(pitch));
        }
        if points.len() < MIN_POINTS {
            return Err(FitError::TooFewPoints {
                found: points.len(),
                required: MIN_POINTS,
            });
        }

        if points.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return Err(FitError::NonFinitePoint);
        }
        let (centroid, axis_direction) = principal_axis(points)?;
        let min_l = points
            .iter()
            .map(|p| (p - centroid).dot(&axis_direction))
            .fold(f64::INFINITY, f64::min);

        let mut fit = Self {
            window,
            pitch,
            axis_intercept: centroid + axis_direction * min_l,
            axis_direction,
            ortho_direction: Vec2::new(-axis_direction.y, axis_direction.x),
            layer_fits: BTreeMap::new(),
        };

        // Per-layer sums over the dense layer range, then prefix sums so each
        // window is a single subtraction.
        let locals: Vec<(f64, f64)> = points.iter().map(|p| fit.local_position(p)).collect();
        let extent = locals.iter().map(|&(l, _)| l).fold(0.0, f64::max);
        if !(extent / pitch < MAX_LAYER_SPAN as f64) {
            return Err(FitError::LayerSpanTooLarge {
                extent,
                pitch,
                max: MAX_LAYER_SPAN,
            });
        }
        let layers: Vec<i32> = locals.iter().map(|&(l, _)| fit.layer(l)).collect();
        let min_layer = layers.iter().copied().min().unwrap_or(0);
        let max_layer = layers.iter().copied().max().unwrap_or(0);
        let span = (max_layer - min_layer) as usize + 1;

        let mut per_layer = vec![WindowSums::default(); span];
        for (&(l, t), &layer) in locals.iter().zip(&layers) {
            per_layer[(layer - min_layer) as usize].push(l, t);
        }
        let mut prefix = Vec::with_capacity(span + 1);
        prefix.push(WindowSums::default());
        for sums in &per_layer {
            let next = prefix[prefix.len() - 1].plus(sums);
            prefix.push(next);
        }

        for i in 0..span {
            let lo = i.saturating_sub(window);
            let hi = i.saturating_add(window).min(span - 1);
            let sums = prefix[hi + 1].minus(&prefix[lo]);
            let layer = min_layer + i as i32;
            if let Some(result) = sums.fit(fit.layer_centre(layer)) {
                fit.layer_fits.insert(layer, result);
            }
        }

        if fit.layer_fits.is_empty() {
            return Err(FitError::NoLayerFits);
        }
        Ok(fit)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub fn axis_intercept(&self) -> Vec2 {
        self.axis_intercept
    }

    pub fn axis_direction(&self) -> Vec2 {
        self.axis_direction
    }

    /// Per-layer fit results, ordered by layer.
    pub fn layer_fit_results(&self) -> &BTreeMap<i32, LayerFitResult> {
        &self.layer_fits
    }

    /// Innermost fitted layer.
    pub fn min_layer(&self) -> i32 {
        self.layer_fits.keys().next().copied().unwrap_or(0)
    }

    /// Outermost fitted layer.
    pub fn max_layer(&self) -> i32 {
        self.layer_fits.keys().next_back().copied().unwrap_or(0)
    }

    /// Layer containing longitudinal coordinate `l`.
    pub fn layer(&self, l: f64) -> i32 {
        (l / self.pitch).floor() as i32
    }

    fn layer_centre(&self, layer: i32) -> f64 {
        (layer as f64 + 0.5) * self.pitch
    }

    /// Global point → (L, T).
    pub fn local_position(&self, position: &Vec2) -> (f64, f64) {
        let d = position - self.axis_intercept;
        (d.dot(&self.axis_direction), self.axis_direction.perp(&d))
    }

    /// (L, T) → global point.
    pub fn global_position(&self, l: f64, t: f64) -> Vec2 {
        self.axis_intercept + self.axis_direction * l + self.ortho_direction * t
    }

    /// Unit global direction for a local gradient dT/dL.
    pub fn global_direction(&self, gradient: f64) -> Vec2 {
        (self.axis_direction + self.ortho_direction * gradient).normalize()
    }

    /// Global direction of the innermost layer fit. For a window spanning the
    /// whole cluster this is the cluster's average direction.
    pub fn average_direction(&self) -> Vec2 {
        let gradient = self
            .layer_fits
            .values()
            .next()
            .map(|r| r.gradient)
            .unwrap_or(0.0);
        self.global_direction(gradient)
    }

    /// Global position on the fitted trajectory at longitudinal coordinate
    /// `l`, interpolating between the neighbouring layer fits. Outside the
    /// fitted range the end layer's line is extended.
    pub fn global_fit_position(&self, l: f64) -> Vec2 {
        let layer = self.layer(l);
        let below = self
            .layer_fits
            .range(..=layer)
            .rev()
            .map(|(_, r)| r)
            .find(|r| r.l <= l);
        let above = self
            .layer_fits
            .range(layer..)
            .map(|(_, r)| r)
            .find(|r| r.l > l);

        let t = match (below, above) {
            (Some(lo), Some(hi)) => {
                let w = (l - lo.l) / (hi.l - lo.l);
                lo.fit_t + w * (hi.fit_t - lo.fit_t)
            }
            (Some(r), None) | (None, Some(r)) => r.fit_t + r.gradient * (l - r.l),
            (None, None) => 0.0,
        };
        self.global_position(l, t)
    }

    /// Fitted position at the innermost layer.
    pub fn global_min_layer_position(&self) -> Vec2 {
        self.layer_position(self.layer_fits.values().next())
    }

    /// Fitted position at the outermost layer.
    pub fn global_max_layer_position(&self) -> Vec2 {
        self.layer_position(self.layer_fits.values().next_back())
    }

    fn layer_position(&self, result: Option<&LayerFitResult>) -> Vec2 {
        match result {
            Some(r) => self.global_position(r.l, r.fit_t),
            None => self.axis_intercept,
        }
    }
}

/// Centroid and unit principal direction of the point cloud.
///
/// The direction is oriented towards increasing `y`; nearly horizontal axes
/// are oriented towards increasing `x`.
fn principal_axis(points: &[Vec2]) -> FitResult<(Vec2, Vec2)> {
    let n = points.len() as f64;
    let centroid = points.iter().fold(Vec2::zeros(), |acc, p| acc + p) / n;

    let cov = points.iter().fold(Matrix2::zeros(), |acc, p| {
        let d = p - centroid;
        acc + d * d.transpose()
    }) / n;

    let eigen = cov.symmetric_eigen();
    let major = if eigen.eigenvalues[0] >= eigen.eigenvalues[1] {
        0
    } else {
        1
    };
    if eigen.eigenvalues[major] <= SPREAD_EPSILON {
        return Err(FitError::DegenerateGeometry);
    }

    let mut axis: Vec2 = eigen.eigenvectors.column(major).into_owned().normalize();
    let flip = if axis.y.abs() > ORIENTATION_TOLERANCE {
        axis.y < 0.0
    } else {
        axis.x < 0.0
    };
    if flip {
        axis = -axis;
    }
    Ok((centroid, axis))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn line_points(n: usize, start: Vec2, step: Vec2) -> Vec<Vec2> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn straight_line_has_zero_gradient() {
        let pts = line_points(40, Vec2::new(1.0, 2.0), Vec2::new(0.1, 0.3));
        let fit = SlidingFit::new(&pts, 5, 0.3).unwrap();
        for r in fit.layer_fit_results().values() {
            assert_abs_diff_eq!(r.gradient, 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(r.fit_t, 0.0, epsilon = 1e-9);
        }
        let expected = Vec2::new(0.1, 0.3).normalize();
        assert_abs_diff_eq!(fit.average_direction(), expected, epsilon = 1e-9);
    }

    #[test]
    fn axis_points_towards_increasing_y() {
        let pts = line_points(20, Vec2::new(0.0, 10.0), Vec2::new(0.2, -0.5));
        let fit = SlidingFit::new(&pts, 3, 0.3).unwrap();
        assert!(fit.axis_direction().y > 0.0);
        assert!(fit.min_layer() >= 0);
    }

    #[test]
    fn local_global_round_trip() {
        let pts = line_points(30, Vec2::new(-3.0, 0.0), Vec2::new(0.05, 0.4));
        let fit = SlidingFit::new(&pts, 4, 0.3).unwrap();
        let p = Vec2::new(0.7, 5.1);
        let (l, t) = fit.local_position(&p);
        assert_abs_diff_eq!(fit.global_position(l, t), p, epsilon = 1e-9);
    }

    #[test]
    fn fit_position_lies_on_line() {
        let pts = line_points(50, Vec2::new(0.0, 0.0), Vec2::new(0.3, 0.4));
        let fit = SlidingFit::new(&pts, 10, 0.3).unwrap();
        let pos = fit.global_fit_position(7.3);
        // Points satisfy 4x - 3y = 0
        assert_abs_diff_eq!(4.0 * pos.x - 3.0 * pos.y, 0.0, epsilon = 1e-9);
        let (l, _) = fit.local_position(&pos);
        assert_abs_diff_eq!(l, 7.3, epsilon = 1e-9);
    }

    #[test]
    fn small_window_follows_a_bend() {
        // Straight along y, then bending towards +x
        let mut pts = line_points(30, Vec2::new(0.0, 0.0), Vec2::new(0.0, 0.5));
        pts.extend(line_points(30, Vec2::new(0.5, 15.0), Vec2::new(0.5, 0.5)));
        let fit = SlidingFit::new(&pts, 2, 0.5).unwrap();
        let first = fit.layer_fit_results().values().next().unwrap().gradient;
        let last = fit.layer_fit_results().values().next_back().unwrap().gradient;
        assert!((first - last).abs() > 0.5, "local gradients should differ");
    }

    #[test]
    fn macro_window_gives_uniform_gradient() {
        let mut pts = line_points(30, Vec2::new(0.0, 0.0), Vec2::new(0.0, 0.5));
        pts.extend(line_points(30, Vec2::new(0.5, 15.0), Vec2::new(0.5, 0.5)));
        let fit = SlidingFit::new(&pts, 1000, 0.5).unwrap();
        let first = fit.layer_fit_results().values().next().unwrap().gradient;
        for r in fit.layer_fit_results().values() {
            assert_abs_diff_eq!(r.gradient, first, epsilon = 1e-9);
        }
    }

    #[test]
    fn oversized_layer_span_is_rejected() {
        let pts = [Vec2::new(0.0, 0.0), Vec2::new(0.0, 1.0e9)];
        assert!(matches!(
            SlidingFit::new(&pts, 5, 0.3),
            Err(FitError::LayerSpanTooLarge { max: MAX_LAYER_SPAN, .. })
        ));
        let pts = [Vec2::new(0.0, 0.0), Vec2::new(0.0, f64::NAN)];
        assert_eq!(SlidingFit::new(&pts, 5, 0.3).unwrap_err(), FitError::NonFinitePoint);
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        let same = vec![Vec2::new(1.0, 1.0); 10];
        assert_eq!(
            SlidingFit::new(&same, 5, 0.3).unwrap_err(),
            FitError::DegenerateGeometry
        );
        assert!(matches!(
            SlidingFit::new(&[Vec2::new(0.0, 0.0)], 5, 0.3),
            Err(FitError::TooFewPoints { found: 1, .. })
        ));
        let pts = line_points(5, Vec2::zeros(), Vec2::new(0.0, 1.0));
        assert_eq!(SlidingFit::new(&pts, 0, 0.3).unwrap_err(), FitError::ZeroWindow);
        assert!(matches!(
            SlidingFit::new(&pts, 3, 0.0),
            Err(FitError::InvalidPitch(_))
        ));
    }
}
