//! Continuity check along a connecting line.
//!
//! The line between the two merge points is cut into segments of roughly
//! `LineSegmentLength`. Extrapolated hits, sorted along the line, are walked
//! once against the segments; the association is rejected as soon as more
//! than `MaxTrackGaps` consecutive segments are empty.

use crate::association::{ClusterAssociation, ExtrapolatedHitSet};
use crate::error::{RefinementError, RefinementResult};
use crate::types::{Hit, Vec2};

/// Projections closer than this are ties when sorting along a line.
pub const PROJECTION_TOLERANCE: f64 = 1e-9;

/// Segment boundary points from the upstream to the downstream merge point.
///
/// A remainder longer than half a segment is shared evenly with the last
/// full segment; a shorter one is folded into it.
pub fn segment_boundaries(
    association: &ClusterAssociation,
    segment_length: f64,
) -> RefinementResult<Vec<Vec2>> {
    if !(segment_length >= f64::EPSILON) {
        return Err(RefinementError::NonPositiveSegmentLength(segment_length));
    }
    let upstream = association.upstream_merge_point();
    let direction = association.connecting_line_direction();
    let length = association.length();

    let full_segments = (length / segment_length).floor() as usize;
    if full_segments == 0 {
        return Ok(vec![upstream, association.downstream_merge_point()]);
    }

    let remainder = length - full_segments as f64 * segment_length;
    let split_remainder = remainder > 0.5 * segment_length;
    let n_boundaries = full_segments + if split_remainder { 2 } else { 1 };

    let mut boundaries = Vec::with_capacity(n_boundaries);
    let mut current = upstream;
    boundaries.push(current);
    for i in 1..n_boundaries {
        let step = if i < full_segments {
            segment_length
        } else if split_remainder {
            0.5 * (segment_length + remainder)
        } else {
            segment_length + remainder
        };
        current += direction * step;
        boundaries.push(current);
    }
    Ok(boundaries)
}

/// Whether `point` lies between the boundary lines through `lower` and
/// `upper`. Both lines have slope −Δx/Δy of the pair; the point is outside
/// only when it is strictly on the same side of both.
pub fn is_in_line_segment(lower: &Vec2, upper: &Vec2, point: &Vec2) -> bool {
    let gradient = -(upper.x - lower.x) / (upper.y - lower.y);
    let x_on_upper = (point.y - upper.y) / gradient + upper.x;
    let x_on_lower = (point.y - lower.y) / gradient + lower.x;

    let beyond_both = point.x > x_on_upper && point.x > x_on_lower;
    let before_both = point.x < x_on_upper && point.x < x_on_lower;
    !(beyond_both || before_both)
}

/// Sort hits by projection onto the connecting line, then by descending
/// pulse height, then by id.
///
/// Projections within [`PROJECTION_TOLERANCE`] of the first hit of their
/// run count as equal, so hits placed symmetrically about a slanted line
/// still reach the pulse-height tie-break.
pub fn sort_along_line(association: &ClusterAssociation, hits: &mut [Hit]) {
    let mut keyed: Vec<(f64, Hit)> = hits
        .iter()
        .map(|hit| (association.projection(&hit.position()), *hit))
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

    let mut start = 0;
    while start < keyed.len() {
        let anchor = keyed[start].0;
        let end = keyed[start..]
            .iter()
            .position(|(p, _)| p - anchor > PROJECTION_TOLERANCE)
            .map_or(keyed.len(), |offset| start + offset);
        keyed[start..end].sort_by(|a, b| {
            b.1.pulse_height
                .total_cmp(&a.1.pulse_height)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        start = end;
    }

    for (slot, (_, hit)) in hits.iter_mut().zip(keyed) {
        *slot = hit;
    }
}

/// Whether the extrapolated hits cover the connecting line with no more than
/// `max_track_gaps` consecutive empty segments.
pub fn is_track_continuous(
    association: &ClusterAssociation,
    extrapolated: &ExtrapolatedHitSet,
    max_track_gaps: usize,
    segment_length: f64,
) -> RefinementResult<bool> {
    let mut hits = extrapolated.all_hits();
    sort_along_line(association, &mut hits);

    let boundaries = segment_boundaries(association, segment_length)?;
    if boundaries.len() < 2 {
        return Err(RefinementError::TooFewSegmentBoundaries(boundaries.len()));
    }

    let mut next = 0;
    let mut gaps = 0;
    for pair in boundaries.windows(2) {
        let (lower, upper) = (&pair[0], &pair[1]);
        let lower_projection = association.projection(lower);
        let inside = |hit: &Hit| is_in_line_segment(lower, upper, &hit.position());

        while next < hits.len()
            && association.projection(&hits[next].position()) < lower_projection
            && !inside(&hits[next])
        {
            next += 1;
        }

        let mut n_inside = 0;
        while next < hits.len() && inside(&hits[next]) {
            n_inside += 1;
            next += 1;
        }

        gaps = if n_inside == 0 { gaps + 1 } else { 0 };
        if gaps > max_track_gaps {
            return Ok(false);
        }
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
