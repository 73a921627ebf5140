//! Measured boundary polylines
//!
//! A polyline keeps its vertices together with the cumulative arclength so
//! the preprocessor can resample it, query the nearest boundary point to a
//! centerline estimate, and trim open tracks between start and finish
//! coordinates.

use crate::error::{Error, Result};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// A planar polyline with cumulative arclength.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Polyline {
    points: Vec<Vector2<f64>>,
    arclength: Vec<f64>,
}

impl Polyline {
    /// Build a polyline from planar points. Consecutive duplicates are
    /// dropped so the arclength stays strictly increasing.
    pub fn new(points: &[(f64, f64)]) -> Result<Self> {
        let mut deduped: Vec<Vector2<f64>> = Vec::with_capacity(points.len());
        for &(x, y) in points {
            let p = Vector2::new(x, y);
            if deduped
                .last()
                .map_or(true, |last: &Vector2<f64>| (p - last).norm() > 1e-12)
            {
                deduped.push(p);
            }
        }
        if deduped.len() < 2 {
            return Err(Error::invalid_value(
                "polyline",
                &deduped.len().to_string(),
                "a boundary needs at least two distinct points",
            ));
        }
        let mut arclength = Vec::with_capacity(deduped.len());
        let mut total = 0.0;
        arclength.push(0.0);
        for w in deduped.windows(2) {
            total += (w[1] - w[0]).norm();
            arclength.push(total);
        }
        Ok(Self {
            points: deduped,
            arclength,
        })
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when the polyline holds no vertices.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Total arclength.
    pub fn length(&self) -> f64 {
        *self.arclength.last().unwrap_or(&0.0)
    }

    /// Vertex access.
    pub fn point(&self, i: usize) -> Vector2<f64> {
        self.points[i]
    }

    /// All vertices.
    pub fn points(&self) -> &[Vector2<f64>] {
        &self.points
    }

    /// Cumulative arclength at each vertex.
    pub fn arclengths(&self) -> &[f64] {
        &self.arclength
    }

    /// Reverse the traversal direction in place.
    pub fn reverse(&mut self) {
        self.points.reverse();
        let total = self.length();
        let mut rebuilt: Vec<f64> = self.arclength.iter().rev().map(|s| total - s).collect();
        // Guard against negative zeros from the subtraction
        for s in rebuilt.iter_mut() {
            if *s == -0.0 {
                *s = 0.0;
            }
        }
        self.arclength = rebuilt;
    }

    /// Point at arclength `s`, clamped to the ends.
    pub fn point_at(&self, s: f64) -> Vector2<f64> {
        let s = s.clamp(0.0, self.length());
        let i = match self
            .arclength
            .binary_search_by(|a| a.partial_cmp(&s).unwrap_or(std::cmp::Ordering::Less))
        {
            Ok(i) => i.min(self.points.len() - 2),
            Err(i) => i.saturating_sub(1).min(self.points.len() - 2),
        };
        let span = self.arclength[i + 1] - self.arclength[i];
        let t = if span > 0.0 {
            (s - self.arclength[i]) / span
        } else {
            0.0
        };
        self.points[i] + (self.points[i + 1] - self.points[i]) * t
    }

    /// Resample to `n` equally spaced points along arclength.
    pub fn resample(&self, n: usize) -> Result<Self> {
        if n < 2 {
            return Err(Error::invalid_value(
                "n",
                &n.to_string(),
                "resampling needs at least two points",
            ));
        }
        let step = self.length() / (n - 1) as f64;
        let pts: Vec<(f64, f64)> = (0..n)
            .map(|i| {
                let p = self.point_at(i as f64 * step);
                (p.x, p.y)
            })
            .collect();
        Self::new(&pts)
    }

    /// Nearest point on the polyline to `target`, as
    /// `(arclength, distance, point)`, or `None` when nothing lies within
    /// `max_distance`.
    pub fn nearest(&self, target: &Vector2<f64>, max_distance: f64) -> Option<(f64, f64, Vector2<f64>)> {
        let mut best: Option<(f64, f64, Vector2<f64>)> = None;
        for i in 0..self.points.len() - 1 {
            let a = self.points[i];
            let b = self.points[i + 1];
            let ab = b - a;
            let len2 = ab.norm_squared();
            let t = if len2 > 0.0 {
                ((target - a).dot(&ab) / len2).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let p = a + ab * t;
            let d = (target - p).norm();
            let s = self.arclength[i] + (self.arclength[i + 1] - self.arclength[i]) * t;
            if d <= max_distance && best.map_or(true, |(_, bd, _)| d < bd) {
                best = Some((s, d, p));
            }
        }
        best
    }

    /// Keep the section between the arclengths nearest to `start` and
    /// `finish`. The points must each lie within `max_distance` of the
    /// polyline.
    pub fn trim(
        &self,
        start: &Vector2<f64>,
        finish: &Vector2<f64>,
        max_distance: f64,
    ) -> Result<Self> {
        let (s_start, _, _) = self.nearest(start, max_distance).ok_or_else(|| {
            Error::invalid_value(
                "start",
                &format!("({:.1}, {:.1})", start.x, start.y),
                "start point is too far from the boundary",
            )
        })?;
        let (s_finish, _, _) = self.nearest(finish, max_distance).ok_or_else(|| {
            Error::invalid_value(
                "finish",
                &format!("({:.1}, {:.1})", finish.x, finish.y),
                "finish point is too far from the boundary",
            )
        })?;
        if s_finish <= s_start {
            return Err(Error::invalid_value(
                "finish",
                &format!("{:.1} m", s_finish),
                "finish must lie after start along the boundary",
            ));
        }

        let mut pts: Vec<(f64, f64)> = Vec::new();
        let p0 = self.point_at(s_start);
        pts.push((p0.x, p0.y));
        for (i, &s) in self.arclength.iter().enumerate() {
            if s > s_start && s < s_finish {
                pts.push((self.points[i].x, self.points[i].y));
            }
        }
        let p1 = self.point_at(s_finish);
        pts.push((p1.x, p1.y));
        Self::new(&pts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square_open() -> Polyline {
        Polyline::new(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]).unwrap()
    }

    #[test]
    fn test_arclength_accumulates() {
        let p = unit_square_open();
        assert_relative_eq!(p.length(), 3.0);
    }

    #[test]
    fn test_point_at_interpolates() {
        let p = unit_square_open();
        let mid = p.point_at(0.5);
        assert_relative_eq!(mid.x, 0.5);
        assert_relative_eq!(mid.y, 0.0);
        let corner = p.point_at(1.5);
        assert_relative_eq!(corner.x, 1.0);
        assert_relative_eq!(corner.y, 0.5);
    }

    #[test]
    fn test_point_at_clamps() {
        let p = unit_square_open();
        let before = p.point_at(-1.0);
        assert_relative_eq!(before.x, 0.0);
        let after = p.point_at(10.0);
        assert_relative_eq!(after.x, 0.0);
        assert_relative_eq!(after.y, 1.0);
    }

    #[test]
    fn test_reverse_swaps_ends() {
        let mut p = unit_square_open();
        p.reverse();
        let start = p.point_at(0.0);
        assert_relative_eq!(start.x, 0.0);
        assert_relative_eq!(start.y, 1.0);
        assert_relative_eq!(p.length(), 3.0);
    }

    #[test]
    fn test_resample_preserves_ends() {
        let p = unit_square_open();
        let r = p.resample(7).unwrap();
        assert_eq!(r.len(), 7);
        assert_relative_eq!(r.point(0).x, 0.0);
        assert_relative_eq!(r.point(6).x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(r.point(6).y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_nearest_projects_onto_segment() {
        let p = unit_square_open();
        let (s, d, q) = p.nearest(&Vector2::new(0.5, -0.3), 1.0).unwrap();
        assert_relative_eq!(s, 0.5);
        assert_relative_eq!(d, 0.3);
        assert_relative_eq!(q.y, 0.0);
    }

    #[test]
    fn test_nearest_respects_max_distance() {
        let p = unit_square_open();
        assert!(p.nearest(&Vector2::new(0.5, -50.0), 1.0).is_none());
    }

    #[test]
    fn test_trim_keeps_inner_section() {
        let p = unit_square_open();
        let t = p
            .trim(&Vector2::new(0.5, 0.0), &Vector2::new(1.0, 0.5), 1.0)
            .unwrap();
        assert_relative_eq!(t.length(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(t.point(0).x, 0.5);
    }

    #[test]
    fn test_trim_rejects_reversed_points() {
        let p = unit_square_open();
        assert!(p
            .trim(&Vector2::new(1.0, 0.5), &Vector2::new(0.5, 0.0), 1.0)
            .is_err());
    }

    #[test]
    fn test_duplicate_points_dropped() {
        let p = Polyline::new(&[(0.0, 0.0), (0.0, 0.0), (1.0, 0.0)]).unwrap();
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn test_degenerate_polyline_rejected() {
        assert!(Polyline::new(&[(1.0, 1.0), (1.0, 1.0)]).is_err());
    }
}
