//! Piecewise cubic Hermite interpolation
//!
//! The track surface stores nodal values together with nodal derivatives
//! (curvature comes with `dkappa/ds` from the preprocessor) and answers
//! point queries through one cubic segment per element. Closed tracks wrap
//! the query coordinate modulo the period.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Cubic Hermite interpolant over a strictly increasing knot vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubicHermite {
    knots: Vec<f64>,
    values: Vec<f64>,
    slopes: Vec<f64>,
    /// Wrap-around period for closed curves; `None` clamps to the ends.
    period: Option<f64>,
}

impl CubicHermite {
    /// Build an interpolant from knots, values and nodal slopes.
    pub fn new(knots: Vec<f64>, values: Vec<f64>, slopes: Vec<f64>, period: Option<f64>) -> Result<Self> {
        if knots.len() < 2 {
            return Err(Error::invalid_value(
                "knots",
                &knots.len().to_string(),
                "interpolation needs at least two knots",
            ));
        }
        if knots.len() != values.len() || knots.len() != slopes.len() {
            return Err(Error::internal(
                "interpolation arrays must have equal length",
            ));
        }
        if !knots.windows(2).all(|w| w[1] > w[0]) {
            return Err(Error::invalid_value(
                "knots",
                "non-monotone",
                "knot vector must be strictly increasing",
            ));
        }
        if let Some(p) = period {
            if p <= knots[knots.len() - 1] - knots[0] {
                return Err(Error::invalid_value(
                    "period",
                    &p.to_string(),
                    "period must exceed the knot span",
                ));
            }
        }
        Ok(Self {
            knots,
            values,
            slopes,
            period,
        })
    }

    /// Build an interpolant estimating slopes by centered finite differences.
    ///
    /// Closed curves (with `period`) difference across the wrap; open curves
    /// use one-sided differences at the ends.
    pub fn from_values(knots: Vec<f64>, values: Vec<f64>, period: Option<f64>) -> Result<Self> {
        let n = knots.len();
        if n < 2 {
            return Err(Error::invalid_value(
                "knots",
                &n.to_string(),
                "interpolation needs at least two knots",
            ));
        }
        let mut slopes = vec![0.0; n];
        for i in 0..n {
            let (s_prev, y_prev, s_next, y_next) = if i == 0 {
                match period {
                    Some(p) => (
                        knots[n - 1] - p,
                        values[n - 1],
                        knots[1],
                        values[1],
                    ),
                    None => (knots[0], values[0], knots[1], values[1]),
                }
            } else if i == n - 1 {
                match period {
                    Some(p) => (knots[n - 2], values[n - 2], knots[0] + p, values[0]),
                    None => (knots[n - 2], values[n - 2], knots[n - 1], values[n - 1]),
                }
            } else {
                (knots[i - 1], values[i - 1], knots[i + 1], values[i + 1])
            };
            slopes[i] = (y_next - y_prev) / (s_next - s_prev);
        }
        Self::new(knots, values, slopes, period)
    }

    /// Number of knots.
    pub fn len(&self) -> usize {
        self.knots.len()
    }

    /// True when the interpolant has no interior segments.
    pub fn is_empty(&self) -> bool {
        self.knots.is_empty()
    }

    fn wrap(&self, s: f64) -> f64 {
        match self.period {
            Some(p) => {
                let s0 = self.knots[0];
                s0 + (s - s0).rem_euclid(p)
            }
            None => s.clamp(self.knots[0], self.knots[self.knots.len() - 1]),
        }
    }

    /// Segment index whose span contains `s` (after wrapping/clamping).
    fn segment(&self, s: f64) -> usize {
        match self.knots.binary_search_by(|k| {
            k.partial_cmp(&s).unwrap_or(std::cmp::Ordering::Less)
        }) {
            Ok(i) => i.min(self.knots.len() - 2),
            Err(i) => i.saturating_sub(1).min(self.knots.len() - 2),
        }
    }

    /// Interpolated value at `s`.
    pub fn eval(&self, s: f64) -> f64 {
        let s = self.wrap(s);
        let n = self.knots.len();

        // On a closed curve the final wrap segment runs from the last knot
        // back to the first at knot[0] + period.
        if let Some(p) = self.period {
            if s > self.knots[n - 1] {
                let h = self.knots[0] + p - self.knots[n - 1];
                let t = (s - self.knots[n - 1]) / h;
                return hermite(
                    t,
                    h,
                    self.values[n - 1],
                    self.values[0],
                    self.slopes[n - 1],
                    self.slopes[0],
                );
            }
        }

        let i = self.segment(s);
        let h = self.knots[i + 1] - self.knots[i];
        let t = (s - self.knots[i]) / h;
        hermite(
            t,
            h,
            self.values[i],
            self.values[i + 1],
            self.slopes[i],
            self.slopes[i + 1],
        )
    }

    /// Interpolated derivative at `s`.
    pub fn eval_derivative(&self, s: f64) -> f64 {
        let s = self.wrap(s);
        let n = self.knots.len();

        if let Some(p) = self.period {
            if s > self.knots[n - 1] {
                let h = self.knots[0] + p - self.knots[n - 1];
                let t = (s - self.knots[n - 1]) / h;
                return hermite_derivative(
                    t,
                    h,
                    self.values[n - 1],
                    self.values[0],
                    self.slopes[n - 1],
                    self.slopes[0],
                );
            }
        }

        let i = self.segment(s);
        let h = self.knots[i + 1] - self.knots[i];
        let t = (s - self.knots[i]) / h;
        hermite_derivative(
            t,
            h,
            self.values[i],
            self.values[i + 1],
            self.slopes[i],
            self.slopes[i + 1],
        )
    }
}

fn hermite(t: f64, h: f64, y0: f64, y1: f64, m0: f64, m1: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    (2.0 * t3 - 3.0 * t2 + 1.0) * y0
        + (t3 - 2.0 * t2 + t) * h * m0
        + (-2.0 * t3 + 3.0 * t2) * y1
        + (t3 - t2) * h * m1
}

fn hermite_derivative(t: f64, h: f64, y0: f64, y1: f64, m0: f64, m1: f64) -> f64 {
    let t2 = t * t;
    ((6.0 * t2 - 6.0 * t) * y0
        + (3.0 * t2 - 4.0 * t + 1.0) * h * m0
        + (-6.0 * t2 + 6.0 * t) * y1
        + (3.0 * t2 - 2.0 * t) * h * m1)
        / h
}
