//! Curvilinear track data and its smooth interpolated surface
//!
//! [`TrackData`] is the immutable artifact the preprocessor produces (or a
//! discrete track file loads): nodal arrays over arclength plus the measured
//! boundaries and projection metadata. [`TrackSurface`] wraps it behind
//! cubic Hermite interpolation and answers the queries the vehicle models
//! need: curvature, heading, lateral half-widths, and the Cartesian point at
//! a lateral offset from the centerline.

use crate::error::{Error, Result};
use crate::math::{CubicHermite, Scalar};
use crate::track::geodesy::Projection;
use crate::track::polyline::Polyline;
use serde::{Deserialize, Serialize};

/// Boundary reconstruction error report from the preprocessor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundaryErrors {
    pub left_max: f64,
    pub right_max: f64,
    pub left_l2: f64,
    pub right_l2: f64,
}

/// Arclength-parameterized track reference. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackData {
    /// Node arclengths, `s[0] = 0`, strictly increasing
    pub s: Vec<f64>,
    /// Centerline coordinates
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Centerline heading
    pub theta: Vec<f64>,
    /// Signed curvature
    pub kappa: Vec<f64>,
    /// Lateral half-widths to the left/right boundary
    pub n_left: Vec<f64>,
    pub n_right: Vec<f64>,
    /// Nodal derivatives, when the producer has them
    pub dkappa_ds: Option<Vec<f64>>,
    pub dn_left_ds: Option<Vec<f64>>,
    pub dn_right_ds: Option<Vec<f64>>,
    /// Whether the last node wraps around to the first
    pub closed: bool,
    /// Total length; for closed tracks this exceeds `s.back()` by the
    /// implicit wrap element
    pub length: f64,
    /// Measured boundaries in the local tangent plane
    pub left_boundary: Option<Polyline>,
    pub right_boundary: Option<Polyline>,
    /// Geodetic projection used to flatten the boundaries
    pub projection: Option<Projection>,
    /// Boundary reconstruction errors from the preprocessor
    pub boundary_errors: Option<BoundaryErrors>,
}

impl TrackData {
    /// Validate array lengths and the arclength ordering.
    pub fn validate(&self) -> Result<()> {
        let n = self.s.len();
        if n < 2 {
            return Err(Error::invalid_value(
                "s",
                &n.to_string(),
                "a track needs at least two nodes",
            ));
        }
        for (name, arr) in [
            ("x", &self.x),
            ("y", &self.y),
            ("theta", &self.theta),
            ("kappa", &self.kappa),
            ("n_left", &self.n_left),
            ("n_right", &self.n_right),
        ] {
            if arr.len() != n {
                return Err(Error::internal(&format!(
                    "track array '{}' has length {} but s has length {}",
                    name,
                    arr.len(),
                    n
                )));
            }
        }
        if self.s[0] != 0.0 {
            return Err(Error::invalid_value(
                "s",
                &self.s[0].to_string(),
                "arclength must start at zero",
            ));
        }
        if !self.s.windows(2).all(|w| w[1] > w[0]) {
            return Err(Error::invalid_value(
                "s",
                "non-monotone",
                "arclength must be strictly increasing",
            ));
        }
        let s_back = self.s[n - 1];
        if self.closed {
            if self.length <= s_back {
                return Err(Error::invalid_value(
                    "length",
                    &self.length.to_string(),
                    "closed track length must exceed the last node arclength",
                ));
            }
        } else if (self.length - s_back).abs() > 1e-9 {
            return Err(Error::invalid_value(
                "length",
                &self.length.to_string(),
                "open track length must equal the last node arclength",
            ));
        }
        Ok(())
    }
}

/// Smoothly interpolated curvilinear surface over [`TrackData`].
#[derive(Debug, Clone)]
pub struct TrackSurface {
    data: TrackData,
    kappa: CubicHermite,
    theta: CubicHermite,
    n_left: CubicHermite,
    n_right: CubicHermite,
    x: CubicHermite,
    y: CubicHermite,
}

impl TrackSurface {
    /// Build the interpolants. Heading uses curvature as its exact slope and
    /// the centerline uses the heading direction, so the surface stays
    /// kinematically consistent between nodes.
    pub fn new(data: TrackData) -> Result<Self> {
        data.validate()?;
        let period = if data.closed {
            Some(data.length)
        } else {
            None
        };

        let kappa = match &data.dkappa_ds {
            Some(dk) => CubicHermite::new(data.s.clone(), data.kappa.clone(), dk.clone(), period)?,
            None => CubicHermite::from_values(data.s.clone(), data.kappa.clone(), period)?,
        };
        let theta = CubicHermite::new(
            data.s.clone(),
            data.theta.clone(),
            data.kappa.clone(),
            period,
        )?;
        let n_left = match &data.dn_left_ds {
            Some(d) => CubicHermite::new(data.s.clone(), data.n_left.clone(), d.clone(), period)?,
            None => CubicHermite::from_values(data.s.clone(), data.n_left.clone(), period)?,
        };
        let n_right = match &data.dn_right_ds {
            Some(d) => CubicHermite::new(data.s.clone(), data.n_right.clone(), d.clone(), period)?,
            None => CubicHermite::from_values(data.s.clone(), data.n_right.clone(), period)?,
        };
        let cos_theta: Vec<f64> = data.theta.iter().map(|t| t.cos()).collect();
        let sin_theta: Vec<f64> = data.theta.iter().map(|t| t.sin()).collect();
        let x = CubicHermite::new(data.s.clone(), data.x.clone(), cos_theta, period)?;
        let y = CubicHermite::new(data.s.clone(), data.y.clone(), sin_theta, period)?;

        Ok(Self {
            data,
            kappa,
            theta,
            n_left,
            n_right,
            x,
            y,
        })
    }

    /// The underlying track data.
    pub fn data(&self) -> &TrackData {
        &self.data
    }

    /// Total track length.
    pub fn length(&self) -> f64 {
        self.data.length
    }

    /// Whether the track wraps around.
    pub fn is_closed(&self) -> bool {
        self.data.closed
    }

    /// Signed curvature at arclength `s`.
    pub fn kappa_at(&self, s: f64) -> f64 {
        self.kappa.eval(s)
    }

    /// Centerline heading at arclength `s`.
    pub fn theta_at(&self, s: f64) -> f64 {
        self.theta.eval(s)
    }

    /// Distance to the left boundary at arclength `s`.
    pub fn n_left_at(&self, s: f64) -> f64 {
        self.n_left.eval(s)
    }

    /// Distance to the right boundary at arclength `s`.
    pub fn n_right_at(&self, s: f64) -> f64 {
        self.n_right.eval(s)
    }

    /// Centerline point at arclength `s`.
    pub fn center_at(&self, s: f64) -> (f64, f64) {
        (self.x.eval(s), self.y.eval(s))
    }

    /// Cartesian position and frame heading at lateral offset `n` from the
    /// centerline. Positive `n` points to the right of the direction of
    /// travel, so the track stays within `n in [-n_left, +n_right]`.
    /// Generic in `n` so the laptime post-processing can carry derivatives
    /// through the lateral placement.
    pub fn position_at<T: Scalar>(&self, s: f64, n: T) -> (T, T, T) {
        let theta = self.theta.eval(s);
        let (xc, yc) = self.center_at(s);
        let x = n * theta.sin() + xc;
        let y = n * (-theta.cos()) + yc;
        (x, y, T::constant(theta))
    }
}
