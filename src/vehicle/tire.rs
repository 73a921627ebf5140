//! Smooth combined-slip tire model
//!
//! Both vehicle models share a magic-formula tire with similarity-based
//! combined slip: the normalized slip `rho = hypot(kappa/kappa_max,
//! lambda/lambda_max)` drives the saturation curve and the force is split
//! between the longitudinal and lateral directions in proportion to the
//! slip components. The hypot is regularized so the model stays
//! differentiable at zero slip, and negative vertical loads are clamped
//! smoothly: a tire off the ground produces no force.

use crate::error::Result;
use crate::math::{smooth_abs, smooth_hypot, smooth_pos, Scalar};
use crate::vehicle::params::ParameterSet;
use serde::{Deserialize, Serialize};

/// Magic-formula coefficient set for one axle's tires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tire {
    /// Stiffness factor
    pub b: f64,
    /// Shape factor
    pub c: f64,
    /// Peak longitudinal/lateral friction coefficients
    pub mu_x: f64,
    pub mu_y: f64,
    /// Slip ratio and slip angle at peak force
    pub kappa_max: f64,
    pub lambda_max: f64,
    /// Effective rolling radius
    pub radius: f64,
}

/// Regularization of the combined-slip norm.
const RHO_EPS: f64 = 1e-6;
/// Vertical-load clamp sharpness, in newtons.
const FZ_EPS: f64 = 1.0;

impl Tire {
    /// Read the coefficient set from a parameter tree prefix such as
    /// `"front-tire"`.
    pub fn from_params(set: &ParameterSet, prefix: &str) -> Result<Self> {
        Ok(Self {
            b: set.get(&format!("{}/stiffness-factor", prefix))?,
            c: set.get(&format!("{}/shape-factor", prefix))?,
            mu_x: set.get(&format!("{}/mu-x-max", prefix))?,
            mu_y: set.get(&format!("{}/mu-y-max", prefix))?,
            kappa_max: set.get(&format!("{}/kappa-max", prefix))?,
            lambda_max: set.get(&format!("{}/lambda-max", prefix))?,
            radius: set.get(&format!("{}/radius", prefix))?,
        })
    }

    /// Tire forces `(fx, fy)` from slip ratio, slip angle and vertical load.
    pub fn forces<T: Scalar>(&self, kappa: T, lambda: T, fz: T) -> (T, T) {
        let fz = smooth_pos(fz, FZ_EPS);
        let kn = kappa / self.kappa_max;
        let ln = lambda / self.lambda_max;
        let rho = smooth_hypot(kn, ln, RHO_EPS);
        let shape = (rho * self.b).atan() * self.c;
        let saturation = shape.sin() / rho;
        let fx = fz * saturation * kn * self.mu_x;
        // Positive slip angle pushes the tire to negative lateral force
        let fy = -(fz * saturation * ln * self.mu_y);
        (fx, fy)
    }

    /// Longitudinal slip stiffness at zero slip, per unit load.
    pub fn longitudinal_stiffness(&self) -> f64 {
        self.mu_x * self.b * self.c / self.kappa_max
    }

    /// Slip ratio that produces `fx` at load `fz` in the small-slip regime.
    /// Used by the models to infer the driven/braked slip from the force
    /// demand without carrying wheel-spin states.
    pub fn kappa_from_force<T: Scalar>(&self, fx: T, fz: T) -> T {
        let fz = smooth_pos(fz, FZ_EPS) + 1.0;
        fx / (fz * self.longitudinal_stiffness())
    }

    /// Sliding dissipation power at contact-patch speed `u`.
    pub fn dissipation<T: Scalar>(&self, fx: T, fy: T, kappa: T, lambda: T, u: T) -> T {
        let u = smooth_abs(u, 1e-3);
        smooth_abs(fx * kappa, 1e-6) * u + smooth_abs(fy * lambda.tan(), 1e-6) * u
    }
}
