//! Vehicle dynamics models
//!
//! This module contains:
//! - [`params`]: parameter sets addressed by path and alias, with constant
//!   and piecewise-over-arclength values
//! - [`tire`]: the smooth combined-slip tire shared by both models
//! - [`f1`]: the 3-DOF single-track F1 model with algebraic vertical loads
//! - [`kart`]: the 6-DOF kart model with explicit suspension loads
//! - [`steady_state`]: equilibrium solving and the gg-diagram sweep
//!
//! Both models implement [`VehicleModel`]: one generic evaluation of the
//! arclength dynamics `(q, q_a, u, s) -> (dq/ds, r_a)` plus the bounds the
//! optimal-laptime transcription consumes.

pub mod f1;
pub mod kart;
pub mod params;
pub mod steady_state;
pub mod tire;

use crate::error::Result;
use crate::math::Scalar;
use crate::track::TrackSurface;
use std::sync::Arc;

pub use f1::F1Car;
pub use kart::Kart;
pub use params::{Parameter, ParameterSet};
pub use steady_state::{GgDiagram, SteadyState, SteadyStateSolver};

/// Semantic state indices shared by every model.
///
/// `ITIME + 1 == IN` is relied on by the transcription, which strips the
/// time state from the decision variables as one contiguous slice.
pub const ITIME: usize = 0;
pub const IN: usize = 1;
pub const IALPHA: usize = 2;
pub const IU: usize = 3;
pub const IV: usize = 4;
pub const IOMEGA: usize = 5;

/// Tire identifiers in reporting order.
pub const TIRE_NAMES: [&str; 4] = [
    "front_axle.left_tire",
    "front_axle.right_tire",
    "rear_axle.left_tire",
    "rear_axle.right_tire",
];

/// Per-tire quantities produced by an evaluation.
#[derive(Debug, Clone, Copy)]
pub struct TireState<T: Scalar> {
    /// Contact patch position in track coordinates
    pub x: T,
    pub y: T,
    /// Longitudinal slip ratio
    pub kappa: T,
    /// Slip angle
    pub lambda: T,
    /// Tire forces in the tire frame
    pub fx: T,
    pub fy: T,
    /// Vertical load
    pub fz: T,
    /// Sliding dissipation power
    pub dissipation: T,
}

impl<T: Scalar> TireState<T> {
    fn zero() -> Self {
        Self {
            x: T::zero(),
            y: T::zero(),
            kappa: T::zero(),
            lambda: T::zero(),
            fx: T::zero(),
            fy: T::zero(),
            fz: T::zero(),
            dissipation: T::zero(),
        }
    }
}

/// Everything one dynamics evaluation produces.
#[derive(Debug, Clone)]
pub struct Evaluation<T: Scalar> {
    /// Arclength derivative of the state, same cardinality as `q`
    pub dqds: Vec<T>,
    /// Algebraic residuals, same cardinality as `q_a`
    pub residuals: Vec<T>,
    /// Time derivative of the state (road-frame dynamics)
    pub dqdt: Vec<T>,
    /// `dtime/ds`
    pub dtime_ds: T,
    /// Body-frame accelerations
    pub ax: T,
    pub ay: T,
    /// Power spent against aerodynamic drag
    pub drag_power: T,
    /// Road-frame pose
    pub x: T,
    pub y: T,
    pub psi: T,
    /// Per-tire state, reporting order `fl, fr, rl, rr`
    pub tires: [TireState<T>; 4],
    /// Understeer/oversteer indicator (positive when understeering)
    pub understeer: T,
}

/// Shared contract between the two models and the solvers.
pub trait VehicleModel {
    /// Model identifier as used by the vehicle XML `type` attribute.
    fn kind(&self) -> &'static str;

    /// State, algebraic-state and control cardinalities.
    fn num_states(&self) -> usize;
    fn num_algebraic(&self) -> usize;
    fn num_controls(&self) -> usize;

    /// Names of the controls, in `u` order.
    fn control_names(&self) -> &'static [&'static str];

    /// Whether the laptime transcription defaults to direct mode.
    fn is_direct_by_default(&self) -> bool;

    /// The bound track surface.
    fn track(&self) -> Option<&Arc<TrackSurface>>;

    /// Bind (or re-bind) the track surface. Valid to call repeatedly.
    fn change_track(&mut self, track: Arc<TrackSurface>);

    /// Unbind the track: the vehicle then runs on a straight virtual road.
    fn clear_track(&mut self);

    /// State indices (beyond `v` and `omega`) that are free in a steady
    /// state, e.g. the kart's chassis pose.
    fn steady_state_extra_states(&self) -> &'static [usize] {
        &[]
    }

    /// Indices of `dq/dt` rows that must vanish for those extra states.
    fn steady_state_rate_equations(&self) -> &'static [usize] {
        &[]
    }

    /// The model's parameter set.
    fn parameters(&self) -> &ParameterSet;

    /// Mutable access for parameter overrides.
    fn parameters_mut(&mut self) -> &mut ParameterSet;

    /// Re-read parameters after an override. Called by the setters.
    fn refresh_parameters(&mut self) -> Result<()>;

    /// Evaluate the arclength dynamics at `(q, qa, u, s)`, generic over the
    /// scalar so the same closure is recorded for derivatives.
    fn evaluate<T: Scalar>(&self, q: &[T], qa: &[T], u: &[T], s: f64) -> Result<Evaluation<T>>;

    /// State bounds `(lower, upper)` for the laptime transcription.
    fn state_bounds(&self) -> (Vec<f64>, Vec<f64>);

    /// Algebraic-state bounds.
    fn algebraic_state_bounds(&self) -> (Vec<f64>, Vec<f64>);

    /// Control bounds.
    fn control_bounds(&self) -> (Vec<f64>, Vec<f64>);

    /// Bounds for the extra (tire health) inequality constraints.
    fn extra_constraint_bounds(&self) -> (Vec<f64>, Vec<f64>);

    /// Current values of the extra inequality constraints.
    fn extra_constraints<T: Scalar>(&self, evaluation: &Evaluation<T>) -> Vec<T>;
}

/// Check the index layout every model must obey.
pub(crate) fn check_state_layout() -> Result<()> {
    if ITIME + 1 != IN {
        return Err(crate::error::Error::internal(
            "state layout: the time index must be immediately followed by the lateral offset",
        ));
    }
    Ok(())
}
