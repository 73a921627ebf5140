//! Optimal-laptime optimal control problem
//!
//! This module contains:
//! - [`options`]: the laptime configuration (transcription mode, control
//!   modes, dissipations, integral constraints, warm start and sensitivity
//!   switches) and its XML form
//! - [`transcription`]: the trapezoidal collocation of the OCP into an
//!   [`crate::nlp::NlpProblem`]
//! - [`solve`]: seeding, the interior-point drive, post-processing and KKT
//!   parameter sensitivities

pub mod options;
pub mod solve;
pub mod transcription;

pub use options::{ControlMode, IntegralConstraint, LaptimeOptions};
pub use solve::solve_laptime;
pub use transcription::LaptimeProblem;

use serde::{Deserialize, Serialize};

/// Parameter sensitivities of a solved trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensitivities {
    /// One alias per declared parameter input
    pub parameter_aliases: Vec<String>,
    /// `dlaptime/dp` per parameter
    pub dlaptime: Vec<f64>,
    /// `dq/dp` as `[parameter][node][state]`
    pub dq: Vec<Vec<Vec<f64>>>,
}

/// A solved laptime trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcpTrajectory {
    /// Mesh arclengths
    pub s: Vec<f64>,
    /// Per-node state, algebraic state and control vectors
    pub q: Vec<Vec<f64>>,
    pub qa: Vec<Vec<f64>>,
    pub u: Vec<Vec<f64>>,
    /// Re-evaluated Cartesian pose per node
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub psi: Vec<f64>,
    /// Total laptime, including the closed-track wrap contribution
    pub laptime: f64,
    /// Values of the configured integral quantities
    pub integral_values: Vec<(String, f64)>,
    /// Primal-dual data sufficient to reseed a future solve
    pub warm_start: Option<crate::nlp::WarmStartData>,
    /// KKT parameter sensitivities, when requested
    pub sensitivities: Option<Sensitivities>,
}

impl OcpTrajectory {
    /// Number of mesh nodes.
    pub fn len(&self) -> usize {
        self.s.len()
    }

    /// True when the trajectory holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.s.is_empty()
    }
}
