//! Nonlinear programming infrastructure
//!
//! This module provides:
//! - [`NlpProblem`]: the AD-generic problem contract shared by the track
//!   preprocessor and the optimal-laptime transcription
//! - Derivative extraction by fixed-width forward-AD sweeps
//!   ([`problem::gradient`], [`problem::jacobian`])
//! - A primal-dual interior-point solver ([`ipm`]) for bound- and
//!   general-constrained problems
//! - A damped Newton root-finder ([`newton`]) for square systems such as the
//!   steady-state equilibrium

pub mod ipm;
pub mod newton;
pub mod problem;

pub use ipm::{IpmOptions, IpmSolution, IpmStatus, WarmStartData};
pub use newton::{NewtonOptions, SquareSystem};
pub use problem::NlpProblem;
