//! Scalar-generic math infrastructure
//!
//! This module provides:
//! - The [`Scalar`] trait and the forward-mode dual number [`Dual`] that the
//!   vehicle dynamics and NLP layers are generic over
//! - Smooth replacements for kinked primitives so recorded dynamics stay
//!   differentiable everywhere
//! - Cubic Hermite segment interpolation used by the curvilinear track surface

pub mod dual;
pub mod interp;
pub mod smooth;

pub use dual::{Dual, Scalar, AD_WIDTH};

/// The crate-wide AD scalar: a dual with the default tangent-block width.
pub type Ad = Dual<AD_WIDTH>;
pub use interp::CubicHermite;
pub use smooth::{smooth_abs, smooth_hypot, smooth_max, smooth_min, smooth_neg, smooth_pos};
