//! Smooth replacements for kinked primitives
//!
//! The dynamics must never branch on AD values, so positive-part, absolute
//! value, min and max are replaced by their standard hyperbolic
//! regularizations. The sharpness `eps` trades model fidelity against
//! conditioning of the resulting NLP; the vehicle models pick values well
//! below the magnitudes they are applied to.

use crate::math::Scalar;

/// Smooth positive part: `0.5 * (x + sqrt(x^2 + eps^2))`.
///
/// Tends to `max(x, 0)` as `eps -> 0` and is everywhere differentiable.
#[inline]
pub fn smooth_pos<T: Scalar>(x: T, eps: f64) -> T {
    (x + (x * x + eps * eps).sqrt()) * 0.5
}

/// Smooth negative part: `smooth_pos(-x, eps)`.
#[inline]
pub fn smooth_neg<T: Scalar>(x: T, eps: f64) -> T {
    smooth_pos(-x, eps)
}

/// Smooth absolute value: `sqrt(x^2 + eps^2)`.
#[inline]
pub fn smooth_abs<T: Scalar>(x: T, eps: f64) -> T {
    (x * x + eps * eps).sqrt()
}

/// Smooth maximum of two scalars.
#[inline]
pub fn smooth_max<T: Scalar>(a: T, b: T, eps: f64) -> T {
    b + smooth_pos(a - b, eps)
}

/// Smooth minimum of two scalars.
#[inline]
pub fn smooth_min<T: Scalar>(a: T, b: T, eps: f64) -> T {
    a - smooth_pos(a - b, eps)
}

/// Smooth Euclidean norm of two scalars, regularized away from the origin.
#[inline]
pub fn smooth_hypot<T: Scalar>(a: T, b: T, eps: f64) -> T {
    (a * a + b * b + eps * eps).sqrt()
}
