//! Forward-mode dual numbers and the scalar abstraction
//!
//! The vehicle dynamics and every NLP callback are written once, generic over
//! [`Scalar`], and instantiated twice: with `f64` for fast evaluation and with
//! [`Dual`] for derivative extraction. A `Dual<N>` carries the value together
//! with a fixed-width tangent block of `N` directional derivatives, so a full
//! Jacobian is obtained by seeding blocks of `N` columns and sweeping
//! `ceil(n / N)` evaluations.
//!
//! Comparisons between duals act on the value part only; code that needs to
//! branch must do so through `.value()` and outside of anything whose
//! derivative matters (see `math::smooth` for the differentiable
//! alternatives).

use num_traits::{One, Zero};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// Tangent-block width used by the solvers when sweeping Jacobians.
pub const AD_WIDTH: usize = 16;

/// Scalar capability set required by the dynamics and the NLP callbacks.
///
/// Implemented by `f64` (plain evaluation) and by [`Dual`] (forward-mode
/// derivative recording).
pub trait Scalar:
    Copy
    + Clone
    + fmt::Debug
    + PartialEq
    + PartialOrd
    + Zero
    + One
    + Sum
    + Neg<Output = Self>
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
{
    /// Lift a plain number into the scalar type with zero derivative.
    fn constant(v: f64) -> Self;

    /// The value part, discarding any derivative information.
    fn value(&self) -> f64;

    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tan(self) -> Self;
    fn atan(self) -> Self;
    fn atan2(self, x: Self) -> Self;
    fn sqrt(self) -> Self;
    fn exp(self) -> Self;
    fn powi(self, n: i32) -> Self;
}

impl Scalar for f64 {
    #[inline]
    fn constant(v: f64) -> Self {
        v
    }

    #[inline]
    fn value(&self) -> f64 {
        *self
    }

    #[inline]
    fn sin(self) -> Self {
        f64::sin(self)
    }

    #[inline]
    fn cos(self) -> Self {
        f64::cos(self)
    }

    #[inline]
    fn tan(self) -> Self {
        f64::tan(self)
    }

    #[inline]
    fn atan(self) -> Self {
        f64::atan(self)
    }

    #[inline]
    fn atan2(self, x: Self) -> Self {
        f64::atan2(self, x)
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }
}

/// Forward-mode dual number with a fixed-width tangent block.
#[derive(Clone, Copy, Debug)]
pub struct Dual<const N: usize> {
    /// Value part
    pub re: f64,
    /// Tangent block: `eps[k]` is the derivative along seed direction `k`
    pub eps: [f64; N],
}

impl<const N: usize> Dual<N> {
    /// A constant: value with zero tangent.
    #[inline]
    pub fn new(re: f64) -> Self {
        Self { re, eps: [0.0; N] }
    }

    /// A seeded variable: unit tangent in direction `slot`.
    ///
    /// `slot` must be below the tangent width `N`.
    #[inline]
    pub fn variable(re: f64, slot: usize) -> Self {
        let mut eps = [0.0; N];
        eps[slot] = 1.0;
        Self { re, eps }
    }

    /// The derivative along seed direction `slot`.
    #[inline]
    pub fn derivative(&self, slot: usize) -> f64 {
        self.eps[slot]
    }

    #[inline]
    fn map_unary(self, re: f64, factor: f64) -> Self {
        let mut eps = self.eps;
        for e in eps.iter_mut() {
            *e *= factor;
        }
        Self { re, eps }
    }
}

impl<const N: usize> PartialEq for Dual<N> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.re == other.re
    }
}

impl<const N: usize> PartialOrd for Dual<N> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.re.partial_cmp(&other.re)
    }
}

impl<const N: usize> Add for Dual<N> {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        let mut eps = self.eps;
        for (e, r) in eps.iter_mut().zip(rhs.eps.iter()) {
            *e += r;
        }
        Self {
            re: self.re + rhs.re,
            eps,
        }
    }
}

impl<const N: usize> Sub for Dual<N> {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        let mut eps = self.eps;
        for (e, r) in eps.iter_mut().zip(rhs.eps.iter()) {
            *e -= r;
        }
        Self {
            re: self.re - rhs.re,
            eps,
        }
    }
}

impl<const N: usize> Mul for Dual<N> {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        let mut eps = [0.0; N];
        for k in 0..N {
            eps[k] = self.eps[k] * rhs.re + rhs.eps[k] * self.re;
        }
        Self {
            re: self.re * rhs.re,
            eps,
        }
    }
}

impl<const N: usize> Div for Dual<N> {
    type Output = Self;

    #[inline]
    fn div(self, rhs: Self) -> Self {
        let inv = 1.0 / rhs.re;
        let re = self.re * inv;
        let mut eps = [0.0; N];
        for k in 0..N {
            eps[k] = (self.eps[k] - re * rhs.eps[k]) * inv;
        }
        Self { re, eps }
    }
}

impl<const N: usize> Neg for Dual<N> {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        let mut eps = self.eps;
        for e in eps.iter_mut() {
            *e = -*e;
        }
        Self { re: -self.re, eps }
    }
}

impl<const N: usize> AddAssign for Dual<N> {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<const N: usize> SubAssign for Dual<N> {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl<const N: usize> MulAssign for Dual<N> {
    #[inline]
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl<const N: usize> DivAssign for Dual<N> {
    #[inline]
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

impl<const N: usize> Add<f64> for Dual<N> {
    type Output = Self;

    #[inline]
    fn add(self, rhs: f64) -> Self {
        Self {
            re: self.re + rhs,
            eps: self.eps,
        }
    }
}

impl<const N: usize> Sub<f64> for Dual<N> {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: f64) -> Self {
        Self {
            re: self.re - rhs,
            eps: self.eps,
        }
    }
}

impl<const N: usize> Mul<f64> for Dual<N> {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: f64) -> Self {
        self.map_unary(self.re * rhs, rhs)
    }
}

impl<const N: usize> Div<f64> for Dual<N> {
    type Output = Self;

    #[inline]
    fn div(self, rhs: f64) -> Self {
        self.map_unary(self.re / rhs, 1.0 / rhs)
    }
}

impl<const N: usize> Add<Dual<N>> for f64 {
    type Output = Dual<N>;

    #[inline]
    fn add(self, rhs: Dual<N>) -> Dual<N> {
        rhs + self
    }
}

impl<const N: usize> Sub<Dual<N>> for f64 {
    type Output = Dual<N>;

    #[inline]
    fn sub(self, rhs: Dual<N>) -> Dual<N> {
        -rhs + self
    }
}

impl<const N: usize> Mul<Dual<N>> for f64 {
    type Output = Dual<N>;

    #[inline]
    fn mul(self, rhs: Dual<N>) -> Dual<N> {
        rhs * self
    }
}

impl<const N: usize> Div<Dual<N>> for f64 {
    type Output = Dual<N>;

    #[inline]
    fn div(self, rhs: Dual<N>) -> Dual<N> {
        Dual::new(self) / rhs
    }
}

impl<const N: usize> Zero for Dual<N> {
    #[inline]
    fn zero() -> Self {
        Self::new(0.0)
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.re == 0.0 && self.eps.iter().all(|e| *e == 0.0)
    }
}

impl<const N: usize> One for Dual<N> {
    #[inline]
    fn one() -> Self {
        Self::new(1.0)
    }
}

impl<const N: usize> Sum for Dual<N> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::new(0.0), |acc, x| acc + x)
    }
}

impl<const N: usize> Scalar for Dual<N> {
    #[inline]
    fn constant(v: f64) -> Self {
        Self::new(v)
    }

    #[inline]
    fn value(&self) -> f64 {
        self.re
    }

    #[inline]
    fn sin(self) -> Self {
        self.map_unary(self.re.sin(), self.re.cos())
    }

    #[inline]
    fn cos(self) -> Self {
        self.map_unary(self.re.cos(), -self.re.sin())
    }

    #[inline]
    fn tan(self) -> Self {
        let t = self.re.tan();
        self.map_unary(t, 1.0 + t * t)
    }

    #[inline]
    fn atan(self) -> Self {
        self.map_unary(self.re.atan(), 1.0 / (1.0 + self.re * self.re))
    }

    #[inline]
    fn atan2(self, x: Self) -> Self {
        let denom = self.re * self.re + x.re * x.re;
        let mut eps = [0.0; N];
        for k in 0..N {
            eps[k] = (x.re * self.eps[k] - self.re * x.eps[k]) / denom;
        }
        Self {
            re: self.re.atan2(x.re),
            eps,
        }
    }

    #[inline]
    fn sqrt(self) -> Self {
        let s = self.re.sqrt();
        self.map_unary(s, 0.5 / s)
    }

    #[inline]
    fn exp(self) -> Self {
        let e = self.re.exp();
        self.map_unary(e, e)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        self.map_unary(self.re.powi(n), f64::from(n) * self.re.powi(n - 1))
    }
}
