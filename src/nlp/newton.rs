//! Damped Newton iteration for square nonlinear systems
//!
//! Used by the steady-state solver: the residual is written once, generic
//! over the scalar, and the Jacobian comes from one forward-AD sweep per
//! iteration. Steps are damped by backtracking on the squared residual norm;
//! a near-singular Jacobian is Tikhonov-regularized before retrying.

use crate::error::{Error, Result};
use crate::math::{Dual, Scalar, AD_WIDTH};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// A square system of nonlinear equations `F(x) = 0`.
pub trait SquareSystem {
    /// Dimension of both `x` and `F`.
    fn dim(&self) -> usize;

    /// Residual vector, generic over the scalar.
    fn residual<T: Scalar>(&self, x: &[T]) -> Vec<T>;
}

/// Newton iteration options.
#[derive(Debug, Clone)]
pub struct NewtonOptions {
    /// Residual infinity-norm tolerance
    pub tol: f64,
    /// Iteration cap
    pub max_iter: usize,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            tol: 1e-10,
            max_iter: 200,
        }
    }
}

/// Residual and Jacobian by forward-AD block sweeps.
fn residual_and_jacobian<S: SquareSystem + ?Sized>(
    system: &S,
    x: &DVector<f64>,
) -> (DVector<f64>, DMatrix<f64>) {
    let n = system.dim();
    let mut jac = DMatrix::zeros(n, n);
    let mut res = DVector::zeros(n);

    let mut seeded: Vec<Dual<AD_WIDTH>> = x.iter().map(|&v| Dual::new(v)).collect();
    let mut block_start = 0;
    while block_start < n {
        let width = AD_WIDTH.min(n - block_start);
        for k in 0..width {
            seeded[block_start + k] = Dual::variable(x[block_start + k], k);
        }
        let r = system.residual(&seeded);
        for (j, rj) in r.iter().enumerate() {
            res[j] = rj.value();
            for k in 0..width {
                jac[(j, block_start + k)] = rj.derivative(k);
            }
        }
        for k in 0..width {
            seeded[block_start + k] = Dual::new(x[block_start + k]);
        }
        block_start += width;
    }
    (res, jac)
}

/// Solve `F(x) = 0` starting from `x0`.
pub fn solve<S: SquareSystem + ?Sized>(
    system: &S,
    x0: &[f64],
    options: &NewtonOptions,
) -> Result<DVector<f64>> {
    let n = system.dim();
    if x0.len() != n {
        return Err(Error::internal(
            "newton starting point dimension does not match the system",
        ));
    }
    let mut x = DVector::from_column_slice(x0);

    let mut norm = f64::INFINITY;
    for iter in 0..options.max_iter {
        let (res, jac) = residual_and_jacobian(system, &x);
        norm = if res.is_empty() { 0.0 } else { res.amax() };
        debug!(iter, residual = norm, "newton iteration");
        if norm <= options.tol {
            return Ok(x);
        }

        // Factorize, retrying with increasing Tikhonov shifts if singular
        let mut step = None;
        let mut shift = 0.0;
        for _ in 0..8 {
            let mut a = jac.clone();
            for i in 0..n {
                a[(i, i)] += shift;
            }
            let rhs = res.map(|v| -v);
            if let Some(dx) = nalgebra::linalg::LU::new(a).solve(&rhs) {
                if dx.iter().all(|v| v.is_finite()) {
                    step = Some(dx);
                    break;
                }
            }
            shift = if shift == 0.0 { 1e-10 } else { shift * 100.0 };
        }
        let dx = step.ok_or_else(|| {
            Error::optimization_failure("newton jacobian is singular", iter)
        })?;

        // Backtrack on the squared residual norm
        let f0 = res.norm_squared();
        let mut alpha = 1.0;
        let mut moved = false;
        for _ in 0..40 {
            let x_try = &x + &dx * alpha;
            let r_try = system.residual(x_try.as_slice());
            let f_try: f64 = r_try.iter().map(|v| v * v).sum();
            if f_try.is_finite() && f_try < f0 {
                x = x_try;
                moved = true;
                break;
            }
            alpha *= 0.5;
        }
        if !moved {
            return Err(Error::residual_above_tolerance(
                "newton line search stalled",
                norm,
                options.tol,
            ));
        }
    }

    Err(Error::residual_above_tolerance(
        "newton did not converge",
        norm,
        options.tol,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Scalar1D;

    impl SquareSystem for Scalar1D {
        fn dim(&self) -> usize {
            1
        }
        fn residual<T: Scalar>(&self, x: &[T]) -> Vec<T> {
            // x^2 - 4 = 0
            vec![x[0] * x[0] - 4.0]
        }
    }

    #[test]
    fn test_scalar_root() {
        let x = solve(&Scalar1D, &[3.0], &NewtonOptions::default()).unwrap();
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-9);
    }

    struct Coupled;

    impl SquareSystem for Coupled {
        fn dim(&self) -> usize {
            2
        }
        fn residual<T: Scalar>(&self, x: &[T]) -> Vec<T> {
            // Intersection of a circle and a line: x^2 + y^2 = 2, x = y
            vec![x[0] * x[0] + x[1] * x[1] - 2.0, x[0] - x[1]]
        }
    }

    #[test]
    fn test_coupled_system() {
        let x = solve(&Coupled, &[2.0, 0.5], &NewtonOptions::default()).unwrap();
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-9);
    }

    struct Transcendental;

    impl SquareSystem for Transcendental {
        fn dim(&self) -> usize {
            1
        }
        fn residual<T: Scalar>(&self, x: &[T]) -> Vec<T> {
            // cos(x) = x
            vec![x[0].cos() - x[0]]
        }
    }

    #[test]
    fn test_transcendental_root() {
        let x = solve(&Transcendental, &[0.0], &NewtonOptions::default()).unwrap();
        assert_relative_eq!(x[0], 0.739_085_133_215_160_6, epsilon = 1e-9);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        assert!(solve(&Coupled, &[1.0], &NewtonOptions::default()).is_err());
    }
}
