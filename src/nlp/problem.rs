//! The NLP problem contract and forward-AD derivative extraction
//!
//! A problem implements one generic evaluation of its objective and
//! constraint vector; gradients and Jacobians are extracted by seeding
//! tangent blocks of width [`AD_WIDTH`] and sweeping the evaluation
//! `ceil(n / AD_WIDTH)` times. The same closure therefore serves the plain
//! and the derivative paths, and is reused across all solver iterations.

use crate::math::{Dual, Scalar, AD_WIDTH};
use nalgebra::{DMatrix, DVector};

/// A smooth nonlinear program
///
/// ```text
/// min  f(x)
/// s.t. c_lb <= c(x) <= c_ub
///      x_lb <=  x   <= x_ub
/// ```
///
/// Equality constraints are rows with `c_lb == c_ub`. Infinite bounds are
/// `f64::INFINITY` / `f64::NEG_INFINITY`.
pub trait NlpProblem {
    /// Number of decision variables.
    fn num_variables(&self) -> usize;

    /// Number of constraint rows.
    fn num_constraints(&self) -> usize;

    /// Per-variable `(lower, upper)` bounds.
    fn variable_bounds(&self) -> (Vec<f64>, Vec<f64>);

    /// Per-row `(lower, upper)` constraint bounds.
    fn constraint_bounds(&self) -> (Vec<f64>, Vec<f64>);

    /// Starting point.
    fn initial_guess(&self) -> Vec<f64>;

    /// Objective and constraint vector at `x`, generic over the scalar.
    fn eval<T: Scalar>(&self, x: &[T]) -> (T, Vec<T>);
}

/// Objective value at `x`.
pub fn objective<P: NlpProblem + ?Sized>(problem: &P, x: &DVector<f64>) -> f64 {
    problem.eval(x.as_slice()).0
}

/// Constraint vector at `x`.
pub fn constraints<P: NlpProblem + ?Sized>(problem: &P, x: &DVector<f64>) -> DVector<f64> {
    DVector::from_vec(problem.eval(x.as_slice()).1)
}

/// Objective, gradient, constraints and dense Jacobian at `x`, all from
/// forward-AD sweeps of the problem's single evaluation closure.
pub fn derivatives<P: NlpProblem + ?Sized>(
    problem: &P,
    x: &DVector<f64>,
) -> (f64, DVector<f64>, DVector<f64>, DMatrix<f64>) {
    let n = problem.num_variables();
    let m = problem.num_constraints();
    let mut grad = DVector::zeros(n);
    let mut jac = DMatrix::zeros(m, n);
    let mut obj = 0.0;
    let mut cons = DVector::zeros(m);

    let mut seeded: Vec<Dual<AD_WIDTH>> = x.iter().map(|&v| Dual::new(v)).collect();
    let mut block_start = 0;
    while block_start < n {
        let width = AD_WIDTH.min(n - block_start);
        for k in 0..width {
            seeded[block_start + k] = Dual::variable(x[block_start + k], k);
        }

        let (f, c) = problem.eval(&seeded);
        obj = f.value();
        for k in 0..width {
            grad[block_start + k] = f.derivative(k);
        }
        for (j, cj) in c.iter().enumerate() {
            cons[j] = cj.value();
            for k in 0..width {
                jac[(j, block_start + k)] = cj.derivative(k);
            }
        }

        // Reset the block to constants before seeding the next one
        for k in 0..width {
            seeded[block_start + k] = Dual::new(x[block_start + k]);
        }
        block_start += width;
    }

    if n == 0 {
        let (f, c) = problem.eval::<f64>(&[]);
        obj = f;
        cons = DVector::from_vec(c);
    }

    (obj, grad, cons, jac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// min (x0 - 1)^2 + (x1 - 2.5)^2, one linear and one quadratic row
    struct QuadProblem;

    impl NlpProblem for QuadProblem {
        fn num_variables(&self) -> usize {
            2
        }

        fn num_constraints(&self) -> usize {
            2
        }

        fn variable_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![f64::NEG_INFINITY; 2], vec![f64::INFINITY; 2])
        }

        fn constraint_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![0.0, 0.0], vec![f64::INFINITY, 0.0])
        }

        fn initial_guess(&self) -> Vec<f64> {
            vec![0.0, 0.0]
        }

        fn eval<T: Scalar>(&self, x: &[T]) -> (T, Vec<T>) {
            let f = (x[0] - 1.0) * (x[0] - 1.0) + (x[1] - 2.5) * (x[1] - 2.5);
            let c0 = x[0] + x[1] - 1.0;
            let c1 = x[0] * x[1];
            (f, vec![c0, c1])
        }
    }

    #[test]
    fn test_derivatives_match_analytic() {
        let p = QuadProblem;
        let x = DVector::from_vec(vec![3.0, -2.0]);
        let (f, g, c, jac) = derivatives(&p, &x);

        assert_relative_eq!(f, 4.0 + 20.25);
        assert_relative_eq!(g[0], 2.0 * (3.0 - 1.0));
        assert_relative_eq!(g[1], 2.0 * (-2.0 - 2.5));
        assert_relative_eq!(c[0], 0.0);
        assert_relative_eq!(c[1], -6.0);
        assert_relative_eq!(jac[(0, 0)], 1.0);
        assert_relative_eq!(jac[(0, 1)], 1.0);
        assert_relative_eq!(jac[(1, 0)], -2.0);
        assert_relative_eq!(jac[(1, 1)], 3.0);
    }

    /// A problem wider than one tangent block, to exercise the sweep loop.
    struct WideProblem {
        n: usize,
    }

    impl NlpProblem for WideProblem {
        fn num_variables(&self) -> usize {
            self.n
        }

        fn num_constraints(&self) -> usize {
            1
        }

        fn variable_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![f64::NEG_INFINITY; self.n], vec![f64::INFINITY; self.n])
        }

        fn constraint_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![0.0], vec![0.0])
        }

        fn initial_guess(&self) -> Vec<f64> {
            vec![0.0; self.n]
        }

        fn eval<T: Scalar>(&self, x: &[T]) -> (T, Vec<T>) {
            // f = sum i * x_i^2, c = sum x_i
            let mut f = T::zero();
            let mut c = T::zero();
            for (i, xi) in x.iter().enumerate() {
                f += *xi * *xi * (i as f64);
                c += *xi;
            }
            (f, vec![c])
        }
    }

    #[test]
    fn test_sweep_covers_all_blocks() {
        let n = 37; // deliberately not a multiple of the tangent width
        let p = WideProblem { n };
        let x = DVector::from_fn(n, |i, _| 0.1 * (i as f64) - 1.0);
        let (_, g, _, jac) = derivatives(&p, &x);

        for i in 0..n {
            assert_relative_eq!(g[i], 2.0 * (i as f64) * x[i], epsilon = 1e-12);
            assert_relative_eq!(jac[(0, i)], 1.0);
        }
    }
}
