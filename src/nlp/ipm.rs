//! Primal-dual interior-point solver
//!
//! Solves smooth NLPs of the form accepted by [`NlpProblem`]: general
//! constraint rows are given slack variables, bounds are handled by a
//! logarithmic barrier, and the barrier subproblems are driven by Newton
//! steps on the primal-dual system with a damped-BFGS approximation of the
//! Lagrangian Hessian. The update schedule follows the standard monotone
//! Fiacco-McCormick strategy: fraction-to-boundary step limits, Armijo
//! backtracking on an l1 exact-penalty merit function, and inertia
//! regularization of the KKT matrix when a computed direction is unusable.
//!
//! Linear algebra is dense (`nalgebra` LU); mesh sizes in this crate keep the
//! KKT systems in the low thousands of rows.

use crate::error::{Error, Result};
use crate::nlp::problem::{self, NlpProblem};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Interior-point solver options.
#[derive(Debug, Clone)]
pub struct IpmOptions {
    /// Overall KKT tolerance
    pub tol: f64,
    /// Constraint violation tolerance
    pub constr_viol_tol: f64,
    /// Tolerance at which a stalled run still counts as solved
    pub acceptable_tol: f64,
    /// Iteration cap
    pub max_iter: usize,
    /// Initial barrier parameter
    pub mu_init: f64,
    /// Verbosity, mapped onto `tracing` levels (>= 4 logs every iteration)
    pub print_level: u8,
}

impl Default for IpmOptions {
    fn default() -> Self {
        Self {
            tol: 1e-10,
            constr_viol_tol: 1e-10,
            acceptable_tol: 1e-8,
            max_iter: 3000,
            mu_init: 0.1,
            print_level: 0,
        }
    }
}

/// Solver exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpmStatus {
    /// Converged to `tol`
    Solved,
    /// Stopped with the acceptable tolerance satisfied
    SolvedToAcceptable,
    /// Iteration cap reached away from any tolerance
    MaxIterations,
    /// The line search could not make progress
    LineSearchFailure,
}

impl IpmStatus {
    /// True for the two statuses that deliver a usable solution.
    pub fn is_success(&self) -> bool {
        matches!(self, IpmStatus::Solved | IpmStatus::SolvedToAcceptable)
    }
}

/// Primal-dual seed carried between solves for warm starting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmStartData {
    /// Primal point
    pub x: Vec<f64>,
    /// Constraint multipliers
    pub lambda: Vec<f64>,
    /// Lower-bound multipliers
    pub z_lower: Vec<f64>,
    /// Upper-bound multipliers
    pub z_upper: Vec<f64>,
}

/// Solution returned by [`solve`].
#[derive(Debug, Clone)]
pub struct IpmSolution {
    pub status: IpmStatus,
    pub x: DVector<f64>,
    pub objective: f64,
    pub constraints: DVector<f64>,
    pub lambda: DVector<f64>,
    pub z_lower: DVector<f64>,
    pub z_upper: DVector<f64>,
    pub iterations: usize,
    pub kkt_error: f64,
}

impl IpmSolution {
    /// Primal-dual seed for a follow-up solve of the same problem shape.
    pub fn warm_start_data(&self) -> WarmStartData {
        WarmStartData {
            x: self.x.as_slice().to_vec(),
            lambda: self.lambda.as_slice().to_vec(),
            z_lower: self.z_lower.as_slice().to_vec(),
            z_upper: self.z_upper.as_slice().to_vec(),
        }
    }
}

const KAPPA_SIGMA: f64 = 1e10;
const BOUND_PUSH: f64 = 1e-2;
const WARM_BOUND_PUSH: f64 = 1e-9;
const DELTA_C: f64 = 1e-11;
const ARMIJO_ETA: f64 = 1e-4;

fn inf_norm(v: &DVector<f64>) -> f64 {
    if v.len() == 0 {
        0.0
    } else {
        v.amax()
    }
}

/// Solve `problem`, optionally from a primal-dual warm start.
pub fn solve<P: NlpProblem + ?Sized>(
    problem: &P,
    options: &IpmOptions,
    warm_start: Option<&WarmStartData>,
) -> Result<IpmSolution> {
    let n = problem.num_variables();
    let m = problem.num_constraints();
    let (x_lb, x_ub) = problem.variable_bounds();
    let (c_lb, c_ub) = problem.constraint_bounds();

    // Rows with identical bounds are equalities; the rest get slacks.
    let mut slack_of_row: Vec<Option<usize>> = Vec::with_capacity(m);
    let mut eq_target: Vec<f64> = Vec::with_capacity(m);
    let mut n_s = 0;
    for j in 0..m {
        if (c_ub[j] - c_lb[j]).abs() < 1e-14 {
            slack_of_row.push(None);
            eq_target.push(c_lb[j]);
        } else {
            slack_of_row.push(Some(n_s));
            eq_target.push(0.0);
            n_s += 1;
        }
    }
    let nz = n + n_s;

    // Bounds on the extended variable vector (x then slacks)
    let mut zl = vec![f64::NEG_INFINITY; nz];
    let mut zu = vec![f64::INFINITY; nz];
    zl[..n].copy_from_slice(&x_lb);
    zu[..n].copy_from_slice(&x_ub);
    for j in 0..m {
        if let Some(k) = slack_of_row[j] {
            zl[n + k] = c_lb[j];
            zu[n + k] = c_ub[j];
        }
    }
    let has_lower: Vec<bool> = zl.iter().map(|l| l.is_finite()).collect();
    let has_upper: Vec<bool> = zu.iter().map(|u| u.is_finite()).collect();

    // Initial primal point, pushed strictly inside its bounds. A warm start
    // is assumed to already sit correctly relative to its active set and is
    // only nudged off exact bound contact.
    let (x0, push) = match warm_start {
        Some(ws) if ws.x.len() == n => (ws.x.clone(), WARM_BOUND_PUSH),
        _ => (problem.initial_guess(), BOUND_PUSH),
    };
    let mut z = DVector::zeros(nz);
    for i in 0..n {
        z[i] = push_inside(x0[i], zl[i], zu[i], push);
    }
    {
        let c0 = problem::constraints(problem, &z.rows(0, n).into_owned());
        for j in 0..m {
            if let Some(k) = slack_of_row[j] {
                z[n + k] = push_inside(c0[j], zl[n + k], zu[n + k], push);
            }
        }
    }

    // Duals
    let mut lambda = DVector::zeros(m);
    if let Some(ws) = warm_start {
        if ws.lambda.len() == m {
            lambda.copy_from_slice(&ws.lambda);
        }
    }
    let mut mu = options.mu_init;
    let mut z_lo = DVector::zeros(nz);
    let mut z_up = DVector::zeros(nz);
    for i in 0..nz {
        if has_lower[i] {
            z_lo[i] = mu / (z[i] - zl[i]);
        }
        if has_upper[i] {
            z_up[i] = mu / (zu[i] - z[i]);
        }
    }
    if let Some(ws) = warm_start {
        if ws.z_lower.len() == n && ws.z_upper.len() == n {
            for i in 0..n {
                if has_lower[i] {
                    z_lo[i] = ws.z_lower[i].max(1e-8);
                }
                if has_upper[i] {
                    z_up[i] = ws.z_upper[i].max(1e-8);
                }
            }
            // A consistent seed starts the barrier near its final value
            let comp = average_complementarity(&z, &zl, &zu, &z_lo, &z_up, &has_lower, &has_upper);
            mu = comp.clamp(options.tol, options.mu_init);
        }
    }

    let mut w = DMatrix::<f64>::identity(nz, nz);
    let mut prev_lagrangian_state: Option<(DVector<f64>, DVector<f64>)> = None;
    let mut nu = 1.0_f64;
    let mut delta_w = 0.0_f64;
    let mut acceptable_count = 0usize;
    let mut stalled = 0usize;

    let mut last_e0 = f64::INFINITY;
    let mut iterations = 0;

    for iter in 0..options.max_iter {
        iterations = iter;
        let x = z.rows(0, n).into_owned();
        let (f, grad, c, jc) = problem::derivatives(problem, &x);

        // Equality residual over the extended system
        let mut g = DVector::zeros(m);
        for j in 0..m {
            g[j] = match slack_of_row[j] {
                Some(k) => c[j] - z[n + k],
                None => c[j] - eq_target[j],
            };
        }

        // Extended gradient and Jacobian
        let mut grad_z = DVector::zeros(nz);
        grad_z.rows_mut(0, n).copy_from(&grad);
        let mut jg = DMatrix::zeros(m, nz);
        jg.view_mut((0, 0), (m, n)).copy_from(&jc);
        for j in 0..m {
            if let Some(k) = slack_of_row[j] {
                jg[(j, n + k)] = -1.0;
            }
        }

        // Dual feasibility and complementarity residuals
        let jg_t_lambda = jg.transpose() * &lambda;
        let mut rd = &grad_z + &jg_t_lambda;
        for i in 0..nz {
            if has_lower[i] {
                rd[i] -= z_lo[i];
            }
            if has_upper[i] {
                rd[i] += z_up[i];
            }
        }
        let mut comp_err = 0.0_f64;
        let mut comp_err_mu = 0.0_f64;
        for i in 0..nz {
            if has_lower[i] {
                let t = z_lo[i] * (z[i] - zl[i]);
                comp_err = comp_err.max(t.abs());
                comp_err_mu = comp_err_mu.max((t - mu).abs());
            }
            if has_upper[i] {
                let t = z_up[i] * (zu[i] - z[i]);
                comp_err = comp_err.max(t.abs());
                comp_err_mu = comp_err_mu.max((t - mu).abs());
            }
        }
        let dual_inf = inf_norm(&rd);
        let primal_inf = inf_norm(&g);
        let e0 = dual_inf.max(primal_inf).max(comp_err);
        let e_mu = dual_inf.max(primal_inf).max(comp_err_mu);

        if options.print_level >= 4 {
            debug!(
                iter,
                objective = f,
                dual_inf,
                primal_inf,
                complementarity = comp_err,
                mu,
                "ipm iteration"
            );
        }

        if dual_inf <= options.tol
            && primal_inf <= options.constr_viol_tol
            && comp_err <= options.tol
        {
            return Ok(finish(
                IpmStatus::Solved,
                problem,
                options,
                z,
                lambda,
                z_lo,
                z_up,
                n,
                iter,
                e0,
            ));
        }
        if e0 <= options.acceptable_tol {
            acceptable_count += 1;
            if acceptable_count >= 10 {
                return Ok(finish(
                    IpmStatus::SolvedToAcceptable,
                    problem,
                    options,
                    z,
                    lambda,
                    z_lo,
                    z_up,
                    n,
                    iter,
                    e0,
                ));
            }
        } else {
            acceptable_count = 0;
        }

        // Barrier reduction once the subproblem is solved to within 10*mu
        if e_mu <= 10.0 * mu && mu > options.tol / 10.0 {
            mu = (options.tol / 10.0).max((mu / 5.0).min(mu.powf(1.5)));
        }

        // Damped BFGS update of the Lagrangian Hessian approximation
        let grad_l = &grad_z + &jg_t_lambda;
        if let Some((z_prev, grad_l_prev)) = prev_lagrangian_state.take() {
            let s = &z - &z_prev;
            let y = &grad_l - &grad_l_prev;
            bfgs_update(&mut w, &s, &y);
        }
        prev_lagrangian_state = Some((z.clone(), grad_l.clone()));

        // Barrier gradient
        let mut grad_phi = grad_z.clone();
        for i in 0..nz {
            if has_lower[i] {
                grad_phi[i] -= mu / (z[i] - zl[i]);
            }
            if has_upper[i] {
                grad_phi[i] += mu / (zu[i] - z[i]);
            }
        }

        // Primal-dual bound term
        let mut sigma = DVector::<f64>::zeros(nz);
        for i in 0..nz {
            if has_lower[i] {
                sigma[i] += z_lo[i] / (z[i] - zl[i]);
            }
            if has_upper[i] {
                sigma[i] += z_up[i] / (zu[i] - z[i]);
            }
        }

        // Assemble and solve the KKT system, regularizing until the
        // direction is a descent direction for the merit function.
        let rhs_top = -(&grad_phi + &jg_t_lambda);
        let mut dz = DVector::zeros(nz);
        let mut dlambda = DVector::zeros(m);
        let mut direction_ok = false;
        let mut local_delta = delta_w;
        for _attempt in 0..12 {
            let dim = nz + m;
            let mut kkt = DMatrix::zeros(dim, dim);
            for i in 0..nz {
                for jj in 0..nz {
                    kkt[(i, jj)] = w[(i, jj)];
                }
                kkt[(i, i)] += sigma[i] + local_delta;
            }
            for j in 0..m {
                for i in 0..nz {
                    kkt[(nz + j, i)] = jg[(j, i)];
                    kkt[(i, nz + j)] = jg[(j, i)];
                }
                kkt[(nz + j, nz + j)] = -DELTA_C;
            }
            let mut rhs = DVector::zeros(dim);
            rhs.rows_mut(0, nz).copy_from(&rhs_top);
            for j in 0..m {
                rhs[nz + j] = -g[j];
            }

            match nalgebra::linalg::LU::new(kkt).solve(&rhs) {
                Some(step) => {
                    dz = step.rows(0, nz).into_owned();
                    dlambda = step.rows(nz, m).into_owned();
                    // Descent test for the merit function
                    let d_phi = grad_phi.dot(&dz);
                    if d_phi <= 0.0 || primal_inf > options.constr_viol_tol {
                        direction_ok = true;
                        break;
                    }
                }
                None => {}
            }
            local_delta = if local_delta == 0.0 {
                1e-8
            } else {
                local_delta * 100.0
            };
        }
        delta_w = local_delta / 100.0;
        if !direction_ok {
            return fail_or_accept(
                IpmStatus::LineSearchFailure,
                problem,
                options,
                z,
                lambda,
                z_lo,
                z_up,
                n,
                iter,
                e0,
                "could not compute a usable search direction",
            );
        }

        // Bound-multiplier steps recovered from the eliminated rows
        let mut dz_lo = DVector::zeros(nz);
        let mut dz_up = DVector::zeros(nz);
        for i in 0..nz {
            if has_lower[i] {
                dz_lo[i] = mu / (z[i] - zl[i]) - z_lo[i] - z_lo[i] * dz[i] / (z[i] - zl[i]);
            }
            if has_upper[i] {
                dz_up[i] = mu / (zu[i] - z[i]) - z_up[i] + z_up[i] * dz[i] / (zu[i] - z[i]);
            }
        }

        // Fraction-to-boundary step limits
        let tau = 0.99_f64.max(1.0 - mu);
        let mut alpha_max = 1.0_f64;
        for i in 0..nz {
            if has_lower[i] && dz[i] < 0.0 {
                alpha_max = alpha_max.min(tau * (z[i] - zl[i]) / (-dz[i]));
            }
            if has_upper[i] && dz[i] > 0.0 {
                alpha_max = alpha_max.min(tau * (zu[i] - z[i]) / dz[i]);
            }
        }
        let mut alpha_dual = 1.0_f64;
        for i in 0..nz {
            if has_lower[i] && dz_lo[i] < 0.0 {
                alpha_dual = alpha_dual.min(tau * z_lo[i] / (-dz_lo[i]));
            }
            if has_upper[i] && dz_up[i] < 0.0 {
                alpha_dual = alpha_dual.min(tau * z_up[i] / (-dz_up[i]));
            }
        }

        // Penalty weight keeps the merit function exact
        let lambda_trial_norm = inf_norm(&(&lambda + &dlambda));
        nu = nu.max(2.0 * lambda_trial_norm).max(1.0);

        let merit = |z_try: &DVector<f64>| -> f64 {
            let x_try = z_try.rows(0, n).into_owned();
            let (f_try, c_try) = problem.eval(x_try.as_slice());
            let mut value = f_try;
            for i in 0..nz {
                if has_lower[i] {
                    value -= mu * (z_try[i] - zl[i]).ln();
                }
                if has_upper[i] {
                    value -= mu * (zu[i] - z_try[i]).ln();
                }
            }
            let mut viol = 0.0;
            for j in 0..m {
                let gj = match slack_of_row[j] {
                    Some(k) => c_try[j] - z_try[n + k],
                    None => c_try[j] - eq_target[j],
                };
                viol += gj.abs();
            }
            value + nu * viol
        };

        let phi0 = merit(&z);
        let descent = grad_phi.dot(&dz) - nu * g.iter().map(|v| v.abs()).sum::<f64>();
        let mut alpha = alpha_max;
        let mut accepted = false;
        for _ in 0..30 {
            let z_try = &z + &dz * alpha;
            let phi_try = merit(&z_try);
            if phi_try.is_finite() && phi_try <= phi0 + ARMIJO_ETA * alpha * descent.min(0.0) {
                accepted = true;
                break;
            }
            alpha *= 0.5;
        }
        if !accepted {
            stalled += 1;
            if stalled >= 5 {
                return fail_or_accept(
                    IpmStatus::LineSearchFailure,
                    problem,
                    options,
                    z,
                    lambda,
                    z_lo,
                    z_up,
                    n,
                    iter,
                    e0,
                    "line search stalled",
                );
            }
            // Restart curvature information and keep the tiny step
            w = DMatrix::identity(nz, nz);
            prev_lagrangian_state = None;
        } else {
            stalled = 0;
        }

        z += &dz * alpha;
        lambda += &dlambda * alpha;
        z_lo += &dz_lo * alpha_dual;
        z_up += &dz_up * alpha_dual;

        // Keep bound multipliers within the standard sigma box
        for i in 0..nz {
            if has_lower[i] {
                let center = mu / (z[i] - zl[i]);
                z_lo[i] = z_lo[i].clamp(center / KAPPA_SIGMA, center * KAPPA_SIGMA);
            }
            if has_upper[i] {
                let center = mu / (zu[i] - z[i]);
                z_up[i] = z_up[i].clamp(center / KAPPA_SIGMA, center * KAPPA_SIGMA);
            }
        }

        last_e0 = e0;
    }

    if last_e0 <= options.acceptable_tol {
        return Ok(finish(
            IpmStatus::SolvedToAcceptable,
            problem,
            options,
            z,
            lambda,
            z_lo,
            z_up,
            n,
            iterations,
            last_e0,
        ));
    }
    Err(Error::optimization_failure(
        &format!("maximum iterations reached with KKT error {:.3e}", last_e0),
        options.max_iter,
    ))
}

#[allow(clippy::too_many_arguments)]
fn finish<P: NlpProblem + ?Sized>(
    status: IpmStatus,
    problem: &P,
    options: &IpmOptions,
    z: DVector<f64>,
    lambda: DVector<f64>,
    z_lo: DVector<f64>,
    z_up: DVector<f64>,
    n: usize,
    iterations: usize,
    kkt_error: f64,
) -> IpmSolution {
    let x = z.rows(0, n).into_owned();
    let (objective, c) = problem.eval(x.as_slice());
    if options.print_level >= 1 {
        info!(
            ?status,
            iterations, objective, kkt_error, "interior-point solve finished"
        );
    }
    IpmSolution {
        status,
        objective,
        constraints: DVector::from_vec(c),
        z_lower: z_lo.rows(0, n).into_owned(),
        z_upper: z_up.rows(0, n).into_owned(),
        x,
        lambda,
        iterations,
        kkt_error,
    }
}

#[allow(clippy::too_many_arguments)]
fn fail_or_accept<P: NlpProblem + ?Sized>(
    status: IpmStatus,
    problem: &P,
    options: &IpmOptions,
    z: DVector<f64>,
    lambda: DVector<f64>,
    z_lo: DVector<f64>,
    z_up: DVector<f64>,
    n: usize,
    iterations: usize,
    kkt_error: f64,
    reason: &str,
) -> Result<IpmSolution> {
    if kkt_error <= options.acceptable_tol {
        return Ok(finish(
            IpmStatus::SolvedToAcceptable,
            problem,
            options,
            z,
            lambda,
            z_lo,
            z_up,
            n,
            iterations,
            kkt_error,
        ));
    }
    debug!(?status, kkt_error, "interior-point solve aborted");
    Err(Error::optimization_failure(reason, iterations))
}

fn push_inside(v: f64, lb: f64, ub: f64, push: f64) -> f64 {
    match (lb.is_finite(), ub.is_finite()) {
        (true, true) => {
            let pad = (push * (ub - lb)).min(push * lb.abs().max(1.0));
            v.clamp(lb + pad, ub - pad)
        }
        (true, false) => v.max(lb + push * lb.abs().max(1.0)),
        (false, true) => v.min(ub - push * ub.abs().max(1.0)),
        (false, false) => v,
    }
}

fn average_complementarity(
    z: &DVector<f64>,
    zl: &[f64],
    zu: &[f64],
    z_lo: &DVector<f64>,
    z_up: &DVector<f64>,
    has_lower: &[bool],
    has_upper: &[bool],
) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for i in 0..z.len() {
        if has_lower[i] {
            total += z_lo[i] * (z[i] - zl[i]);
            count += 1;
        }
        if has_upper[i] {
            total += z_up[i] * (zu[i] - z[i]);
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Powell-damped BFGS update keeping the approximation positive definite.
fn bfgs_update(w: &mut DMatrix<f64>, s: &DVector<f64>, y: &DVector<f64>) {
    let s_norm = s.norm();
    if s_norm < 1e-14 {
        return;
    }
    let ws = &*w * s;
    let s_w_s = s.dot(&ws);
    if s_w_s <= 1e-16 {
        return;
    }
    let s_y = s.dot(y);
    let theta = if s_y >= 0.2 * s_w_s {
        1.0
    } else {
        0.8 * s_w_s / (s_w_s - s_y)
    };
    let r = y * theta + &ws * (1.0 - theta);
    let s_r = s.dot(&r);
    if s_r <= 1e-16 {
        return;
    }
    // W <- W - (W s s^T W) / (s^T W s) + (r r^T) / (s^T r)
    let correction = &ws * ws.transpose() / s_w_s;
    let addition = &r * r.transpose() / s_r;
    *w -= correction;
    *w += addition;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Scalar;
    use approx::assert_relative_eq;

    /// min (x-2)^2 with x >= 3: solution pinned at the bound.
    struct BoundOnly;

    impl NlpProblem for BoundOnly {
        fn num_variables(&self) -> usize {
            1
        }
        fn num_constraints(&self) -> usize {
            0
        }
        fn variable_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![3.0], vec![f64::INFINITY])
        }
        fn constraint_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![], vec![])
        }
        fn initial_guess(&self) -> Vec<f64> {
            vec![5.0]
        }
        fn eval<T: Scalar>(&self, x: &[T]) -> (T, Vec<T>) {
            ((x[0] - 2.0) * (x[0] - 2.0), vec![])
        }
    }

    #[test]
    fn test_bound_constrained_quadratic() {
        let sol = solve(&BoundOnly, &IpmOptions::default(), None).unwrap();
        assert!(sol.status.is_success());
        assert_relative_eq!(sol.x[0], 3.0, epsilon = 1e-6);
        // Active lower bound carries a positive multiplier ~ 2*(3-2)
        assert_relative_eq!(sol.z_lower[0], 2.0, epsilon = 1e-4);
    }

    /// min x0^2 + x1^2 subject to x0 + x1 = 1: solution (0.5, 0.5).
    struct EqualityQp;

    impl NlpProblem for EqualityQp {
        fn num_variables(&self) -> usize {
            2
        }
        fn num_constraints(&self) -> usize {
            1
        }
        fn variable_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![f64::NEG_INFINITY; 2], vec![f64::INFINITY; 2])
        }
        fn constraint_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![1.0], vec![1.0])
        }
        fn initial_guess(&self) -> Vec<f64> {
            vec![2.0, -3.0]
        }
        fn eval<T: Scalar>(&self, x: &[T]) -> (T, Vec<T>) {
            (x[0] * x[0] + x[1] * x[1], vec![x[0] + x[1]])
        }
    }

    #[test]
    fn test_equality_constrained_qp() {
        let sol = solve(&EqualityQp, &IpmOptions::default(), None).unwrap();
        assert!(sol.status.is_success());
        assert_relative_eq!(sol.x[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(sol.x[1], 0.5, epsilon = 1e-6);
        // Stationarity: 2 x + lambda = 0 -> lambda = -1
        assert_relative_eq!(sol.lambda[0], -1.0, epsilon = 1e-4);
    }

    /// Hock-Schittkowski style: min (x0-1)^2 + (x1-2)^2 with x0*x1 >= 1,
    /// x >= 0. Solution on the hyperbola branch near (1.22, 1.88) is not
    /// needed in closed form: check feasibility and optimality conditions.
    struct InequalityProblem;

    impl NlpProblem for InequalityProblem {
        fn num_variables(&self) -> usize {
            2
        }
        fn num_constraints(&self) -> usize {
            1
        }
        fn variable_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![0.0, 0.0], vec![f64::INFINITY, f64::INFINITY])
        }
        fn constraint_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![1.0], vec![f64::INFINITY])
        }
        fn initial_guess(&self) -> Vec<f64> {
            vec![0.5, 0.5]
        }
        fn eval<T: Scalar>(&self, x: &[T]) -> (T, Vec<T>) {
            (
                (x[0] - 1.0) * (x[0] - 1.0) + (x[1] - 2.0) * (x[1] - 2.0),
                vec![x[0] * x[1]],
            )
        }
    }

    #[test]
    fn test_inequality_inactive_at_solution() {
        // The unconstrained optimum (1, 2) already satisfies x0*x1 >= 1
        let sol = solve(&InequalityProblem, &IpmOptions::default(), None).unwrap();
        assert!(sol.status.is_success());
        assert_relative_eq!(sol.x[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(sol.x[1], 2.0, epsilon = 1e-5);
    }

    /// min -x0 - x1 with x0^2 + x1^2 <= 2: active circle, solution (1, 1).
    struct ActiveInequality;

    impl NlpProblem for ActiveInequality {
        fn num_variables(&self) -> usize {
            2
        }
        fn num_constraints(&self) -> usize {
            1
        }
        fn variable_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![f64::NEG_INFINITY; 2], vec![f64::INFINITY; 2])
        }
        fn constraint_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![f64::NEG_INFINITY], vec![2.0])
        }
        fn initial_guess(&self) -> Vec<f64> {
            vec![0.0, 0.0]
        }
        fn eval<T: Scalar>(&self, x: &[T]) -> (T, Vec<T>) {
            (-x[0] - x[1], vec![x[0] * x[0] + x[1] * x[1]])
        }
    }

    #[test]
    fn test_active_inequality() {
        let sol = solve(&ActiveInequality, &IpmOptions::default(), None).unwrap();
        assert!(sol.status.is_success());
        assert_relative_eq!(sol.x[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(sol.x[1], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_warm_start_converges_quickly() {
        let cold = solve(&ActiveInequality, &IpmOptions::default(), None).unwrap();
        let ws = cold.warm_start_data();
        let warm = solve(&ActiveInequality, &IpmOptions::default(), Some(&ws)).unwrap();
        assert!(warm.status.is_success());
        assert!(warm.iterations <= cold.iterations);
        assert_relative_eq!(warm.x[0], cold.x[0], epsilon = 1e-6);
    }

    #[test]
    fn test_infeasible_start_recovers() {
        // Start far outside the feasible circle
        struct Shifted;
        impl NlpProblem for Shifted {
            fn num_variables(&self) -> usize {
                2
            }
            fn num_constraints(&self) -> usize {
                1
            }
            fn variable_bounds(&self) -> (Vec<f64>, Vec<f64>) {
                (vec![f64::NEG_INFINITY; 2], vec![f64::INFINITY; 2])
            }
            fn constraint_bounds(&self) -> (Vec<f64>, Vec<f64>) {
                (vec![f64::NEG_INFINITY], vec![2.0])
            }
            fn initial_guess(&self) -> Vec<f64> {
                vec![15.0, -22.0]
            }
            fn eval<T: Scalar>(&self, x: &[T]) -> (T, Vec<T>) {
                (-x[0] - x[1], vec![x[0] * x[0] + x[1] * x[1]])
            }
        }
        let sol = solve(&Shifted, &IpmOptions::default(), None).unwrap();
        assert!(sol.status.is_success());
        assert_relative_eq!(sol.x[0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(sol.x[1], 1.0, epsilon = 1e-4);
    }
}
