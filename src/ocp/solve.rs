//! Laptime solve driver
//!
//! Seeds the transcription (steady state or warm start), runs the
//! interior-point solver at the fixed tolerances, and post-processes the
//! primal solution: elapsed time is recovered by trapezoidal quadrature of
//! `dtime/ds`, the Cartesian pose is re-evaluated per node, and the
//! primal-dual data is captured for warm starting. Parameter sensitivities
//! come from implicit differentiation of the KKT system at the solution.

use crate::error::{Error, Result};
use crate::nlp::{ipm, problem, IpmOptions, NlpProblem, WarmStartData};
use crate::ocp::options::LaptimeOptions;
use crate::ocp::transcription::LaptimeProblem;
use crate::ocp::{OcpTrajectory, Sensitivities};
use crate::vehicle::{SteadyStateSolver, VehicleModel, ITIME};
use nalgebra::{DMatrix, DVector};
use std::fs;
use std::path::Path;
use tracing::{error, info};

/// Relative step for the finite-difference stages of the sensitivity
/// computation.
const SENSITIVITY_STEP: f64 = 1e-6;

/// Solve the minimum-laptime problem for a track-bound vehicle.
///
/// `range` restricts the solve to an open `[s_start, s_finish]` section;
/// `None` covers the whole track (closed tracks wrap). The returned
/// trajectory carries the warm-start data for follow-up solves.
pub fn solve_laptime<M: VehicleModel + Clone>(
    model: &M,
    options: LaptimeOptions,
    warm_start: Option<&WarmStartData>,
    range: Option<(f64, f64)>,
) -> Result<OcpTrajectory> {
    let result = solve_laptime_inner(model, options, warm_start, range);
    if let Err(e) = &result {
        error!(origin = "optimal-laptime", "{}", e);
    }
    result
}

fn solve_laptime_inner<M: VehicleModel + Clone>(
    model: &M,
    options: LaptimeOptions,
    warm_start: Option<&WarmStartData>,
    range: Option<(f64, f64)>,
) -> Result<OcpTrajectory> {
    let seed = SteadyStateSolver::new(model)
        .solve(options.steady_state_speed, 0.0, 0.0)
        .map_err(|e| e.with_context("laptime seeding"))?;

    let compute_sensitivity = options.compute_sensitivity;
    let print_level = options.print_level;
    let use_warm_start = options.warm_start;
    let transcription = LaptimeProblem::new(model, options, seed, range)?;

    let ipm_options = IpmOptions {
        print_level,
        ..Default::default()
    };
    let warm = if use_warm_start { warm_start } else { None };
    let solution = ipm::solve(&transcription, &ipm_options, warm)?;
    if !solution.status.is_success() {
        return Err(Error::optimization_failure(
            "laptime interior-point solve did not converge",
            solution.iterations,
        ));
    }
    info!(
        iterations = solution.iterations,
        objective = solution.objective,
        "laptime solve converged"
    );

    let mut trajectory = postprocess(model, &transcription, solution.x.as_slice())?;
    trajectory.warm_start = Some(solution.warm_start_data());

    if compute_sensitivity && model.parameters().num_declared_inputs() > 0 {
        trajectory.sensitivities = Some(kkt_sensitivities(
            model,
            &transcription,
            &solution,
            &trajectory,
        )?);
    }

    Ok(trajectory)
}

/// Rebuild the per-node trajectory from a primal solution: time by
/// trapezoidal quadrature, pose by re-evaluating the model.
pub(crate) fn postprocess<M: VehicleModel>(
    model: &M,
    problem: &LaptimeProblem<'_, M>,
    x: &[f64],
) -> Result<OcpTrajectory> {
    let mesh = problem.mesh().to_vec();
    let n = mesh.len();

    let mut q_rows = Vec::with_capacity(n);
    let mut qa_rows = Vec::with_capacity(n);
    let mut u_rows = Vec::with_capacity(n);
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    let mut psis = Vec::with_capacity(n);
    let mut dtime_ds = Vec::with_capacity(n);
    // One density column per configured integral quantity
    let quantity_names: Vec<String> = problem
        .integral_constraints()
        .iter()
        .map(|c| c.name.clone())
        .collect();
    let mut densities: Vec<Vec<f64>> = (0..quantity_names.len())
        .map(|_| Vec::with_capacity(n))
        .collect();

    for i in 0..n {
        let (q, qa, u) = problem.unpack_node(x, i);
        let evaluation = model.evaluate(&q, &qa, &u, mesh[i])?;
        xs.push(evaluation.x);
        ys.push(evaluation.y);
        psis.push(evaluation.psi);
        dtime_ds.push(evaluation.dtime_ds);
        for (k, name) in quantity_names.iter().enumerate() {
            densities[k].push(problem.integral_density(name, &evaluation));
        }
        q_rows.push(q);
        qa_rows.push(qa);
        u_rows.push(u);
    }

    // Elapsed time: trapezoidal quadrature of dtime/ds along the mesh
    q_rows[0][ITIME] = 0.0;
    for i in 1..n {
        let h = mesh[i] - mesh[i - 1];
        q_rows[i][ITIME] =
            q_rows[i - 1][ITIME] + 0.5 * h * (dtime_ds[i - 1] + dtime_ds[i]);
    }
    let mut laptime = q_rows[n - 1][ITIME];
    if problem.is_closed() {
        let h = problem.wrap_length();
        laptime += 0.5 * h * (dtime_ds[n - 1] + dtime_ds[0]);
    }

    // The declared integral quantities use the same trapezoidal rule as
    // their constraint rows, wrap element included
    let mut integral_values = Vec::with_capacity(quantity_names.len());
    for (name, column) in quantity_names.into_iter().zip(densities.iter()) {
        let mut total = 0.0;
        for i in 1..n {
            let h = mesh[i] - mesh[i - 1];
            total += 0.5 * h * (column[i - 1] + column[i]);
        }
        if problem.is_closed() {
            let h = problem.wrap_length();
            total += 0.5 * h * (column[n - 1] + column[0]);
        }
        integral_values.push((name, total));
    }

    Ok(OcpTrajectory {
        s: mesh,
        q: q_rows,
        qa: qa_rows,
        u: u_rows,
        x: xs,
        y: ys,
        psi: psis,
        laptime,
        integral_values,
        warm_start: None,
        sensitivities: None,
    })
}

/// Sensitivities by implicit differentiation of the KKT conditions: the KKT
/// matrix at the solution (Lagrangian Hessian by finite differences of the
/// AD gradient, bound stiffness from the final barrier state) is solved
/// against the parameter derivative of the KKT residual for each declared
/// input.
fn kkt_sensitivities<M: VehicleModel + Clone>(
    model: &M,
    laptime_problem: &LaptimeProblem<'_, M>,
    solution: &ipm::IpmSolution,
    trajectory: &OcpTrajectory,
) -> Result<Sensitivities> {
    let n = laptime_problem.num_variables();
    let m = laptime_problem.num_constraints();
    let x = &solution.x;
    let lambda = &solution.lambda;
    let (lb, ub) = laptime_problem.variable_bounds();

    // Lagrangian gradient as a function of (x, model)
    let grad_l = |variant: &M, point: &DVector<f64>| -> Result<(DVector<f64>, DVector<f64>)> {
        let shadow = LaptimeProblem::new(
            variant,
            laptime_problem.options_clone(),
            laptime_problem.seed_clone(),
            laptime_problem.range(),
        )?;
        let (_, grad, cons, jac) = problem::derivatives(&shadow, point);
        Ok((grad + jac.transpose() * lambda, cons))
    };

    // Hessian of the Lagrangian by central differences of the gradient
    let mut hessian = DMatrix::zeros(n, n);
    for i in 0..n {
        let h = SENSITIVITY_STEP * (1.0 + x[i].abs());
        let mut xp = x.clone();
        xp[i] += h;
        let mut xm = x.clone();
        xm[i] -= h;
        let (gp, _) = grad_l(model, &xp)?;
        let (gm, _) = grad_l(model, &xm)?;
        let column = (gp - gm) / (2.0 * h);
        hessian.set_column(i, &column);
    }
    // Symmetrize the finite-difference noise away
    let hessian = (&hessian + hessian.transpose()) * 0.5;

    // Bound stiffness from the converged primal-dual state
    let mut sigma = DVector::<f64>::zeros(n);
    for i in 0..n {
        if lb[i].is_finite() {
            sigma[i] += solution.z_lower[i] / (x[i] - lb[i]).max(1e-12);
        }
        if ub[i].is_finite() {
            sigma[i] += solution.z_upper[i] / (ub[i] - x[i]).max(1e-12);
        }
    }

    let (_, _, _, jac) = problem::derivatives(laptime_problem, x);
    let dim = n + m;
    let mut kkt = DMatrix::zeros(dim, dim);
    for i in 0..n {
        for j in 0..n {
            kkt[(i, j)] = hessian[(i, j)];
        }
        kkt[(i, i)] += sigma[i] + 1e-10;
    }
    for r in 0..m {
        for i in 0..n {
            kkt[(n + r, i)] = jac[(r, i)];
            kkt[(i, n + r)] = jac[(r, i)];
        }
        kkt[(n + r, n + r)] = -1e-10;
    }
    let factorization = nalgebra::linalg::LU::new(kkt);

    let inputs = model.parameters().declared_inputs();
    let mut aliases = Vec::with_capacity(inputs.len());
    let mut dlaptime = Vec::with_capacity(inputs.len());
    let mut dq = Vec::with_capacity(inputs.len());

    for (path, component) in &inputs {
        aliases.push(model.parameters().alias_of(path, *component));
        let h = SENSITIVITY_STEP
            * (1.0 + model.parameters().get(path).unwrap_or(1.0).abs());

        let mut plus = model.clone();
        plus.parameters_mut().nudge_declared_input(path, *component, h)?;
        plus.refresh_parameters()?;
        let mut minus = model.clone();
        minus
            .parameters_mut()
            .nudge_declared_input(path, *component, -h)?;
        minus.refresh_parameters()?;

        let (glp, cp) = grad_l(&plus, x)?;
        let (glm, cm) = grad_l(&minus, x)?;
        let mut rhs = DVector::zeros(dim);
        for i in 0..n {
            rhs[i] = -(glp[i] - glm[i]) / (2.0 * h);
        }
        for r in 0..m {
            rhs[n + r] = -(cp[r] - cm[r]) / (2.0 * h);
        }
        let step = factorization
            .solve(&rhs)
            .ok_or_else(|| Error::internal("singular KKT matrix in sensitivity computation"))?;
        let dxdp = step.rows(0, n).into_owned();

        // Per-node state sensitivities; the time row comes from the total
        // derivative of the quadrature along the perturbed solution path
        let x_plus = x + &dxdp * h;
        let x_minus = x - &dxdp * h;
        let shadow_plus = LaptimeProblem::new(
            &plus,
            laptime_problem.options_clone(),
            laptime_problem.seed_clone(),
            laptime_problem.range(),
        )?;
        let shadow_minus = LaptimeProblem::new(
            &minus,
            laptime_problem.options_clone(),
            laptime_problem.seed_clone(),
            laptime_problem.range(),
        )?;
        let traj_plus = postprocess(&plus, &shadow_plus, x_plus.as_slice())?;
        let traj_minus = postprocess(&minus, &shadow_minus, x_minus.as_slice())?;

        let nq = model.num_states();
        let mut dq_param = Vec::with_capacity(trajectory.len());
        for node in 0..trajectory.len() {
            let mut row = vec![0.0; nq];
            row[ITIME] =
                (traj_plus.q[node][ITIME] - traj_minus.q[node][ITIME]) / (2.0 * h);
            for j in 1..nq {
                row[j] = (traj_plus.q[node][j] - traj_minus.q[node][j]) / (2.0 * h);
            }
            dq_param.push(row);
        }
        dq.push(dq_param);
        dlaptime.push((traj_plus.laptime - traj_minus.laptime) / (2.0 * h));
    }

    Ok(Sensitivities {
        parameter_aliases: aliases,
        dlaptime,
        dq,
    })
}

/// Persist warm-start data as JSON.
pub fn save_warm_start_file<P: AsRef<Path>>(path: P, data: &WarmStartData) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::internal(&format!("warm start serialization failed: {}", e)))?;
    fs::write(path, json)?;
    Ok(())
}

/// Load previously saved warm-start data.
pub fn load_warm_start_file<P: AsRef<Path>>(path: P) -> Result<WarmStartData> {
    let json = fs::read_to_string(path)?;
    serde_json::from_str(&json)
        .map_err(|e| Error::invalid_value("warm start file", &e.to_string(), "not valid JSON"))
}
