//! Trapezoidal collocation of the laptime OCP
//!
//! Free variables per node are the non-time states, the algebraic states
//! and the controls (direct mode) or control rates (derivative mode).
//! Elapsed time is excluded: its row of the dynamics is integrated after
//! the solve, which is why the state layout keeps the time index
//! immediately before the lateral offset, leaving the remaining states as
//! one contiguous slice.
//!
//! Constraint order: collocation defects per element, derivative-mode
//! control integration per element, algebraic residuals per node, tire
//! inequalities per node, open-track pinning rows, integral constraints.

use crate::error::{Error, Result};
use crate::math::Scalar;
use crate::nlp::NlpProblem;
use crate::ocp::options::{ControlMode, IntegralConstraint, LaptimeOptions};
use crate::track::TrackSurface;
use crate::vehicle::{Evaluation, SteadyState, VehicleModel, ITIME};
use std::sync::Arc;

/// Where one control index lives in the decision vector.
#[derive(Debug, Clone)]
enum ControlSlot {
    /// Fixed at the seed value
    Fixed(f64),
    /// Node-block slot (direct), plus a rate slot in derivative mode
    FullMesh { slot: usize, rate_slot: Option<usize> },
    /// Global variable range, one per breakpoint, with a per-node segment map
    Hypermesh { base: usize, segment_of_node: Vec<usize> },
}

/// The laptime OCP as an [`NlpProblem`].
pub struct LaptimeProblem<'a, M: VehicleModel> {
    model: &'a M,
    surface: Arc<TrackSurface>,
    options: LaptimeOptions,
    seed: SteadyState,
    range: Option<(f64, f64)>,
    mesh: Vec<f64>,
    closed: bool,
    wrap_length: f64,
    is_direct: bool,
    controls: Vec<ControlSlot>,
    node_block: usize,
    n_hypermesh: usize,
}

impl<'a, M: VehicleModel> LaptimeProblem<'a, M> {
    /// Build the transcription over `[s_start, s_finish]` (the whole track
    /// when `range` is `None`).
    pub fn new(
        model: &'a M,
        options: LaptimeOptions,
        seed: SteadyState,
        range: Option<(f64, f64)>,
    ) -> Result<Self> {
        let surface = model
            .track()
            .ok_or_else(|| Error::internal("laptime transcription needs a track-bound vehicle"))?
            .clone();
        let length = surface.length();
        let closed = surface.is_closed() && range.is_none();

        let (s_start, s_finish) = match range {
            Some((start, finish)) => {
                if finish > length + 1e-9 {
                    return Err(Error::invalid_value(
                        "s_finish",
                        &finish.to_string(),
                        &format!("the track is only {:.1} m long", length),
                    ));
                }
                if finish <= start {
                    return Err(Error::invalid_value(
                        "s_finish",
                        &finish.to_string(),
                        "the range must run forward",
                    ));
                }
                (start, finish)
            }
            None => (0.0, length),
        };

        let n_points = options
            .n_points
            .unwrap_or_else(|| surface.data().s.len())
            .max(3);
        let mut mesh = Vec::with_capacity(n_points);
        if closed {
            let h = (s_finish - s_start) / n_points as f64;
            for i in 0..n_points {
                mesh.push(s_start + i as f64 * h);
            }
        } else {
            let h = (s_finish - s_start) / (n_points - 1) as f64;
            for i in 0..n_points {
                mesh.push(s_start + i as f64 * h);
            }
        }
        let wrap_length = if closed { length - mesh[n_points - 1] } else { 0.0 };

        if !closed && options.initial_condition.is_none() {
            return Err(Error::missing_key(
                "initial_condition",
                "open-track laptime options",
            ));
        }

        let is_direct = options.resolve_is_direct(model);
        let nq = model.num_states();
        let na = model.num_algebraic();
        let nu = model.num_controls();

        // Per-node block: non-time states, algebraic states, full-mesh
        // controls, then their rates in derivative mode
        let mut controls = Vec::with_capacity(nu);
        let mut fm_count = 0usize;
        for j in 0..nu {
            match options.control_mode(j) {
                ControlMode::Constant => {
                    return Err(Error::invalid_value(
                        "control mode",
                        "constant",
                        "the constant mode is reserved and currently unsupported",
                    ));
                }
                ControlMode::DontOptimize => controls.push(ControlSlot::Fixed(seed.u[j])),
                ControlMode::FullMesh => {
                    let slot = (nq - 1) + na + fm_count;
                    let rate_slot = if is_direct { None } else { Some(0) };
                    controls.push(ControlSlot::FullMesh { slot, rate_slot });
                    fm_count += 1;
                }
                ControlMode::Hypermesh(breaks) => {
                    if breaks.is_empty() {
                        return Err(Error::invalid_value(
                            "hypermesh",
                            "empty",
                            "a hypermesh control needs at least one breakpoint",
                        ));
                    }
                    let segment_of_node = mesh
                        .iter()
                        .map(|&s| {
                            breaks
                                .iter()
                                .rposition(|&b| s >= b)
                                .unwrap_or(0)
                        })
                        .collect();
                    controls.push(ControlSlot::Hypermesh {
                        base: 0, // patched below once fm_count is known
                        segment_of_node,
                    });
                }
            }
        }
        let node_block = (nq - 1) + na + fm_count * if is_direct { 1 } else { 2 };

        // Patch rate slots and hypermesh bases now that the block is sized
        let mut fm_seen = 0usize;
        let mut hyper_base = n_points * node_block;
        let mut n_hypermesh = 0usize;
        for (j, slot) in controls.iter_mut().enumerate() {
            match slot {
                ControlSlot::FullMesh { rate_slot, .. } => {
                    if !is_direct {
                        *rate_slot = Some((nq - 1) + na + fm_count + fm_seen);
                    }
                    fm_seen += 1;
                }
                ControlSlot::Hypermesh { base, .. } => {
                    let breaks = match options.control_mode(j) {
                        ControlMode::Hypermesh(b) => b.len(),
                        _ => 0,
                    };
                    *base = hyper_base;
                    hyper_base += breaks;
                    n_hypermesh += breaks;
                }
                ControlSlot::Fixed(_) => {}
            }
        }

        Ok(Self {
            model,
            surface,
            options,
            seed,
            range,
            mesh,
            closed,
            wrap_length,
            is_direct,
            controls,
            node_block,
            n_hypermesh,
        })
    }

    /// The configuration this transcription was built with.
    pub fn options_clone(&self) -> LaptimeOptions {
        self.options.clone()
    }

    /// The steady-state seed this transcription was built with.
    pub fn seed_clone(&self) -> SteadyState {
        self.seed.clone()
    }

    /// The open range restriction, if any.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }

    /// Node arclengths.
    pub fn mesh(&self) -> &[f64] {
        &self.mesh
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_direct(&self) -> bool {
        self.is_direct
    }

    /// Length of the implicit last-to-first element on closed tracks.
    pub fn wrap_length(&self) -> f64 {
        self.wrap_length
    }

    pub fn num_nodes(&self) -> usize {
        self.mesh.len()
    }

    fn num_elements(&self) -> usize {
        if self.closed {
            self.mesh.len()
        } else {
            self.mesh.len() - 1
        }
    }

    fn element_nodes(&self, e: usize) -> (usize, usize, f64) {
        let n = self.mesh.len();
        if e + 1 < n {
            (e, e + 1, self.mesh[e + 1] - self.mesh[e])
        } else {
            (n - 1, 0, self.wrap_length)
        }
    }

    fn num_fixed_pinning_rows(&self) -> usize {
        if self.closed {
            0
        } else {
            let fm = self
                .controls
                .iter()
                .filter(|c| matches!(c, ControlSlot::FullMesh { .. }))
                .count();
            (self.model.num_states() - 1) + self.model.num_algebraic() + fm
        }
    }

    /// Assemble `(q, qa, u)` at a node from the decision vector.
    pub fn unpack_node<T: Scalar>(&self, x: &[T], node: usize) -> (Vec<T>, Vec<T>, Vec<T>) {
        let nq = self.model.num_states();
        let na = self.model.num_algebraic();
        let base = node * self.node_block;

        // Time is recovered after the solve; the `ITIME + 1 == IN` adjacency
        // makes the remaining states one contiguous slice
        let mut q = vec![T::zero(); nq];
        for j in (ITIME + 1)..nq {
            q[j] = x[base + (j - 1)];
        }
        let qa: Vec<T> = (0..na).map(|k| x[base + (nq - 1) + k]).collect();
        let u: Vec<T> = self
            .controls
            .iter()
            .map(|slot| match slot {
                ControlSlot::Fixed(value) => T::constant(*value),
                ControlSlot::FullMesh { slot, .. } => x[base + slot],
                ControlSlot::Hypermesh {
                    base: hyper_base,
                    segment_of_node,
                } => x[hyper_base + segment_of_node[node]],
            })
            .collect();
        (q, qa, u)
    }

    /// Control rate at a node (derivative mode only).
    fn unpack_rate<T: Scalar>(&self, x: &[T], node: usize, control: usize) -> Option<T> {
        match &self.controls[control] {
            ControlSlot::FullMesh {
                rate_slot: Some(slot),
                ..
            } => Some(x[node * self.node_block + slot]),
            _ => None,
        }
    }

    /// The configured integral constraints.
    pub fn integral_constraints(&self) -> &[IntegralConstraint] {
        &self.options.integral_constraints
    }

    /// Value of a named integral quantity at a node, per unit arclength.
    /// The options parser restricts names to the supported set.
    pub(crate) fn integral_density<T: Scalar>(&self, name: &str, evaluation: &Evaluation<T>) -> T {
        match name {
            "tire-dissipation" => {
                let power: T = evaluation.tires.iter().map(|t| t.dissipation).sum();
                power * evaluation.dtime_ds
            }
            "aerodynamic-drag-work" => evaluation.drag_power * evaluation.dtime_ds,
            _ => T::zero(),
        }
    }
}

impl<M: VehicleModel> NlpProblem for LaptimeProblem<'_, M> {
    fn num_variables(&self) -> usize {
        self.mesh.len() * self.node_block + self.n_hypermesh
    }

    fn num_constraints(&self) -> usize {
        let nq = self.model.num_states();
        let na = self.model.num_algebraic();
        let n_extra = self.model.extra_constraint_bounds().0.len();
        let fm = self
            .controls
            .iter()
            .filter(|c| matches!(c, ControlSlot::FullMesh { .. }))
            .count();
        let rate_rows = if self.is_direct { 0 } else { fm };

        self.num_elements() * ((nq - 1) + rate_rows)
            + self.mesh.len() * (na + n_extra)
            + self.num_fixed_pinning_rows()
            + self.options.integral_constraints.len()
    }

    fn variable_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let nq = self.model.num_states();
        let na = self.model.num_algebraic();
        let (q_lb, q_ub) = self.model.state_bounds();
        let (a_lb, a_ub) = self.model.algebraic_state_bounds();
        let (u_lb, u_ub) = self.model.control_bounds();

        let mut lb = vec![f64::NEG_INFINITY; self.num_variables()];
        let mut ub = vec![f64::INFINITY; self.num_variables()];
        for (i, &s) in self.mesh.iter().enumerate() {
            let base = i * self.node_block;
            for j in 1..nq {
                lb[base + (j - 1)] = q_lb[j];
                ub[base + (j - 1)] = q_ub[j];
            }
            // The lateral offset is bounded by the local track width
            lb[base] = -self.surface.n_left_at(s);
            ub[base] = self.surface.n_right_at(s);
            for k in 0..na {
                lb[base + (nq - 1) + k] = a_lb[k];
                ub[base + (nq - 1) + k] = a_ub[k];
            }
            for (j, slot) in self.controls.iter().enumerate() {
                if let ControlSlot::FullMesh { slot, rate_slot } = slot {
                    lb[base + slot] = u_lb[j];
                    ub[base + slot] = u_ub[j];
                    if let Some(rate) = rate_slot {
                        lb[base + rate] = -1.0e3;
                        ub[base + rate] = 1.0e3;
                    }
                }
            }
        }
        for (j, slot) in self.controls.iter().enumerate() {
            if let ControlSlot::Hypermesh {
                base,
                segment_of_node,
            } = slot
            {
                let count = segment_of_node.iter().max().map_or(0, |m| m + 1);
                for k in 0..count {
                    lb[base + k] = u_lb[j];
                    ub[base + k] = u_ub[j];
                }
            }
        }
        (lb, ub)
    }

    fn constraint_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let mut lb = Vec::with_capacity(self.num_constraints());
        let mut ub = Vec::with_capacity(self.num_constraints());
        let nq = self.model.num_states();
        let fm = self
            .controls
            .iter()
            .filter(|c| matches!(c, ControlSlot::FullMesh { .. }))
            .count();
        let rate_rows = if self.is_direct { 0 } else { fm };

        for _ in 0..self.num_elements() * ((nq - 1) + rate_rows) {
            lb.push(0.0);
            ub.push(0.0);
        }
        for _ in 0..self.mesh.len() * self.model.num_algebraic() {
            lb.push(0.0);
            ub.push(0.0);
        }
        let (extra_lb, extra_ub) = self.model.extra_constraint_bounds();
        for _ in 0..self.mesh.len() {
            lb.extend_from_slice(&extra_lb);
            ub.extend_from_slice(&extra_ub);
        }
        for _ in 0..self.num_fixed_pinning_rows() {
            lb.push(0.0);
            ub.push(0.0);
        }
        for constraint in &self.options.integral_constraints {
            lb.push(constraint.lower);
            ub.push(constraint.upper);
        }
        (lb, ub)
    }

    fn initial_guess(&self) -> Vec<f64> {
        let nq = self.model.num_states();
        let na = self.model.num_algebraic();
        let mut x = vec![0.0; self.num_variables()];
        for i in 0..self.mesh.len() {
            let base = i * self.node_block;
            for j in 1..nq {
                x[base + (j - 1)] = self.seed.q[j];
            }
            for k in 0..na {
                x[base + (nq - 1) + k] = self.seed.qa[k];
            }
            for (j, slot) in self.controls.iter().enumerate() {
                if let ControlSlot::FullMesh { slot, .. } = slot {
                    x[base + slot] = self.seed.u[j];
                }
            }
        }
        for (j, slot) in self.controls.iter().enumerate() {
            if let ControlSlot::Hypermesh {
                base,
                segment_of_node,
            } = slot
            {
                let count = segment_of_node.iter().max().map_or(0, |m| m + 1);
                for k in 0..count {
                    x[base + k] = self.seed.u[j];
                }
            }
        }
        x
    }

    fn eval<T: Scalar>(&self, x: &[T]) -> (T, Vec<T>) {
        let n = self.mesh.len();
        let nq = self.model.num_states();

        // One model evaluation per node, shared by both adjacent elements
        let mut evaluations: Vec<Option<(Vec<T>, Vec<T>, Evaluation<T>)>> = Vec::with_capacity(n);
        for i in 0..n {
            let (q, qa, u) = self.unpack_node(x, i);
            match self.model.evaluate(&q, &qa, &u, self.mesh[i]) {
                Ok(evaluation) => evaluations.push(Some((q, u, evaluation))),
                Err(_) => evaluations.push(None),
            }
        }
        if evaluations.iter().any(Option::is_none) {
            let nan = T::constant(f64::NAN);
            return (nan, vec![nan; self.num_constraints()]);
        }
        let evaluations: Vec<(Vec<T>, Vec<T>, Evaluation<T>)> =
            evaluations.into_iter().flatten().collect();

        let mut constraints = Vec::with_capacity(self.num_constraints());

        // Collocation defects (and control-rate integration) per element
        for e in 0..self.num_elements() {
            let (a, b, h) = self.element_nodes(e);
            let (q_at_a, _, ev_a) = &evaluations[a];
            let (q_at_b, _, ev_b) = &evaluations[b];
            for j in 1..nq {
                constraints.push(
                    q_at_b[j] - q_at_a[j] - (ev_a.dqds[j] + ev_b.dqds[j]) * (0.5 * h),
                );
            }
            if !self.is_direct {
                for (j, slot) in self.controls.iter().enumerate() {
                    if matches!(slot, ControlSlot::FullMesh { .. }) {
                        let u_a = evaluations[a].1[j];
                        let u_b = evaluations[b].1[j];
                        let rate_a = self.unpack_rate(x, a, j).unwrap_or_else(T::zero);
                        let rate_b = self.unpack_rate(x, b, j).unwrap_or_else(T::zero);
                        constraints.push(
                            u_b - u_a
                                - (rate_a * ev_a.dtime_ds + rate_b * ev_b.dtime_ds)
                                    * (0.5 * h),
                        );
                    }
                }
            }
        }

        // Pointwise algebraic residuals
        for (_, _, evaluation) in &evaluations {
            constraints.extend(evaluation.residuals.iter().copied());
        }

        // Tire inequalities per node
        for (_, _, evaluation) in &evaluations {
            constraints.extend(self.model.extra_constraints(evaluation));
        }

        // Open tracks pin the first node to the configured start
        if !self.closed {
            if let Some((q0, qa0, u0)) = &self.options.initial_condition {
                let (q, qa, u) = self.unpack_node(x, 0);
                for j in 1..nq {
                    constraints.push(q[j] - q0.get(j).copied().unwrap_or(0.0));
                }
                for (k, value) in qa0.iter().enumerate().take(self.model.num_algebraic()) {
                    constraints.push(qa[k] - *value);
                }
                for (j, slot) in self.controls.iter().enumerate() {
                    if matches!(slot, ControlSlot::FullMesh { .. }) {
                        constraints.push(u[j] - u0.get(j).copied().unwrap_or(0.0));
                    }
                }
            }
        }

        // Integral constraints by the same trapezoidal rule
        for constraint in &self.options.integral_constraints {
            let mut total = T::zero();
            for e in 0..self.num_elements() {
                let (a, b, h) = self.element_nodes(e);
                let g_a = self.integral_density(&constraint.name, &evaluations[a].2);
                let g_b = self.integral_density(&constraint.name, &evaluations[b].2);
                total += (g_a + g_b) * (0.5 * h);
            }
            constraints.push(total);
        }

        // Minimum time plus control-chatter dissipation
        let mut objective = T::zero();
        for e in 0..self.num_elements() {
            let (a, b, h) = self.element_nodes(e);
            objective +=
                (evaluations[a].2.dtime_ds + evaluations[b].2.dtime_ds) * (0.5 * h);
            for j in 0..self.model.num_controls() {
                let sigma = self.options.sigma(j);
                if sigma > 0.0 {
                    let du = evaluations[b].1[j] - evaluations[a].1[j];
                    objective += du * du * (sigma / h);
                }
            }
        }

        (objective, constraints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::problem;
    use crate::track::surface::test_utils::circle_track;
    use crate::vehicle::steady_state::SteadyStateSolver;
    use crate::vehicle::{F1Car, Kart};
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    fn bound_car(radius: f64, nodes: usize) -> F1Car {
        let mut car = F1Car::new(F1Car::reference_parameters()).unwrap();
        let surface = TrackSurface::new(circle_track(radius, nodes)).unwrap();
        car.change_track(Arc::new(surface));
        car
    }

    fn seed_for<Mo: VehicleModel + Clone>(model: &Mo, speed: f64) -> SteadyState {
        SteadyStateSolver::new(model).solve(speed, 0.0, 0.0).unwrap()
    }

    #[test]
    fn test_closed_direct_shapes() {
        let car = bound_car(100.0, 64);
        let seed = seed_for(&car, 40.0);
        let options = LaptimeOptions {
            n_points: Some(20),
            ..Default::default()
        };
        let problem = LaptimeProblem::new(&car, options, seed, None).unwrap();

        assert!(problem.is_closed());
        assert!(problem.is_direct());
        assert_eq!(problem.num_nodes(), 20);
        // 5 non-time states + 4 loads + 3 controls per node
        assert_eq!(problem.num_variables(), 20 * 12);
        // 5 collocation rows per element, 4 algebraic + 8 tire rows per node
        assert_eq!(problem.num_constraints(), 20 * 5 + 20 * 4 + 20 * 8);
        // The wrap element closes the remaining arclength
        let covered = problem.mesh()[19] + problem.wrap_length();
        assert_relative_eq!(covered, 2.0 * std::f64::consts::PI * 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_derivative_mode_adds_rates() {
        let mut kart = Kart::new(Kart::reference_parameters()).unwrap();
        kart.change_track(Arc::new(
            TrackSurface::new(circle_track(60.0, 64)).unwrap(),
        ));
        let seed = seed_for(&kart, 12.0);
        let options = LaptimeOptions {
            n_points: Some(15),
            ..Default::default()
        };
        let problem = LaptimeProblem::new(&kart, options, seed, None).unwrap();

        // Kart defaults to derivative transcription
        assert!(!problem.is_direct());
        // 11 non-time states + 2 controls + 2 control rates per node
        assert_eq!(problem.num_variables(), 15 * 15);
        // 11 collocation + 2 rate rows per element, 8 tire rows per node
        assert_eq!(problem.num_constraints(), 15 * 13 + 15 * 8);
    }

    #[test]
    fn test_constant_mode_rejected() {
        let car = bound_car(100.0, 64);
        let seed = seed_for(&car, 40.0);
        let options = LaptimeOptions {
            n_points: Some(10),
            control_modes: vec![ControlMode::FullMesh, ControlMode::Constant],
            ..Default::default()
        };
        assert!(LaptimeProblem::new(&car, options, seed, None).is_err());
    }

    #[test]
    fn test_dont_optimize_pins_to_seed() {
        let car = bound_car(100.0, 64);
        let seed = seed_for(&car, 40.0);
        let seed_bias = seed.u[2];
        let options = LaptimeOptions {
            n_points: Some(10),
            control_modes: vec![
                ControlMode::FullMesh,
                ControlMode::FullMesh,
                ControlMode::DontOptimize,
            ],
            ..Default::default()
        };
        let problem = LaptimeProblem::new(&car, options, seed, None).unwrap();
        // Two controls per node instead of three
        assert_eq!(problem.num_variables(), 10 * 11);
        let x = problem.initial_guess();
        let (_, _, u) = problem.unpack_node(x.as_slice(), 3);
        assert_relative_eq!(u[2], seed_bias);
    }

    #[test]
    fn test_hypermesh_control_layout() {
        let car = bound_car(100.0, 64);
        let seed = seed_for(&car, 40.0);
        let length = 2.0 * std::f64::consts::PI * 100.0;
        let options = LaptimeOptions {
            n_points: Some(12),
            control_modes: vec![
                ControlMode::FullMesh,
                ControlMode::Hypermesh(vec![0.0, length / 3.0, 2.0 * length / 3.0]),
                ControlMode::DontOptimize,
            ],
            ..Default::default()
        };
        let problem = LaptimeProblem::new(&car, options, seed, None).unwrap();
        // Per node: 5 states + 4 loads + 1 full-mesh control; plus 3 globals
        assert_eq!(problem.num_variables(), 12 * 10 + 3);

        // All nodes in the first third share one hypermesh variable
        let x = problem.initial_guess();
        let (_, _, u0) = problem.unpack_node(x.as_slice(), 0);
        let (_, _, u3) = problem.unpack_node(x.as_slice(), 3);
        assert_relative_eq!(u0[1], u3[1]);
    }

    #[test]
    fn test_n_bounds_follow_track_width() {
        let car = bound_car(100.0, 64);
        let seed = seed_for(&car, 40.0);
        let options = LaptimeOptions {
            n_points: Some(10),
            ..Default::default()
        };
        let problem = LaptimeProblem::new(&car, options, seed, None).unwrap();
        let (lb, ub) = problem.variable_bounds();
        for i in 0..10 {
            let base = i * 12;
            assert_relative_eq!(lb[base], -4.0);
            assert_relative_eq!(ub[base], 4.0);
        }
    }

    #[test]
    fn test_initial_guess_near_feasible_on_circle() {
        // Seeded with the straight-line steady state on a gentle circle,
        // the collocation defects are small but nonzero
        let car = bound_car(300.0, 64);
        let seed = seed_for(&car, 40.0);
        let options = LaptimeOptions {
            n_points: Some(16),
            ..Default::default()
        };
        let problem = LaptimeProblem::new(&car, options, seed, None).unwrap();
        let x = DVector::from_vec(problem.initial_guess());
        let (obj, cons) = problem.eval(x.as_slice());

        assert!(obj.is_finite());
        assert!(obj > 0.0);
        assert_eq!(cons.len(), problem.num_constraints());
        for c in &cons {
            assert!(c.is_finite());
            assert!(c.abs() < 50.0);
        }

        // And the AD sweep produces matching dimensions
        let (_, grad, cons2, jac) = problem::derivatives(&problem, &x);
        assert_eq!(grad.len(), problem.num_variables());
        assert_eq!(cons2.len(), cons.len());
        assert_eq!(jac.nrows(), cons.len());
        assert_eq!(jac.ncols(), problem.num_variables());
    }

    #[test]
    fn test_open_range_validation() {
        let car = bound_car(100.0, 64);
        let seed = seed_for(&car, 40.0);
        let length = 2.0 * std::f64::consts::PI * 100.0;

        // s_finish beyond the track length is rejected up front
        let options = LaptimeOptions {
            n_points: Some(10),
            initial_condition: Some((seed.q.clone(), seed.qa.clone(), seed.u.clone())),
            ..Default::default()
        };
        assert!(
            LaptimeProblem::new(&car, options.clone(), seed.clone(), Some((0.0, length + 50.0)))
                .is_err()
        );
        assert!(
            LaptimeProblem::new(&car, options.clone(), seed.clone(), Some((100.0, 50.0))).is_err()
        );

        // A valid range without an initial condition is also rejected
        let options_no_ic = LaptimeOptions {
            n_points: Some(10),
            ..Default::default()
        };
        assert!(
            LaptimeProblem::new(&car, options_no_ic, seed.clone(), Some((0.0, 200.0))).is_err()
        );

        // A valid open range pins the first node
        let problem =
            LaptimeProblem::new(&car, options, seed.clone(), Some((0.0, 200.0))).unwrap();
        assert!(!problem.is_closed());
        // 5 state + 4 algebraic + 3 control pinning rows
        assert_eq!(
            problem.num_constraints(),
            9 * 5 + 10 * 4 + 10 * 8 + (5 + 4 + 3)
        );
        let x = problem.initial_guess();
        let (_, cons) = problem.eval(x.as_slice());
        // The pinning rows are exactly satisfied by the seeded guess
        let pin_start = 9 * 5 + 10 * 4 + 10 * 8;
        for c in &cons[pin_start..] {
            assert_relative_eq!(*c, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_integral_constraint_row() {
        let car = bound_car(100.0, 64);
        let seed = seed_for(&car, 40.0);
        let options = LaptimeOptions {
            n_points: Some(10),
            integral_constraints: vec![crate::ocp::IntegralConstraint {
                name: "tire-dissipation".to_string(),
                lower: 0.0,
                upper: 5.0e6,
            }],
            ..Default::default()
        };
        let problem = LaptimeProblem::new(&car, options, seed, None).unwrap();
        let (lb, ub) = problem.constraint_bounds();
        let last = problem.num_constraints() - 1;
        assert_relative_eq!(lb[last], 0.0);
        assert_relative_eq!(ub[last], 5.0e6);

        let x = problem.initial_guess();
        let (_, cons) = problem.eval(x.as_slice());
        // Rolling at constant speed dissipates some tire energy
        assert!(cons[last] >= 0.0);
        assert!(cons[last].is_finite());
    }

    #[test]
    fn test_drag_work_integral_row() {
        let car = bound_car(100.0, 64);
        let seed = seed_for(&car, 40.0);
        let options = LaptimeOptions {
            n_points: Some(10),
            integral_constraints: vec![crate::ocp::IntegralConstraint {
                name: "aerodynamic-drag-work".to_string(),
                lower: 0.0,
                upper: 1.0e8,
            }],
            ..Default::default()
        };
        let problem = LaptimeProblem::new(&car, options, seed, None).unwrap();
        let x = problem.initial_guess();
        let (_, cons) = problem.eval(x.as_slice());
        let last = problem.num_constraints() - 1;

        // Cruising at 40 m/s spends real energy against drag over the lap:
        // force 0.5*rho*CdA*u^2 times the distance, to the trapezoid's
        // accuracy on the seeded guess
        let length = 2.0 * std::f64::consts::PI * 100.0;
        let expected = 0.5 * 1.2 * 1.5 * 40.0_f64.powi(2) * length;
        assert!(cons[last] > 0.5 * expected);
        assert!(cons[last] < 2.0 * expected);
    }
}
