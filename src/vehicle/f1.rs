//! 3-DOF single-track F1 model with algebraic vertical loads
//!
//! The chassis is rigid in the small-pitch/small-roll approximation: the
//! planar states `(u, v, omega)` evolve under tire and aerodynamic forces
//! while the four vertical loads are algebraic states determined by the
//! vertical, roll and pitch equilibria plus the roll-balance apportionment.
//! Controls are `(delta, throttle, brake_bias)`: positive throttle drives
//! the rear axle against the engine power cap, negative throttle brakes with
//! the force split front/rear by the bias. The throttle split uses the
//! smooth positive part so the evaluation stays differentiable.

use crate::error::{Error, Result};
use crate::math::{smooth_min, smooth_pos, Scalar};
use crate::track::TrackSurface;
use crate::vehicle::params::ParameterSet;
use crate::vehicle::tire::Tire;
use crate::vehicle::{
    check_state_layout, Evaluation, TireState, VehicleModel, IALPHA, IN, IOMEGA, IU, IV,
};
use std::sync::Arc;

const GRAVITY: f64 = 9.81;
const AIR_DENSITY: f64 = 1.2;
/// Sharpness of the throttle/brake split, in throttle units.
const THROTTLE_EPS: f64 = 1e-3;

/// Scalar parameters read from the vehicle description.
#[derive(Debug, Clone, Copy)]
struct F1Params {
    mass: f64,
    inertia_z: f64,
    /// COM to front/rear axle distances
    a: f64,
    b: f64,
    /// COM height
    h: f64,
    track_front: f64,
    track_rear: f64,
    roll_balance: f64,
    drag_area: f64,
    lift_area: f64,
    max_power: f64,
    max_engine_force: f64,
    max_brake_force: f64,
}

impl F1Params {
    fn read(set: &ParameterSet, s: f64) -> Result<Self> {
        Ok(Self {
            mass: set.get_at("chassis/mass", s)?,
            inertia_z: set.get_at("chassis/inertia-z", s)?,
            a: set.get_at("chassis/front-axle-distance", s)?,
            b: set.get_at("chassis/rear-axle-distance", s)?,
            h: set.get_at("chassis/com-height", s)?,
            track_front: set.get_at("chassis/front-track", s)?,
            track_rear: set.get_at("chassis/rear-track", s)?,
            roll_balance: set.get_at("chassis/roll-balance-coefficient", s)?,
            drag_area: set.get_at("aerodynamics/drag-area", s)?,
            lift_area: set.get_at("aerodynamics/lift-area", s)?,
            max_power: set.get_at("engine/maximum-power", s)?,
            max_engine_force: set.get_at("engine/maximum-force", s)?,
            max_brake_force: set.get_at("brakes/maximum-force", s)?,
        })
    }
}

/// The F1 3-DOF vehicle.
#[derive(Debug, Clone)]
pub struct F1Car {
    parameters: ParameterSet,
    front_tire: Tire,
    rear_tire: Tire,
    track: Option<Arc<TrackSurface>>,
}

impl F1Car {
    pub const NQ: usize = 6;
    pub const NA: usize = 4;
    pub const NU: usize = 3;

    /// Build from a parameter set (as parsed from vehicle XML).
    pub fn new(parameters: ParameterSet) -> Result<Self> {
        check_state_layout()?;
        // Validate the mandatory scalar set and tire tables up front
        F1Params::read(&parameters, 0.0)?;
        parameters.get("steering/maximum-angle")?;
        let front_tire = Tire::from_params(&parameters, "front-tire")?;
        let rear_tire = Tire::from_params(&parameters, "rear-tire")?;
        Ok(Self {
            parameters,
            front_tire,
            rear_tire,
            track: None,
        })
    }

    /// A parameter set with representative reference values, used by tests
    /// and as a documentation starting point.
    pub fn reference_parameters() -> ParameterSet {
        let mut set = ParameterSet::new();
        for (path, value) in [
            ("chassis/mass", 660.0),
            ("chassis/inertia-z", 450.0),
            ("chassis/front-axle-distance", 1.8),
            ("chassis/rear-axle-distance", 1.6),
            ("chassis/com-height", 0.3),
            ("chassis/front-track", 1.46),
            ("chassis/rear-track", 1.46),
            ("chassis/roll-balance-coefficient", 0.5),
            ("aerodynamics/drag-area", 1.5),
            ("aerodynamics/lift-area", 3.0),
            ("engine/maximum-power", 600.0e3),
            ("engine/maximum-force", 18.0e3),
            ("brakes/maximum-force", 30.0e3),
            ("steering/maximum-angle", 0.26),
            ("front-tire/stiffness-factor", 9.0),
            ("front-tire/shape-factor", 1.5),
            ("front-tire/mu-x-max", 1.7),
            ("front-tire/mu-y-max", 1.6),
            ("front-tire/kappa-max", 0.10),
            ("front-tire/lambda-max", 0.157),
            ("front-tire/radius", 0.33),
            ("rear-tire/stiffness-factor", 9.0),
            ("rear-tire/shape-factor", 1.5),
            ("rear-tire/mu-x-max", 1.7),
            ("rear-tire/mu-y-max", 1.6),
            ("rear-tire/kappa-max", 0.10),
            ("rear-tire/lambda-max", 0.157),
            ("rear-tire/radius", 0.33),
        ] {
            set.insert(path, value);
        }
        set
    }

    fn kappa_and_pose<T: Scalar>(&self, s: f64, n: T, alpha: T) -> (f64, T, T, T) {
        match &self.track {
            Some(track) => {
                let kappa = track.kappa_at(s);
                let (x, y, theta) = track.position_at(s, n);
                (kappa, x, y, theta + alpha)
            }
            // Unbound vehicles run on a straight virtual road: the
            // steady-state solver uses this before any track exists
            None => (0.0, T::constant(s), n, alpha),
        }
    }
}

impl VehicleModel for F1Car {
    fn kind(&self) -> &'static str {
        "f1-3dof"
    }

    fn num_states(&self) -> usize {
        Self::NQ
    }

    fn num_algebraic(&self) -> usize {
        Self::NA
    }

    fn num_controls(&self) -> usize {
        Self::NU
    }

    fn control_names(&self) -> &'static [&'static str] {
        &["delta", "throttle", "brake-bias"]
    }

    fn is_direct_by_default(&self) -> bool {
        true
    }

    fn track(&self) -> Option<&Arc<TrackSurface>> {
        self.track.as_ref()
    }

    fn change_track(&mut self, track: Arc<TrackSurface>) {
        self.track = Some(track);
    }

    fn clear_track(&mut self) {
        self.track = None;
    }

    fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut ParameterSet {
        &mut self.parameters
    }

    fn refresh_parameters(&mut self) -> Result<()> {
        self.front_tire = Tire::from_params(&self.parameters, "front-tire")?;
        self.rear_tire = Tire::from_params(&self.parameters, "rear-tire")?;
        F1Params::read(&self.parameters, 0.0)?;
        Ok(())
    }

    fn evaluate<T: Scalar>(&self, q: &[T], qa: &[T], u_in: &[T], s: f64) -> Result<Evaluation<T>> {
        if q.len() != Self::NQ || qa.len() != Self::NA || u_in.len() != Self::NU {
            return Err(Error::internal("f1-3dof evaluation dimension mismatch"));
        }
        let p = F1Params::read(&self.parameters, s)?;

        let n = q[IN];
        let alpha = q[IALPHA];
        let u = q[IU];
        let v = q[IV];
        let omega = q[IOMEGA];
        let loads = [qa[0], qa[1], qa[2], qa[3]];
        let delta = u_in[0];
        let throttle = u_in[1];
        let brake_bias = u_in[2];

        let (kappa, x, y, psi) = self.kappa_and_pose(s, n, alpha);

        // Aerodynamics
        let dyn_pressure = u * u * (0.5 * AIR_DENSITY);
        let drag = dyn_pressure * p.drag_area;
        let downforce = dyn_pressure * p.lift_area;

        // Longitudinal force demand: engine on the rear axle against the
        // power cap, brakes split by the bias
        let engine = smooth_pos(throttle, THROTTLE_EPS)
            * smooth_min(
                T::constant(p.max_power) / (u + 1e-3),
                T::constant(p.max_engine_force),
                1.0,
            );
        let brake = smooth_pos(-throttle, THROTTLE_EPS) * p.max_brake_force;
        let fx_demand_front = -(brake * brake_bias) * 0.5;
        let fx_demand_rear = (engine - brake * (T::one() - brake_bias)) * 0.5;

        // Slip angles from the axle kinematics
        let lambda_front = ((v + omega * p.a) / u).atan() - delta;
        let lambda_rear = ((v - omega * p.b) / u).atan();

        // Per-tire slip ratios from the force demand, then tire forces
        let demands = [
            fx_demand_front,
            fx_demand_front,
            fx_demand_rear,
            fx_demand_rear,
        ];
        let lambdas = [lambda_front, lambda_front, lambda_rear, lambda_rear];
        let tires_def = [
            &self.front_tire,
            &self.front_tire,
            &self.rear_tire,
            &self.rear_tire,
        ];

        let mut tires = [TireState::<T>::zero(); 4];
        let mut fx_body = [T::zero(); 4];
        let mut fy_body = [T::zero(); 4];
        let (sin_delta, cos_delta) = (delta.sin(), delta.cos());
        for i in 0..4 {
            let slip_ratio = tires_def[i].kappa_from_force(demands[i], loads[i]);
            let (fx, fy) = tires_def[i].forces(slip_ratio, lambdas[i], loads[i]);
            // Front tire forces rotate into the body frame with the steering
            let (fx_b, fy_b) = if i < 2 {
                (fx * cos_delta - fy * sin_delta, fx * sin_delta + fy * cos_delta)
            } else {
                (fx, fy)
            };
            fx_body[i] = fx_b;
            fy_body[i] = fy_b;
            tires[i] = TireState {
                x: T::zero(),
                y: T::zero(),
                kappa: slip_ratio,
                lambda: lambdas[i],
                fx,
                fy,
                fz: loads[i],
                dissipation: tires_def[i].dissipation(fx, fy, slip_ratio, lambdas[i], u),
            };
        }

        // Contact patch positions in track coordinates
        let (sin_psi, cos_psi) = (psi.sin(), psi.cos());
        let offsets = [
            (p.a, 0.5 * p.track_front),
            (p.a, -0.5 * p.track_front),
            (-p.b, 0.5 * p.track_rear),
            (-p.b, -0.5 * p.track_rear),
        ];
        for i in 0..4 {
            let (dx, dy) = offsets[i];
            tires[i].x = x + cos_psi * dx - sin_psi * dy;
            tires[i].y = y + sin_psi * dx + cos_psi * dy;
        }

        // Totals and planar dynamics
        let fx_total = fx_body.iter().copied().sum::<T>() - drag;
        let fy_total = fy_body.iter().copied().sum::<T>();
        let mz = (fy_body[0] + fy_body[1]) * p.a - (fy_body[2] + fy_body[3]) * p.b
            + (fx_body[1] - fx_body[0]) * (0.5 * p.track_front)
            + (fx_body[3] - fx_body[2]) * (0.5 * p.track_rear);

        let du_dt = fx_total / p.mass + v * omega;
        let dv_dt = fy_total / p.mass - u * omega;
        let domega_dt = mz / p.inertia_z;

        // Body accelerations projected on the velocity direction
        let ax_body = du_dt - v * omega;
        let ay_body = dv_dt + u * omega;
        let speed = (u * u + v * v).sqrt();
        let ax = (u * ax_body + v * ay_body) / speed;
        let ay = (u * ay_body - v * ax_body) / speed;

        // Curvilinear kinematics; positive n lies to the right of travel
        let sdot = (u * alpha.cos() - v * alpha.sin()) / (T::one() + n * kappa);
        let dtime_ds = T::one() / sdot;
        let dn_dt = -(u * alpha.sin() + v * alpha.cos());
        let dalpha_dt = omega - sdot * kappa;

        let dqdt = vec![T::one(), dn_dt, dalpha_dt, du_dt, dv_dt, domega_dt];
        let dqds: Vec<T> = dqdt.iter().map(|d| *d * dtime_ds).collect();

        // Algebraic residuals: vertical, roll, pitch, roll balance,
        // normalized by the static load scale
        let weight = p.mass * GRAVITY;
        let wheelbase = p.a + p.b;
        let r_vertical =
            (loads[0] + loads[1] + loads[2] + loads[3] - downforce - weight) / weight;
        let transfer_front = (loads[0] - loads[1]) * (0.5 * p.track_front);
        let transfer_rear = (loads[2] - loads[3]) * (0.5 * p.track_rear);
        let r_roll = (transfer_front + transfer_rear + ay_body * (p.mass * p.h))
            / (weight * wheelbase);
        let r_pitch = ((loads[0] + loads[1]) * p.a - (loads[2] + loads[3]) * p.b
            + fx_total * p.h)
            / (weight * wheelbase);
        let r_balance = (transfer_front * (1.0 - p.roll_balance)
            - transfer_rear * p.roll_balance)
            / (weight * wheelbase);
        let residuals = vec![r_vertical, r_roll, r_pitch, r_balance];

        // Positive when the driver steers more than the neutral amount
        let understeer = delta - (omega / u) * wheelbase;

        Ok(Evaluation {
            dqds,
            residuals,
            dqdt,
            dtime_ds,
            ax,
            ay,
            drag_power: drag * u,
            x,
            y,
            psi,
            tires,
            understeer,
        })
    }

    fn state_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        (
            vec![0.0, -30.0, -0.6, 5.0, -10.0, -2.0],
            vec![f64::INFINITY, 30.0, 0.6, 110.0, 10.0, 2.0],
        )
    }

    fn algebraic_state_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        (vec![0.0; 4], vec![40.0e3; 4])
    }

    fn control_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let max_steering = self
            .parameters
            .get("steering/maximum-angle")
            .unwrap_or(0.26);
        (
            vec![-max_steering, -1.0, 0.1],
            vec![max_steering, 1.0, 0.9],
        )
    }

    fn extra_constraint_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let mut lb = Vec::with_capacity(8);
        let mut ub = Vec::with_capacity(8);
        for tire in [&self.front_tire, &self.front_tire, &self.rear_tire, &self.rear_tire] {
            lb.push(-tire.kappa_max);
            ub.push(tire.kappa_max);
        }
        for tire in [&self.front_tire, &self.front_tire, &self.rear_tire, &self.rear_tire] {
            lb.push(-tire.lambda_max);
            ub.push(tire.lambda_max);
        }
        (lb, ub)
    }

    fn extra_constraints<T: Scalar>(&self, evaluation: &Evaluation<T>) -> Vec<T> {
        let mut values = Vec::with_capacity(8);
        for tire in &evaluation.tires {
            values.push(tire.kappa);
        }
        for tire in &evaluation.tires {
            values.push(tire.lambda);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn car() -> F1Car {
        F1Car::new(F1Car::reference_parameters()).unwrap()
    }

    /// Vertical loads satisfying the four equilibria for straight running at
    /// speed `u` with zero longitudinal force transfer.
    fn static_loads(car: &F1Car, u: f64) -> [f64; 4] {
        let p = F1Params::read(&car.parameters, 0.0).unwrap();
        let downforce = 0.5 * AIR_DENSITY * p.lift_area * u * u;
        let total = p.mass * GRAVITY + downforce;
        let front = total * p.b / (p.a + p.b) / 2.0;
        let rear = total * p.a / (p.a + p.b) / 2.0;
        [front, front, rear, rear]
    }

    #[test]
    fn test_reference_parameters_build() {
        let car = car();
        assert_eq!(car.kind(), "f1-3dof");
        assert_eq!(car.num_states(), 6);
        assert_eq!(car.num_algebraic(), 4);
        assert_eq!(car.num_controls(), 3);
    }

    #[test]
    fn test_missing_parameter_rejected() {
        let mut set = ParameterSet::new();
        set.insert("chassis/mass", 660.0);
        assert!(F1Car::new(set).is_err());
    }

    #[test]
    fn test_straight_running_equilibrium() {
        let car = car();
        let u = 50.0;
        let loads = static_loads(&car, u);
        let q = [0.0, 0.0, 0.0, u, 0.0, 0.0];
        // Small positive throttle balances drag at constant speed
        let p = F1Params::read(&car.parameters, 0.0).unwrap();
        let drag = 0.5 * AIR_DENSITY * p.drag_area * u * u;
        let engine_available = (p.max_power / u).min(p.max_engine_force);
        let throttle = drag / engine_available;
        let controls = [0.0, throttle, 0.5];

        let eval = car.evaluate(&q, &loads, &controls, 0.0).unwrap();

        // Vertical and balance residuals vanish for the static loads
        assert_relative_eq!(eval.residuals[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(eval.residuals[1], 0.0, epsilon = 1e-9);
        assert_relative_eq!(eval.residuals[3], 0.0, epsilon = 1e-9);

        // Symmetric straight running: no lateral force, no yaw moment
        assert_relative_eq!(eval.dqdt[IV], 0.0, epsilon = 1e-6);
        assert_relative_eq!(eval.dqdt[IOMEGA], 0.0, epsilon = 1e-6);
        // Drag balanced by throttle: near-zero longitudinal acceleration
        assert_relative_eq!(eval.ax, 0.0, epsilon = 0.5);

        // Time runs forward at ~1/u per meter
        assert_relative_eq!(eval.dtime_ds.value(), 1.0 / u, epsilon = 1e-9);
    }

    #[test]
    fn test_braking_decelerates() {
        let car = car();
        let u = 50.0;
        let loads = static_loads(&car, u);
        let q = [0.0, 0.0, 0.0, u, 0.0, 0.0];
        let eval = car
            .evaluate(&q, &loads, &[0.0, -0.8, 0.5], 0.0)
            .unwrap();
        assert!(eval.ax < -10.0, "braking ax = {}", eval.ax);
        // Braking slip ratios are negative on every wheel
        for tire in &eval.tires {
            assert!(tire.kappa < 0.0);
        }
    }

    #[test]
    fn test_steering_produces_yaw_moment() {
        let car = car();
        let u = 50.0;
        let loads = static_loads(&car, u);
        let q = [0.0, 0.0, 0.0, u, 0.0, 0.0];
        let eval = car.evaluate(&q, &loads, &[0.05, 0.0, 0.5], 0.0).unwrap();
        // Left steer: front slip angle negative, positive front lateral
        // force, positive yaw acceleration
        assert!(eval.tires[0].lambda < 0.0);
        assert!(eval.tires[0].fy > 0.0);
        assert!(eval.dqdt[IOMEGA] > 0.0);
        assert!(eval.ay > 0.0);
    }

    #[test]
    fn test_roll_residual_feels_lateral_acceleration() {
        let car = car();
        let u = 50.0;
        let loads = static_loads(&car, u);
        let q = [0.0, 0.0, 0.0, u, 0.0, 0.4];
        let eval = car.evaluate(&q, &loads, &[0.03, 0.0, 0.5], 0.0).unwrap();
        // With symmetric loads and nonzero ay the roll equation is violated
        assert!(eval.residuals[1].abs() > 1e-4);
    }

    #[test]
    fn test_evaluation_is_differentiable() {
        use crate::math::{Ad, AD_WIDTH};
        let car = car();
        let u = 50.0;
        let loads = static_loads(&car, u);

        let mut q: Vec<Ad> = [0.0, 0.0, 0.0, u, 0.0, 0.0]
            .iter()
            .map(|&v| Ad::new(v))
            .collect();
        q[IU] = Ad::variable(u, 0);
        let qa: Vec<Ad> = loads.iter().map(|&v| Ad::new(v)).collect();
        let controls: Vec<Ad> = [0.0, 0.2, 0.5].iter().map(|&v| Ad::new(v)).collect();

        let eval = car.evaluate(&q, &qa, &controls, 0.0).unwrap();
        assert!(AD_WIDTH >= 1);
        // dtime/ds = 1/u, so its derivative w.r.t. u is -1/u^2
        assert_relative_eq!(
            eval.dtime_ds.derivative(0),
            -1.0 / (u * u),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_extra_constraints_shape() {
        let car = car();
        let u = 50.0;
        let loads = static_loads(&car, u);
        let q = [0.0, 0.0, 0.0, u, 0.0, 0.0];
        let eval = car.evaluate(&q, &loads, &[0.0, 0.1, 0.5], 0.0).unwrap();
        let values = car.extra_constraints(&eval);
        let (lb, ub) = car.extra_constraint_bounds();
        assert_eq!(values.len(), 8);
        assert_eq!(lb.len(), 8);
        assert_eq!(ub.len(), 8);
        for ((v, l), u) in values.iter().zip(lb.iter()).zip(ub.iter()) {
            assert!(*v >= *l && *v <= *u);
        }
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let car = car();
        assert!(car.evaluate(&[0.0; 5], &[0.0; 4], &[0.0; 3], 0.0).is_err());
        assert!(car.evaluate(&[0.0; 6], &[0.0; 3], &[0.0; 3], 0.0).is_err());
    }
}
