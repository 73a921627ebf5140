//! 6-DOF kart model with explicit suspension loads
//!
//! The kart chassis carries the full six degrees of freedom: the planar
//! states `(u, v, omega)` plus heave, roll and pitch as second-order
//! dynamics over the corner spring-dampers and the frame's torsional
//! stiffness. Vertical tire loads are explicit functions of the chassis
//! pose and its rates, so the model has no algebraic states. Controls are
//! `(delta, rear_torque)`: the rear axle is driven (or braked) by a single
//! torque, as on a real kart with its live axle.

use crate::error::{Error, Result};
use crate::math::Scalar;
use crate::track::TrackSurface;
use crate::vehicle::params::ParameterSet;
use crate::vehicle::tire::Tire;
use crate::vehicle::{
    check_state_layout, Evaluation, TireState, VehicleModel, IALPHA, IN, IOMEGA, IU, IV,
};
use std::sync::Arc;

const GRAVITY: f64 = 9.81;
const AIR_DENSITY: f64 = 1.2;

/// Chassis pose states beyond the planar set.
pub const IZ: usize = 6;
pub const IPHI: usize = 7;
pub const IMU: usize = 8;
pub const IDZ: usize = 9;
pub const IDPHI: usize = 10;
pub const IDMU: usize = 11;

#[derive(Debug, Clone, Copy)]
struct KartParams {
    mass: f64,
    inertia_x: f64,
    inertia_y: f64,
    inertia_z: f64,
    a: f64,
    b: f64,
    h: f64,
    track_front: f64,
    track_rear: f64,
    /// Corner spring stiffness and damping (front, rear)
    stiffness_front: f64,
    stiffness_rear: f64,
    damping_front: f64,
    damping_rear: f64,
    /// Frame torsional stiffness coupling front and rear roll
    torsional_stiffness: f64,
    drag_area: f64,
}

impl KartParams {
    fn read(set: &ParameterSet, s: f64) -> Result<Self> {
        Ok(Self {
            mass: set.get_at("chassis/mass", s)?,
            inertia_x: set.get_at("chassis/inertia-x", s)?,
            inertia_y: set.get_at("chassis/inertia-y", s)?,
            inertia_z: set.get_at("chassis/inertia-z", s)?,
            a: set.get_at("chassis/front-axle-distance", s)?,
            b: set.get_at("chassis/rear-axle-distance", s)?,
            h: set.get_at("chassis/com-height", s)?,
            track_front: set.get_at("chassis/front-track", s)?,
            track_rear: set.get_at("chassis/rear-track", s)?,
            stiffness_front: set.get_at("suspension/front-stiffness", s)?,
            stiffness_rear: set.get_at("suspension/rear-stiffness", s)?,
            damping_front: set.get_at("suspension/front-damping", s)?,
            damping_rear: set.get_at("suspension/rear-damping", s)?,
            torsional_stiffness: set.get_at("frame/torsional-stiffness", s)?,
            drag_area: set.get_at("aerodynamics/drag-area", s)?,
        })
    }
}

/// The kart 6-DOF vehicle.
#[derive(Debug, Clone)]
pub struct Kart {
    parameters: ParameterSet,
    front_tire: Tire,
    rear_tire: Tire,
    track: Option<Arc<TrackSurface>>,
}

impl Kart {
    pub const NQ: usize = 12;
    pub const NA: usize = 0;
    pub const NU: usize = 2;

    /// Build from a parameter set (as parsed from vehicle XML).
    pub fn new(parameters: ParameterSet) -> Result<Self> {
        check_state_layout()?;
        KartParams::read(&parameters, 0.0)?;
        parameters.get("steering/maximum-angle")?;
        parameters.get("rear-axle/maximum-torque")?;
        let front_tire = Tire::from_params(&parameters, "front-tire")?;
        let rear_tire = Tire::from_params(&parameters, "rear-tire")?;
        Ok(Self {
            parameters,
            front_tire,
            rear_tire,
            track: None,
        })
    }

    /// A parameter set with representative reference values.
    pub fn reference_parameters() -> ParameterSet {
        let mut set = ParameterSet::new();
        for (path, value) in [
            ("chassis/mass", 160.0),
            ("chassis/inertia-x", 10.0),
            ("chassis/inertia-y", 15.0),
            ("chassis/inertia-z", 20.0),
            ("chassis/front-axle-distance", 0.6),
            ("chassis/rear-axle-distance", 0.45),
            ("chassis/com-height", 0.25),
            ("chassis/front-track", 1.0),
            ("chassis/rear-track", 1.2),
            ("suspension/front-stiffness", 30.0e3),
            ("suspension/rear-stiffness", 35.0e3),
            ("suspension/front-damping", 1.0e3),
            ("suspension/rear-damping", 1.2e3),
            ("frame/torsional-stiffness", 3.0e3),
            ("aerodynamics/drag-area", 0.7),
            ("steering/maximum-angle", 0.45),
            ("rear-axle/maximum-torque", 180.0),
            ("front-tire/stiffness-factor", 8.0),
            ("front-tire/shape-factor", 1.4),
            ("front-tire/mu-x-max", 1.2),
            ("front-tire/mu-y-max", 1.1),
            ("front-tire/kappa-max", 0.12),
            ("front-tire/lambda-max", 0.175),
            ("front-tire/radius", 0.13),
            ("rear-tire/stiffness-factor", 8.0),
            ("rear-tire/shape-factor", 1.4),
            ("rear-tire/mu-x-max", 1.2),
            ("rear-tire/mu-y-max", 1.1),
            ("rear-tire/kappa-max", 0.12),
            ("rear-tire/lambda-max", 0.175),
            ("rear-tire/radius", 0.13),
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
            None => (0.0, T::constant(s), n, alpha),
        }
    }
}

impl VehicleModel for Kart {
    fn kind(&self) -> &'static str {
        "kart-6dof"
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
        &["delta", "rear-torque"]
    }

    fn is_direct_by_default(&self) -> bool {
        false
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

    fn steady_state_extra_states(&self) -> &'static [usize] {
        &[IZ, IPHI, IMU]
    }

    fn steady_state_rate_equations(&self) -> &'static [usize] {
        &[IDZ, IDPHI, IDMU]
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
        KartParams::read(&self.parameters, 0.0)?;
        Ok(())
    }

    fn evaluate<T: Scalar>(&self, q: &[T], qa: &[T], u_in: &[T], s: f64) -> Result<Evaluation<T>> {
        if q.len() != Self::NQ || !qa.is_empty() || u_in.len() != Self::NU {
            return Err(Error::internal("kart-6dof evaluation dimension mismatch"));
        }
        let p = KartParams::read(&self.parameters, s)?;

        let n = q[IN];
        let alpha = q[IALPHA];
        let u = q[IU];
        let v = q[IV];
        let omega = q[IOMEGA];
        let z = q[IZ];
        let phi = q[IPHI];
        let mu = q[IMU];
        let dz = q[IDZ];
        let dphi = q[IDPHI];
        let dmu = q[IDMU];
        let delta = u_in[0];
        let torque = u_in[1];

        let (kappa, x, y, psi) = self.kappa_and_pose(s, n, alpha);

        // Static corner loads carry the weight; the suspension modulates
        // them with the chassis pose (z up, phi roll, mu pitch)
        let wheelbase = p.a + p.b;
        let static_front = p.mass * GRAVITY * p.b / wheelbase / 2.0;
        let static_rear = p.mass * GRAVITY * p.a / wheelbase / 2.0;
        // Corner layout: (x offset, y offset, stiffness, damping, static)
        let corners = [
            (p.a, 0.5 * p.track_front, p.stiffness_front, p.damping_front, static_front),
            (p.a, -0.5 * p.track_front, p.stiffness_front, p.damping_front, static_front),
            (-p.b, 0.5 * p.track_rear, p.stiffness_rear, p.damping_rear, static_rear),
            (-p.b, -0.5 * p.track_rear, p.stiffness_rear, p.damping_rear, static_rear),
        ];
        let mut loads = [T::zero(); 4];
        for (i, (cx, cy, k, c, stat)) in corners.iter().enumerate() {
            let travel = z + phi * *cy - mu * *cx;
            let rate = dz + dphi * *cy - dmu * *cx;
            loads[i] = travel * (-k) + rate * (-c) + *stat;
        }

        // Aerodynamic drag only; karts produce no meaningful downforce
        let drag = u * u * (0.5 * AIR_DENSITY * p.drag_area);

        // Rear axle torque to force; the live axle splits it evenly
        let fx_rear_total = torque / self.rear_tire.radius;
        let fx_demand_rear = fx_rear_total * 0.5;
        let fx_demand_front = T::zero();

        let lambda_front = ((v + omega * p.a) / u).atan() - delta;
        let lambda_rear = ((v - omega * p.b) / u).atan();

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

        let (sin_psi, cos_psi) = (psi.sin(), psi.cos());
        for (i, (cx, cy, _, _, _)) in corners.iter().enumerate() {
            tires[i].x = x + cos_psi * *cx - sin_psi * *cy;
            tires[i].y = y + sin_psi * *cx + cos_psi * *cy;
        }

        let fx_total = fx_body.iter().copied().sum::<T>() - drag;
        let fy_total = fy_body.iter().copied().sum::<T>();
        let mz = (fy_body[0] + fy_body[1]) * p.a - (fy_body[2] + fy_body[3]) * p.b
            + (fx_body[1] - fx_body[0]) * (0.5 * p.track_front)
            + (fx_body[3] - fx_body[2]) * (0.5 * p.track_rear);

        let du_dt = fx_total / p.mass + v * omega;
        let dv_dt = fy_total / p.mass - u * omega;
        let domega_dt = mz / p.inertia_z;

        let ax_body = du_dt - v * omega;
        let ay_body = dv_dt + u * omega;

        // Chassis heave/roll/pitch: spring-damper reactions plus the
        // inertial moments from the planar accelerations; the torsional
        // frame stiffness resists roll on top of the corners
        let mut spring_force = T::zero();
        let mut spring_roll = T::zero();
        let mut spring_pitch = T::zero();
        for (i, (cx, cy, _, _, stat)) in corners.iter().enumerate() {
            let delta_load = loads[i] - *stat;
            spring_force += delta_load;
            spring_roll += delta_load * *cy;
            spring_pitch += delta_load * (-*cx);
        }
        let ddz = spring_force / p.mass;
        let ddphi =
            (spring_roll + ay_body * (p.mass * p.h) - phi * p.torsional_stiffness) / p.inertia_x;
        let ddmu =
            (spring_pitch - ax_body * (p.mass * p.h) - mu * p.torsional_stiffness) / p.inertia_y;

        let speed = (u * u + v * v).sqrt();
        let ax = (u * ax_body + v * ay_body) / speed;
        let ay = (u * ay_body - v * ax_body) / speed;

        // Positive n lies to the right of the direction of travel
        let sdot = (u * alpha.cos() - v * alpha.sin()) / (T::one() + n * kappa);
        let dtime_ds = T::one() / sdot;
        let dn_dt = -(u * alpha.sin() + v * alpha.cos());
        let dalpha_dt = omega - sdot * kappa;

        let dqdt = vec![
            T::one(),
            dn_dt,
            dalpha_dt,
            du_dt,
            dv_dt,
            domega_dt,
            dz,
            dphi,
            dmu,
            ddz,
            ddphi,
            ddmu,
        ];
        let dqds: Vec<T> = dqdt.iter().map(|d| *d * dtime_ds).collect();

        let understeer = delta - (omega / u) * wheelbase;

        Ok(Evaluation {
            dqds,
            residuals: Vec::new(),
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
            vec![
                0.0, -15.0, -0.8, 2.0, -5.0, -3.0, -0.05, -0.2, -0.2, -2.0, -10.0, -10.0,
            ],
            vec![
                f64::INFINITY,
                15.0,
                0.8,
                45.0,
                5.0,
                3.0,
                0.05,
                0.2,
                0.2,
                2.0,
                10.0,
                10.0,
            ],
        )
    }

    fn algebraic_state_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        (Vec::new(), Vec::new())
    }

    fn control_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let max_steering = self
            .parameters
            .get("steering/maximum-angle")
            .unwrap_or(0.45);
        let max_torque = self
            .parameters
            .get("rear-axle/maximum-torque")
            .unwrap_or(180.0);
        (vec![-max_steering, -max_torque], vec![max_steering, max_torque])
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
