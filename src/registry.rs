//! The owning context of named artifacts
//!
//! Vehicles, tracks, scalars and vectors live in one explicit [`Context`]
//! passed into each operation instead of process-wide tables; callers that
//! need concurrent access wrap the context themselves. Warm-start caches
//! are per-model-kind fields: the first save initializes a cache, each
//! later save overwrites it.

use crate::error::{Error, Result};
use crate::nlp::WarmStartData;
use crate::ocp::{solve_laptime, LaptimeOptions, OcpTrajectory};
use crate::parser::xml::parse_vehicle_str;
use crate::track::TrackSurface;
use crate::vehicle::{Evaluation, F1Car, Kart, ParameterSet, VehicleModel};
use indexmap::IndexMap;
use std::sync::Arc;

/// A vehicle of either supported kind.
#[derive(Debug, Clone)]
pub enum Vehicle {
    F1(F1Car),
    Kart(Kart),
}

impl Vehicle {
    /// Build from a vehicle XML document.
    pub fn from_xml_str(xml: &str) -> Result<Self> {
        let (kind, parameters) = parse_vehicle_str(xml)?;
        match kind.as_str() {
            "f1-3dof" => Ok(Vehicle::F1(F1Car::new(parameters)?)),
            "kart-6dof" => Ok(Vehicle::Kart(Kart::new(parameters)?)),
            other => Err(Error::unknown_vehicle_type(
                other,
                &crate::parser::xml::VEHICLE_TYPES,
            )),
        }
    }

    /// The model kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Vehicle::F1(car) => car.kind(),
            Vehicle::Kart(kart) => kart.kind(),
        }
    }

    /// Bind a track; valid to call repeatedly.
    pub fn change_track(&mut self, track: Arc<TrackSurface>) {
        match self {
            Vehicle::F1(car) => car.change_track(track),
            Vehicle::Kart(kart) => kart.change_track(track),
        }
    }

    /// The parameter set.
    pub fn parameters(&self) -> &ParameterSet {
        match self {
            Vehicle::F1(car) => car.parameters(),
            Vehicle::Kart(kart) => kart.parameters(),
        }
    }

    /// Override a parameter by path or alias. Unknown names error for both
    /// kinds; a silently ignored override hides typos.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        match self {
            Vehicle::F1(car) => {
                car.parameters_mut().set(name, value)?;
                car.refresh_parameters()
            }
            Vehicle::Kart(kart) => {
                kart.parameters_mut().set(name, value)?;
                kart.refresh_parameters()
            }
        }
    }

    /// Register a constant parameter for sensitivity computation.
    pub fn declare_new_constant_parameter(
        &mut self,
        path: &str,
        alias: &str,
        value: f64,
    ) -> Result<()> {
        match self {
            Vehicle::F1(car) => {
                car.parameters_mut()
                    .declare_new_constant_parameter(path, alias, value)?;
                car.refresh_parameters()
            }
            Vehicle::Kart(kart) => {
                kart.parameters_mut()
                    .declare_new_constant_parameter(path, alias, value)?;
                kart.refresh_parameters()
            }
        }
    }

    /// Register a piecewise-over-arclength parameter.
    pub fn declare_new_variable_parameter(
        &mut self,
        path: &str,
        aliases: &str,
        values: Vec<f64>,
        mesh: Vec<(f64, usize)>,
    ) -> Result<()> {
        match self {
            Vehicle::F1(car) => {
                car.parameters_mut()
                    .declare_new_variable_parameter(path, aliases, values, mesh)?;
                car.refresh_parameters()
            }
            Vehicle::Kart(kart) => {
                kart.parameters_mut()
                    .declare_new_variable_parameter(path, aliases, values, mesh)?;
                kart.refresh_parameters()
            }
        }
    }

    /// Evaluate the dynamics once (plain scalars).
    pub fn evaluate(
        &self,
        q: &[f64],
        qa: &[f64],
        u: &[f64],
        s: f64,
    ) -> Result<Evaluation<f64>> {
        match self {
            Vehicle::F1(car) => car.evaluate(q, qa, u, s),
            Vehicle::Kart(kart) => kart.evaluate(q, qa, u, s),
        }
    }

    /// Run the laptime solve.
    pub fn solve_laptime(
        &self,
        options: LaptimeOptions,
        warm_start: Option<&WarmStartData>,
        range: Option<(f64, f64)>,
    ) -> Result<OcpTrajectory> {
        match self {
            Vehicle::F1(car) => solve_laptime(car, options, warm_start, range),
            Vehicle::Kart(kart) => solve_laptime(kart, options, warm_start, range),
        }
    }
}

/// The owning context: registries plus warm-start caches.
#[derive(Debug, Clone, Default)]
pub struct Context {
    vehicles: IndexMap<String, Vehicle>,
    tracks: IndexMap<String, Arc<TrackSurface>>,
    scalars: IndexMap<String, f64>,
    vectors: IndexMap<String, Vec<f64>>,
    warm_start_f1: Option<WarmStartData>,
    warm_start_kart: Option<WarmStartData>,
}

macro_rules! registry_ops {
    ($get:ident, $get_mut:ident, $add:ident, $delete:ident, $field:ident, $value:ty, $label:expr) => {
        pub fn $add(&mut self, name: &str, value: $value) -> Result<()> {
            if self.$field.contains_key(name) {
                return Err(Error::duplicate_name(name, $label));
            }
            self.$field.insert(name.to_string(), value);
            Ok(())
        }

        pub fn $get(&self, name: &str) -> Result<&$value> {
            self.$field.get(name).ok_or_else(|| {
                Error::name_not_found(name, $label, &Self::keys(&self.$field))
            })
        }

        pub fn $get_mut(&mut self, name: &str) -> Result<&mut $value> {
            let available = Self::keys(&self.$field);
            self.$field
                .get_mut(name)
                .ok_or_else(|| Error::name_not_found(name, $label, &available))
        }

        pub fn $delete(&mut self, name: &str) -> Result<()> {
            self.$field.shift_remove(name).map(|_| ()).ok_or_else(|| {
                Error::name_not_found(name, $label, &Self::keys(&self.$field))
            })
        }
    };
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    fn keys<V>(map: &IndexMap<String, V>) -> Vec<String> {
        map.keys().cloned().collect()
    }

    registry_ops!(vehicle, vehicle_mut, add_vehicle, delete_vehicle, vehicles, Vehicle, "vehicle");
    registry_ops!(track, track_mut, add_track, delete_track, tracks, Arc<TrackSurface>, "track");
    registry_ops!(scalar, scalar_mut, add_scalar, delete_scalar, scalars, f64, "scalar");
    registry_ops!(vector, vector_mut, add_vector, delete_vector, vectors, Vec<f64>, "vector");

    /// Copy a vehicle under a new name.
    pub fn copy_vehicle(&mut self, from: &str, to: &str) -> Result<()> {
        let vehicle = self.vehicle(from)?.clone();
        self.add_vehicle(to, vehicle)
    }

    /// Rename a vehicle, keeping its contents.
    pub fn rename_vehicle(&mut self, from: &str, to: &str) -> Result<()> {
        if self.vehicles.contains_key(to) {
            return Err(Error::duplicate_name(to, "vehicle"));
        }
        let vehicle = self
            .vehicles
            .shift_remove(from)
            .ok_or_else(|| Error::name_not_found(from, "vehicle", &Self::keys(&self.vehicles)))?;
        self.vehicles.insert(to.to_string(), vehicle);
        Ok(())
    }

    /// Names registered per kind, mainly for diagnostics.
    pub fn vehicle_names(&self) -> Vec<String> {
        Self::keys(&self.vehicles)
    }

    pub fn track_names(&self) -> Vec<String> {
        Self::keys(&self.tracks)
    }

    /// Bind a registered track to a registered vehicle.
    pub fn bind_vehicle_to_track(&mut self, vehicle: &str, track: &str) -> Result<()> {
        let surface = self.track(track)?.clone();
        self.vehicle_mut(vehicle)?.change_track(surface);
        Ok(())
    }

    /// Assemble an open-track initial condition `(q, qa, u)` from three
    /// registered vectors.
    pub fn initial_condition_from_tables(
        &self,
        q_name: &str,
        qa_name: &str,
        u_name: &str,
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)> {
        Ok((
            self.vector(q_name)?.clone(),
            self.vector(qa_name)?.clone(),
            self.vector(u_name)?.clone(),
        ))
    }

    /// The cached warm start for a model kind.
    pub fn warm_start(&self, kind: &str) -> Option<&WarmStartData> {
        match kind {
            "f1-3dof" => self.warm_start_f1.as_ref(),
            "kart-6dof" => self.warm_start_kart.as_ref(),
            _ => None,
        }
    }

    /// Cache (or overwrite) the warm start for a model kind.
    pub fn save_warm_start(&mut self, kind: &str, data: WarmStartData) -> Result<()> {
        match kind {
            "f1-3dof" => {
                self.warm_start_f1 = Some(data);
                Ok(())
            }
            "kart-6dof" => {
                self.warm_start_kart = Some(data);
                Ok(())
            }
            other => Err(Error::unknown_vehicle_type(
                other,
                &crate::parser::xml::VEHICLE_TYPES,
            )),
        }
    }

    /// Solve the laptime problem for a registered vehicle, honoring the
    /// context's warm-start cache and the options' cache switches.
    pub fn solve_laptime(
        &mut self,
        vehicle_name: &str,
        options: LaptimeOptions,
        range: Option<(f64, f64)>,
    ) -> Result<OcpTrajectory> {
        let save = options.save_warm_start;
        let (kind, trajectory) = {
            let vehicle = self.vehicle(vehicle_name)?;
            let warm = self.warm_start(vehicle.kind());
            (vehicle.kind(), vehicle.solve_laptime(options, warm, range)?)
        };
        if save {
            if let Some(data) = &trajectory.warm_start {
                self.save_warm_start(kind, data.clone())?;
            }
        }
        Ok(trajectory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn context_with_vehicle() -> Context {
        let mut context = Context::new();
        let car = F1Car::new(F1Car::reference_parameters()).unwrap();
        context.add_vehicle("car", Vehicle::F1(car)).unwrap();
        context
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut context = context_with_vehicle();
        let car = F1Car::new(F1Car::reference_parameters()).unwrap();
        assert!(matches!(
            context.add_vehicle("car", Vehicle::F1(car)),
            Err(Error::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_lookup_miss_lists_available() {
        let context = context_with_vehicle();
        match context.vehicle("missing") {
            Err(Error::NameNotFound { available, .. }) => {
                assert_eq!(available, vec!["car"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_copy_then_move_then_delete_leaves_empty() {
        let mut context = context_with_vehicle();
        context.copy_vehicle("car", "car2").unwrap();
        assert_eq!(context.vehicle_names().len(), 2);

        context.rename_vehicle("car2", "car3").unwrap();
        assert!(context.vehicle("car2").is_err());
        assert!(context.vehicle("car3").is_ok());

        context.delete_vehicle("car3").unwrap();
        context.delete_vehicle("car").unwrap();
        assert!(context.vehicle_names().is_empty());
    }

    #[test]
    fn test_rename_to_existing_rejected() {
        let mut context = context_with_vehicle();
        context.copy_vehicle("car", "car2").unwrap();
        assert!(context.rename_vehicle("car2", "car").is_err());
    }

    #[test]
    fn test_scalar_and_vector_registries() {
        let mut context = Context::new();
        context.add_scalar("speed", 42.0).unwrap();
        context.add_vector("mesh", vec![0.0, 1.0]).unwrap();
        assert_relative_eq!(*context.scalar("speed").unwrap(), 42.0);
        assert_eq!(context.vector("mesh").unwrap().len(), 2);
        *context.scalar_mut("speed").unwrap() = 43.0;
        assert_relative_eq!(*context.scalar("speed").unwrap(), 43.0);
        context.delete_scalar("speed").unwrap();
        assert!(context.scalar("speed").is_err());
    }

    #[test]
    fn test_set_parameter_on_kart_errors_for_unknown_path() {
        let mut context = Context::new();
        let kart = Kart::new(Kart::reference_parameters()).unwrap();
        context.add_vehicle("kart", Vehicle::Kart(kart)).unwrap();
        let vehicle = context.vehicle_mut("kart").unwrap();
        assert!(vehicle.set_parameter("chassis/mass", 165.0).is_ok());
        assert!(vehicle.set_parameter("chassis/does-not-exist", 1.0).is_err());
    }

    #[test]
    fn test_warm_start_cache_overwrites() {
        let mut context = Context::new();
        assert!(context.warm_start("f1-3dof").is_none());

        let first = WarmStartData {
            x: vec![1.0],
            lambda: vec![],
            z_lower: vec![0.0],
            z_upper: vec![0.0],
        };
        context.save_warm_start("f1-3dof", first).unwrap();
        assert_relative_eq!(context.warm_start("f1-3dof").unwrap().x[0], 1.0);

        let second = WarmStartData {
            x: vec![2.0],
            lambda: vec![],
            z_lower: vec![0.0],
            z_upper: vec![0.0],
        };
        context.save_warm_start("f1-3dof", second).unwrap();
        assert_relative_eq!(context.warm_start("f1-3dof").unwrap().x[0], 2.0);
        // Kinds do not share caches
        assert!(context.warm_start("kart-6dof").is_none());
    }

    #[test]
    fn test_initial_condition_from_tables() {
        let mut context = Context::new();
        context.add_vector("q0", vec![0.0; 6]).unwrap();
        context.add_vector("qa0", vec![2500.0; 4]).unwrap();
        context.add_vector("u0", vec![0.0, 0.2, 0.5]).unwrap();
        let (q, qa, u) = context
            .initial_condition_from_tables("q0", "qa0", "u0")
            .unwrap();
        assert_eq!(q.len(), 6);
        assert_eq!(qa.len(), 4);
        assert_eq!(u.len(), 3);
        assert!(context
            .initial_condition_from_tables("missing", "qa0", "u0")
            .is_err());
    }

    #[test]
    fn test_vehicle_from_xml() {
        let xml = r#"<vehicle type="f1-3dof"><chassis><mass>660</mass></chassis></vehicle>"#;
        // Incomplete parameter sets fail at model construction
        assert!(Vehicle::from_xml_str(xml).is_err());
    }
}
