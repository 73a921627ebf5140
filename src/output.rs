//! Named outputs and the property lookup table
//!
//! Solved trajectories are exposed through named scalar and vector tables
//! under a configurable prefix. Property names map to typed accessors
//! through one table instead of string-comparison chains; each model
//! supports the subset its states and controls cover, and asking for the
//! rest is a model-mismatch error (`brake-bias` on a kart, `Fz_fl` on a
//! kart). Sensitivities land under `derivatives/<variable>/<alias>`.

use crate::error::{Error, Result};
use crate::ocp::OcpTrajectory;
use crate::vehicle::{VehicleModel, IALPHA, IN, IOMEGA, ITIME, IU, IV, TIRE_NAMES};
use indexmap::IndexMap;

/// Value of one extracted property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

/// Named output storage.
#[derive(Debug, Clone, Default)]
pub struct OutputTables {
    pub scalars: IndexMap<String, f64>,
    pub vectors: IndexMap<String, Vec<f64>>,
}

impl OutputTables {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: String, value: PropertyValue) {
        match value {
            PropertyValue::Scalar(v) => {
                self.scalars.insert(name, v);
            }
            PropertyValue::Vector(v) => {
                self.vectors.insert(name, v);
            }
        }
    }
}

/// How a property is pulled out of a trajectory.
enum Accessor {
    State(usize),
    ArcLength,
    PoseX,
    PoseY,
    PosePsi,
    Control(&'static str),
    Derived(DerivedKind),
    Parameter(&'static str),
}

enum DerivedKind {
    Ax,
    Ay,
    Understeer,
}

/// Base property table: name, accessor. Tire-scoped names are generated.
const PROPERTIES: [(&str, Accessor); 18] = [
    ("x", Accessor::PoseX),
    ("y", Accessor::PoseY),
    ("s", Accessor::ArcLength),
    ("n", Accessor::State(IN)),
    ("alpha", Accessor::State(IALPHA)),
    ("u", Accessor::State(IU)),
    ("v", Accessor::State(IV)),
    ("time", Accessor::State(ITIME)),
    ("delta", Accessor::Control("delta")),
    ("psi", Accessor::PosePsi),
    ("omega", Accessor::State(IOMEGA)),
    ("throttle", Accessor::Control("throttle")),
    ("brake-bias", Accessor::Control("brake-bias")),
    ("rear-torque", Accessor::Control("rear-torque")),
    ("ax", Accessor::Derived(DerivedKind::Ax)),
    ("ay", Accessor::Derived(DerivedKind::Ay)),
    (
        "chassis.understeer_oversteer_indicator",
        Accessor::Derived(DerivedKind::Understeer),
    ),
    (
        "chassis.aerodynamics.cd",
        Accessor::Parameter("aerodynamics/drag-area"),
    ),
];

const TIRE_FIELDS: [&str; 7] = ["x", "y", "kappa", "lambda", "Fx", "Fy", "dissipation"];
const LOAD_NAMES: [&str; 4] = ["Fz_fl", "Fz_fr", "Fz_rl", "Fz_rr"];

/// Every property name the table can resolve, for error payloads.
pub fn all_property_names() -> Vec<String> {
    let mut names: Vec<String> = PROPERTIES.iter().map(|(n, _)| n.to_string()).collect();
    names.push("laptime".to_string());
    names.extend(LOAD_NAMES.iter().map(|n| n.to_string()));
    for tire in TIRE_NAMES {
        for field in TIRE_FIELDS {
            names.push(format!("{}.{}", tire, field));
        }
    }
    names
}

fn control_index<M: VehicleModel>(model: &M, name: &str) -> Result<usize> {
    model
        .control_names()
        .iter()
        .position(|n| *n == name)
        .ok_or_else(|| Error::model_mismatch(model.kind(), name))
}

fn per_node_evaluations<M: VehicleModel>(
    model: &M,
    trajectory: &OcpTrajectory,
) -> Result<Vec<crate::vehicle::Evaluation<f64>>> {
    (0..trajectory.len())
        .map(|i| {
            model.evaluate(
                &trajectory.q[i],
                &trajectory.qa[i],
                &trajectory.u[i],
                trajectory.s[i],
            )
        })
        .collect()
}

/// Extract one property from a solved trajectory.
pub fn extract_property<M: VehicleModel>(
    model: &M,
    trajectory: &OcpTrajectory,
    name: &str,
) -> Result<PropertyValue> {
    // Tire-scoped names first: `<axle>.<tire>.<field>`
    if let Some(tire_index) = TIRE_NAMES.iter().position(|t| name.starts_with(t)) {
        let field = name
            .strip_prefix(TIRE_NAMES[tire_index])
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or("");
        if TIRE_FIELDS.contains(&field) {
            let evaluations = per_node_evaluations(model, trajectory)?;
            let values = evaluations
                .iter()
                .map(|e| {
                    let tire = &e.tires[tire_index];
                    match field {
                        "x" => tire.x,
                        "y" => tire.y,
                        "kappa" => tire.kappa,
                        "lambda" => tire.lambda,
                        "Fx" => tire.fx,
                        "Fy" => tire.fy,
                        _ => tire.dissipation,
                    }
                })
                .collect();
            return Ok(PropertyValue::Vector(values));
        }
        return Err(Error::property_not_found(name, &all_property_names()));
    }

    if let Some(load) = LOAD_NAMES.iter().position(|n| *n == name) {
        if model.num_algebraic() <= load {
            return Err(Error::model_mismatch(model.kind(), name));
        }
        return Ok(PropertyValue::Vector(
            trajectory.qa.iter().map(|qa| qa[load]).collect(),
        ));
    }

    if name == "laptime" {
        return Ok(PropertyValue::Scalar(trajectory.laptime));
    }

    let accessor = PROPERTIES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, a)| a)
        .ok_or_else(|| Error::property_not_found(name, &all_property_names()))?;

    let value = match accessor {
        Accessor::State(j) => {
            PropertyValue::Vector(trajectory.q.iter().map(|q| q[*j]).collect())
        }
        Accessor::ArcLength => PropertyValue::Vector(trajectory.s.clone()),
        Accessor::PoseX => PropertyValue::Vector(trajectory.x.clone()),
        Accessor::PoseY => PropertyValue::Vector(trajectory.y.clone()),
        Accessor::PosePsi => PropertyValue::Vector(trajectory.psi.clone()),
        Accessor::Control(control_name) => {
            let index = control_index(model, control_name)?;
            PropertyValue::Vector(trajectory.u.iter().map(|u| u[index]).collect())
        }
        Accessor::Derived(kind) => {
            let evaluations = per_node_evaluations(model, trajectory)?;
            PropertyValue::Vector(
                evaluations
                    .iter()
                    .map(|e| match kind {
                        DerivedKind::Ax => e.ax,
                        DerivedKind::Ay => e.ay,
                        DerivedKind::Understeer => e.understeer,
                    })
                    .collect(),
            )
        }
        Accessor::Parameter(path) => PropertyValue::Vector(
            trajectory
                .s
                .iter()
                .map(|&s| model.parameters().get_at(path, s))
                .collect::<Result<Vec<f64>>>()?,
        ),
    };
    Ok(value)
}

/// Write the full recognized output set for a trajectory under a prefix.
///
/// Properties the model does not support are skipped; sensitivities are
/// written when the trajectory carries them.
pub fn write_outputs<M: VehicleModel>(
    model: &M,
    trajectory: &OcpTrajectory,
    prefix: &str,
    tables: &mut OutputTables,
) -> Result<()> {
    for (name, _) in PROPERTIES.iter() {
        match extract_property(model, trajectory, name) {
            Ok(value) => tables.insert(format!("{}{}", prefix, name), value),
            Err(Error::ModelMismatch { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    for name in LOAD_NAMES {
        match extract_property(model, trajectory, name) {
            Ok(value) => tables.insert(format!("{}{}", prefix, name), value),
            Err(Error::ModelMismatch { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    for tire in TIRE_NAMES {
        for field in TIRE_FIELDS {
            let name = format!("{}.{}", tire, field);
            let value = extract_property(model, trajectory, &name)?;
            tables.insert(format!("{}{}", prefix, name), value);
        }
    }
    tables.insert(
        format!("{}laptime", prefix),
        PropertyValue::Scalar(trajectory.laptime),
    );
    for (name, value) in &trajectory.integral_values {
        tables.insert(format!("{}{}", prefix, name), PropertyValue::Scalar(*value));
    }

    if let Some(sensitivities) = &trajectory.sensitivities {
        let state_names = ["time", "n", "alpha", "u", "v", "omega"];
        for (p, alias) in sensitivities.parameter_aliases.iter().enumerate() {
            tables.insert(
                format!("{}derivatives/laptime/{}", prefix, alias),
                PropertyValue::Scalar(sensitivities.dlaptime[p]),
            );
            for (j, state) in state_names.iter().enumerate() {
                let values: Vec<f64> = sensitivities.dq[p]
                    .iter()
                    .map(|node| node[j])
                    .collect();
                tables.insert(
                    format!("{}derivatives/{}/{}", prefix, state, alias),
                    PropertyValue::Vector(values),
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::{F1Car, Kart};
    use approx::assert_relative_eq;

    fn tiny_trajectory(nq: usize, na: usize, nu: usize) -> OcpTrajectory {
        let mut q0 = vec![0.0; nq];
        let mut q1 = vec![0.0; nq];
        q0[IU] = 30.0;
        q1[IU] = 31.0;
        q1[ITIME] = 0.5;
        OcpTrajectory {
            s: vec![0.0, 15.0],
            q: vec![q0, q1],
            qa: vec![vec![2500.0; na], vec![2600.0; na]],
            u: vec![vec![0.0; nu], vec![0.01; nu]],
            x: vec![0.0, 15.0],
            y: vec![0.0, 0.0],
            psi: vec![0.0, 0.0],
            laptime: 1.0,
            integral_values: vec![("tire-dissipation".to_string(), 123.0)],
            warm_start: None,
            sensitivities: None,
        }
    }

    #[test]
    fn test_state_properties() {
        let car = F1Car::new(F1Car::reference_parameters()).unwrap();
        let trajectory = tiny_trajectory(6, 4, 3);
        match extract_property(&car, &trajectory, "u").unwrap() {
            PropertyValue::Vector(v) => {
                assert_relative_eq!(v[0], 30.0);
                assert_relative_eq!(v[1], 31.0);
            }
            _ => panic!("expected a vector"),
        }
        match extract_property(&car, &trajectory, "time").unwrap() {
            PropertyValue::Vector(v) => assert_relative_eq!(v[1], 0.5),
            _ => panic!("expected a vector"),
        }
    }

    #[test]
    fn test_loads_on_f1() {
        let car = F1Car::new(F1Car::reference_parameters()).unwrap();
        let trajectory = tiny_trajectory(6, 4, 3);
        match extract_property(&car, &trajectory, "Fz_rl").unwrap() {
            PropertyValue::Vector(v) => assert_relative_eq!(v[1], 2600.0),
            _ => panic!("expected a vector"),
        }
    }

    #[test]
    fn test_model_mismatch_on_kart() {
        let kart = Kart::new(Kart::reference_parameters()).unwrap();
        let trajectory = tiny_trajectory(12, 0, 2);
        assert!(matches!(
            extract_property(&kart, &trajectory, "Fz_fl"),
            Err(Error::ModelMismatch { .. })
        ));
        assert!(matches!(
            extract_property(&kart, &trajectory, "brake-bias"),
            Err(Error::ModelMismatch { .. })
        ));
        assert!(matches!(
            extract_property(&kart, &trajectory, "throttle"),
            Err(Error::ModelMismatch { .. })
        ));
        // And the kart-specific control resolves
        assert!(extract_property(&kart, &trajectory, "rear-torque").is_ok());
    }

    #[test]
    fn test_unknown_property() {
        let car = F1Car::new(F1Car::reference_parameters()).unwrap();
        let trajectory = tiny_trajectory(6, 4, 3);
        match extract_property(&car, &trajectory, "warp-drive") {
            Err(Error::PropertyNotFound { available, .. }) => {
                assert!(available.contains(&"ax".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tire_scoped_properties() {
        let car = F1Car::new(F1Car::reference_parameters()).unwrap();
        let trajectory = tiny_trajectory(6, 4, 3);
        match extract_property(&car, &trajectory, "front_axle.left_tire.Fy").unwrap() {
            PropertyValue::Vector(v) => assert_eq!(v.len(), 2),
            _ => panic!("expected a vector"),
        }
        assert!(extract_property(&car, &trajectory, "front_axle.left_tire.grip").is_err());
    }

    #[test]
    fn test_write_outputs_with_prefix() {
        let car = F1Car::new(F1Car::reference_parameters()).unwrap();
        let trajectory = tiny_trajectory(6, 4, 3);
        let mut tables = OutputTables::new();
        write_outputs(&car, &trajectory, "run/", &mut tables).unwrap();

        assert!(tables.vectors.contains_key("run/u"));
        assert!(tables.vectors.contains_key("run/Fz_fl"));
        assert!(tables.vectors.contains_key("run/rear_axle.right_tire.kappa"));
        assert_relative_eq!(tables.scalars["run/laptime"], 1.0);
        assert_relative_eq!(tables.scalars["run/tire-dissipation"], 123.0);
        // The kart-only control is absent for the F1
        assert!(!tables.vectors.contains_key("run/rear-torque"));
    }

    #[test]
    fn test_sensitivity_outputs() {
        let car = F1Car::new(F1Car::reference_parameters()).unwrap();
        let mut trajectory = tiny_trajectory(6, 4, 3);
        trajectory.sensitivities = Some(crate::ocp::Sensitivities {
            parameter_aliases: vec!["cd".to_string()],
            dlaptime: vec![0.25],
            dq: vec![vec![vec![0.0; 6], vec![0.1; 6]]],
        });
        let mut tables = OutputTables::new();
        write_outputs(&car, &trajectory, "", &mut tables).unwrap();
        assert_relative_eq!(tables.scalars["derivatives/laptime/cd"], 0.25);
        assert_relative_eq!(tables.vectors["derivatives/u/cd"][1], 0.1);
    }
}
