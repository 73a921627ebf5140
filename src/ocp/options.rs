//! Laptime solver configuration
//!
//! Options arrive either programmatically or as an XML document:
//!
//! ```xml
//! <options>
//!   <transcription>direct</transcription>
//!   <steady_state_speed>50</steady_state_speed>
//!   <sigma_dissipations>1.0 0.1 0.1</sigma_dissipations>
//!   <control_variables>
//!     <delta mode="full_mesh"/>
//!     <throttle mode="hypermesh">0 200 400</throttle>
//!   </control_variables>
//!   <integral_constraints>
//!     <tire-dissipation lower="0" upper="2e6"/>
//!   </integral_constraints>
//!   <warm_start>false</warm_start>
//!   <save_warm_start>true</save_warm_start>
//!   <compute_sensitivity>false</compute_sensitivity>
//!   <output_variables_prefix>run/</output_variables_prefix>
//!   <print_level>0</print_level>
//! </options>
//! ```
//!
//! Unknown keys are ignored; mandatory shape violations are typed errors.

use crate::error::{Error, Result};
use crate::parser::xml::XmlNode;
use crate::vehicle::VehicleModel;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How one control index enters the decision variable set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlMode {
    /// Removed from the free set; the steady-state seed value is used
    DontOptimize,
    /// Reserved; rejected at transcription time
    Constant,
    /// Piecewise-constant over the given arclength breakpoints
    Hypermesh(Vec<f64>),
    /// One decision variable per mesh node
    FullMesh,
}

/// A named quantity integrated along arclength, with bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegralConstraint {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
}

/// Names of the integral quantities the transcription can evaluate.
pub const INTEGRAL_QUANTITIES: [&str; 2] = ["tire-dissipation", "aerodynamic-drag-work"];

/// Full laptime solver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaptimeOptions {
    /// Direct (controls free) or derivative (control rates free)
    /// transcription; `None` takes the model default
    pub is_direct: Option<bool>,
    /// Mesh size; `None` follows the track data nodes
    pub n_points: Option<usize>,
    /// Speed of the steady-state seed
    pub steady_state_speed: f64,
    /// Control regularization weights, one per control (short vectors are
    /// padded with zeros)
    pub sigma_dissipations: Vec<f64>,
    /// Per-control modes (short vectors are padded with `FullMesh`)
    pub control_modes: Vec<ControlMode>,
    /// Integral constraints over the lap
    pub integral_constraints: Vec<IntegralConstraint>,
    /// Reuse the cached primal-dual seed
    pub warm_start: bool,
    /// Capture the solution as the new warm-start seed
    pub save_warm_start: bool,
    /// Compute KKT parameter sensitivities
    pub compute_sensitivity: bool,
    /// Prefix for named outputs
    pub output_variables_prefix: String,
    /// Verbosity handed to the interior-point solver
    pub print_level: u8,
    /// Open-track initial condition `(q, qa, u)`; mandatory for open tracks
    pub initial_condition: Option<(Vec<f64>, Vec<f64>, Vec<f64>)>,
}

impl Default for LaptimeOptions {
    fn default() -> Self {
        Self {
            is_direct: None,
            n_points: None,
            steady_state_speed: 50.0,
            sigma_dissipations: Vec::new(),
            control_modes: Vec::new(),
            integral_constraints: Vec::new(),
            warm_start: false,
            save_warm_start: false,
            compute_sensitivity: false,
            output_variables_prefix: String::new(),
            print_level: 0,
            initial_condition: None,
        }
    }
}

impl LaptimeOptions {
    /// Parse the XML options document.
    pub fn from_xml_str(xml: &str) -> Result<Self> {
        let root = XmlNode::parse(xml)?;
        let mut options = Self::default();

        if let Some(node) = root.child("transcription") {
            options.is_direct = Some(match node.text.trim() {
                "direct" => true,
                "derivative" => false,
                other => {
                    return Err(Error::invalid_value(
                        "transcription",
                        other,
                        "expected 'direct' or 'derivative'",
                    ))
                }
            });
        }
        if let Some(node) = root.child("n_points") {
            options.n_points = Some(node.text_as()?);
        }
        // The upstream configuration used to misname this key; accept the
        // old spelling with a warning
        if let Some(node) = root.child("steady_state_speed") {
            options.steady_state_speed = node.text_as()?;
        } else if let Some(node) = root.child("initial_speed") {
            warn!("reading steady_state_speed from legacy key 'initial_speed'");
            options.steady_state_speed = node.text_as()?;
        }
        if let Some(node) = root.child("sigma_dissipations") {
            options.sigma_dissipations = node.text_as_floats()?;
        }
        if let Some(node) = root.child("control_variables") {
            for child in &node.children {
                let mode = match child.attr("mode").unwrap_or("full_mesh") {
                    "dont_optimize" => ControlMode::DontOptimize,
                    "constant" => ControlMode::Constant,
                    "full_mesh" => ControlMode::FullMesh,
                    "hypermesh" => ControlMode::Hypermesh(child.text_as_floats()?),
                    other => {
                        return Err(Error::invalid_value(
                            &child.name,
                            other,
                            "unknown control variable mode",
                        ))
                    }
                };
                options.control_modes.push(mode);
            }
        }
        if let Some(node) = root.child("integral_constraints") {
            for child in &node.children {
                if !INTEGRAL_QUANTITIES.contains(&child.name.as_str()) {
                    return Err(Error::property_not_found(
                        &child.name,
                        &INTEGRAL_QUANTITIES.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                    ));
                }
                let lower = child
                    .attr("lower")
                    .map(|v| v.parse::<f64>())
                    .transpose()
                    .map_err(|_| Error::invalid_value("lower", "", "not a number"))?
                    .unwrap_or(f64::NEG_INFINITY);
                let upper = child
                    .attr("upper")
                    .map(|v| v.parse::<f64>())
                    .transpose()
                    .map_err(|_| Error::invalid_value("upper", "", "not a number"))?
                    .unwrap_or(f64::INFINITY);
                options.integral_constraints.push(IntegralConstraint {
                    name: child.name.clone(),
                    lower,
                    upper,
                });
            }
        }
        if let Some(node) = root.child("warm_start") {
            options.warm_start = node.text_as()?;
        }
        if let Some(node) = root.child("save_warm_start") {
            options.save_warm_start = node.text_as()?;
        }
        if let Some(node) = root.child("compute_sensitivity") {
            options.compute_sensitivity = node.text_as()?;
        }
        if let Some(node) = root.child("output_variables_prefix") {
            options.output_variables_prefix = node.text.trim().to_string();
        }
        if let Some(node) = root.child("print_level") {
            options.print_level = node.text_as()?;
        }

        Ok(options)
    }

    /// Mode for a control index, defaulting to full mesh.
    pub fn control_mode(&self, index: usize) -> &ControlMode {
        self.control_modes.get(index).unwrap_or(&ControlMode::FullMesh)
    }

    /// Dissipation weight for a control index.
    pub fn sigma(&self, index: usize) -> f64 {
        self.sigma_dissipations.get(index).copied().unwrap_or(0.0)
    }

    /// Whether the transcription is direct for this model.
    pub fn resolve_is_direct<M: VehicleModel>(&self, model: &M) -> bool {
        self.is_direct.unwrap_or_else(|| model.is_direct_by_default())
    }
}
