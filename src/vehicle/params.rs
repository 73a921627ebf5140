//! Vehicle parameter sets
//!
//! Parameters are addressed by slash-separated paths (`"chassis/com/x"`)
//! and optionally by shorter aliases. Two kinds exist:
//! - **Constant**: one scalar injected into the model at build time
//! - **Piecewise**: a vector of values with `(s, index)` breakpoints; the
//!   effective value at arclength `s` is the entry selected by the
//!   breakpoint interval containing `s`
//!
//! The declared parameters (in declaration order) form the input set for
//! KKT sensitivities, so the set keeps insertion order.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Parameter {
    /// One scalar
    Constant(f64),
    /// Piecewise-constant over arclength: `breakpoints` holds
    /// `(s_start, index_into_values)`, sorted by `s_start`
    Piecewise {
        values: Vec<f64>,
        breakpoints: Vec<(f64, usize)>,
    },
}

impl Parameter {
    /// Effective value at arclength `s`.
    pub fn value_at(&self, s: f64) -> f64 {
        match self {
            Parameter::Constant(v) => *v,
            Parameter::Piecewise {
                values,
                breakpoints,
            } => {
                let mut index = breakpoints.first().map(|(_, i)| *i).unwrap_or(0);
                for (s_start, i) in breakpoints {
                    if s >= *s_start {
                        index = *i;
                    } else {
                        break;
                    }
                }
                values.get(index).copied().unwrap_or(0.0)
            }
        }
    }
}

/// A vehicle's parameter set: paths, aliases and declared gradient inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSet {
    parameters: IndexMap<String, Parameter>,
    /// alias -> path
    aliases: IndexMap<String, String>,
    /// Paths registered for sensitivity computation, in declaration order
    declared: Vec<String>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a constant parameter by path (used by the XML loader).
    pub fn insert(&mut self, path: &str, value: f64) {
        self.parameters
            .insert(path.to_string(), Parameter::Constant(value));
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// True when the set holds no parameters.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Resolve an alias or return the input unchanged.
    fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Paths currently present, for error payloads.
    fn available(&self) -> Vec<String> {
        self.parameters.keys().cloned().collect()
    }

    /// Constant value by path or alias.
    pub fn get(&self, name: &str) -> Result<f64> {
        self.get_at(name, 0.0)
    }

    /// Value by path or alias at arclength `s`.
    pub fn get_at(&self, name: &str, s: f64) -> Result<f64> {
        let path = self.resolve(name);
        self.parameters
            .get(path)
            .map(|p| p.value_at(s))
            .ok_or_else(|| Error::parameter_not_found(path, &self.available()))
    }

    /// The raw parameter by path or alias.
    pub fn parameter(&self, name: &str) -> Result<&Parameter> {
        let path = self.resolve(name);
        self.parameters
            .get(path)
            .ok_or_else(|| Error::parameter_not_found(path, &self.available()))
    }

    /// Override an existing parameter's value. Unknown names are an error:
    /// a silently ignored override hides typos.
    pub fn set(&mut self, name: &str, value: f64) -> Result<()> {
        let path = self.resolve(name).to_string();
        let available = self.available();
        match self.parameters.get_mut(&path) {
            Some(Parameter::Constant(v)) => {
                *v = value;
                Ok(())
            }
            Some(Parameter::Piecewise { values, .. }) => {
                for v in values.iter_mut() {
                    *v = value;
                }
                Ok(())
            }
            None => Err(Error::parameter_not_found(&path, &available)),
        }
    }

    /// Register a constant parameter addressable for gradients. An existing
    /// constant path is promoted into the gradient set (and overwritten with
    /// `value`); redeclaring a path is an error.
    pub fn declare_new_constant_parameter(
        &mut self,
        path: &str,
        alias: &str,
        value: f64,
    ) -> Result<()> {
        if self.declared.iter().any(|p| p == path) {
            return Err(Error::duplicate_name(path, "parameter"));
        }
        if let Some(Parameter::Piecewise { .. }) = self.parameters.get(path) {
            return Err(Error::invalid_value(
                path,
                "piecewise",
                "an existing piecewise parameter cannot be redeclared as constant",
            ));
        }
        self.parameters
            .insert(path.to_string(), Parameter::Constant(value));
        if !alias.is_empty() {
            self.aliases.insert(alias.to_string(), path.to_string());
        }
        self.declared.push(path.to_string());
        Ok(())
    }

    /// Register a piecewise-over-arclength parameter. `aliases` holds one
    /// alias per value, joined by `;`.
    pub fn declare_new_variable_parameter(
        &mut self,
        path: &str,
        aliases: &str,
        values: Vec<f64>,
        mesh: Vec<(f64, usize)>,
    ) -> Result<()> {
        if self.parameters.contains_key(path) {
            return Err(Error::duplicate_name(path, "parameter"));
        }
        let alias_list: Vec<&str> = aliases
            .split(';')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect();
        if !alias_list.is_empty() && alias_list.len() != values.len() {
            return Err(Error::invalid_value(
                "aliases",
                aliases,
                "one alias per value is required when aliases are given",
            ));
        }
        for (s, index) in &mesh {
            if *index >= values.len() {
                return Err(Error::invalid_value(
                    "mesh",
                    &format!("({}, {})", s, index),
                    "breakpoint index exceeds the value vector",
                ));
            }
        }
        let mut breakpoints = mesh;
        breakpoints.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        for alias in &alias_list {
            self.aliases.insert(alias.to_string(), path.to_string());
        }
        self.parameters.insert(
            path.to_string(),
            Parameter::Piecewise {
                values,
                breakpoints,
            },
        );
        self.declared.push(path.to_string());
        Ok(())
    }

    /// Declared sensitivity inputs, in declaration order. Piecewise
    /// parameters contribute one entry per value.
    pub fn declared_inputs(&self) -> Vec<(String, usize)> {
        let mut inputs = Vec::new();
        for path in &self.declared {
            match &self.parameters[path] {
                Parameter::Constant(_) => inputs.push((path.clone(), 0)),
                Parameter::Piecewise { values, .. } => {
                    for k in 0..values.len() {
                        inputs.push((path.clone(), k));
                    }
                }
            }
        }
        inputs
    }

    /// Number of declared scalar inputs.
    pub fn num_declared_inputs(&self) -> usize {
        self.declared_inputs().len()
    }

    /// Perturb one declared input (used by the sensitivity machinery).
    pub fn nudge_declared_input(&mut self, path: &str, component: usize, delta: f64) -> Result<()> {
        let available = self.available();
        match self.parameters.get_mut(path) {
            Some(Parameter::Constant(v)) => {
                *v += delta;
                Ok(())
            }
            Some(Parameter::Piecewise { values, .. }) => {
                values
                    .get_mut(component)
                    .map(|v| *v += delta)
                    .ok_or_else(|| Error::internal("declared input component out of range"))
            }
            None => Err(Error::parameter_not_found(path, &available)),
        }
    }

    /// Alias for a declared input, used to label sensitivity outputs.
    pub fn alias_of(&self, path: &str, component: usize) -> String {
        let matching: Vec<&String> = self
            .aliases
            .iter()
            .filter(|(_, p)| p.as_str() == path)
            .map(|(a, _)| a)
            .collect();
        match &self.parameters.get(path) {
            Some(Parameter::Piecewise { .. }) => matching
                .get(component)
                .map(|a| a.to_string())
                .unwrap_or_else(|| format!("{}[{}]", path, component)),
            _ => matching
                .first()
                .map(|a| a.to_string())
                .unwrap_or_else(|| path.to_string()),
        }
    }
}
