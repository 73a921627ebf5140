//! Error types and error handling for the laptime optimization library

use thiserror::Error;

/// Main error type for the laptime optimization library
#[derive(Error, Debug)]
pub enum Error {
    // XML / I/O
    /// XML reading failures
    #[error("XML parsing error: {0}")]
    XmlParseError(#[from] quick_xml::Error),

    /// File I/O failures
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // Input validation
    /// Unknown vehicle type in a vehicle description
    #[error("Unknown vehicle type '{vehicle_type}'. Supported types: {supported:?}")]
    UnknownVehicleType {
        vehicle_type: String,
        supported: Vec<String>,
    },

    /// Track format not supported
    #[error("Unsupported track format '{format}'. Expected 'discrete'")]
    UnsupportedTrackFormat { format: String },

    /// A name is already present in the registry
    #[error("Name '{name}' already exists in the {registry} registry")]
    DuplicateName { name: String, registry: String },

    /// Missing mandatory option or document key
    #[error("Missing mandatory key '{key}' in {document}")]
    MissingKey { key: String, document: String },

    /// Invalid value for a field or option
    #[error("Invalid value for '{field}': {value}. {hint}")]
    InvalidValue {
        field: String,
        value: String,
        hint: String,
    },

    // Lookup misses
    /// Referenced name absent from the registry
    #[error("'{name}' not found in the {registry} registry")]
    NameNotFound {
        name: String,
        registry: String,
        available: Vec<String>,
    },

    /// Unknown output property name
    #[error("Unknown property '{property}'")]
    PropertyNotFound {
        property: String,
        available: Vec<String>,
    },

    /// Parameter path or alias absent from a vehicle's parameter set
    #[error("Parameter '{path}' not found")]
    ParameterNotFound { path: String, available: Vec<String> },

    // Numeric failures
    /// The NLP solver did not reach the required tolerances
    #[error("Optimization failed: {reason} (after {iterations} iterations)")]
    OptimizationFailure { reason: String, iterations: usize },

    /// A residual stayed above tolerance
    #[error("Residual above tolerance in {context}: |r| = {residual:.3e} > {tolerance:.3e}")]
    ResidualAboveTolerance {
        context: String,
        residual: f64,
        tolerance: f64,
    },

    // Model mismatches
    /// Property requested on a model that does not support it
    #[error("Model '{model}' does not support '{what}'")]
    ModelMismatch { model: String, what: String },

    // Internal invariant violations
    /// An invariant the implementation relies on was violated
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    // Input validation

    /// Create an unknown-vehicle-type error
    pub fn unknown_vehicle_type(vehicle_type: &str, supported: &[&str]) -> Self {
        Error::UnknownVehicleType {
            vehicle_type: vehicle_type.to_string(),
            supported: supported.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Create an unsupported-track-format error
    pub fn unsupported_track_format(format: &str) -> Self {
        Error::UnsupportedTrackFormat {
            format: format.to_string(),
        }
    }

    /// Create a duplicate-name error
    pub fn duplicate_name(name: &str, registry: &str) -> Self {
        Error::DuplicateName {
            name: name.to_string(),
            registry: registry.to_string(),
        }
    }

    /// Create a missing-key error
    pub fn missing_key(key: &str, document: &str) -> Self {
        Error::MissingKey {
            key: key.to_string(),
            document: document.to_string(),
        }
    }

    /// Create an invalid-value error
    pub fn invalid_value(field: &str, value: &str, hint: &str) -> Self {
        Error::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            hint: hint.to_string(),
        }
    }

    // Lookup misses

    /// Create a name-not-found error
    pub fn name_not_found(name: &str, registry: &str, available: &[String]) -> Self {
        Error::NameNotFound {
            name: name.to_string(),
            registry: registry.to_string(),
            available: available.to_vec(),
        }
    }

    /// Create a property-not-found error
    pub fn property_not_found(property: &str, available: &[String]) -> Self {
        Error::PropertyNotFound {
            property: property.to_string(),
            available: available.to_vec(),
        }
    }

    /// Create a parameter-not-found error
    pub fn parameter_not_found(path: &str, available: &[String]) -> Self {
        Error::ParameterNotFound {
            path: path.to_string(),
            available: available.to_vec(),
        }
    }

    // Numeric failures

    /// Create an optimization-failure error
    pub fn optimization_failure(reason: &str, iterations: usize) -> Self {
        Error::OptimizationFailure {
            reason: reason.to_string(),
            iterations,
        }
    }

    /// Create a residual-above-tolerance error
    pub fn residual_above_tolerance(context: &str, residual: f64, tolerance: f64) -> Self {
        Error::ResidualAboveTolerance {
            context: context.to_string(),
            residual,
            tolerance,
        }
    }

    // Model mismatches

    /// Create a model-mismatch error
    pub fn model_mismatch(model: &str, what: &str) -> Self {
        Error::ModelMismatch {
            model: model.to_string(),
            what: what.to_string(),
        }
    }

    // Internal

    /// Create an internal invariant-violation error
    pub fn internal(message: &str) -> Self {
        Error::Internal {
            message: message.to_string(),
        }
    }

    /// Add context to an error message
    pub fn with_context(mut self, context: &str) -> Self {
        match &mut self {
            Error::InvalidValue { ref mut hint, .. } => {
                *hint = format!("{}: {}", context, hint);
            }
            Error::OptimizationFailure { ref mut reason, .. } => {
                *reason = format!("{}: {}", context, reason);
            }
            Error::Internal { ref mut message } => {
                *message = format!("{}: {}", context, message);
            }
            Error::MissingKey {
                ref mut document, ..
            } => {
                *document = format!("{} ({})", document, context);
            }
            _ => {}
        }
        self
    }
}

/// Result type alias for the laptime optimization library
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_vehicle_type() {
        let err = Error::unknown_vehicle_type("bike-2dof", &["f1-3dof", "kart-6dof"]);
        match err {
            Error::UnknownVehicleType {
                vehicle_type,
                supported,
            } => {
                assert_eq!(vehicle_type, "bike-2dof");
                assert_eq!(supported, vec!["f1-3dof", "kart-6dof"]);
            }
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_unsupported_track_format() {
        let err = Error::unsupported_track_format("continuous");
        assert!(matches!(err, Error::UnsupportedTrackFormat { format } if format == "continuous"));
    }

    #[test]
    fn test_duplicate_name() {
        let err = Error::duplicate_name("car", "vehicle");
        let msg = format!("{}", err);
        assert!(msg.contains("car"));
        assert!(msg.contains("vehicle"));
    }

    #[test]
    fn test_name_not_found() {
        let err = Error::name_not_found("ring", "track", &["oval".to_string()]);
        match err {
            Error::NameNotFound {
                name, available, ..
            } => {
                assert_eq!(name, "ring");
                assert_eq!(available, vec!["oval"]);
            }
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_parameter_not_found() {
        let err = Error::parameter_not_found("chassis/com/x", &["chassis/mass".to_string()]);
        assert!(matches!(err, Error::ParameterNotFound { .. }));
    }

    #[test]
    fn test_optimization_failure() {
        let err = Error::optimization_failure("maximum iterations reached", 3000);
        match err {
            Error::OptimizationFailure { reason, iterations } => {
                assert!(reason.contains("maximum iterations"));
                assert_eq!(iterations, 3000);
            }
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_model_mismatch() {
        let err = Error::model_mismatch("kart-6dof", "brake-bias");
        let msg = format!("{}", err);
        assert!(msg.contains("kart-6dof"));
        assert!(msg.contains("brake-bias"));
    }

    #[test]
    fn test_with_context() {
        let err = Error::optimization_failure("line search stalled", 12)
            .with_context("track preprocessor");
        match err {
            Error::OptimizationFailure { reason, .. } => {
                assert!(reason.contains("track preprocessor"));
            }
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_missing_key() {
        let err = Error::missing_key("n_points", "track XML");
        let msg = format!("{}", err);
        assert!(msg.contains("n_points"));
    }
}
