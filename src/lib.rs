//! laptime-rs: minimum-laptime trajectory optimization in Rust
//!
//! This library computes time-optimal trajectories for race vehicles around
//! measured tracks:
//!
//! - **Track preprocessing** - measured geodetic boundaries become a smooth
//!   arclength-parameterized centerline with curvature and lateral widths
//! - **Vehicle dynamics** - a 3-DOF single-track F1 model and a 6-DOF kart
//!   model, written once and evaluated with plain or AD scalars
//! - **Optimal control** - trapezoidal collocation along arclength solved
//!   by a primal-dual interior-point method, with warm starts and KKT
//!   parameter sensitivities
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use laptime_rs::{Context, LaptimeOptions, Result, TrackSurface, Vehicle};
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let mut context = Context::new();
//!
//!     let vehicle = Vehicle::from_xml_str(&std::fs::read_to_string("car.xml")?)?;
//!     context.add_vehicle("car", vehicle)?;
//!
//!     let track = laptime_rs::parse_track_str(&std::fs::read_to_string("track.xml")?)?;
//!     context.add_track("track", Arc::new(TrackSurface::new(track)?))?;
//!     context.bind_vehicle_to_track("car", "track")?;
//!
//!     let trajectory = context.solve_laptime("car", LaptimeOptions::default(), None)?;
//!     println!("laptime: {:.3} s", trajectory.laptime);
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod error;
pub mod math;
pub mod nlp;
pub mod ocp;
pub mod output;
pub mod parser;
pub mod registry;
pub mod track;
pub mod vehicle;

// Re-export core types for convenience
pub use error::{Error, Result};
pub use ocp::{ControlMode, IntegralConstraint, LaptimeOptions, OcpTrajectory};
pub use output::{extract_property, write_outputs, OutputTables, PropertyValue};
pub use registry::{Context, Vehicle};
pub use track::{
    GeodeticPoint, MeshSpec, Polyline, PreprocessorOptions, TrackData, TrackPreprocessor,
    TrackSurface,
};
pub use vehicle::{F1Car, GgDiagram, Kart, SteadyStateSolver, VehicleModel};

// Re-export parser functions
pub use parser::kml::{parse_kml_file, parse_kml_str};
pub use parser::xml::{
    parse_track_str, parse_trajectory_str, parse_vehicle_str, serialize_trajectory,
};

// Re-export the solve entry points
pub use ocp::solve::{load_warm_start_file, save_warm_start_file, solve_laptime};

use std::path::Path;

/// Parse a vehicle description file into a vehicle.
///
/// # Example
/// ```rust,no_run
/// let vehicle = laptime_rs::parse_vehicle_file("cars/limebeer.xml")?;
/// # Ok::<(), laptime_rs::Error>(())
/// ```
pub fn parse_vehicle_file<P: AsRef<Path>>(path: P) -> Result<Vehicle> {
    let xml = std::fs::read_to_string(path)?;
    Vehicle::from_xml_str(&xml)
}

/// Parse a discrete track description file into track data.
///
/// # Example
/// ```rust,no_run
/// let track = laptime_rs::parse_track_file("tracks/vendrell.xml")?;
/// # Ok::<(), laptime_rs::Error>(())
/// ```
pub fn parse_track_file<P: AsRef<Path>>(path: P) -> Result<TrackData> {
    let xml = std::fs::read_to_string(path)?;
    parse_track_str(&xml)
}
