//! Track preprocessing and the curvilinear reference frame
//!
//! This module turns measured boundary polylines into the smooth arclength
//! parameterization the laptime solver drives on:
//! - [`geodesy`]: flattening of geodetic coordinates onto a local tangent
//!   plane
//! - [`polyline`]: arclength bookkeeping and nearest-point queries on the
//!   measured boundaries
//! - [`preprocessor`]: the constrained least-squares fit producing the
//!   centerline, curvature and lateral half-widths
//! - [`surface`]: smooth interpolation over the preprocessed (or directly
//!   loaded) track data

pub mod geodesy;
pub mod polyline;
pub mod preprocessor;
pub mod surface;

pub use geodesy::{GeodeticPoint, Projection, R_EARTH};
pub use polyline::Polyline;
pub use preprocessor::{MeshSpec, PreprocessorOptions, TrackPreprocessor};
pub use surface::{TrackData, TrackSurface};
