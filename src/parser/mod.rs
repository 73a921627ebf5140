//! Input document parsing
//!
//! This module handles:
//! - Generic XML event-tree parsing ([`XmlNode`]) used by vehicle
//!   descriptions, discrete track files and options documents
//! - Vehicle XML loading into a typed model ([`xml::parse_vehicle_str`])
//! - Discrete track XML loading into [`crate::track::TrackData`]
//! - Trajectory XML export/import with an exact round trip
//! - KML boundary files ([`kml`])

pub mod kml;
pub mod xml;

pub use xml::{
    parse_track_str, parse_trajectory_str, parse_vehicle_str, serialize_trajectory, XmlNode,
};
