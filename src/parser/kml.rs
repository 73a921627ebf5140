//! KML boundary files
//!
//! Track boundaries arrive as standard KML with a single `<coordinates>`
//! leaf holding comma-separated `lon,lat[,alt]` triplets. Altitude is
//! ignored; the preprocessor works on the flattened plane.

use crate::error::{Error, Result};
use crate::parser::xml::XmlNode;
use crate::track::GeodeticPoint;
use std::fs;
use std::path::Path;

fn find_coordinates<'a>(node: &'a XmlNode, found: &mut Vec<&'a XmlNode>) {
    if node.name == "coordinates" {
        found.push(node);
    }
    for child in &node.children {
        find_coordinates(child, found);
    }
}

/// Parse KML text into geodetic points.
pub fn parse_kml_str(kml: &str) -> Result<Vec<GeodeticPoint>> {
    let root = XmlNode::parse(kml)?;
    let mut leaves = Vec::new();
    find_coordinates(&root, &mut leaves);
    let leaf = match leaves.as_slice() {
        [one] => one,
        [] => return Err(Error::missing_key("coordinates", "KML document")),
        _ => {
            return Err(Error::invalid_value(
                "coordinates",
                &leaves.len().to_string(),
                "expected exactly one coordinates element",
            ))
        }
    };

    let mut points = Vec::new();
    for triplet in leaf.text.split_whitespace() {
        let parts: Vec<&str> = triplet.split(',').collect();
        if parts.len() < 2 {
            return Err(Error::invalid_value(
                "coordinates",
                triplet,
                "expected lon,lat[,alt] triplets",
            ));
        }
        let longitude: f64 = parts[0].parse().map_err(|_| {
            Error::invalid_value("longitude", parts[0], "could not parse a number")
        })?;
        let latitude: f64 = parts[1].parse().map_err(|_| {
            Error::invalid_value("latitude", parts[1], "could not parse a number")
        })?;
        points.push(GeodeticPoint::new(longitude, latitude));
    }
    if points.is_empty() {
        return Err(Error::invalid_value(
            "coordinates",
            "empty",
            "the coordinates element holds no points",
        ));
    }
    Ok(points)
}

/// Parse a KML file into geodetic points.
pub fn parse_kml_file<P: AsRef<Path>>(path: P) -> Result<Vec<GeodeticPoint>> {
    let content = fs::read_to_string(&path)?;
    parse_kml_str(&content)
}
