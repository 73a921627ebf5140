//! Flattening of geodetic coordinates onto a local tangent plane
//!
//! Boundary polylines arrive as `(longitude, latitude)` pairs in degrees.
//! They are mapped to planar meters with an equirectangular projection
//! centered on the mean coordinate of the data, which is accurate to well
//! below the GPS noise floor at track scale.

use serde::{Deserialize, Serialize};

/// Earth radius used by the projection, in meters (international ellipsoid).
pub const R_EARTH: f64 = 6_378_388.0;

/// A geodetic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticPoint {
    /// Longitude in degrees
    pub longitude: f64,
    /// Latitude in degrees
    pub latitude: f64,
}

impl GeodeticPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

/// Equirectangular projection metadata, kept with the track so boundary
/// coordinates can be reproduced later.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Planar origin
    pub x0: f64,
    pub y0: f64,
    /// Latitude origin in radians
    pub phi0: f64,
    /// Longitude origin in radians
    pub theta0: f64,
    /// Reference latitude for the longitude scale, in radians
    pub phi_ref: f64,
}

impl Projection {
    /// Center the projection on the mean longitude/latitude of the samples.
    pub fn centered_on(points: &[GeodeticPoint]) -> Self {
        let n = points.len().max(1) as f64;
        let mean_lon: f64 = points.iter().map(|p| p.longitude).sum::<f64>() / n;
        let mean_lat: f64 = points.iter().map(|p| p.latitude).sum::<f64>() / n;
        let phi0 = mean_lat.to_radians();
        let theta0 = mean_lon.to_radians();
        Self {
            x0: 0.0,
            y0: 0.0,
            phi0,
            theta0,
            phi_ref: phi0,
        }
    }

    /// Project a geodetic point to local planar coordinates in meters.
    pub fn project(&self, p: &GeodeticPoint) -> (f64, f64) {
        let theta = p.longitude.to_radians();
        let phi = p.latitude.to_radians();
        let x = self.x0 + R_EARTH * self.phi_ref.cos() * (theta - self.theta0);
        let y = self.y0 + R_EARTH * (phi - self.phi0);
        (x, y)
    }

    /// Project a whole polyline.
    pub fn project_all(&self, points: &[GeodeticPoint]) -> Vec<(f64, f64)> {
        points.iter().map(|p| self.project(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_origin_maps_to_origin() {
        let pts = vec![GeodeticPoint::new(9.281, 45.620)];
        let proj = Projection::centered_on(&pts);
        let (x, y) = proj.project(&pts[0]);
        assert_relative_eq!(x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_latitude_degree_scale() {
        let origin = GeodeticPoint::new(0.0, 45.0);
        let north = GeodeticPoint::new(0.0, 45.001);
        let proj = Projection::centered_on(&[origin]);
        let (_, y) = proj.project(&north);
        // One millidegree of latitude is R * 1e-3 * pi/180 meters
        assert_relative_eq!(y, R_EARTH * 1e-3_f64.to_radians(), epsilon = 1e-6);
    }

    #[test]
    fn test_longitude_scale_shrinks_with_latitude() {
        let origin = GeodeticPoint::new(0.0, 60.0);
        let east = GeodeticPoint::new(0.001, 60.0);
        let proj = Projection::centered_on(&[origin]);
        let (x, _) = proj.project(&east);
        // cos(60 deg) = 0.5
        assert_relative_eq!(x, 0.5 * R_EARTH * 1e-3_f64.to_radians(), epsilon = 1e-6);
    }

    #[test]
    fn test_centered_on_uses_mean() {
        let pts = vec![
            GeodeticPoint::new(10.0, 50.0),
            GeodeticPoint::new(12.0, 52.0),
        ];
        let proj = Projection::centered_on(&pts);
        assert_relative_eq!(proj.theta0, 11.0_f64.to_radians());
        assert_relative_eq!(proj.phi0, 51.0_f64.to_radians());
        assert_relative_eq!(proj.phi_ref, proj.phi0);
    }
}
