//! Document-level tests: vehicle XML, discrete track XML, KML, trajectory
//! export/import

use laptime_rs::{
    parse_kml_file, parse_track_str, parse_trajectory_str, serialize_trajectory, Context,
    TrackSurface, Vehicle,
};
use std::sync::Arc;

fn f1_vehicle_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<vehicle type="f1-3dof">
  <chassis>
    <mass>660</mass>
    <inertia-z>450</inertia-z>
    <front-axle-distance>1.8</front-axle-distance>
    <rear-axle-distance>1.6</rear-axle-distance>
    <com-height>0.3</com-height>
    <front-track>1.46</front-track>
    <rear-track>1.46</rear-track>
    <roll-balance-coefficient>0.5</roll-balance-coefficient>
  </chassis>
  <aerodynamics>
    <drag-area>1.5</drag-area>
    <lift-area>3.0</lift-area>
  </aerodynamics>
  <engine>
    <maximum-power>600e3</maximum-power>
    <maximum-force>18e3</maximum-force>
  </engine>
  <brakes>
    <maximum-force>30e3</maximum-force>
  </brakes>
  <steering>
    <maximum-angle>0.26</maximum-angle>
  </steering>
  <front-tire>
    <stiffness-factor>9.0</stiffness-factor>
    <shape-factor>1.5</shape-factor>
    <mu-x-max>1.7</mu-x-max>
    <mu-y-max>1.6</mu-y-max>
    <kappa-max>0.1</kappa-max>
    <lambda-max>0.157</lambda-max>
    <radius>0.33</radius>
  </front-tire>
  <rear-tire>
    <stiffness-factor>9.0</stiffness-factor>
    <shape-factor>1.5</shape-factor>
    <mu-x-max>1.7</mu-x-max>
    <mu-y-max>1.6</mu-y-max>
    <kappa-max>0.1</kappa-max>
    <lambda-max>0.157</lambda-max>
    <radius>0.33</radius>
  </rear-tire>
</vehicle>"#
        .to_string()
}

fn circle_track_xml(r: f64, nodes: usize) -> String {
    let length = 2.0 * std::f64::consts::PI * r;
    let ds = length / nodes as f64;
    let s: Vec<f64> = (0..nodes).map(|i| i as f64 * ds).collect();
    let theta: Vec<f64> = s.iter().map(|si| si / r).collect();
    let join = |v: &[f64]| {
        v.iter()
            .map(|x| format!("{}", x))
            .collect::<Vec<_>>()
            .join(" ")
    };
    let x: Vec<f64> = theta.iter().map(|t| r * t.sin()).collect();
    let y: Vec<f64> = theta.iter().map(|t| r * (1.0 - t.cos())).collect();
    format!(
        r#"<track format="discrete">
  <n_points>{n}</n_points>
  <total-length>{length}</total-length>
  <arclength>{s}</arclength>
  <heading-angle>{theta}</heading-angle>
  <curvature>{kappa}</curvature>
  <distance-left-boundary>{w}</distance-left-boundary>
  <distance-right-boundary>{w}</distance-right-boundary>
  <centerline><x>{x}</x><y>{y}</y></centerline>
</track>"#,
        n = nodes,
        length = length,
        s = join(&s),
        theta = join(&theta),
        kappa = join(&vec![1.0 / r; nodes]),
        w = join(&vec![4.0; nodes]),
        x = join(&x),
        y = join(&y),
    )
}

#[test]
fn test_vehicle_xml_builds_f1() {
    let vehicle = Vehicle::from_xml_str(&f1_vehicle_xml()).unwrap();
    assert_eq!(vehicle.kind(), "f1-3dof");
    assert!((vehicle.parameters().get("chassis/mass").unwrap() - 660.0).abs() < 1e-12);
    // Scientific notation parses
    assert!((vehicle.parameters().get("engine/maximum-power").unwrap() - 600e3).abs() < 1e-6);
}

#[test]
fn test_vehicle_xml_incomplete_rejected() {
    let xml = r#"<vehicle type="f1-3dof"><chassis><mass>660</mass></chassis></vehicle>"#;
    assert!(Vehicle::from_xml_str(xml).is_err());
}

#[test]
fn test_track_xml_to_surface() {
    let data = parse_track_str(&circle_track_xml(100.0, 64)).unwrap();
    assert!(data.closed);
    let surface = TrackSurface::new(data).unwrap();
    assert!((surface.kappa_at(50.0) - 0.01).abs() < 1e-9);
    assert!((surface.n_left_at(200.0) - 4.0).abs() < 1e-9);
}

#[test]
fn test_full_setup_through_context() {
    let mut context = Context::new();
    context
        .add_vehicle("car", Vehicle::from_xml_str(&f1_vehicle_xml()).unwrap())
        .unwrap();
    let data = parse_track_str(&circle_track_xml(120.0, 64)).unwrap();
    context
        .add_track("ring", Arc::new(TrackSurface::new(data).unwrap()))
        .unwrap();
    context.bind_vehicle_to_track("car", "ring").unwrap();

    // A bound vehicle evaluates its dynamics on the track
    let q = [0.0, 0.0, 0.0, 40.0, 0.0, 0.0];
    let qa = [2800.0; 4];
    let u = [0.0, 0.3, 0.5];
    let evaluation = context.vehicle("car").unwrap().evaluate(&q, &qa, &u, 10.0).unwrap();
    assert!(evaluation.dtime_ds > 0.0);
    // change_track is valid to call repeatedly
    context.bind_vehicle_to_track("car", "ring").unwrap();
}

#[test]
fn test_kml_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("boundary.kml");
    std::fs::write(
        &path,
        r#"<kml><Placemark><LineString>
             <coordinates>9.1,45.1,0 9.2,45.2,0 9.3,45.3,0</coordinates>
           </LineString></Placemark></kml>"#,
    )
    .unwrap();
    let points = parse_kml_file(&path).unwrap();
    assert_eq!(points.len(), 3);
    assert!((points[1].latitude - 45.2).abs() < 1e-12);
}

#[test]
fn test_trajectory_file_roundtrip_exact() {
    let trajectory = laptime_rs::OcpTrajectory {
        s: vec![0.0, 7.5, 15.0],
        q: vec![
            vec![0.0, 0.3, -0.01, 41.0, 0.2, 0.05],
            vec![0.183_486_238_532_110_1, -0.7, 0.02, 43.5, -0.1, 0.06],
            vec![0.36, 0.0, 0.0, 45.0, 0.0, 0.07],
        ],
        qa: vec![vec![2800.0; 4], vec![2900.0; 4], vec![3000.0; 4]],
        u: vec![
            vec![0.01, 0.5, 0.55],
            vec![0.02, 0.6, 0.55],
            vec![0.03, 0.7, 0.55],
        ],
        x: vec![0.0, 7.5, 15.0],
        y: vec![0.0, 0.1, 0.2],
        psi: vec![0.0, 0.01, 0.02],
        laptime: 0.36,
        integral_values: vec![("tire-dissipation".to_string(), 987.654_321)],
        warm_start: None,
        sensitivities: None,
    };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trajectory.xml");
    std::fs::write(&path, serialize_trajectory(&trajectory)).unwrap();
    let parsed = parse_trajectory_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

    // The round trip restores the solution arrays exactly
    assert_eq!(parsed.q, trajectory.q);
    assert_eq!(parsed.qa, trajectory.qa);
    assert_eq!(parsed.u, trajectory.u);
    assert_eq!(parsed.s, trajectory.s);
    assert_eq!(parsed.laptime, trajectory.laptime);
}
