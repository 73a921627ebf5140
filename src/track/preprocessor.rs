//! Track preprocessor
//!
//! Converts measured left/right boundary polylines into the smooth
//! curvilinear reference the laptime solver uses. The fit is posed as a
//! constrained nonlinear least-squares problem: per node the state is
//! `(x, y, theta, kappa, n_left, n_right)` driven by the controls
//! `(dkappa/ds, dn_left/ds, dn_right/ds)` through trapezoidal arclength
//! dynamics, with one global track-length variable (or per-element lengths
//! in refined mode). The objective balances boundary fidelity against
//! curvature and width smoothness; curvature and its rate are bounded.

use crate::error::{Error, Result};
use crate::math::Scalar;
use crate::nlp::{ipm, NlpProblem};
use crate::track::geodesy::{GeodeticPoint, Projection};
use crate::track::polyline::Polyline;
use crate::track::surface::{BoundaryErrors, TrackData};
use nalgebra::Vector2;
use std::f64::consts::TAU;
use tracing::{info, warn};

/// Weights and limits for the preprocessor fit.
#[derive(Debug, Clone)]
pub struct PreprocessorOptions {
    /// Boundary fidelity weight
    pub eps_d: f64,
    /// Curvature smoothness weight
    pub eps_k: f64,
    /// Lateral-width smoothness weight
    pub eps_n: f64,
    /// Anchor weight to the averaged centerline estimate
    pub eps_c: f64,
    /// Curvature magnitude limit
    pub maximum_kappa: f64,
    /// Curvature rate limit
    pub maximum_dkappa: f64,
    /// Width rate limit
    pub maximum_dn: f64,
    /// Search radius when pairing boundary samples
    pub maximum_distance_find: f64,
    /// Largest allowed ratio between neighboring element lengths
    pub adaption_aspect_ratio_max: f64,
    /// Verbosity forwarded to the NLP solver
    pub print_level: u8,
}

impl Default for PreprocessorOptions {
    fn default() -> Self {
        Self {
            eps_d: 1.0,
            eps_k: 100.0,
            eps_n: 1.0,
            eps_c: 0.1,
            maximum_kappa: 0.1,
            maximum_dkappa: 0.1,
            maximum_dn: 1.0,
            maximum_distance_find: 30.0,
            adaption_aspect_ratio_max: 1.5,
            print_level: 0,
        }
    }
}

/// Mesh request: equally spaced elements or a refined arclength
/// distribution.
#[derive(Debug, Clone)]
pub enum MeshSpec {
    /// `n_el` equally spaced elements
    Equal(usize),
    /// Target element size `ds_distribution[i]` at arclength
    /// `s_distribution[i]`, interpolated linearly in between
    Refined {
        s_distribution: Vec<f64>,
        ds_distribution: Vec<f64>,
    },
}

/// The preprocessor configuration plus its entry point.
#[derive(Debug, Clone)]
pub struct TrackPreprocessor {
    pub options: PreprocessorOptions,
    pub mesh: MeshSpec,
    pub closed: bool,
    /// Boundaries are reversed first when the data runs clockwise
    pub clockwise: bool,
    /// Open tracks trim the boundaries between these coordinates
    pub start_finish: Option<(GeodeticPoint, GeodeticPoint)>,
}

impl TrackPreprocessor {
    /// Validate the mode combination.
    pub fn new(
        options: PreprocessorOptions,
        mesh: MeshSpec,
        closed: bool,
        clockwise: bool,
        start_finish: Option<(GeodeticPoint, GeodeticPoint)>,
    ) -> Result<Self> {
        if !closed && matches!(mesh, MeshSpec::Refined { .. }) {
            return Err(Error::invalid_value(
                "mesh",
                "refined",
                "refined meshes are only supported on closed tracks",
            ));
        }
        if !closed && start_finish.is_none() {
            return Err(Error::missing_key("start/finish", "open track preprocessor"));
        }
        Ok(Self {
            options,
            mesh,
            closed,
            clockwise,
            start_finish,
        })
    }

    /// Run the full pipeline on geodetic boundary polylines.
    pub fn run(&self, left: &[GeodeticPoint], right: &[GeodeticPoint]) -> Result<TrackData> {
        // Stage 1: flatten both boundaries with one shared projection
        let mut all: Vec<GeodeticPoint> = left.to_vec();
        all.extend_from_slice(right);
        let projection = Projection::centered_on(&all);
        let mut left = Polyline::new(&projection.project_all(left))?;
        let mut right = Polyline::new(&projection.project_all(right))?;

        // Stage 2: normalize orientation to counterclockwise travel
        if self.clockwise {
            left.reverse();
            right.reverse();
        }

        // Open tracks are trimmed between the start and finish coordinates
        if let Some((start, finish)) = &self.start_finish {
            let (sx, sy) = projection.project(start);
            let (fx, fy) = projection.project(finish);
            let s = Vector2::new(sx, sy);
            let f = Vector2::new(fx, fy);
            left = left.trim(&s, &f, self.options.maximum_distance_find)?;
            right = right.trim(&s, &f, self.options.maximum_distance_find)?;
        }

        self.run_planar(left, right, Some(projection))
    }

    /// Run on already-planar boundaries (used directly by tests and by
    /// callers that project themselves).
    pub fn run_planar(
        &self,
        left: Polyline,
        right: Polyline,
        projection: Option<Projection>,
    ) -> Result<TrackData> {
        // When the polylines disagree in sampling density, the shorter one
        // is resampled to match before pairing.
        let (left, right) = if left.len() < right.len() {
            (left.resample(right.len())?, right)
        } else if right.len() < left.len() {
            let n = left.len();
            (left, right.resample(n)?)
        } else {
            (left, right)
        };

        // Stage 3: averaged centerline estimate
        let estimate = self.centerline_estimate(&left, &right)?;
        info!(
            nodes = estimate.center.len(),
            length = estimate.length,
            "centerline estimate built"
        );

        // Stage 4: NLP refinement
        let problem = FitProblem::build(self, &estimate)?;
        let ipm_options = ipm::IpmOptions {
            print_level: self.options.print_level,
            ..Default::default()
        };
        let solution = ipm::solve(&problem, &ipm_options, None)
            .map_err(|e| e.with_context("track preprocessor"))?;
        if !solution.status.is_success() {
            return Err(Error::optimization_failure(
                "track preprocessor NLP did not converge",
                solution.iterations,
            ));
        }

        // Stage 5: materialize the track data and error report
        let data = problem.materialize(&solution.x, &left, &right, projection)?;
        if let Some(errors) = &data.boundary_errors {
            info!(
                left_max = errors.left_max,
                right_max = errors.right_max,
                left_l2 = errors.left_l2,
                right_l2 = errors.right_l2,
                length = data.length,
                "track preprocessor finished"
            );
            if errors.left_max > self.options.maximum_distance_find
                || errors.right_max > self.options.maximum_distance_find
            {
                warn!("boundary reconstruction error exceeds the pairing radius");
            }
        }
        Ok(data)
    }

    /// Pair boundary samples and average them into a centerline estimate.
    fn centerline_estimate(&self, left: &Polyline, right: &Polyline) -> Result<CenterlineEstimate> {
        let n_samples = left.len().max(right.len()).max(64);
        let step = left.length() / n_samples as f64;

        let mut center = Vec::with_capacity(n_samples);
        let mut left_pts = Vec::with_capacity(n_samples);
        let mut right_pts = Vec::with_capacity(n_samples);
        let mut s_right_cursor = 0.0;
        for i in 0..n_samples {
            let lp = left.point_at(i as f64 * step);
            // "Who is ahead" is resolved by keeping the right-boundary
            // arclength monotone while searching near the cursor.
            let (s_r, _d, rp) = nearest_monotone(
                right,
                &lp,
                s_right_cursor,
                self.options.maximum_distance_find,
            )
            .ok_or_else(|| {
                Error::invalid_value(
                    "boundaries",
                    &format!("sample {}", i),
                    "no opposite boundary point within maximum_distance_find",
                )
            })?;
            s_right_cursor = s_r;
            center.push((lp + rp) * 0.5);
            left_pts.push(lp);
            right_pts.push(rp);
        }

        let mut length = 0.0;
        for w in center.windows(2) {
            length += (w[1] - w[0]).norm();
        }
        if self.closed {
            length += (center[0] - center[n_samples - 1]).norm();
        }

        Ok(CenterlineEstimate {
            center,
            left_pts,
            right_pts,
            length,
        })
    }
}

/// Nearest point on `poly` to `target` with arclength no earlier than
/// slightly behind `s_min`.
fn nearest_monotone(
    poly: &Polyline,
    target: &Vector2<f64>,
    s_min: f64,
    max_distance: f64,
) -> Option<(f64, f64, Vector2<f64>)> {
    const BACKSTEP: f64 = 5.0;
    let pts = poly.points();
    let arcs = poly.arclengths();
    let mut best: Option<(f64, f64, Vector2<f64>)> = None;
    for i in 0..pts.len() - 1 {
        if arcs[i + 1] < s_min - BACKSTEP {
            continue;
        }
        let a = pts[i];
        let ab = pts[i + 1] - a;
        let len2 = ab.norm_squared();
        let t = if len2 > 0.0 {
            ((target - a).dot(&ab) / len2).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let p = a + ab * t;
        let d = (target - p).norm();
        let s = arcs[i] + (arcs[i + 1] - arcs[i]) * t;
        if s < s_min - BACKSTEP {
            continue;
        }
        if d <= max_distance && best.map_or(true, |(_, bd, _)| d < bd) {
            best = Some((s, d, p));
        }
    }
    best
}

struct CenterlineEstimate {
    center: Vec<Vector2<f64>>,
    left_pts: Vec<Vector2<f64>>,
    right_pts: Vec<Vector2<f64>>,
    length: f64,
}

/// Per-node variable block: 6 states then 3 controls.
const STATE_X: usize = 0;
const STATE_Y: usize = 1;
const STATE_THETA: usize = 2;
const STATE_KAPPA: usize = 3;
const STATE_NLEFT: usize = 4;
const STATE_NRIGHT: usize = 5;
const CTRL_DKAPPA: usize = 6;
const CTRL_DNLEFT: usize = 7;
const CTRL_DNRIGHT: usize = 8;
const NODE_VARS: usize = 9;

/// The NLP behind stage 4.
struct FitProblem {
    options: PreprocessorOptions,
    closed: bool,
    n_points: usize,
    /// Anchor targets resampled onto the fit mesh
    center_targets: Vec<Vector2<f64>>,
    left_targets: Vec<Vector2<f64>>,
    right_targets: Vec<Vector2<f64>>,
    /// Initial heading (unwrapped) and widths for the starting point
    theta0: Vec<f64>,
    kappa0: Vec<f64>,
    n_left0: Vec<f64>,
    n_right0: Vec<f64>,
    length_estimate: f64,
    /// Requested element lengths; `None` means equally spaced with a single
    /// global length variable
    ds_request: Option<Vec<f64>>,
    /// Open tracks pin the first and last node
    pinned_ends: Option<(Vector2<f64>, Vector2<f64>)>,
}

impl FitProblem {
    fn build(pre: &TrackPreprocessor, estimate: &CenterlineEstimate) -> Result<Self> {
        // Decide the fit mesh
        let (n_points, ds_request) = match &pre.mesh {
            MeshSpec::Equal(n_el) => {
                if *n_el < 3 {
                    return Err(Error::invalid_value(
                        "n_el",
                        &n_el.to_string(),
                        "the fit needs at least three elements",
                    ));
                }
                let n_points = if pre.closed { *n_el } else { *n_el + 1 };
                (n_points, None)
            }
            MeshSpec::Refined {
                s_distribution,
                ds_distribution,
            } => {
                if s_distribution.len() != ds_distribution.len() || s_distribution.len() < 2 {
                    return Err(Error::invalid_value(
                        "s_distribution",
                        &s_distribution.len().to_string(),
                        "the distribution needs matching arrays of at least two entries",
                    ));
                }
                let ds = build_refined_mesh(
                    s_distribution,
                    ds_distribution,
                    estimate.length,
                    pre.options.adaption_aspect_ratio_max,
                )?;
                (ds.len(), Some(ds))
            }
        };

        // Resample the estimate onto the fit mesh (by index fraction; the
        // estimate is equally spaced in its own arclength)
        let m = estimate.center.len();
        let fractions: Vec<f64> = match &ds_request {
            None => {
                let denom = if pre.closed {
                    n_points as f64
                } else {
                    (n_points - 1) as f64
                };
                (0..n_points).map(|i| i as f64 / denom).collect()
            }
            Some(ds) => {
                let total: f64 = ds.iter().sum();
                let mut acc = 0.0;
                let mut f = Vec::with_capacity(n_points);
                for d in ds {
                    f.push(acc / total);
                    acc += d;
                }
                f
            }
        };
        let sample = |pts: &Vec<Vector2<f64>>, f: f64| -> Vector2<f64> {
            let t = f * m as f64;
            let i = (t.floor() as usize).min(m - 1);
            let j = if pre.closed { (i + 1) % m } else { (i + 1).min(m - 1) };
            let frac = t - i as f64;
            pts[i] + (pts[j] - pts[i]) * frac
        };

        let center_targets: Vec<Vector2<f64>> =
            fractions.iter().map(|&f| sample(&estimate.center, f)).collect();
        let left_targets: Vec<Vector2<f64>> =
            fractions.iter().map(|&f| sample(&estimate.left_pts, f)).collect();
        let right_targets: Vec<Vector2<f64>> =
            fractions.iter().map(|&f| sample(&estimate.right_pts, f)).collect();

        // Initial heading from the centerline chord directions, unwrapped
        let mut theta0 = Vec::with_capacity(n_points);
        for i in 0..n_points {
            let next = if pre.closed {
                center_targets[(i + 1) % n_points]
            } else {
                center_targets[(i + 1).min(n_points - 1)]
            };
            let prev = if i == 0 {
                if pre.closed {
                    center_targets[n_points - 1]
                } else {
                    center_targets[0]
                }
            } else {
                center_targets[i - 1]
            };
            let dir = next - prev;
            let mut angle = dir.y.atan2(dir.x);
            if let Some(prev_angle) = theta0.last() {
                while angle - prev_angle > std::f64::consts::PI {
                    angle -= TAU;
                }
                while angle - prev_angle < -std::f64::consts::PI {
                    angle += TAU;
                }
            }
            theta0.push(angle);
        }

        let ds_nominal = estimate.length
            / if pre.closed {
                n_points as f64
            } else {
                (n_points - 1) as f64
            };
        let mut kappa0 = Vec::with_capacity(n_points);
        for i in 0..n_points {
            let k = if i + 1 < n_points {
                (theta0[i + 1] - theta0[i]) / ds_nominal
            } else if pre.closed {
                (theta0[0] + TAU - theta0[n_points - 1]) / ds_nominal
            } else {
                0.0
            };
            kappa0.push(k.clamp(-pre.options.maximum_kappa, pre.options.maximum_kappa));
        }

        let n_left0: Vec<f64> = (0..n_points)
            .map(|i| (left_targets[i] - center_targets[i]).norm())
            .collect();
        let n_right0: Vec<f64> = (0..n_points)
            .map(|i| (right_targets[i] - center_targets[i]).norm())
            .collect();

        let pinned_ends = if pre.closed {
            None
        } else {
            Some((center_targets[0], center_targets[n_points - 1]))
        };

        Ok(Self {
            options: pre.options.clone(),
            closed: pre.closed,
            n_points,
            center_targets,
            left_targets,
            right_targets,
            theta0,
            kappa0,
            n_left0,
            n_right0,
            length_estimate: estimate.length,
            ds_request,
            pinned_ends,
        })
    }

    fn num_elements(&self) -> usize {
        if self.closed {
            self.n_points
        } else {
            self.n_points - 1
        }
    }

    /// Index of the first mesh variable (global length or per-element ds).
    fn mesh_var_offset(&self) -> usize {
        self.n_points * NODE_VARS
    }

    /// Element length as a scalar expression over the variables.
    fn element_length<T: Scalar>(&self, x: &[T], element: usize) -> T {
        match &self.ds_request {
            None => x[self.mesh_var_offset()] / self.num_elements() as f64,
            Some(_) => x[self.mesh_var_offset() + element],
        }
    }

    /// Materialize track data from the solved variable vector.
    fn materialize(
        &self,
        x: &nalgebra::DVector<f64>,
        left: &Polyline,
        right: &Polyline,
        projection: Option<Projection>,
    ) -> Result<TrackData> {
        let n = self.n_points;
        let mut s = Vec::with_capacity(n);
        match &self.ds_request {
            None => {
                let length = x[self.mesh_var_offset()];
                let h = length / self.num_elements() as f64;
                for i in 0..n {
                    s.push(i as f64 * h);
                }
            }
            Some(_) => {
                let mut acc = 0.0;
                for i in 0..n {
                    s.push(acc);
                    acc += x[self.mesh_var_offset() + i];
                }
            }
        }
        let length = match &self.ds_request {
            None => x[self.mesh_var_offset()],
            Some(ds) => (0..ds.len()).map(|i| x[self.mesh_var_offset() + i]).sum(),
        };

        let get = |i: usize, k: usize| x[i * NODE_VARS + k];
        let xs: Vec<f64> = (0..n).map(|i| get(i, STATE_X)).collect();
        let ys: Vec<f64> = (0..n).map(|i| get(i, STATE_Y)).collect();
        let thetas: Vec<f64> = (0..n).map(|i| get(i, STATE_THETA)).collect();
        let kappas: Vec<f64> = (0..n).map(|i| get(i, STATE_KAPPA)).collect();
        let n_lefts: Vec<f64> = (0..n).map(|i| get(i, STATE_NLEFT)).collect();
        let n_rights: Vec<f64> = (0..n).map(|i| get(i, STATE_NRIGHT)).collect();
        let dkappas: Vec<f64> = (0..n).map(|i| get(i, CTRL_DKAPPA)).collect();
        let dn_lefts: Vec<f64> = (0..n).map(|i| get(i, CTRL_DNLEFT)).collect();
        let dn_rights: Vec<f64> = (0..n).map(|i| get(i, CTRL_DNRIGHT)).collect();

        // Boundary reconstruction error report
        let mut left_max = 0.0_f64;
        let mut right_max = 0.0_f64;
        let mut left_sq = 0.0_f64;
        let mut right_sq = 0.0_f64;
        for i in 0..n {
            let normal = Vector2::new(-thetas[i].sin(), thetas[i].cos());
            let c = Vector2::new(xs[i], ys[i]);
            let lp = c + normal * n_lefts[i];
            let rp = c - normal * n_rights[i];
            let dl = left
                .nearest(&lp, f64::INFINITY)
                .map(|(_, d, _)| d)
                .unwrap_or(f64::INFINITY);
            let dr = right
                .nearest(&rp, f64::INFINITY)
                .map(|(_, d, _)| d)
                .unwrap_or(f64::INFINITY);
            left_max = left_max.max(dl);
            right_max = right_max.max(dr);
            left_sq += dl * dl;
            right_sq += dr * dr;
        }
        let boundary_errors = BoundaryErrors {
            left_max,
            right_max,
            left_l2: (left_sq / n as f64).sqrt(),
            right_l2: (right_sq / n as f64).sqrt(),
        };

        let data = TrackData {
            s,
            x: xs,
            y: ys,
            theta: thetas,
            kappa: kappas,
            n_left: n_lefts,
            n_right: n_rights,
            dkappa_ds: Some(dkappas),
            dn_left_ds: Some(dn_lefts),
            dn_right_ds: Some(dn_rights),
            closed: self.closed,
            length,
            left_boundary: Some(left.clone()),
            right_boundary: Some(right.clone()),
            projection,
            boundary_errors: Some(boundary_errors),
        };
        data.validate()?;
        Ok(data)
    }
}

impl NlpProblem for FitProblem {
    fn num_variables(&self) -> usize {
        self.n_points * NODE_VARS
            + match &self.ds_request {
                None => 1,
                Some(ds) => ds.len(),
            }
    }

    fn num_constraints(&self) -> usize {
        // 6 trapezoidal rows per element, plus aspect-ratio rows in refined
        // mode, plus 4 pinning rows on open tracks
        let mut m = 6 * self.num_elements();
        if self.ds_request.is_some() {
            m += 2 * self.num_elements();
        }
        if self.pinned_ends.is_some() {
            m += 4;
        }
        m
    }

    fn variable_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let n_var = self.num_variables();
        let mut lb = vec![f64::NEG_INFINITY; n_var];
        let mut ub = vec![f64::INFINITY; n_var];
        for i in 0..self.n_points {
            let base = i * NODE_VARS;
            lb[base + STATE_KAPPA] = -self.options.maximum_kappa;
            ub[base + STATE_KAPPA] = self.options.maximum_kappa;
            lb[base + STATE_NLEFT] = 0.0;
            lb[base + STATE_NRIGHT] = 0.0;
            lb[base + CTRL_DKAPPA] = -self.options.maximum_dkappa;
            ub[base + CTRL_DKAPPA] = self.options.maximum_dkappa;
            lb[base + CTRL_DNLEFT] = -self.options.maximum_dn;
            ub[base + CTRL_DNLEFT] = self.options.maximum_dn;
            lb[base + CTRL_DNRIGHT] = -self.options.maximum_dn;
            ub[base + CTRL_DNRIGHT] = self.options.maximum_dn;
        }
        match &self.ds_request {
            None => {
                lb[self.mesh_var_offset()] = 0.5 * self.length_estimate;
                ub[self.mesh_var_offset()] = 2.0 * self.length_estimate;
            }
            Some(ds) => {
                for (k, d) in ds.iter().enumerate() {
                    lb[self.mesh_var_offset() + k] = 0.25 * d;
                    ub[self.mesh_var_offset() + k] = 4.0 * d;
                }
            }
        }
        (lb, ub)
    }

    fn constraint_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let m = self.num_constraints();
        let mut lb = vec![0.0; m];
        let mut ub = vec![0.0; m];
        if self.ds_request.is_some() {
            // The aspect rows are one-sided: ds_next - ar*ds <= 0
            let start = 6 * self.num_elements();
            for j in start..start + 2 * self.num_elements() {
                lb[j] = f64::NEG_INFINITY;
                ub[j] = 0.0;
            }
        }
        (lb, ub)
    }

    fn initial_guess(&self) -> Vec<f64> {
        let mut x = vec![0.0; self.num_variables()];
        for i in 0..self.n_points {
            let base = i * NODE_VARS;
            x[base + STATE_X] = self.center_targets[i].x;
            x[base + STATE_Y] = self.center_targets[i].y;
            x[base + STATE_THETA] = self.theta0[i];
            x[base + STATE_KAPPA] = self.kappa0[i];
            x[base + STATE_NLEFT] = self.n_left0[i];
            x[base + STATE_NRIGHT] = self.n_right0[i];
        }
        match &self.ds_request {
            None => x[self.mesh_var_offset()] = self.length_estimate,
            Some(ds) => {
                for (k, d) in ds.iter().enumerate() {
                    x[self.mesh_var_offset() + k] = *d;
                }
            }
        }
        x
    }

    fn eval<T: Scalar>(&self, x: &[T]) -> (T, Vec<T>) {
        let n = self.n_points;
        let node = |i: usize, k: usize| x[i * NODE_VARS + k];

        let mut constraints = Vec::with_capacity(self.num_constraints());
        for e in 0..self.num_elements() {
            let a = e;
            let b = (e + 1) % n;
            let h = self.element_length(x, e);
            let half = h * 0.5;
            // The closed wrap element returns to the first node one full
            // turn ahead in heading
            let theta_b = if self.closed && b == 0 {
                node(b, STATE_THETA) + TAU
            } else {
                node(b, STATE_THETA)
            };

            constraints.push(
                node(b, STATE_X)
                    - node(a, STATE_X)
                    - half * (node(a, STATE_THETA).cos() + node(b, STATE_THETA).cos()),
            );
            constraints.push(
                node(b, STATE_Y)
                    - node(a, STATE_Y)
                    - half * (node(a, STATE_THETA).sin() + node(b, STATE_THETA).sin()),
            );
            constraints.push(
                theta_b
                    - node(a, STATE_THETA)
                    - half * (node(a, STATE_KAPPA) + node(b, STATE_KAPPA)),
            );
            constraints.push(
                node(b, STATE_KAPPA)
                    - node(a, STATE_KAPPA)
                    - half * (node(a, CTRL_DKAPPA) + node(b, CTRL_DKAPPA)),
            );
            constraints.push(
                node(b, STATE_NLEFT)
                    - node(a, STATE_NLEFT)
                    - half * (node(a, CTRL_DNLEFT) + node(b, CTRL_DNLEFT)),
            );
            constraints.push(
                node(b, STATE_NRIGHT)
                    - node(a, STATE_NRIGHT)
                    - half * (node(a, CTRL_DNRIGHT) + node(b, CTRL_DNRIGHT)),
            );
        }
        if self.ds_request.is_some() {
            let ar = self.options.adaption_aspect_ratio_max;
            for e in 0..self.num_elements() {
                let next = (e + 1) % self.num_elements();
                let d0 = self.element_length(x, e);
                let d1 = self.element_length(x, next);
                constraints.push(d1 - d0 * ar);
                constraints.push(d0 - d1 * ar);
            }
        }
        if let Some((start, finish)) = &self.pinned_ends {
            constraints.push(node(0, STATE_X) - start.x);
            constraints.push(node(0, STATE_Y) - start.y);
            constraints.push(node(n - 1, STATE_X) - finish.x);
            constraints.push(node(n - 1, STATE_Y) - finish.y);
        }

        // Objective: boundary fidelity + smoothness + estimate anchor
        let mut objective = T::zero();
        for i in 0..n {
            let sin_t = node(i, STATE_THETA).sin();
            let cos_t = node(i, STATE_THETA).cos();
            let lx = node(i, STATE_X) - node(i, STATE_NLEFT) * sin_t;
            let ly = node(i, STATE_Y) + node(i, STATE_NLEFT) * cos_t;
            let rx = node(i, STATE_X) + node(i, STATE_NRIGHT) * sin_t;
            let ry = node(i, STATE_Y) - node(i, STATE_NRIGHT) * cos_t;

            let dlx = lx - self.left_targets[i].x;
            let dly = ly - self.left_targets[i].y;
            let drx = rx - self.right_targets[i].x;
            let dry = ry - self.right_targets[i].y;
            objective += (dlx * dlx + dly * dly + drx * drx + dry * dry)
                * self.options.eps_d;

            let dcx = node(i, STATE_X) - self.center_targets[i].x;
            let dcy = node(i, STATE_Y) - self.center_targets[i].y;
            objective += (dcx * dcx + dcy * dcy) * self.options.eps_c;

            objective += node(i, STATE_KAPPA) * node(i, STATE_KAPPA) * self.options.eps_k;
            objective += (node(i, CTRL_DNLEFT) * node(i, CTRL_DNLEFT)
                + node(i, CTRL_DNRIGHT) * node(i, CTRL_DNRIGHT))
                * self.options.eps_n;
        }

        (objective, constraints)
    }
}

/// Walk the requested `ds(s)` distribution into per-element lengths summing
/// to the estimated track length.
fn build_refined_mesh(
    s_distribution: &[f64],
    ds_distribution: &[f64],
    length: f64,
    aspect_max: f64,
) -> Result<Vec<f64>> {
    if ds_distribution.iter().any(|d| *d <= 0.0) {
        return Err(Error::invalid_value(
            "ds_distribution",
            "non-positive",
            "element sizes must be positive",
        ));
    }
    let interp = |s: f64| -> f64 {
        if s <= s_distribution[0] {
            return ds_distribution[0];
        }
        if s >= s_distribution[s_distribution.len() - 1] {
            return ds_distribution[ds_distribution.len() - 1];
        }
        for w in 0..s_distribution.len() - 1 {
            if s <= s_distribution[w + 1] {
                let t = (s - s_distribution[w]) / (s_distribution[w + 1] - s_distribution[w]);
                return ds_distribution[w] + t * (ds_distribution[w + 1] - ds_distribution[w]);
            }
        }
        ds_distribution[ds_distribution.len() - 1]
    };

    let mut ds = Vec::new();
    let mut s = 0.0;
    let mut prev: Option<f64> = None;
    while s < length {
        let mut d = interp(s);
        // Keep neighboring elements within the requested aspect ratio
        if let Some(p) = prev {
            d = d.clamp(p / aspect_max, p * aspect_max);
        }
        ds.push(d);
        prev = Some(d);
        s += d;
    }
    if ds.len() < 3 {
        return Err(Error::invalid_value(
            "ds_distribution",
            "too coarse",
            "the distribution yields fewer than three elements",
        ));
    }
    // Scale so the walk ends exactly on the estimated length
    let total: f64 = ds.iter().sum();
    let scale = length / total;
    for d in ds.iter_mut() {
        *d *= scale;
    }
    Ok(ds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Rounded rectangle boundaries: straights of `l`, corner arcs of
    /// radius `r`, half-width `w`, counterclockwise, sampled densely.
    fn rounded_rectangle(l: f64, r: f64, w: f64, samples_per_unit: f64) -> (Polyline, Polyline) {
        let mut center: Vec<(f64, f64, f64)> = Vec::new(); // (x, y, heading)
        let push_straight = |from: (f64, f64), heading: f64, len: f64, out: &mut Vec<(f64, f64, f64)>| {
            let n = (len * samples_per_unit).ceil() as usize;
            for i in 0..n {
                let t = len * i as f64 / n as f64;
                out.push((
                    from.0 + t * heading.cos(),
                    from.1 + t * heading.sin(),
                    heading,
                ));
            }
        };
        let push_arc = |center_pt: (f64, f64), start_angle: f64, out: &mut Vec<(f64, f64, f64)>| {
            let arc_len = r * std::f64::consts::FRAC_PI_2;
            let n = (arc_len * samples_per_unit).ceil() as usize;
            for i in 0..n {
                let a = start_angle + std::f64::consts::FRAC_PI_2 * i as f64 / n as f64;
                out.push((
                    center_pt.0 + r * a.cos(),
                    center_pt.1 + r * a.sin(),
                    a + std::f64::consts::FRAC_PI_2,
                ));
            }
        };

        push_straight((r, 0.0), 0.0, l, &mut center);
        push_arc((r + l, r), -std::f64::consts::FRAC_PI_2, &mut center);
        push_straight((r + l + r, r), std::f64::consts::FRAC_PI_2, l, &mut center);
        push_arc((r + l, r + l), 0.0, &mut center);
        push_straight((r + l, r + l + r), std::f64::consts::PI, l, &mut center);
        push_arc((r, r + l), std::f64::consts::FRAC_PI_2, &mut center);
        push_straight((0.0, r + l), -std::f64::consts::FRAC_PI_2, l, &mut center);
        push_arc((r, r), std::f64::consts::PI, &mut center);

        let left: Vec<(f64, f64)> = center
            .iter()
            .map(|(x, y, h)| (x - w * h.sin(), y + w * h.cos()))
            .collect();
        let right: Vec<(f64, f64)> = center
            .iter()
            .map(|(x, y, h)| (x + w * h.sin(), y - w * h.cos()))
            .collect();
        (Polyline::new(&left).unwrap(), Polyline::new(&right).unwrap())
    }

    fn preprocessor(mesh: MeshSpec) -> TrackPreprocessor {
        TrackPreprocessor::new(PreprocessorOptions::default(), mesh, true, false, None).unwrap()
    }

    #[test]
    fn test_open_refined_rejected() {
        let result = TrackPreprocessor::new(
            PreprocessorOptions::default(),
            MeshSpec::Refined {
                s_distribution: vec![0.0, 100.0],
                ds_distribution: vec![5.0, 5.0],
            },
            false,
            false,
            Some((GeodeticPoint::new(0.0, 0.0), GeodeticPoint::new(0.1, 0.0))),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_open_without_start_finish_rejected() {
        let result = TrackPreprocessor::new(
            PreprocessorOptions::default(),
            MeshSpec::Equal(50),
            false,
            false,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_centerline_estimate_of_rounded_rectangle() {
        let (left, right) = rounded_rectangle(100.0, 20.0, 5.0, 0.5);
        let pre = preprocessor(MeshSpec::Equal(48));
        let estimate = pre.centerline_estimate(&left, &right).unwrap();
        // Perimeter of the rounded rectangle centerline
        let expected = 4.0 * 100.0 + TAU * 20.0;
        assert_relative_eq!(estimate.length, expected, epsilon = 0.05 * expected);
        // Estimated widths must be close to the constructed half-width
        for (c, l) in estimate.center.iter().zip(estimate.left_pts.iter()) {
            let w = (l - c).norm();
            assert!((w - 5.0).abs() < 1.0, "width estimate {} off", w);
        }
    }

    #[test]
    fn test_refined_mesh_integrates_distribution() {
        let ds = build_refined_mesh(&[0.0, 200.0, 400.0], &[10.0, 5.0, 10.0], 400.0, 1.5).unwrap();
        let total: f64 = ds.iter().sum();
        assert_relative_eq!(total, 400.0, epsilon = 1e-9);
        // Roughly int 1/ds ds elements
        assert!(ds.len() >= 40 && ds.len() <= 70, "got {} elements", ds.len());
        for w in ds.windows(2) {
            let ratio = (w[1] / w[0]).max(w[0] / w[1]);
            assert!(ratio <= 1.5 + 1e-9);
        }
    }

    #[test]
    fn test_fit_problem_shapes() {
        let (left, right) = rounded_rectangle(100.0, 20.0, 5.0, 0.5);
        let pre = preprocessor(MeshSpec::Equal(32));
        let estimate = pre.centerline_estimate(&left, &right).unwrap();
        let problem = FitProblem::build(&pre, &estimate).unwrap();
        assert_eq!(problem.num_variables(), 32 * NODE_VARS + 1);
        assert_eq!(problem.num_constraints(), 6 * 32);

        let guess = problem.initial_guess();
        assert_eq!(guess.len(), problem.num_variables());
        let (obj, cons) = problem.eval(guess.as_slice());
        assert!(obj.is_finite());
        assert_eq!(cons.len(), problem.num_constraints());
        // The initial guess is consistent to within coarse discretization
        for c in &cons {
            assert!(c.abs() < 10.0, "constraint residual {} too large", c);
        }
    }

    #[test]
    fn test_preprocess_rounded_rectangle_closed() {
        let (left, right) = rounded_rectangle(100.0, 20.0, 5.0, 0.5);
        let pre = preprocessor(MeshSpec::Equal(48));
        let data = pre.run_planar(left, right, None).unwrap();

        let expected_length = 4.0 * 100.0 + TAU * 20.0;
        assert_relative_eq!(data.length, expected_length, epsilon = 0.03 * expected_length);

        // Curvature peaks near 1/r and respects the configured cap
        let kappa_max = data.kappa.iter().cloned().fold(0.0_f64, |a, k| a.max(k.abs()));
        assert!(kappa_max <= pre.options.maximum_kappa + 1e-6);
        assert!(kappa_max > 0.03, "kappa_max {} too small", kappa_max);

        // Curvature rate respects the cap between neighbors
        for i in 0..data.s.len() - 1 {
            let ds = data.s[i + 1] - data.s[i];
            let dk = (data.kappa[i + 1] - data.kappa[i]).abs() / ds;
            assert!(dk <= pre.options.maximum_dkappa + 1e-6);
        }

        // Boundary reconstruction quality
        let errors = data.boundary_errors.unwrap();
        assert!(errors.left_l2 < 0.5, "left L2 error {}", errors.left_l2);
        assert!(errors.right_l2 < 0.5, "right L2 error {}", errors.right_l2);

        // Closure: first and last nodes connect smoothly through the wrap
        let wrap = data.length - data.s.last().unwrap();
        assert!(wrap > 0.0);
        let n = data.s.len();
        let dx = data.x[0] - (data.x[n - 1] + wrap * data.theta[n - 1].cos());
        assert!(dx.abs() < 1.0, "closure x gap {}", dx);
    }
}
