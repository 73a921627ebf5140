//! XML parsing for vehicle, track, options and trajectory documents
//!
//! All surfaces share one small event-tree representation ([`XmlNode`])
//! built on the quick-xml reader: vehicle descriptions flatten into a
//! parameter set keyed by slash-joined element paths, discrete track files
//! load their per-node arrays, and solved trajectories round-trip exactly
//! through the shortest-representation float formatting.

use crate::error::{Error, Result};
use crate::ocp::OcpTrajectory;
use crate::track::TrackData;
use crate::vehicle::params::ParameterSet;
use indexmap::IndexMap;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::str::FromStr;

/// One parsed XML element.
#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub name: String,
    pub attributes: IndexMap<String, String>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Parse a document into its root element.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event().map_err(Error::from)? {
                Event::Start(e) => {
                    stack.push(element_from_start(&e)?);
                }
                Event::Empty(e) => {
                    let node = element_from_start(&e)?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Text(e) => {
                    let decoded = e
                        .decode()
                        .map_err(|err| Error::invalid_value("text", "?", &err.to_string()))?;
                    let text = quick_xml::escape::unescape(&decoded)
                        .map_err(|err| Error::invalid_value("text", "?", &err.to_string()))?;
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(text.trim());
                    }
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| Error::internal("unbalanced XML end tag"))?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(Error::invalid_value(
                "xml",
                "truncated",
                "document ended with unclosed elements",
            ));
        }
        root.ok_or_else(|| Error::invalid_value("xml", "empty", "document has no root element"))
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Child with the given name, or a missing-key error.
    pub fn require_child(&self, name: &str) -> Result<&XmlNode> {
        self.child(name)
            .ok_or_else(|| Error::missing_key(name, &self.name))
    }

    /// Attribute value.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Text content parsed as a value.
    pub fn text_as<T: FromStr>(&self) -> Result<T> {
        self.text.trim().parse::<T>().map_err(|_| {
            Error::invalid_value(&self.name, &self.text, "could not parse the element text")
        })
    }

    /// Text content parsed as a whitespace/comma separated float list.
    pub fn text_as_floats(&self) -> Result<Vec<f64>> {
        self.text
            .split([' ', '\t', '\n', ','])
            .filter(|t| !t.is_empty())
            .map(|t| {
                t.parse::<f64>().map_err(|_| {
                    Error::invalid_value(&self.name, t, "could not parse a number in the list")
                })
            })
            .collect()
    }

    /// Child text parsed as a value, with a missing-key error when absent.
    pub fn child_value<T: FromStr>(&self, name: &str) -> Result<T> {
        self.require_child(name)?.text_as()
    }
}

fn element_from_start(e: &quick_xml::events::BytesStart<'_>) -> Result<XmlNode> {
    let mut node = XmlNode {
        name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        ..Default::default()
    };
    for attr in e.attributes() {
        let attr =
            attr.map_err(|err| Error::invalid_value("attribute", &node.name, &err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| Error::invalid_value(&key, &node.name, &err.to_string()))?
            .into_owned();
        node.attributes.insert(key, value);
    }
    Ok(node)
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None => {
            if root.is_some() {
                return Err(Error::invalid_value(
                    "xml",
                    "multiple roots",
                    "a document holds exactly one root element",
                ));
            }
            *root = Some(node);
            Ok(())
        }
    }
}

/// Flatten an element subtree into slash-joined parameter paths.
fn flatten_parameters(node: &XmlNode, prefix: &str, set: &mut ParameterSet) -> Result<()> {
    for child in &node.children {
        let path = if prefix.is_empty() {
            child.name.clone()
        } else {
            format!("{}/{}", prefix, child.name)
        };
        if child.children.is_empty() {
            let value: f64 = child.text.trim().parse().map_err(|_| {
                Error::invalid_value(&path, &child.text, "vehicle parameters must be numeric")
            })?;
            set.insert(&path, value);
        } else {
            flatten_parameters(child, &path, set)?;
        }
    }
    Ok(())
}

/// Supported vehicle types, as the XML `type` attribute spells them.
pub const VEHICLE_TYPES: [&str; 2] = ["f1-3dof", "kart-6dof"];

/// Parse a vehicle description into its type tag and parameter set.
pub fn parse_vehicle_str(xml: &str) -> Result<(String, ParameterSet)> {
    let root = XmlNode::parse(xml)?;
    let vehicle_type = root
        .attr("type")
        .ok_or_else(|| Error::missing_key("type", &root.name))?
        .to_string();
    if !VEHICLE_TYPES.contains(&vehicle_type.as_str()) {
        return Err(Error::unknown_vehicle_type(&vehicle_type, &VEHICLE_TYPES));
    }
    let mut set = ParameterSet::new();
    flatten_parameters(&root, "", &mut set)?;
    Ok((vehicle_type, set))
}

/// Parse a discrete track description into track data.
///
/// The root must carry `format="discrete"` and hold `n_points` plus the
/// per-node arrays `arclength`, `heading-angle`, `curvature`,
/// `distance-left-boundary`, `distance-right-boundary` and the coordinate
/// pairs under `centerline`. An optional `total-length` element closes the
/// loop; without it the wrap element length falls back to the chord between
/// the last and first centerline points.
pub fn parse_track_str(xml: &str) -> Result<TrackData> {
    let root = XmlNode::parse(xml)?;
    let format = root.attr("format").unwrap_or("");
    if format != "discrete" {
        return Err(Error::unsupported_track_format(format));
    }
    let closed = root.attr("closed") != Some("false");

    let n_points: usize = root.child_value("n_points")?;
    let s = root.require_child("arclength")?.text_as_floats()?;
    let theta = root.require_child("heading-angle")?.text_as_floats()?;
    let kappa = root.require_child("curvature")?.text_as_floats()?;
    let n_left = root
        .require_child("distance-left-boundary")?
        .text_as_floats()?;
    let n_right = root
        .require_child("distance-right-boundary")?
        .text_as_floats()?;
    let centerline = root.require_child("centerline")?;
    let x = centerline.require_child("x")?.text_as_floats()?;
    let y = centerline.require_child("y")?.text_as_floats()?;

    for (name, arr) in [
        ("arclength", &s),
        ("heading-angle", &theta),
        ("curvature", &kappa),
        ("distance-left-boundary", &n_left),
        ("distance-right-boundary", &n_right),
        ("centerline/x", &x),
        ("centerline/y", &y),
    ] {
        if arr.len() != n_points {
            return Err(Error::invalid_value(
                name,
                &arr.len().to_string(),
                &format!("expected n_points = {} entries", n_points),
            ));
        }
    }

    let mut s = s;
    let mut x = x;
    let mut y = y;
    let mut theta = theta;
    let mut kappa = kappa;
    let mut n_left = n_left;
    let mut n_right = n_right;

    let length = match root.child("total-length") {
        Some(node) => node.text_as()?,
        None if closed => {
            let last = n_points - 1;
            let chord = ((x[0] - x[last]).powi(2) + (y[0] - y[last]).powi(2)).sqrt();
            if chord > 1e-9 {
                s[last] + chord
            } else {
                // The file repeats the first node as the wrap duplicate:
                // drop it, its arclength is the total length
                let length = s[last];
                for arr in [&mut s, &mut x, &mut y, &mut theta, &mut kappa, &mut n_left, &mut n_right] {
                    arr.pop();
                }
                length
            }
        }
        None => s[n_points - 1],
    };

    let data = TrackData {
        s,
        x,
        y,
        theta,
        kappa,
        n_left,
        n_right,
        dkappa_ds: None,
        dn_left_ds: None,
        dn_right_ds: None,
        closed,
        length,
        left_boundary: None,
        right_boundary: None,
        projection: None,
        boundary_errors: None,
    };
    data.validate()?;
    Ok(data)
}

fn write_floats(out: &mut String, name: &str, values: &[f64], indent: &str) {
    out.push_str(indent);
    out.push('<');
    out.push_str(name);
    out.push('>');
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{}", v));
    }
    out.push_str("</");
    out.push_str(name);
    out.push_str(">\n");
}

/// Serialize a solved trajectory. Floats use the shortest representation
/// that round-trips exactly, so export-then-parse restores `q`, `q_a`, `u`
/// bit for bit.
pub fn serialize_trajectory(trajectory: &OcpTrajectory) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<laptime-trajectory n_points=\"{}\" laptime=\"{}\">\n",
        trajectory.len(),
        trajectory.laptime
    ));
    write_floats(&mut out, "arclength", &trajectory.s, "  ");
    write_floats(&mut out, "x", &trajectory.x, "  ");
    write_floats(&mut out, "y", &trajectory.y, "  ");
    write_floats(&mut out, "psi", &trajectory.psi, "  ");
    for (tag, rows) in [("q", &trajectory.q), ("qa", &trajectory.qa), ("u", &trajectory.u)] {
        out.push_str(&format!("  <{}>\n", tag));
        for row in rows.iter() {
            write_floats(&mut out, "node", row, "    ");
        }
        out.push_str(&format!("  </{}>\n", tag));
    }
    out.push_str("  <integral-values>\n");
    for (name, value) in &trajectory.integral_values {
        out.push_str(&format!(
            "    <quantity name=\"{}\">{}</quantity>\n",
            name, value
        ));
    }
    out.push_str("  </integral-values>\n");
    out.push_str("</laptime-trajectory>\n");
    out
}

fn parse_rows(node: &XmlNode) -> Result<Vec<Vec<f64>>> {
    node.children
        .iter()
        .filter(|c| c.name == "node")
        .map(|c| c.text_as_floats())
        .collect()
}

/// Parse a trajectory previously written by [`serialize_trajectory`].
pub fn parse_trajectory_str(xml: &str) -> Result<OcpTrajectory> {
    let root = XmlNode::parse(xml)?;
    if root.name != "laptime-trajectory" {
        return Err(Error::invalid_value(
            "root",
            &root.name,
            "expected a laptime-trajectory document",
        ));
    }
    let laptime: f64 = root
        .attr("laptime")
        .ok_or_else(|| Error::missing_key("laptime", &root.name))?
        .parse()
        .map_err(|_| Error::invalid_value("laptime", root.attr("laptime").unwrap_or(""), ""))?;

    let mut integral_values = Vec::new();
    if let Some(container) = root.child("integral-values") {
        for q in container.children.iter().filter(|c| c.name == "quantity") {
            let name = q
                .attr("name")
                .ok_or_else(|| Error::missing_key("name", "quantity"))?
                .to_string();
            integral_values.push((name, q.text_as()?));
        }
    }

    Ok(OcpTrajectory {
        s: root.require_child("arclength")?.text_as_floats()?,
        x: root.require_child("x")?.text_as_floats()?,
        y: root.require_child("y")?.text_as_floats()?,
        psi: root.require_child("psi")?.text_as_floats()?,
        q: parse_rows(root.require_child("q")?)?,
        qa: parse_rows(root.require_child("qa")?)?,
        u: parse_rows(root.require_child("u")?)?,
        laptime,
        integral_values,
        warm_start: None,
        sensitivities: None,
    })
}
