use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

use super::CoordinateSystem;
use crate::electrode::Contact;
use crate::prelude::{CoreResult, Vec3};
use crate::ros::Trajectory;

pub const MARKUPS_SCHEMA: &str = "https://raw.githubusercontent.com/slicer/slicer/master/Modules/Loadable/Markups/Resources/Schema/markups-schema-v1.0.0.json";

const IDENTITY_ORIENTATION: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkupsDocument {
    #[serde(rename = "@schema")]
    pub schema: String,
    pub markups: Vec<Markup>,
}

impl MarkupsDocument {
    pub fn new(markups: Vec<Markup>) -> Self {
        Self {
            schema: MARKUPS_SCHEMA.to_string(),
            markups,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> CoreResult<()> {
        fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Markup {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub coordinate_system: String,
    pub locked: bool,
    pub fixed_number_of_control_points: bool,
    pub label_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_control_point_number: Option<usize>,
    pub control_points: Vec<ControlPoint>,
    #[serde(default)]
    pub measurements: Vec<Value>,
    pub display: MarkupDisplay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub position: Vec3,
    pub orientation: [f64; 9],
    pub selected: bool,
    pub locked: bool,
    pub visibility: bool,
}

impl ControlPoint {
    fn new(label: String, position: Vec3) -> Self {
        Self {
            id: label.clone(),
            label,
            description: String::new(),
            position,
            orientation: IDENTITY_ORIENTATION,
            selected: true,
            locked: false,
            visibility: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkupDisplay {
    pub visibility: bool,
    pub opacity: f64,
    pub color: [f64; 3],
    pub selected_color: [f64; 3],
    pub properties_label_visibility: bool,
    pub point_labels_visibility: bool,
    pub glyph_type: String,
    pub glyph_scale: f64,
    pub text_scale: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_thickness: Option<f64>,
}

impl MarkupDisplay {
    fn styled(color: [f64; 3], selected_color: [f64; 3], labels: bool) -> Self {
        Self {
            visibility: true,
            opacity: 1.0,
            color,
            selected_color,
            properties_label_visibility: false,
            point_labels_visibility: labels,
            glyph_type: "Sphere3D".into(),
            glyph_scale: 1.0,
            text_scale: 1.0,
            line_thickness: None,
        }
    }
}

/// One Line markup per trajectory with `<name>_start` / `<name>_end` points.
///
/// `display_transform` maps root-frame LPS points into a display's own frame before the
/// coordinate conversion; pass the inverse of that display's composed matrix.
pub fn trajectory_lines(
    trajectories: &[Trajectory],
    coord: CoordinateSystem,
    display_transform: Option<&Matrix4<f64>>,
) -> MarkupsDocument {
    let markups = trajectories
        .iter()
        .map(|traj| {
            let start = coord.convert(&traj.entry, display_transform);
            let end = coord.convert(&traj.target, display_transform);
            Markup {
                kind: "Line".into(),
                name: traj.name.clone(),
                coordinate_system: coord.label().into(),
                locked: false,
                fixed_number_of_control_points: true,
                label_format: "%N".into(),
                last_used_control_point_number: Some(2),
                control_points: vec![
                    ControlPoint::new(format!("{}_start", traj.name), start),
                    ControlPoint::new(format!("{}_end", traj.name), end),
                ],
                measurements: Vec::new(),
                display: MarkupDisplay {
                    line_thickness: Some(0.2),
                    ..MarkupDisplay::styled([0.9, 0.2, 0.2], [1.0, 0.6, 0.2], false)
                },
            }
        })
        .collect();
    MarkupsDocument::new(markups)
}

/// A single Fiducial markup holding every contact, described by its model id.
pub fn contact_fiducials(contacts: &[Contact], coord: CoordinateSystem, node_name: &str) -> MarkupsDocument {
    let control_points = contacts
        .iter()
        .map(|c| ControlPoint {
            description: c.model_id.clone(),
            ..ControlPoint::new(c.label.clone(), coord.convert(&c.position_lps, None))
        })
        .collect();
    MarkupsDocument::new(vec![Markup {
        kind: "Fiducial".into(),
        name: node_name.to_string(),
        coordinate_system: coord.label().into(),
        locked: false,
        fixed_number_of_control_points: false,
        label_format: "%N-%d".into(),
        last_used_control_point_number: None,
        control_points,
        measurements: Vec::new(),
        display: MarkupDisplay::styled([1.0, 1.0, 0.2], [1.0, 0.8, 0.1], true),
    }])
}
