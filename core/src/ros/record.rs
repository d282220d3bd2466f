use nalgebra::{Matrix4, Point3};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::token::Section;
use crate::prelude::{to_point, Vec3};

/// One display (volume registration frame) declared by a `TRdicomRdisplay` + `VOLUME` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayEntry {
    pub index: usize,
    /// Volume name: the last component of the `VOLUME` path.
    pub name: String,
    /// `VOLUME` path with backslashes normalised to `/`.
    pub volume_path: String,
    pub imagery_name: Option<String>,
    pub serie_uid: Option<String>,
    /// `TRdicomRdisplay`: maps this display's frame into its parent's frame.
    pub transform: Matrix4<f64>,
    /// `IMAGERY_3DREF`; `None` or a self reference marks a root.
    pub parent_index: Option<usize>,
}

impl DisplayEntry {
    pub fn parent(&self) -> Option<usize> {
        self.parent_index.filter(|&p| p != self.index)
    }
}

/// A named entry -> target line in the ROSA/LPS frame. The target is the distal tip end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub name: String,
    #[serde(alias = "start")]
    pub entry: Vec3,
    #[serde(alias = "end")]
    pub target: Vec3,
}

impl Trajectory {
    pub fn new(name: impl Into<String>, entry: Vec3, target: Vec3) -> Self {
        Self {
            name: name.into(),
            entry,
            target,
        }
    }

    pub fn entry_point(&self) -> Point3<f64> {
        to_point(&self.entry)
    }

    pub fn target_point(&self) -> Point3<f64> {
        to_point(&self.target)
    }

    pub fn length_mm(&self) -> f64 {
        (self.target_point() - self.entry_point()).norm()
    }
}

/// Parsed content of a `.ros` file.
#[derive(Debug, Clone, Default)]
pub struct RosFile {
    pub displays: Vec<DisplayEntry>,
    pub trajectories: Vec<Trajectory>,
    /// Sections that are not interpreted, kept in file order.
    pub passthrough: Vec<Section>,
    pub source: Option<PathBuf>,
}

impl RosFile {
    /// Case-insensitive lookup of a display by volume name.
    pub fn display_index(&self, volume_name: &str) -> Option<usize> {
        self.displays
            .iter()
            .position(|d| d.name.eq_ignore_ascii_case(volume_name))
    }

    pub fn volume_names(&self) -> Vec<&str> {
        self.displays.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn trajectory(&self, name: &str) -> Option<&Trajectory> {
        self.trajectories.iter().find(|t| t.name == name)
    }
}
