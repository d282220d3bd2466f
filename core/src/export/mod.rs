//! Host-facing export formats: Slicer markups, fiducial CSV and plain-text tables.

pub mod fcsv;
pub mod markups;
pub mod tables;

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::math::MatrixHelper;
use crate::prelude::{from_point, to_point, Vec3};

pub use fcsv::{contact_rows, save_fcsv, trajectory_rows, write_fcsv, FcsvRow};
pub use markups::{contact_fiducials, trajectory_lines, Markup, MarkupsDocument};
pub use tables::{save_contacts_json, write_aligned_txt, write_qc_csv, ContactsDocument};

/// Output frame for exported points. Inputs are always ROSA/LPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoordinateSystem {
    #[default]
    Ras,
    Lps,
}

impl CoordinateSystem {
    pub fn label(self) -> &'static str {
        match self {
            CoordinateSystem::Ras => "RAS",
            CoordinateSystem::Lps => "LPS",
        }
    }

    /// Maps an LPS point, optionally moved by `transform` first, into this frame.
    pub fn convert(self, lps: &Vec3, transform: Option<&Matrix4<f64>>) -> Vec3 {
        let p = match transform {
            Some(m) => MatrixHelper::apply(m, &to_point(lps)),
            None => to_point(lps),
        };
        match self {
            CoordinateSystem::Ras => from_point(&MatrixHelper::lps_to_ras_point(&p)),
            CoordinateSystem::Lps => from_point(&p),
        }
    }
}
