use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::CoordinateSystem;
use crate::electrode::Contact;
use crate::prelude::{CoreResult, Vec3};
use crate::ros::Trajectory;

const FCSV_HEADER: [&str; 3] = [
    "# Markups fiducial file version = 4.11",
    "# CoordinateSystem = 0",
    "# columns = id,x,y,z,ow,ox,oy,oz,vis,sel,lock,label,desc,associatedNodeID",
];

#[derive(Debug, Clone, PartialEq)]
pub struct FcsvRow {
    pub label: String,
    pub xyz: Vec3,
}

/// Entry and target of each trajectory as two rows.
///
/// Labels are `<name>_entry` / `<name>_target`, or the bare name twice when
/// `same_label_pair` is set.
pub fn trajectory_rows(
    trajectories: &[Trajectory],
    coord: CoordinateSystem,
    same_label_pair: bool,
) -> Vec<FcsvRow> {
    let mut rows = Vec::with_capacity(trajectories.len() * 2);
    for traj in trajectories {
        let (entry_label, target_label) = if same_label_pair {
            (traj.name.clone(), traj.name.clone())
        } else {
            (format!("{}_entry", traj.name), format!("{}_target", traj.name))
        };
        rows.push(FcsvRow {
            label: entry_label,
            xyz: coord.convert(&traj.entry, None),
        });
        rows.push(FcsvRow {
            label: target_label,
            xyz: coord.convert(&traj.target, None),
        });
    }
    rows
}

pub fn contact_rows(contacts: &[Contact], coord: CoordinateSystem) -> Vec<FcsvRow> {
    contacts
        .iter()
        .map(|c| FcsvRow {
            label: c.label.clone(),
            xyz: coord.convert(&c.position_lps, None),
        })
        .collect()
}

pub fn write_fcsv<W: Write>(mut out: W, rows: &[FcsvRow]) -> CoreResult<()> {
    for line in FCSV_HEADER {
        writeln!(out, "{line}")?;
    }
    for (idx, row) in rows.iter().enumerate() {
        let [x, y, z] = row.xyz;
        writeln!(
            out,
            "{},{x:.6},{y:.6},{z:.6},0,0,0,1,1,1,0,{},,",
            idx + 1,
            row.label
        )?;
    }
    out.flush()?;
    Ok(())
}

pub fn save_fcsv<P: AsRef<Path>>(path: P, rows: &[FcsvRow]) -> CoreResult<()> {
    let file = File::create(path.as_ref())?;
    write_fcsv(BufWriter::new(file), rows)
}
