//! Deviation statistics between planned and final electrode geometry.

use nalgebra::{Unit, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::electrode::ContactSet;
use crate::math::{angle_between_deg, StatsHelper};
use crate::prelude::{to_point, CoreError, CoreResult, ItemOutcome, LENGTH_EPSILON};
use crate::ros::Trajectory;
use crate::telemetry::LogManager;

pub const QC_CSV_COLUMNS: [&str; 8] = [
    "trajectory",
    "entry_radial_mm",
    "target_radial_mm",
    "mean_contact_radial_mm",
    "max_contact_radial_mm",
    "rms_contact_radial_mm",
    "angle_deg",
    "matched_contacts",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcRecord {
    pub trajectory: String,
    pub entry_radial_mm: f64,
    pub target_radial_mm: f64,
    pub mean_contact_radial_mm: f64,
    pub max_contact_radial_mm: f64,
    pub rms_contact_radial_mm: f64,
    pub angle_deg: f64,
    pub matched_contacts: usize,
}

fn shaft_axis(trajectory: &Trajectory) -> CoreResult<Unit<Vector3<f64>>> {
    let d = trajectory.target_point() - trajectory.entry_point();
    if d.norm() <= LENGTH_EPSILON {
        return Err(CoreError::DegenerateTrajectory(trajectory.name.clone()));
    }
    Ok(Unit::new_normalize(d))
}

/// Length of the component of `delta` perpendicular to `axis`.
fn radial_mm(delta: &Vector3<f64>, axis: &Unit<Vector3<f64>>) -> f64 {
    (delta - axis.into_inner() * delta.dot(axis)).norm()
}

/// QC for one trajectory.
///
/// Contacts are paired by index. Returns `None` when there is no planned contact set or
/// no index is present in both sets.
pub fn compute_qc(
    planned: &Trajectory,
    planned_contacts: Option<&ContactSet>,
    final_trajectory: &Trajectory,
    final_contacts: &ContactSet,
) -> CoreResult<Option<QcRecord>> {
    let Some(planned_contacts) = planned_contacts else {
        return Ok(None);
    };
    let axis = shaft_axis(planned)?;
    let final_axis = shaft_axis(final_trajectory)?;

    let radial: Vec<f64> = final_contacts
        .contacts
        .iter()
        .filter_map(|c| {
            planned_contacts.contact(c.index).map(|p| {
                radial_mm(&(to_point(&c.position_lps) - to_point(&p.position_lps)), &axis)
            })
        })
        .collect();
    if radial.is_empty() {
        return Ok(None);
    }

    Ok(Some(QcRecord {
        trajectory: final_trajectory.name.clone(),
        entry_radial_mm: radial_mm(
            &(final_trajectory.entry_point() - planned.entry_point()),
            &axis,
        ),
        target_radial_mm: radial_mm(
            &(final_trajectory.target_point() - planned.target_point()),
            &axis,
        ),
        mean_contact_radial_mm: StatsHelper::mean(&radial),
        max_contact_radial_mm: StatsHelper::max(&radial),
        rms_contact_radial_mm: StatsHelper::rms(&radial),
        angle_deg: angle_between_deg(&axis, &final_axis),
        matched_contacts: radial.len(),
    }))
}

/// QC for every trajectory that has final contacts, in name order.
///
/// Trajectories without a planned counterpart or without shared contact indices are
/// left out rather than reported as zero.
pub fn qc_report(
    planned_trajectories: &[Trajectory],
    planned_contacts: &[ContactSet],
    final_trajectories: &[Trajectory],
    final_contacts: &[ContactSet],
) -> Vec<ItemOutcome<QcRecord>> {
    let logger = LogManager::new("qc");
    let planned_sets: BTreeMap<&str, &ContactSet> = planned_contacts
        .iter()
        .map(|s| (s.trajectory_name.as_str(), s))
        .collect();
    let final_sets: BTreeMap<&str, &ContactSet> = final_contacts
        .iter()
        .map(|s| (s.trajectory_name.as_str(), s))
        .collect();

    let mut outcomes = Vec::new();
    for (name, final_set) in final_sets {
        let planned = planned_trajectories.iter().find(|t| t.name == name);
        let current = final_trajectories.iter().find(|t| t.name == name);
        let (Some(planned), Some(current)) = (planned, current) else {
            logger.detail(&format!("{name}: no planned/final trajectory pair"));
            continue;
        };
        match compute_qc(planned, planned_sets.get(name).copied(), current, final_set) {
            Ok(Some(record)) => outcomes.push((name.to_string(), Ok(record))),
            Ok(None) => logger.detail(&format!("{name}: no planned contacts to compare")),
            Err(err) => {
                logger.skip(&format!("{name}: {err}"));
                outcomes.push((name.to_string(), Err(err)));
            }
        }
    }
    logger.record(&format!("computed QC for {} trajectories", outcomes.len()));
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::electrode::{place_contacts, Assignment, ElectrodeLibrary};
    use approx::assert_relative_eq;

    fn placed(traj: &Trajectory) -> ContactSet {
        let lib = ElectrodeLibrary::bundled().unwrap();
        let model = lib.require("DIXI-10AM").unwrap();
        place_contacts(traj, model, &Assignment::new(traj.name.clone(), "DIXI-10AM")).unwrap()
    }

    #[test]
    fn identical_geometry_yields_zero_metrics() {
        let traj = Trajectory::new("RHH", [12.3, -40.1, 22.0], [30.5, -10.0, -5.25]);
        let set = placed(&traj);
        let record = compute_qc(&traj, Some(&set), &traj, &set).unwrap().unwrap();
        assert_eq!(record.entry_radial_mm, 0.0);
        assert_eq!(record.target_radial_mm, 0.0);
        assert_eq!(record.mean_contact_radial_mm, 0.0);
        assert_eq!(record.max_contact_radial_mm, 0.0);
        assert_eq!(record.rms_contact_radial_mm, 0.0);
        assert_eq!(record.angle_deg, 0.0);
        assert_eq!(record.matched_contacts, 10);
    }

    #[test]
    fn lateral_offset_is_radial_and_axial_offset_is_not() {
        let planned = Trajectory::new("RHH", [0.0, 0.0, 0.0], [0.0, 0.0, -50.0]);
        let moved = Trajectory::new("RHH", [2.0, 0.0, -3.0], [2.0, 0.0, -53.0]);
        let record = compute_qc(&planned, Some(&placed(&planned)), &moved, &placed(&moved))
            .unwrap()
            .unwrap();
        assert_relative_eq!(record.entry_radial_mm, 2.0);
        assert_relative_eq!(record.target_radial_mm, 2.0);
        assert_relative_eq!(record.mean_contact_radial_mm, 2.0);
        assert_relative_eq!(record.rms_contact_radial_mm, 2.0);
        assert_eq!(record.angle_deg, 0.0);
    }

    #[test]
    fn tilt_reports_angle() {
        let planned = Trajectory::new("RHH", [0.0, 0.0, 0.0], [0.0, 0.0, -50.0]);
        let tilted = Trajectory::new("RHH", [-50.0, 0.0, 0.0], [0.0, 0.0, -50.0]);
        let record = compute_qc(&planned, Some(&placed(&planned)), &tilted, &placed(&tilted))
            .unwrap()
            .unwrap();
        assert_relative_eq!(record.angle_deg, 45.0, epsilon = 1e-9);
        assert_relative_eq!(record.entry_radial_mm, 50.0, epsilon = 1e-9);
        assert_eq!(record.target_radial_mm, 0.0);
    }

    #[test]
    fn missing_planned_contacts_omit_the_record() {
        let traj = Trajectory::new("RHH", [0.0; 3], [0.0, 0.0, -50.0]);
        let set = placed(&traj);
        assert!(compute_qc(&traj, None, &traj, &set).unwrap().is_none());

        let other = Trajectory::new("LAM", [5.0; 3], [5.0, 5.0, -45.0]);
        let other_set = placed(&other);
        let rows = qc_report(
            &[traj.clone()],
            &[set.clone()],
            &[traj.clone(), other.clone()],
            &[set, other_set],
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "RHH");
    }
}
