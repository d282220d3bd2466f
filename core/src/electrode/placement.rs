use nalgebra::{Point3, Unit, Vector3};
use serde::{Deserialize, Serialize};

use super::assignment::{Assignment, AssignmentDocument, TipAnchor};
use super::model::{ElectrodeLibrary, ElectrodeModel, GapKind};
use crate::prelude::{
    from_point, from_vector, to_point, CoreError, CoreResult, ItemOutcome, Vec3, LENGTH_EPSILON,
};
use crate::ros::Trajectory;
use crate::telemetry::LogManager;

/// Slack allowed when comparing the laid-out shaft against the model length.
const OVERFLOW_TOLERANCE_MM: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub trajectory: String,
    pub model_id: String,
    /// 1-based, counted from the tip.
    pub index: usize,
    pub label: String,
    pub position_lps: Vec3,
    pub tip_at: TipAnchor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SegmentKind {
    Contact { index: usize },
    Insulation { gap: GapKind },
    /// Insulated remainder between the last contact and the model length.
    Tail,
}

/// Cylinder along the shaft; `start_mm`/`end_mm` are distances from the tip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaftSegment {
    pub kind: SegmentKind,
    pub start_mm: f64,
    pub end_mm: f64,
    pub start_lps: Vec3,
    pub end_lps: Vec3,
    pub diameter_mm: f64,
}

/// Contact geometry for one trajectory, rebuilt from scratch on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSet {
    pub trajectory_name: String,
    pub model_id: String,
    pub tip_mode: TipAnchor,
    pub tip_lps: Vec3,
    /// Unit direction in which offsets grow (tip towards proximal end).
    pub axis_lps: Vec3,
    pub contacts: Vec<Contact>,
    pub shaft_segments: Vec<ShaftSegment>,
}

impl ContactSet {
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.contacts.iter().map(|c| to_point(&c.position_lps)).collect()
    }

    pub fn contact(&self, index: usize) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.index == index)
    }

    pub fn shaft_length_mm(&self) -> f64 {
        self.shaft_segments.last().map_or(0.0, |s| s.end_mm)
    }
}

/// Tip point and unit proximal axis for an anchor choice.
pub fn tip_and_axis(
    trajectory: &Trajectory,
    anchor: TipAnchor,
) -> CoreResult<(Point3<f64>, Unit<Vector3<f64>>)> {
    let entry = trajectory.entry_point();
    let target = trajectory.target_point();
    let (tip, towards) = match anchor {
        TipAnchor::Target => (target, entry),
        TipAnchor::Entry => (entry, target),
    };
    let d = towards - tip;
    if d.norm() <= LENGTH_EPSILON {
        return Err(CoreError::DegenerateTrajectory(trajectory.name.clone()));
    }
    Ok((tip, Unit::new_normalize(d)))
}

/// Places every contact of `model` on `trajectory`.
///
/// Contacts sit at `tip + axis * offset`. The result depends only on the inputs, so
/// regenerating after an edit replaces the previous set instead of adding to it.
pub fn place_contacts(
    trajectory: &Trajectory,
    model: &ElectrodeModel,
    assignment: &Assignment,
) -> CoreResult<ContactSet> {
    let (tip, axis) = tip_and_axis(trajectory, assignment.tip_at)?;
    let tip = tip + axis.into_inner() * assignment.tip_shift_mm
        + Vector3::from(assignment.xyz_offset_mm);

    let segments = layout_shaft(trajectory, model, &tip, &axis)?;

    let contacts = model
        .contact_center_offsets_from_tip_mm
        .iter()
        .enumerate()
        .map(|(i, &offset)| Contact {
            trajectory: trajectory.name.clone(),
            model_id: model.id.clone(),
            index: i + 1,
            label: format!("{}{}", trajectory.name, i + 1),
            position_lps: from_point(&(tip + axis.into_inner() * offset)),
            tip_at: assignment.tip_at,
        })
        .collect();

    Ok(ContactSet {
        trajectory_name: trajectory.name.clone(),
        model_id: model.id.clone(),
        tip_mode: assignment.tip_at,
        tip_lps: from_point(&tip),
        axis_lps: from_vector(&axis),
        contacts,
        shaft_segments: segments,
    })
}

fn layout_shaft(
    trajectory: &Trajectory,
    model: &ElectrodeModel,
    tip: &Point3<f64>,
    axis: &Unit<Vector3<f64>>,
) -> CoreResult<Vec<ShaftSegment>> {
    let segment = |kind, start_mm: f64, end_mm: f64| ShaftSegment {
        kind,
        start_mm,
        end_mm,
        start_lps: from_point(&(tip + axis.into_inner() * start_mm)),
        end_lps: from_point(&(tip + axis.into_inner() * end_mm)),
        diameter_mm: model.diameter_mm,
    };

    let mut segments = Vec::with_capacity(model.contact_count * 2);
    let mut cursor = 0.0;
    for i in 0..model.contact_count {
        let end = cursor + model.contact_length_mm;
        segments.push(segment(SegmentKind::Contact { index: i + 1 }, cursor, end));
        cursor = end;
        if i + 1 < model.contact_count {
            let gap = model.gap_after(i);
            let end = cursor + model.gap_mm(gap);
            if end > cursor {
                segments.push(segment(SegmentKind::Insulation { gap }, cursor, end));
            }
            cursor = end;
        }
    }

    let last_contact_end = model
        .contact_center_offsets_from_tip_mm
        .last()
        .map_or(0.0, |o| o + model.contact_length_mm / 2.0);
    let laid_out = cursor.max(last_contact_end);
    let limit = model.total_length_mm();
    if laid_out > limit + OVERFLOW_TOLERANCE_MM {
        return Err(CoreError::ElectrodeGeometryOverflow {
            trajectory: trajectory.name.clone(),
            model_id: model.id.clone(),
            laid_out_mm: laid_out,
            limit_mm: limit,
        });
    }
    if limit - cursor > OVERFLOW_TOLERANCE_MM {
        segments.push(segment(SegmentKind::Tail, cursor, limit));
    }
    Ok(segments)
}

/// Generates contacts for every assigned trajectory.
///
/// Each row yields its own outcome; a missing trajectory or model, or an overflowing
/// layout, is reported for that row only.
pub fn generate_contacts(
    trajectories: &[Trajectory],
    library: &ElectrodeLibrary,
    assignments: &AssignmentDocument,
) -> Vec<ItemOutcome<ContactSet>> {
    let logger = LogManager::new("contacts");
    let outcomes: Vec<ItemOutcome<ContactSet>> = assignments
        .by_trajectory()
        .into_values()
        .map(|assignment| {
            let result = trajectories
                .iter()
                .find(|t| t.name == assignment.trajectory)
                .ok_or_else(|| CoreError::UnknownTrajectory(assignment.trajectory.clone()))
                .and_then(|traj| {
                    let model = library.require(&assignment.model_id)?;
                    place_contacts(traj, model, &assignment)
                });
            if let Err(err) = &result {
                logger.skip(&format!("{}: {err}", assignment.trajectory));
            }
            (assignment.trajectory, result)
        })
        .collect();
    let generated: usize = outcomes
        .iter()
        .filter_map(|(_, r)| r.as_ref().ok())
        .map(ContactSet::len)
        .sum();
    logger.record(&format!(
        "generated {generated} contacts for {} trajectories",
        outcomes.len()
    ));
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::electrode::model::tests::uniform_model;
    use approx::assert_relative_eq;

    fn vertical() -> Trajectory {
        Trajectory::new("RHH", [0.0, 0.0, 0.0], [0.0, 0.0, -40.0])
    }

    #[test]
    fn single_zero_offset_lands_on_target() {
        let mut model = uniform_model("ONE", 1, 3.5);
        model.contact_center_offsets_from_tip_mm = vec![0.0];
        let set = place_contacts(&vertical(), &model, &Assignment::new("RHH", "ONE")).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.contacts[0].position_lps, [0.0, 0.0, -40.0]);
        assert_eq!(set.contacts[0].label, "RHH1");
    }

    #[test]
    fn placement_is_idempotent() {
        let lib = ElectrodeLibrary::bundled().unwrap();
        let model = lib.require("DIXI-15BM").unwrap();
        let traj = Trajectory::new("LHH", [12.5, -3.0, 40.0], [30.0, 20.0, -10.0]);
        let assignment = Assignment::new("LHH", "DIXI-15BM");
        let a = place_contacts(&traj, model, &assignment).unwrap();
        let b = place_contacts(&traj, model, &assignment).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn contacts_are_monotonic_for_every_bundled_model() {
        let lib = ElectrodeLibrary::bundled().unwrap();
        let traj = Trajectory::new("T", [5.0, 60.0, 20.0], [-10.0, -5.0, 0.0]);
        let entry = traj.entry_point();
        let deep = (traj.target_point() - entry).normalize();
        for model in lib.models() {
            for anchor in [TipAnchor::Target, TipAnchor::Entry] {
                let assignment = Assignment {
                    tip_at: anchor,
                    ..Assignment::new("T", model.id.clone())
                };
                let set = place_contacts(&traj, model, &assignment).unwrap();
                let depths: Vec<f64> = set
                    .positions()
                    .iter()
                    .map(|p| (p - entry).dot(&deep))
                    .collect();
                let monotonic = match anchor {
                    TipAnchor::Target => depths.windows(2).all(|w| w[1] < w[0]),
                    TipAnchor::Entry => depths.windows(2).all(|w| w[1] > w[0]),
                };
                assert!(monotonic, "{} {:?}", model.id, anchor);
                assert_eq!(set.len(), model.contact_count);
            }
        }
    }

    #[test]
    fn bundled_layouts_fill_exploration_length() {
        let lib = ElectrodeLibrary::bundled().unwrap();
        for model in lib.models() {
            let set = place_contacts(&vertical(), model, &Assignment::new("RHH", model.id.clone()))
                .unwrap();
            assert_relative_eq!(set.shaft_length_mm(), model.total_length_mm(), epsilon = 1e-9);
            let contact_segments = set
                .shaft_segments
                .iter()
                .filter(|s| matches!(s.kind, SegmentKind::Contact { .. }))
                .count();
            assert_eq!(contact_segments, model.contact_count);
        }
    }

    #[test]
    fn tip_shift_and_offset_move_the_tip() {
        let model = uniform_model("U", 3, 3.5);
        let assignment = Assignment {
            tip_shift_mm: 2.0,
            xyz_offset_mm: [1.0, 0.0, 0.0],
            ..Assignment::new("RHH", "U")
        };
        let set = place_contacts(&vertical(), &model, &assignment).unwrap();
        assert_relative_eq!(set.tip_lps[0], 1.0);
        assert_relative_eq!(set.tip_lps[2], -38.0);
        assert_relative_eq!(set.contacts[0].position_lps[2], -37.0);

        let from_entry = Assignment {
            tip_at: TipAnchor::Entry,
            ..Assignment::new("RHH", "U")
        };
        let set = place_contacts(&vertical(), &model, &from_entry).unwrap();
        assert_relative_eq!(set.contacts[2].position_lps[2], -8.0);
        assert_eq!(set.axis_lps, [0.0, 0.0, -1.0]);
    }

    #[test]
    fn overflowing_layout_is_reported() {
        let mut model = uniform_model("LONG", 4, 3.5);
        model.insulation_intra_mm = 10.0;
        let err = place_contacts(&vertical(), &model, &Assignment::new("RHH", "LONG")).unwrap_err();
        match err {
            CoreError::ElectrodeGeometryOverflow {
                laid_out_mm,
                limit_mm,
                ..
            } => {
                assert_relative_eq!(laid_out_mm, 38.0);
                assert_relative_eq!(limit_mm, 12.5);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn zero_length_trajectory_is_degenerate() {
        let model = uniform_model("U", 2, 3.5);
        let traj = Trajectory::new("Z", [1.0; 3], [1.0; 3]);
        assert!(matches!(
            place_contacts(&traj, &model, &Assignment::new("Z", "U")),
            Err(CoreError::DegenerateTrajectory(_))
        ));
    }

    #[test]
    fn batch_reports_each_row_separately() {
        let lib = ElectrodeLibrary::bundled().unwrap();
        let trajs = vec![vertical()];
        let doc = AssignmentDocument::from_json_str(
            r#"{"RHH": "DIXI-8AM", "GONE": "DIXI-8AM", "EMPTY": ""}"#,
        )
        .unwrap();
        let outcomes = generate_contacts(&trajs, &lib, &doc);
        assert_eq!(outcomes.len(), 2);
        let (name, gone) = &outcomes[0];
        assert_eq!(name, "GONE");
        assert!(matches!(gone, Err(CoreError::UnknownTrajectory(_))));
        assert_eq!(outcomes[1].1.as_ref().unwrap().len(), 8);

        let bad_model = AssignmentDocument::from_json_str(r#"{"RHH": "NOPE"}"#).unwrap();
        let outcomes = generate_contacts(&trajs, &lib, &bad_model);
        assert!(matches!(outcomes[0].1, Err(CoreError::UnknownModel(_))));
    }
}
