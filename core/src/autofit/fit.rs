use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use super::align::PatternAligner;
use super::corridor::Corridor;
use super::detect::{detect_candidates, DetectionConfig};
use super::volume::IntensityVolume;
use crate::electrode::{AssignmentDocument, ElectrodeLibrary, ElectrodeModel, TipAnchor};
use crate::math::{angle_between_deg, fit_line_pca, ransac_line, LineRansacOptions, StatsHelper};
use crate::prelude::{from_point, CoreError, CoreResult, ItemOutcome, Vec3, LENGTH_EPSILON};
use crate::ros::Trajectory;
use crate::telemetry::LogManager;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoFitConfig {
    pub corridor_radius_mm: f64,
    pub max_angle_deg: f64,
    pub max_depth_shift_mm: f64,
    /// Largest axial residual at which a detection still counts as a contact.
    pub match_tolerance_mm: f64,
    pub min_match_fraction: f64,
    pub min_candidates: usize,
    pub ransac: LineRansacOptions,
    pub detection: DetectionConfig,
}

impl Default for AutoFitConfig {
    fn default() -> Self {
        Self {
            corridor_radius_mm: 2.5,
            max_angle_deg: 12.0,
            max_depth_shift_mm: 20.0,
            match_tolerance_mm: 1.5,
            min_match_fraction: 0.5,
            min_candidates: 2,
            ransac: LineRansacOptions::default(),
            detection: DetectionConfig::default(),
        }
    }
}

impl AutoFitConfig {
    /// Along-axis slack of the search corridor beyond each planned endpoint.
    pub fn corridor_margin_mm(&self) -> f64 {
        self.max_depth_shift_mm + 5.0
    }

    pub fn validate(&self) -> CoreResult<()> {
        let checks = [
            ("corridor_radius_mm", self.corridor_radius_mm, self.corridor_radius_mm > 0.0),
            ("max_angle_deg", self.max_angle_deg, (0.0..=180.0).contains(&self.max_angle_deg)),
            ("max_depth_shift_mm", self.max_depth_shift_mm, self.max_depth_shift_mm >= 0.0),
            ("match_tolerance_mm", self.match_tolerance_mm, self.match_tolerance_mm > 0.0),
            (
                "min_match_fraction",
                self.min_match_fraction,
                (0.0..=1.0).contains(&self.min_match_fraction),
            ),
            (
                "ransac.inlier_threshold_mm",
                self.ransac.inlier_threshold_mm,
                self.ransac.inlier_threshold_mm > 0.0,
            ),
        ];
        if let Some((field, value, _)) = checks
            .iter()
            .find(|(_, value, ok)| !value.is_finite() || !ok)
        {
            return Err(CoreError::InvalidInput(format!(
                "autofit: {field} out of range: {value}"
            )));
        }
        self.detection.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactResidual {
    /// 1-based contact index.
    pub index: usize,
    pub detection: usize,
    pub axial_mm: f64,
    pub radial_mm: f64,
}

/// Fitted electrode placement; applying it replaces the trajectory endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub trajectory_name: String,
    pub model_id: String,
    pub tip_at: TipAnchor,
    pub detected_points: Vec<Vec3>,
    pub fitted_entry: Vec3,
    pub fitted_target: Vec3,
    pub residuals: Vec<ContactResidual>,
    pub matched_contacts: usize,
    pub expected_contacts: usize,
    pub angle_deg: f64,
    /// Signed target displacement along the fitted deep axis.
    pub tip_shift_mm: f64,
    pub lateral_shift_mm: f64,
    pub mean_residual_mm: f64,
    pub line_rms_mm: f64,
    /// `false` when RANSAC found no consensus and the axis comes from every candidate.
    pub consensus: bool,
    pub min_match_fraction: f64,
}

impl FitResult {
    pub fn match_fraction(&self) -> f64 {
        if self.expected_contacts == 0 {
            return 0.0;
        }
        self.matched_contacts as f64 / self.expected_contacts as f64
    }

    pub fn is_confident(&self) -> bool {
        self.match_fraction() + 1e-12 >= self.min_match_fraction
    }

    /// Advisory check; callers may still apply a fit that fails it.
    pub fn check_confidence(&self) -> CoreResult<()> {
        if self.is_confident() {
            Ok(())
        } else {
            Err(CoreError::FitConfidenceLow {
                trajectory: self.trajectory_name.clone(),
                matched: self.matched_contacts,
                expected: self.expected_contacts,
            })
        }
    }

    pub fn fitted_trajectory(&self) -> Trajectory {
        Trajectory::new(
            self.trajectory_name.clone(),
            self.fitted_entry,
            self.fitted_target,
        )
    }
}

/// Fits `model` to candidate points around `planned`.
///
/// The axis comes from a RANSAC line through the candidates, the depth from the
/// order-preserving alignment of their axial positions with the model's contact offsets.
/// The fitted segment keeps the planned length.
pub fn fit_points(
    planned: &Trajectory,
    candidates: &[Point3<f64>],
    model: &ElectrodeModel,
    tip_at: TipAnchor,
    config: &AutoFitConfig,
) -> CoreResult<FitResult> {
    config.validate()?;
    let name = planned.name.clone();
    let planned_length = planned.length_mm();
    if planned_length <= LENGTH_EPSILON {
        return Err(CoreError::DegenerateTrajectory(name));
    }
    let corridor = Corridor::around(planned, config.corridor_radius_mm, config.corridor_margin_mm())?;
    let deep_planned = corridor.deep_axis.into_inner();

    let points: Vec<Point3<f64>> = candidates
        .iter()
        .copied()
        .filter(|p| corridor.contains(p))
        .collect();
    let required = config.min_candidates.max(2);
    if points.len() < required {
        return Err(CoreError::InsufficientCandidates {
            trajectory: name,
            found: points.len(),
            required,
        });
    }

    let ransac = ransac_line(&points, &config.ransac).ok_or_else(|| CoreError::FitRejected {
        trajectory: name.clone(),
        reason: "candidate points do not define an axis".into(),
    })?;
    let mut line = ransac.line.oriented_along(&deep_planned);
    let angle = angle_between_deg(&deep_planned, &line.direction);
    if angle > config.max_angle_deg {
        return Err(CoreError::FitRejected {
            trajectory: name,
            reason: format!(
                "angle deviation {angle:.2} deg exceeds max {:.2}",
                config.max_angle_deg
            ),
        });
    }

    let planned_tip = match tip_at {
        TipAnchor::Target => planned.target_point(),
        TipAnchor::Entry => planned.entry_point(),
    };
    let sign = tip_at.offset_sign();
    let offsets = &model.contact_center_offsets_from_tip_mm;
    let positions: Vec<f64> = points.iter().map(|p| line.project(p)).collect();
    let aligner = PatternAligner {
        positions: &positions,
        offsets,
        sign,
        tolerance_mm: config.match_tolerance_mm,
    };
    let alignment = aligner.best_alignment(line.project(&planned_tip), config.max_depth_shift_mm);
    let mut shift = alignment.shift;

    // one PCA refit on the matched detections, then re-estimate the depth on it
    if alignment.matches.len() >= 2 {
        let matched: Vec<Point3<f64>> = alignment.matches.iter().map(|m| points[m.detection]).collect();
        if let Some(refit) = fit_line_pca(&matched) {
            let refit = refit.oriented_along(&deep_planned);
            if angle_between_deg(&deep_planned, &refit.direction) <= config.max_angle_deg {
                line = refit;
                let planned_shift = line.project(&planned_tip);
                let mean = alignment
                    .matches
                    .iter()
                    .map(|m| line.project(&points[m.detection]) - sign * offsets[m.contact])
                    .sum::<f64>()
                    / alignment.matches.len() as f64;
                shift = mean.clamp(
                    planned_shift - config.max_depth_shift_mm,
                    planned_shift + config.max_depth_shift_mm,
                );
            }
        }
    }

    let deep = line.direction.into_inner();
    let tip = line.at(shift);
    let (fitted_entry, fitted_target) = match tip_at {
        TipAnchor::Target => (tip - deep * planned_length, tip),
        TipAnchor::Entry => (tip, tip + deep * planned_length),
    };

    let residuals: Vec<ContactResidual> = alignment
        .matches
        .iter()
        .map(|m| {
            let p = &points[m.detection];
            ContactResidual {
                index: m.contact + 1,
                detection: m.detection,
                axial_mm: line.project(p) - (shift + sign * offsets[m.contact]),
                radial_mm: line.distance(p),
            }
        })
        .collect();
    let combined: Vec<f64> = residuals
        .iter()
        .map(|r| r.axial_mm.hypot(r.radial_mm))
        .collect();
    let radial: Vec<f64> = residuals.iter().map(|r| r.radial_mm).collect();

    let delta: Vector3<f64> = fitted_target - planned.target_point();
    let tip_shift_mm = delta.dot(&deep);
    let lateral_shift_mm = (delta - deep * tip_shift_mm).norm();

    Ok(FitResult {
        trajectory_name: name,
        model_id: model.id.clone(),
        tip_at,
        detected_points: points.iter().map(from_point).collect(),
        fitted_entry: from_point(&fitted_entry),
        fitted_target: from_point(&fitted_target),
        matched_contacts: residuals.len(),
        expected_contacts: offsets.len(),
        residuals,
        angle_deg: angle_between_deg(&deep_planned, &deep),
        tip_shift_mm,
        lateral_shift_mm,
        mean_residual_mm: StatsHelper::mean(&combined),
        line_rms_mm: if radial.is_empty() {
            ransac.inlier_rms
        } else {
            StatsHelper::rms(&radial)
        },
        consensus: ransac.consensus,
        min_match_fraction: config.min_match_fraction,
    })
}

/// Detects candidates in `volume` around `planned` and fits `model` to them.
pub fn autofit_trajectory<V: IntensityVolume + ?Sized>(
    volume: &V,
    planned: &Trajectory,
    model: &ElectrodeModel,
    tip_at: TipAnchor,
    config: &AutoFitConfig,
) -> CoreResult<FitResult> {
    config.validate()?;
    let corridor = Corridor::around(planned, config.corridor_radius_mm, config.corridor_margin_mm())?;
    let report = detect_candidates(volume, &corridor, &config.detection)?;
    fit_points(planned, &report.points(), model, tip_at, config)
}

/// Fits every assigned trajectory; failures are reported per trajectory.
pub fn fit_all<V: IntensityVolume + ?Sized>(
    volume: &V,
    trajectories: &[Trajectory],
    assignments: &AssignmentDocument,
    library: &ElectrodeLibrary,
    config: &AutoFitConfig,
) -> Vec<ItemOutcome<FitResult>> {
    let logger = LogManager::new("autofit");
    let outcomes: Vec<ItemOutcome<FitResult>> = assignments
        .by_trajectory()
        .into_values()
        .map(|assignment| {
            let result = trajectories
                .iter()
                .find(|t| t.name == assignment.trajectory)
                .ok_or_else(|| CoreError::UnknownTrajectory(assignment.trajectory.clone()))
                .and_then(|planned| {
                    let model = library.require(&assignment.model_id)?;
                    autofit_trajectory(volume, planned, model, assignment.tip_at, config)
                });
            match &result {
                Ok(fit) if !fit.is_confident() => logger.skip(&format!(
                    "{}: low confidence, {}/{} contacts matched",
                    fit.trajectory_name, fit.matched_contacts, fit.expected_contacts
                )),
                Ok(fit) => logger.detail(&format!(
                    "{}: angle {:.2} deg, tip shift {:.2} mm, residual {:.2} mm",
                    fit.trajectory_name, fit.angle_deg, fit.tip_shift_mm, fit.mean_residual_mm
                )),
                Err(err) => logger.skip(&format!("{}: {err}", assignment.trajectory)),
            }
            (assignment.trajectory, result)
        })
        .collect();
    let fitted = outcomes.iter().filter(|(_, r)| r.is_ok()).count();
    logger.record(&format!("fitted {fitted}/{} trajectories", outcomes.len()));
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autofit::detect::tests::column_volume;
    use crate::electrode::Assignment;
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Translation3, UnitQuaternion};

    fn model(id: &str) -> ElectrodeModel {
        ElectrodeLibrary::bundled().unwrap().require(id).unwrap().clone()
    }

    fn planned() -> Trajectory {
        Trajectory::new("RHH", [0.0, 0.0, 0.0], [0.0, 0.0, -50.0])
    }

    /// Contacts of a target-anchored electrode whose tip sits at `target`.
    fn contacts(target: Point3<f64>, entry: Point3<f64>, offsets: &[f64]) -> Vec<Point3<f64>> {
        let up = (entry - target).normalize();
        offsets.iter().map(|&o| target + up * o).collect()
    }

    #[test]
    fn recovers_tilted_shifted_electrode() {
        let m = model("DIXI-8AM");
        let true_target = Point3::new(1.0, 0.0, -52.0);
        let true_entry = Point3::new(-1.0, 0.0, -2.0);
        let mut pts = contacts(true_target, true_entry, &m.contact_center_offsets_from_tip_mm);
        pts.push(Point3::new(2.0, 0.0, -30.0));

        let fit = fit_points(&planned(), &pts, &m, TipAnchor::Target, &AutoFitConfig::default())
            .unwrap();
        assert_eq!(fit.matched_contacts, 8);
        assert!(fit.check_confidence().is_ok());
        let target = Point3::from(Vector3::from(fit.fitted_target));
        assert_relative_eq!(target, true_target, epsilon = 1e-6);
        let fitted = fit.fitted_trajectory();
        assert_relative_eq!(fitted.length_mm(), 50.0, epsilon = 1e-9);
        assert!(fit.residuals.iter().all(|r| r.axial_mm.abs() < 1e-6 && r.radial_mm < 1e-6));
        assert!(fit.residuals.iter().all(|r| r.detection != 8));
        assert!(fit.angle_deg > 2.0 && fit.angle_deg < 2.5);
        assert_relative_eq!(fit.tip_shift_mm, (true_target - Point3::new(0.0, 0.0, -50.0)).dot(&(true_target - true_entry).normalize()), epsilon = 1e-6);
    }

    #[test]
    fn fit_is_equivariant_under_rigid_motion() {
        let m = model("DIXI-10AM");
        let pts = contacts(
            Point3::new(0.5, -0.5, -48.0),
            Point3::new(-1.0, 1.0, 1.0),
            &m.contact_center_offsets_from_tip_mm,
        );
        let config = AutoFitConfig::default();
        let base = fit_points(&planned(), &pts, &m, TipAnchor::Target, &config).unwrap();

        let motion = Isometry3::from_parts(
            Translation3::new(12.0, -7.5, 30.0),
            UnitQuaternion::from_euler_angles(0.4, -0.3, 1.1),
        );
        let moved_pts: Vec<Point3<f64>> = pts.iter().map(|p| motion * p).collect();
        let plan = planned();
        let moved_plan = Trajectory::new(
            "RHH",
            from_point(&(motion * plan.entry_point())),
            from_point(&(motion * plan.target_point())),
        );
        let moved = fit_points(&moved_plan, &moved_pts, &m, TipAnchor::Target, &config).unwrap();

        let expect_target = motion * Point3::from(Vector3::from(base.fitted_target));
        let expect_entry = motion * Point3::from(Vector3::from(base.fitted_entry));
        assert_relative_eq!(Point3::from(Vector3::from(moved.fitted_target)), expect_target, epsilon = 1e-6);
        assert_relative_eq!(Point3::from(Vector3::from(moved.fitted_entry)), expect_entry, epsilon = 1e-6);
        assert_eq!(moved.matched_contacts, base.matched_contacts);
        assert_relative_eq!(moved.angle_deg, base.angle_deg, epsilon = 1e-6);
    }

    #[test]
    fn entry_anchor_fits_from_the_entry_side() {
        let m = model("DIXI-5AM");
        let pts: Vec<Point3<f64>> = m
            .contact_center_offsets_from_tip_mm
            .iter()
            .map(|o| Point3::new(0.0, 0.0, -1.0 - o))
            .collect();
        let fit = fit_points(&planned(), &pts, &m, TipAnchor::Entry, &AutoFitConfig::default())
            .unwrap();
        assert_eq!(fit.matched_contacts, 5);
        assert_relative_eq!(fit.fitted_entry[2], -1.0, epsilon = 1e-9);
        assert_relative_eq!(fit.fitted_target[2], -51.0, epsilon = 1e-9);
    }

    #[test]
    fn sparse_detections_are_flagged_low_confidence() {
        let m = model("DIXI-8AM");
        let all = contacts(
            Point3::new(0.0, 0.0, -50.0),
            Point3::origin(),
            &m.contact_center_offsets_from_tip_mm,
        );
        let fit = fit_points(&planned(), &all[..3], &m, TipAnchor::Target, &AutoFitConfig::default())
            .unwrap();
        assert_eq!(fit.matched_contacts, 3);
        assert!(matches!(
            fit.check_confidence(),
            Err(CoreError::FitConfidenceLow { matched: 3, expected: 8, .. })
        ));
    }

    #[test]
    fn too_few_or_misaligned_candidates_are_rejected() {
        let m = model("DIXI-5AM");
        let err = fit_points(&planned(), &[Point3::new(0.0, 0.0, -40.0)], &m, TipAnchor::Target, &AutoFitConfig::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientCandidates { found: 1, .. }));

        let tilted: Vec<Point3<f64>> = (0..6)
            .map(|i| {
                let t = i as f64 * 3.5;
                Point3::new(t * 0.5, 0.0, -50.0 + t * 0.866)
            })
            .collect();
        let config = AutoFitConfig {
            corridor_radius_mm: 40.0,
            ..Default::default()
        };
        let err = fit_points(&planned(), &tilted, &m, TipAnchor::Target, &config).unwrap_err();
        assert!(matches!(err, CoreError::FitRejected { .. }));
    }

    #[test]
    fn out_of_range_config_is_an_error_not_a_panic() {
        let m = model("DIXI-5AM");
        let points = contacts(Point3::new(0.0, 0.0, -50.0), Point3::origin(), &m.contact_center_offsets_from_tip_mm);
        for config in [
            AutoFitConfig {
                max_depth_shift_mm: -1.0,
                ..Default::default()
            },
            AutoFitConfig {
                max_depth_shift_mm: f64::NAN,
                ..Default::default()
            },
            AutoFitConfig {
                min_match_fraction: 1.5,
                ..Default::default()
            },
        ] {
            let err = fit_points(&planned(), &points, &m, TipAnchor::Target, &config).unwrap_err();
            assert!(matches!(err, CoreError::InvalidInput(_)));
        }

        let vol = column_volume(&[12, 15]);
        let config = AutoFitConfig {
            detection: DetectionConfig {
                max_cluster_length_mm: 1e-6,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = autofit_trajectory(&vol, &planned(), &m, TipAnchor::Target, &config).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
        assert!(AutoFitConfig::default().validate().is_ok());
    }

    #[test]
    fn volume_fit_finds_blob_pattern() {
        let vol = column_volume(&[12, 15, 19, 22, 26]);
        let plan = Trajectory::new("RHH", [10.0, 10.0, 70.0], [10.0, 10.0, 10.0]);
        let m = model("DIXI-5AM");
        let fit = autofit_trajectory(&vol, &plan, &m, TipAnchor::Target, &AutoFitConfig::default())
            .unwrap();
        assert_eq!(fit.detected_points.len(), 5);
        assert_eq!(fit.matched_contacts, 5);
        assert_relative_eq!(fit.fitted_target[2], 11.3, epsilon = 1e-6);
        assert_relative_eq!(fit.fitted_entry[2], 71.3, epsilon = 1e-6);
        assert_relative_eq!(fit.fitted_target[0], 10.0, epsilon = 1e-6);

        let doc = AssignmentDocument {
            schema_version: "1.0".into(),
            assignments: vec![Assignment::new("RHH", "DIXI-5AM"), Assignment::new("MISSING", "DIXI-5AM")],
        };
        let lib = ElectrodeLibrary::bundled().unwrap();
        let outcomes = fit_all(&vol, &[plan], &doc, &lib, &AutoFitConfig::default());
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].1.is_err());
        assert_eq!(outcomes[1].1.as_ref().unwrap().matched_contacts, 5);
    }
}
