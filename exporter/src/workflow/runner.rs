use crate::volume::load_nifti_volume;
use crate::workflow::config::WorkflowConfig;
use anyhow::{bail, Context};
use rosacore::autofit::{fit_all, FitResult};
use rosacore::electrode::{
    generate_contacts, AssignmentDocument, Contact, ContactSession, ContactSet, Suggestion,
    TipAnchor,
};
use rosacore::export::{
    contact_fiducials, contact_rows, save_contacts_json, save_fcsv, trajectory_lines,
    trajectory_rows, write_aligned_txt, write_qc_csv, ContactsDocument, CoordinateSystem,
};
use rosacore::math::MatrixHelper;
use rosacore::qc::{qc_report, QcRecord};
use rosacore::ros::Trajectory;
use rosacore::telemetry::LogManager;
use rosacore::transform::{resolve_reference_index, to_itk_affine_text};
use rosacore::{parse_ros_file, ItemOutcome, RosFile, TransformChain};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Trajectory-level failures collected from a batch, as `(name, message)`.
pub type Failures = Vec<(String, String)>;

#[derive(Debug, Default)]
pub struct ContactsSummary {
    pub trajectories: usize,
    pub contacts: usize,
    pub failures: Failures,
}

#[derive(Debug, Default)]
pub struct AutofitSummary {
    pub fitted: usize,
    pub applied: usize,
    pub low_confidence: Vec<String>,
    pub failures: Failures,
    pub qc_records: usize,
}

/// Output of `autofit`, read back by `qc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    pub ros_path: String,
    pub fits: Vec<FitResult>,
    /// Trajectories after the confident fits were applied.
    pub trajectories: Vec<Trajectory>,
}

#[derive(Debug, Clone, Default)]
pub struct AutofitOutputs {
    pub fits: PathBuf,
    pub contacts: Option<PathBuf>,
    pub qc_csv: Option<PathBuf>,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
    logger: LogManager,
}

fn split_outcomes<T>(outcomes: Vec<ItemOutcome<T>>) -> (Vec<T>, Failures) {
    let mut ok = Vec::new();
    let mut failures = Vec::new();
    for (name, result) in outcomes {
        match result {
            Ok(value) => ok.push(value),
            Err(err) => failures.push((name, err.to_string())),
        }
    }
    (ok, failures)
}

fn flatten_contacts(sets: &[ContactSet]) -> Vec<Contact> {
    sets.iter().flat_map(|s| s.contacts.iter().cloned()).collect()
}

fn create(path: &Path) -> anyhow::Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output folder {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            logger: LogManager::new("export"),
        }
    }

    pub fn load_ros(&self, path: &Path) -> anyhow::Result<RosFile> {
        parse_ros_file(path).with_context(|| format!("parsing {}", path.display()))
    }

    fn chain(&self, ros: &RosFile) -> anyhow::Result<TransformChain> {
        TransformChain::for_ros(ros, self.config.reference_volume.as_deref())
            .context("resolving display transform chain")
    }

    fn volume_index(&self, ros: &RosFile, name: &str) -> anyhow::Result<usize> {
        resolve_reference_index(ros, Some(name)).context("looking up volume")
    }

    fn load_assignments(&self, path: &Path) -> anyhow::Result<AssignmentDocument> {
        AssignmentDocument::load(path)
            .with_context(|| format!("reading assignments {}", path.display()))
    }

    /// Human-readable listing of displays (with their composed matrices) and trajectories.
    pub fn list(&self, ros_path: &Path) -> anyhow::Result<String> {
        let ros = self.load_ros(ros_path)?;
        let chain = self.chain(&ros)?;
        let mut out = format!("ROS: {}\n", ros_path.display());
        out.push_str(&format!(
            "Displays: {} (root {})\n",
            ros.displays.len(),
            ros.displays.get(chain.root()).map_or("-", |d| d.name.as_str())
        ));
        for display in &ros.displays {
            out.push_str(&format!(
                "volume={} imagery={} serie_uid={} imagery_3dref={}\n",
                display.name,
                display.imagery_name.as_deref().unwrap_or(""),
                display.serie_uid.as_deref().unwrap_or(""),
                display.parent_index.map(|p| p.to_string()).unwrap_or_default()
            ));
            if let Some(matrix) = chain.to_root(display.index) {
                for row in MatrixHelper::to_row_major(matrix) {
                    let cells: Vec<String> = row.iter().map(|x| format!("{x:>12.6}")).collect();
                    out.push_str(&format!("  {}\n", cells.join(" ")));
                }
            }
        }
        out.push_str(&format!("Trajectories: {}\n", ros.trajectories.len()));
        for traj in &ros.trajectories {
            out.push_str(&format!("  {} length={:.2} mm\n", traj.name, traj.length_mm()));
        }
        Ok(out)
    }

    /// Writes trajectory lines as Slicer markups; returns the number of trajectories.
    pub fn markups(
        &self,
        ros_path: &Path,
        out: &Path,
        coord: CoordinateSystem,
        volume_name: Option<&str>,
    ) -> anyhow::Result<usize> {
        let ros = self.load_ros(ros_path)?;
        let display_transform = match volume_name {
            Some(name) => {
                let chain = self.chain(&ros)?;
                let index = self.volume_index(&ros, name)?;
                let to_root = chain
                    .to_root(index)
                    .with_context(|| format!("no composed matrix for {name}"))?;
                Some(MatrixHelper::invert(to_root).context("inverting display matrix")?)
            }
            None => None,
        };
        let doc = trajectory_lines(&ros.trajectories, coord, display_transform.as_ref());
        doc.save(out)
            .with_context(|| format!("writing markups {}", out.display()))?;
        Ok(doc.markups.len())
    }

    pub fn fcsv(
        &self,
        ros_path: &Path,
        out: &Path,
        coord: CoordinateSystem,
        same_label_pair: bool,
    ) -> anyhow::Result<usize> {
        let ros = self.load_ros(ros_path)?;
        let rows = trajectory_rows(&ros.trajectories, coord, same_label_pair);
        save_fcsv(out, &rows).with_context(|| format!("writing {}", out.display()))?;
        Ok(rows.len())
    }

    /// Writes one display's composed matrix as an ITK transform.
    ///
    /// The matrix stays in ROSA/LPS unless `ras` asks for the host (RAS) form. `invert` falls
    /// back to the workflow's setting when not given.
    pub fn tfm(
        &self,
        ros_path: &Path,
        volume_name: &str,
        out: &Path,
        ras: bool,
        invert: Option<bool>,
    ) -> anyhow::Result<()> {
        let ros = self.load_ros(ros_path)?;
        let chain = self.chain(&ros)?;
        let index = self.volume_index(&ros, volume_name)?;
        let invert = invert.unwrap_or(self.config.invert);
        let matrix = if ras {
            chain
                .host_matrix(index, invert)
                .with_context(|| format!("host matrix for {volume_name}"))?
        } else {
            let matrix = chain
                .to_root(index)
                .with_context(|| format!("no composed matrix for {volume_name}"))?;
            if invert {
                MatrixHelper::invert(matrix).context("inverting transform")?
            } else {
                *matrix
            }
        };
        fs::write(out, to_itk_affine_text(&matrix))
            .with_context(|| format!("writing {}", out.display()))?;
        Ok(())
    }

    pub fn contacts_template(
        &self,
        ros_path: &Path,
        out: &Path,
        default_model_id: Option<&str>,
        tip_at: TipAnchor,
    ) -> anyhow::Result<usize> {
        let ros = self.load_ros(ros_path)?;
        let model_id = default_model_id.unwrap_or_default();
        if !model_id.is_empty() {
            self.config.library()?.require(model_id)?;
        }
        let doc = AssignmentDocument::template(&ros.trajectories, model_id, tip_at);
        doc.save(out)
            .with_context(|| format!("writing {}", out.display()))?;
        Ok(doc.assignments.len())
    }

    fn generate(
        &self,
        trajectories: &[Trajectory],
        assignments: &AssignmentDocument,
    ) -> anyhow::Result<(Vec<ContactSet>, Failures)> {
        let library = self.config.library()?;
        Ok(split_outcomes(generate_contacts(
            trajectories,
            &library,
            assignments,
        )))
    }

    fn contacts_document(&self, ros_path: &Path, contacts: Vec<Contact>) -> ContactsDocument {
        let metadata = BTreeMap::from([
            ("ros_path".to_string(), ros_path.display().to_string()),
            ("electrode_library".to_string(), self.config.library_label()),
        ]);
        ContactsDocument::new(contacts, metadata)
    }

    /// Places contacts for every assigned trajectory and writes the requested outputs.
    pub fn contacts_generate(
        &self,
        ros_path: &Path,
        assignments_path: &Path,
        out_json: &Path,
        out_fcsv: Option<&Path>,
        out_markups: Option<&Path>,
    ) -> anyhow::Result<ContactsSummary> {
        let ros = self.load_ros(ros_path)?;
        let assignments = self.load_assignments(assignments_path)?;
        let (sets, failures) = self.generate(&ros.trajectories, &assignments)?;
        let contacts = flatten_contacts(&sets);

        save_contacts_json(out_json, &self.contacts_document(ros_path, contacts.clone()))
            .with_context(|| format!("writing {}", out_json.display()))?;
        if let Some(path) = out_fcsv {
            save_fcsv(path, &contact_rows(&contacts, CoordinateSystem::Ras))
                .with_context(|| format!("writing {}", path.display()))?;
        }
        if let Some(path) = out_markups {
            contact_fiducials(&contacts, CoordinateSystem::Ras, "contacts")
                .save(path)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        Ok(ContactsSummary {
            trajectories: sets.len(),
            contacts: contacts.len(),
            failures,
        })
    }

    pub fn suggest(&self, ros_path: &Path) -> anyhow::Result<Vec<ItemOutcome<Suggestion>>> {
        let ros = self.load_ros(ros_path)?;
        let library = self.config.library()?;
        Ok(ros
            .trajectories
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    library.suggest_for(t, &self.config.suggestion),
                )
            })
            .collect())
    }

    /// Writes contacts in RAS and LPS side by side; returns the contact count.
    pub fn aligned(
        &self,
        ros_path: &Path,
        assignments_path: &Path,
        out: &Path,
    ) -> anyhow::Result<(usize, Failures)> {
        let ros = self.load_ros(ros_path)?;
        let assignments = self.load_assignments(assignments_path)?;
        let (sets, failures) = self.generate(&ros.trajectories, &assignments)?;
        let contacts = flatten_contacts(&sets);
        write_aligned_txt(create(out)?, &contacts)
            .with_context(|| format!("writing {}", out.display()))?;
        Ok((contacts.len(), failures))
    }

    /// Fits the assigned electrodes to a post-operative CT.
    ///
    /// Confident fits are applied to the session (or every fit with `apply_all`); the rest
    /// stay as previews. `ct_volume` names the display the CT was exported from so its
    /// voxels land in the root frame.
    pub fn autofit(
        &self,
        ros_path: &Path,
        assignments_path: &Path,
        ct_path: &Path,
        ct_volume: Option<&str>,
        apply_all: bool,
        outputs: &AutofitOutputs,
    ) -> anyhow::Result<AutofitSummary> {
        let ros = self.load_ros(ros_path)?;
        let assignments = self.load_assignments(assignments_path)?;
        let library = self.config.library()?;

        let to_root = match ct_volume {
            Some(name) => {
                let chain = self.chain(&ros)?;
                let index = self.volume_index(&ros, name)?;
                chain.to_root(index).copied()
            }
            None => None,
        };
        let volume = load_nifti_volume(ct_path, to_root.as_ref())?;

        let mut session = ContactSession::new(library.clone(), ros.trajectories.clone());
        let (_, mut failures) = split_outcomes(session.assign_all(&assignments));
        let (_, regen_failures) = split_outcomes(session.regenerate());
        failures.extend(regen_failures);
        session.snapshot_planned();

        let outcomes = fit_all(
            &volume,
            &session.trajectories(),
            &assignments,
            &library,
            &self.config.autofit,
        );
        let (fits, fit_failures) = split_outcomes(outcomes);
        failures.extend(fit_failures);

        let mut summary = AutofitSummary {
            fitted: fits.len(),
            ..Default::default()
        };
        for fit in &fits {
            if let Err(err) = fit.check_confidence() {
                self.logger.skip(&err.to_string());
                summary.low_confidence.push(fit.trajectory_name.clone());
                if !apply_all {
                    session.set_preview(fit.clone())?;
                    continue;
                }
            }
            match session.apply_fit(fit) {
                Ok(_) => summary.applied += 1,
                Err(err) => failures.push((fit.trajectory_name.clone(), err.to_string())),
            }
        }

        let report = FitReport {
            ros_path: ros_path.display().to_string(),
            fits,
            trajectories: session.trajectories(),
        };
        fs::write(&outputs.fits, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing {}", outputs.fits.display()))?;

        if let Some(path) = &outputs.contacts {
            let sets: Vec<ContactSet> = session.contact_sets().cloned().collect();
            save_contacts_json(path, &self.contacts_document(ros_path, flatten_contacts(&sets)))
                .with_context(|| format!("writing {}", path.display()))?;
        }
        if let Some(path) = &outputs.qc_csv {
            let (records, qc_failures) = split_outcomes(session.qc());
            failures.extend(qc_failures);
            write_qc_csv(create(path)?, &records)
                .with_context(|| format!("writing {}", path.display()))?;
            summary.qc_records = records.len();
        }

        self.logger.record(&format!(
            "autofit: {} fitted, {} applied, {} low confidence",
            summary.fitted,
            summary.applied,
            summary.low_confidence.len()
        ));
        summary.failures = failures;
        Ok(summary)
    }

    /// Planned-versus-final QC from the `.ros` plan and a fit report's trajectories.
    pub fn qc(
        &self,
        ros_path: &Path,
        assignments_path: &Path,
        final_path: &Path,
        out: &Path,
    ) -> anyhow::Result<(Vec<QcRecord>, Failures)> {
        let ros = self.load_ros(ros_path)?;
        let assignments = self.load_assignments(assignments_path)?;
        let final_trajectories = load_final_trajectories(final_path)?;

        let (planned_sets, mut failures) = self.generate(&ros.trajectories, &assignments)?;
        let (final_sets, final_failures) = self.generate(&final_trajectories, &assignments)?;
        failures.extend(final_failures);

        let (records, qc_failures) = split_outcomes(qc_report(
            &ros.trajectories,
            &planned_sets,
            &final_trajectories,
            &final_sets,
        ));
        failures.extend(qc_failures);
        write_qc_csv(create(out)?, &records)
            .with_context(|| format!("writing {}", out.display()))?;
        Ok((records, failures))
    }
}

/// Final trajectories from either a fit report or a bare JSON trajectory list.
pub fn load_final_trajectories(path: &Path) -> anyhow::Result<Vec<Trajectory>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    if value.is_array() {
        return Ok(serde_json::from_value(value)?);
    }
    if value.get("trajectories").is_none() {
        bail!(
            "{}: expected a fit report or a list of trajectories",
            path.display()
        );
    }
    let report: FitReport = serde_json::from_value(value)
        .with_context(|| format!("reading fit report {}", path.display()))?;
    Ok(report.trajectories)
}

/// Keeps the failures of a batch call visible on stderr without aborting the command.
pub fn report_failures(failures: &Failures) {
    for (name, message) in failures {
        eprintln!("  skipped {name}: {message}");
    }
}
