use std::collections::BTreeMap;

use super::assignment::{Assignment, AssignmentDocument};
use super::model::ElectrodeLibrary;
use super::placement::{place_contacts, ContactSet};
use crate::autofit::FitResult;
use crate::prelude::{CoreError, CoreResult, ItemOutcome};
use crate::qc::{qc_report, QcRecord};
use crate::ros::Trajectory;
use crate::telemetry::LogManager;

#[derive(Debug, Clone, Default)]
struct PlannedSnapshot {
    trajectories: Vec<Trajectory>,
    contacts: Vec<ContactSet>,
}

/// Caller-owned editing state: current trajectories, their electrode assignments and the
/// contact sets derived from them.
///
/// Every mutation replaces whole values. Contact sets are only ever rebuilt from the
/// current trajectory and assignment, never patched.
#[derive(Debug, Clone)]
pub struct ContactSession {
    library: ElectrodeLibrary,
    trajectories: BTreeMap<String, Trajectory>,
    assignments: BTreeMap<String, Assignment>,
    contacts: BTreeMap<String, ContactSet>,
    previews: BTreeMap<String, FitResult>,
    planned: Option<PlannedSnapshot>,
    logger: LogManager,
}

impl ContactSession {
    pub fn new(library: ElectrodeLibrary, trajectories: Vec<Trajectory>) -> Self {
        Self {
            library,
            trajectories: trajectories
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
            assignments: BTreeMap::new(),
            contacts: BTreeMap::new(),
            previews: BTreeMap::new(),
            planned: None,
            logger: LogManager::new("contacts"),
        }
    }

    pub fn library(&self) -> &ElectrodeLibrary {
        &self.library
    }

    pub fn trajectory(&self, name: &str) -> Option<&Trajectory> {
        self.trajectories.get(name)
    }

    pub fn trajectories(&self) -> Vec<Trajectory> {
        self.trajectories.values().cloned().collect()
    }

    pub fn assignment(&self, name: &str) -> Option<&Assignment> {
        self.assignments.get(name)
    }

    pub fn contacts(&self, name: &str) -> Option<&ContactSet> {
        self.contacts.get(name)
    }

    pub fn contact_sets(&self) -> impl Iterator<Item = &ContactSet> {
        self.contacts.values()
    }

    /// Assigns a model; an empty model id clears the assignment and its contacts.
    pub fn assign(&mut self, assignment: Assignment) -> CoreResult<()> {
        if !self.trajectories.contains_key(&assignment.trajectory) {
            return Err(CoreError::UnknownTrajectory(assignment.trajectory));
        }
        if !assignment.is_assigned() {
            self.assignments.remove(&assignment.trajectory);
            self.contacts.remove(&assignment.trajectory);
            return Ok(());
        }
        self.library.require(&assignment.model_id)?;
        self.assignments
            .insert(assignment.trajectory.clone(), assignment);
        Ok(())
    }

    /// Applies every row of `doc`; rows are reported individually.
    pub fn assign_all(&mut self, doc: &AssignmentDocument) -> Vec<ItemOutcome<()>> {
        doc.assignments
            .iter()
            .filter(|a| a.is_assigned())
            .map(|a| (a.trajectory.clone(), self.assign(a.clone())))
            .collect()
    }

    /// Replaces a trajectory's endpoints. Derived contacts are left as they were until
    /// the caller regenerates.
    pub fn update_trajectory(&mut self, trajectory: Trajectory) -> CoreResult<()> {
        match self.trajectories.get_mut(&trajectory.name) {
            Some(slot) => {
                *slot = trajectory;
                Ok(())
            }
            None => Err(CoreError::UnknownTrajectory(trajectory.name)),
        }
    }

    /// Rebuilds the contact set of one trajectory, replacing any previous one.
    ///
    /// On failure the stale set is dropped so no outdated geometry survives.
    pub fn regenerate_one(&mut self, name: &str) -> CoreResult<&ContactSet> {
        let result = self.build(name);
        match result {
            Ok(set) => {
                self.contacts.insert(name.to_string(), set);
                self.contacts
                    .get(name)
                    .ok_or_else(|| CoreError::UnknownTrajectory(name.to_string()))
            }
            Err(err) => {
                self.contacts.remove(name);
                Err(err)
            }
        }
    }

    /// Rebuilds every assigned trajectory. Returns the contact count per trajectory.
    pub fn regenerate(&mut self) -> Vec<ItemOutcome<usize>> {
        let names: Vec<String> = self.assignments.keys().cloned().collect();
        let outcomes: Vec<ItemOutcome<usize>> = names
            .into_iter()
            .map(|name| {
                let result = self.regenerate_one(&name).map(ContactSet::len);
                if let Err(err) = &result {
                    self.logger.skip(&format!("{name}: {err}"));
                }
                (name, result)
            })
            .collect();
        self.logger.record(&format!(
            "regenerated {} contact sets",
            outcomes.iter().filter(|(_, r)| r.is_ok()).count()
        ));
        outcomes
    }

    fn build(&self, name: &str) -> CoreResult<ContactSet> {
        let trajectory = self
            .trajectories
            .get(name)
            .ok_or_else(|| CoreError::UnknownTrajectory(name.to_string()))?;
        let assignment = self
            .assignments
            .get(name)
            .ok_or_else(|| CoreError::InvalidInput(format!("no electrode assigned to {name}")))?;
        let model = self.library.require(&assignment.model_id)?;
        place_contacts(trajectory, model, assignment)
    }

    /// Holds a fit for inspection without touching the trajectory.
    pub fn set_preview(&mut self, fit: FitResult) -> CoreResult<()> {
        if !self.trajectories.contains_key(&fit.trajectory_name) {
            return Err(CoreError::UnknownTrajectory(fit.trajectory_name));
        }
        self.previews.insert(fit.trajectory_name.clone(), fit);
        Ok(())
    }

    pub fn preview(&self, name: &str) -> Option<&FitResult> {
        self.previews.get(name)
    }

    /// Overwrites the trajectory with the fitted endpoints, discards its preview and
    /// regenerates its contacts.
    ///
    /// The fitted endpoints already carry the observed depth, so the assignment's tip
    /// shift and xyz offset are reset and its anchor follows the fit. The new contact set
    /// is built before anything is replaced; on error the session is unchanged.
    pub fn apply_fit(&mut self, fit: &FitResult) -> CoreResult<&ContactSet> {
        let name = fit.trajectory_name.clone();
        if !self.trajectories.contains_key(&name) {
            return Err(CoreError::UnknownTrajectory(name));
        }
        let trajectory = fit.fitted_trajectory();
        let assignment = Assignment {
            tip_at: fit.tip_at,
            ..Assignment::new(name.clone(), fit.model_id.clone())
        };
        let model = self.library.require(&assignment.model_id)?;
        let set = place_contacts(&trajectory, model, &assignment)?;

        self.trajectories.insert(name.clone(), trajectory);
        self.assignments.insert(name.clone(), assignment);
        self.previews.remove(&name);
        self.logger.record(&format!(
            "applied fit to {} ({}/{} contacts matched)",
            name, fit.matched_contacts, fit.expected_contacts
        ));
        self.contacts.insert(name.clone(), set);
        self.contacts
            .get(&name)
            .ok_or(CoreError::UnknownTrajectory(name))
    }

    /// Records the current trajectories and contacts as the planned reference for QC.
    pub fn snapshot_planned(&mut self) {
        self.planned = Some(PlannedSnapshot {
            trajectories: self.trajectories(),
            contacts: self.contacts.values().cloned().collect(),
        });
    }

    pub fn planned_trajectory(&self, name: &str) -> Option<&Trajectory> {
        self.planned
            .as_ref()
            .and_then(|p| p.trajectories.iter().find(|t| t.name == name))
    }

    /// QC of the current geometry against the planned snapshot; empty without a snapshot.
    pub fn qc(&self) -> Vec<ItemOutcome<QcRecord>> {
        let Some(planned) = &self.planned else {
            return Vec::new();
        };
        let current: Vec<ContactSet> = self.contacts.values().cloned().collect();
        qc_report(
            &planned.trajectories,
            &planned.contacts,
            &self.trajectories(),
            &current,
        )
    }
}
