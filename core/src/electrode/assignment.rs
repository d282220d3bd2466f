use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::prelude::{CoreError, CoreResult, Vec3};
use crate::ros::Trajectory;

pub const ASSIGNMENT_SCHEMA_VERSION: &str = "1.0";

/// Which trajectory endpoint the electrode tip sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipAnchor {
    #[default]
    Target,
    Entry,
}

impl TipAnchor {
    /// Sign of the offset direction relative to the entry -> target axis.
    pub fn offset_sign(self) -> f64 {
        match self {
            TipAnchor::Target => -1.0,
            TipAnchor::Entry => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TipAnchor::Target => "target",
            TipAnchor::Entry => "entry",
        }
    }
}

/// Electrode model chosen for one trajectory and how it sits on the line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub trajectory: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub tip_at: TipAnchor,
    /// Moves the tip along the proximal contact axis.
    #[serde(default)]
    pub tip_shift_mm: f64,
    #[serde(default)]
    pub xyz_offset_mm: Vec3,
}

impl Assignment {
    pub fn new(trajectory: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            trajectory: trajectory.into(),
            model_id: model_id.into(),
            tip_at: TipAnchor::Target,
            tip_shift_mm: 0.0,
            xyz_offset_mm: [0.0; 3],
        }
    }

    pub fn is_assigned(&self) -> bool {
        !self.model_id.trim().is_empty()
    }
}

fn default_schema_version() -> String {
    ASSIGNMENT_SCHEMA_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentDocument {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub assignments: Vec<Assignment>,
}

impl AssignmentDocument {
    /// One row per trajectory with the given defaults.
    pub fn template(trajectories: &[Trajectory], default_model_id: &str, tip_at: TipAnchor) -> Self {
        let assignments = trajectories
            .iter()
            .map(|t| Assignment {
                tip_at,
                ..Assignment::new(t.name.clone(), default_model_id)
            })
            .collect();
        Self {
            schema_version: ASSIGNMENT_SCHEMA_VERSION.to_string(),
            assignments,
        }
    }

    /// Accepts the full `{"assignments": [...]}` document or a `{"RHH": "DIXI-15AM"}` map.
    pub fn from_json_str(text: &str) -> CoreResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = value else {
            return Err(CoreError::InvalidInput(
                "assignments must be a JSON object".into(),
            ));
        };
        if map.contains_key("assignments") {
            return Ok(serde_json::from_value(Value::Object(map))?);
        }

        let mut assignments = Vec::with_capacity(map.len());
        for (trajectory, model) in map {
            let Value::String(model_id) = model else {
                return Err(CoreError::InvalidInput(format!(
                    "shorthand assignment for {trajectory} must map to a model id string"
                )));
            };
            assignments.push(Assignment::new(trajectory, model_id));
        }
        Ok(Self {
            schema_version: ASSIGNMENT_SCHEMA_VERSION.to_string(),
            assignments,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        Self::from_json_str(&fs::read_to_string(path.as_ref())?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> CoreResult<()> {
        fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Assigned rows keyed by trajectory; a later row for the same name wins.
    pub fn by_trajectory(&self) -> BTreeMap<String, Assignment> {
        self.assignments
            .iter()
            .filter(|a| a.is_assigned())
            .map(|a| (a.trajectory.clone(), a.clone()))
            .collect()
    }
}
