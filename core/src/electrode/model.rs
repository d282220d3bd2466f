use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::prelude::{CoreError, CoreResult};
use crate::ros::Trajectory;
use crate::telemetry::LogManager;

const BUNDLED_LIBRARY: &str = include_str!("../../resources/electrodes/dixi_d08_electrodes.json");

/// Length difference below which two candidates count as equidistant.
const TIE_EPSILON_MM: f64 = 1e-6;

/// Electrode family. `AM` is a single evenly spaced group; `BM` and `CM` split their
/// contacts into groups separated by a longer insulation gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElectrodeType {
    AM,
    BM,
    CM,
}

impl ElectrodeType {
    pub fn is_grouped(self) -> bool {
        !matches!(self, ElectrodeType::AM)
    }
}

/// Insulation between two consecutive contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    IntraGroup,
    InterGroup,
}

/// One electrode design. Contact centre offsets are authoritative; spacing fields only
/// describe the insulation layout used for shaft geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectrodeModel {
    pub id: String,
    #[serde(rename = "type")]
    pub electrode_type: ElectrodeType,
    pub contact_count: usize,
    /// Contacts per group from the tip; empty means one group of `contact_count`.
    #[serde(default)]
    pub group_layout: Vec<usize>,
    pub contact_length_mm: f64,
    pub diameter_mm: f64,
    #[serde(default)]
    pub insulation_intra_mm: f64,
    #[serde(default)]
    pub insulation_inter_group_mm: f64,
    pub total_exploration_length_mm: f64,
    pub contact_center_offsets_from_tip_mm: Vec<f64>,
}

impl ElectrodeModel {
    pub fn total_length_mm(&self) -> f64 {
        self.total_exploration_length_mm
    }

    pub fn groups(&self) -> Vec<usize> {
        if self.group_layout.is_empty() {
            vec![self.contact_count]
        } else {
            self.group_layout.clone()
        }
    }

    /// Kind of insulation between contact `index` and `index + 1` (0-based, from the tip).
    pub fn gap_after(&self, index: usize) -> GapKind {
        let mut boundary = 0;
        for size in self.groups() {
            boundary += size;
            if index + 1 == boundary {
                return GapKind::InterGroup;
            }
            if index + 1 < boundary {
                break;
            }
        }
        GapKind::IntraGroup
    }

    pub fn gap_mm(&self, kind: GapKind) -> f64 {
        match kind {
            GapKind::IntraGroup => self.insulation_intra_mm,
            GapKind::InterGroup => self.insulation_inter_group_mm,
        }
    }

    fn validate(&self) -> CoreResult<()> {
        let invalid = |reason: String| {
            CoreError::InvalidElectrodeLibrary(format!("model {}: {reason}", self.id))
        };
        let offsets = &self.contact_center_offsets_from_tip_mm;
        if self.contact_count == 0 {
            return Err(invalid("contact_count must be positive".into()));
        }
        if offsets.len() != self.contact_count {
            return Err(invalid(format!(
                "contact_count={} but {} center offsets",
                self.contact_count,
                offsets.len()
            )));
        }
        if offsets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("center offsets must be strictly increasing".into()));
        }
        if offsets.iter().any(|o| !o.is_finite() || *o < 0.0) {
            return Err(invalid("center offsets must be finite and non-negative".into()));
        }
        for (name, value) in [
            ("contact_length_mm", self.contact_length_mm),
            ("diameter_mm", self.diameter_mm),
            ("total_exploration_length_mm", self.total_exploration_length_mm),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(format!("{name} must be positive")));
            }
        }
        if self.insulation_intra_mm < 0.0 || self.insulation_inter_group_mm < 0.0 {
            return Err(invalid("insulation lengths must be non-negative".into()));
        }
        let groups = self.groups();
        if groups.iter().sum::<usize>() != self.contact_count || groups.contains(&0) {
            return Err(invalid(format!(
                "group_layout {:?} does not partition {} contacts",
                groups, self.contact_count
            )));
        }
        match (self.electrode_type.is_grouped(), groups.len()) {
            (false, 1) => Ok(()),
            (true, n) if n > 1 => Ok(()),
            _ => Err(invalid(format!(
                "type {:?} does not match {} contact group(s)",
                self.electrode_type,
                groups.len()
            ))),
        }
    }
}

/// Options for the length-based model suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    pub tolerance_mm: f64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self { tolerance_mm: 5.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub model_id: String,
    pub trajectory_length_mm: f64,
    pub residual_mm: f64,
}

#[derive(Debug, Deserialize)]
struct LibraryDocument {
    #[serde(default)]
    schema_version: Option<String>,
    models: Vec<ElectrodeModel>,
}

/// Validated electrode model library, indexed by id.
#[derive(Debug, Clone)]
pub struct ElectrodeLibrary {
    schema_version: Option<String>,
    models: BTreeMap<String, ElectrodeModel>,
}

impl ElectrodeLibrary {
    /// The DIXI D08 library compiled into the crate.
    pub fn bundled() -> CoreResult<Self> {
        Self::from_json_str(BUNDLED_LIBRARY)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> CoreResult<Self> {
        let doc: LibraryDocument = serde_json::from_str(text)?;
        Self::from_models(doc.schema_version, doc.models)
    }

    pub fn from_models(
        schema_version: Option<String>,
        models: Vec<ElectrodeModel>,
    ) -> CoreResult<Self> {
        let mut by_id = BTreeMap::new();
        for model in models {
            model.validate()?;
            if by_id.contains_key(&model.id) {
                return Err(CoreError::InvalidElectrodeLibrary(format!(
                    "duplicate model id: {}",
                    model.id
                )));
            }
            by_id.insert(model.id.clone(), model);
        }
        LogManager::new("electrodes").detail(&format!("loaded {} electrode models", by_id.len()));
        Ok(Self {
            schema_version,
            models: by_id,
        })
    }

    pub fn schema_version(&self) -> Option<&str> {
        self.schema_version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ElectrodeModel> {
        self.models.get(id)
    }

    pub fn require(&self, id: &str) -> CoreResult<&ElectrodeModel> {
        self.get(id)
            .ok_or_else(|| CoreError::UnknownModel(id.to_string()))
    }

    /// Models in id order.
    pub fn models(&self) -> impl Iterator<Item = &ElectrodeModel> {
        self.models.values()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    /// Closest model by total length, if within tolerance.
    ///
    /// Equidistant candidates prefer more contacts, then the smaller id.
    pub fn suggest(&self, length_mm: f64, config: &SuggestionConfig) -> Option<Suggestion> {
        let mut best: Option<(&ElectrodeModel, f64)> = None;
        for model in self.models.values() {
            let delta = (model.total_length_mm() - length_mm).abs();
            if delta > config.tolerance_mm + TIE_EPSILON_MM {
                continue;
            }
            let replace = match best {
                None => true,
                Some((current, current_delta)) => {
                    delta < current_delta - TIE_EPSILON_MM
                        || ((delta - current_delta).abs() <= TIE_EPSILON_MM
                            && model.contact_count > current.contact_count)
                }
            };
            if replace {
                best = Some((model, delta));
            }
        }
        best.map(|(model, delta)| Suggestion {
            model_id: model.id.clone(),
            trajectory_length_mm: length_mm,
            residual_mm: delta,
        })
    }

    pub fn suggest_for(
        &self,
        trajectory: &Trajectory,
        config: &SuggestionConfig,
    ) -> CoreResult<Suggestion> {
        let length_mm = trajectory.length_mm();
        self.suggest(length_mm, config)
            .ok_or_else(|| CoreError::NoConfidentModelSuggestion {
                trajectory: trajectory.name.clone(),
                length_mm,
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn uniform_model(id: &str, count: usize, spacing: f64) -> ElectrodeModel {
        let offsets: Vec<f64> = (0..count).map(|i| 1.0 + spacing * i as f64).collect();
        ElectrodeModel {
            id: id.to_string(),
            electrode_type: ElectrodeType::AM,
            contact_count: count,
            group_layout: vec![count],
            contact_length_mm: 2.0,
            diameter_mm: 0.8,
            insulation_intra_mm: spacing - 2.0,
            insulation_inter_group_mm: 0.0,
            total_exploration_length_mm: spacing * count as f64 - (spacing - 2.0),
            contact_center_offsets_from_tip_mm: offsets,
        }
    }

    #[test]
    fn bundled_library_validates_and_exposes_models() {
        let lib = ElectrodeLibrary::bundled().unwrap();
        assert_eq!(lib.schema_version(), Some("1.0"));
        assert!(lib.len() >= 9);
        let bm = lib.require("DIXI-15BM").unwrap();
        assert_eq!(bm.electrode_type, ElectrodeType::BM);
        assert_eq!(bm.groups(), vec![5, 5, 5]);
        assert_eq!(bm.gap_after(3), GapKind::IntraGroup);
        assert_eq!(bm.gap_after(4), GapKind::InterGroup);
        assert_eq!(bm.gap_after(9), GapKind::InterGroup);
        assert_eq!(bm.gap_after(10), GapKind::IntraGroup);
        assert!(matches!(lib.require("nope"), Err(CoreError::UnknownModel(_))));
    }

    #[test]
    fn bundled_offsets_match_contact_counts() {
        let lib = ElectrodeLibrary::bundled().unwrap();
        for model in lib.models() {
            assert_eq!(model.contact_center_offsets_from_tip_mm.len(), model.contact_count);
            let last = *model.contact_center_offsets_from_tip_mm.last().unwrap();
            assert!(last + model.contact_length_mm / 2.0 <= model.total_length_mm() + 1e-9);
        }
    }

    #[test]
    fn exact_length_suggests_model_with_zero_residual() {
        let lib = ElectrodeLibrary::bundled().unwrap();
        let model = lib.require("DIXI-12AM").unwrap();
        let s = lib
            .suggest(model.total_length_mm(), &SuggestionConfig::default())
            .unwrap();
        assert_eq!(s.model_id, "DIXI-12AM");
        assert_eq!(s.residual_mm, 0.0);
    }

    #[test]
    fn far_length_declines_suggestion() {
        let lib = ElectrodeLibrary::bundled().unwrap();
        assert!(lib.suggest(5.0, &SuggestionConfig::default()).is_none());
        assert!(lib.suggest(200.0, &SuggestionConfig::default()).is_none());
        let traj = Trajectory::new("RHH", [0.0, 0.0, 0.0], [0.0, 0.0, -150.0]);
        assert!(matches!(
            lib.suggest_for(&traj, &SuggestionConfig::default()),
            Err(CoreError::NoConfidentModelSuggestion { .. })
        ));
    }

    #[test]
    fn ties_prefer_more_contacts_then_smaller_id() {
        let mut short = uniform_model("B-short", 4, 3.5);
        short.total_exploration_length_mm = 30.0;
        let mut long_more = uniform_model("Z-long", 6, 3.5);
        long_more.total_exploration_length_mm = 40.0;
        let lib = ElectrodeLibrary::from_models(None, vec![short.clone(), long_more]).unwrap();
        let s = lib.suggest(35.0, &SuggestionConfig::default()).unwrap();
        assert_eq!(s.model_id, "Z-long");

        let mut twin = uniform_model("A-twin", 4, 3.5);
        twin.total_exploration_length_mm = 40.0;
        let lib = ElectrodeLibrary::from_models(None, vec![short, twin]).unwrap();
        let s = lib.suggest(35.0, &SuggestionConfig::default()).unwrap();
        assert_eq!(s.model_id, "A-twin");
    }

    #[test]
    fn validation_rejects_inconsistent_models() {
        let mut bad = uniform_model("X", 3, 3.5);
        bad.contact_center_offsets_from_tip_mm = vec![1.0, 4.5];
        assert!(ElectrodeLibrary::from_models(None, vec![bad]).is_err());

        let mut unordered = uniform_model("Y", 3, 3.5);
        unordered.contact_center_offsets_from_tip_mm = vec![1.0, 8.0, 4.5];
        assert!(ElectrodeLibrary::from_models(None, vec![unordered]).is_err());

        let mut wrong_type = uniform_model("W", 4, 3.5);
        wrong_type.electrode_type = ElectrodeType::CM;
        assert!(ElectrodeLibrary::from_models(None, vec![wrong_type]).is_err());

        let dup = uniform_model("D", 3, 3.5);
        assert!(ElectrodeLibrary::from_models(None, vec![dup.clone(), dup]).is_err());
    }

    #[test]
    fn library_json_requires_models_list() {
        assert!(ElectrodeLibrary::from_json_str("{\"schema_version\": \"1.0\"}").is_err());
        let lib = ElectrodeLibrary::from_json_str(
            r#"{"models": [{"id": "M", "type": "AM", "contact_count": 1,
                "contact_length_mm": 2.0, "diameter_mm": 0.8,
                "total_exploration_length_mm": 2.0,
                "contact_center_offsets_from_tip_mm": [1.0]}]}"#,
        )
        .unwrap();
        assert_eq!(lib.require("M").unwrap().groups(), vec![1]);
    }
}
