use anyhow::Context;
use rosacore::autofit::AutoFitConfig;
use rosacore::electrode::{ElectrodeLibrary, SuggestionConfig};
use rosacore::export::CoordinateSystem;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Options shared by every subcommand, optionally read from a YAML file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Display used as the root frame; the first display when unset.
    pub reference_volume: Option<String>,
    /// Hand inverse transforms to the host.
    pub invert: bool,
    /// Electrode models JSON; the bundled DIXI D08 library when unset.
    pub electrode_library: Option<PathBuf>,
    pub coordinate_system: CoordinateSystem,
    pub suggestion: SuggestionConfig,
    pub autofit: AutoFitConfig,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Command-line values win over the file.
    pub fn with_overrides(
        mut self,
        reference_volume: Option<String>,
        electrode_library: Option<PathBuf>,
    ) -> Self {
        if reference_volume.is_some() {
            self.reference_volume = reference_volume;
        }
        if electrode_library.is_some() {
            self.electrode_library = electrode_library;
        }
        self
    }

    pub fn library(&self) -> anyhow::Result<ElectrodeLibrary> {
        match &self.electrode_library {
            Some(path) => ElectrodeLibrary::load(path)
                .with_context(|| format!("loading electrode library {}", path.display())),
            None => ElectrodeLibrary::bundled().context("loading bundled electrode library"),
        }
    }

    pub fn library_label(&self) -> String {
        self.electrode_library
            .as_ref()
            .map_or_else(|| "bundled:dixi_d08".to_string(), |p| p.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosacore::autofit::Threshold;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_engine_defaults() {
        let cfg = WorkflowConfig::default();
        assert!(cfg.reference_volume.is_none());
        assert!(!cfg.invert);
        assert_eq!(cfg.coordinate_system, CoordinateSystem::Ras);
        assert_eq!(cfg.suggestion.tolerance_mm, 5.0);
        assert_eq!(cfg.autofit.max_angle_deg, 12.0);
        assert_eq!(cfg.library_label(), "bundled:dixi_d08");
        assert!(!cfg.library().unwrap().is_empty());
    }

    #[test]
    fn config_load_reads_partial_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"reference_volume: CT\ninvert: true\nautofit:\n  max_depth_shift_mm: 8.0\n  detection:\n    threshold:\n      mode: percentile\n      value: 99.5\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkflowConfig::load(&path).unwrap();
        assert_eq!(cfg.reference_volume.as_deref(), Some("CT"));
        assert!(cfg.invert);
        assert_eq!(cfg.autofit.max_depth_shift_mm, 8.0);
        assert_eq!(cfg.autofit.corridor_radius_mm, 2.5);
        assert_eq!(cfg.autofit.detection.threshold, Threshold::Percentile(99.5));
        assert_eq!(cfg.autofit.detection.min_cluster_voxels, 2);
    }

    #[test]
    fn config_load_reports_path_on_bad_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"invert: [not, a, bool]\n").unwrap();
        let path = temp.into_temp_path();
        let err = WorkflowConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parsing workflow config"));
    }

    #[test]
    fn overrides_replace_only_given_values() {
        let cfg = WorkflowConfig {
            reference_volume: Some("T1".into()),
            ..Default::default()
        }
        .with_overrides(None, Some(PathBuf::from("models.json")));
        assert_eq!(cfg.reference_volume.as_deref(), Some("T1"));
        assert_eq!(cfg.library_label(), "models.json");
    }
}
