//! Case folder discovery: the `.ros` file and the Analyze images it references.

use std::fs;
use std::path::{Path, PathBuf};

use crate::prelude::{CoreError, CoreResult, ItemOutcome};
use crate::ros::{parse_ros_file, DisplayEntry, RosFile};
use crate::telemetry::LogManager;
use crate::transform::TransformChain;

/// Folder under the case directory that holds the Analyze images.
pub const ANALYZE_DIR: &str = "DICOM";

/// A parsed case with its resolved transform chain and per-volume image lookups.
#[derive(Debug)]
pub struct LoadedCase {
    pub case_dir: PathBuf,
    pub ros_path: PathBuf,
    pub ros: RosFile,
    pub chain: TransformChain,
    /// One outcome per display, in display order, keyed by volume name.
    pub volumes: Vec<ItemOutcome<PathBuf>>,
}

impl LoadedCase {
    pub fn resolved_volumes(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.volumes
            .iter()
            .filter_map(|(name, r)| r.as_ref().ok().map(|p| (name.as_str(), p.as_path())))
    }
}

/// The single `.ros` file directly inside `case_dir`.
pub fn find_ros_file<P: AsRef<Path>>(case_dir: P) -> CoreResult<PathBuf> {
    let case_dir = case_dir.as_ref();
    let mut hits: Vec<PathBuf> = fs::read_dir(case_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("ros"))
        })
        .collect();
    hits.sort();
    match hits.len() {
        1 => Ok(hits.remove(0)),
        0 => Err(CoreError::InvalidInput(format!(
            "no .ros file found in case folder {}",
            case_dir.display()
        ))),
        _ => Err(CoreError::InvalidInput(format!(
            "multiple .ros files found in case folder {}",
            case_dir.display()
        ))),
    }
}

/// Locates `<name>.img` for a display.
///
/// Tries `<analyze_root>/<uid>/<name>.img` from the `VOLUME` path first, then searches
/// `analyze_root` recursively by name.
pub fn resolve_analyze_volume(analyze_root: &Path, display: &DisplayEntry) -> Option<PathBuf> {
    let parts: Vec<&str> = display
        .volume_path
        .trim_matches('/')
        .split('/')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() >= 3 {
        let uid = parts[parts.len() - 2];
        let name = parts[parts.len() - 1];
        let candidate = analyze_root.join(uid).join(format!("{name}.img"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    find_file_recursive(analyze_root, &format!("{}.img", display.name))
}

fn find_file_recursive(dir: &Path, file_name: &str) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    if let Some(hit) = entries
        .iter()
        .find(|p| p.is_file() && p.file_name().is_some_and(|n| n == file_name))
    {
        return Some(hit.clone());
    }
    entries
        .iter()
        .filter(|p| p.is_dir())
        .find_map(|p| find_file_recursive(p, file_name))
}

/// Loads a case folder.
///
/// A malformed `.ros` file or a cyclic chain fails the whole load; a missing image is
/// recorded as `UnresolvedVolumeReference` for that volume only.
pub fn load_case<P: AsRef<Path>>(case_dir: P, reference: Option<&str>) -> CoreResult<LoadedCase> {
    let logger = LogManager::new("case");
    let case_dir = case_dir.as_ref().to_path_buf();
    let ros_path = find_ros_file(&case_dir)?;
    let ros = parse_ros_file(&ros_path)?;
    let chain = TransformChain::for_ros(&ros, reference)?;

    let analyze_root = case_dir.join(ANALYZE_DIR);
    let volumes: Vec<ItemOutcome<PathBuf>> = ros
        .displays
        .iter()
        .map(|display| {
            let outcome = resolve_analyze_volume(&analyze_root, display).ok_or_else(|| {
                CoreError::UnresolvedVolumeReference {
                    volume: display.name.clone(),
                }
            });
            if outcome.is_err() {
                logger.skip(&format!("missing Analyze .img for {}", display.name));
            }
            (display.name.clone(), outcome)
        })
        .collect();

    logger.record(&format!(
        "loaded {} with {} displays ({} images), {} trajectories, root {}",
        ros_path.display(),
        ros.displays.len(),
        volumes.iter().filter(|(_, r)| r.is_ok()).count(),
        ros.trajectories.len(),
        ros.displays.get(chain.root()).map_or("-", |d| d.name.as_str())
    ));
    Ok(LoadedCase {
        case_dir,
        ros_path,
        ros,
        chain,
        volumes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ros::parser::tests::TWO_DISPLAY_ROS;
    use tempfile::tempdir;

    fn write_case(dir: &Path) {
        fs::write(dir.join("case.ros"), TWO_DISPLAY_ROS).unwrap();
        let t1 = dir.join(ANALYZE_DIR).join("1.2.840.1");
        fs::create_dir_all(&t1).unwrap();
        fs::write(t1.join("T1.img"), b"").unwrap();
    }

    #[test]
    fn load_reports_missing_volume_and_keeps_others() {
        let dir = tempdir().unwrap();
        write_case(dir.path());
        let case = load_case(dir.path(), None).unwrap();
        assert_eq!(case.chain.root(), 0);
        assert_eq!(case.volumes.len(), 2);
        assert!(case.volumes[0].1.is_ok());
        assert!(matches!(
            &case.volumes[1].1,
            Err(CoreError::UnresolvedVolumeReference { volume }) if volume == "CT"
        ));
        assert_eq!(case.resolved_volumes().count(), 1);
    }

    #[test]
    fn recursive_search_finds_moved_image() {
        let dir = tempdir().unwrap();
        write_case(dir.path());
        let nested = dir.path().join(ANALYZE_DIR).join("misc").join("deep");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("CT.img"), b"").unwrap();
        let case = load_case(dir.path(), Some("ct")).unwrap();
        assert_eq!(case.chain.root(), 1);
        let ct = case.volumes[1].1.as_ref().unwrap();
        assert!(ct.ends_with("misc/deep/CT.img"));
    }

    #[test]
    fn ros_discovery_requires_exactly_one_file() {
        let dir = tempdir().unwrap();
        assert!(find_ros_file(dir.path()).is_err());
        fs::write(dir.path().join("a.ros"), "").unwrap();
        assert!(find_ros_file(dir.path()).unwrap().ends_with("a.ros"));
        fs::write(dir.path().join("b.ros"), "").unwrap();
        assert!(find_ros_file(dir.path()).is_err());
    }

    #[test]
    fn unknown_reference_volume_fails_the_load() {
        let dir = tempdir().unwrap();
        write_case(dir.path());
        assert!(matches!(
            load_case(dir.path(), Some("MRI")),
            Err(CoreError::UnknownVolume { .. })
        ));
    }
}
