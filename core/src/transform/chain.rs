use nalgebra::Matrix4;

use crate::math::MatrixHelper;
use crate::prelude::{CoreError, CoreResult};
use crate::ros::{DisplayEntry, RosFile};
use crate::telemetry::LogManager;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Pending,
    Active,
    Done,
}

/// Root-relative display transforms `T(i -> root)` in the ROSA/LPS frame.
#[derive(Debug, Clone)]
pub struct TransformChain {
    root: usize,
    to_root: Vec<Matrix4<f64>>,
}

impl TransformChain {
    /// Composes `T(i -> root) = T(parent -> root) * TRdicomRdisplay(i)` for every display.
    ///
    /// The first display is the natural root; displays without a parent reference hang
    /// off it through their own matrix. When `root` names another display the whole
    /// forest is re-rooted there by inverting the path back to the natural root.
    pub fn resolve(displays: &[DisplayEntry], root: Option<usize>) -> CoreResult<Self> {
        let logger = LogManager::new("chain");
        let n = displays.len();
        let root = root.unwrap_or(0);
        if n == 0 {
            return Ok(Self {
                root,
                to_root: Vec::new(),
            });
        }
        if root >= n {
            return Err(CoreError::InvalidInput(format!(
                "root index {root} out of range for {n} displays"
            )));
        }

        for display in displays {
            if let Some(parent) = display.parent() {
                if parent >= n {
                    return Err(CoreError::malformed(
                        "IMAGERY_3DREF",
                        format!(
                            "display {} references index {parent} (must be 0..{})",
                            display.index,
                            n - 1
                        ),
                    ));
                }
            }
        }

        let mut cache: Vec<Option<Matrix4<f64>>> = vec![None; n];
        let mut state = vec![Visit::Pending; n];
        for i in 0..n {
            compose(displays, i, &mut cache, &mut state)?;
        }
        let natural: Vec<Matrix4<f64>> = cache.into_iter().flatten().collect();

        let to_root = if root == 0 {
            natural
        } else {
            let new_root_inv = MatrixHelper::invert(&natural[root])?;
            natural.iter().map(|m| new_root_inv * m).collect()
        };

        logger.record(&format!(
            "composed {n} display transforms into root '{}' (index {root})",
            displays[root].name
        ));
        Ok(Self { root, to_root })
    }

    /// Resolves the chain for a parsed file, rooted at `reference` (volume name) if given.
    pub fn for_ros(ros: &RosFile, reference: Option<&str>) -> CoreResult<Self> {
        let root = resolve_reference_index(ros, reference)?;
        Self::resolve(&ros.displays, Some(root))
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn len(&self) -> usize {
        self.to_root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_root.is_empty()
    }

    pub fn to_root(&self, index: usize) -> Option<&Matrix4<f64>> {
        self.to_root.get(index)
    }

    pub fn matrices(&self) -> &[Matrix4<f64>] {
        &self.to_root
    }

    fn get(&self, index: usize) -> CoreResult<&Matrix4<f64>> {
        self.to_root.get(index).ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "display index {index} out of range for {} displays",
                self.to_root.len()
            ))
        })
    }

    /// `T(from -> to)`, e.g. the stored `TRdicomRdisplay` when `to` is the parent of `from`.
    pub fn relative(&self, from: usize, to: usize) -> CoreResult<Matrix4<f64>> {
        let to_inv = MatrixHelper::invert(self.get(to)?)?;
        Ok(to_inv * self.get(from)?)
    }

    /// Matrix handed to the host: LPS -> RAS conversion, then the optional inverse.
    pub fn host_matrix(&self, index: usize, invert: bool) -> CoreResult<Matrix4<f64>> {
        let ras = MatrixHelper::lps_to_ras_matrix(self.get(index)?);
        if invert {
            MatrixHelper::invert(&ras)
        } else {
            Ok(ras)
        }
    }
}

fn compose(
    displays: &[DisplayEntry],
    i: usize,
    cache: &mut Vec<Option<Matrix4<f64>>>,
    state: &mut Vec<Visit>,
) -> CoreResult<Matrix4<f64>> {
    if let Some(m) = cache[i] {
        return Ok(m);
    }
    if i == 0 {
        cache[0] = Some(Matrix4::identity());
        state[0] = Visit::Done;
        return Ok(Matrix4::identity());
    }
    if state[i] == Visit::Active {
        return Err(CoreError::CyclicTransformChain { index: i });
    }
    state[i] = Visit::Active;

    let parent = displays[i].parent().unwrap_or(0);
    let parent_to_root = compose(displays, parent, cache, state)?;
    let composed = parent_to_root * displays[i].transform;

    cache[i] = Some(composed);
    state[i] = Visit::Done;
    Ok(composed)
}

/// Root display index for a reference volume name (case-insensitive); the first display
/// when no reference is given.
pub fn resolve_reference_index(ros: &RosFile, reference: Option<&str>) -> CoreResult<usize> {
    if ros.displays.is_empty() {
        return Err(CoreError::malformed(
            "TRdicomRdisplay",
            "no display volumes found",
        ));
    }
    match reference {
        None => Ok(0),
        Some(name) => ros.display_index(name).ok_or_else(|| {
            let names = ros.volume_names();
            CoreError::UnknownVolume {
                name: name.to_string(),
                available: if names.is_empty() {
                    "none".to_string()
                } else {
                    names.join(", ")
                },
            }
        }),
    }
}
