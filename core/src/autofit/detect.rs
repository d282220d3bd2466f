use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::corridor::Corridor;
use super::volume::IntensityVolume;
use crate::math::StatsHelper;
use crate::prelude::{from_point, CoreError, CoreResult, Vec3};
use crate::telemetry::LogManager;

/// How the hyperdensity cut-off is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum Threshold {
    /// Fixed intensity (HU for CT).
    Absolute(f32),
    /// Percentile (0-100) of the intensities inside the corridor.
    Percentile(f32),
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold::Absolute(1800.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub threshold: Threshold,
    pub min_cluster_voxels: usize,
    /// Clusters longer than this along the corridor axis are split into equal chunks.
    pub max_cluster_length_mm: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: Threshold::default(),
            min_cluster_voxels: 2,
            max_cluster_length_mm: 3.0,
        }
    }
}

/// Shortest accepted split length; zero disables splitting.
const MIN_CLUSTER_SPLIT_MM: f64 = 0.1;

impl DetectionConfig {
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |reason: String| Err(CoreError::InvalidInput(format!("detection: {reason}")));
        match self.threshold {
            Threshold::Absolute(v) if !v.is_finite() => {
                return invalid(format!("absolute threshold must be finite, got {v}"))
            }
            Threshold::Percentile(q) if !(0.0..=100.0).contains(&q) => {
                return invalid(format!("percentile must lie in 0..=100, got {q}"))
            }
            _ => {}
        }
        let len = self.max_cluster_length_mm;
        if !len.is_finite() || len < 0.0 || (len > 0.0 && len < MIN_CLUSTER_SPLIT_MM) {
            return invalid(format!(
                "max_cluster_length_mm must be 0 or at least {MIN_CLUSTER_SPLIT_MM}, got {len}"
            ));
        }
        Ok(())
    }
}

/// One candidate contact: the centroid of a bright voxel cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub position_lps: Vec3,
    pub voxels: usize,
    pub peak: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Ordered from entry to target.
    pub detections: Vec<Detection>,
    pub threshold: f32,
    pub voxels_in_corridor: usize,
    pub voxels_above_threshold: usize,
}

impl DetectionReport {
    pub fn points(&self) -> Vec<Point3<f64>> {
        self.detections
            .iter()
            .map(|d| Point3::from(Vector3::from(d.position_lps)))
            .collect()
    }
}

struct Voxel {
    ijk: [usize; 3],
    position: Point3<f64>,
    value: f32,
}

/// Thresholds and clusters the corridor voxels of `volume`.
///
/// Only voxels inside the corridor's bounding box are visited.
pub fn detect_candidates<V: IntensityVolume + ?Sized>(
    volume: &V,
    corridor: &Corridor,
    config: &DetectionConfig,
) -> CoreResult<DetectionReport> {
    config.validate()?;
    let logger = LogManager::new("autofit");
    let Some(bounds) = corridor.voxel_bounds(volume)? else {
        logger.skip("corridor lies outside the volume");
        return Ok(DetectionReport::default());
    };

    let inside: Vec<Voxel> = bounds
        .iter()
        .filter_map(|ijk| {
            let position = volume.voxel_center(ijk);
            corridor.contains(&position).then(|| Voxel {
                ijk,
                position,
                value: volume.intensity(ijk),
            })
        })
        .collect();
    if inside.is_empty() {
        return Ok(DetectionReport::default());
    }

    let threshold = match config.threshold {
        Threshold::Absolute(value) => value,
        Threshold::Percentile(q) => {
            let values: Vec<f32> = inside.iter().map(|v| v.value).collect();
            StatsHelper::percentile(&values, f64::from(q)).unwrap_or(f32::INFINITY)
        }
    };
    let bright: Vec<&Voxel> = inside.iter().filter(|v| v.value >= threshold).collect();

    let mut detections = Vec::new();
    for cluster in connected_clusters(&bright) {
        if cluster.len() < config.min_cluster_voxels.max(1) {
            continue;
        }
        let members: Vec<&Voxel> = cluster.iter().map(|&i| bright[i]).collect();
        detections.extend(split_cluster(&members, corridor, config.max_cluster_length_mm));
    }
    detections.sort_by(|a, b| {
        let da = corridor.depth(&Point3::from(Vector3::from(a.position_lps)));
        let db = corridor.depth(&Point3::from(Vector3::from(b.position_lps)));
        da.total_cmp(&db)
    });

    logger.detail(&format!(
        "corridor voxels {}, above {:.1}: {}, detections {}",
        inside.len(),
        threshold,
        bright.len(),
        detections.len()
    ));
    Ok(DetectionReport {
        detections,
        threshold,
        voxels_in_corridor: inside.len(),
        voxels_above_threshold: bright.len(),
    })
}

/// 26-connected components over voxel indices.
fn connected_clusters(voxels: &[&Voxel]) -> Vec<Vec<usize>> {
    let index: HashMap<[usize; 3], usize> = voxels
        .iter()
        .enumerate()
        .map(|(i, v)| (v.ijk, i))
        .collect();
    let mut seen = vec![false; voxels.len()];
    let mut clusters = Vec::new();

    for start in 0..voxels.len() {
        if seen[start] {
            continue;
        }
        seen[start] = true;
        let mut stack = vec![start];
        let mut cluster = Vec::new();
        while let Some(cur) = stack.pop() {
            cluster.push(cur);
            let [i, j, k] = voxels[cur].ijk;
            for di in -1i64..=1 {
                for dj in -1i64..=1 {
                    for dk in -1i64..=1 {
                        if di == 0 && dj == 0 && dk == 0 {
                            continue;
                        }
                        let (Some(ni), Some(nj), Some(nk)) = (
                            i.checked_add_signed(di as isize),
                            j.checked_add_signed(dj as isize),
                            k.checked_add_signed(dk as isize),
                        ) else {
                            continue;
                        };
                        if let Some(&next) = index.get(&[ni, nj, nk]) {
                            if !seen[next] {
                                seen[next] = true;
                                stack.push(next);
                            }
                        }
                    }
                }
            }
        }
        cluster.sort_unstable();
        clusters.push(cluster);
    }
    clusters
}

/// Centroids of a cluster, split into equal axial chunks when it is too long for one contact.
fn split_cluster(members: &[&Voxel], corridor: &Corridor, max_length_mm: f64) -> Vec<Detection> {
    let depths: Vec<f64> = members.iter().map(|v| corridor.depth(&v.position)).collect();
    let lo = depths.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = depths.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let extent = hi - lo;
    let chunks = if max_length_mm > 0.0 && extent > max_length_mm {
        (extent / max_length_mm).ceil() as usize
    } else {
        1
    };

    let mut sums = vec![(Vector3::<f64>::zeros(), 0usize, f32::NEG_INFINITY); chunks];
    for (voxel, depth) in members.iter().zip(&depths) {
        let slot = if chunks == 1 {
            0
        } else {
            (((depth - lo) / extent * chunks as f64) as usize).min(chunks - 1)
        };
        let entry = &mut sums[slot];
        entry.0 += voxel.position.coords;
        entry.1 += 1;
        entry.2 = entry.2.max(voxel.value);
    }
    sums.into_iter()
        .filter(|(_, n, _)| *n > 0)
        .map(|(sum, n, peak)| Detection {
            position_lps: from_point(&Point3::from(sum / n as f64)),
            voxels: n,
            peak,
        })
        .collect()
}
