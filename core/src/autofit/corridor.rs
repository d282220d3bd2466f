use nalgebra::{Point3, Unit, Vector3};

use super::volume::IntensityVolume;
use crate::prelude::{CoreError, CoreResult, LENGTH_EPSILON};
use crate::ros::Trajectory;

/// Inclusive voxel index box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelBox {
    pub min: [usize; 3],
    pub max: [usize; 3],
}

impl VoxelBox {
    pub fn voxel_count(&self) -> usize {
        (0..3).map(|a| self.max[a] - self.min[a] + 1).product()
    }

    pub fn iter(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        (self.min[0]..=self.max[0]).flat_map(move |i| {
            (self.min[1]..=self.max[1])
                .flat_map(move |j| (self.min[2]..=self.max[2]).map(move |k| [i, j, k]))
        })
    }
}

/// Finite cylinder around a planned entry -> target segment.
///
/// Positions along the axis are measured from the entry towards the target; the cylinder
/// extends `margin_mm` beyond both ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corridor {
    pub entry: Point3<f64>,
    pub deep_axis: Unit<Vector3<f64>>,
    pub length_mm: f64,
    pub radius_mm: f64,
    pub margin_mm: f64,
}

impl Corridor {
    pub fn around(trajectory: &Trajectory, radius_mm: f64, margin_mm: f64) -> CoreResult<Self> {
        let d = trajectory.target_point() - trajectory.entry_point();
        let length_mm = d.norm();
        if length_mm <= LENGTH_EPSILON {
            return Err(CoreError::DegenerateTrajectory(trajectory.name.clone()));
        }
        if !(radius_mm > 0.0) || margin_mm < 0.0 {
            return Err(CoreError::InvalidInput(format!(
                "corridor radius {radius_mm} / margin {margin_mm} out of range"
            )));
        }
        Ok(Self {
            entry: trajectory.entry_point(),
            deep_axis: Unit::new_normalize(d),
            length_mm,
            radius_mm,
            margin_mm,
        })
    }

    /// Axial position of `p` from the entry.
    pub fn depth(&self, p: &Point3<f64>) -> f64 {
        (p - self.entry).dot(&self.deep_axis)
    }

    pub fn radial_distance(&self, p: &Point3<f64>) -> f64 {
        let rel = p - self.entry;
        (rel - self.deep_axis.into_inner() * rel.dot(&self.deep_axis)).norm()
    }

    pub fn contains(&self, p: &Point3<f64>) -> bool {
        let t = self.depth(p);
        t >= -self.margin_mm
            && t <= self.length_mm + self.margin_mm
            && self.radial_distance(p) <= self.radius_mm
    }

    fn end_points(&self) -> [Point3<f64>; 2] {
        let axis = self.deep_axis.into_inner();
        [
            self.entry - axis * self.margin_mm,
            self.entry + axis * (self.length_mm + self.margin_mm),
        ]
    }

    /// Voxel box covering the corridor, clamped to the volume; `None` when they do not meet.
    ///
    /// This bounds the number of voxels a detection pass may visit.
    pub fn voxel_bounds<V: IntensityVolume + ?Sized>(&self, volume: &V) -> CoreResult<Option<VoxelBox>> {
        let to_ijk = volume.lps_to_ijk()?;
        let [a, b] = self.end_points();
        let r = self.radius_mm;
        let lo = a.coords.inf(&b.coords).add_scalar(-r);
        let hi = a.coords.sup(&b.coords).add_scalar(r);

        let mut ijk_min = Vector3::repeat(f64::INFINITY);
        let mut ijk_max = Vector3::repeat(f64::NEG_INFINITY);
        for corner in 0..8 {
            let pick = |axis: usize| if corner >> axis & 1 == 0 { lo[axis] } else { hi[axis] };
            let p = to_ijk.transform_point(&Point3::new(pick(0), pick(1), pick(2)));
            ijk_min = ijk_min.inf(&p.coords);
            ijk_max = ijk_max.sup(&p.coords);
        }

        let dims = volume.dims();
        let mut min = [0usize; 3];
        let mut max = [0usize; 3];
        for axis in 0..3 {
            let upper = dims[axis] as f64 - 1.0;
            let first = ijk_min[axis].floor();
            let last = ijk_max[axis].ceil();
            if dims[axis] == 0 || last < 0.0 || first > upper {
                return Ok(None);
            }
            min[axis] = first.max(0.0) as usize;
            max[axis] = last.min(upper) as usize;
        }
        Ok(Some(VoxelBox { min, max }))
    }
}
