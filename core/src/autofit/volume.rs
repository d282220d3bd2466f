use nalgebra::{Matrix4, Point3};
use ndarray::Array3;

use crate::math::MatrixHelper;
use crate::prelude::{CoreError, CoreResult};

/// Read access to a scalar voxel grid in the ROSA/LPS frame.
///
/// Hosts that own the image data implement this; the engine never loads volumes itself.
pub trait IntensityVolume {
    /// Grid size as `[i, j, k]`.
    fn dims(&self) -> [usize; 3];

    /// Intensity at an in-bounds voxel index.
    fn intensity(&self, ijk: [usize; 3]) -> f32;

    /// Voxel index to LPS millimetres.
    fn ijk_to_lps(&self) -> &Matrix4<f64>;

    fn lps_to_ijk(&self) -> CoreResult<Matrix4<f64>> {
        MatrixHelper::invert(self.ijk_to_lps())
    }

    fn voxel_center(&self, ijk: [usize; 3]) -> Point3<f64> {
        let p = Point3::new(ijk[0] as f64, ijk[1] as f64, ijk[2] as f64);
        self.ijk_to_lps().transform_point(&p)
    }
}

/// In-memory volume backed by an `ndarray` grid.
#[derive(Debug, Clone)]
pub struct DenseVolume {
    data: Array3<f32>,
    ijk_to_lps: Matrix4<f64>,
}

impl DenseVolume {
    pub fn new(data: Array3<f32>, ijk_to_lps: Matrix4<f64>) -> CoreResult<Self> {
        if data.is_empty() {
            return Err(CoreError::InvalidInput("volume has no voxels".into()));
        }
        MatrixHelper::invert(&ijk_to_lps)?;
        Ok(Self { data, ijk_to_lps })
    }

    /// Axis-aligned grid with the given spacing and the first voxel centre at `origin`.
    pub fn with_spacing(data: Array3<f32>, spacing: [f64; 3], origin: [f64; 3]) -> CoreResult<Self> {
        let mut m = Matrix4::identity();
        for axis in 0..3 {
            m[(axis, axis)] = spacing[axis];
            m[(axis, 3)] = origin[axis];
        }
        Self::new(data, m)
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }
}

impl IntensityVolume for DenseVolume {
    fn dims(&self) -> [usize; 3] {
        let (i, j, k) = self.data.dim();
        [i, j, k]
    }

    fn intensity(&self, ijk: [usize; 3]) -> f32 {
        self.data[ijk]
    }

    fn ijk_to_lps(&self) -> &Matrix4<f64> {
        &self.ijk_to_lps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn spacing_maps_voxel_centres() {
        let vol = DenseVolume::with_spacing(Array3::zeros((4, 5, 6)), [0.5, 0.5, 2.0], [-1.0, 2.0, 3.0])
            .unwrap();
        assert_eq!(vol.dims(), [4, 5, 6]);
        let p = vol.voxel_center([2, 4, 1]);
        assert_relative_eq!(p, Point3::new(0.0, 4.0, 5.0), epsilon = 1e-12);
        let back = vol.lps_to_ijk().unwrap().transform_point(&p);
        assert_relative_eq!(back, Point3::new(2.0, 4.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn singular_orientation_is_rejected() {
        let mut m = Matrix4::identity();
        m[(2, 2)] = 0.0;
        assert!(DenseVolume::new(Array3::zeros((2, 2, 2)), m).is_err());
        assert!(DenseVolume::new(Array3::zeros((0, 2, 2)), Matrix4::identity()).is_err());
    }
}
