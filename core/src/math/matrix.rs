use nalgebra::{Matrix4, Point3};

use crate::prelude::{CoreError, CoreResult};

/// Pivot magnitude below which a 4x4 matrix is treated as singular.
const SINGULAR_EPSILON: f64 = 1e-12;

pub struct MatrixHelper;

impl MatrixHelper {
    /// Builds a matrix from 16 values stored row-major, as written in `.ros` files.
    pub fn from_row_major(values: &[f64; 16]) -> Matrix4<f64> {
        Matrix4::from_row_slice(values)
    }

    pub fn to_row_major(matrix: &Matrix4<f64>) -> [[f64; 4]; 4] {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = matrix[(r, c)];
            }
        }
        rows
    }

    pub fn multiply(lhs: &Matrix4<f64>, rhs: &Matrix4<f64>) -> Matrix4<f64> {
        lhs * rhs
    }

    /// Applies an affine matrix to a point (homogeneous `w` is assumed to stay 1).
    pub fn apply(matrix: &Matrix4<f64>, point: &Point3<f64>) -> Point3<f64> {
        let h = matrix * point.to_homogeneous();
        Point3::new(h.x, h.y, h.z)
    }

    pub fn invert(matrix: &Matrix4<f64>) -> CoreResult<Matrix4<f64>> {
        if matrix.determinant().abs() < SINGULAR_EPSILON {
            return Err(CoreError::SingularMatrix);
        }
        matrix.try_inverse().ok_or(CoreError::SingularMatrix)
    }

    pub fn is_identity(matrix: &Matrix4<f64>, tol: f64) -> bool {
        (matrix - Matrix4::identity()).iter().all(|v| v.abs() <= tol)
    }

    /// Converts a ROSA/LPS frame matrix into RAS by conjugating with `diag(-1, -1, 1, 1)`.
    pub fn lps_to_ras_matrix(matrix: &Matrix4<f64>) -> Matrix4<f64> {
        let flip = Matrix4::from_diagonal(&nalgebra::Vector4::new(-1.0, -1.0, 1.0, 1.0));
        flip * matrix * flip
    }

    /// LPS <-> RAS point conversion; the flip is its own inverse.
    pub fn lps_to_ras_point(point: &Point3<f64>) -> Point3<f64> {
        Point3::new(-point.x, -point.y, point.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Translation3, Vector3};

    fn rigid(angle: f64, t: [f64; 3]) -> Matrix4<f64> {
        let rot = Rotation3::from_axis_angle(&Vector3::z_axis(), angle).to_homogeneous();
        Translation3::new(t[0], t[1], t[2]).to_homogeneous() * rot
    }

    #[test]
    fn row_major_layout_puts_translation_in_last_column() {
        let values = [
            1.0, 0.0, 0.0, 10.0, 0.0, 1.0, 0.0, 20.0, 0.0, 0.0, 1.0, 30.0, 0.0, 0.0, 0.0, 1.0,
        ];
        let m = MatrixHelper::from_row_major(&values);
        let p = MatrixHelper::apply(&m, &Point3::origin());
        assert_eq!(p, Point3::new(10.0, 20.0, 30.0));
        assert_eq!(MatrixHelper::to_row_major(&m)[1][3], 20.0);
    }

    #[test]
    fn invert_round_trips_rigid_matrix() {
        let m = rigid(0.4, [5.0, -3.0, 12.0]);
        let inv = MatrixHelper::invert(&m).unwrap();
        assert!(MatrixHelper::is_identity(&(m * inv), 1e-9));
    }

    #[test]
    fn invert_rejects_singular_matrix() {
        let err = MatrixHelper::invert(&Matrix4::zeros()).unwrap_err();
        assert!(matches!(err, CoreError::SingularMatrix));
    }

    #[test]
    fn lps_to_ras_negates_translation_x_and_y() {
        let m = rigid(0.0, [10.0, 4.0, -2.0]);
        let ras = MatrixHelper::lps_to_ras_matrix(&m);
        assert_relative_eq!(ras[(0, 3)], -10.0);
        assert_relative_eq!(ras[(1, 3)], -4.0);
        assert_relative_eq!(ras[(2, 3)], -2.0);
        let rotation = ras.fixed_view::<3, 3>(0, 0).into_owned();
        assert_relative_eq!(rotation, nalgebra::Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn ras_matrix_agrees_with_point_flip() {
        let m = rigid(0.7, [1.0, 2.0, 3.0]);
        let p = Point3::new(4.0, -5.0, 6.0);
        let via_lps = MatrixHelper::lps_to_ras_point(&MatrixHelper::apply(&m, &p));
        let via_ras = MatrixHelper::apply(
            &MatrixHelper::lps_to_ras_matrix(&m),
            &MatrixHelper::lps_to_ras_point(&p),
        );
        assert_relative_eq!(via_lps, via_ras, epsilon = 1e-12);
    }
}
