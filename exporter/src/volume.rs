use anyhow::{bail, Context};
use nalgebra::Matrix4;
use ndarray::{Array3, Axis, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use rosacore::autofit::DenseVolume;
use std::path::Path;

/// Voxel index to RAS millimetres from the NIfTI header (sform, then qform, then spacing).
///
/// Headers the qform path cannot handle are rejected rather than handed to it. A qfac other
/// than -1 is read as +1.
pub fn header_ijk_to_ras(header: &NiftiHeader) -> anyhow::Result<Matrix4<f64>> {
    if header.sform_code == 0 && header.qform_code != 0 {
        if header.pixdim[1..4].iter().any(|&d| d < 0.0 || !d.is_finite()) {
            bail!("qform header has invalid spacing {:?}", &header.pixdim[1..4]);
        }
        let (b, c, d) = (header.quatern_b, header.quatern_c, header.quatern_d);
        if !(b * b + c * c + d * d <= 1.0 + 1e-6) {
            bail!("qform quaternion ({b}, {c}, {d}) is not a unit rotation");
        }
        if header.pixdim[0] != 1.0 && header.pixdim[0] != -1.0 {
            let mut fixed = header.clone();
            fixed.pixdim[0] = 1.0;
            return Ok(fixed.affine::<f64>());
        }
    }
    if header.sform_code == 0 && header.qform_code == 0 && !(3..=7).contains(&header.dim[0]) {
        bail!("header without an orientation has {} dimensions", header.dim[0]);
    }
    Ok(header.affine::<f64>())
}

/// RAS to LPS: negate the first two output rows.
pub fn ras_to_lps(matrix: &Matrix4<f64>) -> Matrix4<f64> {
    let mut m = *matrix;
    for r in 0..2 {
        for c in 0..4 {
            m[(r, c)] = -m[(r, c)];
        }
    }
    m
}

/// Loads a scalar NIfTI image as a [`DenseVolume`] in the ROSA/LPS frame.
///
/// `to_root` maps the image's own LPS frame into the case root frame, e.g. the composed
/// display matrix of the volume the image was exported from.
pub fn load_nifti_volume<P: AsRef<Path>>(
    path: P,
    to_root: Option<&Matrix4<f64>>,
) -> anyhow::Result<DenseVolume> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("reading NIfTI image {}", path.display()))?;
    let affine = ras_to_lps(
        &header_ijk_to_ras(obj.header())
            .with_context(|| format!("reading geometry of {}", path.display()))?,
    );
    let data = obj
        .into_volume()
        .into_ndarray::<f32>()
        .with_context(|| format!("decoding voxels of {}", path.display()))?;

    let data: Array3<f32> = match data.ndim() {
        3 => data.into_dimensionality::<Ix3>()?,
        4 if data.shape()[3] >= 1 => data
            .index_axis_move(Axis(3), 0)
            .into_dimensionality::<Ix3>()?,
        n => bail!("{}: expected a 3D volume, found {n} dimensions", path.display()),
    };
    let ijk_to_lps = match to_root {
        Some(m) => m * affine,
        None => affine,
    };
    DenseVolume::new(data, ijk_to_lps).with_context(|| format!("volume {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use nifti::writer::WriterOptions;
    use rosacore::autofit::IntensityVolume;
    use tempfile::TempDir;

    fn header() -> NiftiHeader {
        NiftiHeader {
            pixdim: [1.0, 0.5, 0.5, 2.0, 0.0, 0.0, 0.0, 0.0],
            dim: [3, 4, 8, 2, 1, 1, 1, 1],
            sform_code: 0,
            qform_code: 0,
            ..NiftiHeader::default()
        }
    }

    #[test]
    fn bare_header_scales_by_spacing() {
        let m = header_ijk_to_ras(&header()).unwrap();
        let a = m.transform_point(&Point3::new(2.0, 4.0, 1.0));
        let b = m.transform_point(&Point3::new(0.0, 0.0, 0.0));
        // The spacing-only fallback is radiological: +i runs to the right.
        assert!((a - b - nalgebra::Vector3::new(-1.0, 2.0, 2.0)).norm() < 1e-9);

        let flat = NiftiHeader {
            dim: [2, 4, 8, 1, 1, 1, 1, 1],
            ..header()
        };
        assert!(header_ijk_to_ras(&flat).is_err());
    }

    #[test]
    fn sform_takes_precedence() {
        let h = NiftiHeader {
            sform_code: 1,
            qform_code: 1,
            srow_x: [-1.0, 0.0, 0.0, 90.0],
            srow_y: [0.0, 1.0, 0.0, -126.0],
            srow_z: [0.0, 0.0, 1.0, -72.0],
            quatern_x: 5.0,
            ..header()
        };
        let lps = ras_to_lps(&header_ijk_to_ras(&h).unwrap());
        let p = lps.transform_point(&Point3::new(10.0, 0.0, 0.0));
        assert_eq!(p, Point3::new(-80.0, 126.0, -72.0));
    }

    #[test]
    fn identity_qform_keeps_offset_and_flips_with_qfac() {
        let mut h = NiftiHeader {
            qform_code: 1,
            quatern_x: 5.0,
            quatern_y: 6.0,
            quatern_z: 7.0,
            ..header()
        };
        h.pixdim[0] = -1.0;
        let m = header_ijk_to_ras(&h).unwrap();
        let p = m.transform_point(&Point3::new(2.0, 2.0, 1.0));
        assert!((p - Point3::new(6.0, 7.0, 5.0)).norm() < 1e-9);

        h.pixdim[0] = 0.0;
        let m = header_ijk_to_ras(&h).unwrap();
        let p = m.transform_point(&Point3::new(2.0, 2.0, 1.0));
        assert!((p - Point3::new(6.0, 7.0, 9.0)).norm() < 1e-9);
    }

    #[test]
    fn negative_qform_spacing_is_an_error() {
        let mut h = NiftiHeader {
            qform_code: 1,
            ..header()
        };
        h.pixdim[2] = -0.5;
        assert!(header_ijk_to_ras(&h).is_err());

        h.pixdim[2] = 0.5;
        h.quatern_b = 0.9;
        h.quatern_c = 0.9;
        assert!(header_ijk_to_ras(&h).is_err());
    }

    #[test]
    fn written_image_loads_in_lps_with_root_transform() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ct.nii");
        let mut data = Array3::<f32>::zeros((4, 5, 6));
        data[[1, 2, 3]] = 7.0;
        WriterOptions::new(&path).write_nifti(&data).unwrap();

        let volume = load_nifti_volume(&path, None).unwrap();
        assert_eq!(volume.data().dim(), (4, 5, 6));
        assert_eq!(volume.data()[[1, 2, 3]], 7.0);
        let p = volume.ijk_to_lps().transform_point(&Point3::new(1.0, 2.0, 3.0));
        assert_eq!(p, Point3::new(-1.0, -2.0, 3.0));

        let mut shift = Matrix4::identity();
        shift[(0, 3)] = 10.0;
        let moved = load_nifti_volume(&path, Some(&shift)).unwrap();
        let p = moved.ijk_to_lps().transform_point(&Point3::new(1.0, 2.0, 3.0));
        assert_eq!(p, Point3::new(9.0, -2.0, 3.0));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_nifti_volume("/nonexistent/ct.nii", None).unwrap_err();
        assert!(format!("{err:#}").contains("reading NIfTI image"));
    }
}
