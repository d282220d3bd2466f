use nalgebra::Matrix4;

use crate::prelude::{CoreError, CoreResult};

const ITK_HEADER: &str = "#Insight Transform File V1.0";
const ITK_AFFINE: &str = "AffineTransform_double_3_3";

/// Writes one affine matrix as ITK transform text: the 3x3 block row-major followed by
/// the translation, with a zero centre of rotation.
pub fn to_itk_affine_text(matrix: &Matrix4<f64>) -> String {
    let mut params = Vec::with_capacity(12);
    for r in 0..3 {
        for c in 0..3 {
            params.push(matrix[(r, c)]);
        }
    }
    for r in 0..3 {
        params.push(matrix[(r, 3)]);
    }
    let params = params
        .iter()
        .map(|p| format!("{p:.8}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{ITK_HEADER}\nTransform: {ITK_AFFINE}\nParameters: {params}\nFixedParameters: 0 0 0\n")
}

/// Reads back the matrix written by [`to_itk_affine_text`].
pub fn parse_itk_affine_text(text: &str) -> CoreResult<Matrix4<f64>> {
    let invalid = |reason: &str| CoreError::InvalidInput(format!("ITK transform: {reason}"));
    let params_line = text
        .lines()
        .find_map(|line| line.trim().strip_prefix("Parameters:"))
        .ok_or_else(|| invalid("missing Parameters line"))?;
    let params = params_line
        .split_whitespace()
        .map(|v| v.parse::<f64>().map_err(|_| invalid("non-numeric parameter")))
        .collect::<CoreResult<Vec<f64>>>()?;
    if params.len() != 12 {
        return Err(invalid("expected 12 affine parameters"));
    }
    let mut matrix = Matrix4::identity();
    for r in 0..3 {
        for c in 0..3 {
            matrix[(r, c)] = params[r * 3 + c];
        }
        matrix[(r, 3)] = params[9 + r];
    }
    Ok(matrix)
}
