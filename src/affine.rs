//! Voxel-to-world affine transformations derived from frame subheaders.
//!
//! ECAT files carry no orientation matrix. The affine is implied by the
//! frame shape and pixel sizes, centered on the middle of the volume, in
//! millimeters.

use crate::error::Result;
use crate::header::HeaderValues;
use nalgebra::{Matrix3, Matrix4, Scalar, Vector3};

/// A 3x3 linear transformation.
pub type Affine3 = Matrix3<f32>;
/// A 4x4 affine transformation in homogeneous coordinates.
pub type Affine4 = Matrix4<f32>;

/// Millimeters per centimeter, the unit of subheader pixel sizes.
const MM_PER_CM: f32 = 10.0;

/// Separate a 4x4 affine into its 3x3 affine and translation components.
pub fn get_affine_and_translation<T: Scalar>(affine: &Matrix4<T>) -> (Matrix3<T>, Vector3<T>) {
    let translation = Vector3::<T>::new(
        affine[12].clone(),
        affine[13].clone(),
        affine[14].clone(),
    );
    let affine = affine.fixed_view::<3, 3>(0, 0).into_owned();
    (affine, translation)
}

/// Get affine implied by given shape and zooms.
///
/// We get the translations from the center of the image (implied by `shape`).
#[rustfmt::skip]
pub fn shape_zoom_affine(shape: [usize; 3], spacing: [f32; 3]) -> Affine4 {
    let origin = Vector3::new(
        (shape[0] as f32 - 1.0) / 2.0,
        (shape[1] as f32 - 1.0) / 2.0,
        (shape[2] as f32 - 1.0) / 2.0,
    );
    let spacing = [-spacing[0], spacing[1], spacing[2]];
    Affine4::new(
        spacing[0], 0.0, 0.0, -origin[0] * spacing[0],
        0.0, spacing[1], 0.0, -origin[1] * spacing[1],
        0.0, 0.0, spacing[2], -origin[2] * spacing[2],
        0.0, 0.0, 0.0, 1.0,
    )
}

/// The affine of a frame, from its subheader's dimensions and pixel sizes.
pub fn subheader_affine(subheader: &HeaderValues) -> Result<Affine4> {
    let shape = subheader.dimensions()?;
    let [x, y, z] = subheader.pixel_size()?;
    Ok(shape_zoom_affine(
        shape,
        [x * MM_PER_CM, y * MM_PER_CM, z * MM_PER_CM],
    ))
}
