// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Conversions between `image` buffers, matrices and aligned images.
//!
//! Images are row major while `DMatrix` is column major,
//! so every conversion goes pixel by pixel.

use image::{GrayImage, Luma};
use nalgebra::DMatrix;

use crate::core::image::AlignedImage;
use crate::misc::type_aliases::Float;

/// Convert a `GrayImage` into an `u8` matrix of shape `(height, width)`.
pub fn matrix_from_image(img: &GrayImage) -> DMatrix<u8> {
    let (width, height) = img.dimensions();
    DMatrix::from_row_slice(height as usize, width as usize, img.as_raw())
}

/// Convert an `u8` matrix into a `GrayImage`.
/// Inverse operation of `matrix_from_image`.
#[allow(clippy::cast_possible_truncation)]
pub fn image_from_matrix(mat: &DMatrix<u8>) -> GrayImage {
    let (nb_rows, nb_cols) = mat.shape();
    GrayImage::from_fn(nb_cols as u32, nb_rows as u32, |x, y| {
        Luma([mat[(y as usize, x as usize)]])
    })
}

/// Copy a `GrayImage` into an aligned image, ready for stereo matching.
pub fn aligned_from_image(img: &GrayImage) -> AlignedImage {
    let (width, height) = img.dimensions();
    AlignedImage::from_fn(width as usize, height as usize, |row, col| {
        Float::from(img.get_pixel(col as u32, row as u32)[0])
    })
}

// TESTS #############################################################
