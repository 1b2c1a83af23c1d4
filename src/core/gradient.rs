// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions to compute image gradients.

use nalgebra::DMatrix;

use crate::misc::type_aliases::Float;

/// Centered horizontal and vertical gradients `(gx, gy)`.
///
/// Gradients are set to 0 on the one pixel border
/// where the centered difference is not defined.
pub fn centered(img: &DMatrix<Float>) -> (DMatrix<Float>, DMatrix<Float>) {
    let (nb_rows, nb_cols) = img.shape();
    let inside = |i: usize, j: usize| i > 0 && j > 0 && i + 1 < nb_rows && j + 1 < nb_cols;
    let grad_x = DMatrix::from_fn(nb_rows, nb_cols, |i, j| {
        if inside(i, j) {
            0.5 * (img[(i, j + 1)] - img[(i, j - 1)])
        } else {
            0.0
        }
    });
    let grad_y = DMatrix::from_fn(nb_rows, nb_cols, |i, j| {
        if inside(i, j) {
            0.5 * (img[(i + 1, j)] - img[(i - 1, j)])
        } else {
            0.0
        }
    });
    (grad_x, grad_y)
}

/// Squared norm of a gradient given its two components.
pub fn squared_norm(grad_x: &DMatrix<Float>, grad_y: &DMatrix<Float>) -> DMatrix<Float> {
    grad_x.zip_map(grad_y, |gx, gy| gx * gx + gy * gy)
}

/// Centered gradient norm at one pixel of a row-major image accessor.
/// Used where the image is not stored as a matrix.
#[inline]
pub fn norm_at<F: Fn(usize, usize) -> Float>(at: F, row: usize, col: usize) -> Float {
    let gx = 0.5 * (at(row, col + 1) - at(row, col - 1));
    let gy = 0.5 * (at(row + 1, col) - at(row - 1, col));
    (gx * gx + gy * gy).sqrt()
}

// TESTS #############################################################
