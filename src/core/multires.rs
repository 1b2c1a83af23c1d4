// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Generic helpers to build multi-resolution pyramids of matrices.

use nalgebra::{DMatrix, Scalar};

use crate::misc::type_aliases::Float;

/// Type alias to easily spot vectors that are indexed over multi-resolution levels.
/// Level 0 is always the highest resolution.
pub type Levels<T> = Vec<T>;

/// Recursively generate a pyramid of matrices where each level
/// is half the previous resolution, computed with the mean of each 2x2 block.
pub fn mean_pyramid(max_levels: usize, mat: DMatrix<Float>) -> Levels<DMatrix<Float>> {
    limited_sequence(max_levels, mat, |m| halve(m, |a, b, c, d| 0.25 * (a + b + c + d)))
}

/// Recursively apply a function transforming the matrix
/// until it's not possible anymore or the max number of levels is reached.
/// Using `max_levels = 0` has the same effect as `max_levels = 1`
/// since the result always contains at least the initial matrix.
pub fn limited_sequence<F, T>(max_levels: usize, mat: DMatrix<T>, mut f: F) -> Levels<DMatrix<T>>
where
    F: FnMut(&DMatrix<T>) -> Option<DMatrix<T>>,
    T: Scalar,
{
    let mut pyr = vec![mat];
    while pyr.len() < max_levels {
        match pyr.last().and_then(&mut f) {
            Some(next) => pyr.push(next),
            None => break,
        }
    }
    pyr
}

/// Halve the resolution of a matrix by applying a function to each 2x2 block.
/// If one size of the matrix is < 2 then this function returns None.
/// If one size is odd, its last line/column is dropped.
///
/// The block is given to `f` in the order:
///   a c
///   b d
pub fn halve<F, T, U>(mat: &DMatrix<T>, f: F) -> Option<DMatrix<U>>
where
    F: Fn(T, T, T, T) -> U,
    T: Scalar + Copy,
    U: Scalar,
{
    let (r, c) = mat.shape();
    let half_r = r / 2;
    let half_c = c / 2;
    if half_r == 0 || half_c == 0 {
        None
    } else {
        let half_mat = DMatrix::<U>::from_fn(half_r, half_c, |i, j| {
            let a = mat[(2 * i, 2 * j)];
            let b = mat[(2 * i + 1, 2 * j)];
            let c = mat[(2 * i, 2 * j + 1)];
            let d = mat[(2 * i + 1, 2 * j + 1)];
            f(a, b, c, d)
        });
        Some(half_mat)
    }
}

// TESTS #############################################################
