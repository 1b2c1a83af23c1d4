// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Aligned intensity images used as input of the stereo matcher.
//!
//! Rows are stored contiguously, padded to a multiple of `LANES` floats,
//! and every row starts on a `ALIGNMENT` bytes boundary.
//! The alignment is guaranteed by the type itself:
//! building an `AlignedImage` is the only way to feed the matcher.

use nalgebra::{DMatrix, Scalar};
use num_traits::AsPrimitive;
use std::ops::Index;

use crate::core::error::InputError;
use crate::misc::type_aliases::Float;

/// Number of floats processed together by the vectorized kernels.
pub const LANES: usize = 8;

/// Byte alignment of the start of every row.
pub const ALIGNMENT: usize = 32;

/// One aligned group of `LANES` floats.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(C, align(32))]
struct Block([Float; LANES]);

const ZERO_BLOCK: Block = Block([0.0; LANES]);

/// Owned single channel image of `Float` intensities with aligned rows.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignedImage {
    width: usize,
    height: usize,
    blocks_per_row: usize,
    blocks: Vec<Block>,
}

impl AlignedImage {
    /// Image filled with zeros.
    pub fn zeros(width: usize, height: usize) -> Self {
        let blocks_per_row = (width + LANES - 1) / LANES;
        Self {
            width,
            height,
            blocks_per_row,
            blocks: vec![ZERO_BLOCK; blocks_per_row * height],
        }
    }

    /// Image whose intensity at `(row, col)` is `f(row, col)`.
    pub fn from_fn<F: FnMut(usize, usize) -> Float>(width: usize, height: usize, mut f: F) -> Self {
        let mut img = Self::zeros(width, height);
        for row in 0..height {
            for (col, px) in img.row_mut(row).iter_mut().enumerate() {
                *px = f(row, col);
            }
        }
        img
    }

    /// Copy a matrix (rows x cols) of any primitive pixel type.
    pub fn from_matrix<T>(mat: &DMatrix<T>) -> Self
    where
        T: Scalar + Copy + AsPrimitive<Float>,
    {
        let (nb_rows, nb_cols) = mat.shape();
        Self::from_fn(nb_cols, nb_rows, |row, col| mat[(row, col)].as_())
    }

    /// Copy into a `(height, width)` matrix.
    pub fn to_matrix(&self) -> DMatrix<Float> {
        DMatrix::from_fn(self.height, self.width, |row, col| self[(row, col)])
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(rows, cols)`, in the same order as `DMatrix::shape`.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// True if the image has no pixel.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Pixels of a row, without the padding.
    /// Panics if `row >= height`.
    pub fn row(&self, row: usize) -> &[Float] {
        assert!(row < self.height, "row {} out of {}", row, self.height);
        let start = row * self.blocks_per_row * LANES;
        &self.floats()[start..start + self.width]
    }

    /// Mutable pixels of a row, without the padding.
    /// Panics if `row >= height`.
    pub fn row_mut(&mut self, row: usize) -> &mut [Float] {
        assert!(row < self.height, "row {} out of {}", row, self.height);
        let start = row * self.blocks_per_row * LANES;
        let width = self.width;
        &mut self.floats_mut()[start..start + width]
    }

    /// Intensity at `(row, col)`, or `None` outside of the image.
    pub fn get(&self, row: usize, col: usize) -> Option<Float> {
        if row < self.height && col < self.width {
            Some(self.row(row)[col])
        } else {
            None
        }
    }

    fn floats(&self) -> &[Float] {
        // SAFETY: `Block` is `repr(C)` around `[Float; LANES]` with no padding
        // (its size is a multiple of its alignment), so the blocks buffer is
        // exactly `blocks.len() * LANES` initialized and contiguous floats.
        unsafe {
            std::slice::from_raw_parts(
                self.blocks.as_ptr() as *const Float,
                self.blocks.len() * LANES,
            )
        }
    }

    fn floats_mut(&mut self) -> &mut [Float] {
        // SAFETY: same layout argument as in `floats`,
        // and the exclusive borrow of `self` guarantees unique access.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.blocks.as_mut_ptr() as *mut Float,
                self.blocks.len() * LANES,
            )
        }
    }
}

impl Index<(usize, usize)> for AlignedImage {
    type Output = Float;

    /// Bounds checked `(row, col)` access.
    fn index(&self, (row, col): (usize, usize)) -> &Float {
        assert!(col < self.width, "column {} out of {}", col, self.width);
        &self.row(row)[col]
    }
}

/// Left and right images of a rectified stereo pair.
///
/// Both images must already be undistorted and rectified,
/// meaning that epipolar lines are image rows.
/// This cannot be checked and is the responsibility of the caller.
#[derive(Clone, Copy, Debug)]
pub struct RectifiedImagePair<'a> {
    /// Left image, the one for which depth is estimated.
    pub left: &'a AlignedImage,
    /// Right image.
    pub right: &'a AlignedImage,
}

impl<'a> RectifiedImagePair<'a> {
    /// Check that both images are non-empty and of the same size.
    pub fn new(left: &'a AlignedImage, right: &'a AlignedImage) -> Result<Self, InputError> {
        if left.is_empty() || right.is_empty() {
            Err(InputError::EmptyImage)
        } else if left.shape() != right.shape() {
            Err(InputError::DimensionMismatch {
                left: left.shape(),
                right: right.shape(),
            })
        } else {
            Ok(Self { left, right })
        }
    }

    /// Number of columns of both images.
    pub fn width(&self) -> usize {
        self.left.width()
    }

    /// Number of rows of both images.
    pub fn height(&self) -> usize {
        self.left.height()
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn rows_are_aligned() {
        let img = AlignedImage::from_fn(13, 5, |r, c| (r * 100 + c) as Float);
        for r in 0..5 {
            let ptr = img.row(r).as_ptr() as usize;
            assert_eq!(ptr % ALIGNMENT, 0);
            assert_eq!(img.row(r).len(), 13);
        }
        assert_eq!(img[(3, 12)], 312.0);
        assert_eq!(img.get(3, 13), None);
        assert_eq!(img.get(5, 0), None);
    }

    #[test]
    #[should_panic]
    fn index_out_of_bounds_panics() {
        let img = AlignedImage::zeros(4, 4);
        let _ = img[(0, 4)];
    }

    #[test]
    fn matrix_conversions() {
        let mat = DMatrix::from_fn(3, 10, |r, c| (r * 10 + c) as u8);
        let img = AlignedImage::from_matrix(&mat);
        assert_eq!(img.shape(), (3, 10));
        assert_eq!(img[(2, 7)], 27.0);
        assert_eq!(img.to_matrix(), mat.map(Float::from));
    }

    #[test]
    fn pair_checks_shapes() {
        let a = AlignedImage::zeros(10, 4);
        let b = AlignedImage::zeros(9, 4);
        let empty = AlignedImage::zeros(0, 4);
        assert!(RectifiedImagePair::new(&a, &a).is_ok());
        assert_eq!(
            RectifiedImagePair::new(&a, &b).unwrap_err(),
            InputError::DimensionMismatch {
                left: (4, 10),
                right: (4, 9)
            }
        );
        assert_eq!(
            RectifiedImagePair::new(&empty, &empty).unwrap_err(),
            InputError::EmptyImage
        );
    }
}
