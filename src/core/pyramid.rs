// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Multi-resolution intensity and depth representations of a frame.
//!
//! Both pyramids are immutable once built.
//! Level 0 is the full resolution, each level halves the previous one.

use nalgebra::DMatrix;

use crate::core::error::InputError;
use crate::core::image::AlignedImage;
use crate::core::multires::{self, Levels};
use crate::misc::type_aliases::Float;

/// Pyramid of intensity images, computed by 2x2 area averaging.
#[derive(Clone, Debug, PartialEq)]
pub struct ImagePyramid {
    levels: Levels<DMatrix<Float>>,
}

impl ImagePyramid {
    /// Build up to `nb_levels` levels from a base image.
    /// Fewer levels are produced if the image becomes too small to be halved.
    pub fn new(nb_levels: usize, base: DMatrix<Float>) -> Self {
        Self {
            levels: multires::mean_pyramid(nb_levels, base),
        }
    }

    /// Build the pyramid of an aligned stereo image (typically the left one).
    pub fn from_aligned(nb_levels: usize, base: &AlignedImage) -> Self {
        Self::new(nb_levels, base.to_matrix())
    }

    /// Number of levels actually built.
    pub fn nb_levels(&self) -> usize {
        self.levels.len()
    }

    /// Image at a given level.
    pub fn level(&self, lvl: usize) -> &DMatrix<Float> {
        &self.levels[lvl]
    }

    /// All levels, from the finest to the coarsest.
    pub fn levels(&self) -> &[DMatrix<Float>] {
        &self.levels
    }
}

/// Depth map and its validity mask at one resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthLevel {
    /// Depth in meters, 0 where invalid.
    pub depth: DMatrix<Float>,
    /// True where `depth` is meaningful.
    pub validity: DMatrix<bool>,
}

impl DepthLevel {
    /// Number of valid pixels.
    pub fn nb_valid(&self) -> usize {
        self.validity.iter().filter(|&&v| v).count()
    }

    /// Depth at `(row, col)` if valid.
    pub fn get(&self, row: usize, col: usize) -> Option<Float> {
        if self.validity[(row, col)] {
            Some(self.depth[(row, col)])
        } else {
            None
        }
    }
}

/// Pyramid of (depth, validity) pairs.
///
/// A coarse pixel is valid if at least one of its 4 children is valid,
/// and its depth is the mean of its valid children.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthPyramid {
    levels: Levels<DepthLevel>,
}

impl DepthPyramid {
    /// Build up to `nb_levels` levels from a depth map and its validity mask.
    pub fn new(
        nb_levels: usize,
        depth: &DMatrix<Float>,
        validity: &DMatrix<bool>,
    ) -> Result<Self, InputError> {
        if depth.is_empty() {
            return Err(InputError::EmptyImage);
        }
        if depth.shape() != validity.shape() {
            return Err(InputError::DimensionMismatch {
                left: depth.shape(),
                right: validity.shape(),
            });
        }
        let base = depth.zip_map(validity, |d, v| (if v { d } else { 0.0 }, v));
        let levels = multires::limited_sequence(nb_levels, base, |m| multires::halve(m, fuse))
            .into_iter()
            .map(|m| DepthLevel {
                depth: m.map(|(d, _)| d),
                validity: m.map(|(_, v)| v),
            })
            .collect();
        Ok(Self { levels })
    }

    /// Number of levels actually built.
    pub fn nb_levels(&self) -> usize {
        self.levels.len()
    }

    /// Depth data at a given level.
    pub fn level(&self, lvl: usize) -> &DepthLevel {
        &self.levels[lvl]
    }

    /// All levels, from the finest to the coarsest.
    pub fn levels(&self) -> &[DepthLevel] {
        &self.levels
    }
}

/// Validity-aware mean of a 2x2 block.
#[allow(clippy::many_single_char_names)]
#[allow(clippy::cast_precision_loss)]
fn fuse(
    a: (Float, bool),
    b: (Float, bool),
    c: (Float, bool),
    d: (Float, bool),
) -> (Float, bool) {
    let (sum, count) = [a, b, c, d]
        .iter()
        .filter(|(_, valid)| *valid)
        .fold((0.0, 0_usize), |(s, n), (depth, _)| (s + depth, n + 1));
    if count == 0 {
        (0.0, false)
    } else {
        (sum / count as Float, true)
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use quickcheck_macros;

    #[test]
    fn image_pyramid_area_average() {
        let base = DMatrix::from_row_slice(2, 4, &[0.0, 4.0, 8.0, 8.0, 2.0, 6.0, 8.0, 8.0]);
        let pyr = ImagePyramid::new(3, base);
        assert_eq!(pyr.nb_levels(), 2);
        assert_eq!(pyr.level(1).shape(), (1, 2));
        assert_eq!(pyr.level(1)[(0, 0)], 3.0);
        assert_eq!(pyr.level(1)[(0, 1)], 8.0);
    }

    #[test]
    fn depth_mean_of_valid_children_only() {
        let depth = DMatrix::from_row_slice(2, 2, &[2.0, 100.0, 4.0, 7.0]);
        let validity = DMatrix::from_row_slice(2, 2, &[true, false, true, false]);
        let pyr = DepthPyramid::new(2, &depth, &validity).unwrap();
        assert_eq!(pyr.level(1).get(0, 0), Some(3.0));
        // Invalid input depths are not kept at level 0 either.
        assert_eq!(pyr.level(0).depth[(0, 1)], 0.0);
    }

    #[test]
    fn all_invalid_children_give_invalid_parent() {
        let depth = DMatrix::repeat(4, 4, 5.0);
        let validity = DMatrix::repeat(4, 4, false);
        let pyr = DepthPyramid::new(3, &depth, &validity).unwrap();
        assert_eq!(pyr.nb_levels(), 3);
        assert!(pyr.levels().iter().all(|l| l.nb_valid() == 0));
        assert_eq!(pyr.level(2).get(0, 0), None);
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let depth = DMatrix::repeat(4, 4, 5.0);
        let validity = DMatrix::repeat(4, 3, true);
        assert_eq!(
            DepthPyramid::new(3, &depth, &validity),
            Err(InputError::DimensionMismatch {
                left: (4, 4),
                right: (4, 3)
            })
        );
    }

    // PROPERTY TESTS ################################################

    fn gen_depth(seed: &[(u8, bool)]) -> (DMatrix<Float>, DMatrix<bool>) {
        let cell = |i: usize, j: usize| seed.get((i * 8 + j) % seed.len().max(1)).copied();
        let depth = DMatrix::from_fn(8, 8, |i, j| {
            cell(i, j).map_or(1.0, |(d, _)| 0.5 + Float::from(d) / 10.0)
        });
        let validity = DMatrix::from_fn(8, 8, |i, j| cell(i, j).map_or(false, |(_, v)| v));
        (depth, validity)
    }

    #[quickcheck_macros::quickcheck]
    fn depth_pyramid_is_deterministic(seed: Vec<(u8, bool)>) -> bool {
        let (depth, validity) = gen_depth(&seed);
        let first = DepthPyramid::new(4, &depth, &validity).unwrap();
        let second = DepthPyramid::new(4, &depth, &validity).unwrap();
        first == second
    }

    #[quickcheck_macros::quickcheck]
    fn parent_valid_iff_one_child_valid(seed: Vec<(u8, bool)>) -> bool {
        let (depth, validity) = gen_depth(&seed);
        let pyr = DepthPyramid::new(4, &depth, &validity).unwrap();
        pyr.levels().windows(2).all(|pair| {
            let (fine, coarse) = (&pair[0], &pair[1]);
            let (rows, cols) = coarse.validity.shape();
            (0..rows).all(|i| {
                (0..cols).all(|j| {
                    let children = [(2 * i, 2 * j), (2 * i + 1, 2 * j), (2 * i, 2 * j + 1), (2 * i + 1, 2 * j + 1)];
                    let any_valid = children.iter().any(|&c| fine.validity[c]);
                    coarse.validity[(i, j)] == any_valid
                })
            })
        })
    }
}
