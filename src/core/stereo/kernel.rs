// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Matching cost kernels.
//!
//! A kernel fills the SSD cost of a contiguous range of disparity candidates
//! for one left pixel. The vectorized kernel evaluates `LANES` candidates
//! at once, one per lane, and accumulates the pattern offsets in the same
//! order as the scalar kernel. Both therefore produce bit-identical costs,
//! and the same accept/reject decisions.

use serde::{Deserialize, Serialize};
use wide::f32x8;

use crate::core::image::LANES;
use crate::misc::type_aliases::Float;

/// Half size of the biggest supported pattern.
/// Pixels closer than this to a border have no complete window.
pub const PATTERN_RADIUS: usize = 2;

/// Offsets `(d_row, d_col)` of the sparse pattern used in DSO.
#[rustfmt::skip]
pub const DSO_PATTERN: [(isize, isize); 8] = [
    (-2, 0),
    (-1, -1), (-1, 1),
    (0, -2), (0, 0), (0, 2),
    (1, -1),
    (2, 0),
];

/// Dense 5x5 window, row by row.
pub const DENSE_5X5_PATTERN: [(isize, isize); 25] = dense_5x5();

/// Five pixels along the epipolar line.
pub const LINE_5_PATTERN: [(isize, isize); 5] = [(0, -2), (0, -1), (0, 0), (0, 1), (0, 2)];

const fn dense_5x5() -> [(isize, isize); 25] {
    let mut pattern = [(0, 0); 25];
    let mut k = 0;
    while k < 25 {
        pattern[k] = ((k / 5) as isize - 2, (k % 5) as isize - 2);
        k += 1;
    }
    pattern
}

/// Which implementation evaluates matching costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Backend {
    /// Pick `Simd` if the CPU supports it, `Scalar` otherwise.
    #[default]
    Auto,
    /// Reference implementation, one candidate at a time.
    Scalar,
    /// `LANES` candidates at a time.
    Simd,
}

impl Backend {
    /// Backend best suited to the running CPU.
    pub fn detect() -> Self {
        if simd_supported() {
            Backend::Simd
        } else {
            Backend::Scalar
        }
    }

    /// Replace `Auto` by the detected backend.
    pub fn resolve(self) -> Self {
        match self {
            Backend::Auto => Self::detect(),
            other => other,
        }
    }

    /// Kernel implementing this backend.
    pub fn kernel(self) -> &'static dyn CostKernel {
        match self.resolve() {
            Backend::Simd => &SimdKernel,
            _ => &ScalarKernel,
        }
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn simd_supported() -> bool {
    is_x86_feature_detected!("avx")
}

#[cfg(target_arch = "aarch64")]
fn simd_supported() -> bool {
    true
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
fn simd_supported() -> bool {
    false
}

/// Everything a kernel needs to know about one left pixel.
pub struct Window<'a> {
    /// Pattern offsets `(d_row, d_col)`, within `PATTERN_RADIUS`.
    pub pattern: &'a [(isize, isize)],
    /// Left intensities at each pattern offset.
    pub left: &'a [Float],
    /// Right image rows `row - 2 ..= row + 2`.
    pub right_rows: [&'a [Float]; 2 * PATTERN_RADIUS + 1],
    /// Column of the left pixel.
    pub col: usize,
}

impl<'a> Window<'a> {
    /// Right column matching `(d_col, disparity)`.
    #[inline]
    fn right_col(&self, d_col: isize, disparity: usize) -> usize {
        (self.col as isize + d_col) as usize - disparity
    }

    #[inline]
    fn right_row(&self, d_row: isize) -> &'a [Float] {
        self.right_rows[(d_row + PATTERN_RADIUS as isize) as usize]
    }
}

/// Width-agnostic cost evaluation interface.
pub trait CostKernel: Sync {
    /// Fill `costs[i]` with the SSD of disparity `first + i`.
    ///
    /// The caller guarantees that the whole right window is inside the image
    /// for every candidate: `first + costs.len() - 1 <= col - PATTERN_RADIUS`.
    fn costs(&self, window: &Window, first: usize, costs: &mut [Float]);
}

/// Reference scalar kernel.
pub struct ScalarKernel;

impl ScalarKernel {
    #[inline]
    fn cost(window: &Window, disparity: usize) -> Float {
        let mut acc = 0.0;
        for (&(d_row, d_col), &left) in window.pattern.iter().zip(window.left) {
            let diff = left - window.right_row(d_row)[window.right_col(d_col, disparity)];
            acc += diff * diff;
        }
        acc
    }
}

impl CostKernel for ScalarKernel {
    fn costs(&self, window: &Window, first: usize, costs: &mut [Float]) {
        for (i, cost) in costs.iter_mut().enumerate() {
            *cost = Self::cost(window, first + i);
        }
    }
}

/// Vectorized kernel, one disparity candidate per lane.
pub struct SimdKernel;

impl SimdKernel {
    /// Costs of disparities `first .. first + LANES`.
    ///
    /// For a given offset, the right pixels of consecutive disparities
    /// are contiguous in memory (in reverse order), so one load per offset
    /// is enough: lane `j` holds disparity `first + LANES - 1 - j`.
    #[inline]
    fn batch(window: &Window, first: usize) -> [Float; LANES] {
        let last = first + LANES - 1;
        let mut acc = f32x8::ZERO;
        for (&(d_row, d_col), &left) in window.pattern.iter().zip(window.left) {
            let start = window.right_col(d_col, last);
            let mut lane = [0.0; LANES];
            lane.copy_from_slice(&window.right_row(d_row)[start..start + LANES]);
            let diff = f32x8::splat(left) - f32x8::from(lane);
            acc += diff * diff;
        }
        let reversed: [Float; LANES] = acc.into();
        let mut costs = [0.0; LANES];
        for (j, &c) in reversed.iter().enumerate() {
            costs[LANES - 1 - j] = c;
        }
        costs
    }
}

impl CostKernel for SimdKernel {
    fn costs(&self, window: &Window, first: usize, costs: &mut [Float]) {
        let mut chunks = costs.chunks_exact_mut(LANES);
        let mut d = first;
        for chunk in &mut chunks {
            chunk.copy_from_slice(&Self::batch(window, d));
            d += LANES;
        }
        // Remaining candidates, fewer than one full batch.
        ScalarKernel.costs(window, d, chunks.into_remainder());
    }
}

// TESTS #############################################################
