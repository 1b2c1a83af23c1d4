// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Call-level failures of the depth estimator and the pose solver.
//!
//! Per-pixel rejections (failed matches, points leaving the frame)
//! are never reported here, they only clear a validity bit
//! or drop a residual from an iteration.
//! Not reaching the required precision is not an error either,
//! see `track::Solution::converged`.

use crate::misc::type_aliases::Float;

/// Convenience alias used by all fallible functions of the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the depth estimator and the pose solver.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed inputs or configuration.
    #[error("invalid input: {0}")]
    Input(#[from] InputError),

    /// Not enough usable correspondences to attempt or sustain tracking.
    #[error("insufficient tracking support at level {level}: {support} < {minimum}")]
    InsufficientData {
        /// Pyramid level where it happened.
        level: usize,
        /// Number of usable residuals.
        support: usize,
        /// Configured minimum.
        minimum: usize,
    },

    /// Normal equations could not be solved even with the maximal damping.
    #[error("normal equations not solvable at level {level} (damping {damping})")]
    Numerical {
        /// Pyramid level where it happened.
        level: usize,
        /// Damping coefficient reached when giving up.
        damping: Float,
    },
}

/// Details of an invalid input.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InputError {
    /// An image has zero rows or columns.
    #[error("empty image")]
    EmptyImage,

    /// Two images (or an image and a mask) do not have the same shape.
    #[error("shape mismatch: {left:?} vs {right:?} (rows, cols)")]
    DimensionMismatch {
        /// Shape of the first operand.
        left: (usize, usize),
        /// Shape of the second operand.
        right: (usize, usize),
    },

    /// Pyramids given to the solver do not have the same number of levels.
    #[error("pyramids have different numbers of levels: {0:?}")]
    LevelMismatch(Vec<usize>),

    /// Not enough camera levels for the pyramids.
    #[error("{cameras} camera levels provided for {levels} pyramid levels")]
    MissingCameraLevel {
        /// Number of camera levels.
        cameras: usize,
        /// Number of pyramid levels.
        levels: usize,
    },

    /// A configuration value is out of its domain.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
