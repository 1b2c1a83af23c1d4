// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stereo odometry front-end in Rust.
//!
//! Two engines sharing a multi-resolution representation:
//!
//! * [`core::stereo`]: dense epipolar matching of a rectified stereo pair,
//!   producing disparity, depth and validity maps.
//! * [`core::track`]: coarse-to-fine robust Levenberg-Marquardt photometric
//!   alignment of two frames, using the depth of the previous frame.
//!
//! A typical per-frame flow looks like this:
//!
//! ```ignore
//! let depth = estimator.compute_depth(&left, &right)?;
//! let depth_pyr = DepthPyramid::new(nb_levels, &depth.depth, &depth.validity)?;
//! let img_pyr = ImagePyramid::from_aligned(nb_levels, &left);
//! let solution = solver.solve(&prev_img_pyr, &prev_depth_pyr, &img_pyr, Iso3::identity())?;
//! global_pose = track::compose(&global_pose, &solution.pose);
//! ```

#![warn(missing_docs)]

pub mod core;
pub mod math;
pub mod misc;
