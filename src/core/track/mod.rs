// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Frame to frame camera tracking by direct photometric alignment.
//!
//! Implementation of "Lucas-Kanade 20 years on: A unifying framework"
//! in the inverse compositional case, robustified and coarse to fine.
//! The warping function is parameterized by the Lie algebra of twists se(3).
//!
//! The estimated motion `T` maps points from the previous camera frame
//! into the current camera frame. Use `compose` to chain motions into
//! a trajectory of camera poses.

pub mod lm_optimizer;
pub mod robust;

use itertools::iproduct;
use log::info;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::core::camera::CameraModel;
use crate::core::error::{InputError, Result};
use crate::core::gradient;
use crate::core::multires::Levels;
use crate::core::pyramid::{DepthLevel, DepthPyramid, ImagePyramid};
use crate::math::optimizer::State as _;
use crate::math::{se3, so3};
use crate::misc::type_aliases::{Float, Iso3, Mat23, Point2, Vec2, Vec3, Vec6};

use self::lm_optimizer::{LMOptimizerState, Obs, TrackedPoint};
pub use self::robust::RobustLoss;

/// Configuration of the pose solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of pyramid levels used, coarsest first.
    pub nb_levels: usize,
    /// Initial Levenberg-Marquardt damping coefficient.
    pub initial_damping: Float,
    /// Damping above which the normal equations are considered unsolvable.
    pub max_damping: Float,
    /// A level has converged when an accepted step keeps more than
    /// this fraction of the previous energy.
    pub precision: Float,
    /// Iteration budget of each level, finest level first.
    pub max_iterations: Levels<usize>,
    /// Consecutive rejected steps tolerated before stopping a level.
    pub max_rejections: usize,
    /// Robust loss applied to the residuals.
    pub robust_loss: RobustLoss,
    /// Minimum gradient norm of a previous frame pixel to be tracked.
    pub photometric_threshold: Float,
    /// Minimum number of residuals at any level and iteration.
    pub min_support: usize,
    /// Maximum number of tracked pixels per level.
    pub max_residuals: Option<usize>,
}

impl Config {
    /// Parameters used for the KITTI stereo sequences.
    pub fn kitti() -> Self {
        Self {
            nb_levels: 4,
            initial_damping: 0.01,
            max_damping: 1e8,
            precision: 0.995,
            max_iterations: vec![10, 20, 30, 30],
            max_rejections: 5,
            robust_loss: RobustLoss::Huber { delta: 28.0 },
            photometric_threshold: 10.0,
            min_support: 100,
            max_residuals: Some(5000),
        }
    }

    /// Check that every parameter is in its domain.
    pub fn validate(&self) -> std::result::Result<(), InputError> {
        let invalid = |msg: String| Err(InputError::InvalidConfig(msg));
        if self.nb_levels == 0 {
            return invalid("nb_levels must be >= 1".to_string());
        }
        if self.max_iterations.len() < self.nb_levels {
            return invalid(format!(
                "{} iteration budgets for {} levels",
                self.max_iterations.len(),
                self.nb_levels
            ));
        }
        if self.max_iterations.iter().any(|&n| n == 0) {
            return invalid("iteration budgets must be >= 1".to_string());
        }
        if !(self.initial_damping > 0.0 && self.initial_damping <= self.max_damping) {
            return invalid("damping must satisfy 0 < initial_damping <= max_damping".to_string());
        }
        if !(self.precision > 0.0 && self.precision < 1.0) {
            return invalid(format!("precision must be in ]0, 1[, got {}", self.precision));
        }
        if !(self.photometric_threshold >= 0.0) {
            return invalid("photometric_threshold must be >= 0".to_string());
        }
        // 6 degrees of freedom need at least 6 residuals.
        if self.min_support < 6 {
            return invalid(format!("min_support must be >= 6, got {}", self.min_support));
        }
        if let Some(max) = self.max_residuals {
            if max < self.min_support {
                return invalid(format!(
                    "max_residuals ({}) must be >= min_support ({})",
                    max, self.min_support
                ));
            }
        }
        self.robust_loss.validate()
    }
}

/// Optimization summary of one pyramid level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelReport {
    /// Pyramid level, 0 is the finest.
    pub level: usize,
    /// Number of iterations (accepted and rejected steps).
    pub iterations: usize,
    /// Number of residuals of the final model.
    pub support: usize,
    /// Mean robust cost of the final model.
    pub cost: Float,
    /// False if the iteration budget was exhausted first.
    pub converged: bool,
}

/// Result of a successful pose estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Motion from the previous camera frame to the current one.
    pub pose: Iso3,
    /// Per level reports, finest level first.
    pub levels: Levels<LevelReport>,
    /// True if every level converged before exhausting its budget.
    pub converged: bool,
    /// Mean robust cost at the finest level.
    pub final_cost: Float,
}

/// Coarse to fine photometric pose solver.
/// Holds an immutable configuration and borrows one camera per pyramid level.
pub struct PoseSolver<'a, C> {
    config: Config,
    cameras: &'a [C],
}

impl<'a, C: CameraModel + Sync> PoseSolver<'a, C> {
    /// Validate the configuration.
    /// `cameras[l]` is the camera at pyramid level `l`.
    pub fn new(config: Config, cameras: &'a [C]) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, cameras })
    }

    /// Configuration used by this solver.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Estimate the motion from the previous to the current frame,
    /// starting from an initial guess (typically the identity).
    ///
    /// Fails if inputs are inconsistent, if a level does not have
    /// `min_support` residuals, or if the normal equations cannot be solved.
    /// Exhausting an iteration budget is not a failure,
    /// it is reported by `Solution::converged`.
    pub fn solve(
        &self,
        prev: &ImagePyramid,
        prev_depth: &DepthPyramid,
        cur: &ImagePyramid,
        initial_pose: Iso3,
    ) -> Result<Solution> {
        let nb_levels = self.check_inputs(prev, prev_depth, cur)?;
        let mut model = initial_pose;
        let mut reports = Vec::with_capacity(nb_levels);
        for lvl in (0..nb_levels).rev() {
            let points = self.tracked_points(lvl, prev.level(lvl), prev_depth.level(lvl));
            let obs = Obs {
                level: lvl,
                camera: &self.cameras[lvl],
                image: cur.level(lvl),
                points: &points,
                config: &self.config,
            };
            let (state, iterations) = LMOptimizerState::iterative_solve(&obs, model)?;
            model = state.eval_data.model;
            let xi = se3::log(model);
            info!(
                "Level {}: {} after {} iterations, cost {} with {} residuals, |v| {:.4} |w| {:.5}",
                lvl,
                if state.converged { "converged" } else { "not converged" },
                iterations,
                state.eval_data.energy,
                state.eval_data.support,
                se3::linear_velocity(&xi).norm(),
                se3::angular_velocity(&xi).norm()
            );
            reports.push(LevelReport {
                level: lvl,
                iterations,
                support: state.eval_data.support,
                cost: state.eval_data.energy,
                converged: state.converged,
            });
        }
        reports.reverse();
        Ok(Solution {
            pose: model,
            converged: reports.iter().all(|r| r.converged),
            final_cost: reports.first().map_or(0.0, |r| r.cost),
            levels: reports,
        })
    }

    /// Check pyramid consistency, return the number of levels to use.
    fn check_inputs(
        &self,
        prev: &ImagePyramid,
        prev_depth: &DepthPyramid,
        cur: &ImagePyramid,
    ) -> std::result::Result<usize, InputError> {
        let counts = vec![prev.nb_levels(), prev_depth.nb_levels(), cur.nb_levels()];
        if counts.iter().any(|&n| n != counts[0]) {
            return Err(InputError::LevelMismatch(counts));
        }
        let nb_levels = counts[0].min(self.config.nb_levels);
        if self.cameras.len() < nb_levels {
            return Err(InputError::MissingCameraLevel {
                cameras: self.cameras.len(),
                levels: nb_levels,
            });
        }
        for lvl in 0..nb_levels {
            let shape = prev.level(lvl).shape();
            for other in [cur.level(lvl).shape(), prev_depth.level(lvl).depth.shape()] {
                if other != shape {
                    return Err(InputError::DimensionMismatch {
                        left: shape,
                        right: other,
                    });
                }
            }
        }
        if prev.level(0).is_empty() {
            return Err(InputError::EmptyImage);
        }
        Ok(nb_levels)
    }

    /// Points of the previous frame used at one level:
    /// interior pixels with a valid depth and a strong enough gradient.
    #[allow(clippy::cast_precision_loss)]
    fn tracked_points(
        &self,
        lvl: usize,
        img: &DMatrix<Float>,
        depth: &DepthLevel,
    ) -> Vec<TrackedPoint> {
        let camera = &self.cameras[lvl];
        let (grad_x, grad_y) = gradient::centered(img);
        let grad_norm_2 = gradient::squared_norm(&grad_x, &grad_y);
        let (nb_rows, nb_cols) = img.shape();
        let threshold_2 = self.config.photometric_threshold * self.config.photometric_threshold;
        let usable = |&(row, col): &(usize, usize)| {
            depth.get(row, col).map_or(false, |d| d > 0.0) && grad_norm_2[(row, col)] >= threshold_2
        };
        let pixels: Vec<(usize, usize)> =
            iproduct!(1..nb_rows.saturating_sub(1), 1..nb_cols.saturating_sub(1))
                .filter(usable)
                .collect();
        // Exactly `max` pixels, evenly spread over the row major order.
        let pixels = match self.config.max_residuals {
            Some(max) if pixels.len() > max => {
                (0..max).map(|i| pixels[i * pixels.len() / max]).collect()
            }
            _ => pixels,
        };
        pixels
            .into_iter()
            .map(|(row, col)| {
                let pixel = Point2::new(col as Float, row as Float);
                let point = camera.back_project(&pixel, depth.depth[(row, col)]);
                let grad = Vec2::new(grad_x[(row, col)], grad_y[(row, col)]);
                TrackedPoint {
                    point,
                    intensity: img[(row, col)],
                    jacobian: warp_jacobian(grad, camera.projection_jacobian(&point), &point.coords),
                }
            })
            .collect()
    }
}

/// Derivative of the intensity at a warped point with respect to a twist `(v, w)`
/// applied to that point: `grad^t * d(project)/dP * [I | -hat(P)]`.
fn warp_jacobian(grad: Vec2, proj_jacobian: Mat23, point: &Vec3) -> Vec6 {
    let linear = grad.transpose() * proj_jacobian;
    let angular = -(linear * so3::hat(*point));
    Vec6::new(linear[0], linear[1], linear[2], angular[0], angular[1], angular[2])
}

/// Pose of the current camera given the pose of the previous one
/// and the motion estimated by the solver: `global * relative^-1`.
pub fn compose(global: &Iso3, relative: &Iso3) -> Iso3 {
    global * relative.inverse()
}

// TESTS #############################################################
