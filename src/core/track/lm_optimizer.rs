// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Levenberg-Marquardt implementation of the `optimizer::State` trait
//! for the robust inverse compositional photometric alignment.
//!
//! Jacobians only depend on the previous frame,
//! so they are computed once per level, before iterations.
//! Each candidate motion `T` (previous to current camera) is evaluated by
//! warping every tracked point and comparing intensities:
//!
//! ```text
//! r = I_prev(x) - I_cur(project(T * back_project(x, depth)))
//! ```

use log::{debug, warn};
use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::core::camera::CameraModel;
use crate::core::error::{Error, Result};
use crate::core::track::Config;
use crate::math::accumulator::NormalEquations;
use crate::math::optimizer::{self, Continue};
use crate::math::se3;
use crate::misc::type_aliases::{Float, Iso3, Mat6, Point3, Vec6};

/// Smallest hessian diagonal coefficient used to scale the damping.
const MIN_DIAGONAL: Float = 1e-6;

/// A pixel of the previous frame used for tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPoint {
    /// Back-projected 3D point, in the previous camera frame.
    pub point: Point3,
    /// Intensity in the previous image.
    pub intensity: Float,
    /// Derivative of the intensity with respect to the twist `(v, w)`,
    /// evaluated at the identity motion.
    pub jacobian: Vec6,
}

/// Precomputed data available for the optimizer iterations of one level.
pub struct Obs<'a, C> {
    /// Pyramid level.
    pub level: usize,
    /// Camera at this level.
    pub camera: &'a C,
    /// Current image at this level.
    pub image: &'a DMatrix<Float>,
    /// Points of the previous frame.
    pub points: &'a [TrackedPoint],
    /// Solver configuration.
    pub config: &'a Config,
}

/// State of the Levenberg-Marquardt optimizer.
#[derive(Debug, Clone)]
pub struct LMOptimizerState {
    /// Levenberg-Marquardt hessian diagonal coefficient.
    pub lm_coef: Float,
    /// Number of consecutive rejected steps.
    pub nb_rejections: usize,
    /// True once the energy stopped decreasing significantly.
    pub converged: bool,
    /// Data of the last accepted model.
    pub eval_data: EvalData,
    level: usize,
    max_damping: Float,
}

/// Data resulting of a successful model evaluation.
#[derive(Debug, Clone)]
pub struct EvalData {
    /// Estimated motion.
    pub model: Iso3,
    /// Mean robust cost of the residuals.
    pub energy: Float,
    /// Squared residual scale the energy is computed with.
    pub scale_2: Float,
    /// Number of residuals.
    pub support: usize,
    /// Weighted `sum(J J^t)`.
    pub hessian: Mat6,
    /// Weighted `sum(J r)`.
    pub gradient: Vec6,
}

/// Either an evaluation of a model with a lower energy,
/// or the energy of a rejected model.
pub type EvalState = std::result::Result<EvalData, Float>;

impl LMOptimizerState {
    /// `(point index, residual)` of all points visible in the current image.
    fn residuals<C: CameraModel + Sync>(obs: &Obs<C>, model: &Iso3) -> Vec<(usize, Float)> {
        obs.points
            .par_iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let warped = model * p.point;
                if warped.z <= 0.0 {
                    return None;
                }
                let pixel = obs.camera.project(&warped);
                interpolate(pixel.x, pixel.y, obs.image).map(|cur| (i, p.intensity - cur))
            })
            .collect()
    }

    /// Mean robust cost, infinite without enough support.
    #[allow(clippy::cast_precision_loss)]
    fn energy(config: &Config, residuals: &[(usize, Float)], scale_2: Float) -> Float {
        if residuals.len() < config.min_support {
            return Float::INFINITY;
        }
        let total: f64 = residuals
            .par_iter()
            .map(|&(_, r)| f64::from(config.robust_loss.rho_and_weight(r, scale_2).0))
            .sum();
        (total / residuals.len() as f64) as Float
    }

    /// Full evaluation of a model, given its residuals.
    #[allow(clippy::cast_precision_loss)]
    fn eval_data<C: CameraModel + Sync>(
        obs: &Obs<C>,
        model: Iso3,
        residuals: &[(usize, Float)],
        scale_2: Float,
    ) -> EvalData {
        let loss = obs.config.robust_loss;
        let eqs = residuals
            .par_iter()
            .fold(NormalEquations::default, |mut eqs, &(i, r)| {
                let (rho, weight) = loss.rho_and_weight(r, scale_2);
                eqs.push(&obs.points[i].jacobian, r, weight, rho);
                eqs
            })
            .reduce(NormalEquations::default, NormalEquations::merge);
        EvalData {
            model,
            energy: (eqs.cost / eqs.count.max(1) as f64) as Float,
            scale_2,
            support: eqs.count,
            hessian: eqs.hessian.to_mat(),
            gradient: eqs.gradient,
        }
    }

    /// Evaluate a model with a scale re-estimated from its own residuals.
    fn rescaled_eval_data<C: CameraModel + Sync>(
        obs: &Obs<C>,
        model: Iso3,
        residuals: &[(usize, Float)],
    ) -> EvalData {
        let loss = obs.config.robust_loss;
        let scale_2 = if loss.is_scaled() {
            let values: Vec<Float> = residuals.iter().map(|&(_, r)| r).collect();
            loss.estimate_scale(&values)
        } else {
            1.0
        };
        Self::eval_data(obs, model, residuals, scale_2)
    }
}

impl<'a, C: CameraModel + Sync> optimizer::State<Obs<'a, C>, EvalState, Iso3, Error>
    for LMOptimizerState
{
    /// Evaluate the initial model, failing without enough support.
    fn init(obs: &Obs<'a, C>, model: Iso3) -> Result<Self> {
        let residuals = Self::residuals(obs, &model);
        let minimum = obs.config.min_support;
        if residuals.len() < minimum {
            warn!(
                "Level {}: only {} residuals for {} required",
                obs.level,
                residuals.len(),
                minimum
            );
            return Err(Error::InsufficientData {
                level: obs.level,
                support: residuals.len(),
                minimum,
            });
        }
        Ok(Self {
            lm_coef: obs.config.initial_damping,
            nb_rejections: 0,
            converged: false,
            eval_data: Self::rescaled_eval_data(obs, model, &residuals),
            level: obs.level,
            max_damping: obs.config.max_damping,
        })
    }

    /// Solve the damped normal equations and apply the step
    /// in an inverse compositional way: `T <- T * exp(step)^-1`.
    ///
    /// Damping adds `lm_coef * max(H_ii, MIN_DIAGONAL)` to each diagonal coefficient.
    /// If the damped hessian is not positive definite,
    /// damping is increased until it is, or until it reaches its maximum.
    fn step(&mut self) -> Result<Iso3> {
        loop {
            let mut hessian = self.eval_data.hessian;
            for i in 0..6 {
                // A floor keeps unobservable directions (zero diagonal) dampable.
                hessian[(i, i)] += self.lm_coef * hessian[(i, i)].max(MIN_DIAGONAL);
            }
            if let Some(cholesky) = hessian.cholesky() {
                let delta = -cholesky.solve(&self.eval_data.gradient);
                let model = self.eval_data.model * se3::exp(delta).inverse();
                return Ok(se3::renormalize(model));
            }
            self.lm_coef *= 10.0;
            if !(self.lm_coef <= self.max_damping) {
                warn!(
                    "Level {}: damped hessian not invertible, giving up at damping {}",
                    self.level, self.lm_coef
                );
                return Err(Error::Numerical {
                    level: self.level,
                    damping: self.lm_coef,
                });
            }
        }
    }

    /// Compute the energy of the new model with the current scale,
    /// and its normal equations only if the energy did not increase.
    fn eval(&self, obs: &Obs<'a, C>, model: Iso3) -> EvalState {
        let residuals = Self::residuals(obs, &model);
        let energy = Self::energy(obs.config, &residuals, self.eval_data.scale_2);
        if energy > self.eval_data.energy || !energy.is_finite() {
            Err(energy)
        } else {
            Ok(Self::eval_data(obs, model, &residuals, self.eval_data.scale_2))
        }
    }

    /// Keep the new model if it is better and update the damping accordingly.
    /// Stop when the energy decrease becomes relatively small,
    /// after too many consecutive rejections, or when the budget is exhausted.
    fn stop_criterion(
        self,
        obs: &Obs<'a, C>,
        nb_iter: usize,
        eval_state: EvalState,
    ) -> Result<(Self, Continue)> {
        let config = obs.config;
        let budget = config.max_iterations.get(obs.level).copied().unwrap_or(0);
        let budget_exhausted = nb_iter >= budget;
        match eval_state {
            Ok(eval_data) => {
                let old_energy = self.eval_data.energy;
                let converged =
                    old_energy <= 0.0 || eval_data.energy > config.precision * old_energy;
                debug!(
                    "Level {}, iteration {}: energy {} -> {} (damping {})",
                    obs.level, nb_iter, old_energy, eval_data.energy, self.lm_coef
                );
                let eval_data = if config.robust_loss.is_scaled() {
                    let residuals = Self::residuals(obs, &eval_data.model);
                    Self::rescaled_eval_data(obs, eval_data.model, &residuals)
                } else {
                    eval_data
                };
                let kept_state = Self {
                    lm_coef: 0.1 * self.lm_coef,
                    nb_rejections: 0,
                    converged,
                    eval_data,
                    ..self
                };
                let continuation = if converged || budget_exhausted {
                    Continue::Stop
                } else {
                    Continue::Forward
                };
                Ok((kept_state, continuation))
            }
            Err(energy) => {
                debug!(
                    "Level {}, iteration {}: rejected energy {} (damping {})",
                    obs.level, nb_iter, energy, self.lm_coef
                );
                let mut kept_state = self;
                kept_state.lm_coef *= 10.0;
                kept_state.nb_rejections += 1;
                if kept_state.nb_rejections > config.max_rejections {
                    // No damping improves the energy: local minimum.
                    kept_state.converged = true;
                    Ok((kept_state, Continue::Stop))
                } else if budget_exhausted {
                    Ok((kept_state, Continue::Stop))
                } else {
                    Ok((kept_state, Continue::Forward))
                }
            }
        }
    }
}

/// Bilinear interpolation of an image at floating point `(x, y) = (col, row)`.
/// Return `None` if the 4 neighbors are not all inside the image.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_precision_loss)]
pub fn interpolate(x: Float, y: Float, image: &DMatrix<Float>) -> Option<Float> {
    let (height, width) = image.shape();
    // Bounds are checked on floats, before any cast to usize.
    let max_x = width.saturating_sub(1) as Float;
    let max_y = height.saturating_sub(1) as Float;
    if !(x >= 0.0 && y >= 0.0 && x < max_x && y < max_y) {
        return None;
    }
    let (u, v) = (x.floor(), y.floor());
    let (u_0, v_0) = (u as usize, v as usize);
    if u_0 + 1 >= width || v_0 + 1 >= height {
        return None;
    }
    let (a, b) = (x - u, y - v);
    let top = (1.0 - a) * image[(v_0, u_0)] + a * image[(v_0, u_0 + 1)];
    let bottom = (1.0 - a) * image[(v_0 + 1, u_0)] + a * image[(v_0 + 1, u_0 + 1)];
    Some((1.0 - b) * top + b * bottom)
}

// TESTS #############################################################
