// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Robust losses for iteratively re-weighted least squares.
//!
//! For a residual `r`, a loss gives its cost `rho(r)` and the weight
//! `w(r) = rho'(r) / (2 r)` of the residual in the normal equations,
//! such that the plain least squares loss `rho(r) = r^2` has weight 1.

use serde::{Deserialize, Serialize};

use crate::core::error::InputError;
use crate::misc::type_aliases::Float;

/// Smallest squared scale of the Student-t loss.
const MIN_SCALE_2: Float = 1e-6;

/// Fixed point iterations used to estimate the Student-t scale.
const SCALE_ITERATIONS: usize = 10;

/// Robust loss applied to photometric residuals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RobustLoss {
    /// Plain least squares.
    None,
    /// Quadratic up to `delta`, linear beyond.
    Huber {
        /// Residual magnitude where the loss becomes linear.
        delta: Float,
    },
    /// Negative log-likelihood of a Student-t distribution
    /// whose scale is re-estimated from the residuals.
    StudentT {
        /// Degrees of freedom.
        dof: Float,
    },
}

impl Default for RobustLoss {
    fn default() -> Self {
        RobustLoss::Huber { delta: 28.0 }
    }
}

impl RobustLoss {
    /// Check the loss parameter.
    pub fn validate(&self) -> Result<(), InputError> {
        match *self {
            RobustLoss::Huber { delta } if !(delta > 0.0) => Err(InputError::InvalidConfig(
                format!("Huber delta must be > 0, got {}", delta),
            )),
            RobustLoss::StudentT { dof } if !(dof > 0.0) => Err(InputError::InvalidConfig(
                format!("Student-t degrees of freedom must be > 0, got {}", dof),
            )),
            _ => Ok(()),
        }
    }

    /// True if the loss needs a scale estimated from the residuals.
    pub fn is_scaled(&self) -> bool {
        matches!(self, RobustLoss::StudentT { .. })
    }

    /// Return `(rho(r), w(r))` for a residual `r`.
    /// `scale_2` is the squared scale of the residuals, only used by Student-t.
    #[inline]
    pub fn rho_and_weight(&self, r: Float, scale_2: Float) -> (Float, Float) {
        let r2 = r * r;
        match *self {
            RobustLoss::None => (r2, 1.0),
            RobustLoss::Huber { delta } => {
                let abs_r = r.abs();
                if abs_r <= delta {
                    (r2, 1.0)
                } else {
                    (2.0 * delta * abs_r - delta * delta, delta / abs_r)
                }
            }
            RobustLoss::StudentT { dof } => {
                let t = r2 / scale_2;
                let rho = scale_2 * (dof + 1.0) * (t / dof).ln_1p();
                (rho, (dof + 1.0) / (dof + t))
            }
        }
    }

    /// Squared scale of the residuals, by the fixed point iteration
    /// `s2 = mean(r^2 * (dof + 1) / (dof + r^2 / s2))` starting at the variance.
    /// Returns 1 for losses without scale or without residual.
    #[allow(clippy::cast_precision_loss)]
    pub fn estimate_scale(&self, residuals: &[Float]) -> Float {
        let dof = match *self {
            RobustLoss::StudentT { dof } if !residuals.is_empty() => dof,
            _ => return 1.0,
        };
        let n = residuals.len() as Float;
        let mut scale_2 = (residuals.iter().map(|r| r * r).sum::<Float>() / n).max(MIN_SCALE_2);
        for _ in 0..SCALE_ITERATIONS {
            let next = residuals
                .iter()
                .map(|r| {
                    let r2 = r * r;
                    r2 * (dof + 1.0) / (dof + r2 / scale_2)
                })
                .sum::<Float>()
                / n;
            let next = next.max(MIN_SCALE_2);
            let converged = (next - scale_2).abs() <= 1e-3 * scale_2;
            scale_2 = next;
            if converged {
                break;
            }
        }
        scale_2
    }
}

// TESTS #############################################################
