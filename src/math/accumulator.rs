// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Accumulation of the normal equations `H = sum(w J J^t)` and `g = sum(w J r)`.
//!
//! Sums over thousands of residuals in single precision lose accuracy
//! when every term is added to a big running total.
//! Terms are thus first summed in small batches of `BATCH_SIZE`,
//! and only batch sums are added to the total.

use nalgebra::SVector;

use crate::misc::type_aliases::{Float, Mat6, Vec6};

/// Number of terms summed together before moving to the total.
const BATCH_SIZE: u32 = 100;

/// Upper triangle of a symmetric 6x6 matrix, column by column.
type Packed = SVector<Float, 21>;

/// Accumulator of symmetric 6x6 matrices, storing only 21 coefficients.
#[derive(Clone, Debug, PartialEq)]
pub struct SymMat6 {
    batch_len: u32,
    batch: Packed,
    total: Packed,
}

impl Default for SymMat6 {
    fn default() -> Self {
        Self::new()
    }
}

impl SymMat6 {
    /// Initialize with zeros.
    pub fn new() -> Self {
        Self {
            batch_len: 0,
            batch: Packed::zeros(),
            total: Packed::zeros(),
        }
    }

    /// Add a term `w vv^t`.
    #[inline]
    pub fn add_vec_weighted(&mut self, weight: Float, vec: &Vec6) {
        if self.batch_len == BATCH_SIZE {
            self.flush();
        }
        let mut index = 0;
        for j in 0..6 {
            let wv_j = weight * vec[j];
            for i in j..6 {
                self.batch[index] += wv_j * vec[i];
                index += 1;
            }
        }
        self.batch_len += 1;
    }

    /// Merge another accumulator into this one.
    /// Used to combine the partial sums of parallel workers.
    pub fn add(&mut self, other: &Self) {
        self.flush();
        self.total += other.total + other.batch;
    }

    /// Move the current batch into the total.
    pub fn flush(&mut self) {
        if self.batch_len > 0 {
            self.total += self.batch;
            self.batch = Packed::zeros();
            self.batch_len = 0;
        }
    }

    /// Full symmetric matrix of everything accumulated so far.
    pub fn to_mat(&self) -> Mat6 {
        let packed = self.total + self.batch;
        let mut mat = Mat6::zeros();
        let mut index = 0;
        for j in 0..6 {
            for i in j..6 {
                mat[(i, j)] = packed[index];
                mat[(j, i)] = packed[index];
                index += 1;
            }
        }
        mat
    }
}

/// Weighted normal equations of a 6 parameters least squares problem.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalEquations {
    /// Accumulated `sum(w J J^t)`.
    pub hessian: SymMat6,
    /// Accumulated `sum(w J r)`.
    pub gradient: Vec6,
    /// Accumulated `sum(rho(r))`.
    pub cost: f64,
    /// Number of accumulated residuals.
    pub count: usize,
}

impl NormalEquations {
    /// Add one residual `r` with Jacobian `jac`, robust weight and robust cost.
    #[inline]
    pub fn push(&mut self, jac: &Vec6, residual: Float, weight: Float, cost: Float) {
        self.hessian.add_vec_weighted(weight, jac);
        self.gradient += (weight * residual) * jac;
        self.cost += f64::from(cost);
        self.count += 1;
    }

    /// Sum of two partial accumulations, for parallel reductions.
    pub fn merge(mut self, other: Self) -> Self {
        self.hessian.add(&other.hessian);
        self.gradient += other.gradient;
        self.cost += other.cost;
        self.count += other.count;
        self
    }
}

// TESTS #############################################################
