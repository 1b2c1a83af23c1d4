// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lie algebra/group functions for 3D rigid body motions.
//!
//! A twist is parameterized as `(v, w)`:
//! linear velocity first, then the rotation vector.

use nalgebra::{Quaternion, Translation3, UnitQuaternion};

use crate::math::so3;
use crate::misc::type_aliases::{Float, Iso3, Mat3, Vec3, Vec6};

/// Parameterization of a twist (element of se3).
pub type Twist = Vec6;

/// Build a twist from its linear and angular parts.
pub fn twist(v: Vec3, w: Vec3) -> Twist {
    Vec6::new(v.x, v.y, v.z, w.x, w.y, w.z)
}

/// Linear velocity part of a twist.
pub fn linear_velocity(xi: &Twist) -> Vec3 {
    xi.fixed_rows::<3>(0).into_owned()
}

/// Angular velocity part of a twist.
pub fn angular_velocity(xi: &Twist) -> Vec3 {
    xi.fixed_rows::<3>(3).into_owned()
}

/// Coefficients `(a, b)` of `V = I + a * hat(w) + b * hat(w)^2`,
/// the left Jacobian of SO3 for a rotation vector of squared norm `theta_2`.
fn v_coefficients(theta_2: Float) -> (Float, Float) {
    if theta_2 < so3::SMALL_ANGLE_2 {
        (0.5 - theta_2 / 24.0, 1.0 / 6.0 - theta_2 / 120.0)
    } else {
        let theta = theta_2.sqrt();
        let (sin, cos) = theta.sin_cos();
        ((1.0 - cos) / theta_2, (theta - sin) / (theta * theta_2))
    }
}

/// Exponential map, from a twist to a rigid body motion.
pub fn exp(xi: Twist) -> Iso3 {
    let v = linear_velocity(&xi);
    let w = angular_velocity(&xi);
    let (a, b) = v_coefficients(w.norm_squared());
    let v_mat = Mat3::identity() + a * so3::hat(w) + b * so3::hat_2(w);
    Iso3::from_parts(Translation3::from(v_mat * v), so3::exp(w))
}

/// Logarithm map, inverse of `exp`.
pub fn log(iso: Iso3) -> Twist {
    let w = so3::log(iso.rotation);
    let theta_2 = w.norm_squared();
    // Inverse of V: I - hat(w) / 2 + c * hat(w)^2
    let c = if theta_2 < so3::SMALL_ANGLE_2 {
        1.0 / 12.0 + theta_2 / 720.0
    } else {
        let theta = theta_2.sqrt();
        let half = 0.5 * theta;
        (1.0 - half / half.tan()) / theta_2
    };
    let v_inv = Mat3::identity() - 0.5 * so3::hat(w) + c * so3::hat_2(w);
    twist(v_inv * iso.translation.vector, w)
}

/// Renormalize the rotation of a motion accumulating small updates.
///
/// Successive products of unit quaternions slowly drift away from unit norm.
/// Since the drift is tiny, the first order approximation
/// `q / |q| ~ q * (3 - |q|^2) / 2` is enough and avoids a square root.
pub fn renormalize(iso: Iso3) -> Iso3 {
    let q = iso.rotation.into_inner();
    let scale = 0.5 * (3.0 - q.norm_squared());
    let rotation = UnitQuaternion::new_unchecked(Quaternion::from(q.coords * scale));
    Iso3::from_parts(iso.translation, rotation)
}

// TESTS #############################################################
