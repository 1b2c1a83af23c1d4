// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lie algebra/group functions for 3D rotations.
//!
//! Rotations are unit quaternions, tangent vectors are rotation vectors
//! (axis times angle). References:
//! - Sophus c++ library: <https://github.com/strasdat/Sophus>
//! - Ethan Eade, Lie groups for 2D and 3D transformations: <http://ethaneade.com/lie.pdf>

use nalgebra::{Quaternion, UnitQuaternion};

use crate::misc::type_aliases::{Float, Mat3, Vec3};

/// Squared angle under which Taylor expansions are used.
pub(crate) const SMALL_ANGLE_2: Float = 1e-4;

/// Skew-symmetric matrix of the cross product: `hat(w) * v == w.cross(v)`.
#[rustfmt::skip]
pub fn hat(w: Vec3) -> Mat3 {
    Mat3::new(
         0.0, -w.z,  w.y,
         w.z,  0.0, -w.x,
        -w.y,  w.x,  0.0,
    )
}

/// `hat(w) * hat(w)`, computed directly. The result is symmetric.
pub fn hat_2(w: Vec3) -> Mat3 {
    w * w.transpose() - Mat3::from_diagonal_element(w.norm_squared())
}

/// Inverse of `hat`, reading the lower triangle only.
pub fn vee(mat: Mat3) -> Vec3 {
    Vec3::new(mat.m32, mat.m13, mat.m21)
}

/// Exponential map, from a rotation vector to a rotation.
pub fn exp(w: Vec3) -> UnitQuaternion<Float> {
    let theta_2 = w.norm_squared();
    let (real, imag) = if theta_2 < SMALL_ANGLE_2 {
        (1.0 - theta_2 / 8.0, 0.5 - theta_2 / 48.0)
    } else {
        let theta = theta_2.sqrt();
        let (sin, cos) = (0.5 * theta).sin_cos();
        (cos, sin / theta)
    };
    UnitQuaternion::new_unchecked(Quaternion::from_parts(real, imag * w))
}

/// Logarithm map, inverse of `exp`, with angles in [-pi, pi].
pub fn log(rotation: UnitQuaternion<Float>) -> Vec3 {
    let imag = rotation.vector();
    let imag_norm_2 = imag.norm_squared();
    let real = rotation.scalar();
    if imag_norm_2 < SMALL_ANGLE_2 {
        // theta / sin(theta/2) ~ 2 / cos(theta/2)
        (2.0 / real) * imag
    } else {
        let imag_norm = imag_norm_2.sqrt();
        // q and -q are the same rotation, keep the shortest angle.
        let theta = if real >= 0.0 {
            2.0 * imag_norm.atan2(real)
        } else {
            -2.0 * imag_norm.atan2(-real)
        };
        (theta / imag_norm) * imag
    }
}

// TESTS #############################################################
