// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Camera models: pinhole intrinsics, multi-resolution halving and the stereo rig.

use crate::core::multires::Levels;
use crate::misc::type_aliases::{Float, Iso3, Mat23, Point2, Point3};

/// What the pose solver needs from a camera at one pyramid level.
///
/// `Intrinsics` is the real implementation,
/// but anything able to (back-)project points can be plugged in.
pub trait CameraModel {
    /// Project a 3D point (camera coordinates, `z > 0`) onto the image plane.
    fn project(&self, point: &Point3) -> Point2;

    /// Back-project a pixel at a given depth into camera coordinates.
    fn back_project(&self, pixel: &Point2, depth: Float) -> Point3;

    /// Jacobian of `project` with respect to the 3D point.
    fn projection_jacobian(&self, point: &Point3) -> Mat23;
}

/// Intrinsic parameters of a pinhole camera.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct Intrinsics {
    /// Principal point (cu, cv) in pixels.
    pub principal_point: (Float, Float),
    /// Focal length (fu, fv) in pixels.
    pub focal: (Float, Float),
    /// Skew coefficient.
    pub skew: Float,
}

impl Intrinsics {
    /// Intrinsics without skew and with a single focal length.
    pub fn new(focal: Float, principal_point: (Float, Float)) -> Self {
        Self {
            principal_point,
            focal: (focal, focal),
            skew: 0.0,
        }
    }

    /// Intrinsics of each level of a pyramid with `n` levels.
    /// Level 0 is the current resolution.
    pub fn multi_res(self, n: usize) -> Levels<Self> {
        std::iter::successors(Some(self), |i| Some(i.half_res()))
            .take(n)
            .collect()
    }

    /// Intrinsics of an image where each 2x2 block is merged into one pixel.
    /// Pixel coordinates refer to pixel centers, hence the half pixel shifts.
    pub fn half_res(&self) -> Self {
        let (cu, cv) = self.principal_point;
        let (fu, fv) = self.focal;
        Self {
            principal_point: ((cu + 0.5) / 2.0 - 0.5, (cv + 0.5) / 2.0 - 0.5),
            focal: (0.5 * fu, 0.5 * fv),
            skew: 0.5 * self.skew,
        }
    }
}

impl CameraModel for Intrinsics {
    fn project(&self, point: &Point3) -> Point2 {
        let (cu, cv) = self.principal_point;
        let (fu, fv) = self.focal;
        let x = point.x / point.z;
        let y = point.y / point.z;
        Point2::new(fu * x + self.skew * y + cu, fv * y + cv)
    }

    fn back_project(&self, pixel: &Point2, depth: Float) -> Point3 {
        let (cu, cv) = self.principal_point;
        let (fu, fv) = self.focal;
        let y = (pixel.y - cv) / fv;
        let x = (pixel.x - cu - self.skew * y) / fu;
        Point3::new(x * depth, y * depth, depth)
    }

    #[rustfmt::skip]
    fn projection_jacobian(&self, point: &Point3) -> Mat23 {
        let (fu, fv) = self.focal;
        let s = self.skew;
        let _z = 1.0 / point.z;
        let x = point.x * _z;
        let y = point.y * _z;
        Mat23::new(
            fu * _z,  s * _z,   -(fu * x + s * y) * _z,
            0.0,      fv * _z,  -fv * y * _z,
        )
    }
}

// STEREO RIG ##################################################################

/// A calibrated and rectified stereo pair of cameras.
#[derive(PartialEq, Debug, Clone)]
pub struct StereoRig {
    /// Intrinsics of the (rectified) left camera.
    pub left: Intrinsics,
    /// Intrinsics of the (rectified) right camera.
    pub right: Intrinsics,
    /// Rigid motion taking left camera coordinates into right camera coordinates.
    pub right_from_left: Iso3,
}

impl StereoRig {
    /// Rig of two identical rectified cameras, the right one being
    /// `baseline` meters along the x axis of the left one.
    pub fn rectified(intrinsics: Intrinsics, baseline: Float) -> Self {
        Self {
            left: intrinsics,
            right: intrinsics,
            right_from_left: Iso3::translation(-baseline, 0.0, 0.0),
        }
    }

    /// Rectified grayscale cameras of the KITTI odometry sequences 00 to 02.
    pub fn kitti_00() -> Self {
        let focal = 718.856;
        Self::rectified(Intrinsics::new(focal, (607.1928, 185.2157)), 386.1448 / focal)
    }

    /// Distance between the two optical centers, in meters.
    pub fn baseline(&self) -> Float {
        self.right_from_left.translation.vector.norm()
    }

    /// Horizontal focal length of the left camera, in pixels.
    pub fn focal(&self) -> Float {
        self.left.focal.0
    }

    /// `baseline * focal`, the constant linking disparity and depth.
    pub fn depth_factor(&self) -> Float {
        self.baseline() * self.focal()
    }

    /// Left camera intrinsics for each level of a pyramid.
    pub fn left_multi_res(&self, n: usize) -> Levels<Intrinsics> {
        self.left.multi_res(n)
    }
}

// TESTS #############################################################
