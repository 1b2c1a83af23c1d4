// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Synthetic scenes shared by the integration tests.

#![allow(dead_code)]

use nalgebra::DMatrix;
use rand::{rngs::StdRng, Rng, SeedableRng};

use stereo_odometry_rs::core::camera::Intrinsics;
use stereo_odometry_rs::core::image::AlignedImage;
use stereo_odometry_rs::core::track::{self, RobustLoss};
use stereo_odometry_rs::misc::type_aliases::{Float, Iso3, Point3, Vec3};

/// Install a logger printing through the test harness, once.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Uniform random integer intensities in [0, 255].
pub fn random_texture(width: usize, height: usize, seed: u64) -> DMatrix<Float> {
    let mut rng = StdRng::seed_from_u64(seed);
    DMatrix::from_fn(height, width, |_, _| Float::from(rng.gen_range(0_u8..=255)))
}

/// Rectified pair where `right(r, c) = left(r, c + disparity)`.
pub fn shifted_pair(width: usize, height: usize, disparity: usize, seed: u64) -> (AlignedImage, AlignedImage) {
    let base = random_texture(width + disparity, height, seed);
    let left = AlignedImage::from_fn(width, height, |r, c| base[(r, c)]);
    let right = AlignedImage::from_fn(width, height, |r, c| base[(r, c + disparity)]);
    (left, right)
}

/// Set a random fraction of the pixels of an image to black or white.
pub fn salt_and_pepper(img: &mut DMatrix<Float>, fraction: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for px in img.iter_mut() {
        if rng.gen_bool(fraction) {
            *px = if rng.gen_bool(0.5) { 0.0 } else { 255.0 };
        }
    }
}

/// A textured plane seen by a pinhole camera.
pub struct PlaneScene {
    pub camera: Intrinsics,
    pub width: usize,
    pub height: usize,
    /// Unit normal of the plane, in the reference camera frame.
    normal: Vec3,
    /// The plane is `normal . X = distance`.
    distance: Float,
    /// Orthonormal basis of the plane.
    axes: (Vec3, Vec3),
}

impl PlaneScene {
    pub fn new() -> Self {
        let normal = Vec3::new(0.1, -0.15, 1.0).normalize();
        let e1 = normal.cross(&Vec3::y()).normalize();
        let e2 = normal.cross(&e1);
        Self {
            camera: Intrinsics::new(120.0, (79.5, 59.5)),
            width: 160,
            height: 120,
            normal,
            distance: 3.0,
            axes: (e1, e2),
        }
    }

    /// Smooth intensity pattern painted on the plane.
    fn texture(&self, point: &Point3) -> Float {
        let u = 12.0 * point.coords.dot(&self.axes.0);
        let v = 12.0 * point.coords.dot(&self.axes.1);
        128.0
            + 40.0 * (0.7 * u + 0.25 * v).sin()
            + 35.0 * (-0.3 * u + 0.75 * v + 1.0).sin()
            + 25.0 * (0.55 * u - 0.5 * v + 2.0).sin()
    }

    /// Image and depth map seen by a camera whose frame is obtained
    /// from the reference frame by `motion` (`X_camera = motion * X_reference`).
    pub fn render(&self, motion: &Iso3) -> (DMatrix<Float>, DMatrix<Float>) {
        let to_reference = motion.inverse();
        let origin = to_reference.translation.vector;
        let (cu, cv) = self.camera.principal_point;
        let (fu, fv) = self.camera.focal;
        let mut depth = DMatrix::zeros(self.height, self.width);
        let img = DMatrix::from_fn(self.height, self.width, |row, col| {
            let ray = Vec3::new((col as Float - cu) / fu, (row as Float - cv) / fv, 1.0);
            let direction = to_reference.rotation * ray;
            let s = (self.distance - self.normal.dot(&origin)) / self.normal.dot(&direction);
            depth[(row, col)] = s;
            self.texture(&Point3::from(origin + s * direction))
        });
        (img, depth)
    }
}

/// Configuration of the pose solver used on synthetic scenes.
pub fn track_config(robust_loss: RobustLoss) -> track::Config {
    track::Config {
        nb_levels: 3,
        initial_damping: 0.01,
        max_damping: 1e8,
        precision: 0.999,
        max_iterations: vec![50, 50, 50],
        max_rejections: 5,
        robust_loss,
        photometric_threshold: 2.0,
        min_support: 50,
        max_residuals: None,
    }
}

/// Motion between the two frames of the tracking tests.
pub fn ground_truth_motion() -> Iso3 {
    let rotation = nalgebra::UnitQuaternion::from_euler_angles(0.01, -0.015, 0.008);
    Iso3::from_parts(nalgebra::Translation3::new(0.04, -0.03, 0.06), rotation)
}

/// Distance between the translations of two motions, in meters.
pub fn translation_error(a: &Iso3, b: &Iso3) -> Float {
    (a.translation.vector - b.translation.vector).norm()
}

/// Angle of the rotation between two motions, in radians.
pub fn rotation_error(a: &Iso3, b: &Iso3) -> Float {
    a.rotation.angle_to(&b.rotation)
}
