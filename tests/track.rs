// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod common;

use nalgebra::DMatrix;

use common::PlaneScene;
use stereo_odometry_rs::core::camera::{CameraModel, Intrinsics, StereoRig};
use stereo_odometry_rs::core::error::Error;
use stereo_odometry_rs::core::image::AlignedImage;
use stereo_odometry_rs::core::pyramid::{DepthPyramid, ImagePyramid};
use stereo_odometry_rs::core::stereo::{self, StereoDepthEstimator};
use stereo_odometry_rs::core::track::{self, PoseSolver, RobustLoss, Solution};
use stereo_odometry_rs::misc::type_aliases::{Float, Iso3, Mat23, Point2, Point3};

const NB_LEVELS: usize = 3;

/// Previous frame at the reference pose, current frame after `motion`.
struct Frames {
    prev: ImagePyramid,
    prev_depth: DepthPyramid,
    cur: ImagePyramid,
}

impl Frames {
    fn new(scene: &PlaneScene, motion: &Iso3) -> Self {
        let (prev_img, depth) = scene.render(&Iso3::identity());
        let (cur_img, _) = scene.render(motion);
        Self::from_images(prev_img, &depth, &DMatrix::repeat(scene.height, scene.width, true), cur_img)
    }

    fn from_images(
        prev_img: DMatrix<Float>,
        depth: &DMatrix<Float>,
        validity: &DMatrix<bool>,
        cur_img: DMatrix<Float>,
    ) -> Self {
        Self {
            prev: ImagePyramid::new(NB_LEVELS, prev_img),
            prev_depth: DepthPyramid::new(NB_LEVELS, depth, validity).unwrap(),
            cur: ImagePyramid::new(NB_LEVELS, cur_img),
        }
    }

    fn solve<C: CameraModel + Sync>(&self, config: track::Config, cameras: &[C]) -> Result<Solution, Error> {
        let solver = PoseSolver::new(config, cameras)?;
        solver.solve(&self.prev, &self.prev_depth, &self.cur, Iso3::identity())
    }
}

fn assert_close(pose: &Iso3, expected: &Iso3, max_translation: Float, max_rotation: Float) {
    let t_err = common::translation_error(pose, expected);
    let r_err = common::rotation_error(pose, expected);
    assert!(t_err < max_translation, "translation error {}", t_err);
    assert!(r_err < max_rotation, "rotation error {}", r_err);
}

#[test]
fn plane_motion_is_recovered() {
    common::init_logger();
    let scene = PlaneScene::new();
    let motion = common::ground_truth_motion();
    let frames = Frames::new(&scene, &motion);
    let cameras = scene.camera.multi_res(NB_LEVELS);
    let solution = frames
        .solve(common::track_config(RobustLoss::Huber { delta: 28.0 }), &cameras)
        .unwrap();
    assert_close(&solution.pose, &motion, 1e-3, 1e-3);
    assert!(solution.levels[0].converged);
    assert_eq!(solution.levels.len(), NB_LEVELS);
    for (lvl, report) in solution.levels.iter().enumerate() {
        assert_eq!(report.level, lvl);
        assert!(report.support >= 50);
        assert!(report.iterations > 0);
    }
    assert_eq!(solution.final_cost, solution.levels[0].cost);
}

#[test]
fn identity_when_nothing_moves() {
    let scene = PlaneScene::new();
    let frames = Frames::new(&scene, &Iso3::identity());
    let cameras = scene.camera.multi_res(NB_LEVELS);
    let solution = frames
        .solve(common::track_config(RobustLoss::None), &cameras)
        .unwrap();
    assert_close(&solution.pose, &Iso3::identity(), 1e-4, 1e-4);
    assert!(solution.final_cost < 1e-6);
}

#[test]
fn huber_resists_outlier_pixels() {
    let scene = PlaneScene::new();
    let motion = common::ground_truth_motion();
    let (prev_img, depth) = scene.render(&Iso3::identity());
    let (mut cur_img, _) = scene.render(&motion);
    // A bilinear sample reads 4 pixels: 1 - 0.945^4 is about 20% of the residuals.
    common::salt_and_pepper(&mut cur_img, 0.055, 11);
    let validity = DMatrix::repeat(scene.height, scene.width, true);
    let frames = Frames::from_images(prev_img, &depth, &validity, cur_img);
    let cameras = scene.camera.multi_res(NB_LEVELS);
    let huber = frames
        .solve(common::track_config(RobustLoss::Huber { delta: 4.0 }), &cameras)
        .unwrap();
    // Twice the noise-free tolerances.
    assert_close(&huber.pose, &motion, 2e-3, 2e-3);

    // Plain least squares is pulled away by the outliers.
    let error = |pose: &Iso3| {
        common::translation_error(pose, &motion) + common::rotation_error(pose, &motion)
    };
    let least_squares_error = frames
        .solve(common::track_config(RobustLoss::None), &cameras)
        .map_or(Float::INFINITY, |s| error(&s.pose));
    assert!(
        least_squares_error > error(&huber.pose),
        "{} <= {}",
        least_squares_error,
        error(&huber.pose)
    );
}

/// Pinhole camera hidden behind another type, to exercise the camera seam.
struct Wrapped(Intrinsics);

impl CameraModel for Wrapped {
    fn project(&self, point: &Point3) -> Point2 {
        self.0.project(point)
    }
    fn back_project(&self, pixel: &Point2, depth: Float) -> Point3 {
        self.0.back_project(pixel, depth)
    }
    fn projection_jacobian(&self, point: &Point3) -> Mat23 {
        self.0.projection_jacobian(point)
    }
}

#[test]
fn student_t_with_custom_camera() {
    let scene = PlaneScene::new();
    let motion = common::ground_truth_motion();
    let frames = Frames::new(&scene, &motion);
    let cameras: Vec<Wrapped> = scene.camera.multi_res(NB_LEVELS).into_iter().map(Wrapped).collect();
    let solution = frames
        .solve(common::track_config(RobustLoss::StudentT { dof: 5.0 }), &cameras)
        .unwrap();
    assert_close(&solution.pose, &motion, 5e-3, 2e-3);
}

#[test]
fn exhausted_budget_is_reported_not_failed() {
    let scene = PlaneScene::new();
    let motion = common::ground_truth_motion();
    let frames = Frames::new(&scene, &motion);
    let cameras = scene.camera.multi_res(NB_LEVELS);
    let config = track::Config {
        max_iterations: vec![1, 1, 1],
        precision: 0.999_999,
        ..common::track_config(RobustLoss::default())
    };
    let solution = frames.solve(config, &cameras).unwrap();
    assert!(solution.levels.iter().all(|report| report.iterations == 1));
    // The first step at the coarsest level is far from a stationary point.
    assert!(!solution.levels[NB_LEVELS - 1].converged);
    assert!(!solution.converged);
}

#[test]
fn no_valid_depth_is_insufficient_data() {
    let scene = PlaneScene::new();
    let (prev_img, depth) = scene.render(&Iso3::identity());
    let (cur_img, _) = scene.render(&common::ground_truth_motion());
    let validity = DMatrix::repeat(scene.height, scene.width, false);
    let frames = Frames::from_images(prev_img, &depth, &validity, cur_img);
    let cameras = scene.camera.multi_res(NB_LEVELS);
    match frames.solve(common::track_config(RobustLoss::default()), &cameras) {
        Err(Error::InsufficientData { level, support, .. }) => {
            assert_eq!(level, NB_LEVELS - 1);
            assert_eq!(support, 0);
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn huge_minimum_support_is_insufficient_data() {
    let scene = PlaneScene::new();
    let frames = Frames::new(&scene, &common::ground_truth_motion());
    let cameras = scene.camera.multi_res(NB_LEVELS);
    let config = track::Config {
        min_support: 1_000_000,
        ..common::track_config(RobustLoss::default())
    };
    assert!(matches!(
        frames.solve(config, &cameras),
        Err(Error::InsufficientData {
            minimum: 1_000_000,
            ..
        })
    ));
}

#[test]
fn missing_camera_levels_are_rejected() {
    let scene = PlaneScene::new();
    let frames = Frames::new(&scene, &Iso3::identity());
    let cameras = scene.camera.multi_res(1);
    assert!(matches!(
        frames.solve(common::track_config(RobustLoss::default()), &cameras),
        Err(Error::Input(_))
    ));
}

#[test]
fn depth_from_stereo_then_tracking() {
    common::init_logger();
    let scene = PlaneScene::new();
    let baseline = 0.5;
    let rig = StereoRig::rectified(scene.camera, baseline);
    let (left, true_depth) = scene.render(&Iso3::identity());
    let (right, _) = scene.render(&Iso3::translation(-baseline, 0.0, 0.0));

    let config = stereo::Config {
        gradient_threshold: 5.0,
        cost_threshold: 2000.0,
        search_min: 2.0,
        search_max: 5.0,
        subpixel: true,
        ..stereo::Config::kitti()
    };
    let estimator = StereoDepthEstimator::new(config, &rig).unwrap();
    let stereo_depth = estimator
        .compute_depth(&AlignedImage::from_matrix(&left), &AlignedImage::from_matrix(&right))
        .unwrap();
    assert!(stereo_depth.report.valid > 1000);
    let nb_close = stereo_depth
        .validity
        .iter()
        .zip(stereo_depth.depth.iter().zip(true_depth.iter()))
        .filter(|(&valid, (&d, &t))| valid && (d - t).abs() < 0.1)
        .count();
    assert!(nb_close * 4 > stereo_depth.report.valid * 3);

    let motion = common::ground_truth_motion();
    let (cur, _) = scene.render(&motion);
    let frames = Frames::from_images(left, &stereo_depth.depth, &stereo_depth.validity, cur);
    let cameras = rig.left_multi_res(NB_LEVELS);
    let solution = frames
        .solve(common::track_config(RobustLoss::Huber { delta: 10.0 }), &cameras)
        .unwrap();
    assert_close(&solution.pose, &motion, 2e-2, 1e-2);

    // Pose of the current camera in the world of the previous one.
    let camera_pose = track::compose(&Iso3::identity(), &solution.pose);
    assert_close(&camera_pose, &motion.inverse(), 3e-2, 1e-2);
}

#[test]
fn config_from_json() {
    let json = serde_json::to_string(&track::Config::kitti()).unwrap();
    let config: track::Config = serde_json::from_str(&json).unwrap();
    assert_eq!(config, track::Config::kitti());
    let student: RobustLoss = serde_json::from_str(r#"{"StudentT":{"dof":5.0}}"#).unwrap();
    assert_eq!(student, RobustLoss::StudentT { dof: 5.0 });
}
