// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Depth estimation from a rectified stereo pair.
//!
//! For every textured pixel of the left image, integer disparities allowed
//! by the metric search range are scored with an SSD over a small pattern
//! and the best one is kept if its cost is low enough:
//!
//! ```text
//! depth = baseline * focal / disparity
//! ```
//!
//! Rows are processed in parallel, and candidates of a row
//! are scored `LANES` at a time by the vectorized kernel.

pub mod kernel;

use log::debug;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::camera::StereoRig;
use crate::core::error::{InputError, Result};
use crate::core::gradient;
use crate::core::image::{AlignedImage, RectifiedImagePair};
use crate::misc::type_aliases::Float;

pub use self::kernel::Backend;
use self::kernel::{CostKernel, Window, PATTERN_RADIUS};

/// Pattern of pixels compared between the left and right windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostPattern {
    /// All 25 pixels of a 5x5 window.
    Dense5x5,
    /// The 8 pixels sparse pattern of DSO.
    Dso,
    /// 5 pixels along the row.
    Line5,
}

impl CostPattern {
    /// `(d_row, d_col)` offsets of the pattern.
    pub fn offsets(self) -> &'static [(isize, isize)] {
        match self {
            CostPattern::Dense5x5 => &kernel::DENSE_5X5_PATTERN,
            CostPattern::Dso => &kernel::DSO_PATTERN,
            CostPattern::Line5 => &kernel::LINE_5_PATTERN,
        }
    }
}

/// Configuration of the depth estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Minimum centered gradient norm of a left pixel to be matched.
    pub gradient_threshold: Float,
    /// Maximum SSD of an accepted match.
    pub cost_threshold: Float,
    /// Closest accepted depth, in meters.
    pub search_min: Float,
    /// Farthest accepted depth, in meters.
    pub search_max: Float,
    /// Pattern used by the SSD.
    pub pattern: CostPattern,
    /// Implementation of the cost evaluation.
    pub backend: Backend,
    /// Refine the best disparity with a parabola through the 3 costs around it.
    pub subpixel: bool,
}

impl Config {
    /// Parameters used for the KITTI stereo sequences.
    pub fn kitti() -> Self {
        Self {
            gradient_threshold: 35.0,
            cost_threshold: 1000.0,
            search_min: 0.5,
            search_max: 20.0,
            pattern: CostPattern::Dso,
            backend: Backend::Auto,
            subpixel: false,
        }
    }

    /// Check that every parameter is in its domain.
    pub fn validate(&self) -> std::result::Result<(), InputError> {
        let invalid = |msg: &str| Err(InputError::InvalidConfig(msg.to_string()));
        if !(self.gradient_threshold >= 0.0) {
            invalid("gradient_threshold must be >= 0")
        } else if !(self.cost_threshold > 0.0) {
            invalid("cost_threshold must be > 0")
        } else if !(self.search_min > 0.0 && self.search_min < self.search_max) {
            invalid("search range must satisfy 0 < search_min < search_max")
        } else if !self.search_max.is_finite() {
            invalid("search_max must be finite")
        } else {
            Ok(())
        }
    }
}

/// Counts of what happened to each pixel of the left image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepthReport {
    /// Pixels without a complete window.
    pub border: usize,
    /// Pixels with a gradient norm under the threshold.
    pub low_gradient: usize,
    /// Pixels with no disparity candidate in the search range.
    pub no_candidate: usize,
    /// Pixels whose best cost is over the threshold.
    pub cost_rejected: usize,
    /// Pixels whose refined depth left the search range.
    pub out_of_range: usize,
    /// Pixels with a valid depth.
    pub valid: usize,
}

/// Output of the depth estimator, all maps have the size of the input images.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoDepth {
    /// True where disparity and depth are valid.
    pub validity: DMatrix<bool>,
    /// Disparity in pixels, 0 where invalid.
    pub disparity: DMatrix<Float>,
    /// Depth in meters, 0 where invalid.
    pub depth: DMatrix<Float>,
    /// Per pixel outcome counts.
    pub report: DepthReport,
}

/// What happened at one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Border,
    LowGradient,
    NoCandidate,
    CostRejected,
    OutOfRange,
    Valid { disparity: Float, depth: Float },
}

/// Dense stereo depth estimator.
/// Holds an immutable configuration and borrows the stereo rig.
pub struct StereoDepthEstimator<'a> {
    config: Config,
    rig: &'a StereoRig,
    backend: Backend,
    kernel: &'static dyn CostKernel,
}

impl<'a> StereoDepthEstimator<'a> {
    /// Validate the configuration and select the cost kernel.
    pub fn new(config: Config, rig: &'a StereoRig) -> Result<Self> {
        config.validate()?;
        let depth_factor = rig.depth_factor();
        if !(depth_factor > 0.0 && depth_factor.is_finite()) {
            return Err(InputError::InvalidConfig(format!(
                "baseline * focal must be positive, got {}",
                depth_factor
            ))
            .into());
        }
        let backend = config.backend.resolve();
        debug!("Stereo matching with the {:?} backend", backend);
        Ok(Self {
            config,
            rig,
            backend,
            kernel: backend.kernel(),
        })
    }

    /// Configuration used by this estimator.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Backend actually used (never `Auto`).
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Integer disparities allowed by the search range and the image width,
    /// or `None` if the range is empty.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    #[allow(clippy::cast_precision_loss)]
    pub fn disparity_range(&self, width: usize) -> Option<(usize, usize)> {
        let depth_factor = self.rig.depth_factor();
        let lowest = (depth_factor / self.config.search_max).ceil().max(1.0);
        let highest = (depth_factor / self.config.search_min)
            .floor()
            .min(width.saturating_sub(1) as Float);
        if lowest <= highest {
            Some((lowest as usize, highest as usize))
        } else {
            None
        }
    }

    /// Compute the disparity, depth and validity maps of the left image.
    ///
    /// Images must be rectified, of the same non-zero size.
    /// A size mismatch is an `InputError` and no map is produced.
    pub fn compute_depth(&self, left: &AlignedImage, right: &AlignedImage) -> Result<StereoDepth> {
        let pair = RectifiedImagePair::new(left, right)?;
        let (height, width) = (pair.height(), pair.width());
        let range = self.disparity_range(width);
        let outcomes: Vec<Vec<Outcome>> = (0..height)
            .into_par_iter()
            .map(|row| self.match_row(&pair, row, range))
            .collect();

        let mut report = DepthReport::default();
        for outcome in outcomes.iter().flatten() {
            match outcome {
                Outcome::Border => report.border += 1,
                Outcome::LowGradient => report.low_gradient += 1,
                Outcome::NoCandidate => report.no_candidate += 1,
                Outcome::CostRejected => report.cost_rejected += 1,
                Outcome::OutOfRange => report.out_of_range += 1,
                Outcome::Valid { .. } => report.valid += 1,
            }
        }
        debug!("{:?}", report);

        let at = |r: usize, c: usize| outcomes[r][c];
        Ok(StereoDepth {
            validity: DMatrix::from_fn(height, width, |r, c| {
                matches!(at(r, c), Outcome::Valid { .. })
            }),
            disparity: DMatrix::from_fn(height, width, |r, c| match at(r, c) {
                Outcome::Valid { disparity, .. } => disparity,
                _ => 0.0,
            }),
            depth: DMatrix::from_fn(height, width, |r, c| match at(r, c) {
                Outcome::Valid { depth, .. } => depth,
                _ => 0.0,
            }),
            report,
        })
    }

    /// Match every pixel of one row of the left image.
    fn match_row(
        &self,
        pair: &RectifiedImagePair,
        row: usize,
        range: Option<(usize, usize)>,
    ) -> Vec<Outcome> {
        let (height, width) = (pair.height(), pair.width());
        if row < PATTERN_RADIUS || row + PATTERN_RADIUS >= height {
            return vec![Outcome::Border; width];
        }
        let right_rows = [
            pair.right.row(row - 2),
            pair.right.row(row - 1),
            pair.right.row(row),
            pair.right.row(row + 1),
            pair.right.row(row + 2),
        ];
        let pattern = self.config.pattern.offsets();
        let mut left_values = Vec::with_capacity(pattern.len());
        let mut costs = Vec::new();
        let mut outcomes = Vec::with_capacity(width);
        for col in 0..width {
            if col < PATTERN_RADIUS || col + PATTERN_RADIUS >= width {
                outcomes.push(Outcome::Border);
                continue;
            }
            let grad = gradient::norm_at(|r, c| pair.left[(r, c)], row, col);
            if !(grad > self.config.gradient_threshold) {
                outcomes.push(Outcome::LowGradient);
                continue;
            }
            // The right window of the highest disparity must stay in the image.
            let candidates = range.and_then(|(first, last)| {
                let last = last.min(col - PATTERN_RADIUS);
                if first <= last {
                    Some((first, last))
                } else {
                    None
                }
            });
            let (first, last) = match candidates {
                Some(c) => c,
                None => {
                    outcomes.push(Outcome::NoCandidate);
                    continue;
                }
            };
            left_values.clear();
            left_values.extend(pattern.iter().map(|&(d_row, d_col)| {
                pair.left[(
                    (row as isize + d_row) as usize,
                    (col as isize + d_col) as usize,
                )]
            }));
            let window = Window {
                pattern,
                left: &left_values,
                right_rows,
                col,
            };
            costs.clear();
            costs.resize(last - first + 1, 0.0);
            self.kernel.costs(&window, first, &mut costs);
            outcomes.push(self.decide(&costs, first));
        }
        outcomes
    }

    /// Pick the best candidate and check the cost and depth constraints.
    #[allow(clippy::cast_precision_loss)]
    fn decide(&self, costs: &[Float], first: usize) -> Outcome {
        let (best, best_cost) = argmin(costs);
        if !(best_cost < self.config.cost_threshold) {
            return Outcome::CostRejected;
        }
        let mut disparity = (first + best) as Float;
        if self.config.subpixel && best > 0 && best + 1 < costs.len() {
            disparity += parabola_offset(costs[best - 1], best_cost, costs[best + 1]);
        }
        let depth = self.rig.depth_factor() / disparity;
        if depth < self.config.search_min || depth > self.config.search_max {
            Outcome::OutOfRange
        } else {
            Outcome::Valid { disparity, depth }
        }
    }
}

/// Index and value of the first minimum.
fn argmin(costs: &[Float]) -> (usize, Float) {
    costs
        .iter()
        .enumerate()
        .fold((0, Float::INFINITY), |(best, best_cost), (i, &c)| {
            if c < best_cost {
                (i, c)
            } else {
                (best, best_cost)
            }
        })
}

/// Offset in [-0.5, 0.5] of the minimum of the parabola through 3 equally spaced costs.
fn parabola_offset(before: Float, at: Float, after: Float) -> Float {
    let curvature = before - 2.0 * at + after;
    if curvature > 0.0 {
        (0.5 * (before - after) / curvature).max(-0.5).min(0.5)
    } else {
        0.0
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::core::camera::Intrinsics;
    use crate::core::error::Error;

    fn rig() -> StereoRig {
        StereoRig::rectified(Intrinsics::new(100.0, (32.0, 16.0)), 0.5)
    }

    #[test]
    fn kitti_config_is_valid() {
        assert_eq!(Config::kitti().validate(), Ok(()));
    }

    #[test]
    fn inverted_search_range_is_rejected() {
        let config = Config {
            search_min: 10.0,
            search_max: 1.0,
            ..Config::kitti()
        };
        let rig = rig();
        assert!(matches!(
            StereoDepthEstimator::new(config, &rig),
            Err(Error::Input(InputError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn disparity_range_from_search_range() {
        let rig = rig();
        let estimator = StereoDepthEstimator::new(Config::kitti(), &rig).unwrap();
        // baseline * focal = 50: 20m -> 2.5px, 0.5m -> 100px.
        assert_eq!(estimator.disparity_range(640), Some((3, 100)));
        assert_eq!(estimator.disparity_range(64), Some((3, 63)));
        assert_eq!(estimator.disparity_range(3), None);
    }

    #[test]
    fn argmin_keeps_first_minimum() {
        assert_eq!(argmin(&[3.0, 1.0, 1.0, 2.0]), (1, 1.0));
    }

    #[test]
    fn parabola_offsets() {
        assert_eq!(parabola_offset(1.0, 0.0, 1.0), 0.0);
        assert_eq!(parabola_offset(4.0, 1.0, 0.0), 0.5);
        assert!(parabola_offset(2.0, 1.0, 1.5) > 0.0);
        assert_eq!(parabola_offset(1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn mismatched_images_produce_no_maps() {
        let rig = rig();
        let estimator = StereoDepthEstimator::new(Config::kitti(), &rig).unwrap();
        let left = AlignedImage::zeros(64, 32);
        let right = AlignedImage::zeros(64, 31);
        assert_eq!(
            estimator.compute_depth(&left, &right),
            Err(Error::Input(InputError::DimensionMismatch {
                left: (32, 64),
                right: (31, 64)
            }))
        );
    }
}
