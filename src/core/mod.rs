// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Core functionalities of the stereo odometry front-end.

pub mod camera;
pub mod error;
pub mod gradient;
pub mod image;
pub mod multires;
pub mod pyramid;
pub mod stereo;
pub mod track;
