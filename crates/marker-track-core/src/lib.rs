//! Core types and utilities for the marker tracking driver.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any capture backend or concrete marker decoder.

mod frame;
mod homography;
mod intrinsics;
mod logger;

pub use frame::{sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView, Resolution, VideoFrame};
pub use homography::{dlt_homography, homography_from_4pt, Homography, HomographyError};
pub use intrinsics::{CameraIntrinsics, FieldOfView};
pub use logger::init_with_level;
