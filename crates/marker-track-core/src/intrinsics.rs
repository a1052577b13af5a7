//! Pinhole camera model with a two-term radial distortion.

use nalgebra::{Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::Resolution;

/// Horizontal/vertical field of view in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldOfView {
    pub horizontal_deg: f64,
    pub vertical_deg: f64,
}

/// Camera intrinsic calibration.
///
/// Produced by a successful calibration run and immutable after acceptance.
/// `resolution` records the image size the parameters were computed for;
/// they are not valid for frames of a different size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Radial distortion `[k1, k2]` (Brown model, tangential terms omitted).
    pub distortion: [f64; 2],
    pub resolution: Resolution,
}

/// Assumed horizontal FOV for the fallback model when no calibration exists.
const FALLBACK_HFOV_DEG: f64 = 50.0;

impl CameraIntrinsics {
    /// Uncalibrated default for a given image size: principal point at the
    /// center, focal length from an assumed 50 degree horizontal FOV, no
    /// distortion.
    pub fn fallback(resolution: Resolution) -> Self {
        let w = f64::from(resolution.width);
        let h = f64::from(resolution.height);
        let f = (w / 2.0) / (FALLBACK_HFOV_DEG.to_radians() / 2.0).tan();
        Self {
            fx: f,
            fy: f,
            cx: w / 2.0,
            cy: h / 2.0,
            distortion: [0.0, 0.0],
            resolution,
        }
    }

    /// 3x3 camera matrix K (zero skew).
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0,
        )
    }

    pub fn field_of_view(&self) -> FieldOfView {
        let w = f64::from(self.resolution.width);
        let h = f64::from(self.resolution.height);
        FieldOfView {
            horizontal_deg: 2.0 * (w / (2.0 * self.fx)).atan().to_degrees(),
            vertical_deg: 2.0 * (h / (2.0 * self.fy)).atan().to_degrees(),
        }
    }

    /// Apply radial distortion to normalized image coordinates.
    #[inline]
    pub fn distort_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        let r2 = p.x * p.x + p.y * p.y;
        let [k1, k2] = self.distortion;
        let scale = 1.0 + k1 * r2 + k2 * r2 * r2;
        Point2::new(p.x * scale, p.y * scale)
    }

    /// Project a camera-frame 3D point to distorted pixel coordinates.
    ///
    /// Returns `None` for points at or behind the camera plane.
    pub fn project(&self, p: Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-9 {
            return None;
        }
        let n = Point2::new(p.x / p.z, p.y / p.z);
        let d = self.distort_normalized(n);
        Some(Point2::new(
            self.fx * d.x + self.cx,
            self.fy * d.y + self.cy,
        ))
    }

    /// Pixel to normalized coordinates, ignoring distortion.
    #[inline]
    pub fn unproject_ideal(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fallback_has_centered_principal_point_and_requested_hfov() {
        let intr = CameraIntrinsics::fallback(Resolution::new(800, 600));
        assert_relative_eq!(intr.cx, 400.0);
        assert_relative_eq!(intr.cy, 300.0);
        let fov = intr.field_of_view();
        assert_relative_eq!(fov.horizontal_deg, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn projection_lands_on_principal_point_for_axis_ray() {
        let intr = CameraIntrinsics::fallback(Resolution::new(640, 480));
        let p = intr.project(Point3::new(0.0, 0.0, 2.0)).unwrap();
        assert_relative_eq!(p.x, intr.cx);
        assert_relative_eq!(p.y, intr.cy);
    }

    #[test]
    fn points_behind_camera_do_not_project() {
        let intr = CameraIntrinsics::fallback(Resolution::new(640, 480));
        assert!(intr.project(Point3::new(0.1, 0.1, -1.0)).is_none());
    }

    #[test]
    fn distortion_pushes_points_outward_for_positive_k1() {
        let mut intr = CameraIntrinsics::fallback(Resolution::new(640, 480));
        intr.distortion = [0.1, 0.0];
        let d = intr.distort_normalized(Point2::new(0.5, 0.0));
        assert!(d.x > 0.5);
    }
}
