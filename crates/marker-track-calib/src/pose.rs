//! Planar pose recovery from a homography.

use nalgebra::{
    Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3,
};

use crate::CalibrationError;
use marker_track_core::Homography;

/// Decompose a plane-induced homography `H` (board plane Z = 0 to image)
/// into the pose of the board in the camera frame, given intrinsics `K`.
///
/// `H = K [r1 r2 t]` up to scale; the first two rotation columns are
/// recovered, completed by their cross product and projected onto SO(3).
pub fn planar_pose_from_homography(
    kmtx: &Matrix3<f64>,
    h: &Homography,
) -> Result<Isometry3<f64>, CalibrationError> {
    let k_inv = kmtx
        .try_inverse()
        .ok_or(CalibrationError::Degenerate("intrinsics not invertible"))?;

    let h1 = h.h.column(0);
    let h2 = h.h.column(1);
    let h3 = h.h.column(2).into_owned();

    let k_inv_h1 = k_inv * h1;
    let k_inv_h2 = k_inv * h2;

    let norm1 = k_inv_h1.norm();
    let norm2 = k_inv_h2.norm();
    if norm1 < 1e-12 || norm2 < 1e-12 {
        return Err(CalibrationError::Degenerate("rank-deficient homography"));
    }
    // Scale: average of the two column norms for robustness. The sign is
    // chosen so the board lies in front of the camera (t_z > 0).
    let mut lambda = 1.0 / ((norm1 + norm2) * 0.5);
    if (k_inv * h3).z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = (lambda * k_inv_h1).into_owned();
    let r2 = (lambda * k_inv_h2).into_owned();
    let r3 = r1.cross(&r2);

    let mut r_mat = Matrix3::<f64>::zeros();
    r_mat.set_column(0, &r1);
    r_mat.set_column(1, &r2);
    r_mat.set_column(2, &r3);

    // Project onto SO(3) via polar decomposition.
    let svd = r_mat.svd(true, true);
    let mut u = svd.u.ok_or(CalibrationError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(CalibrationError::SvdFailed)?;
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    let r_orth = u * v_t;

    let t_vec: Vector3<f64> = lambda * (k_inv * h3);

    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
    Ok(Isometry3::from_parts(Translation3::from(t_vec), rot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_track_core::{CameraIntrinsics, Resolution};
    use nalgebra::{Matrix3, Point2, Point3};

    fn synthetic_homography(
        kmtx: &Matrix3<f64>,
        rot: Rotation3<f64>,
        t: Vector3<f64>,
    ) -> Homography {
        let r_mat = rot.matrix();
        let mut h = Matrix3::zeros();
        h.set_column(0, &(kmtx * r_mat.column(0)));
        h.set_column(1, &(kmtx * r_mat.column(1)));
        h.set_column(2, &(kmtx * t));
        Homography::new(h / h[(2, 2)])
    }

    #[test]
    fn recovers_synthetic_pose() {
        let intr = CameraIntrinsics::fallback(Resolution::new(1280, 720));
        let kmtx = intr.camera_matrix();

        let rot = Rotation3::from_euler_angles(0.1, -0.05, 0.2);
        let t = Vector3::new(0.1, -0.05, 1.0);
        let h = synthetic_homography(&kmtx, rot, t);

        let pose = planar_pose_from_homography(&kmtx, &h).unwrap();
        assert!((pose.translation.vector - t).norm() < 1e-6);
        let r_diff = pose.rotation.to_rotation_matrix().matrix() - rot.matrix();
        assert!(r_diff.norm() < 1e-6);
    }

    #[test]
    fn recovered_pose_reprojects_board_points() {
        let intr = CameraIntrinsics::fallback(Resolution::new(800, 600));
        let kmtx = intr.camera_matrix();
        let rot = Rotation3::from_euler_angles(-0.15, 0.1, 0.0);
        let t = Vector3::new(0.02, 0.05, 0.8);
        let h = synthetic_homography(&kmtx, rot, t);
        let pose = planar_pose_from_homography(&kmtx, &h).unwrap();

        for &(x, y) in &[(0.0, 0.0), (0.1, 0.0), (0.1, 0.1), (0.0, 0.1)] {
            let via_h = h.apply(Point2::new(x, y));
            let cam = pose * Point3::new(x, y, 0.0);
            let via_pose = intr.project(cam).unwrap();
            assert!((via_h - via_pose).norm() < 1e-6);
        }
    }
}
