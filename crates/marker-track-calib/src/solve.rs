//! Closed-form intrinsic calibration from planar views.

use nalgebra::{DMatrix, Matrix2, Matrix3, Point2, Point3, SVector, Vector2};
use thiserror::Error;

use crate::pose::planar_pose_from_homography;
use crate::CalibrationSample;
use marker_track_core::{dlt_homography, CameraIntrinsics, Homography, HomographyError, Resolution};

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("need at least {need} usable views, got {got}")]
    NotEnoughViews { got: usize, need: usize },
    #[error(transparent)]
    Homography(#[from] HomographyError),
    #[error("svd failed")]
    SvdFailed,
    #[error("degenerate sample set: {0}")]
    Degenerate(&'static str),
    #[error("reprojection rms {rms:.3}px exceeds threshold {threshold:.3}px")]
    ReprojectionTooHigh { rms: f64, threshold: f64 },
}

/// Accepted calibration output.
#[derive(Clone, Debug)]
pub struct CalibrationSolution {
    pub intrinsics: CameraIntrinsics,
    /// Root-mean-square reprojection error over all sample points, pixels.
    pub reprojection_rms: f64,
}

const MIN_VIEWS: usize = 3;

/// Solve camera intrinsics from planar calibration samples.
///
/// Runs Zhang's closed-form solution over per-view DLT homographies,
/// fits two radial distortion terms linearly from homography residuals,
/// then validates the model by pose-based reprojection. Errors are plain
/// values; this runs on the capture worker and must not panic.
pub fn solve_intrinsics(
    samples: &[CalibrationSample],
    resolution: Resolution,
    reprojection_threshold_px: f64,
) -> Result<CalibrationSolution, CalibrationError> {
    let mut homographies = Vec::with_capacity(samples.len());
    for s in samples {
        homographies.push(dlt_homography(&s.object, &s.image)?);
    }
    if homographies.len() < MIN_VIEWS {
        return Err(CalibrationError::NotEnoughViews {
            got: homographies.len(),
            need: MIN_VIEWS,
        });
    }

    let (fx, fy, cx, cy) = zhang_closed_form(&homographies)?;
    let mut intrinsics = CameraIntrinsics {
        fx,
        fy,
        cx,
        cy,
        distortion: [0.0, 0.0],
        resolution,
    };
    intrinsics.distortion = fit_radial_distortion(&intrinsics, samples, &homographies);

    let rms = reprojection_rms(&intrinsics, samples, &homographies)?;
    if !rms.is_finite() {
        return Err(CalibrationError::Degenerate("non-finite reprojection"));
    }
    if rms > reprojection_threshold_px {
        return Err(CalibrationError::ReprojectionTooHigh {
            rms,
            threshold: reprojection_threshold_px,
        });
    }

    Ok(CalibrationSolution {
        intrinsics,
        reprojection_rms: rms,
    })
}

/// The 6-vector v_ij(H) from Zhang's formulation.
fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);
    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Zhang's closed-form intrinsics (skew forced to zero afterwards by use).
fn zhang_closed_form(
    homographies: &[Homography],
) -> Result<(f64, f64, f64, f64), CalibrationError> {
    let m = homographies.len();
    let mut vmtx = DMatrix::<f64>::zeros(2 * m, 6);

    for (k, h) in homographies.iter().enumerate() {
        let v11 = v_ij(&h.h, 0, 0);
        let v22 = v_ij(&h.h, 1, 1);
        let v12 = v_ij(&h.h, 0, 1);
        vmtx.row_mut(2 * k).copy_from(&v12.transpose());
        vmtx.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }

    let svd = vmtx.svd(true, true);
    let v_t = svd.v_t.ok_or(CalibrationError::SvdFailed)?;
    let b = v_t.row(v_t.nrows() - 1);

    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    // Degeneracy guard: views that share (almost) the same plane normal
    // make B11*B22 - B12^2 vanish.
    let denom = b11 * b22 - b12 * b12;
    let denom_norm = b11 * b11 + b22 * b22;
    if denom_norm <= 0.0 || denom.abs() / denom_norm < 1e-6 {
        return Err(CalibrationError::Degenerate(
            "insufficient geometric diversity across views",
        ));
    }

    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda.signum() != b11.signum() {
        return Err(CalibrationError::Degenerate("inconsistent conic signature"));
    }

    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    if !(alpha.is_finite() && beta.is_finite() && u0.is_finite() && v0.is_finite()) {
        return Err(CalibrationError::Degenerate("non-finite intrinsics"));
    }
    if alpha <= 0.0 || beta <= 0.0 {
        return Err(CalibrationError::Degenerate("non-positive focal length"));
    }

    Ok((alpha, beta, u0, v0))
}

/// Linear least-squares fit of `[k1, k2]` from homography residuals in
/// normalized coordinates. Initialization-grade only; returns zeros when
/// the system is too ill-conditioned to trust.
fn fit_radial_distortion(
    intrinsics: &CameraIntrinsics,
    samples: &[CalibrationSample],
    homographies: &[Homography],
) -> [f64; 2] {
    let mut ata = Matrix2::<f64>::zeros();
    let mut atb = Vector2::<f64>::zeros();

    for (s, h) in samples.iter().zip(homographies) {
        for (obj, img) in s.object.iter().zip(&s.image) {
            let ideal_px = h.apply(*obj);
            let n = intrinsics.unproject_ideal(ideal_px);
            let obs = intrinsics.unproject_ideal(*img);
            let r2 = n.x * n.x + n.y * n.y;
            let r4 = r2 * r2;

            // obs - n = n * (k1 r^2 + k2 r^4), one equation per axis.
            for (ni, di) in [(n.x, obs.x - n.x), (n.y, obs.y - n.y)] {
                let a = Vector2::new(ni * r2, ni * r4);
                ata += a * a.transpose();
                atb += a * di;
            }
        }
    }

    // All points near the principal point leave nothing to fit.
    if ata[(0, 0)].abs() < 1e-12 {
        return [0.0, 0.0];
    }
    match ata.try_inverse() {
        Some(inv) => {
            let k = inv * atb;
            if k.x.is_finite() && k.y.is_finite() {
                [k.x, k.y]
            } else {
                [0.0, 0.0]
            }
        }
        None => [0.0, 0.0],
    }
}

/// Pose-based RMS reprojection error over every sample point.
fn reprojection_rms(
    intrinsics: &CameraIntrinsics,
    samples: &[CalibrationSample],
    homographies: &[Homography],
) -> Result<f64, CalibrationError> {
    let kmtx = intrinsics.camera_matrix();
    let mut sum_sq = 0.0;
    let mut count = 0usize;

    for (s, h) in samples.iter().zip(homographies) {
        let pose = planar_pose_from_homography(&kmtx, h)?;
        for (obj, img) in s.object.iter().zip(&s.image) {
            let cam = pose * Point3::new(obj.x, obj.y, 0.0);
            let Some(proj) = intrinsics.project(cam) else {
                return Err(CalibrationError::Degenerate("board behind camera"));
            };
            let d: Point2<f64> = *img;
            sum_sq += (proj - d).norm_squared();
            count += 1;
        }
    }

    if count == 0 {
        return Err(CalibrationError::Degenerate("no points"));
    }
    Ok((sum_sq / count as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Rotation3, Translation3, Vector3};

    fn ground_truth() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 900.0,
            fy: 880.0,
            cx: 640.0,
            cy: 360.0,
            distortion: [0.0, 0.0],
            resolution: Resolution::new(1280, 720),
        }
    }

    fn view_sample(intr: &CameraIntrinsics, rot: Rotation3<f64>, t: Vector3<f64>) -> CalibrationSample {
        let pose = Isometry3::from_parts(Translation3::from(t), rot.into());
        let mut object = Vec::new();
        let mut image = Vec::new();
        for j in 0..6 {
            for i in 0..6 {
                let obj = Point2::new(i as f64 * 0.04, j as f64 * 0.04);
                let cam = pose * Point3::new(obj.x, obj.y, 0.0);
                let px = intr.project(cam).expect("in front of camera");
                object.push(obj);
                image.push(px);
            }
        }
        CalibrationSample::new(object, image)
    }

    fn diverse_samples(intr: &CameraIntrinsics) -> Vec<CalibrationSample> {
        vec![
            view_sample(
                intr,
                Rotation3::from_euler_angles(0.1, 0.0, 0.05),
                Vector3::new(-0.1, -0.08, 0.9),
            ),
            view_sample(
                intr,
                Rotation3::from_euler_angles(-0.05, 0.25, -0.1),
                Vector3::new(-0.05, 0.02, 1.1),
            ),
            view_sample(
                intr,
                Rotation3::from_euler_angles(0.3, -0.15, 0.0),
                Vector3::new(0.0, -0.12, 0.8),
            ),
            view_sample(
                intr,
                Rotation3::from_euler_angles(-0.25, -0.2, 0.3),
                Vector3::new(-0.15, 0.0, 1.0),
            ),
        ]
    }

    #[test]
    fn recovers_ground_truth_from_clean_views() {
        let gt = ground_truth();
        let samples = diverse_samples(&gt);
        let sol = solve_intrinsics(&samples, gt.resolution, 1.0).expect("solve");

        assert_relative_eq!(sol.intrinsics.fx, gt.fx, max_relative = 1e-3);
        assert_relative_eq!(sol.intrinsics.fy, gt.fy, max_relative = 1e-3);
        assert_relative_eq!(sol.intrinsics.cx, gt.cx, max_relative = 1e-2);
        assert_relative_eq!(sol.intrinsics.cy, gt.cy, max_relative = 1e-2);
        assert!(sol.reprojection_rms < 0.1, "rms = {}", sol.reprojection_rms);
    }

    #[test]
    fn near_identical_views_are_degenerate() {
        let gt = ground_truth();
        let base = view_sample(
            &gt,
            Rotation3::from_euler_angles(0.0, 0.0, 0.0),
            Vector3::new(-0.1, -0.08, 1.0),
        );
        let samples = vec![base.clone(), base.clone(), base];
        // Identical fronto-parallel views leave the conic underdetermined;
        // the solve must fail rather than return a confident model.
        assert!(solve_intrinsics(&samples, gt.resolution, 1.0).is_err());
    }

    #[test]
    fn too_few_views_fail() {
        let gt = ground_truth();
        let samples = diverse_samples(&gt)[..2].to_vec();
        assert!(matches!(
            solve_intrinsics(&samples, gt.resolution, 1.0),
            Err(CalibrationError::NotEnoughViews { got: 2, need: 3 })
        ));
    }
}
