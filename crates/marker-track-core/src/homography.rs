use nalgebra::{DMatrix, Matrix3, Point2, Vector3};
use thiserror::Error;

/// Plane-to-plane projective mapping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

#[derive(Debug, Error)]
pub enum HomographyError {
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("source and destination point counts differ ({src} vs {dst})")]
    LengthMismatch { src: usize, dst: usize },
    #[error("svd failed")]
    SvdFailed,
    #[error("degenerate point configuration")]
    Degenerate,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    /// Map a point: `dst ~ H * src`.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }
}

/// Hartley normalization: translate to centroid, scale so the mean distance
/// from it is sqrt(2).
fn normalizing_transform(pts: &[Point2<f64>]) -> Matrix3<f64> {
    let n = pts.len() as f64;
    let (mut cx, mut cy) = (0.0, 0.0);
    for p in pts {
        cx += p.x;
        cy += p.y;
    }
    cx /= n;
    cy /= n;

    let mut mean_dist = 0.0;
    for p in pts {
        mean_dist += ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt();
    }
    mean_dist /= n;

    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

fn apply_transform(t: &Matrix3<f64>, p: &Point2<f64>) -> Point2<f64> {
    let v = t * Vector3::new(p.x, p.y, 1.0);
    Point2::new(v[0] / v[2], v[1] / v[2])
}

/// Estimate H such that `dst ~ H * src` by normalized DLT.
///
/// Works for any N >= 4 correspondences; the solution is the right singular
/// vector of the smallest singular value of the stacked 2Nx9 system.
pub fn dlt_homography(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
) -> Result<Homography, HomographyError> {
    let n = src.len();
    if dst.len() != n {
        return Err(HomographyError::LengthMismatch {
            src: n,
            dst: dst.len(),
        });
    }
    if n < 4 {
        return Err(HomographyError::NotEnoughPoints(n));
    }

    let t_src = normalizing_transform(src);
    let t_dst = normalizing_transform(dst);

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for k in 0..n {
        let p = apply_transform(&t_src, &src[k]);
        let q = apply_transform(&t_dst, &dst[k]);
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);

        // [ -x -y -1   0  0  0   u*x u*y u ]
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        // [ 0  0  0  -x -y -1   v*x v*y v ]
        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    let svd = a.svd(true, true);
    let vt = svd.v_t.ok_or(HomographyError::SvdFailed)?;
    let h_row = vt.row(vt.nrows() - 1);
    let hn = Matrix3::from_row_slice(&[
        h_row[0], h_row[1], h_row[2], h_row[3], h_row[4], h_row[5], h_row[6], h_row[7], h_row[8],
    ]);

    // Denormalize: H = T_dst^{-1} * Hn * T_src, then fix H[2,2] = 1.
    let t_dst_inv = t_dst.try_inverse().ok_or(HomographyError::Degenerate)?;
    let h = t_dst_inv * hn * t_src;
    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 {
        return Err(HomographyError::Degenerate);
    }
    Ok(Homography::new(h / scale))
}

/// 4-point convenience wrapper used for cell/quad rectification.
pub fn homography_from_4pt(
    src: &[Point2<f64>; 4],
    dst: &[Point2<f64>; 4],
) -> Option<Homography> {
    dlt_homography(src.as_slice(), dst.as_slice()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_scaling_homography() {
        let src = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let dst: Vec<Point2<f64>> = src.iter().map(|p| Point2::new(p.x * 2.0, p.y * 2.0)).collect();

        let h = dlt_homography(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            let m = h.apply(*s);
            assert!((m - d).norm() < 1e-9);
        }
    }

    #[test]
    fn recovers_projective_warp_from_many_points() {
        let h_true = Matrix3::new(0.9, 0.1, 5.0, -0.05, 1.1, -3.0, 1e-4, -2e-4, 1.0);
        let h_true = Homography::new(h_true);

        let mut src = Vec::new();
        let mut dst = Vec::new();
        for j in 0..5 {
            for i in 0..5 {
                let p = Point2::new(i as f64 * 10.0, j as f64 * 10.0);
                src.push(p);
                dst.push(h_true.apply(p));
            }
        }

        let h = dlt_homography(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            assert!((h.apply(*s) - d).norm() < 1e-6);
        }
    }

    #[test]
    fn rejects_short_input() {
        let pts = vec![Point2::new(0.0, 0.0); 3];
        assert!(matches!(
            dlt_homography(&pts, &pts),
            Err(HomographyError::NotEnoughPoints(3))
        ));
    }
}
