//! One calibration view: planar object/image correspondences.

use nalgebra::Point2;

/// Correspondences between planar target coordinates (Z = 0 plane of the
/// calibration board) and observed pixel positions, taken from one frame.
#[derive(Clone, Debug)]
pub struct CalibrationSample {
    pub object: Vec<Point2<f64>>,
    pub image: Vec<Point2<f64>>,
}

/// Why a candidate frame was not usable as a calibration sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleRejection {
    LengthMismatch,
    TooFewPoints { got: usize, need: usize },
    TooLittleSpread,
}

impl CalibrationSample {
    pub fn new(object: Vec<Point2<f64>>, image: Vec<Point2<f64>>) -> Self {
        Self { object, image }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.object.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.object.is_empty()
    }

    /// Detectability check: enough correspondences, and enough image-space
    /// extent that the view constrains the solve.
    pub fn check(&self, min_points: usize, min_spread_px: f64) -> Result<(), SampleRejection> {
        if self.object.len() != self.image.len() {
            return Err(SampleRejection::LengthMismatch);
        }
        if self.len() < min_points {
            return Err(SampleRejection::TooFewPoints {
                got: self.len(),
                need: min_points,
            });
        }

        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in &self.image {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let diag = ((max_x - min_x).powi(2) + (max_y - min_y).powi(2)).sqrt();
        if diag < min_spread_px {
            return Err(SampleRejection::TooLittleSpread);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_sample(scale: f64) -> CalibrationSample {
        let mut object = Vec::new();
        let mut image = Vec::new();
        for j in 0..4 {
            for i in 0..4 {
                object.push(Point2::new(i as f64, j as f64));
                image.push(Point2::new(100.0 + scale * i as f64, 80.0 + scale * j as f64));
            }
        }
        CalibrationSample::new(object, image)
    }

    #[test]
    fn wide_sample_passes() {
        assert!(grid_sample(40.0).check(16, 80.0).is_ok());
    }

    #[test]
    fn tiny_sample_is_rejected_for_spread() {
        assert_eq!(
            grid_sample(2.0).check(16, 80.0),
            Err(SampleRejection::TooLittleSpread)
        );
    }

    #[test]
    fn short_sample_is_rejected_for_count() {
        let s = CalibrationSample::new(
            vec![Point2::new(0.0, 0.0)],
            vec![Point2::new(1.0, 1.0)],
        );
        assert!(matches!(
            s.check(16, 80.0),
            Err(SampleRejection::TooFewPoints { got: 1, need: 16 })
        ));
    }
}
