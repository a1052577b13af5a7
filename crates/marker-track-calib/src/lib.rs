//! Camera intrinsic calibration for the marker tracking driver.
//!
//! The [`CalibrationSession`] is the shared state machine fed by the capture
//! worker and controlled by the consumer. The solver itself is a classic
//! planar-target pipeline: per-view DLT homographies, Zhang's closed-form
//! intrinsics, a linear radial distortion fit and a reprojection-error
//! acceptance test.

mod pose;
mod sample;
mod session;
mod solve;

pub use pose::planar_pose_from_homography;
pub use sample::{CalibrationSample, SampleRejection};
pub use session::{CalibrationConfig, CalibrationPhase, CalibrationSession, IngestOutcome};
pub use solve::{solve_intrinsics, CalibrationError, CalibrationSolution};
