//! The calibration state machine shared between worker and consumer.

use std::sync::Mutex;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{solve_intrinsics, CalibrationSample, SampleRejection};
use marker_track_core::CameraIntrinsics;

/// Phase of the calibration process.
///
/// Transitions are monotonic except the explicit restart
/// (`Failed`/`Succeeded` -> `InProgress` via `start`) and cancel
/// (`InProgress` -> `Idle`). `Computing` is a one-shot transition to one of
/// the terminal states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationPhase {
    Idle,
    InProgress,
    Computing,
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Samples collected before the solve is triggered.
    pub max_samples: usize,
    /// Minimum correspondences per sample (detectability check).
    pub min_points_per_sample: usize,
    /// Minimum image-space diagonal of a sample's bounding box, pixels.
    pub min_image_spread_px: f64,
    /// Acceptance threshold on RMS reprojection error, pixels.
    pub reprojection_threshold_px: f64,
    /// Minimum time between accepted samples, milliseconds. Spacing the
    /// samples out gives the operator time to move the board between
    /// views; back-to-back frames of the same pose are useless to the
    /// solver.
    pub sample_interval_ms: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            max_samples: 25,
            min_points_per_sample: 16,
            min_image_spread_px: 80.0,
            reprojection_threshold_px: 1.5,
            sample_interval_ms: 500,
        }
    }
}

/// Result of feeding one candidate sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Not calibrating; the sample was discarded.
    NotCollecting,
    /// Sample failed the detectability check.
    Rejected(SampleRejection),
    /// Sample stored; `collected` of `max` now held.
    Accepted { collected: usize, max: usize },
    /// This sample completed the set and the solve ran; see the new phase.
    Solved(CalibrationPhase),
}

struct Inner {
    phase: CalibrationPhase,
    samples: Vec<CalibrationSample>,
    intrinsics: CameraIntrinsics,
    calibrated: bool,
    last_rms: Option<f64>,
}

/// Shared calibration session.
///
/// One lock serializes all state access. The lock is held for transitions
/// and sample bookkeeping only — the solve itself runs with the lock
/// released so frame publication is never stalled behind it.
pub struct CalibrationSession {
    cfg: CalibrationConfig,
    inner: Mutex<Inner>,
}

impl CalibrationSession {
    /// Create a session; `fallback` is the intrinsics model used until a
    /// calibration run succeeds (or a calibration file is adopted).
    pub fn new(cfg: CalibrationConfig, fallback: CameraIntrinsics) -> Self {
        Self {
            cfg,
            inner: Mutex::new(Inner {
                phase: CalibrationPhase::Idle,
                samples: Vec::new(),
                intrinsics: fallback,
                calibrated: false,
                last_rms: None,
            }),
        }
    }

    pub fn config(&self) -> CalibrationConfig {
        self.cfg
    }

    /// Begin collecting samples. Returns false (and logs) if collection or
    /// a solve is already underway.
    pub fn start(&self) -> bool {
        let mut inner = self.lock();
        match inner.phase {
            CalibrationPhase::InProgress | CalibrationPhase::Computing => {
                warn!("calibration already in progress; start ignored");
                false
            }
            _ => {
                inner.phase = CalibrationPhase::InProgress;
                inner.samples.clear();
                info!("calibration started ({} samples needed)", self.cfg.max_samples);
                true
            }
        }
    }

    /// Abort collection, discarding samples. No-op outside `InProgress`.
    pub fn cancel(&self) -> bool {
        let mut inner = self.lock();
        if inner.phase != CalibrationPhase::InProgress {
            return false;
        }
        inner.phase = CalibrationPhase::Idle;
        inner.samples.clear();
        info!("calibration cancelled");
        true
    }

    /// Feed one candidate sample from the capture worker.
    ///
    /// Completing the set flips the phase to `Computing`, moves the samples
    /// out, releases the lock, runs the solve on the calling thread, and
    /// records the outcome.
    pub fn ingest(&self, sample: CalibrationSample) -> IngestOutcome {
        let samples = {
            let mut inner = self.lock();
            if inner.phase != CalibrationPhase::InProgress {
                return IngestOutcome::NotCollecting;
            }
            if let Err(reason) = sample.check(
                self.cfg.min_points_per_sample,
                self.cfg.min_image_spread_px,
            ) {
                return IngestOutcome::Rejected(reason);
            }

            inner.samples.push(sample);
            let collected = inner.samples.len();
            if collected < self.cfg.max_samples {
                return IngestOutcome::Accepted {
                    collected,
                    max: self.cfg.max_samples,
                };
            }

            inner.phase = CalibrationPhase::Computing;
            std::mem::take(&mut inner.samples)
        };

        // Solve outside the lock; only the result write re-acquires it.
        let resolution = self.intrinsics().resolution;
        let outcome = solve_intrinsics(&samples, resolution, self.cfg.reprojection_threshold_px);

        let mut inner = self.lock();
        match outcome {
            Ok(solution) => {
                info!(
                    "calibration succeeded: fx={:.1} fy={:.1} rms={:.3}px",
                    solution.intrinsics.fx, solution.intrinsics.fy, solution.reprojection_rms
                );
                inner.intrinsics = solution.intrinsics;
                inner.calibrated = true;
                inner.last_rms = Some(solution.reprojection_rms);
                inner.phase = CalibrationPhase::Succeeded;
            }
            Err(err) => {
                // Prior intrinsics stay active on failure.
                warn!("calibration failed: {err}");
                inner.last_rms = None;
                inner.phase = CalibrationPhase::Failed;
            }
        }
        IngestOutcome::Solved(inner.phase)
    }

    /// Collection progress in `[0, 1]`; 0 outside `InProgress`.
    pub fn progress(&self) -> f32 {
        let inner = self.lock();
        if inner.phase != CalibrationPhase::InProgress {
            return 0.0;
        }
        inner.samples.len() as f32 / self.cfg.max_samples as f32
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.lock().phase
    }

    #[inline]
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self.phase(),
            CalibrationPhase::InProgress | CalibrationPhase::Computing
        )
    }

    /// Current intrinsics (calibrated model if available, fallback else).
    pub fn intrinsics(&self) -> CameraIntrinsics {
        self.lock().intrinsics
    }

    /// True once intrinsics come from a solve or an adopted file.
    pub fn is_calibrated(&self) -> bool {
        self.lock().calibrated
    }

    /// RMS reprojection error of the last successful solve, if any.
    pub fn last_rms(&self) -> Option<f64> {
        self.lock().last_rms
    }

    /// Adopt externally loaded intrinsics (calibration file).
    pub fn adopt_intrinsics(&self, intrinsics: CameraIntrinsics) {
        let mut inner = self.lock();
        inner.intrinsics = intrinsics;
        inner.calibrated = true;
    }

    /// Replace the fallback model, e.g. once the opened source reports its
    /// actual resolution. Ignored when calibrated intrinsics are active.
    pub fn set_fallback_intrinsics(&self, intrinsics: CameraIntrinsics) {
        let mut inner = self.lock();
        if !inner.calibrated {
            inner.intrinsics = intrinsics;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A worker panic while holding the lock would already have taken
        // the process down in tests; recover the data rather than poison.
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
