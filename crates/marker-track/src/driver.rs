//! The driver orchestrator.
//!
//! A [`Driver`] is a plain value owned by the consumer; there is no
//! process-wide instance. It coordinates the capture worker, the frame
//! slot, the calibration session and the board tracker, and recomputes its
//! facade state on every `tick`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use log::{info, warn};

use marker_track_aruco::{Dictionary, Matcher};
use marker_track_calib::{CalibrationPhase, CalibrationSession};
use marker_track_core::{CameraIntrinsics, FieldOfView, Resolution, VideoFrame};
use marker_track_video::{source_from_config, FrameSlot};

use crate::board::BoardDefinition;
use crate::config::DriverConfig;
use crate::persist;
use crate::tracker::{RegisterError, Tracker, TrackingResult};
use crate::worker::{self, WorkerEvent};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("driver is already initialized")]
    AlreadyInitialized,
    #[error("driver is not initialized")]
    NotInitialized,
    #[error(transparent)]
    Board(#[from] RegisterError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Initial resolution assumed before the source reports the real one.
const PROVISIONAL_RESOLUTION: Resolution = Resolution::new(640, 480);

struct Active {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    events: Receiver<WorkerEvent>,
}

/// The tracking driver. All methods are consumer-thread-only; the worker
/// communicates exclusively through the slot, the session and the status
/// channel.
pub struct Driver {
    config: DriverConfig,
    session: Arc<CalibrationSession>,
    slot: Arc<FrameSlot>,
    tracker: Tracker,
    matcher: Matcher,
    active: Option<Active>,
    connected: bool,
    resolution: Option<Resolution>,
    connection_detail: Option<String>,
    last_track_count: usize,
}

impl Driver {
    /// Build an inactive driver from `config`.
    ///
    /// Persisted intrinsics are loaded here, not in [`initialize`]: the
    /// configured calibration file is tried first, then the fallback file;
    /// missing or unreadable files are skipped with a log entry and the
    /// built-in default model stays in place. A calibration adopted this
    /// way makes [`is_calibrated`] true before any source is opened.
    ///
    /// [`initialize`]: Driver::initialize
    /// [`is_calibrated`]: Driver::is_calibrated
    pub fn new(config: DriverConfig) -> Self {
        let matcher = Matcher::new(Dictionary::default_4x4(), config.detector.max_hamming);
        let session = Arc::new(CalibrationSession::new(
            config.calibration,
            CameraIntrinsics::fallback(PROVISIONAL_RESOLUTION),
        ));

        let load_paths: Vec<&Path> = config
            .calibration_file
            .iter()
            .chain(config.calibration_fallback_file.iter())
            .map(|p| p.as_path())
            .collect();
        if let Some(intrinsics) = persist::load_first(&load_paths) {
            session.adopt_intrinsics(intrinsics);
        }

        let tracker = Tracker::new(matcher.clone(), config.detector.clone());
        Self {
            config,
            session,
            slot: Arc::new(FrameSlot::new()),
            tracker,
            matcher,
            active: None,
            connected: false,
            resolution: None,
            connection_detail: None,
            last_track_count: 0,
        }
    }

    /// Start the capture worker. The source is opened on the worker thread,
    /// so this returns as soon as the thread is up; connectivity arrives
    /// through `tick`.
    pub fn initialize(&mut self) -> Result<(), DriverError> {
        if self.active.is_some() {
            return Err(DriverError::AlreadyInitialized);
        }
        // The calibration solve assumes its object points share a plane.
        if !self.config.calibration_board.is_planar() {
            return Err(DriverError::InvalidConfig(
                "calibration board must be planar",
            ));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = worker::spawn(worker::WorkerContext {
            source: source_from_config(&self.config.video),
            slot: Arc::clone(&self.slot),
            session: Arc::clone(&self.session),
            calibration_board: self.config.calibration_board.clone(),
            matcher: self.matcher.clone(),
            detector: self.config.detector.clone(),
            stop: Arc::clone(&stop),
            events: tx,
            reconnect_attempts: self.config.reconnect_attempts,
            reconnect_delay: self.config.reconnect_delay(),
        })?;

        self.active = Some(Active {
            stop,
            handle,
            events: rx,
        });
        self.connection_detail = None;
        info!("driver initialized");
        Ok(())
    }

    /// One consumer-side update: drain worker status, take the newest frame
    /// if any, and run the tracker over it. Non-blocking.
    ///
    /// While calibration is collecting, tracking is suspended and the
    /// returned list is empty; sample ingestion happens on the worker.
    pub fn tick(&mut self) -> Vec<TrackingResult> {
        self.drain_events();
        let Some(frame) = self.slot.try_take() else {
            return Vec::new();
        };

        if self.session.is_in_progress() {
            return Vec::new();
        }

        let results = self.track_frame(&frame);
        self.last_track_count = results.iter().filter(|r| r.valid).count();
        results
    }

    fn track_frame(&self, frame: &VideoFrame) -> Vec<TrackingResult> {
        let intrinsics = self.session.intrinsics();
        self.tracker.track(&frame.image.view(), &intrinsics)
    }

    fn drain_events(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        let events = active.events.clone();
        while let Ok(event) = events.try_recv() {
            match event {
                WorkerEvent::Connected(resolution) => {
                    self.connected = true;
                    self.resolution = Some(resolution);
                    self.connection_detail = None;
                    // Keep the fallback model consistent with the actual
                    // frame size; calibrated intrinsics are left alone.
                    self.session
                        .set_fallback_intrinsics(CameraIntrinsics::fallback(resolution));
                    let loaded = self.session.intrinsics();
                    if self.session.is_calibrated() && loaded.resolution != resolution {
                        warn!(
                            "calibration was computed for {} but source is {resolution}",
                            loaded.resolution
                        );
                    }
                }
                WorkerEvent::Reconnecting { attempt, of } => {
                    self.connected = false;
                    self.connection_detail = Some(format!("reconnecting {attempt}/{of}"));
                }
                WorkerEvent::ConnectionLost(detail) => {
                    self.connected = false;
                    self.connection_detail = Some(detail);
                }
                WorkerEvent::CalibrationFinished(phase) => {
                    if phase == CalibrationPhase::Succeeded {
                        self.save_calibration();
                    }
                }
                WorkerEvent::Stopped => {
                    self.connected = false;
                }
            }
        }
    }

    fn save_calibration(&self) {
        let Some(path) = &self.config.calibration_file else {
            return;
        };
        if let Err(e) = persist::save(path, &self.session.intrinsics()) {
            warn!("could not save calibration to {}: {e}", path.display());
        }
    }

    /// Stop the worker and release the source. Safe to call repeatedly and
    /// before `initialize`.
    pub fn shutdown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.stop.store(true, Ordering::Relaxed);

        // Bounded join: the source's blocking read caps how long the worker
        // needs to notice the stop flag.
        let deadline = Instant::now() + self.config.join_timeout();
        while !active.handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if active.handle.is_finished() {
            if active.handle.join().is_err() {
                warn!("capture worker panicked");
            }
        } else {
            warn!("capture worker did not stop within the join timeout");
        }

        self.slot.clear();
        self.connected = false;
        self.resolution = None;
        self.last_track_count = 0;
        info!("driver shut down");
    }

    // Board registry (consumer thread only).

    pub fn register_board(&mut self, def: BoardDefinition, origin: bool) -> Result<(), DriverError> {
        self.tracker.register(def, origin)?;
        Ok(())
    }

    pub fn unregister_board(&mut self, name: &str) -> bool {
        self.tracker.unregister(name)
    }

    // Calibration control.

    pub fn start_calibration(&mut self) -> Result<bool, DriverError> {
        if self.active.is_none() {
            return Err(DriverError::NotInitialized);
        }
        Ok(self.session.start())
    }

    pub fn cancel_calibration(&mut self) -> bool {
        self.session.cancel()
    }

    // Facade queries.

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_calibrated(&self) -> bool {
        self.session.is_calibrated()
    }

    pub fn is_calibration_in_progress(&self) -> bool {
        self.session.is_in_progress()
    }

    pub fn calibration_progress(&self) -> f32 {
        self.session.progress()
    }

    /// Resolution reported by the opened source; the configured resolution
    /// is only a request.
    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn intrinsics(&self) -> CameraIntrinsics {
        self.session.intrinsics()
    }

    pub fn field_of_view(&self) -> FieldOfView {
        self.session.intrinsics().field_of_view()
    }

    /// Human-readable pipeline stage for overlays and logs.
    pub fn diagnostic_text(&self) -> String {
        if self.active.is_none() {
            return "inactive".into();
        }
        if !self.connected {
            return match &self.connection_detail {
                Some(detail) => format!("connection lost: {detail}"),
                None => "connecting".into(),
            };
        }
        if self.session.is_in_progress() {
            let pct = (self.session.progress() * 100.0).round() as u32;
            return format!("calibrating {pct}%");
        }
        format!(
            "tracking {} of {} boards",
            self.last_track_count,
            self.tracker.board_count()
        )
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
