//! The capture worker thread.
//!
//! One worker owns the video source for a driver's whole active lifetime.
//! Opening the source happens here too, since opening a device or a network
//! stream may block for seconds. The consumer hears about connectivity
//! through an unbounded status channel drained on `tick`; frames travel
//! through the last-value-wins slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{debug, info, warn};
use nalgebra::Point2;

use marker_track_aruco::{detect_markers, DetectorParams, Matcher};
use marker_track_calib::{CalibrationPhase, CalibrationSample, CalibrationSession, IngestOutcome};
use marker_track_core::{Resolution, VideoFrame};
use marker_track_video::{FrameSlot, VideoSource};

use crate::board::BoardDefinition;

/// Worker → consumer status notice. Failures cross the thread boundary as
/// events, never as panics.
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    Connected(Resolution),
    Reconnecting { attempt: u32, of: u32 },
    ConnectionLost(String),
    CalibrationFinished(CalibrationPhase),
    Stopped,
}

pub struct WorkerContext {
    pub source: Box<dyn VideoSource>,
    pub slot: Arc<FrameSlot>,
    pub session: Arc<CalibrationSession>,
    pub calibration_board: BoardDefinition,
    pub matcher: Matcher,
    pub detector: DetectorParams,
    pub stop: Arc<AtomicBool>,
    pub events: Sender<WorkerEvent>,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

/// Spawn the capture thread. Returns the join handle; cancellation is
/// cooperative through `ctx.stop`.
pub fn spawn(ctx: WorkerContext) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("marker-track-capture".into())
        .spawn(move || run(ctx))
}

fn run(mut ctx: WorkerContext) {
    match ctx.source.open() {
        Ok(resolution) => {
            let _ = ctx.events.send(WorkerEvent::Connected(resolution));
        }
        Err(e) => {
            warn!("initial open failed: {e}");
            if !reconnect(&mut ctx) {
                finish(&mut ctx, Some(format!("open failed: {e}")));
                return;
            }
        }
    }

    let mut sequence: u64 = 0;
    let mut last_sample_at: Option<Instant> = None;

    while !ctx.stop.load(Ordering::Relaxed) {
        let image = match ctx.source.read_frame() {
            Ok(image) => image,
            Err(e) => {
                if ctx.stop.load(Ordering::Relaxed) {
                    break;
                }
                warn!("frame read failed: {e}");
                if reconnect(&mut ctx) {
                    continue;
                }
                finish(&mut ctx, Some(format!("read failed: {e}")));
                return;
            }
        };

        sequence += 1;
        let frame = VideoFrame::new(image, sequence);

        if ctx.session.phase() == CalibrationPhase::InProgress {
            maybe_ingest_sample(&ctx, &frame, &mut last_sample_at);
        }

        if let Some(dropped) = ctx.slot.publish(frame) {
            debug!("frame {dropped} dropped unconsumed");
        }
    }

    finish(&mut ctx, None);
}

/// Detect calibration-board markers in `frame` and feed the session.
///
/// The solve triggered by the final sample runs right here on the worker;
/// the consumer only ever observes the phase change.
fn maybe_ingest_sample(
    ctx: &WorkerContext,
    frame: &VideoFrame,
    last_sample_at: &mut Option<Instant>,
) {
    let interval = Duration::from_millis(ctx.session.config().sample_interval_ms);
    if let Some(last) = *last_sample_at {
        if last.elapsed() < interval {
            return;
        }
    }

    let detections = detect_markers(&frame.image.view(), &ctx.matcher, &ctx.detector);
    let mut object = Vec::new();
    let mut image = Vec::new();
    for det in &detections {
        let Some(marker) = ctx.calibration_board.marker(det.id) else {
            continue;
        };
        for (obj, img) in marker.corners.iter().zip(det.corners.iter()) {
            object.push(Point2::new(obj.x, obj.y));
            image.push(*img);
        }
    }
    if object.is_empty() {
        return;
    }

    match ctx.session.ingest(CalibrationSample::new(object, image)) {
        IngestOutcome::Accepted { collected, max } => {
            *last_sample_at = Some(Instant::now());
            info!("calibration sample {collected}/{max}");
        }
        IngestOutcome::Solved(phase) => {
            *last_sample_at = None;
            let _ = ctx.events.send(WorkerEvent::CalibrationFinished(phase));
        }
        IngestOutcome::Rejected(reason) => {
            debug!("calibration sample rejected: {reason:?}");
        }
        IngestOutcome::NotCollecting => {}
    }
}

/// Bounded reconnection. True when the source is connected again.
fn reconnect(ctx: &mut WorkerContext) -> bool {
    ctx.source.disconnect();
    for attempt in 1..=ctx.reconnect_attempts {
        if ctx.stop.load(Ordering::Relaxed) {
            return false;
        }
        let _ = ctx.events.send(WorkerEvent::Reconnecting {
            attempt,
            of: ctx.reconnect_attempts,
        });
        std::thread::sleep(ctx.reconnect_delay);
        match ctx.source.open() {
            Ok(resolution) => {
                info!("reconnected at {resolution} (attempt {attempt})");
                let _ = ctx.events.send(WorkerEvent::Connected(resolution));
                return true;
            }
            Err(e) => warn!("reconnect attempt {attempt} failed: {e}"),
        }
    }
    false
}

fn finish(ctx: &mut WorkerContext, lost: Option<String>) {
    ctx.source.disconnect();
    if let Some(detail) = lost {
        let _ = ctx.events.send(WorkerEvent::ConnectionLost(detail));
    }
    let _ = ctx.events.send(WorkerEvent::Stopped);
    info!("capture worker exited");
}
