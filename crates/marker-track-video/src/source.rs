use serde::{Deserialize, Serialize};

use marker_track_core::{GrayImage, Resolution};

use crate::{CameraSource, FileSequenceSource, MjpegStreamSource};

/// Video acquisition failure. All variants are recoverable from the
/// consumer's point of view; the worker reacts by reconnecting, it never
/// panics across the thread boundary.
#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("failed to open video source: {0}")]
    Open(String),
    #[error("frame read failed: {0}")]
    Read(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("video source is disconnected")]
    Disconnected,
    #[error("end of stream")]
    EndOfStream,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Selects and parameterizes one of the built-in source kinds.
///
/// Requested resolutions are advisory; the resolution returned by
/// [`VideoSource::open`] is authoritative.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VideoSourceConfig {
    Camera {
        index: u32,
        resolution: Option<Resolution>,
    },
    Stream {
        url: String,
    },
    FileSequence {
        dir: std::path::PathBuf,
        fps: f64,
        loop_playback: bool,
    },
}

/// Blocking producer of gray frames.
///
/// `read_frame` blocks until a frame is available or the source fails; it
/// never busy-spins. Implementations are `Send` so a capture worker can own
/// them on its own thread.
pub trait VideoSource: Send {
    /// Connect and report the actual capture resolution.
    fn open(&mut self) -> Result<Resolution, VideoError>;

    /// Block until the next frame. `Err` means disconnect or end of stream.
    fn read_frame(&mut self) -> Result<GrayImage, VideoError>;

    fn is_connected(&self) -> bool;

    /// Release the underlying device/connection. Safe to call repeatedly.
    fn disconnect(&mut self);

    /// Resolution of the opened source, `None` before `open` succeeds.
    fn resolution(&self) -> Option<Resolution>;
}

/// Build the source described by `config`. The source is not opened yet;
/// the worker opens it on its own thread since opening may block.
pub fn source_from_config(config: &VideoSourceConfig) -> Box<dyn VideoSource> {
    match config {
        VideoSourceConfig::Camera { index, resolution } => {
            Box::new(CameraSource::new(*index, *resolution))
        }
        VideoSourceConfig::Stream { url } => Box::new(MjpegStreamSource::new(url.clone())),
        VideoSourceConfig::FileSequence {
            dir,
            fps,
            loop_playback,
        } => Box::new(FileSequenceSource::new(dir.clone(), *fps, *loop_playback)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let cfg = VideoSourceConfig::Stream {
            url: "http://10.0.0.5:8080/video".into(),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: VideoSourceConfig = serde_json::from_str(&json).unwrap();
        match back {
            VideoSourceConfig::Stream { url } => assert_eq!(url, "http://10.0.0.5:8080/video"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn camera_config_accepts_advisory_resolution() {
        let json = r#"{"kind":"camera","index":1,"resolution":{"width":800,"height":600}}"#;
        let cfg: VideoSourceConfig = serde_json::from_str(json).unwrap();
        match cfg {
            VideoSourceConfig::Camera { index, resolution } => {
                assert_eq!(index, 1);
                assert_eq!(resolution, Some(Resolution::new(800, 600)));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
