//! Driver configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use marker_track_aruco::DetectorParams;
use marker_track_calib::CalibrationConfig;
use marker_track_video::VideoSourceConfig;

use crate::board::BoardDefinition;

/// Everything the driver needs to run, serializable as one JSON document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Which video source to open.
    pub video: VideoSourceConfig,
    /// User calibration file; first load choice and the save target after a
    /// successful calibration run.
    pub calibration_file: Option<PathBuf>,
    /// Packaged fallback calibration, tried when the user file is absent.
    pub calibration_fallback_file: Option<PathBuf>,
    /// The planar board shown to the camera during calibration.
    pub calibration_board: BoardDefinition,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub detector: DetectorParams,
    /// Consecutive reconnect attempts before the worker gives up.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    /// Pause between reconnect attempts, milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Upper bound on waiting for the worker to exit during shutdown,
    /// milliseconds.
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_delay_ms() -> u64 {
    500
}

fn default_join_timeout_ms() -> u64 {
    2000
}

impl DriverConfig {
    /// A config with defaults for everything but the source and the
    /// calibration board.
    pub fn new(video: VideoSourceConfig, calibration_board: BoardDefinition) -> Self {
        Self {
            video,
            calibration_file: None,
            calibration_fallback_file: None,
            calibration_board,
            calibration: CalibrationConfig::default(),
            detector: DetectorParams::default(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_fills_in_defaults() {
        let json = r#"{
            "video": { "kind": "camera", "index": 0, "resolution": null },
            "calibration_file": null,
            "calibration_fallback_file": null,
            "calibration_board": {
                "name": "calib",
                "markers": [
                    { "id": 0, "corners": [[0,0,0],[0.05,0,0],[0.05,0.05,0],[0,0.05,0]] }
                ],
                "min_markers_detected": 1
            }
        }"#;
        let cfg: DriverConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.reconnect_attempts, 3);
        assert_eq!(cfg.join_timeout(), Duration::from_millis(2000));
        assert_eq!(cfg.calibration_board.markers.len(), 1);
    }
}
