//! Intrinsics persistence.
//!
//! Calibration files are plain JSON renderings of [`CameraIntrinsics`].
//! Loading is best-effort and ordered: the user's calibration file first,
//! then a packaged fallback file; a missing or corrupt file is logged and
//! skipped, never fatal.

use std::path::Path;

use log::{info, warn};

use marker_track_core::CameraIntrinsics;

/// Try `paths` in order, returning the first readable calibration.
pub fn load_first(paths: &[&Path]) -> Option<CameraIntrinsics> {
    for path in paths {
        match load(path) {
            Ok(intrinsics) => {
                info!("loaded calibration from {}", path.display());
                return Some(intrinsics);
            }
            Err(e) if path.exists() => {
                warn!("unreadable calibration file {}: {e}", path.display());
            }
            Err(_) => {}
        }
    }
    None
}

pub fn load(path: &Path) -> Result<CameraIntrinsics, PersistError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Write `intrinsics` to `path`, creating parent directories as needed.
pub fn save(path: &Path, intrinsics: &CameraIntrinsics) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(intrinsics)?;
    std::fs::write(path, text)?;
    info!("saved calibration to {}", path.display());
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("format: {0}")]
    Format(#[from] serde_json::Error),
}
