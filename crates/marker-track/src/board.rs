//! Marker board definitions.

use std::collections::HashSet;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("board has no markers")]
    Empty,
    #[error("marker id {0} appears more than once on the board")]
    DuplicateMarkerId(u32),
    #[error("board marker size must be positive")]
    NonPositiveMarkerSize,
}

/// One marker's placement on a board: its dictionary id and the board-frame
/// positions of its four corners in canonical order (top-left, top-right,
/// bottom-right, bottom-left).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoardMarker {
    pub id: u32,
    pub corners: [Point3<f64>; 4],
}

/// A named rigid arrangement of markers with a board-local origin.
///
/// Boards are registered with the driver by name; at most one registered
/// board may serve as the viewpoint origin. The geometry is metric: corner
/// coordinates are in the same unit the caller wants poses reported in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoardDefinition {
    pub name: String,
    pub markers: Vec<BoardMarker>,
    /// Minimum constituent markers that must be sighted for a pose.
    pub min_markers_detected: usize,
}

impl BoardDefinition {
    pub fn new(
        name: impl Into<String>,
        markers: Vec<BoardMarker>,
        min_markers_detected: usize,
    ) -> Result<Self, BoardError> {
        if markers.is_empty() {
            return Err(BoardError::Empty);
        }
        let mut seen = HashSet::new();
        for m in &markers {
            if !seen.insert(m.id) {
                return Err(BoardError::DuplicateMarkerId(m.id));
            }
        }
        Ok(Self {
            name: name.into(),
            markers,
            min_markers_detected: min_markers_detected.max(1),
        })
    }

    /// Planar grid of `rows x cols` markers in the board's XY plane
    /// (z = 0), marker ids counting up from `first_id` in row-major order.
    /// `marker_size` is the printed marker's edge length, `spacing` the gap
    /// between neighboring markers, both in board units.
    pub fn planar_grid(
        name: impl Into<String>,
        first_id: u32,
        rows: u32,
        cols: u32,
        marker_size: f64,
        spacing: f64,
        min_markers_detected: usize,
    ) -> Result<Self, BoardError> {
        if marker_size <= 0.0 {
            return Err(BoardError::NonPositiveMarkerSize);
        }
        let pitch = marker_size + spacing.max(0.0);
        let mut markers = Vec::with_capacity((rows * cols) as usize);
        for r in 0..rows {
            for c in 0..cols {
                let x0 = f64::from(c) * pitch;
                let y0 = f64::from(r) * pitch;
                markers.push(BoardMarker {
                    id: first_id + r * cols + c,
                    corners: [
                        Point3::new(x0, y0, 0.0),
                        Point3::new(x0 + marker_size, y0, 0.0),
                        Point3::new(x0 + marker_size, y0 + marker_size, 0.0),
                        Point3::new(x0, y0 + marker_size, 0.0),
                    ],
                });
            }
        }
        Self::new(name, markers, min_markers_detected)
    }

    /// True when every corner of every marker lies in the z = 0 plane.
    pub fn is_planar(&self) -> bool {
        self.markers
            .iter()
            .flat_map(|m| m.corners.iter())
            .all(|p| p.z.abs() < 1e-12)
    }

    pub fn marker(&self, id: u32) -> Option<&BoardMarker> {
        self.markers.iter().find(|m| m.id == id)
    }
}
