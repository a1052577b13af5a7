//! Board registry and per-frame pose estimation.

use log::debug;
use nalgebra::{Isometry3, Point2};

use marker_track_aruco::{detect_markers, DetectorParams, MarkerDetection, Matcher};
use marker_track_calib::planar_pose_from_homography;
use marker_track_core::{dlt_homography, CameraIntrinsics, GrayImageView};

use crate::board::BoardDefinition;

/// Board set mutation failure; surfaced through the driver unchanged.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("board '{0}' is already registered")]
    DuplicateName(String),
    #[error("origin board '{0}' is already registered")]
    SecondOrigin(String),
}

/// One board's outcome for one tick.
///
/// `pose` maps board coordinates into the reference frame: the origin
/// board's frame when the origin was sighted this tick, the camera frame
/// otherwise. Invalid results keep the last identity pose placeholder and
/// must not be consumed.
#[derive(Clone, Debug)]
pub struct TrackingResult {
    pub board: String,
    pub pose: Isometry3<f64>,
    pub valid: bool,
    pub markers_used: usize,
}

struct RegisteredBoard {
    def: BoardDefinition,
    origin: bool,
}

/// Stateless-per-frame marker tracker over a mutable board registry.
///
/// Only planar boards (all corners in the board's z = 0 plane) produce
/// poses; the planar-grid constructor guarantees this. No temporal
/// filtering is applied across frames.
pub struct Tracker {
    matcher: Matcher,
    params: DetectorParams,
    boards: Vec<RegisteredBoard>,
}

impl Tracker {
    pub fn new(matcher: Matcher, params: DetectorParams) -> Self {
        Self {
            matcher,
            params,
            boards: Vec::new(),
        }
    }

    /// Add a board. Fails on a duplicate name or a second origin board,
    /// leaving the registry unchanged.
    pub fn register(&mut self, def: BoardDefinition, origin: bool) -> Result<(), RegisterError> {
        if self.boards.iter().any(|b| b.def.name == def.name) {
            return Err(RegisterError::DuplicateName(def.name));
        }
        if origin {
            if let Some(existing) = self.boards.iter().find(|b| b.origin) {
                return Err(RegisterError::SecondOrigin(existing.def.name.clone()));
            }
        }
        self.boards.push(RegisteredBoard { def, origin });
        Ok(())
    }

    /// Remove a board by name; returns whether one was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.boards.len();
        self.boards.retain(|b| b.def.name != name);
        self.boards.len() != before
    }

    pub fn board_count(&self) -> usize {
        self.boards.len()
    }

    /// Detect markers in `img` and estimate every registered board's pose.
    ///
    /// Results come back in registration order, one per board, with
    /// `valid == false` for boards that were not sighted well enough.
    pub fn track(&self, img: &GrayImageView<'_>, intrinsics: &CameraIntrinsics) -> Vec<TrackingResult> {
        let detections = detect_markers(img, &self.matcher, &self.params);
        self.results_from_detections(&detections, intrinsics)
    }

    fn results_from_detections(
        &self,
        detections: &[MarkerDetection],
        intrinsics: &CameraIntrinsics,
    ) -> Vec<TrackingResult> {
        // Camera-frame pass first; origin re-expression second.
        let mut camera_poses: Vec<(Option<Isometry3<f64>>, usize)> = self
            .boards
            .iter()
            .map(
                |b| match estimate_board_pose(&b.def, detections, intrinsics) {
                    Some((pose, markers_used)) => (Some(pose), markers_used),
                    None => (None, 0),
                },
            )
            .collect();

        let origin_pose = self
            .boards
            .iter()
            .zip(&camera_poses)
            .find(|(b, _)| b.origin)
            .and_then(|(_, (pose, _))| *pose);

        if let Some(origin) = origin_pose {
            let origin_inv = origin.inverse();
            for (board, (pose, _)) in self.boards.iter().zip(camera_poses.iter_mut()) {
                if !board.origin {
                    if let Some(p) = pose.as_mut() {
                        *p = origin_inv * *p;
                    }
                }
            }
        }

        self.boards
            .iter()
            .zip(camera_poses)
            .map(|(board, (pose, markers_used))| TrackingResult {
                board: board.def.name.clone(),
                valid: pose.is_some(),
                pose: pose.unwrap_or_else(Isometry3::identity),
                markers_used,
            })
            .collect()
    }
}

/// Pose of a planar board from its sighted markers, camera frame.
///
/// Returns the pose and the number of constituent markers used, or `None`
/// when fewer than `min_markers_detected` of the board's markers were
/// sighted or the geometry was degenerate.
pub fn estimate_board_pose(
    board: &BoardDefinition,
    detections: &[MarkerDetection],
    intrinsics: &CameraIntrinsics,
) -> Option<(Isometry3<f64>, usize)> {
    if !board.is_planar() {
        debug!("board '{}' is not planar; pose unsupported", board.name);
        return None;
    }

    let mut object = Vec::new();
    let mut image = Vec::new();
    let mut markers_used = 0usize;
    for det in detections {
        let Some(marker) = board.marker(det.id) else {
            continue;
        };
        markers_used += 1;
        for (obj, img) in marker.corners.iter().zip(det.corners.iter()) {
            object.push(Point2::new(obj.x, obj.y));
            image.push(*img);
        }
    }

    if markers_used < board.min_markers_detected {
        return None;
    }

    let h = dlt_homography(&object, &image).ok()?;
    let pose = planar_pose_from_homography(&intrinsics.camera_matrix(), &h).ok()?;
    Some((pose, markers_used))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use marker_track_aruco::Dictionary;
    use marker_track_core::Resolution;
    use nalgebra::{Point3, Rotation3, Translation3, Vector3};

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 900.0,
            fy: 900.0,
            cx: 640.0,
            cy: 360.0,
            distortion: [0.0, 0.0],
            resolution: Resolution::new(1280, 720),
        }
    }

    fn pose(rx: f64, ry: f64, t: Vector3<f64>) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(t),
            Rotation3::from_euler_angles(rx, ry, 0.0).into(),
        )
    }

    /// Synthesize the detections a perfect detector would produce for
    /// `board` seen under `world`.
    fn project_board(
        board: &BoardDefinition,
        world: &Isometry3<f64>,
        intr: &CameraIntrinsics,
    ) -> Vec<MarkerDetection> {
        board
            .markers
            .iter()
            .map(|m| {
                let mut corners = [Point2::origin(); 4];
                for (dst, src) in corners.iter_mut().zip(m.corners.iter()) {
                    let cam = world * Point3::new(src.x, src.y, src.z);
                    *dst = intr.project(cam).expect("in front of camera");
                }
                MarkerDetection {
                    id: m.id,
                    corners,
                    code: 0,
                    hamming: 0,
                    border_score: 1.0,
                }
            })
            .collect()
    }

    fn tracker() -> Tracker {
        Tracker::new(
            Matcher::new(Dictionary::default_4x4(), 1),
            DetectorParams::default(),
        )
    }

    #[test]
    fn recovers_board_pose_from_projected_corners() {
        let board = BoardDefinition::planar_grid("b", 0, 2, 2, 0.05, 0.01, 2).unwrap();
        let intr = intrinsics();
        let truth = pose(0.2, -0.1, Vector3::new(-0.05, -0.04, 0.8));
        let dets = project_board(&board, &truth, &intr);

        let (estimated, used) = estimate_board_pose(&board, &dets, &intr).unwrap();
        assert_eq!(used, 4);
        assert_relative_eq!(
            estimated.translation.vector,
            truth.translation.vector,
            epsilon = 1e-6
        );
        assert!(estimated.rotation.angle_to(&truth.rotation) < 1e-6);
    }

    #[test]
    fn too_few_sighted_markers_yield_no_pose() {
        let board = BoardDefinition::planar_grid("b", 0, 2, 2, 0.05, 0.01, 3).unwrap();
        let intr = intrinsics();
        let truth = pose(0.1, 0.0, Vector3::new(0.0, 0.0, 1.0));
        let mut dets = project_board(&board, &truth, &intr);
        dets.truncate(2); // below min_markers_detected

        assert!(estimate_board_pose(&board, &dets, &intr).is_none());
    }

    #[test]
    fn origin_board_re_expresses_other_poses() {
        let origin_board = BoardDefinition::planar_grid("origin", 0, 2, 2, 0.05, 0.01, 2).unwrap();
        let other_board = BoardDefinition::planar_grid("other", 8, 2, 2, 0.05, 0.01, 2).unwrap();
        let intr = intrinsics();

        let origin_world = pose(0.1, 0.05, Vector3::new(-0.1, 0.0, 0.9));
        // The other board sits 0.3 to the right of the origin board.
        let relative = Isometry3::translation(0.3, 0.0, 0.0);
        let other_world = origin_world * relative;

        let mut dets = project_board(&origin_board, &origin_world, &intr);
        dets.extend(project_board(&other_board, &other_world, &intr));

        let mut t = tracker();
        t.register(origin_board, true).unwrap();
        t.register(other_board, false).unwrap();

        let results = t.results_from_detections(&dets, &intr);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.valid));

        let other = results.iter().find(|r| r.board == "other").unwrap();
        assert_relative_eq!(
            other.pose.translation.vector,
            relative.translation.vector,
            epsilon = 1e-6
        );

        // The origin board itself stays camera-frame.
        let origin = results.iter().find(|r| r.board == "origin").unwrap();
        assert_relative_eq!(
            origin.pose.translation.vector,
            origin_world.translation.vector,
            epsilon = 1e-6
        );
    }

    #[test]
    fn unsighted_board_is_invalid_without_affecting_others() {
        let seen = BoardDefinition::planar_grid("seen", 0, 2, 2, 0.05, 0.01, 2).unwrap();
        let unseen = BoardDefinition::planar_grid("unseen", 20, 2, 2, 0.05, 0.01, 2).unwrap();
        let intr = intrinsics();
        let truth = pose(0.0, 0.1, Vector3::new(0.0, -0.02, 1.1));
        let dets = project_board(&seen, &truth, &intr);

        let mut t = tracker();
        t.register(seen, false).unwrap();
        t.register(unseen, false).unwrap();

        let results = t.results_from_detections(&dets, &intr);
        let seen_r = results.iter().find(|r| r.board == "seen").unwrap();
        let unseen_r = results.iter().find(|r| r.board == "unseen").unwrap();
        assert!(seen_r.valid);
        assert!(!unseen_r.valid);
        assert_eq!(unseen_r.markers_used, 0);
    }

    #[test]
    fn registry_rejects_duplicates_and_second_origin() {
        let a = BoardDefinition::planar_grid("a", 0, 1, 2, 0.05, 0.01, 1).unwrap();
        let a2 = BoardDefinition::planar_grid("a", 10, 1, 2, 0.05, 0.01, 1).unwrap();
        let b = BoardDefinition::planar_grid("b", 20, 1, 2, 0.05, 0.01, 1).unwrap();

        let mut t = tracker();
        t.register(a, true).unwrap();
        assert_eq!(
            t.register(a2, false).unwrap_err(),
            RegisterError::DuplicateName("a".into())
        );
        assert_eq!(
            t.register(b.clone(), true).unwrap_err(),
            RegisterError::SecondOrigin("a".into())
        );
        // The failed attempts left the registry unchanged.
        assert_eq!(t.board_count(), 1);
        t.register(b, false).unwrap();
        assert_eq!(t.board_count(), 2);

        assert!(t.unregister("a"));
        assert!(!t.unregister("a"));
    }
}
