//! Real-time visual-marker tracking driver.
//!
//! The driver owns a capture worker thread that reads frames from a
//! [`marker_track_video::VideoSource`], feeds the camera calibration
//! session while one is collecting, and publishes every frame into a
//! single-slot exchange. The consumer polls [`Driver::tick`] at its own
//! cadence and receives per-board [`TrackingResult`]s.
//!
//! ```no_run
//! use marker_track::{BoardDefinition, Driver, DriverConfig};
//! use marker_track_video::VideoSourceConfig;
//!
//! let board = BoardDefinition::planar_grid("calib", 0, 4, 6, 0.04, 0.01, 4)?;
//! let mut driver = Driver::new(DriverConfig::new(
//!     VideoSourceConfig::Camera { index: 0, resolution: None },
//!     board.clone(),
//! ));
//! driver.register_board(board, true)?;
//! driver.initialize()?;
//! for _ in 0..600 {
//!     for result in driver.tick() {
//!         if result.valid {
//!             println!("{}: {:?}", result.board, result.pose.translation);
//!         }
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! driver.shutdown();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod board;
mod config;
mod driver;
mod persist;
mod tracker;
mod worker;

pub use board::{BoardDefinition, BoardError, BoardMarker};
pub use config::DriverConfig;
pub use driver::{Driver, DriverError};
pub use persist::{load as load_intrinsics, save as save_intrinsics, PersistError};
pub use tracker::{estimate_board_pose, RegisterError, Tracker, TrackingResult};
pub use worker::WorkerEvent;
