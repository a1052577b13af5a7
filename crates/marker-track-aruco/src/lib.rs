//! Square fiducial marker dictionaries, detection and decoding.
//!
//! This crate covers the full per-frame detection path:
//! - seeded dictionary generation with a guaranteed inter-code Hamming
//!   separation (including rotated variants),
//! - matching observed codes against a dictionary,
//! - full-frame detection: binarization, quad candidate extraction,
//!   perspective rectification and bit sampling.
//!
//! Detection is stateless across frames; temporal filtering is left to
//! callers that want it.

mod detect;
mod dictionary;
mod matcher;
pub mod render;
mod threshold;

pub use detect::{detect_markers, DetectorParams, MarkerDetection};
pub use dictionary::{Dictionary, DictionaryError};
pub use matcher::{rotate_code, Match, Matcher};
pub use threshold::{otsu_threshold, otsu_threshold_from_samples};
