//! Video acquisition for the marker tracking driver.
//!
//! A [`VideoSource`] is a blocking producer of gray frames behind one trait.
//! The closed set of sources (local camera, MJPEG-over-HTTP stream, image
//! file sequence) is selected by a serializable [`VideoSourceConfig`]. The
//! [`FrameSlot`] is the single-frame, last-value-wins exchange between the
//! capture worker and the consumer thread.

mod camera;
mod files;
mod slot;
mod source;
mod stream;

pub use camera::CameraSource;
pub use files::FileSequenceSource;
pub use slot::FrameSlot;
pub use source::{source_from_config, VideoError, VideoSource, VideoSourceConfig};
pub use stream::MjpegStreamSource;
