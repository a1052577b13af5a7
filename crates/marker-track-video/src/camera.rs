use log::{debug, info};
use nokhwa::{
    pixel_format::LumaFormat,
    utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
    Camera,
};

use marker_track_core::{GrayImage, Resolution};

use crate::{VideoError, VideoSource};

/// Local capture device via `nokhwa`.
///
/// The requested resolution is advisory: the driver asks for the closest
/// supported format and the device decides. Frames are decoded to 8-bit
/// luma on read.
pub struct CameraSource {
    index: u32,
    requested: Option<Resolution>,
    camera: Option<Camera>,
    resolution: Option<Resolution>,
}

impl CameraSource {
    pub fn new(index: u32, requested: Option<Resolution>) -> Self {
        Self {
            index,
            requested,
            camera: None,
            resolution: None,
        }
    }

    fn requested_format(&self) -> RequestedFormat<'static> {
        match self.requested {
            Some(res) => RequestedFormat::new::<LumaFormat>(RequestedFormatType::Closest(
                CameraFormat::new(
                    nokhwa::utils::Resolution::new(res.width, res.height),
                    FrameFormat::MJPEG,
                    30,
                ),
            )),
            None => RequestedFormat::new::<LumaFormat>(RequestedFormatType::AbsoluteHighestResolution),
        }
    }
}

impl VideoSource for CameraSource {
    fn open(&mut self) -> Result<Resolution, VideoError> {
        let mut camera = Camera::new(CameraIndex::Index(self.index), self.requested_format())
            .map_err(|e| VideoError::Open(format!("camera {}: {e}", self.index)))?;
        camera
            .open_stream()
            .map_err(|e| VideoError::Open(format!("camera {} stream: {e}", self.index)))?;

        let actual = camera.resolution();
        let resolution = Resolution::new(actual.width(), actual.height());
        info!("camera {} opened at {resolution}", self.index);

        self.camera = Some(camera);
        self.resolution = Some(resolution);
        Ok(resolution)
    }

    fn read_frame(&mut self) -> Result<GrayImage, VideoError> {
        let camera = self.camera.as_mut().ok_or(VideoError::Disconnected)?;
        let buffer = camera
            .frame()
            .map_err(|e| VideoError::Read(e.to_string()))?;
        let luma = buffer
            .decode_image::<LumaFormat>()
            .map_err(|e| VideoError::Decode(e.to_string()))?;
        let (w, h) = (luma.width() as usize, luma.height() as usize);
        Ok(GrayImage::new(w, h, luma.into_raw()))
    }

    fn is_connected(&self) -> bool {
        self.camera.is_some()
    }

    fn disconnect(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop_stream() {
                debug!("camera {} stop: {e}", self.index);
            }
            info!("camera {} closed", self.index);
        }
        self.resolution = None;
    }

    fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.disconnect();
    }
}
