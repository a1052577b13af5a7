use std::io::Read;
use std::time::Duration;

use log::info;

use marker_track_core::{GrayImage, Resolution};

use crate::{VideoError, VideoSource};

const SOI: [u8; 2] = [0xff, 0xd8];
const EOI: [u8; 2] = [0xff, 0xd9];
const READ_CHUNK: usize = 16 * 1024;
// A part larger than this is not a sane MJPEG frame; treat as protocol loss.
const MAX_PART_BYTES: usize = 8 * 1024 * 1024;

/// MJPEG-over-HTTP (`multipart/x-mixed-replace`) network stream.
///
/// The part headers are not trusted; frames are delimited by scanning the
/// byte stream for JPEG start/end markers, which copes with servers that
/// omit `Content-Length` or use nonstandard boundaries.
pub struct MjpegStreamSource {
    url: String,
    reader: Option<Box<dyn Read + Send + Sync>>,
    carry: Vec<u8>,
    resolution: Option<Resolution>,
}

impl MjpegStreamSource {
    pub fn new(url: String) -> Self {
        Self {
            url,
            reader: None,
            carry: Vec::new(),
            resolution: None,
        }
    }

    /// Pull the next complete JPEG part out of the byte stream.
    fn next_jpeg(&mut self) -> Result<Vec<u8>, VideoError> {
        let reader = self.reader.as_mut().ok_or(VideoError::Disconnected)?;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(start) = find(&self.carry, &SOI) {
                if let Some(end) = find(&self.carry[start..], &EOI) {
                    let end = start + end + EOI.len();
                    let jpeg = self.carry[start..end].to_vec();
                    self.carry.drain(..end);
                    return Ok(jpeg);
                }
                // Keep only from the SOI on; everything before is padding
                // and multipart headers.
                if start > 0 {
                    self.carry.drain(..start);
                }
            } else if self.carry.len() > 1 {
                // No SOI yet; retain one byte in case a marker straddles
                // the chunk boundary.
                let tail = self.carry.len() - 1;
                self.carry.drain(..tail);
            }

            if self.carry.len() > MAX_PART_BYTES {
                self.carry.clear();
                return Err(VideoError::Read("oversized MJPEG part".into()));
            }

            let n = reader.read(&mut chunk).map_err(VideoError::Io)?;
            if n == 0 {
                return Err(VideoError::EndOfStream);
            }
            self.carry.extend_from_slice(&chunk[..n]);
        }
    }
}

impl VideoSource for MjpegStreamSource {
    fn open(&mut self) -> Result<Resolution, VideoError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .build();
        let response = agent
            .get(&self.url)
            .call()
            .map_err(|e| VideoError::Open(format!("{}: {e}", self.url)))?;
        self.reader = Some(response.into_reader());
        self.carry.clear();

        // The stream does not announce its resolution; take it from the
        // first decoded frame.
        let first = self.read_frame()?;
        let resolution = first.resolution();
        self.resolution = Some(resolution);
        info!("stream {} opened at {resolution}", self.url);
        Ok(resolution)
    }

    fn read_frame(&mut self) -> Result<GrayImage, VideoError> {
        let jpeg = self.next_jpeg()?;
        let decoded = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg)
            .map_err(|e| VideoError::Decode(e.to_string()))?;
        let luma = decoded.into_luma8();
        let (w, h) = (luma.width() as usize, luma.height() as usize);
        Ok(GrayImage::new(w, h, luma.into_raw()))
    }

    fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    fn disconnect(&mut self) {
        if self.reader.take().is_some() {
            info!("stream {} closed", self.url);
        }
        self.carry.clear();
        self.resolution = None;
    }

    fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }
}

fn find(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_marker_pair() {
        let data = [0x00, 0xff, 0xd8, 0x01, 0xff, 0xd9];
        assert_eq!(find(&data, &SOI), Some(1));
        assert_eq!(find(&data, &EOI), Some(4));
        assert_eq!(find(&data[..2], &EOI), None);
    }
}
