use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::info;

use marker_track_core::{GrayImage, Resolution};

use crate::{VideoError, VideoSource};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff", "tif"];

/// Plays a directory of image files as a video, in filename order.
///
/// Useful for recorded captures and deterministic tests. Frame pacing
/// sleeps away the remainder of the `1/fps` period rather than spinning,
/// so playback also serves as a well-behaved blocking source.
pub struct FileSequenceSource {
    dir: PathBuf,
    fps: f64,
    loop_playback: bool,
    files: Vec<PathBuf>,
    next: usize,
    last_read: Option<Instant>,
    resolution: Option<Resolution>,
    connected: bool,
}

impl FileSequenceSource {
    pub fn new(dir: PathBuf, fps: f64, loop_playback: bool) -> Self {
        Self {
            dir,
            fps,
            loop_playback,
            files: Vec::new(),
            next: 0,
            last_read: None,
            resolution: None,
            connected: false,
        }
    }

    fn frame_period(&self) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.fps)
        } else {
            Duration::ZERO
        }
    }

    fn scan_dir(&self) -> Result<Vec<PathBuf>, VideoError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|ext| {
                        IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known))
                    })
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn load(&self, path: &PathBuf) -> Result<GrayImage, VideoError> {
        let decoded = image::open(path)
            .map_err(|e| VideoError::Decode(format!("{}: {e}", path.display())))?;
        let luma = decoded.into_luma8();
        let (w, h) = (luma.width() as usize, luma.height() as usize);
        Ok(GrayImage::new(w, h, luma.into_raw()))
    }
}

impl VideoSource for FileSequenceSource {
    fn open(&mut self) -> Result<Resolution, VideoError> {
        let files = self.scan_dir()?;
        if files.is_empty() {
            return Err(VideoError::Open(format!(
                "no image files in {}",
                self.dir.display()
            )));
        }
        let first = self.load(&files[0])?;
        let resolution = first.resolution();
        info!(
            "file sequence {} opened: {} frames at {resolution}, {:.1} fps",
            self.dir.display(),
            files.len(),
            self.fps
        );

        self.files = files;
        self.next = 0;
        self.last_read = None;
        self.resolution = Some(resolution);
        self.connected = true;
        Ok(resolution)
    }

    fn read_frame(&mut self) -> Result<GrayImage, VideoError> {
        if !self.connected {
            return Err(VideoError::Disconnected);
        }
        if self.next >= self.files.len() {
            if self.loop_playback {
                self.next = 0;
            } else {
                self.connected = false;
                return Err(VideoError::EndOfStream);
            }
        }

        // Sleep off what is left of the frame period.
        let period = self.frame_period();
        if let Some(last) = self.last_read {
            let elapsed = last.elapsed();
            if elapsed < period {
                std::thread::sleep(period - elapsed);
            }
        }
        self.last_read = Some(Instant::now());

        let frame = self.load(&self.files[self.next])?;
        self.next += 1;
        Ok(frame)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.files.clear();
        self.resolution = None;
    }

    fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VideoSource;

    fn seed_dir(count: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..count {
            // Each frame's gray level encodes its index.
            let img = image::GrayImage::from_pixel(8, 6, image::Luma([i as u8 * 10]));
            img.save(dir.path().join(format!("frame_{i:03}.png"))).unwrap();
        }
        // Non-image files are ignored.
        std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();
        dir
    }

    #[test]
    fn plays_frames_in_order_and_reports_eof() {
        let dir = seed_dir(3);
        let mut src = FileSequenceSource::new(dir.path().to_path_buf(), 1000.0, false);
        let res = src.open().unwrap();
        assert_eq!(res, Resolution::new(8, 6));

        for i in 0..3u8 {
            let frame = src.read_frame().unwrap();
            assert_eq!(frame.data[0], i * 10);
        }
        assert!(matches!(src.read_frame(), Err(VideoError::EndOfStream)));
        assert!(!src.is_connected());
    }

    #[test]
    fn loops_when_requested() {
        let dir = seed_dir(2);
        let mut src = FileSequenceSource::new(dir.path().to_path_buf(), 1000.0, true);
        src.open().unwrap();
        for _ in 0..5 {
            src.read_frame().unwrap();
        }
        assert!(src.is_connected());
    }

    #[test]
    fn empty_directory_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = FileSequenceSource::new(dir.path().to_path_buf(), 30.0, false);
        assert!(src.open().is_err());
        assert!(!src.is_connected());
        assert!(src.resolution().is_none());
    }

    #[test]
    fn paces_reads_to_the_frame_period() {
        let dir = seed_dir(4);
        let mut src = FileSequenceSource::new(dir.path().to_path_buf(), 100.0, false);
        src.open().unwrap();
        let start = Instant::now();
        for _ in 0..4 {
            src.read_frame().unwrap();
        }
        // 4 reads, 3 inter-frame gaps of 10ms.
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
