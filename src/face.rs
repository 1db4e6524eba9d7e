use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use image::RgbImage;

use crate::detector::FaceRect;

/// File extension of every persisted face crop
pub const FACE_FILE_EXTENSION: &str = "png";

/// One detected or previously saved face crop
#[derive(Debug, Clone)]
pub struct FaceImage {
    pixels: Arc<RgbImage>,
    file_name: String,
    /// Label folder; empty while unclassified
    pub folder_name: String,
    is_from_disk: bool,
}

impl FaceImage {
    /// A freshly detected face, not yet classified
    pub fn detected(pixels: RgbImage, file_name: String) -> Self {
        Self {
            pixels: Arc::new(pixels),
            file_name,
            folder_name: String::new(),
            is_from_disk: false,
        }
    }

    /// A face read back from an existing label folder
    pub fn from_disk(pixels: RgbImage, file_name: String, folder_name: String) -> Self {
        Self {
            pixels: Arc::new(pixels),
            file_name,
            folder_name,
            is_from_disk: true,
        }
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Shared handle to the pixels, for display layers
    pub fn shared_pixels(&self) -> Arc<RgbImage> {
        Arc::clone(&self.pixels)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn is_from_disk(&self) -> bool {
        self.is_from_disk
    }

    pub fn is_classified(&self) -> bool {
        !self.folder_name.is_empty()
    }
}

/// Per-playback naming state: `{run_timestamp}_{sequence}.png`
#[derive(Debug)]
pub struct RunContext {
    run_timestamp: String,
    sequence: AtomicU64,
}

impl RunContext {
    /// Starts a run stamped with the current local time (`yyyyMMdd_HHmmss`)
    pub fn start() -> Self {
        Self::with_timestamp(Local::now().format("%Y%m%d_%H%M%S").to_string())
    }

    pub fn with_timestamp(run_timestamp: impl Into<String>) -> Self {
        Self {
            run_timestamp: run_timestamp.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn run_timestamp(&self) -> &str {
        &self.run_timestamp
    }

    /// Number of file names handed out so far
    pub fn issued(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Claims the next sequence number; safe to call from concurrent detections
    pub fn next_file_name(&self) -> String {
        let index = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("{}_{}.{}", self.run_timestamp, index, FACE_FILE_EXTENSION)
    }
}

/// Cuts each detected rectangle out of the frame
///
/// Rectangles are clipped to the frame; ones with no visible area are skipped.
pub fn crop_faces(frame: &RgbImage, rects: &[FaceRect]) -> Vec<RgbImage> {
    rects
        .iter()
        .filter_map(|rect| rect.clamp_to(frame.width(), frame.height()))
        .map(|(x, y, width, height)| image::imageops::crop_imm(frame, x, y, width, height).to_image())
        .collect()
}

/// True if `path` looks like a persisted face crop
pub fn is_face_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(FACE_FILE_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_file_names_follow_run_prefix() {
        let run = RunContext::with_timestamp("20240102_030405");
        assert_eq!(run.next_file_name(), "20240102_030405_0.png");
        assert_eq!(run.next_file_name(), "20240102_030405_1.png");
        assert_eq!(run.issued(), 2);
    }

    #[test]
    fn test_run_timestamp_format() {
        let run = RunContext::start();
        let stamp = run.run_timestamp();
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "_");
        assert!(stamp.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_concurrent_file_names_are_unique() {
        let run = Arc::new(RunContext::with_timestamp("20240102_030405"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let run = Arc::clone(&run);
                thread::spawn(move || (0..250).map(|_| run.next_file_name()).collect::<Vec<_>>())
            })
            .collect();

        let mut names = HashSet::new();
        for handle in handles {
            for name in handle.join().unwrap() {
                assert!(names.insert(name));
            }
        }
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn test_crop_faces() {
        let mut frame = RgbImage::new(100, 80);
        frame.put_pixel(12, 22, image::Rgb([255, 0, 0]));

        let crops = crop_faces(
            &frame,
            &[
                FaceRect::new(10, 20, 30, 40),
                FaceRect::new(90, 70, 30, 30),
                FaceRect::new(200, 200, 10, 10),
            ],
        );

        assert_eq!(crops.len(), 2);
        assert_eq!(crops[0].dimensions(), (30, 40));
        assert_eq!(crops[0].get_pixel(2, 2), &image::Rgb([255, 0, 0]));
        assert_eq!(crops[1].dimensions(), (10, 10));
    }

    #[test]
    fn test_face_image_state() {
        let mut face = FaceImage::detected(RgbImage::new(4, 4), "x_0.png".to_string());
        assert!(!face.is_classified());
        assert!(!face.is_from_disk());

        face.folder_name = "cat".to_string();
        assert!(face.is_classified());

        let copy = face.clone();
        assert!(Arc::ptr_eq(&copy.shared_pixels(), &face.shared_pixels()));

        let read_back = FaceImage::from_disk(RgbImage::new(4, 4), "x_0.png".to_string(), "cat".to_string());
        assert!(read_back.is_from_disk());
    }

    #[test]
    fn test_is_face_file() {
        assert!(is_face_file(Path::new("a/b/20240102_030405_3.png")));
        assert!(is_face_file(Path::new("UPPER.PNG")));
        assert!(!is_face_file(Path::new("notes.txt")));
        assert!(!is_face_file(Path::new("noext")));
    }
}
