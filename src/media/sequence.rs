use std::path::{Path, PathBuf};

use image::RgbImage;
use log::debug;
use walkdir::WalkDir;

use super::{MediaError, MediaSource};

const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// A folder of still frames played back in file-name order
#[derive(Debug)]
pub struct ImageSequenceSource {
    frames: Vec<PathBuf>,
    fps: f64,
    position: usize,
}

impl ImageSequenceSource {
    /// Lists the frame files directly inside `dir`
    ///
    /// # Arguments
    /// * `dir` - Folder containing the frames
    /// * `fps` - Playback rate for the sequence
    pub fn open(dir: impl AsRef<Path>, fps: f64) -> Result<Self, MediaError> {
        let dir = dir.as_ref();
        let mut frames = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| MediaError::Backend(e.to_string()))?;
            if entry.file_type().is_file() && is_frame_file(entry.path()) {
                frames.push(entry.into_path());
            }
        }

        if frames.is_empty() {
            return Err(MediaError::Decode(format!(
                "no frame images found in {}",
                dir.display()
            )));
        }
        debug!("image sequence {}: {} frames", dir.display(), frames.len());

        Ok(Self {
            frames,
            fps,
            position: 0,
        })
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl MediaSource for ImageSequenceSource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, MediaError> {
        let Some(path) = self.frames.get(self.position) else {
            return Ok(None);
        };
        // Advance first so one unreadable frame cannot stall playback
        self.position += 1;
        let frame = image::open(path)
            .map_err(|e| MediaError::Decode(format!("{}: {}", path.display(), e)))?;
        Ok(Some(frame.to_rgb8()))
    }

    fn seek_to_start(&mut self) -> Result<(), MediaError> {
        self.position = 0;
        Ok(())
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }

    fn position(&self) -> u64 {
        self.position as u64
    }
}
