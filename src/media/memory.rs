use image::RgbImage;

use super::{MediaError, MediaSource};

/// Frames held in memory, played back at a fixed rate
#[derive(Debug, Clone)]
pub struct MemorySource {
    frames: Vec<RgbImage>,
    fps: f64,
    position: usize,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>, fps: f64) -> Self {
        Self {
            frames,
            fps,
            position: 0,
        }
    }

    /// Creates `count` solid frames whose shade steps with the frame index
    pub fn synthetic(count: usize, width: u32, height: u32, fps: f64) -> Self {
        let frames = (0..count)
            .map(|i| RgbImage::from_pixel(width, height, image::Rgb([(i % 256) as u8, 64, 128])))
            .collect();
        Self::new(frames, fps)
    }
}

impl MediaSource for MemorySource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, MediaError> {
        let frame = self.frames.get(self.position).cloned();
        if frame.is_some() {
            self.position += 1;
        }
        Ok(frame)
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
