//! Frame-sequential media sources
//!
//! A [`MediaSource`] hands out decoded RGB frames one at a time, in source
//! order. Sources hold an exclusive handle to the underlying resource until
//! dropped, so replaying an exhausted source means dropping it and opening a
//! fresh one through a [`SourceOpener`].

mod ffmpeg;
mod memory;
pub mod resolve;
mod sequence;

use std::path::Path;
use std::time::Duration;

use image::RgbImage;

pub use ffmpeg::FfmpegSource;
pub use memory::MemorySource;
pub use sequence::ImageSequenceSource;

/// Frame rate assumed when a backend cannot report one
pub const FALLBACK_FPS: f64 = 30.0;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("could not resolve media location: {0}")]
    Resolve(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// A decoded video or stream, read front to back
pub trait MediaSource: Send {
    /// Reads the next frame, or `None` once the stream is exhausted
    fn read_frame(&mut self) -> Result<Option<RgbImage>, MediaError>;

    /// Rewinds to the first frame
    fn seek_to_start(&mut self) -> Result<(), MediaError>;

    fn fps(&self) -> f64;

    /// Total number of frames, as far as the backend knows it
    fn frame_count(&self) -> u64;

    /// Index of the next frame to be read
    fn position(&self) -> u64;

    fn is_at_end(&self) -> bool {
        self.position() >= self.frame_count()
    }

    /// Pacing interval derived from the frame rate
    fn frame_interval(&self) -> Duration {
        frame_interval_for(self.fps())
    }
}

/// Converts a frame rate into whole-millisecond pacing, never below 1 ms
pub fn frame_interval_for(fps: f64) -> Duration {
    let fps = if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        FALLBACK_FPS
    };
    Duration::from_millis(((1000.0 / fps) as u64).max(1))
}

/// Opens a media location (local path or resolved stream URL)
pub trait SourceOpener: Send + Sync {
    fn open(&self, location: &str) -> Result<Box<dyn MediaSource>, MediaError>;
}

impl<F> SourceOpener for F
where
    F: Fn(&str) -> Result<Box<dyn MediaSource>, MediaError> + Send + Sync,
{
    fn open(&self, location: &str) -> Result<Box<dyn MediaSource>, MediaError> {
        self(location)
    }
}

/// Directories are read as still-frame sequences, everything else goes through ffmpeg
#[derive(Debug, Clone)]
pub struct DefaultOpener {
    /// Frame rate applied to image sequences
    pub sequence_fps: f64,
}

impl Default for DefaultOpener {
    fn default() -> Self {
        Self {
            sequence_fps: FALLBACK_FPS,
        }
    }
}

impl SourceOpener for DefaultOpener {
    fn open(&self, location: &str) -> Result<Box<dyn MediaSource>, MediaError> {
        if Path::new(location).is_dir() {
            Ok(Box::new(ImageSequenceSource::open(
                location,
                self.sequence_fps,
            )?))
        } else {
            Ok(Box::new(FfmpegSource::open(location)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_interval_for() {
        assert_eq!(frame_interval_for(10.0), Duration::from_millis(100));
        assert_eq!(frame_interval_for(29.97), Duration::from_millis(33));
        // Degenerate rates fall back instead of dividing by zero
        assert_eq!(frame_interval_for(0.0), frame_interval_for(FALLBACK_FPS));
        assert_eq!(frame_interval_for(f64::NAN), frame_interval_for(FALLBACK_FPS));
        // Absurdly high rates still pace at 1 ms
        assert_eq!(frame_interval_for(5000.0), Duration::from_millis(1));
    }

    #[test]
    fn test_closure_opener() {
        let opener = |_: &str| -> Result<Box<dyn MediaSource>, MediaError> {
            Ok(Box::new(MemorySource::new(vec![RgbImage::new(2, 2)], 5.0)))
        };
        let source = opener.open("anything").unwrap();
        assert_eq!(source.frame_count(), 1);
        assert_eq!(source.frame_interval(), Duration::from_millis(200));
    }
}
