//! Cascade face detection
//!
//! [`Detector`] owns the currently loaded cascade definition. A missing
//! definition file is a normal state (detection disabled), not an error.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use image::GrayImage;
use log::{info, warn};

/// Axis-aligned face rectangle in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersects the rectangle with a `frame_width` x `frame_height` frame
    ///
    /// # Returns
    /// `(x, y, width, height)` of the visible part, or `None` if nothing is left
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        let left = i64::from(self.x).max(0);
        let top = i64::from(self.y).max(0);
        let right = (i64::from(self.x) + i64::from(self.width)).min(i64::from(frame_width));
        let bottom = (i64::from(self.y) + i64::from(self.height)).min(i64::from(frame_height));

        if right <= left || bottom <= top {
            return None;
        }
        Some((
            left as u32,
            top as u32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }
}

/// A loaded detection engine. Implementations must be callable from worker threads.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRect>;
}

impl<F> FaceDetector for F
where
    F: Fn(&GrayImage) -> Vec<FaceRect> + Send + Sync,
{
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRect> {
        self(gray)
    }
}

/// Builds a detection engine from a definition file
pub trait CascadeLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn FaceDetector>>;
}

/// Tuning for the SeetaFace cascade
#[derive(Debug, Clone)]
pub struct SeetaParams {
    pub min_face_size: u32,
    pub score_thresh: f64,
    pub pyramid_scale_factor: f32,
    pub slide_window_step: (u32, u32),
}

impl Default for SeetaParams {
    fn default() -> Self {
        Self {
            min_face_size: 20,
            score_thresh: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: (4, 4),
        }
    }
}

/// Loads SeetaFace funnel-structured cascade models through `rustface`
#[derive(Debug, Clone, Default)]
pub struct SeetaLoader {
    pub params: SeetaParams,
}

impl CascadeLoader for SeetaLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn FaceDetector>> {
        let file = File::open(path)
            .with_context(|| format!("failed to open cascade model {}", path.display()))?;
        let model = rustface::read_model(BufReader::new(file))
            .map_err(|e| anyhow!("failed to parse cascade model {}: {:?}", path.display(), e))?;
        Ok(Arc::new(SeetaCascade {
            model,
            params: self.params.clone(),
        }))
    }
}

struct SeetaCascade {
    model: rustface::Model,
    params: SeetaParams,
}

impl FaceDetector for SeetaCascade {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRect> {
        if gray.width() == 0 || gray.height() == 0 {
            return Vec::new();
        }

        // rustface detectors are stateful, so each call gets its own
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.params.min_face_size);
        detector.set_score_thresh(self.params.score_thresh);
        detector.set_pyramid_scale_factor(self.params.pyramid_scale_factor);
        let (step_x, step_y) = self.params.slide_window_step;
        detector.set_slide_window_step(step_x, step_y);

        let faces = detector.detect(&rustface::ImageData::new(
            gray.as_raw(),
            gray.width(),
            gray.height(),
        ));

        faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                FaceRect::new(bbox.x(), bbox.y(), bbox.width(), bbox.height())
            })
            .collect()
    }
}

/// Holds the active cascade definition, if any
pub struct Detector {
    loader: Arc<dyn CascadeLoader>,
    engine: Option<Arc<dyn FaceDetector>>,
    definition: Option<PathBuf>,
}

impl Detector {
    pub fn new(loader: Arc<dyn CascadeLoader>) -> Self {
        Self {
            loader,
            engine: None,
            definition: None,
        }
    }

    /// Loads the definition at `path`, replacing the current one
    ///
    /// # Returns
    /// `true` when detection is ready. A path that does not exist, or a file
    /// that fails to parse, leaves detection disabled.
    pub fn load(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.unload();

        if path.as_os_str().is_empty() || !path.is_file() {
            info!("no cascade definition at {:?}, detection disabled", path);
            return false;
        }

        match self.loader.load(path) {
            Ok(engine) => {
                info!("loaded cascade definition {}", path.display());
                self.engine = Some(engine);
                self.definition = Some(path.to_path_buf());
                true
            }
            Err(e) => {
                warn!("{:#}, detection disabled", e);
                false
            }
        }
    }

    pub fn unload(&mut self) {
        self.engine = None;
        self.definition = None;
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }

    pub fn definition(&self) -> Option<&Path> {
        self.definition.as_deref()
    }

    /// Shared handle to the engine for off-thread detection
    pub fn engine(&self) -> Option<Arc<dyn FaceDetector>> {
        self.engine.clone()
    }
}
