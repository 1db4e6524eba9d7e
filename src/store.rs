//! On-disk dataset layout
//!
//! ```text
//! <root>/Learning/<label>/<run>_<n>.png   classified learning faces
//! <root>/Test/<run>_<n>.png               test faces, saved as detected
//! ```
//!
//! The `Learning`, `Test` and `Others` names are shared with datasets written
//! by earlier runs and must not change.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::ImageFormat;
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{PipelineError, Result};
use crate::face::{FaceImage, is_face_file};
use crate::recycle::RecycleBin;

pub const DIRECTORY_NAME_LEARNING: &str = "Learning";
pub const DIRECTORY_NAME_TEST: &str = "Test";
/// Default label, always offered first
pub const DIRECTORY_NAME_OTHERS: &str = "Others";

/// Characters that cannot appear in a label folder name on any supported platform
const FORBIDDEN_LABEL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Checks that `name` can be used as a label folder and returns it trimmed
pub fn validate_label(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    let usable = !trimmed.is_empty()
        && trimmed != "."
        && trimmed != ".."
        && !trimmed
            .chars()
            .any(|c| c.is_control() || FORBIDDEN_LABEL_CHARS.contains(&c));
    if usable {
        Ok(trimmed)
    } else {
        Err(PipelineError::InvalidLabel(name.to_string()))
    }
}

/// Which dataset subtree is being written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetMode {
    Learning,
    Test,
}

impl DatasetMode {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Learning => DIRECTORY_NAME_LEARNING,
            Self::Test => DIRECTORY_NAME_TEST,
        }
    }
}

/// File-system side of classification: saving, moving and deleting face crops
#[derive(Clone)]
pub struct DistributionStore {
    root: PathBuf,
    recycle_bin: Arc<dyn RecycleBin>,
}

impl DistributionStore {
    pub fn new(root: impl Into<PathBuf>, recycle_bin: Arc<dyn RecycleBin>) -> Self {
        Self {
            root: root.into(),
            recycle_bin,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `root/Learning` or `root/Test`, created if missing
    pub fn output_folder(&self, mode: DatasetMode) -> Result<PathBuf> {
        let path = self.root.join(mode.dir_name());
        fs::create_dir_all(&path).map_err(|e| PipelineError::io(&path, e))?;
        Ok(path)
    }

    /// Where `face` lives (or would live) once persisted
    ///
    /// Learning faces without a label have no location.
    pub fn face_path(&self, mode: DatasetMode, face: &FaceImage) -> Option<PathBuf> {
        let base = self.root.join(mode.dir_name());
        match mode {
            DatasetMode::Test => Some(base.join(face.file_name())),
            DatasetMode::Learning if face.is_classified() => {
                Some(base.join(&face.folder_name).join(face.file_name()))
            }
            DatasetMode::Learning => None,
        }
    }

    /// Writes `face` as a new PNG file
    ///
    /// Existing files are never overwritten; a name clash is reported as an
    /// `AlreadyExists` IO error.
    pub fn save(&self, mode: DatasetMode, face: &FaceImage) -> Result<PathBuf> {
        let path = self
            .face_path(mode, face)
            .ok_or_else(|| PipelineError::Unclassified(face.file_name().to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| PipelineError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        if let Err(source) = face.pixels().write_to(&mut writer, ImageFormat::Png) {
            drop(writer);
            // Do not leave a truncated file behind
            let _ = fs::remove_file(&path);
            return Err(PipelineError::Encode { path, source });
        }

        debug!("saved {}", path.display());
        Ok(path)
    }

    /// Brings the file on disk in line with a label change
    ///
    /// * empty `from_folder` - first save of the face
    /// * `from_folder` equal to the current label - nothing to do
    /// * otherwise - rename from the old label folder; skipped if the old file
    ///   was never written
    ///
    /// # Returns
    /// The face's path if a file was written or moved, `None` if nothing changed
    pub fn move_face(&self, mode: DatasetMode, face: &FaceImage, from_folder: &str) -> Result<Option<PathBuf>> {
        if from_folder.is_empty() {
            return self.save(mode, face).map(Some);
        }
        if from_folder == face.folder_name || mode == DatasetMode::Test {
            return Ok(None);
        }

        let target = self
            .face_path(mode, face)
            .ok_or_else(|| PipelineError::Unclassified(face.file_name().to_string()))?;
        let source = self
            .root
            .join(mode.dir_name())
            .join(from_folder)
            .join(face.file_name());

        if !source.is_file() {
            debug!("{} was never written, nothing to move", source.display());
            return Ok(None);
        }
        if target.exists() {
            return Err(PipelineError::io(
                &target,
                std::io::Error::new(ErrorKind::AlreadyExists, "target file already exists"),
            ));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }

        info!("moving {} -> {}", source.display(), target.display());
        fs::rename(&source, &target).map_err(|e| PipelineError::io(&source, e))?;
        Ok(Some(target))
    }

    /// Sends `path` to the recycle bin
    ///
    /// # Returns
    /// `false` if the delete failed; the failure is only logged
    pub fn delete(&self, path: &Path) -> bool {
        match self.recycle_bin.recycle(path) {
            Ok(()) => {
                info!("recycled {}", path.display());
                true
            }
            Err(e) => {
                warn!("failed to delete {}: {:#}", path.display(), e);
                false
            }
        }
    }

    /// Creates the folder for `label` under the mode folder if absent
    pub fn ensure_label_folder(&self, mode: DatasetMode, label: &str) -> Result<PathBuf> {
        let path = self.output_folder(mode)?.join(label);
        fs::create_dir_all(&path).map_err(|e| PipelineError::io(&path, e))?;
        Ok(path)
    }

    /// Label folders under the mode folder, `Others` first, the rest sorted
    pub fn list_existing_labels(&self, mode: DatasetMode) -> Result<Vec<String>> {
        let folder = self.output_folder(mode)?;
        let entries = fs::read_dir(&folder).map_err(|e| PipelineError::io(&folder, e))?;

        let mut labels = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::io(&folder, e))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name != DIRECTORY_NAME_OTHERS {
                    labels.push(name.to_string());
                }
            }
        }
        labels.sort();
        labels.insert(0, DIRECTORY_NAME_OTHERS.to_string());
        Ok(labels)
    }

    /// Reads every saved face under the mode folder
    ///
    /// The label is the name of the file's parent folder; files lying directly
    /// in the mode folder come back unlabelled. Unreadable files are skipped.
    pub fn load_persisted(&self, mode: DatasetMode) -> Result<Vec<FaceImage>> {
        let folder = self.output_folder(mode)?;
        let mut faces = Vec::new();

        for entry in WalkDir::new(&folder).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry under {}: {}", folder.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !is_face_file(path) {
                continue;
            }

            let pixels = match image::open(path) {
                Ok(image) => image.to_rgb8(),
                Err(e) => {
                    warn!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let folder_name = match path.parent() {
                Some(parent) if parent != folder => parent
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                _ => String::new(),
            };
            let file_name = entry.file_name().to_string_lossy().into_owned();

            debug!("loaded {}", path.display());
            faces.push(FaceImage::from_disk(pixels, file_name, folder_name));
        }

        Ok(faces)
    }
}
