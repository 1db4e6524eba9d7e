use std::path::PathBuf;

use crate::media::MediaError;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Start-up checks that must pass before playback begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Precondition {
    #[error("no video file or YouTube URL specified")]
    MissingSource,

    #[error("face detection definition file does not exist")]
    MissingDetectorDefinition,

    #[error("output folder does not exist and cannot be created")]
    MissingOutputFolder,
}

/// Errors surfaced by the capture pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cannot start playback: {0}")]
    Precondition(#[from] Precondition),

    #[error("failed to open media source {location}: {source}")]
    Open {
        location: String,
        #[source]
        source: MediaError,
    },

    #[error("file operation failed on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode image {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("face image {0} has no label to save under")]
    Unclassified(String),

    #[error("invalid label name: {0:?}")]
    InvalidLabel(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the failed precondition, if this is a start-up validation error
    pub fn precondition(&self) -> Option<Precondition> {
        match self {
            Self::Precondition(p) => Some(*p),
            _ => None,
        }
    }
}
