//! Samples faces from videos and streams into a labelled image dataset
//!
//! A [`PipelineController`] plays a media source at its native pace, sends a
//! frame to the face detector once per capture interval and collects the
//! crops. In learning mode crops wait in a [`FaceBuffer`] for an operator to
//! label them; in test mode they are written straight to disk.

pub mod buffer;
pub mod capture;
pub mod cli;
pub mod config;
pub mod controller;
pub mod detector;
pub mod error;
pub mod face;
pub mod logging;
pub mod media;
pub mod progress;
pub mod recycle;
pub mod store;

pub use buffer::{BufferEvent, FaceBuffer};
pub use capture::{DisplaySink, LoopState};
pub use config::{ModeFlags, Settings};
pub use controller::{Collaborators, PipelineController};
pub use detector::{FaceDetector, FaceRect};
pub use error::{PipelineError, Precondition, Result};
pub use face::FaceImage;
pub use store::{DatasetMode, DistributionStore};
