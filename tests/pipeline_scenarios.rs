use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use face_harvest::controller::{Collaborators, PipelineController};
use face_harvest::detector::{CascadeLoader, FaceDetector, FaceRect};
use face_harvest::media::{MediaError, MediaSource, MemorySource};
use face_harvest::recycle::HoldingFolder;
use face_harvest::{LoopState, ModeFlags, Settings};
use image::GrayImage;
use tempfile::TempDir;

const FRAMES: usize = 10;

/// Finds one face in every frame it is shown
struct OneFaceLoader;

impl CascadeLoader for OneFaceLoader {
    fn load(&self, _path: &Path) -> anyhow::Result<Arc<dyn FaceDetector>> {
        Ok(Arc::new(|_gray: &GrayImage| vec![FaceRect::new(4, 4, 16, 16)]))
    }
}

struct Harness {
    dir: TempDir,
    controller: PipelineController,
}

impl Harness {
    fn new(modes: ModeFlags) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("frames");
        fs::create_dir(&video).unwrap();
        let cascade = dir.path().join("cascade.bin");
        fs::write(&cascade, b"stub").unwrap();

        let opener = |_location: &str| -> Result<Box<dyn MediaSource>, MediaError> {
            Ok(Box::new(MemorySource::synthetic(FRAMES, 32, 32, 10.0)))
        };
        let deps = Collaborators {
            opener: Arc::new(opener),
            cascade_loader: Arc::new(OneFaceLoader),
            recycle_bin: Arc::new(HoldingFolder::new(dir.path().join("recycled"))),
            ..Collaborators::default()
        };
        let settings = Settings {
            video_path: video.to_string_lossy().into_owned(),
            cascade_path: cascade.to_string_lossy().into_owned(),
            output_dir: dir.path().join("dataset").to_string_lossy().into_owned(),
            capture_interval_ms: 0,
        };

        Self {
            controller: PipelineController::new(settings, modes, deps),
            dir,
        }
    }

    fn dataset(&self) -> PathBuf {
        self.dir.path().join("dataset")
    }

    async fn play_to_end(&self) {
        assert_eq!(self.controller.start().await.unwrap(), LoopState::Running);
        tokio::time::timeout(Duration::from_secs(10), self.controller.wait_stopped())
            .await
            .expect("playback should reach the end of the source");
        self.controller.wait_detections_idle().await;
        assert_eq!(self.controller.state(), LoopState::Stopped);
    }
}

fn files_in(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().unwrap().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn learning_run_buffers_one_face_per_frame() {
    let harness = Harness::new(ModeFlags {
        learning: true,
        test: false,
    });
    harness.play_to_end().await;

    let faces = harness.controller.faces();
    assert_eq!(faces.len(), FRAMES);
    let names: HashSet<_> = faces.iter().map(|face| face.file_name().to_string()).collect();
    assert_eq!(names.len(), FRAMES);
    assert!(faces.iter().all(|face| face.folder_name.is_empty()));
    assert!(faces.iter().all(|face| face.pixels().dimensions() == (16, 16)));

    // Nothing is written before the operator classifies
    assert!(files_in(&harness.dataset().join("Learning/Others")).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reclassifying_moves_the_file() {
    let harness = Harness::new(ModeFlags::default());
    harness.play_to_end().await;
    let name = harness.controller.face(3).unwrap().file_name().to_string();

    harness.controller.classify(3, "cat").unwrap();
    assert_eq!(files_in(&harness.dataset().join("Learning/cat")), vec![name.clone()]);

    harness.controller.classify(3, "dog").unwrap();
    assert!(files_in(&harness.dataset().join("Learning/cat")).is_empty());
    assert_eq!(files_in(&harness.dataset().join("Learning/dog")), vec![name]);
    assert_eq!(harness.controller.face(3).unwrap().folder_name, "dog");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mode_saves_every_face_directly() {
    let harness = Harness::new(ModeFlags {
        learning: false,
        test: true,
    });
    harness.play_to_end().await;

    assert!(harness.controller.is_empty());
    assert_eq!(files_in(&harness.dataset().join("Test")).len(), FRAMES);
    assert!(!harness.dataset().join("Learning").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_after_end_starts_a_fresh_buffer() {
    let harness = Harness::new(ModeFlags::default());
    harness.play_to_end().await;
    harness.controller.classify(1, "cat").unwrap();

    harness.play_to_end().await;
    let faces = harness.controller.faces();
    assert_eq!(faces.len(), FRAMES);
    assert!(faces.iter().all(|face| !face.is_classified()));
    assert!(
        faces
            .iter()
            .all(|face| face.file_name().starts_with(&harness.controller.run_timestamp()))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_stop_only_ever_reports_two_states() {
    let harness = Harness::new(ModeFlags::default());
    harness.controller.set_capture_interval(60_000);

    for _ in 0..5 {
        let state = harness.controller.start().await.unwrap();
        assert!(matches!(state, LoopState::Running | LoopState::Stopped));
        harness.controller.stop();
        assert_eq!(harness.controller.state(), LoopState::Stopped);
    }
    harness.controller.stop();
    assert_eq!(harness.controller.state(), LoopState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn out_of_range_delete_leaves_buffer_alone() {
    let harness = Harness::new(ModeFlags::default());
    harness.play_to_end().await;

    assert!(!harness.controller.delete_at(0));
    assert!(!harness.controller.delete_at(FRAMES + 1));
    assert_eq!(harness.controller.len(), FRAMES);

    assert!(harness.controller.delete_at(FRAMES));
    assert_eq!(harness.controller.len(), FRAMES - 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleting_a_saved_face_keeps_a_recoverable_copy() {
    let harness = Harness::new(ModeFlags::default());
    harness.play_to_end().await;
    harness.controller.classify(2, "cat").unwrap();
    let name = harness.controller.face(2).unwrap().file_name().to_string();

    assert!(harness.controller.delete_at(2));
    assert!(files_in(&harness.dataset().join("Learning/cat")).is_empty());
    assert_eq!(files_in(&harness.dir.path().join("recycled")), vec![name]);
}
