//! Orchestrates playback, detection and classification for one operator session

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use image::RgbImage;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, watch};

use crate::buffer::{BufferEvent, FaceBuffer};
use crate::capture::{CaptureLoop, DetectionTracker, DisplaySink, FrameDispatch, LoopParams, LoopState};
use crate::config::{ModeFlags, Settings};
use crate::detector::{CascadeLoader, Detector, FaceDetector, SeetaLoader};
use crate::error::{PipelineError, Precondition, Result};
use crate::face::{FaceImage, RunContext, crop_faces};
use crate::media::resolve::{MediaLocation, UriResolver, YtDlpResolver};
use crate::media::{DefaultOpener, MediaError, SourceOpener};
use crate::recycle::{RecycleBin, SystemRecycleBin};
use crate::store::{DIRECTORY_NAME_OTHERS, DatasetMode, DistributionStore, validate_label};

/// Called after a reopen-and-reset, before the first frame of the new run
pub type ResetListener = Arc<dyn Fn() + Send + Sync>;

/// Everything the controller talks to outside its own state
#[derive(Clone)]
pub struct Collaborators {
    pub opener: Arc<dyn SourceOpener>,
    pub resolver: Arc<dyn UriResolver>,
    pub cascade_loader: Arc<dyn CascadeLoader>,
    pub recycle_bin: Arc<dyn RecycleBin>,
    pub on_reset: ResetListener,
    pub display: DisplaySink,
}

impl Default for Collaborators {
    /// ffmpeg/yt-dlp media, SeetaFace detection, system trash, no observers
    fn default() -> Self {
        Self {
            opener: Arc::new(DefaultOpener::default()),
            resolver: Arc::new(YtDlpResolver::default()),
            cascade_loader: Arc::new(SeetaLoader::default()),
            recycle_bin: Arc::new(SystemRecycleBin),
            on_reset: Arc::new(|| {}),
            display: Arc::new(|_frame| {}),
        }
    }
}

/// Turns sampled frames into face crops on a blocking worker
#[derive(Clone)]
struct FaceSampler {
    engine: Arc<dyn FaceDetector>,
    run: Arc<RunContext>,
    buffer: Arc<FaceBuffer>,
    store: DistributionStore,
    modes: Arc<RwLock<ModeFlags>>,
    tracker: DetectionTracker,
}

impl FaceSampler {
    fn process(&self, frame: &RgbImage) {
        // Modes are read per sample so switching them mid-run takes effect
        let Some(mode) = read_lock(&self.modes).dataset_mode() else {
            return;
        };

        let gray = image::imageops::grayscale(frame);
        let rects = self.engine.detect(&gray);
        if rects.is_empty() {
            return;
        }
        debug!("detected {} face(s)", rects.len());

        for crop in crop_faces(frame, &rects) {
            let face = FaceImage::detected(crop, self.run.next_file_name());
            match mode {
                DatasetMode::Learning => {
                    self.buffer.push(face);
                }
                DatasetMode::Test => {
                    if let Err(e) = self.store.save(DatasetMode::Test, &face) {
                        error!("failed to save test face {}: {}", face.file_name(), e);
                    }
                }
            }
        }
    }
}

impl FrameDispatch for FaceSampler {
    fn dispatch(&self, frame: Arc<RgbImage>) {
        let sampler = self.clone();
        self.tracker.spawn(move || sampler.process(&frame));
    }
}

fn read_lock<T: Copy>(lock: &RwLock<T>) -> T {
    *lock.read().expect("mode lock poisoned")
}

/// Coordinates the capture loop, the face buffer and the dataset on disk
///
/// All methods take `&self`; share the controller behind an `Arc` when the
/// operator front end and the playback wait run on different tasks.
pub struct PipelineController {
    settings: RwLock<Settings>,
    modes: Arc<RwLock<ModeFlags>>,
    capture_interval_ms: Arc<AtomicU64>,
    detector: Mutex<Detector>,
    capture: CaptureLoop,
    tracker: DetectionTracker,
    buffer: Arc<FaceBuffer>,
    run: RwLock<Arc<RunContext>>,
    deps: Collaborators,
    /// Serialises concurrent `start` calls
    starting: tokio::sync::Mutex<()>,
    /// Bumped by `stop`, aborts a start that is still resolving its source
    stop_requests: watch::Sender<u64>,
}

impl PipelineController {
    pub fn new(settings: Settings, modes: ModeFlags, deps: Collaborators) -> Self {
        let mut detector = Detector::new(Arc::clone(&deps.cascade_loader));
        detector.load(&settings.cascade_path);
        let (stop_requests, _) = watch::channel(0);

        Self {
            capture_interval_ms: Arc::new(AtomicU64::new(settings.capture_interval_ms)),
            settings: RwLock::new(settings),
            modes: Arc::new(RwLock::new(modes)),
            detector: Mutex::new(detector),
            capture: CaptureLoop::new(),
            tracker: DetectionTracker::new(),
            buffer: Arc::new(FaceBuffer::new()),
            run: RwLock::new(Arc::new(RunContext::start())),
            deps,
            starting: tokio::sync::Mutex::new(()),
            stop_requests,
        }
    }

    fn detector(&self) -> MutexGuard<'_, Detector> {
        self.detector.lock().expect("detector lock poisoned")
    }

    fn write_settings(&self) -> std::sync::RwLockWriteGuard<'_, Settings> {
        self.settings.write().expect("settings lock poisoned")
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().expect("settings lock poisoned").clone()
    }

    pub fn modes(&self) -> ModeFlags {
        read_lock(&self.modes)
    }

    fn store(&self) -> DistributionStore {
        DistributionStore::new(
            self.settings().output_dir,
            Arc::clone(&self.deps.recycle_bin),
        )
    }

    pub fn set_video_path(&self, path: impl Into<String>) {
        self.write_settings().video_path = path.into();
    }

    /// Updates the cascade path and reloads the detector from it
    ///
    /// # Returns
    /// Whether detection is available with the new definition
    pub fn set_cascade_path(&self, path: impl Into<String>) -> bool {
        let path = path.into();
        let ready = self.detector().load(&path);
        self.write_settings().cascade_path = path;
        ready
    }

    pub fn set_output_dir(&self, dir: impl Into<String>) {
        self.write_settings().output_dir = dir.into();
    }

    /// Takes effect on the next sampled frame, even mid-run
    pub fn set_capture_interval(&self, millis: u64) {
        self.write_settings().capture_interval_ms = millis;
        self.capture_interval_ms.store(millis, Ordering::Relaxed);
    }

    pub fn set_learning_mode(&self, enabled: bool) {
        self.modes.write().expect("mode lock poisoned").learning = enabled;
    }

    pub fn set_test_mode(&self, enabled: bool) {
        self.modes.write().expect("mode lock poisoned").test = enabled;
    }

    pub fn is_detector_ready(&self) -> bool {
        self.detector().is_ready()
    }

    /// Checks start-up preconditions without touching any pipeline state
    fn validate(&self, settings: &Settings, modes: ModeFlags) -> Result<MediaLocation> {
        if settings.video_path.trim().is_empty() {
            return Err(Precondition::MissingSource.into());
        }
        let location = MediaLocation::parse(&settings.video_path);
        if let MediaLocation::Local(path) = &location
            && !path.exists()
        {
            return Err(Precondition::MissingSource.into());
        }

        if modes.detection_enabled() {
            let cascade = Path::new(&settings.cascade_path);
            if settings.cascade_path.is_empty() || !cascade.is_file() {
                return Err(Precondition::MissingDetectorDefinition.into());
            }
            let mut detector = self.detector();
            // The file may have appeared since the path was set
            if !detector.is_ready() && !detector.load(cascade) {
                return Err(Precondition::MissingDetectorDefinition.into());
            }
            drop(detector);

            if settings.output_dir.trim().is_empty() {
                return Err(Precondition::MissingOutputFolder.into());
            }
            if let Err(e) = std::fs::create_dir_all(&settings.output_dir) {
                warn!("cannot create output folder {}: {}", settings.output_dir, e);
                return Err(Precondition::MissingOutputFolder.into());
            }
        }
        Ok(location)
    }

    /// Starts or resumes playback
    ///
    /// An exhausted (or never opened) source is reopened first, which also
    /// clears the face buffer and begins a new run. A `stop` issued at any
    /// point before playback begins, including while a remote link is still
    /// being resolved, cancels the start.
    ///
    /// # Returns
    /// The loop state after the call
    pub async fn start(&self) -> Result<LoopState> {
        let _starting = self.starting.lock().await;
        if self.capture.state() == LoopState::Running {
            return Ok(LoopState::Running);
        }

        let mut stop_rx = self.stop_requests.subscribe();
        let since = self.capture.generation();

        let settings = self.settings();
        let modes = self.modes();
        let location = self.validate(&settings, modes)?;
        let store = self.store();

        if self.capture.needs_reopen().await {
            self.capture.close_source().await;
            let target = match location {
                MediaLocation::Local(path) => path.to_string_lossy().into_owned(),
                MediaLocation::Remote(url) => url,
                MediaLocation::YouTube(link) => {
                    info!("resolving {}", link);
                    tokio::select! {
                        resolved = self.deps.resolver.resolve(&link) => resolved.map_err(|source| {
                            PipelineError::Open { location: link.clone(), source }
                        })?,
                        _ = stop_rx.changed() => {
                            info!("start cancelled while resolving {}", link);
                            return Ok(LoopState::Stopped);
                        }
                    }
                }
            };

            let opener = Arc::clone(&self.deps.opener);
            let open_target = target.clone();
            let source = tokio::task::spawn_blocking(move || opener.open(&open_target))
                .await
                .map_err(|e| PipelineError::Open {
                    location: target.clone(),
                    source: MediaError::Backend(e.to_string()),
                })?
                .map_err(|source| PipelineError::Open {
                    location: target.clone(),
                    source,
                })?;

            self.capture.install_source(source).await;
            self.reset_run();
        }

        if let Some(mode) = modes.dataset_mode() {
            store.output_folder(mode)?;
            if mode == DatasetMode::Learning {
                store.ensure_label_folder(mode, DIRECTORY_NAME_OTHERS)?;
            }
        }

        let Some(frame_interval) = self.capture.frame_interval().await else {
            return Ok(LoopState::Stopped);
        };
        let dispatcher = self.sampler(store, modes).map(|s| Arc::new(s) as Arc<dyn FrameDispatch>);
        if dispatcher.is_none() && modes.detection_enabled() {
            warn!("detector not ready, playing without detection");
        }

        let params = LoopParams {
            frame_interval,
            capture_interval_ms: Arc::clone(&self.capture_interval_ms),
            display: Arc::clone(&self.deps.display),
            dispatcher,
        };
        // Refused if a stop landed since `since` was read
        let state = self.capture.start(params, since).await;
        if state == LoopState::Stopped {
            info!("start cancelled before playback began");
        } else {
            info!("playback {:?}", state);
        }
        Ok(state)
    }

    fn sampler(&self, store: DistributionStore, modes: ModeFlags) -> Option<FaceSampler> {
        if !modes.detection_enabled() {
            return None;
        }
        let engine = self.detector().engine()?;
        Some(FaceSampler {
            engine,
            run: self.run_context(),
            buffer: Arc::clone(&self.buffer),
            store,
            modes: Arc::clone(&self.modes),
            tracker: self.tracker.clone(),
        })
    }

    fn reset_run(&self) {
        self.buffer.clear();
        let run = Arc::new(RunContext::start());
        info!("new run {}", run.run_timestamp());
        *self.run.write().expect("run lock poisoned") = run;
        (self.deps.on_reset)();
    }

    fn run_context(&self) -> Arc<RunContext> {
        Arc::clone(&self.run.read().expect("run lock poisoned"))
    }

    /// Timestamp prefix of the current run's file names
    pub fn run_timestamp(&self) -> String {
        self.run_context().run_timestamp().to_string()
    }

    /// Halts playback; detections already dispatched still complete
    pub fn stop(&self) {
        self.stop_requests.send_modify(|n| *n += 1);
        self.capture.stop();
    }

    pub fn state(&self) -> LoopState {
        self.capture.state()
    }

    pub async fn wait_stopped(&self) {
        self.capture.wait_stopped().await;
    }

    pub async fn wait_detections_idle(&self) {
        self.tracker.wait_idle().await;
    }

    /// Shows the first frame again without sampling it
    pub async fn step_back(&self) -> Result<bool> {
        self.capture
            .step_back(&self.deps.display)
            .await
            .map_err(|source| PipelineError::Open {
                location: self.settings().video_path,
                source,
            })
    }

    /// Removes the face at 1-based `position`, recycling its file if it was saved
    ///
    /// # Returns
    /// `false` if `position` is out of range
    pub fn delete_at(&self, position: usize) -> bool {
        let Some(face) = self.buffer.get(position) else {
            return false;
        };
        if face.is_classified() {
            let store = self.store();
            if let Some(path) = store.face_path(self.modes().output_mode(), &face)
                && path.exists()
            {
                // The buffer entry goes regardless of the outcome
                store.delete(&path);
            }
        }
        self.buffer.remove(position).is_some()
    }

    /// Labels the face at 1-based `position` and saves or moves its file
    ///
    /// On failure the previous label is restored so the operation can be retried.
    pub fn classify(&self, position: usize, label: &str) -> Result<()> {
        let label = validate_label(label)?;
        let Some((previous, face)) = self.buffer.set_folder(position, label) else {
            debug!("classify ignored, no face at position {}", position);
            return Ok(());
        };
        if previous == label {
            return Ok(());
        }

        let store = self.store();
        match store.move_face(self.modes().output_mode(), &face, &previous) {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("failed to classify {} as {}: {}", face.file_name(), label, e);
                self.buffer.set_folder(position, &previous);
                Err(e)
            }
        }
    }

    /// Saves every buffered face, labelling unclassified ones `Others`
    ///
    /// # Returns
    /// Number of files written
    pub fn save_all(&self) -> Result<usize> {
        let mode = self.modes().output_mode();
        let store = self.store();
        if mode == DatasetMode::Learning {
            store.ensure_label_folder(mode, DIRECTORY_NAME_OTHERS)?;
        }

        let mut written = 0;
        for position in 1..=self.buffer.len() {
            let Some(mut face) = self.buffer.get(position) else {
                break;
            };
            if !face.is_classified() {
                match self.buffer.set_folder(position, DIRECTORY_NAME_OTHERS) {
                    Some((_, updated)) => face = updated,
                    None => break,
                }
            }
            if store.face_path(mode, &face).is_some_and(|path| path.exists()) {
                continue;
            }
            match store.save(mode, &face) {
                Ok(_) => written += 1,
                Err(e) => error!("failed to save {}: {}", face.file_name(), e),
            }
        }
        info!("saved {} face(s)", written);
        Ok(written)
    }

    /// Existing labels of the active dataset, `Others` first
    pub fn labels(&self) -> Result<Vec<String>> {
        let mode = self.modes().output_mode();
        let store = self.store();
        store.ensure_label_folder(mode, DIRECTORY_NAME_OTHERS)?;
        store.list_existing_labels(mode)
    }

    /// Adds a label folder, reusing an existing one that differs only in case
    ///
    /// # Returns
    /// The label as it is spelled on disk
    pub fn append_label(&self, name: &str) -> Result<String> {
        let name = validate_label(name)?;
        let existing = self.labels()?;
        let wanted = name.to_lowercase();
        if let Some(found) = existing.iter().find(|label| label.to_lowercase() == wanted) {
            return Ok(found.clone());
        }
        self.store().ensure_label_folder(self.modes().output_mode(), name)?;
        info!("added label {}", name);
        Ok(name.to_string())
    }

    /// Replaces the buffer with the faces already saved in the active dataset
    ///
    /// # Returns
    /// Number of faces loaded
    pub fn resume_from_disk(&self) -> Result<usize> {
        let faces = self.store().load_persisted(self.modes().output_mode())?;
        let loaded = faces.len();
        self.buffer.replace_all(faces);
        info!("loaded {} saved face(s)", loaded);
        Ok(loaded)
    }

    pub fn has_unclassified(&self) -> bool {
        self.buffer.has_unclassified()
    }

    pub fn faces(&self) -> Vec<FaceImage> {
        self.buffer.snapshot()
    }

    /// Face at 1-based `position`
    pub fn face(&self, position: usize) -> Option<FaceImage> {
        self.buffer.get(position)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BufferEvent> {
        self.buffer.subscribe()
    }
}
