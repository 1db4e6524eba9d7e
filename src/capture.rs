//! Paced frame reading
//!
//! The loop reads one frame per tick at the source's frame rate, hands it to
//! the display sink and, once per capture interval, to a [`FrameDispatch`].
//! Dispatched work runs on blocking worker threads and is tracked so callers
//! can wait for it, but it is never cancelled by [`CaptureLoop::stop`].
//!
//! Decoding blocks, so reads run on the blocking pool with the source held
//! behind an async mutex; a stalled read never ties up a runtime thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use image::RgbImage;
use log::{debug, info, warn};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::media::{MediaError, MediaSource};

/// Read failures in a row after which a source counts as exhausted
pub const MAX_CONSECUTIVE_READ_ERRORS: u32 = 5;

/// Receives every displayed frame, in source order
pub type DisplaySink = Arc<dyn Fn(Arc<RgbImage>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
}

/// Takes a sampled frame off the loop's hands
pub trait FrameDispatch: Send + Sync {
    /// Must return without waiting for the work it starts
    fn dispatch(&self, frame: Arc<RgbImage>);
}

/// Counts detection jobs that are still running
#[derive(Clone)]
pub struct DetectionTracker {
    in_flight: Arc<watch::Sender<usize>>,
}

impl Default for DetectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlightGuard(Arc<watch::Sender<usize>>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl DetectionTracker {
    pub fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            in_flight: Arc::new(in_flight),
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Runs `job` on a blocking worker; one task per call, nothing is pooled
    pub fn spawn<F>(&self, job: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.in_flight.send_modify(|n| *n += 1);
        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        tokio::task::spawn_blocking(move || {
            // Released even if the job panics
            let _guard = guard;
            job();
        })
    }

    /// Resolves once no job is running
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Everything a run of the loop needs besides the source
#[derive(Clone)]
pub struct LoopParams {
    pub frame_interval: Duration,
    /// Minimum milliseconds between two dispatches; shared so it can change mid-run
    pub capture_interval_ms: Arc<AtomicU64>,
    pub display: DisplaySink,
    /// `None` plays the source without sampling
    pub dispatcher: Option<Arc<dyn FrameDispatch>>,
}

type SharedSource = Arc<AsyncMutex<Option<Box<dyn MediaSource>>>>;

pub struct CaptureLoop {
    source: SharedSource,
    state: Arc<watch::Sender<LoopState>>,
    /// Bumped on every start, stop and end of stream
    generation: Arc<AtomicU64>,
    /// Also serialises every state transition
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Default for CaptureLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureLoop {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LoopState::Stopped);
        Self {
            source: Arc::new(AsyncMutex::new(None)),
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    fn transitions(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        lock_task(&self.task)
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Token that changes with every start, stop or end of stream
    ///
    /// Pass it back to [`CaptureLoop::start`] so a stop issued in between
    /// is not overridden.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Resolves once the loop is stopped
    pub async fn wait_stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == LoopState::Stopped).await;
    }

    /// True when there is no source yet or the current one is exhausted
    pub async fn needs_reopen(&self) -> bool {
        self.source
            .lock()
            .await
            .as_deref()
            .is_none_or(|source| source.is_at_end())
    }

    /// Drops the current source, releasing its handle
    pub async fn close_source(&self) {
        self.source.lock().await.take();
    }

    pub async fn install_source(&self, source: Box<dyn MediaSource>) {
        *self.source.lock().await = Some(source);
    }

    /// Pacing interval of the installed source
    pub async fn frame_interval(&self) -> Option<Duration> {
        self.source
            .lock()
            .await
            .as_deref()
            .map(|source| source.frame_interval())
    }

    /// Starts pacing unless a stop arrived after `since` was read
    ///
    /// # Arguments
    /// * `since` - value of [`CaptureLoop::generation`] taken when the caller began starting
    ///
    /// # Returns
    /// The state after the call; `Stopped` when no source is installed or a stop won
    pub async fn start(&self, params: LoopParams, since: u64) -> LoopState {
        if self.source.lock().await.is_none() {
            warn!("no media source installed, not starting");
            return LoopState::Stopped;
        }

        let mut task = self.transitions();
        if self.generation.load(Ordering::SeqCst) != since {
            debug!("stop requested while starting, staying {:?}", self.state());
            return self.state();
        }
        if self.state() == LoopState::Running {
            return LoopState::Running;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(LoopState::Running);
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.source),
            Arc::clone(&self.state),
            Arc::clone(&self.generation),
            Arc::clone(&self.task),
            generation,
            params,
        ));
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
        LoopState::Running
    }

    /// Halts pacing. Safe to call at any time; in-flight detections keep running.
    pub fn stop(&self) {
        let mut task = self.transitions();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(LoopState::Stopped);
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }

    /// Rewinds to the first frame and shows it
    ///
    /// # Returns
    /// `false` if no source is installed
    pub async fn step_back(&self, display: &DisplaySink) -> Result<bool, MediaError> {
        let guard = Arc::clone(&self.source).lock_owned().await;
        let rewound = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            let Some(source) = guard.as_deref_mut() else {
                return Ok(None);
            };
            source.seek_to_start()?;
            source.read_frame().map(Some)
        })
        .await
        .map_err(|e| MediaError::Backend(format!("frame reader failed: {}", e)))??;

        match rewound {
            None => Ok(false),
            Some(frame) => {
                if let Some(frame) = frame {
                    display(Arc::new(frame));
                }
                Ok(true)
            }
        }
    }
}

fn lock_task(task: &Mutex<Option<JoinHandle<()>>>) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    task.lock().expect("capture task lock poisoned")
}

type ReadResult = (Result<Option<RgbImage>, MediaError>, bool);

/// Reads one frame off the runtime threads
///
/// # Returns
/// The read and whether the source is exhausted afterwards; `None` without a source
async fn read_next(source: &SharedSource) -> Option<ReadResult> {
    let guard = Arc::clone(source).lock_owned().await;
    let read = tokio::task::spawn_blocking(move || {
        let mut guard = guard;
        let source = guard.as_deref_mut()?;
        let read = source.read_frame();
        Some((read, source.is_at_end()))
    })
    .await;

    match read {
        Ok(read) => read,
        Err(e) => {
            warn!("frame reader failed: {}", e);
            None
        }
    }
}

/// Shows a frame and samples it if the capture interval has passed
fn route_frame(frame: RgbImage, params: &LoopParams, last_dispatch: &mut Instant) {
    let frame = Arc::new(frame);
    if let Some(dispatcher) = &params.dispatcher {
        let interval = Duration::from_millis(params.capture_interval_ms.load(Ordering::Relaxed));
        if last_dispatch.elapsed() >= interval {
            dispatcher.dispatch(Arc::clone(&frame));
            *last_dispatch = Instant::now();
        }
    }
    (params.display)(frame);
}

async fn run_loop(
    source: SharedSource,
    state: Arc<watch::Sender<LoopState>>,
    generation: Arc<AtomicU64>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    my_generation: u64,
    params: LoopParams,
) {
    debug!("capture loop pacing every {:?}", params.frame_interval);
    let mut pacing = tokio::time::interval(params.frame_interval);
    pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_dispatch = Instant::now();
    let mut read_errors = 0u32;
    let superseded = || generation.load(Ordering::SeqCst) != my_generation;

    loop {
        pacing.tick().await;
        if superseded() {
            return;
        }
        let Some((read, at_end)) = read_next(&source).await else {
            break;
        };
        // A stop may have landed while the read was blocked
        if superseded() {
            return;
        }

        match read {
            Ok(Some(frame)) => {
                read_errors = 0;
                route_frame(frame, &params, &mut last_dispatch);
            }
            Ok(None) => break,
            // One bad frame must not end playback, a dead decoder must
            Err(e) => {
                read_errors += 1;
                warn!("failed to read frame: {}", e);
                if read_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    warn!("{} read failures in a row, ending playback", read_errors);
                    break;
                }
            }
        }
        if at_end {
            break;
        }
    }

    // Only the current run may report the end of playback
    let _transitions = lock_task(&task);
    if generation
        .compare_exchange(my_generation, my_generation + 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        info!("end of stream reached");
        state.send_replace(LoopState::Stopped);
    }
}
