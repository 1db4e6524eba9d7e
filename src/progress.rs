use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::capture::DisplaySink;

/// Terminal spinner standing in for the video view of a headless session
pub struct PlaybackProgress {
    progress_bar: ProgressBar,
    start_time: Instant,
    frame_rate: f64,
    shown_frames: AtomicU64,
}

impl PlaybackProgress {
    /// Creates a spinner for a source played at `frame_rate`
    pub fn new(frame_rate: f64, source_name: &str) -> Self {
        let progress_bar = ProgressBar::new_spinner();

        let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} frames | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        progress_bar.set_style(style);
        progress_bar.set_message(format!("Playing {}", source_name));

        Self {
            progress_bar,
            start_time: Instant::now(),
            frame_rate: if frame_rate > 0.0 { frame_rate } else { crate::media::FALLBACK_FPS },
            shown_frames: AtomicU64::new(0),
        }
    }

    /// Counts one displayed frame
    pub fn frame_shown(&self) {
        let shown = self.shown_frames.fetch_add(1, Ordering::Relaxed) + 1;
        self.progress_bar.inc(1);
        self.progress_bar.set_message(self.message(shown));
    }

    /// Display sink that ticks this spinner
    pub fn display_sink(self: &Arc<Self>) -> DisplaySink {
        let progress = Arc::clone(self);
        Arc::new(move |_frame| progress.frame_shown())
    }

    /// Notes a new run without resetting the elapsed clock
    pub fn run_reset(&self) {
        self.shown_frames.store(0, Ordering::Relaxed);
        self.progress_bar.set_position(0);
        self.progress_bar.set_message("Starting...");
    }

    fn message(&self, shown: u64) -> String {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let current_fps = if elapsed > 0.0 { shown as f64 / elapsed } else { 0.0 };
        format!(
            "{} | Speed: {:.1} fps",
            format_duration(shown as f64 / self.frame_rate),
            current_fps
        )
    }

    pub fn shown_frames(&self) -> u64 {
        self.shown_frames.load(Ordering::Relaxed)
    }

    /// Finishes the spinner with a summary line
    pub fn finish(&self, faces: usize) {
        let shown = self.shown_frames();
        self.progress_bar.finish_with_message(format!(
            "Played {} | Faces: {} | Took: {}",
            format_duration(shown as f64 / self.frame_rate),
            faces,
            format_duration(self.start_time.elapsed().as_secs_f64())
        ));
    }
}

/// Formats a duration in seconds to h:mm:ss format
fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}
