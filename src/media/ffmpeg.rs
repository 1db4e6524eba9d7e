use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

use image::RgbImage;
use log::{debug, warn};

use super::{FALLBACK_FPS, MediaError, MediaSource};

/// Stream properties reported by ffprobe
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProbeInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// `None` when the container does not record a frame count
    pub frame_count: Option<u64>,
}

/// Video file or stream decoded by an `ffmpeg` child process into raw RGB24 frames
pub struct FfmpegSource {
    location: String,
    info: ProbeInfo,
    child: Child,
    stdout: ChildStdout,
    position: u64,
    /// Set once the decoder runs dry before the probed frame count
    exhausted_at: Option<u64>,
}

impl FfmpegSource {
    /// Probes `location` and starts decoding from the first frame
    pub fn open(location: &str) -> Result<Self, MediaError> {
        let info = probe(location)?;
        debug!(
            "opened {}: {}x{} @ {:.2} fps, {:?} frames",
            location, info.width, info.height, info.fps, info.frame_count
        );
        let (child, stdout) = spawn_decoder(location)?;
        Ok(Self {
            location: location.to_string(),
            info,
            child,
            stdout,
            position: 0,
            exhausted_at: None,
        })
    }

    fn frame_len(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }

    fn shutdown(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl MediaSource for FfmpegSource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, MediaError> {
        if self.is_at_end() {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.frame_len()];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.exhausted_at = Some(self.position);
                return Ok(None);
            }
            Err(e) => {
                // The pipe cannot resync mid-frame; the decoder is gone for good
                warn!("ffmpeg pipe for {} failed: {}", self.location, e);
                self.exhausted_at = Some(self.position);
                return Err(MediaError::Io(e));
            }
        }
        self.position += 1;

        RgbImage::from_raw(self.info.width, self.info.height, buffer)
            .map(Some)
            .ok_or_else(|| MediaError::Decode("short frame buffer".to_string()))
    }

    fn seek_to_start(&mut self) -> Result<(), MediaError> {
        // A pipe cannot rewind, so restart the decoder
        self.shutdown();
        let (child, stdout) = spawn_decoder(&self.location)?;
        self.child = child;
        self.stdout = stdout;
        self.position = 0;
        self.exhausted_at = None;
        Ok(())
    }

    fn fps(&self) -> f64 {
        self.info.fps
    }

    fn frame_count(&self) -> u64 {
        self.exhausted_at
            .or(self.info.frame_count)
            .unwrap_or(u64::MAX)
    }

    fn position(&self) -> u64 {
        self.position
    }
}

fn spawn_decoder(location: &str) -> Result<(Child, ChildStdout), MediaError> {
    let mut child = Command::new("ffmpeg")
        .args([
            "-v", "error",
            "-i", location,
            "-map", "0:v:0",
            "-f", "rawvideo",
            "-pix_fmt", "rgb24",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| MediaError::Backend(format!("failed to execute ffmpeg: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MediaError::Backend("ffmpeg stdout not captured".to_string()))?;
    Ok((child, stdout))
}

fn probe(location: &str) -> Result<ProbeInfo, MediaError> {
    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames:format=duration",
            "-of", "default=noprint_wrappers=1",
            location,
        ])
        .output()
        .map_err(|e| MediaError::Backend(format!("failed to execute ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(MediaError::Probe(format!(
            "ffprobe failed with status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe(&String::from_utf8_lossy(&output.stdout))
}

/// Parses `key=value` lines printed by ffprobe
pub(crate) fn parse_probe(text: &str) -> Result<ProbeInfo, MediaError> {
    let mut width = None;
    let mut height = None;
    let mut avg_rate = None;
    let mut base_rate = None;
    let mut nb_frames = None;
    let mut duration = None;

    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        match key {
            "width" => width = value.parse::<u32>().ok(),
            "height" => height = value.parse::<u32>().ok(),
            "avg_frame_rate" => avg_rate = parse_rate(value),
            "r_frame_rate" => base_rate = parse_rate(value),
            "nb_frames" => nb_frames = value.parse::<u64>().ok(),
            "duration" => duration = value.parse::<f64>().ok(),
            _ => {}
        }
    }

    let (Some(width), Some(height)) = (width, height) else {
        return Err(MediaError::Probe("no video stream found".to_string()));
    };
    if width == 0 || height == 0 {
        return Err(MediaError::Probe(format!(
            "invalid frame size {}x{}",
            width, height
        )));
    }

    let fps = avg_rate.or(base_rate).unwrap_or_else(|| {
        warn!("frame rate unknown, assuming {} fps", FALLBACK_FPS);
        FALLBACK_FPS
    });
    let frame_count = nb_frames
        .filter(|n| *n > 0)
        .or_else(|| duration.map(|d| (d * fps).round() as u64).filter(|n| *n > 0));

    Ok(ProbeInfo {
        width,
        height,
        fps,
        frame_count,
    })
}

/// Parses rates like `30000/1001` or `25`
fn parse_rate(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let den = den.parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num.parse::<f64>().ok()? / den
        }
        None => value.parse::<f64>().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}
