//! Classifying media locations and resolving remote links to playable URLs

use std::path::PathBuf;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;
use url::Url;

use super::MediaError;

/// Where a configured video path points to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaLocation {
    /// A file or frame folder on disk
    Local(PathBuf),
    /// Canonicalised YouTube link, still to be resolved into a stream URL
    YouTube(String),
    /// Any other http(s) stream, handed to the decoder as-is
    Remote(String),
}

impl MediaLocation {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match Url::parse(value) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => match youtube_link(&url) {
                Some(link) => Self::YouTube(link),
                None => Self::Remote(value.to_string()),
            },
            // Windows drive letters parse as one-letter schemes
            _ => Self::Local(PathBuf::from(value)),
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Local(_))
    }
}

/// Returns the canonical watch link for a YouTube URL
///
/// `youtube.com/watch?v=<id>` keeps only the `v` parameter; `youtu.be` short
/// links are used unchanged. A watch URL without a video id is not a link.
pub fn youtube_link(url: &Url) -> Option<String> {
    match url.host_str()? {
        "www.youtube.com" | "youtube.com" | "m.youtube.com" => {
            let video_id = url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned())
                .filter(|id| !id.is_empty())?;
            Some(format!(
                "{}://{}{}?v={}",
                url.scheme(),
                url.host_str()?,
                url.path(),
                video_id
            ))
        }
        "youtu.be" => Some(url.as_str().to_string()),
        _ => None,
    }
}

/// Turns a remote link into something the decoder can open
#[async_trait]
pub trait UriResolver: Send + Sync {
    async fn resolve(&self, link: &str) -> Result<String, MediaError>;
}

/// Asks `yt-dlp` for the direct media URL of a link
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    pub program: String,
    /// Format selector passed to `-f`
    pub format: String,
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            format: "best[ext=mp4]/best".to_string(),
        }
    }
}

#[async_trait]
impl UriResolver for YtDlpResolver {
    async fn resolve(&self, link: &str) -> Result<String, MediaError> {
        debug!("resolving {} with {}", link, self.program);
        // Dropping the future (stop during start-up) kills the child
        let output = Command::new(&self.program)
            .args(["--no-playlist", "-f", &self.format, "-g", link])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MediaError::Resolve(format!("failed to execute {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(MediaError::Resolve(format!(
                "{} failed with status {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| MediaError::Resolve(format!("no media URL returned for {}", link)))
    }
}
