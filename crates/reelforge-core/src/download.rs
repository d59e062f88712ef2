//! Download queue data model.
//!
//! A [`QueueItem`] is a single requested download. Its [`DownloadState`]
//! only moves along the queue state machine:
//!
//! ```text
//! Queued -> FetchingMetadata -> Ready -> Downloading -> [Converting] -> Completed
//!   (any active state) -> CancelRequested -> Cancelled
//!   (any active state) -> Failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::Error;

// ---------------------------------------------------------------------------
// OutputFormat
// ---------------------------------------------------------------------------

/// Requested output of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Audio only, saved as mp3.
    Audio,
    /// Audio and video, saved as mp4.
    Video,
}

impl OutputFormat {
    /// File extension (without dot) of the final output.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Audio => "mp3",
            OutputFormat::Video => "mp4",
        }
    }

    pub fn is_audio_only(self) -> bool {
        matches!(self, OutputFormat::Audio)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Audio => f.write_str("audio"),
            OutputFormat::Video => f.write_str("video"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" | "mp3" => Ok(OutputFormat::Audio),
            "video" | "mp4" => Ok(OutputFormat::Video),
            other => Err(Error::InvalidFormat(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// DownloadState
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`QueueItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Queued,
    FetchingMetadata,
    Ready,
    Downloading,
    Converting,
    Completed,
    Failed,
    CancelRequested,
    Cancelled,
}

impl DownloadState {
    /// Completed, Failed or Cancelled. No further transitions except retry.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Failed | DownloadState::Cancelled
        )
    }

    /// States in which a worker holds a concurrency slot.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            DownloadState::FetchingMetadata
                | DownloadState::Downloading
                | DownloadState::Converting
                | DownloadState::CancelRequested
        )
    }

    /// States from which [`QueueItem`] may be admitted by the gate.
    pub fn is_startable(self) -> bool {
        matches!(self, DownloadState::Queued | DownloadState::Ready)
    }

    /// States from which a retry is permitted.
    pub fn is_retryable(self) -> bool {
        matches!(self, DownloadState::Failed | DownloadState::Cancelled)
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DownloadState::Queued => "queued",
            DownloadState::FetchingMetadata => "fetching_metadata",
            DownloadState::Ready => "ready",
            DownloadState::Downloading => "downloading",
            DownloadState::Converting => "converting",
            DownloadState::Completed => "completed",
            DownloadState::Failed => "failed",
            DownloadState::CancelRequested => "cancel_requested",
            DownloadState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// VideoMetadata / StreamDescriptor
// ---------------------------------------------------------------------------

/// Metadata about a remote video, populated once fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// A concrete stream selected by a video source for one download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    /// Location the bytes are read from.
    pub url: String,
    /// Container extension of the stream as delivered (e.g. `webm`, `m4a`).
    pub container: String,
    /// Whether the stream carries no video track.
    pub audio_only: bool,
    /// Size in bytes, when advertised.
    pub size_bytes: Option<u64>,
    /// Bitrate in bits per second, when known.
    #[serde(default)]
    pub bitrate: Option<u64>,
}

// ---------------------------------------------------------------------------
// QueueItem
// ---------------------------------------------------------------------------

/// A requested download and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub url: String,
    pub state: DownloadState,
    pub format: OutputFormat,
    pub metadata: Option<VideoMetadata>,
    pub save_path: PathBuf,
    /// Final output path. Only set once the item is `Completed`.
    pub file_path: Option<PathBuf>,
    pub error: Option<String>,
    /// Last reported percent of the current phase.
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// Create a new item in [`DownloadState::Queued`].
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        format: OutputFormat,
        save_path: impl Into<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            url: url.into(),
            state: DownloadState::Queued,
            format,
            metadata: None,
            save_path: save_path.into(),
            file_path: None,
            error: None,
            progress: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `state` and bump `updated_at`.
    pub fn transition(&mut self, state: DownloadState) {
        if self.state != state {
            // Percent is tracked per phase.
            if matches!(state, DownloadState::Downloading | DownloadState::Converting) {
                self.progress = 0.0;
            }
            self.state = state;
        }
        self.updated_at = Utc::now();
    }

    /// Transition to `Completed` with the final file path.
    pub fn complete(&mut self, file_path: PathBuf) {
        self.file_path = Some(file_path);
        self.error = None;
        self.progress = 100.0;
        self.transition(DownloadState::Completed);
    }

    /// Transition to `Failed` with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.transition(DownloadState::Failed);
    }

    /// Reset a failed or cancelled item back to `Queued`.
    pub fn reset(&mut self) {
        self.error = None;
        self.file_path = None;
        self.progress = 0.0;
        self.transition(DownloadState::Queued);
    }

    /// Title from metadata, if fetched.
    pub fn title(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.title.as_str())
    }
}

// ---------------------------------------------------------------------------
// DownloadProgress
// ---------------------------------------------------------------------------

/// Transient progress report for a queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub item_id: String,
    pub state: DownloadState,
    /// Percent of the current phase, in `[0, 100]`.
    pub percent: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub speed_bytes_per_sec: f64,
    pub eta_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadProgress {
    /// A state-only report with no transfer figures.
    pub fn state(item_id: impl Into<String>, state: DownloadState) -> Self {
        Self {
            item_id: item_id.into(),
            state,
            percent: 0.0,
            downloaded_bytes: 0,
            total_bytes: 0,
            speed_bytes_per_sec: 0.0,
            eta_seconds: 0.0,
            error: None,
        }
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = percent.clamp(0.0, 100.0);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
