//! Conversion job data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::media::MediaInfo;
use crate::{Error, Result};

/// Lifecycle state of a [`ConversionJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionState {
    Queued,
    Analyzing,
    Converting,
    Completed,
    Failed,
    Cancelled,
}

impl ConversionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConversionState::Completed | ConversionState::Failed | ConversionState::Cancelled
        )
    }
}

impl fmt::Display for ConversionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversionState::Queued => "queued",
            ConversionState::Analyzing => "analyzing",
            ConversionState::Converting => "converting",
            ConversionState::Completed => "completed",
            ConversionState::Failed => "failed",
            ConversionState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Start/end window for trimming, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimOptions {
    pub start_time_seconds: f64,
    pub end_time_seconds: f64,
}

impl TrimOptions {
    pub fn new(start_time_seconds: f64, end_time_seconds: f64) -> Self {
        Self {
            start_time_seconds,
            end_time_seconds,
        }
    }

    /// Check `0 <= start < end`.
    pub fn validate(&self) -> Result<()> {
        let (start, end) = (self.start_time_seconds, self.end_time_seconds);
        if !start.is_finite() || !end.is_finite() {
            return Err(Error::Validation("trim times must be finite".into()));
        }
        if start < 0.0 {
            return Err(Error::Validation(format!(
                "trim start must not be negative (got {start})"
            )));
        }
        if start >= end {
            return Err(Error::Validation(format!(
                "trim start ({start}) must be before end ({end})"
            )));
        }
        Ok(())
    }

    pub fn duration_seconds(&self) -> f64 {
        self.end_time_seconds - self.start_time_seconds
    }
}

/// A requested transcode and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionJob {
    pub id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub preset_id: Option<String>,
    pub custom_args: Option<Vec<String>>,
    pub trim_options: Option<TrimOptions>,
    pub state: ConversionState,
    /// Percent in `[0, 100]`.
    pub progress: f64,
    pub duration_seconds: f64,
    pub current_time_seconds: f64,
    /// Realtime speed multiplier reported by the transcoder.
    pub speed: f64,
    pub error: Option<String>,
    pub input_info: Option<MediaInfo>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConversionJob {
    /// Create a job in [`ConversionState::Queued`].
    pub fn new(id: impl Into<String>, input_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            id: id.into(),
            input_path,
            output_path,
            preset_id: None,
            custom_args: None,
            trim_options: None,
            state: ConversionState::Queued,
            progress: 0.0,
            duration_seconds: 0.0,
            current_time_seconds: 0.0,
            speed: 0.0,
            error: None,
            input_info: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// A job still owns (or is about to own) a transcoder process.
    pub fn is_running(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn complete(&mut self) {
        self.state = ConversionState::Completed;
        self.progress = 100.0;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = ConversionState::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.state = ConversionState::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    pub fn to_progress(&self) -> ConversionProgress {
        ConversionProgress {
            job_id: self.id.clone(),
            state: self.state,
            percent: self.progress,
            current_time_seconds: self.current_time_seconds,
            duration_seconds: self.duration_seconds,
            speed: self.speed,
            error: self.error.clone(),
        }
    }
}

/// Transient progress report for a conversion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionProgress {
    pub job_id: String,
    pub state: ConversionState,
    pub percent: f64,
    pub current_time_seconds: f64,
    pub duration_seconds: f64,
    pub speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Static catalogue entry describing a named set of transcoder arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionPreset {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: PresetCategory,
    pub output_ext: &'static str,
    pub transcoder_args: &'static [&'static str],
}

/// Grouping used by preset listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetCategory {
    Audio,
    Video,
    Compress,
    Social,
}

impl PresetCategory {
    pub const ALL: [PresetCategory; 4] = [
        PresetCategory::Audio,
        PresetCategory::Video,
        PresetCategory::Compress,
        PresetCategory::Social,
    ];
}

impl fmt::Display for PresetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PresetCategory::Audio => "audio",
            PresetCategory::Video => "video",
            PresetCategory::Compress => "compress",
            PresetCategory::Social => "social",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PresetCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(PresetCategory::Audio),
            "video" => Ok(PresetCategory::Video),
            "compress" => Ok(PresetCategory::Compress),
            "social" => Ok(PresetCategory::Social),
            other => Err(Error::Validation(format!("unknown preset category: {other}"))),
        }
    }
}
