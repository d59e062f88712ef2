//! Application settings.
//!
//! [`Settings`] is deserialized from JSON. Every field defaults sensibly so a
//! completely empty `{}` file is valid. Components never read the file
//! themselves; they take a [`SettingsProvider`] and ask for a snapshot when
//! they need one.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Result;
use crate::Error;

/// Lowest accepted concurrency ceiling.
pub const MIN_CONCURRENT_DOWNLOADS: usize = 1;
/// Highest accepted concurrency ceiling.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 5;
/// Concurrency ceiling used when none is configured.
pub const DEFAULT_CONCURRENT_DOWNLOADS: usize = 2;

/// Clamp a requested concurrency ceiling into the accepted range.
pub fn clamp_concurrency(n: usize) -> usize {
    n.clamp(MIN_CONCURRENT_DOWNLOADS, MAX_CONCURRENT_DOWNLOADS)
}

// ---------------------------------------------------------------------------
// Quality preferences
// ---------------------------------------------------------------------------

/// Preferred audio stream quality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioQuality {
    Low,
    Medium,
    #[default]
    High,
}

impl AudioQuality {
    /// Target audio bitrate in kbit/s.
    pub fn target_kbps(self) -> u32 {
        match self {
            AudioQuality::Low => 96,
            AudioQuality::Medium => 160,
            AudioQuality::High => 320,
        }
    }
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AudioQuality::Low => "low",
            AudioQuality::Medium => "medium",
            AudioQuality::High => "high",
        })
    }
}

impl FromStr for AudioQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(AudioQuality::Low),
            "medium" => Ok(AudioQuality::Medium),
            "high" => Ok(AudioQuality::High),
            other => Err(Error::Validation(format!("unknown audio quality: {other}"))),
        }
    }
}

/// Preferred video resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoQuality {
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[default]
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "best")]
    Best,
}

impl VideoQuality {
    /// Maximum frame height, or `None` for no limit.
    pub fn max_height(self) -> Option<u32> {
        match self {
            VideoQuality::P360 => Some(360),
            VideoQuality::P480 => Some(480),
            VideoQuality::P720 => Some(720),
            VideoQuality::P1080 => Some(1080),
            VideoQuality::Best => None,
        }
    }
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VideoQuality::P360 => "360p",
            VideoQuality::P480 => "480p",
            VideoQuality::P720 => "720p",
            VideoQuality::P1080 => "1080p",
            VideoQuality::Best => "best",
        })
    }
}

impl FromStr for VideoQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "360p" => Ok(VideoQuality::P360),
            "480p" => Ok(VideoQuality::P480),
            "720p" => Ok(VideoQuality::P720),
            "1080p" => Ok(VideoQuality::P1080),
            "best" => Ok(VideoQuality::Best),
            other => Err(Error::Validation(format!("unknown video quality: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Root application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Concurrency ceiling for the download queue. Clamped to `[1, 5]` on read.
    pub max_concurrent_downloads: usize,
    pub default_audio_quality: AudioQuality,
    pub default_video_quality: VideoQuality,
    /// Explicit path to the transcoder (ffmpeg). Looked up on `PATH` otherwise.
    pub transcoder_path: Option<PathBuf>,
    /// Explicit path to the prober (ffprobe).
    pub prober_path: Option<PathBuf>,
    /// Default directory downloads are saved to.
    pub download_dir: PathBuf,
    /// Scratch directory for in-flight downloads.
    pub temp_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: DEFAULT_CONCURRENT_DOWNLOADS,
            default_audio_quality: AudioQuality::default(),
            default_video_quality: VideoQuality::default(),
            transcoder_path: None,
            prober_path: None,
            download_dir: PathBuf::from("./downloads"),
            temp_dir: None,
        }
    }
}

impl Settings {
    /// Deserialize `Settings` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("settings parse error: {e}")))
    }

    /// Load settings from a file path, falling back to defaults if the path
    /// is `None`, missing, or unparsable.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "Failed to parse settings: {e}");
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No settings file; using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to read settings: {e}");
                Self::default()
            }
        }
    }

    /// The concurrency ceiling after clamping.
    pub fn effective_max_concurrent(&self) -> usize {
        clamp_concurrency(self.max_concurrent_downloads)
    }

    /// Scratch directory, defaulting to `<os temp>/reelforge`.
    pub fn effective_temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("reelforge"))
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let n = self.max_concurrent_downloads;
        if clamp_concurrency(n) != n {
            warnings.push(format!(
                "max_concurrent_downloads {n} is outside [{MIN_CONCURRENT_DOWNLOADS}, {MAX_CONCURRENT_DOWNLOADS}]; using {}",
                clamp_concurrency(n)
            ));
        }

        for (key, path) in [
            ("transcoder_path", &self.transcoder_path),
            ("prober_path", &self.prober_path),
        ] {
            if let Some(p) = path {
                if !p.exists() {
                    warnings.push(format!("{key} {} does not exist", p.display()));
                }
            }
        }

        if self.download_dir.as_os_str().is_empty() {
            warnings.push("download_dir is empty".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// SettingsProvider
// ---------------------------------------------------------------------------

/// Read-only accessor for the current settings.
pub trait SettingsProvider: Send + Sync {
    /// A snapshot of the current settings.
    fn settings(&self) -> Settings;
}

impl SettingsProvider for Settings {
    fn settings(&self) -> Settings {
        self.clone()
    }
}

/// Settings held in memory and updatable at runtime.
#[derive(Debug, Default)]
pub struct SettingsStore {
    inner: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    /// Apply `f` to the stored settings under the write lock.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        let mut guard = self.inner.write();
        f(&mut guard);
    }
}

impl SettingsProvider for SettingsStore {
    fn settings(&self) -> Settings {
        self.inner.read().clone()
    }
}
