//! Unified error type for reelforge.
//!
//! Every crate funnels its failures into [`Error`]. Structural errors (bad
//! URL, unknown id, missing preset) are returned synchronously to callers;
//! runtime errors raised inside a worker are stored on the owning item or job
//! as a message and never cross task boundaries as values.

use std::fmt;
use std::path::PathBuf;

/// Unified error type covering all failure modes in reelforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The URL does not match the video source's URL grammar.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The remote video does not exist.
    #[error("Video not found: {0}")]
    VideoNotFound(String),

    /// The remote video exists but no usable stream could be obtained.
    #[error("Video unavailable: {0}")]
    VideoUnavailable(String),

    /// The byte transfer failed.
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// The transcoder ran but did not produce an output.
    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    /// No transcoder executable could be located.
    #[error("Transcoder not found; is ffmpeg installed and in PATH?")]
    TranscoderNotFound,

    /// No queue item with the given id exists.
    #[error("Queue item not found: {0}")]
    QueueItemNotFound(String),

    /// The requested output format or preset is not usable.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The save directory cannot be created or written to.
    #[error("Save path not writable: {}", .0.display())]
    SavePathNotWritable(PathBuf),

    /// The operation was cancelled before it finished.
    #[error("Cancelled")]
    Cancelled,

    /// The requested entity (job, preset, ...) could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "conversion job", "preset").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The operation is not allowed in the entity's current state.
    #[error("Invalid state for {id}: {state}")]
    InvalidState {
        /// Identifier of the item or job.
        id: String,
        /// Human-readable current state.
        state: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An external tool (ffmpeg, ffprobe) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// A network request failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// JSON (de)serialization failed.
    #[error("JSON error: {source}")]
    Json {
        /// The underlying serde error.
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Stable, machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::VideoNotFound(_) => "VIDEO_NOT_FOUND",
            Error::VideoUnavailable(_) => "VIDEO_UNAVAILABLE",
            Error::DownloadFailed(_) => "DOWNLOAD_FAILED",
            Error::ConversionFailed(_) => "CONVERSION_FAILED",
            Error::TranscoderNotFound => "TRANSCODER_NOT_FOUND",
            Error::QueueItemNotFound(_) => "QUEUE_ITEM_NOT_FOUND",
            Error::InvalidFormat(_) => "INVALID_FORMAT",
            Error::SavePathNotWritable(_) => "SAVE_PATH_NOT_WRITABLE",
            Error::Cancelled => "CANCELLED",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::InvalidState { .. } => "INVALID_STATE",
            Error::Validation(_) => "VALIDATION",
            Error::Tool { .. } => "TOOL",
            Error::Probe(_) => "PROBE",
            Error::Http(_) => "HTTP",
            Error::Io { .. } => "IO",
            Error::Json { .. } => "JSON",
        }
    }

    /// Whether this error represents a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::InvalidState`].
    pub fn invalid_state(id: impl Into<String>, state: impl fmt::Debug) -> Self {
        Error::InvalidState {
            id: id.into(),
            state: format!("{state:?}"),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
