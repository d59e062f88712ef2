//! # reelforge-av
//!
//! Transcoder and prober plumbing for reelforge.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout and
//!   cancellation support, including line-by-line stdout streaming.
//! - **Probing** ([`probe::analyze`]) -- ffprobe JSON into [`MediaInfo`].
//! - **Progress parsing** ([`ProgressParser`]) -- ffmpeg `-progress` key/value
//!   lines into percent snapshots.
//! - **Argument building** ([`TranscodeArgs`]) and the static preset
//!   catalogue ([`presets`]).
//! - **Auxiliary helpers** -- [`waveform`] peak sampling and [`thumbnail`]
//!   frame extraction.
//!
//! [`MediaInfo`]: reelforge_core::MediaInfo

pub mod args;
pub mod command;
pub mod presets;
pub mod probe;
pub mod progress;
pub mod thumbnail;
pub mod tools;
pub mod waveform;

// ---- Re-exports for convenience ----

pub use args::TranscodeArgs;
pub use command::{StreamOutput, ToolCommand, ToolOutput};
pub use progress::{ProgressParser, ProgressSnapshot};
pub use tools::{Tool, ToolInfo, ToolPaths, ToolRegistry};
