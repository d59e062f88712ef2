//! reelforge-core: shared types, errors, settings, and the progress sink.
//!
//! This crate is the foundational dependency for the other reelforge crates,
//! providing the queue/conversion data model, the unified error type, the
//! settings provider, a broadcast event bus, and filesystem helpers used by
//! the downloader.

pub mod config;
pub mod conversion;
pub mod download;
pub mod error;
pub mod events;
pub mod media;
pub mod paths;

// Re-export the most commonly used items at the crate root.
pub use conversion::*;
pub use download::*;
pub use error::{Error, Result};
pub use media::*;
