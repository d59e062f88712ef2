//! Reelforge - media download queue and conversion service
//!
//! This library crate exposes the queue manager, downloader and converter
//! service for the CLI and for integration testing.

pub mod config;
pub mod converter;
pub mod downloader;
pub mod queue;

pub use converter::{ConversionRequest, ConverterService};
pub use downloader::{Downloader, HttpVideoSource, ProgressSender, VideoSource};
pub use queue::{MediaDownloader, QueueManager};
