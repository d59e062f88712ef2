//! The video source seam.
//!
//! A [`VideoSource`] knows how to turn a URL into metadata and a byte
//! stream. The downloader never talks to the network directly.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use reelforge_core::config::{AudioQuality, VideoQuality};
use reelforge_core::{OutputFormat, Result, StreamDescriptor, VideoMetadata};
use tokio::io::AsyncRead;

/// An open remote stream.
pub struct MediaStream {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    /// Total size, when the source advertises one.
    pub size: Option<u64>,
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Where videos come from.
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Check `url` against the source's URL grammar.
    ///
    /// Returns [`Error::InvalidUrl`](reelforge_core::Error::InvalidUrl) when
    /// the source cannot handle it.
    fn validate_url(&self, url: &str) -> Result<()>;

    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata>;

    /// Pick a concrete stream for `format` given the quality preferences.
    async fn select_stream(
        &self,
        url: &str,
        format: OutputFormat,
        audio_quality: AudioQuality,
        video_quality: VideoQuality,
    ) -> Result<StreamDescriptor>;

    async fn open_stream(&self, stream: &StreamDescriptor) -> Result<MediaStream>;
}
