//! Direct-link video source over HTTP(S).
//!
//! Handles URLs that point straight at a media file
//! (`https://host/path/name.mp4`). Metadata comes from a `HEAD` request and
//! the body is streamed with reqwest.

use async_trait::async_trait;
use futures::TryStreamExt;
use reelforge_core::config::{AudioQuality, VideoQuality};
use reelforge_core::paths::{is_audio_extension, media_extensions};
use reelforge_core::{Error, OutputFormat, Result, StreamDescriptor, VideoMetadata};
use reqwest::{StatusCode, Url};
use tokio_util::io::StreamReader;

use super::source::{MediaStream, VideoSource};
use super::url_grammar;

/// A [`VideoSource`] for plain media links.
#[derive(Debug, Clone)]
pub struct HttpVideoSource {
    client: reqwest::Client,
}

impl Default for HttpVideoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpVideoSource {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("reelforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn parse(&self, url: &str) -> Result<(Url, String)> {
        let parsed = Url::parse(url.trim()).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(Error::InvalidUrl(format!("{url}: expected an http(s) link")));
        }
        if url_grammar::is_youtube_url(url) {
            return Err(Error::InvalidUrl(format!(
                "{url}: video pages are not direct media links"
            )));
        }
        let ext = media_extension(&parsed)
            .ok_or_else(|| Error::InvalidUrl(format!("{url}: not a link to a media file")))?;
        Ok((parsed, ext))
    }

    async fn head(&self, url: Url) -> Result<Option<u64>> {
        let response = self.client.head(url.clone()).send().await.map_err(http_error)?;
        match response.status() {
            s if s.is_success() => Ok(response.content_length().filter(|n| *n > 0)),
            // Some servers refuse HEAD; the GET will tell us more.
            StatusCode::METHOD_NOT_ALLOWED => Ok(None),
            s => Err(status_error(&url, s)),
        }
    }
}

#[async_trait]
impl VideoSource for HttpVideoSource {
    fn validate_url(&self, url: &str) -> Result<()> {
        self.parse(url).map(|_| ())
    }

    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        let (parsed, _) = self.parse(url)?;
        self.head(parsed.clone()).await?;

        let title = file_stem(&parsed).unwrap_or_else(|| "download".to_string());
        Ok(VideoMetadata {
            id: url.to_string(),
            title,
            author: parsed.host_str().map(str::to_string),
            duration_seconds: 0.0,
            thumbnail_url: None,
        })
    }

    async fn select_stream(
        &self,
        url: &str,
        format: OutputFormat,
        audio_quality: AudioQuality,
        video_quality: VideoQuality,
    ) -> Result<StreamDescriptor> {
        let (parsed, ext) = self.parse(url)?;
        // A direct link has exactly one stream; preferences only matter to
        // the conversion step.
        tracing::debug!(url, %format, %audio_quality, %video_quality, "selecting direct stream");

        let size = self
            .head(parsed.clone())
            .await
            .map_err(|e| match e {
                Error::VideoNotFound(m) => Error::VideoUnavailable(m),
                other => other,
            })?;

        Ok(StreamDescriptor {
            url: parsed.to_string(),
            audio_only: is_audio_extension(&ext),
            container: ext,
            size_bytes: size,
            bitrate: None,
        })
    }

    async fn open_stream(&self, stream: &StreamDescriptor) -> Result<MediaStream> {
        let url = Url::parse(&stream.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let response = self.client.get(url.clone()).send().await.map_err(http_error)?;
        if !response.status().is_success() {
            return Err(status_error(&url, response.status()));
        }

        let size = response.content_length().or(stream.size_bytes);
        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(MediaStream {
            reader: Box::pin(StreamReader::new(body)),
            size,
        })
    }
}

fn http_error(e: reqwest::Error) -> Error {
    Error::Http(e.to_string())
}

fn status_error(url: &Url, status: StatusCode) -> Error {
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        Error::VideoNotFound(url.to_string())
    } else {
        Error::VideoUnavailable(format!("{url}: HTTP {status}"))
    }
}

fn last_segment(url: &Url) -> Option<&str> {
    url.path_segments()?.rev().find(|s| !s.is_empty())
}

fn media_extension(url: &Url) -> Option<String> {
    let (_, ext) = last_segment(url)?.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    media_extensions().any(|m| m == ext).then_some(ext)
}

fn file_stem(url: &Url) -> Option<String> {
    let (stem, _) = last_segment(url)?.rsplit_once('.')?;
    let stem = stem.replace("%20", " ");
    (!stem.trim().is_empty()).then_some(stem)
}
