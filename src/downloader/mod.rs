//! Downloading a single queue item.
//!
//! The [`Downloader`] resolves a stream through a [`VideoSource`], copies it
//! into a temp file in fixed-size chunks while reporting throughput, and then
//! either moves the file into place or hands it to the converter when the
//! delivered container does not match the requested format.

pub mod http;
pub mod source;
pub mod url_grammar;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reelforge_core::config::{Settings, SettingsProvider};
use reelforge_core::paths::{self, PartialFile};
use reelforge_core::{
    DownloadProgress, DownloadState, Error, OutputFormat, QueueItem, Result, StreamDescriptor,
    VideoMetadata,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

pub use http::HttpVideoSource;
pub use source::{MediaStream, VideoSource};

use crate::converter::ConverterService;
use crate::queue::MediaDownloader;

/// Bytes read from the remote stream per iteration.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Minimum wall-clock time between two progress reports.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// ProgressSender
// ---------------------------------------------------------------------------

/// Callback wrapper handed to a download for progress reporting.
pub struct ProgressSender {
    callback: Box<dyn Fn(DownloadProgress) + Send + Sync>,
}

impl ProgressSender {
    pub fn new(callback: impl Fn(DownloadProgress) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// A sender that discards all reports.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn send(&self, progress: DownloadProgress) {
        (self.callback)(progress);
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Transfer accounting
// ---------------------------------------------------------------------------

/// Percent, speed (bytes/s) and ETA (s) for a transfer in flight.
///
/// Percent is 0 when `total` is unknown; ETA is 0 when speed is 0.
pub fn transfer_stats(downloaded: u64, total: u64, elapsed: Duration) -> (f64, f64, f64) {
    let percent = if total > 0 {
        (downloaded as f64 / total as f64 * 100.0).min(100.0)
    } else {
        0.0
    };
    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 { downloaded as f64 / secs } else { 0.0 };
    let eta = if speed > 0.0 && total > downloaded {
        (total - downloaded) as f64 / speed
    } else {
        0.0
    };
    (percent, speed, eta)
}

fn transfer_report(id: &str, downloaded: u64, total: u64, elapsed: Duration) -> DownloadProgress {
    let (percent, speed, eta) = transfer_stats(downloaded, total, elapsed);
    DownloadProgress {
        item_id: id.to_string(),
        state: DownloadState::Downloading,
        percent,
        downloaded_bytes: downloaded,
        total_bytes: total,
        speed_bytes_per_sec: speed,
        eta_seconds: eta,
        error: None,
    }
}

/// Whether a stream in `container` must be transcoded to satisfy `format`.
pub fn needs_conversion(stream: &StreamDescriptor, format: OutputFormat) -> bool {
    !stream.container.eq_ignore_ascii_case(format.extension())
        || (format.is_audio_only() && !stream.audio_only)
}

/// Transcoder arguments that turn any stream into `format`.
pub fn conversion_args(format: OutputFormat, settings: &Settings) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    match format {
        OutputFormat::Audio => {
            args.extend(["-vn", "-c:a", "libmp3lame", "-b:a"].map(String::from));
            args.push(format!("{}k", settings.default_audio_quality.target_kbps()));
        }
        OutputFormat::Video => {
            args.extend(["-c:v", "libx264", "-preset", "veryfast", "-crf", "23"].map(String::from));
            if let Some(h) = settings.default_video_quality.max_height() {
                args.push("-vf".into());
                args.push(format!("scale=-2:'min({h},ih)'"));
            }
            args.extend(
                ["-c:a", "aac", "-b:a", "192k", "-movflags", "+faststart"].map(String::from),
            );
        }
    }
    args
}

// ---------------------------------------------------------------------------
// Downloader
// ---------------------------------------------------------------------------

/// Transfers queue items from a [`VideoSource`] to disk.
pub struct Downloader {
    source: Arc<dyn VideoSource>,
    converter: ConverterService,
    settings: Arc<dyn SettingsProvider>,
}

impl Downloader {
    pub fn new(
        source: Arc<dyn VideoSource>,
        converter: ConverterService,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            source,
            converter,
            settings,
        }
    }

    /// Download `item` and return the final file path.
    ///
    /// Reports `Downloading` progress while bytes flow and `Converting`
    /// progress (0 to 100, under the item's id) if a transcode follows. On
    /// any error, including cancellation, the temp file is removed.
    pub async fn download_item(
        &self,
        item: &QueueItem,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> Result<PathBuf> {
        let settings = self.settings.settings();

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            s = self.source.select_stream(
                &item.url,
                item.format,
                settings.default_audio_quality,
                settings.default_video_quality,
            ) => s.map_err(|e| match e {
                Error::VideoNotFound(_) | Error::VideoUnavailable(_) | Error::Cancelled => e,
                other => Error::VideoUnavailable(other.to_string()),
            })?,
        };

        let title = item.title().unwrap_or(item.id.as_str());
        let base = paths::sanitize_filename(title);

        let temp_dir = paths::temp_dir(settings.temp_dir.as_deref())?;
        let temp_path = temp_dir.join(format!(
            "{}_{}.{}",
            paths::sanitize_filename(&item.id),
            base,
            stream.container
        ));

        prepare_save_path(&item.save_path)?;
        let final_path = item
            .save_path
            .join(format!("{base}.{}", item.format.extension()));

        tracing::info!(
            item_id = %item.id,
            container = %stream.container,
            audio_only = stream.audio_only,
            temp = %temp_path.display(),
            "Downloading"
        );

        let partial = PartialFile::new(temp_path);
        let bytes = self
            .transfer(&item.id, &stream, partial.path(), cancel, progress)
            .await?;
        tracing::debug!(item_id = %item.id, bytes, "transfer finished");

        // The stream may have ended in the same instant a cancel arrived.
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if !needs_conversion(&stream, item.format) {
            return commit(partial, &final_path).await;
        }

        if !self.converter.transcoder_available() {
            let native = final_path.with_extension(&stream.container);
            tracing::warn!(
                item_id = %item.id,
                path = %native.display(),
                "Transcoder not available; keeping native container"
            );
            return commit(partial, &native).await;
        }

        let target = PartialFile::new(paths::reserve_unique(&final_path).await?);
        let args = conversion_args(item.format, &settings);
        let id = item.id.clone();
        self.converter
            .run_inline(partial.path(), target.path(), &args, cancel, |pct| {
                progress.send(
                    DownloadProgress::state(id.clone(), DownloadState::Converting)
                        .with_percent(pct),
                );
            })
            .await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // The temp source is dropped with `partial`.
        Ok(target.keep())
    }

    async fn transfer(
        &self,
        id: &str,
        stream: &StreamDescriptor,
        temp_path: &Path,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> Result<u64> {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            s = self.source.open_stream(stream) => s?,
        };
        let total = opened.size.or(stream.size_bytes).unwrap_or(0);
        let mut reader = opened.reader;
        let mut file = tokio::fs::File::create(temp_path).await?;

        let started = Instant::now();
        let mut last_report = started;
        let mut downloaded: u64 = 0;
        let mut buf = vec![0u8; CHUNK_SIZE];

        progress.send(transfer_report(id, 0, total, Duration::ZERO));

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                r = reader.read(&mut buf) => r.map_err(|e| Error::DownloadFailed(e.to_string()))?,
            };
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            downloaded += n as u64;

            if last_report.elapsed() >= PROGRESS_INTERVAL {
                last_report = Instant::now();
                progress.send(transfer_report(id, downloaded, total, started.elapsed()));
            }
        }
        file.flush().await?;
        drop(file);

        if total > 0 && downloaded < total {
            return Err(Error::DownloadFailed(format!(
                "stream ended after {downloaded} of {total} bytes"
            )));
        }

        let mut done = transfer_report(id, downloaded, total.max(downloaded), started.elapsed());
        done.percent = 100.0;
        done.eta_seconds = 0.0;
        progress.send(done);
        Ok(downloaded)
    }
}

/// Move a finished temp file to a freshly reserved name near `wanted`.
async fn commit(partial: PartialFile, wanted: &Path) -> Result<PathBuf> {
    let target = PartialFile::new(paths::reserve_unique(wanted).await?);
    paths::move_file(partial.path(), target.path()).await?;
    partial.keep();
    Ok(target.keep())
}

fn prepare_save_path(dir: &Path) -> Result<()> {
    if paths::ensure_dir(dir).is_err() || !paths::is_writable(dir) {
        return Err(Error::SavePathNotWritable(dir.to_path_buf()));
    }
    Ok(())
}

#[async_trait]
impl MediaDownloader for Downloader {
    fn validate_url(&self, url: &str) -> Result<()> {
        self.source.validate_url(url)
    }

    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        self.source.fetch_metadata(url).await
    }

    async fn download(
        &self,
        item: &QueueItem,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> Result<PathBuf> {
        self.download_item(item, cancel, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelforge_core::config::{AudioQuality, VideoQuality};

    fn stream(container: &str, audio_only: bool) -> StreamDescriptor {
        StreamDescriptor {
            url: "https://h/x".into(),
            container: container.into(),
            audio_only,
            size_bytes: None,
            bitrate: None,
        }
    }

    #[test]
    fn stats_with_known_total() {
        let (pct, speed, eta) = transfer_stats(500, 1000, Duration::from_secs(2));
        assert_eq!(pct, 50.0);
        assert_eq!(speed, 250.0);
        assert_eq!(eta, 2.0);
    }

    #[test]
    fn stats_with_unknown_total_or_no_time() {
        assert_eq!(transfer_stats(500, 0, Duration::from_secs(1)), (0.0, 500.0, 0.0));
        assert_eq!(transfer_stats(0, 1000, Duration::ZERO), (0.0, 0.0, 0.0));
        assert_eq!(transfer_stats(2000, 1000, Duration::from_secs(1)).0, 100.0);
    }

    #[test]
    fn conversion_decision() {
        assert!(!needs_conversion(&stream("mp4", false), OutputFormat::Video));
        assert!(!needs_conversion(&stream("MP3", true), OutputFormat::Audio));
        assert!(needs_conversion(&stream("webm", false), OutputFormat::Video));
        assert!(needs_conversion(&stream("m4a", true), OutputFormat::Audio));
        // An mp3-named stream that still carries video.
        assert!(needs_conversion(&stream("mp3", false), OutputFormat::Audio));
    }

    #[test]
    fn conversion_args_follow_quality() {
        let mut settings = Settings::default();
        settings.default_audio_quality = AudioQuality::Medium;
        let audio = conversion_args(OutputFormat::Audio, &settings);
        assert_eq!(audio.last().map(String::as_str), Some("160k"));

        settings.default_video_quality = VideoQuality::Best;
        let video = conversion_args(OutputFormat::Video, &settings);
        assert!(!video.iter().any(|a| a == "-vf"));

        settings.default_video_quality = VideoQuality::P480;
        let video = conversion_args(OutputFormat::Video, &settings);
        assert!(video.iter().any(|a| a.contains("min(480,ih)")));
    }

    #[test]
    fn unwritable_save_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();
        assert!(matches!(
            prepare_save_path(&file.join("sub")),
            Err(Error::SavePathNotWritable(_))
        ));
        assert!(prepare_save_path(&dir.path().join("new")).is_ok());
    }
}
