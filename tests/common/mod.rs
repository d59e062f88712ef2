//! Shared test harness for integration tests.
//!
//! Provides a [`CollectingSink`] that records every emitted event, fake
//! `ffmpeg`/`ffprobe` scripts (unix only) so the conversion pipeline runs end
//! to end without real tools, and a [`FakeDownloader`] whose transfers finish
//! only when a test releases them.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reelforge::{MediaDownloader, ProgressSender};
use reelforge_av::{ToolPaths, ToolRegistry};
use reelforge_core::events::{Event, ProgressSink};
use reelforge_core::{
    ConversionProgress, DownloadProgress, DownloadState, Error, QueueItem, Result, VideoMetadata,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A sink that keeps every event in memory.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(Event::name).collect()
    }

    pub fn download_progress(&self, item_id: &str) -> Vec<DownloadProgress> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::DownloadProgress(p) if p.item_id == item_id => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn conversion_progress(&self, job_id: &str) -> Vec<ConversionProgress> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::ConversionProgress(p) if p.job_id == job_id => Some(p.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Poll `cond` every 10 ms until it holds, panicking after 5 s.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Fake tools
// ---------------------------------------------------------------------------

/// Ten seconds of h264/aac, as the fake prober reports it.
pub const FAKE_PROBE_JSON: &str = r#"{
  "format": {"duration": "10.000000", "format_name": "mov,mp4,m4a", "size": "4096", "bit_rate": "3276"},
  "streams": [
    {"codec_type": "video", "codec_name": "h264", "width": 640, "height": 360, "avg_frame_rate": "30/1"},
    {"codec_type": "audio", "codec_name": "aac", "channels": 2, "sample_rate": "44100"}
  ]
}"#;

/// How the fake transcoder behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeTranscoder {
    /// Report 25%, 50%, 100% and write the output.
    Succeed,
    /// Write a partial output, complain on stderr and exit 1.
    Fail,
    /// Write a partial output, report 20% and then hang.
    Hang,
}

impl FakeTranscoder {
    fn script(self) -> String {
        let body = match self {
            FakeTranscoder::Succeed => {
                r#"echo "out_time_us=2500000"
echo "speed=2.0x"
echo "progress=continue"
echo "out_time_us=5000000"
echo "speed=2.0x"
echo "progress=continue"
echo "out_time_us=10000000"
echo "speed=2.0x"
echo "progress=end"
printf 'converted' > "$out"
"#
            }
            FakeTranscoder::Fail => {
                r#"printf 'partial' > "$out"
echo "Unknown encoder 'nope'" >&2
echo "boom" >&2
exit 1
"#
            }
            FakeTranscoder::Hang => {
                r#"printf 'partial' > "$out"
echo "out_time_us=2000000"
echo "progress=continue"
exec sleep 30
"#
            }
        };
        format!("#!/bin/sh\nfor out; do :; done\n{body}")
    }
}

/// Fake tool binaries living in a temp directory.
pub struct FakeTools {
    pub dir: tempfile::TempDir,
    pub registry: Arc<ToolRegistry>,
}

impl FakeTools {
    #[cfg(unix)]
    pub fn new(transcoder: FakeTranscoder) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let ffmpeg = write_script(dir.path(), "ffmpeg", &transcoder.script());
        let ffprobe = write_script(
            dir.path(),
            "ffprobe",
            &format!("#!/bin/sh\ncat <<'JSON'\n{FAKE_PROBE_JSON}\nJSON\n"),
        );
        let registry = ToolRegistry::from_paths(&ToolPaths {
            transcoder: Some(ffmpeg),
            prober: Some(ffprobe),
        });
        Self {
            dir,
            registry: Arc::new(registry),
        }
    }
}

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, content: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, content).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    path
}

/// A registry with no tools at all.
pub fn no_tools() -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::default())
}

/// Files directly inside `dir`.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Fake downloader
// ---------------------------------------------------------------------------

/// A [`MediaDownloader`] whose transfers block until released.
///
/// Accepts any `https://` URL. `download` reports `Downloading` at 50% and
/// then waits for [`release`](Self::release) (success),
/// [`fail`](Self::fail) or cancellation.
#[derive(Default)]
pub struct FakeDownloader {
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    failing: Mutex<HashSet<String>>,
    started: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn gate(&self, url: &str) -> Arc<Notify> {
        self.gates
            .lock()
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Let the transfer for `url` complete successfully.
    pub fn release(&self, url: &str) {
        self.failing.lock().remove(url);
        self.gate(url).notify_one();
    }

    /// Make the transfer for `url` fail once released.
    pub fn fail(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
        self.gate(url).notify_one();
    }

    /// URLs whose transfer has begun, in order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl MediaDownloader for FakeDownloader {
    fn validate_url(&self, url: &str) -> Result<()> {
        if url.starts_with("https://") {
            Ok(())
        } else {
            Err(Error::InvalidUrl(url.to_string()))
        }
    }

    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        Ok(VideoMetadata {
            id: url.to_string(),
            title: url.rsplit('/').next().unwrap_or("clip").to_string(),
            ..VideoMetadata::default()
        })
    }

    async fn download(
        &self,
        item: &QueueItem,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> Result<PathBuf> {
        self.started.lock().push(item.url.clone());
        progress.send(
            DownloadProgress::state(item.id.clone(), DownloadState::Downloading).with_percent(50.0),
        );

        let gate = self.gate(&item.url);
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = gate.notified() => {}
        }

        if self.failing.lock().contains(&item.url) {
            return Err(Error::DownloadFailed(format!("{} went away", item.url)));
        }
        Ok(item.save_path.join(format!("{}.{}", item.id, item.format.extension())))
    }
}
