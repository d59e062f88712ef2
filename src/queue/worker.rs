//! Worker task for one admitted queue item.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reelforge_core::events::Event;
use reelforge_core::{DownloadProgress, DownloadState, Error, QueueItem, Result};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use super::Inner;
use crate::downloader::ProgressSender;

/// Drive an admitted item to a terminal state, then hand the slot on.
pub(super) async fn run(
    inner: Arc<Inner>,
    id: String,
    permit: OwnedSemaphorePermit,
    cancel: CancellationToken,
) {
    let outcome = process(&inner, &id, &cancel).await;
    finish(&inner, &id, outcome, permit);
}

async fn process(inner: &Arc<Inner>, id: &str, cancel: &CancellationToken) -> Result<PathBuf> {
    let (url, state) = {
        let state = inner.state.lock();
        let item = state
            .find(id)
            .ok_or_else(|| Error::QueueItemNotFound(id.to_string()))?;
        (item.url.clone(), item.state)
    };

    if state == DownloadState::FetchingMetadata {
        let metadata = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            m = inner.downloader.fetch_metadata(&url) => m?,
        };
        tracing::debug!(item_id = %id, title = %metadata.title, "Fetched metadata");
        advance(inner, id, |item| {
            item.metadata = Some(metadata);
            item.transition(DownloadState::Ready);
        })?;
    }

    let item = advance(inner, id, |item| item.transition(DownloadState::Downloading))?;

    let sender = {
        let inner = Arc::clone(inner);
        ProgressSender::new(move |p| on_progress(&inner, p))
    };
    inner.downloader.download(&item, cancel, &sender).await
}

/// Apply `f` unless a cancel has been requested, and publish the new list.
fn advance(inner: &Inner, id: &str, f: impl FnOnce(&mut QueueItem)) -> Result<QueueItem> {
    let (item, items) = {
        let mut state = inner.state.lock();
        let item = state.require_mut(id)?;
        if item.state == DownloadState::CancelRequested {
            return Err(Error::Cancelled);
        }
        f(item);
        let item = item.clone();
        (item, state.items.clone())
    };
    inner.emit_items(items);
    Ok(item)
}

/// Fold a downloader report into the item and forward it.
fn on_progress(inner: &Inner, progress: DownloadProgress) {
    let items = {
        let mut state = inner.state.lock();
        let Some(item) = state.find_mut(&progress.item_id) else {
            return;
        };
        // Late reports never override a cancel request.
        if !item.state.is_active() || item.state == DownloadState::CancelRequested {
            return;
        }
        let phase_changed = progress.state != item.state
            && matches!(
                progress.state,
                DownloadState::Downloading | DownloadState::Converting
            );
        if phase_changed {
            item.transition(progress.state);
        }
        item.progress = item.progress.max(progress.percent);
        phase_changed.then(|| state.items.clone())
    };

    inner.sink.emit(Event::DownloadProgress(progress));
    if let Some(items) = items {
        inner.emit_items(items);
    }
}

fn finish(inner: &Arc<Inner>, id: &str, outcome: Result<PathBuf>, permit: OwnedSemaphorePermit) {
    let (report, items) = {
        let mut state = inner.state.lock();
        state.workers.remove(id);

        let report = state.find_mut(id).map(|item| {
            match outcome {
                // A cancel request wins over a result that arrived late.
                Ok(path) if item.state == DownloadState::CancelRequested => {
                    tracing::info!(
                        item_id = %id,
                        path = %path.display(),
                        "Download finished after cancel request; discarding output"
                    );
                    discard(&path);
                    item.transition(DownloadState::Cancelled);
                }
                Ok(path) => {
                    tracing::info!(item_id = %id, path = %path.display(), "Download completed");
                    item.complete(path);
                }
                Err(e) if e.is_cancelled() || item.state == DownloadState::CancelRequested => {
                    tracing::info!(item_id = %id, "Download cancelled");
                    item.transition(DownloadState::Cancelled);
                }
                Err(e) => {
                    tracing::error!(item_id = %id, error = %e, code = e.code(), "Download failed");
                    item.fail(e.to_string());
                }
            }
            let mut report =
                DownloadProgress::state(item.id.clone(), item.state).with_percent(item.progress);
            report.error = item.error.clone();
            report
        });

        if state.shrink_debt > 0 {
            state.shrink_debt -= 1;
            permit.forget();
        } else {
            drop(permit);
        }
        inner.refill(&mut state);
        (report, state.items.clone())
    };

    if let Some(report) = report {
        inner.sink.emit(Event::DownloadProgress(report));
    }
    inner.emit_items(items);
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to remove cancelled download: {e}")
        }
    }
}
