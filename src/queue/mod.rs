//! Download queue with a bounded concurrency gate.
//!
//! The [`QueueManager`] owns every [`QueueItem`] and moves it through the
//! [`DownloadState`] machine:
//!
//! ```text
//! Queued -> FetchingMetadata -> Ready -> Downloading [-> Converting] -> Completed
//!              any active state -> CancelRequested -> Cancelled
//!              any active state -> Failed
//! ```
//!
//! At most `max_concurrent` items hold a gate permit (and therefore a worker)
//! at any time. When a worker finishes, the oldest `Queued` item is admitted
//! into the freed slot.

mod worker;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reelforge_core::config::clamp_concurrency;
use reelforge_core::events::{Event, ProgressSink};
use reelforge_core::{
    DownloadState, Error, OutputFormat, QueueItem, Result, VideoMetadata,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::downloader::ProgressSender;

/// What the queue needs from a downloader.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Check `url` against the source's URL grammar.
    fn validate_url(&self, url: &str) -> Result<()>;

    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata>;

    /// Transfer `item` and return the final file path.
    async fn download(
        &self,
        item: &QueueItem,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> Result<PathBuf>;
}

#[derive(Debug, Default)]
struct State {
    items: Vec<QueueItem>,
    /// Cancellation tokens of running workers, by item id.
    workers: HashMap<String, CancellationToken>,
    capacity: usize,
    /// Permits still to be retired after a shrink.
    shrink_debt: usize,
}

impl State {
    fn find(&self, id: &str) -> Option<&QueueItem> {
        self.items.iter().find(|i| i.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut QueueItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    fn require_mut(&mut self, id: &str) -> Result<&mut QueueItem> {
        self.find_mut(id)
            .ok_or_else(|| Error::QueueItemNotFound(id.to_string()))
    }

    /// Startable item ids, oldest first.
    fn startable_ids(&self) -> Vec<String> {
        let mut startable: Vec<&QueueItem> = self
            .items
            .iter()
            .filter(|i| i.state.is_startable() && !self.workers.contains_key(&i.id))
            .collect();
        startable.sort_by_key(|i| i.created_at);
        startable.into_iter().map(|i| i.id.clone()).collect()
    }
}

pub(crate) struct Inner {
    state: Mutex<State>,
    gate: Arc<Semaphore>,
    downloader: Arc<dyn MediaDownloader>,
    sink: Arc<dyn ProgressSink>,
}

impl Inner {
    fn emit_items(&self, items: Vec<QueueItem>) {
        self.sink.emit(Event::QueueUpdated(items));
    }

    /// Admit `id` if a permit is free. Must be called with the state lock held.
    fn admit(self: &Arc<Self>, state: &mut State, id: &str) -> bool {
        if state.workers.contains_key(id) {
            return false;
        }
        let Some(item) = state.find_mut(id) else {
            return false;
        };
        if !item.state.is_startable() {
            return false;
        }
        let Ok(permit) = Arc::clone(&self.gate).try_acquire_owned() else {
            return false;
        };

        // Items that already carry metadata skip the fetch.
        let next = if item.state == DownloadState::Ready && item.metadata.is_some() {
            DownloadState::Downloading
        } else {
            DownloadState::FetchingMetadata
        };
        item.error = None;
        item.transition(next);

        let cancel = CancellationToken::new();
        state.workers.insert(id.to_string(), cancel.clone());
        tracing::info!(item_id = %id, state = ?next, "Admitted download");

        tokio::spawn(worker::run(Arc::clone(self), id.to_string(), permit, cancel));
        true
    }

    /// Admit startable items, oldest first, until the gate is full.
    fn refill(self: &Arc<Self>, state: &mut State) -> usize {
        let mut admitted = 0;
        for id in state.startable_ids() {
            if !self.admit(state, &id) {
                break;
            }
            admitted += 1;
        }
        admitted
    }
}

/// Owner of the download queue.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("QueueManager")
            .field("items", &state.items.len())
            .field("workers", &state.workers.len())
            .field("capacity", &state.capacity)
            .finish()
    }
}

impl QueueManager {
    /// `max_concurrent` is clamped to the supported range.
    pub fn new(
        downloader: Arc<dyn MediaDownloader>,
        sink: Arc<dyn ProgressSink>,
        max_concurrent: usize,
    ) -> Self {
        let capacity = clamp_concurrency(max_concurrent);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    capacity,
                    ..State::default()
                }),
                gate: Arc::new(Semaphore::new(capacity)),
                downloader,
                sink,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Adding and inspecting
    // -----------------------------------------------------------------------

    /// Append a new `Queued` item. Does not start work.
    pub fn add_item(
        &self,
        id: impl Into<String>,
        url: &str,
        format: OutputFormat,
        save_path: impl Into<PathBuf>,
    ) -> Result<QueueItem> {
        let id = id.into();
        let url = url.trim();
        self.inner.downloader.validate_url(url)?;

        let (item, items) = {
            let mut state = self.inner.state.lock();
            if state.find(&id).is_some() {
                return Err(Error::Validation(format!("queue item {id} already exists")));
            }
            let item = QueueItem::new(id, url, format, save_path);
            state.items.push(item.clone());
            (item, state.items.clone())
        };

        tracing::info!(item_id = %item.id, url = %item.url, format = %item.format, "Queued download");
        self.inner.emit_items(items);
        Ok(item)
    }

    /// [`add_item`](Self::add_item) with a generated id.
    pub fn add_url(
        &self,
        url: &str,
        format: OutputFormat,
        save_path: impl Into<PathBuf>,
    ) -> Result<QueueItem> {
        self.add_item(uuid::Uuid::new_v4().to_string(), url, format, save_path)
    }

    pub fn has_url(&self, url: &str) -> bool {
        let url = url.trim();
        self.inner.state.lock().items.iter().any(|i| i.url == url)
    }

    /// All items in insertion order.
    pub fn items(&self) -> Vec<QueueItem> {
        self.inner.state.lock().items.clone()
    }

    pub fn item(&self, id: &str) -> Option<QueueItem> {
        self.inner.state.lock().find(id).cloned()
    }

    /// Items currently in an active state.
    pub fn active_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .items
            .iter()
            .filter(|i| i.state.is_active())
            .count()
    }

    /// Whether no worker is running.
    pub fn is_idle(&self) -> bool {
        self.inner.state.lock().workers.is_empty()
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.state.lock().capacity
    }

    // -----------------------------------------------------------------------
    // Starting and resizing
    // -----------------------------------------------------------------------

    /// Dispatch `id` if a slot is free; otherwise it stays `Queued` until
    /// one frees up. Returns immediately.
    pub fn start_download(&self, id: &str) -> Result<()> {
        let items = {
            let mut state = self.inner.state.lock();
            let current = state
                .find(id)
                .map(|i| i.state)
                .ok_or_else(|| Error::QueueItemNotFound(id.to_string()))?;

            if current.is_active() {
                return Ok(());
            }
            if !current.is_startable() {
                return Err(Error::invalid_state(id, current));
            }
            if !self.inner.admit(&mut state, id) {
                tracing::debug!(item_id = %id, "Gate full; item stays queued");
                return Ok(());
            }
            state.items.clone()
        };
        self.inner.emit_items(items);
        Ok(())
    }

    /// Admit startable items in FIFO order by creation time until the gate
    /// is full. Returns how many were admitted.
    pub fn start_all(&self) -> usize {
        let (admitted, items) = {
            let mut state = self.inner.state.lock();
            let admitted = self.inner.refill(&mut state);
            (admitted, state.items.clone())
        };
        if admitted > 0 {
            tracing::info!(admitted, "Started queued downloads");
            self.inner.emit_items(items);
        }
        admitted
    }

    /// Resize the gate. Growing admits queued items into the new slots;
    /// shrinking retires permits as running workers finish.
    pub fn set_max_concurrent(&self, n: usize) -> usize {
        let n = clamp_concurrency(n);
        let items = {
            let mut state = self.inner.state.lock();
            let old = state.capacity;
            if n > old {
                let mut grow = n - old;
                let repaid = grow.min(state.shrink_debt);
                state.shrink_debt -= repaid;
                grow -= repaid;
                self.inner.gate.add_permits(grow);
            } else if n < old {
                let shrink = old - n;
                let forgotten = self.inner.gate.forget_permits(shrink);
                state.shrink_debt += shrink - forgotten;
            }
            state.capacity = n;
            tracing::info!(old, new = n, "Resized download gate");
            (self.inner.refill(&mut state) > 0).then(|| state.items.clone())
        };
        if let Some(items) = items {
            self.inner.emit_items(items);
        }
        n
    }

    // -----------------------------------------------------------------------
    // Cancel, retry, remove
    // -----------------------------------------------------------------------

    /// Request cancellation of a running item. A no-op for items without a
    /// worker.
    pub fn cancel_item(&self, id: &str) -> Result<()> {
        let items = {
            let mut state = self.inner.state.lock();
            let token = state.workers.get(id).cloned();
            let item = state.require_mut(id)?;
            let Some(token) = token else {
                return Ok(());
            };
            if item.state.is_active() && item.state != DownloadState::CancelRequested {
                item.transition(DownloadState::CancelRequested);
            }
            token.cancel();
            tracing::info!(item_id = %id, "Cancel requested");
            state.items.clone()
        };
        self.inner.emit_items(items);
        Ok(())
    }

    /// Cancel every running item. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let (count, items) = {
            let mut state = self.inner.state.lock();
            let tokens: Vec<(String, CancellationToken)> = state
                .workers
                .iter()
                .map(|(id, t)| (id.clone(), t.clone()))
                .collect();
            for (id, token) in &tokens {
                if let Some(item) = state.find_mut(id) {
                    if item.state.is_active() && item.state != DownloadState::CancelRequested {
                        item.transition(DownloadState::CancelRequested);
                    }
                }
                token.cancel();
            }
            (tokens.len(), state.items.clone())
        };
        if count > 0 {
            tracing::info!(count, "Cancelled all downloads");
            self.inner.emit_items(items);
        }
        count
    }

    /// Return a `Failed` or `Cancelled` item to `Queued`.
    pub fn retry_item(&self, id: &str) -> Result<()> {
        let items = {
            let mut state = self.inner.state.lock();
            let item = state.require_mut(id)?;
            if !item.state.is_retryable() {
                return Err(Error::invalid_state(id, item.state));
            }
            item.reset();
            state.items.clone()
        };
        tracing::info!(item_id = %id, "Retrying download");
        self.inner.emit_items(items);
        Ok(())
    }

    /// Remove an item. Refused while a worker is running for it.
    pub fn remove_item(&self, id: &str) -> Result<()> {
        let items = {
            let mut state = self.inner.state.lock();
            let current = state.require_mut(id)?.state;
            if current.is_active() || state.workers.contains_key(id) {
                return Err(Error::invalid_state(id, current));
            }
            state.items.retain(|i| i.id != id);
            state.items.clone()
        };
        self.inner.emit_items(items);
        Ok(())
    }

    /// Remove every `Completed` item. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let (removed, items) = {
            let mut state = self.inner.state.lock();
            let before = state.items.len();
            state.items.retain(|i| i.state != DownloadState::Completed);
            (before - state.items.len(), state.items.clone())
        };
        if removed > 0 {
            self.inner.emit_items(items);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use reelforge_core::events::NullSink;

    struct Rejecting;

    #[async_trait]
    impl MediaDownloader for Rejecting {
        fn validate_url(&self, url: &str) -> Result<()> {
            if url.starts_with("https://") {
                Ok(())
            } else {
                Err(Error::InvalidUrl(url.to_string()))
            }
        }

        async fn fetch_metadata(&self, _url: &str) -> Result<VideoMetadata> {
            Err(Error::VideoUnavailable("offline".into()))
        }

        async fn download(
            &self,
            _item: &QueueItem,
            _cancel: &CancellationToken,
            _progress: &ProgressSender,
        ) -> Result<PathBuf> {
            Err(Error::DownloadFailed("offline".into()))
        }
    }

    fn manager() -> QueueManager {
        QueueManager::new(Arc::new(Rejecting), Arc::new(NullSink), 2)
    }

    fn seed(q: &QueueManager, id: &str, state: DownloadState) {
        q.add_item(id, &format!("https://h/{id}.mp4"), OutputFormat::Video, "/tmp")
            .unwrap();
        let mut s = q.inner.state.lock();
        s.find_mut(id).unwrap().state = state;
    }

    #[test]
    fn add_validates_and_rejects_duplicates() {
        let q = manager();
        assert_matches!(
            q.add_item("x", "ftp://nope", OutputFormat::Audio, "/tmp"),
            Err(Error::InvalidUrl(_))
        );
        assert!(q.items().is_empty());

        let item = q.add_item("a", " https://h/a.mp4 ", OutputFormat::Audio, "/tmp").unwrap();
        assert_eq!(item.state, DownloadState::Queued);
        assert_eq!(item.url, "https://h/a.mp4");
        assert!(q.has_url("https://h/a.mp4"));
        assert!(!q.has_url("https://h/b.mp4"));

        assert_matches!(
            q.add_item("a", "https://h/other.mp4", OutputFormat::Audio, "/tmp"),
            Err(Error::Validation(_))
        );
    }

    #[test]
    fn add_url_generates_unique_ids() {
        let q = manager();
        let a = q.add_url("https://h/a.mp4", OutputFormat::Video, "/tmp").unwrap();
        let b = q.add_url("https://h/a.mp4", OutputFormat::Video, "/tmp").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(q.items().len(), 2);
    }

    #[test]
    fn unknown_ids() {
        let q = manager();
        assert_matches!(q.start_download("nope"), Err(Error::QueueItemNotFound(_)));
        assert_matches!(q.cancel_item("nope"), Err(Error::QueueItemNotFound(_)));
        assert_matches!(q.retry_item("nope"), Err(Error::QueueItemNotFound(_)));
        assert_matches!(q.remove_item("nope"), Err(Error::QueueItemNotFound(_)));
    }

    #[test]
    fn retry_only_from_failed_or_cancelled() {
        let q = manager();
        seed(&q, "f", DownloadState::Failed);
        seed(&q, "c", DownloadState::Cancelled);
        seed(&q, "d", DownloadState::Completed);
        seed(&q, "q", DownloadState::Queued);

        q.retry_item("f").unwrap();
        q.retry_item("c").unwrap();
        assert_eq!(q.item("f").unwrap().state, DownloadState::Queued);
        assert_eq!(q.item("c").unwrap().state, DownloadState::Queued);
        assert_matches!(q.retry_item("d"), Err(Error::InvalidState { .. }));
        assert_matches!(q.retry_item("q"), Err(Error::InvalidState { .. }));
    }

    #[test]
    fn remove_refused_for_active_items() {
        let q = manager();
        seed(&q, "active", DownloadState::Downloading);
        seed(&q, "done", DownloadState::Failed);

        assert_matches!(q.remove_item("active"), Err(Error::InvalidState { .. }));
        q.remove_item("done").unwrap();
        assert!(q.item("done").is_none());
        assert!(q.item("active").is_some());
    }

    #[test]
    fn clear_completed_keeps_failed_and_cancelled() {
        let q = manager();
        seed(&q, "a", DownloadState::Completed);
        seed(&q, "b", DownloadState::Failed);
        seed(&q, "c", DownloadState::Cancelled);
        seed(&q, "d", DownloadState::Completed);

        assert_eq!(q.clear_completed(), 2);
        let ids: Vec<String> = q.items().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, ["b", "c"]);
        assert_eq!(q.clear_completed(), 0);
    }

    #[test]
    fn cancel_without_worker_is_noop() {
        let q = manager();
        seed(&q, "a", DownloadState::Queued);
        q.cancel_item("a").unwrap();
        assert_eq!(q.item("a").unwrap().state, DownloadState::Queued);
        assert_eq!(q.cancel_all(), 0);
    }

    #[test]
    fn start_terminal_item_is_invalid() {
        let q = manager();
        seed(&q, "a", DownloadState::Completed);
        assert_matches!(q.start_download("a"), Err(Error::InvalidState { .. }));
    }

    #[test]
    fn concurrency_is_clamped() {
        let q = QueueManager::new(Arc::new(Rejecting), Arc::new(NullSink), 0);
        assert_eq!(q.max_concurrent(), 1);
        let q = QueueManager::new(Arc::new(Rejecting), Arc::new(NullSink), 99);
        assert_eq!(q.max_concurrent(), 5);
    }

    #[tokio::test]
    async fn shrinking_idle_gate_forgets_permits() {
        let q = manager();
        assert_eq!(q.set_max_concurrent(4), 4);
        assert_eq!(q.inner.gate.available_permits(), 4);
        assert_eq!(q.set_max_concurrent(1), 1);
        assert_eq!(q.inner.gate.available_permits(), 1);
        assert_eq!(q.inner.state.lock().shrink_debt, 0);
    }
}
