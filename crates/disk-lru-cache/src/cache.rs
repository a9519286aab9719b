//! The public disk cache handle

use crate::config::DiskCacheConfig;
use crate::dispatch::{default_dispatch, Dispatch};
use crate::error::{DiskCacheError, Result};
use crate::path::path_for_key;
use crate::types::{CacheEntry, CacheStats, Counters};
use crate::worker::{self, FetchReply, Task};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

/// A size-bounded cache of byte blobs stored one file per key.
///
/// All operations are queued to a worker thread owned by the cache and
/// return immediately. Clones share the same queue; the worker exits after
/// the last clone is dropped and the queue has drained.
#[derive(Clone)]
pub struct DiskCache {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    counters: Arc<Counters>,
    tasks: mpsc::UnboundedSender<Task>,
}

impl DiskCache {
    /// Create a cache rooted at `root` holding at most `capacity` bytes.
    ///
    /// The directory is scanned in the background to seed the size, and
    /// over-capacity entries are evicted right after.
    pub fn new(root: impl Into<PathBuf>, capacity: u64) -> Result<Self> {
        Self::from_config(DiskCacheConfig::new(root, capacity))
    }

    pub fn from_config(config: DiskCacheConfig) -> Result<Self> {
        let dispatch = default_dispatch("disk-cache-delivery")?;
        Self::with_dispatch(config, dispatch)
    }

    /// Create a cache whose fetch callbacks run on `dispatch`.
    pub fn with_dispatch(config: DiskCacheConfig, dispatch: Arc<dyn Dispatch>) -> Result<Self> {
        if config.cache_dir.as_os_str().is_empty() {
            return Err(DiskCacheError::Config("cache_dir is empty".to_string()));
        }

        let counters = Arc::new(Counters::new(config.capacity));
        let tasks = worker::spawn(config.cache_dir.clone(), counters.clone(), dispatch)?;

        info!(
            cache_dir = %config.cache_dir.display(),
            capacity_bytes = config.capacity,
            "Disk cache initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                root: config.cache_dir,
                counters,
                tasks,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// File that holds (or would hold) the entry for `key`.
    pub fn path_for_key(&self, key: &str) -> PathBuf {
        path_for_key(&self.inner.root, key)
    }

    /// Store the bytes returned by `producer` under `key`.
    ///
    /// The producer runs on the cache worker. If it returns `None` nothing
    /// is written.
    pub fn store<F>(&self, key: &str, producer: F)
    where
        F: FnOnce() -> Option<Vec<u8>> + Send + 'static,
    {
        self.submit(Task::Store {
            key: key.to_string(),
            producer: Box::new(producer),
        });
    }

    pub fn store_bytes(&self, key: &str, data: Vec<u8>) {
        self.store(key, move || Some(data));
    }

    /// Read the entry for `key`.
    ///
    /// Exactly one of the callbacks runs, on the cache's dispatcher. A miss
    /// with no `on_failure` is silent. A hit refreshes the entry's access
    /// time after the data has been handed off.
    pub fn fetch<E, S>(&self, key: &str, on_failure: Option<E>, on_success: S)
    where
        E: FnOnce(DiskCacheError) + Send + 'static,
        S: FnOnce(Vec<u8>) + Send + 'static,
    {
        let on_failure =
            on_failure.map(|f| Box::new(f) as Box<dyn FnOnce(DiskCacheError) + Send + 'static>);
        self.submit(Task::Fetch {
            key: key.to_string(),
            reply: FetchReply::Callbacks {
                on_failure,
                on_success: Box::new(on_success),
            },
        });
    }

    /// Read the entry for `key`, waiting for the result.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.send(Task::Fetch {
            key: key.to_string(),
            reply: FetchReply::Channel(tx),
        })?;
        rx.await.map_err(|_| DiskCacheError::Closed)?
    }

    pub fn remove(&self, key: &str) {
        self.submit(Task::Remove {
            key: key.to_string(),
        });
    }

    /// Delete every entry, then recompute the size from disk.
    pub fn remove_all(&self) {
        self.submit(Task::RemoveAll);
    }

    /// Refresh the access time of `key`, storing `producer`'s bytes if the
    /// entry does not exist.
    pub fn touch_or_create<F>(&self, key: &str, producer: F)
    where
        F: FnOnce() -> Option<Vec<u8>> + Send + 'static,
    {
        self.submit(Task::TouchOrCreate {
            key: key.to_string(),
            producer: Box::new(producer),
        });
    }

    pub fn capacity(&self) -> u64 {
        self.inner.counters.capacity.load(Ordering::Relaxed)
    }

    /// Change the byte budget and queue an eviction pass against it.
    pub fn set_capacity(&self, capacity: u64) {
        self.inner
            .counters
            .capacity
            .store(capacity, Ordering::Relaxed);
        self.submit(Task::EnforceCapacity);
    }

    /// Bytes used as of the last completed task.
    pub fn size(&self) -> u64 {
        self.inner.counters.size.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot()
    }

    /// Entries currently on disk, least recently accessed first.
    pub async fn entries(&self) -> Result<Vec<CacheEntry>> {
        let (tx, rx) = oneshot::channel();
        self.send(Task::Entries { reply: tx })?;
        rx.await.map_err(|_| DiskCacheError::Closed)
    }

    /// Wait until every operation submitted before this call has run.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Task::Barrier { done: tx })?;
        rx.await.map_err(|_| DiskCacheError::Closed)
    }

    fn send(&self, task: Task) -> Result<()> {
        self.inner
            .tasks
            .send(task)
            .map_err(|_| DiskCacheError::Closed)
    }

    fn submit(&self, task: Task) {
        if let Err(e) = self.send(task) {
            error!(dir = %self.inner.root.display(), error = %e, "Dropping cache task");
        }
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("root", &self.inner.root)
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish()
    }
}
