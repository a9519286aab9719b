//! The serialized cache queue.
//!
//! Every operation on a cache becomes a [`Task`] on one FIFO channel drained
//! by one dedicated thread. The thread owns the running size, so size
//! bookkeeping and filesystem changes under the root never race.

use crate::dispatch::Dispatch;
use crate::error::{DiskCacheError, Result};
use crate::eviction::enforce_capacity;
use crate::fs_ops::{self, clear_dir, file_size, list_files, sort_oldest_first, write_atomic};
use crate::path::path_for_key;
use crate::types::{CacheEntry, Counters};
use chrono::{DateTime, Utc};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Lazily evaluated entry payload.
pub(crate) type Producer = Box<dyn FnOnce() -> Option<Vec<u8>> + Send + 'static>;

pub(crate) type SuccessCallback = Box<dyn FnOnce(Vec<u8>) + Send + 'static>;
pub(crate) type FailureCallback = Box<dyn FnOnce(DiskCacheError) + Send + 'static>;

/// Where a fetch result goes.
pub(crate) enum FetchReply {
    Callbacks {
        on_failure: Option<FailureCallback>,
        on_success: SuccessCallback,
    },
    Channel(oneshot::Sender<Result<Vec<u8>>>),
}

pub(crate) enum Task {
    /// Seed the size from disk, then enforce capacity.
    Scan,
    Store {
        key: String,
        producer: Producer,
    },
    Fetch {
        key: String,
        reply: FetchReply,
    },
    Remove {
        key: String,
    },
    RemoveAll,
    TouchOrCreate {
        key: String,
        producer: Producer,
    },
    EnforceCapacity,
    Entries {
        reply: oneshot::Sender<Vec<CacheEntry>>,
    },
    /// Completes once every earlier task has run.
    Barrier {
        done: oneshot::Sender<()>,
    },
}

impl Task {
    fn name(&self) -> &'static str {
        match self {
            Task::Scan => "scan",
            Task::Store { .. } => "store",
            Task::Fetch { .. } => "fetch",
            Task::Remove { .. } => "remove",
            Task::RemoveAll => "remove_all",
            Task::TouchOrCreate { .. } => "touch_or_create",
            Task::EnforceCapacity => "enforce_capacity",
            Task::Entries { .. } => "entries",
            Task::Barrier { .. } => "barrier",
        }
    }
}

/// Start the worker thread for `root` and queue the initial scan.
pub(crate) fn spawn(
    root: PathBuf,
    counters: Arc<Counters>,
    dispatch: Arc<dyn Dispatch>,
) -> io::Result<mpsc::UnboundedSender<Task>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Task>();

    let name = format!(
        "disk-cache:{}",
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    );

    let mut worker = Worker {
        root,
        size: 0,
        entry_count: 0,
        counters,
        dispatch,
    };

    thread::Builder::new().name(name).spawn(move || {
        while let Some(task) = rx.blocking_recv() {
            worker.run(task);
        }
        debug!(dir = %worker.root.display(), "Disk cache worker stopped");
    })?;

    // The receiver is alive until the thread exits, which it cannot do
    // before this sender is dropped.
    let _ = tx.send(Task::Scan);
    Ok(tx)
}

struct Worker {
    root: PathBuf,
    /// Running total of entry bytes; only this thread touches it.
    size: u64,
    entry_count: usize,
    counters: Arc<Counters>,
    dispatch: Arc<dyn Dispatch>,
}

impl Worker {
    fn run(&mut self, task: Task) {
        debug!(task = task.name(), "Running cache task");

        match task {
            Task::Scan => {
                self.rescan();
                self.control_capacity();
            }
            Task::Store { key, producer } => self.store(&key, producer),
            Task::Fetch { key, reply } => self.fetch(&key, reply),
            Task::Remove { key } => self.remove(&key),
            Task::RemoveAll => self.remove_all(),
            Task::TouchOrCreate { key, producer } => self.touch_or_create(&key, producer),
            Task::EnforceCapacity => self.control_capacity(),
            Task::Entries { reply } => {
                let _ = reply.send(self.entries());
            }
            Task::Barrier { done } => {
                let _ = done.send(());
            }
        }

        self.counters.size.store(self.size, Ordering::Relaxed);
        self.counters
            .entries
            .store(self.entry_count, Ordering::Relaxed);
    }

    fn path(&self, key: &str) -> PathBuf {
        path_for_key(&self.root, key)
    }

    fn store(&mut self, key: &str, producer: Producer) {
        let path = self.path(key);

        let data = match panic::catch_unwind(AssertUnwindSafe(producer)) {
            Ok(Some(data)) => data,
            Ok(None) => {
                warn!(key = %key, "Failed to get data for key");
                return;
            }
            Err(_) => {
                error!(key = %key, "Value producer panicked");
                return;
            }
        };

        let previous = file_size(&path);

        if let Err(e) = write_atomic(&self.root, &path, &data) {
            error!(key = %key, path = %path.display(), error = %e, "Failed to write key");
            return;
        }

        self.size = self.size.saturating_sub(previous.unwrap_or(0)) + data.len() as u64;
        if previous.is_none() {
            self.entry_count += 1;
        }
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, size = data.len(), "Stored entry");

        self.control_capacity();
    }

    fn fetch(&mut self, key: &str, reply: FetchReply) {
        let path = self.path(key);

        match std::fs::read(&path) {
            Ok(data) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                self.deliver(reply, Ok(data));
                self.update_access_date(&path);
            }
            Err(e) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, error = %e, "Cache miss");
                self.deliver(reply, Err(DiskCacheError::from_io(&path, e)));
            }
        }
    }

    fn deliver(&self, reply: FetchReply, result: Result<Vec<u8>>) {
        match reply {
            FetchReply::Channel(tx) => {
                let _ = tx.send(result);
            }
            FetchReply::Callbacks {
                on_failure,
                on_success,
            } => match result {
                Ok(data) => self.dispatch.dispatch(Box::new(move || on_success(data))),
                Err(err) => {
                    if let Some(on_failure) = on_failure {
                        self.dispatch.dispatch(Box::new(move || on_failure(err)));
                    }
                }
            },
        }
    }

    fn remove(&mut self, key: &str) {
        let path = self.path(key);
        let previous = file_size(&path);

        match std::fs::remove_file(&path) {
            Ok(()) => {
                self.size = self.size.saturating_sub(previous.unwrap_or(0));
                self.entry_count = self.entry_count.saturating_sub(1);
                debug!(key = %key, "Removed entry");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to remove key");
            }
        }
    }

    fn remove_all(&mut self) {
        match clear_dir(&self.root) {
            Ok(failures) => {
                if failures > 0 {
                    warn!(dir = %self.root.display(), failures, "Some entries could not be removed");
                }
                self.rescan();
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.size = 0;
                self.entry_count = 0;
            }
            Err(e) => {
                error!(dir = %self.root.display(), error = %e, "Failed to list directory");
            }
        }
    }

    fn touch_or_create(&mut self, key: &str, producer: Producer) {
        let path = self.path(key);

        if self.update_access_date(&path) {
            return;
        }

        match path.try_exists() {
            Ok(false) => self.store(key, producer),
            Ok(true) => {
                debug!(key = %key, "Entry exists but access date could not be updated");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to check entry");
            }
        }
    }

    /// Set the entry's modification time to now; `false` if that failed.
    fn update_access_date(&self, path: &Path) -> bool {
        match fs_ops::touch(path) {
            Ok(()) => true,
            Err(e) => {
                if e.kind() == io::ErrorKind::NotFound {
                    debug!(path = %path.display(), "No file to update access date");
                } else {
                    warn!(path = %path.display(), error = %e, "Failed to update access date");
                }
                false
            }
        }
    }

    /// Recompute the running size from the directory contents.
    fn rescan(&mut self) {
        self.size = 0;
        self.entry_count = 0;

        match list_files(&self.root) {
            Ok(files) => {
                self.size = files.iter().map(|f| f.size).sum();
                self.entry_count = files.len();
                debug!(
                    dir = %self.root.display(),
                    files = files.len(),
                    size_bytes = self.size,
                    "Scanned cache directory"
                );
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(dir = %self.root.display(), "Cache directory does not exist yet");
            }
            Err(e) => {
                error!(dir = %self.root.display(), error = %e, "Failed to list directory");
            }
        }
    }

    fn control_capacity(&mut self) {
        let capacity = self.counters.capacity.load(Ordering::Relaxed);
        let outcome = enforce_capacity(&self.root, &mut self.size, capacity);
        if outcome.files_removed > 0 {
            self.entry_count = self.entry_count.saturating_sub(outcome.files_removed);
            self.counters
                .evictions
                .fetch_add(outcome.files_removed as u64, Ordering::Relaxed);
        }
    }

    fn entries(&self) -> Vec<CacheEntry> {
        let mut files = match list_files(&self.root) {
            Ok(files) => files,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    error!(dir = %self.root.display(), error = %e, "Failed to list directory");
                }
                return Vec::new();
            }
        };
        sort_oldest_first(&mut files);

        files
            .into_iter()
            .map(|f| CacheEntry {
                path: f.path,
                size: f.size,
                last_access: DateTime::<Utc>::from(f.modified),
            })
            .collect()
    }
}
