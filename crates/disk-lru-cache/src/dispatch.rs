//! Delivery of fetch results off the cache worker.
//!
//! The worker never runs caller callbacks itself and never runs them inline
//! in the caller's stack: it hands each one to a [`Dispatch`].

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::error;

/// A callback ready to run.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An execution context that runs callbacks for the cache.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, job: Job);
}

/// Runs callbacks as tasks on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioDispatch {
    handle: Handle,
}

impl TokioDispatch {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Dispatcher for the runtime the caller is running in, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Dispatch for TokioDispatch {
    fn dispatch(&self, job: Job) {
        self.handle.spawn(async move { job() });
    }
}

/// Runs callbacks one at a time on a dedicated delivery thread.
///
/// The thread exits once the dispatcher is dropped and the backlog is empty.
#[derive(Debug)]
pub struct ThreadDispatch {
    tx: mpsc::UnboundedSender<Job>,
}

impl ThreadDispatch {
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Cache callback panicked");
                    }
                }
            })?;

        Ok(Self { tx })
    }
}

impl Dispatch for ThreadDispatch {
    fn dispatch(&self, job: Job) {
        if self.tx.send(job).is_err() {
            error!("Delivery thread stopped, dropping cache callback");
        }
    }
}

/// The runtime's dispatcher when called inside tokio, a delivery thread otherwise.
pub fn default_dispatch(name: &str) -> io::Result<Arc<dyn Dispatch>> {
    match TokioDispatch::current() {
        Some(dispatch) => Ok(Arc::new(dispatch)),
        None => Ok(Arc::new(ThreadDispatch::spawn(name)?)),
    }
}
