//! Size-bounded on-disk blob cache
//!
//! Stores opaque byte blobs one file per key inside a directory, keeps a
//! running total of their size, and evicts the least recently accessed files
//! (by modification time) once a configured capacity is exceeded. All work
//! for one cache runs in order on a dedicated worker, so callers never block
//! and never need their own locking.

mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
mod eviction;
mod fs_ops;
pub mod path;
mod types;
mod worker;

pub use cache::DiskCache;
pub use config::DiskCacheConfig;
pub use dispatch::{Dispatch, ThreadDispatch, TokioDispatch};
pub use error::{DiskCacheError, Result};
pub use path::MAX_FILENAME_LEN;
pub use types::{CacheEntry, CacheStats};
