//! Error types for the disk cache

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum DiskCacheError {
    /// The value producer returned nothing for this key.
    NoData { key: String },
    NotFound { path: PathBuf },
    Io {
        path: PathBuf,
        source: Box<io::Error>,
    },
    /// The cache worker has stopped and can no longer answer.
    Closed,
    Config(String),
}

impl DiskCacheError {
    /// Wrap an io error, mapping `ErrorKind::NotFound` to [`DiskCacheError::NotFound`].
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            DiskCacheError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            DiskCacheError::Io {
                path: path.to_path_buf(),
                source: Box::new(err),
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DiskCacheError::NotFound { .. })
    }
}

impl fmt::Display for DiskCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskCacheError::NoData { key } => write!(f, "No data for key: {}", key),
            DiskCacheError::NotFound { path } => write!(f, "Not found: {}", path.display()),
            DiskCacheError::Io { path, source } if path.as_os_str().is_empty() => {
                write!(f, "IO error: {}", source)
            }
            DiskCacheError::Io { path, source } => {
                write!(f, "IO error at {}: {}", path.display(), source)
            }
            DiskCacheError::Closed => write!(f, "Cache worker closed"),
            DiskCacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for DiskCacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiskCacheError::Io { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for DiskCacheError {
    fn from(err: io::Error) -> Self {
        DiskCacheError::Io {
            path: PathBuf::new(),
            source: Box::new(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, DiskCacheError>;
