//! Oldest-first eviction.
//!
//! The cache keeps no in-memory index: file modification times are the LRU
//! signal, so each pass lists the directory and removes the least recently
//! touched files until the running size is back under capacity.

use crate::fs_ops::{list_files, sort_oldest_first};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Result of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    pub files_removed: usize,
    pub bytes_freed: u64,
    pub failures: usize,
}

/// Remove files under `root`, oldest first, until `*current_size <= capacity`.
///
/// A file that cannot be removed is logged and skipped; its size stays in
/// `current_size`, so the pass keeps going and may remove more than the
/// on-disk total strictly requires.
pub fn enforce_capacity(root: &Path, current_size: &mut u64, capacity: u64) -> EvictionOutcome {
    enforce_capacity_with(root, current_size, capacity, |path| fs::remove_file(path))
}

fn enforce_capacity_with<F>(
    root: &Path,
    current_size: &mut u64,
    capacity: u64,
    mut remove: F,
) -> EvictionOutcome
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut outcome = EvictionOutcome::default();
    if *current_size <= capacity {
        return outcome;
    }

    let mut files = match list_files(root) {
        Ok(files) => files,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %root.display(), "Cache directory does not exist yet");
            return outcome;
        }
        Err(e) => {
            error!(dir = %root.display(), error = %e, "Failed to list directory for eviction");
            return outcome;
        }
    };
    sort_oldest_first(&mut files);

    debug!(
        size_bytes = *current_size,
        capacity_bytes = capacity,
        candidates = files.len(),
        "Cache over capacity, evicting"
    );

    for file in files {
        if *current_size <= capacity {
            break;
        }

        match remove(&file.path) {
            Ok(()) => {
                *current_size = current_size.saturating_sub(file.size);
                outcome.files_removed += 1;
                outcome.bytes_freed += file.size;
            }
            Err(e) => {
                outcome.failures += 1;
                warn!(path = %file.path.display(), error = %e, "Failed to remove file");
            }
        }
    }

    if outcome.files_removed > 0 || outcome.failures > 0 {
        info!(
            files_removed = outcome.files_removed,
            bytes_freed = outcome.bytes_freed,
            failures = outcome.failures,
            size_bytes = *current_size,
            capacity_bytes = capacity,
            "Disk cache eviction complete"
        );
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::ffi::OsStr;
    use tempfile::tempdir;

    fn write_with_mtime(root: &Path, name: &str, len: usize, secs: u64) {
        let path = root.join(name);
        fs::write(&path, vec![0u8; len]).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(secs as i64, 0)).unwrap();
    }

    #[test]
    fn test_under_capacity_is_noop() {
        let dir = tempdir().unwrap();
        write_with_mtime(dir.path(), "a", 10, 1);

        let mut size = 10;
        let outcome = enforce_capacity(dir.path(), &mut size, 10);

        assert_eq!(outcome, EvictionOutcome::default());
        assert_eq!(size, 10);
        assert!(dir.path().join("a").exists());
    }

    #[test]
    fn test_evicts_oldest_until_under_capacity() {
        let dir = tempdir().unwrap();
        write_with_mtime(dir.path(), "newest", 30, 300);
        write_with_mtime(dir.path(), "oldest", 30, 100);
        write_with_mtime(dir.path(), "middle", 30, 200);

        let mut size = 90;
        let outcome = enforce_capacity(dir.path(), &mut size, 60);

        assert_eq!(outcome.files_removed, 1);
        assert_eq!(outcome.bytes_freed, 30);
        assert_eq!(size, 60);
        assert!(!dir.path().join("oldest").exists());
        assert!(dir.path().join("middle").exists());
        assert!(dir.path().join("newest").exists());
    }

    #[test]
    fn test_stops_when_directory_exhausted() {
        let dir = tempdir().unwrap();
        write_with_mtime(dir.path(), "a", 10, 1);

        // Size counter over-reports what is on disk
        let mut size = 500;
        let outcome = enforce_capacity(dir.path(), &mut size, 100);

        assert_eq!(outcome.files_removed, 1);
        assert_eq!(size, 490);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_directory_is_logged_not_fatal() {
        let dir = tempdir().unwrap();
        let mut size = 50;
        let outcome = enforce_capacity(&dir.path().join("gone"), &mut size, 10);
        assert_eq!(outcome, EvictionOutcome::default());
        assert_eq!(size, 50);
    }

    #[test]
    fn test_zero_capacity_clears_everything() {
        let dir = tempdir().unwrap();
        write_with_mtime(dir.path(), "a", 5, 1);
        write_with_mtime(dir.path(), "b", 7, 2);

        let mut size = 12;
        let outcome = enforce_capacity(dir.path(), &mut size, 0);

        assert_eq!(outcome.files_removed, 2);
        assert_eq!(size, 0);
    }

    #[test]
    fn test_failed_removal_is_skipped_and_pass_continues() {
        let dir = tempdir().unwrap();
        write_with_mtime(dir.path(), "oldest", 30, 100);
        write_with_mtime(dir.path(), "middle", 30, 200);
        write_with_mtime(dir.path(), "newest", 30, 300);

        let mut size = 90;
        let outcome = enforce_capacity_with(dir.path(), &mut size, 60, |path| {
            if path.file_name() == Some(OsStr::new("oldest")) {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
            } else {
                fs::remove_file(path)
            }
        });

        assert_eq!(outcome.failures, 1);
        assert_eq!(outcome.files_removed, 1);
        assert_eq!(outcome.bytes_freed, 30);
        // The locked file still counts, so the next oldest pays for it
        assert_eq!(size, 60);
        assert!(dir.path().join("oldest").exists());
        assert!(!dir.path().join("middle").exists());
        assert!(dir.path().join("newest").exists());
    }
}
