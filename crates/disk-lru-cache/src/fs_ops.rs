//! Blocking filesystem primitives used by the cache worker.

use filetime::FileTime;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::warn;

/// A regular file found directly inside the cache directory.
#[derive(Debug, Clone)]
pub struct ListedFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Size of the file at `path`, `None` if it cannot be stat'ed.
pub fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}

/// Write `data` to `path` so readers see either the old or the new contents.
///
/// The bytes go to a temp file in `root` which is then renamed over `path`.
pub fn write_atomic(root: &Path, path: &Path, data: &[u8]) -> io::Result<()> {
    fs::create_dir_all(root)?;

    let mut file = NamedTempFile::new_in(root)?;
    file.write_all(data)?;
    file.as_file().sync_data()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Set the modification time of `path` to now.
///
/// Only ownership of the file is needed, so read-only entries are refreshed too.
pub fn touch(path: &Path) -> io::Result<()> {
    filetime::set_file_mtime(path, FileTime::now())
}

/// List the regular files directly inside `root`.
///
/// Entries that vanish or cannot be stat'ed mid-scan are logged and skipped.
pub fn list_files(root: &Path) -> io::Result<Vec<ListedFile>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %root.display(), error = %e, "Failed to read directory entry");
                continue;
            }
        };
        let path = entry.path();

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read file size");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push(ListedFile {
            path,
            size: metadata.len(),
            modified,
        });
    }

    Ok(files)
}

/// Order files oldest access first; equal times fall back to the filename.
pub fn sort_oldest_first(files: &mut [ListedFile]) {
    files.sort_by(|a, b| {
        a.modified
            .cmp(&b.modified)
            .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
    });
}

/// Delete everything directly inside `root`, returning how many removals failed.
pub fn clear_dir(root: &Path) -> io::Result<usize> {
    clear_dir_with(root, remove_path)
}

fn remove_path(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn clear_dir_with<F>(root: &Path, mut remove: F) -> io::Result<usize>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut failures = 0;

    for entry in fs::read_dir(root)? {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!(dir = %root.display(), error = %e, "Failed to read directory entry");
                failures += 1;
                continue;
            }
        };

        if let Err(e) = remove(&path) {
            warn!(path = %path.display(), error = %e, "Failed to remove path");
            failures += 1;
        }
    }

    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn set_mtime(path: &Path, secs_after_epoch: u64) {
        filetime::set_file_mtime(path, FileTime::from_unix_time(secs_after_epoch as i64, 0))
            .unwrap();
    }

    #[test]
    fn test_write_atomic_creates_root_and_replaces() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested").join("cache");
        let path = root.join("entry");

        write_atomic(&root, &path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        write_atomic(&root, &path, b"second value").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second value");

        // No temp files left behind
        assert_eq!(fs::read_dir(&root).unwrap().count(), 1);
    }

    #[test]
    fn test_file_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sized");
        assert_eq!(file_size(&path), None);

        fs::write(&path, [0u8; 42]).unwrap();
        assert_eq!(file_size(&path), Some(42));
        assert_eq!(file_size(dir.path()), None);
    }

    #[test]
    fn test_touch_updates_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old");
        fs::write(&path, b"data").unwrap();
        set_mtime(&path, 1_000);

        touch(&path).unwrap();

        let modified = fs::metadata(&path).unwrap().modified().unwrap();
        assert!(modified > SystemTime::UNIX_EPOCH + Duration::from_secs(1_000));
        assert_eq!(fs::read(&path).unwrap(), b"data");
    }

    #[cfg(unix)]
    #[test]
    fn test_touch_read_only_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("read-only");
        fs::write(&path, b"data").unwrap();
        set_mtime(&path, 1_000);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).unwrap();

        touch(&path).unwrap();

        let modified = fs::metadata(&path).unwrap().modified().unwrap();
        assert!(modified > SystemTime::UNIX_EPOCH + Duration::from_secs(1_000));
    }

    #[test]
    fn test_touch_missing_file_fails() {
        let dir = tempdir().unwrap();
        let err = touch(&dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_list_files_skips_directories() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a"), [0u8; 10]).unwrap();
        fs::write(dir.path().join("b"), [0u8; 5]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let files = list_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files.iter().map(|f| f.size).sum::<u64>(), 15);
    }

    #[test]
    fn test_sort_oldest_first_with_name_tie_break() {
        let dir = tempdir().unwrap();
        for (name, mtime) in [("c", 300), ("b", 100), ("a", 100), ("d", 50)] {
            let path = dir.path().join(name);
            fs::write(&path, b"x").unwrap();
            set_mtime(&path, mtime);
        }

        let mut files = list_files(dir.path()).unwrap();
        sort_oldest_first(&mut files);

        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn test_clear_dir() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a"), b"1").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b"), b"2").unwrap();

        assert_eq!(clear_dir(dir.path()).unwrap(), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_clear_dir_counts_failures_and_continues() {
        let dir = tempdir().unwrap();
        for name in ["a", "stuck", "z"] {
            fs::write(dir.path().join(name), b"1").unwrap();
        }

        let failures = clear_dir_with(dir.path(), |path| {
            if path.file_name() == Some(std::ffi::OsStr::new("stuck")) {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "busy"))
            } else {
                remove_path(path)
            }
        })
        .unwrap();

        assert_eq!(failures, 1);
        assert!(dir.path().join("stuck").exists());
        assert!(!dir.path().join("a").exists());
        assert!(!dir.path().join("z").exists());
    }
}
