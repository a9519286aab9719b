//! Key to filename resolution
//!
//! Keys are percent-escaped into a single path component. Keys whose escaped
//! form would not be a usable filename (too long, empty, or a dot entry) are
//! replaced by the hex SHA-256 of the key, keeping a short extension if the
//! key has one.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Longest filename, in bytes, the cache will create (`NAME_MAX` on common filesystems).
pub const MAX_FILENAME_LEN: usize = 255;

/// Longest key extension carried over onto a hashed filename.
const MAX_EXTENSION_LEN: usize = 8;

/// Resolve the file that holds `key` inside `root`.
pub fn path_for_key(root: &Path, key: &str) -> PathBuf {
    root.join(filename_for_key(key))
}

/// Filename for `key`, without the root directory.
pub fn filename_for_key(key: &str) -> String {
    let escaped = escaped_filename(key);
    if is_usable_filename(&escaped) {
        escaped
    } else {
        hashed_filename(key)
    }
}

/// Percent-escape every byte outside `A-Z a-z 0-9 - _ . ~`.
pub fn escaped_filename(key: &str) -> String {
    urlencoding::encode(key).into_owned()
}

/// Hex SHA-256 of the key, plus the key's extension when it has a short one.
pub fn hashed_filename(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hex::encode(hasher.finalize());

    match key_extension(key) {
        Some(ext) => format!("{}.{}", digest, ext),
        None => digest,
    }
}

fn is_usable_filename(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && name.len() <= MAX_FILENAME_LEN
}

fn key_extension(key: &str) -> Option<&str> {
    let (stem, ext) = key.rsplit_once('.')?;
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext)
}
