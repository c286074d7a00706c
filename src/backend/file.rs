//! Filesystem-backed cold storage.
//!
//! Values live in a shard tree under the root directory. The first six
//! characters of the key pick up to three two-character directory levels,
//! a level being added only when the key is longer than its end offset:
//!
//! ```text
//! ab            -> <root>/ab.bin
//! abc           -> <root>/ab/abc.bin
//! abc123        -> <root>/ab/c1/abc123.bin
//! abc1234       -> <root>/ab/c1/23/abc1234.bin
//! ```

use super::{ColdStorage, KeyStream};
use crate::error::{Error, Result};
use crate::key::{validate_key, validate_keys};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Extension of value files.
const VALUE_EXT: &str = "bin";

/// Shard levels derived from the key prefix.
const SHARD_LEVELS: usize = 3;

/// Characters per shard level.
const SHARD_WIDTH: usize = 2;

/// Keys buffered between the directory walker and the stream consumer.
const IDS_CHANNEL_CAPACITY: usize = 256;

/// Filesystem-backed cold storage.
///
/// `FileStore` is `Clone`; clones share the same root.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: Arc<PathBuf>,
}

impl FileStore {
    /// Creates a store rooted at `root`. Nothing is created until the first
    /// write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the value file for an already validated key.
    fn value_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.to_path_buf();
        for level in 0..SHARD_LEVELS {
            let end = (level + 1) * SHARD_WIDTH;
            if key.len() <= end {
                break;
            }
            path.push(shard_segment(&key[level * SHARD_WIDTH..end]));
        }
        path.push(format!("{key}.{VALUE_EXT}"));
        path
    }

    fn get_sync(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.value_path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::read(format!("failed to read {key}: {e}"))),
        }
    }

    fn set_sync(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.value_path(key);
        if let Some(parent) = path.parent() {
            // create_dir_all treats an existing directory (ours or a racing
            // writer's) as success
            fs::create_dir_all(parent).map_err(|e| {
                Error::write(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        // Write then rename so readers never observe a torn value.
        let tmp = path.with_extension(format!("{VALUE_EXT}.{}.tmp", uuid::Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, value) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::write(format!("failed to write {key}: {e}")));
        }
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::write(format!("failed to write {key}: {e}"))
        })
    }

    fn delete_sync(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::delete(format!("failed to delete {key}: {e}"))),
        }
    }

    fn flush_sync(&self) -> Result<()> {
        let entries = match fs::read_dir(self.root.as_path()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(Error::delete(format!(
                    "failed to list {}: {e}",
                    self.root.display()
                )));
            },
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let removed = match entry.file_type() {
                Ok(ft) if ft.is_dir() => fs::remove_dir_all(&path),
                _ => fs::remove_file(&path),
            };
            if let Err(e) = removed {
                debug!(path = %path.display(), error = %e, "flush: failed to remove entry");
            }
        }
        Ok(())
    }
}

/// Escapes shard segments made only of dots so a key can never name `.`
/// or `..`. `%` is outside the key class, so escaped names cannot clash.
fn shard_segment(segment: &str) -> String {
    if segment.bytes().all(|b| b == b'.') {
        segment.replace('.', "%2E")
    } else {
        segment.to_string()
    }
}

/// Key stored in a value file name, if the name is one.
fn key_from_file_name(name: &OsStr) -> Option<String> {
    let name = name.to_str()?;
    let key = name.strip_suffix(VALUE_EXT)?.strip_suffix('.')?;
    validate_key(key).ok().map(str::to_string)
}

/// Walks the shard tree, sending each key found. Stops early when the
/// receiving stream is dropped.
fn walk_keys(root: &Path, tx: &mpsc::Sender<Result<String>>) {
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            // removed underneath us (flush, concurrent delete)
            Err(e) if e.kind() == IoErrorKind::NotFound => continue,
            Err(e) => {
                let _ = tx.blocking_send(Err(Error::read(format!(
                    "failed to list {}: {e}",
                    dir.display()
                ))));
                return;
            },
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "ids: skipping unreadable entry");
                    continue;
                },
            };
            if entry.file_type().is_ok_and(|ft| ft.is_dir()) {
                pending.push(entry.path());
                continue;
            }
            if let Some(key) = key_from_file_name(&entry.file_name())
                && tx.blocking_send(Ok(key)).is_err()
            {
                return;
            }
        }
    }
}

/// Runs blocking filesystem work off the async reactor.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        warn!(error = %e, "file store task failed");
        Error::operational(format!("task join error: {e}"))
    })?
}

#[async_trait]
impl ColdStorage for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let store = self.clone();
        let key = key.to_string();
        blocking(move || store.get_sync(&key)).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        validate_keys(keys.iter().map(String::as_str))?;
        let store = self.clone();
        let keys = keys.to_vec();
        blocking(move || {
            let mut found = HashMap::with_capacity(keys.len());
            for key in keys {
                if let Some(value) = store.get_sync(&key)? {
                    found.insert(key, value);
                }
            }
            Ok(found)
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        let store = self.clone();
        let key = key.to_string();
        blocking(move || store.set_sync(&key, &value)).await
    }

    async fn set_many(&self, items: HashMap<String, Vec<u8>>) -> Result<()> {
        validate_keys(items.keys().map(String::as_str))?;
        let store = self.clone();
        blocking(move || {
            for (key, value) in &items {
                store.set_sync(key, value)?;
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let store = self.clone();
        let key = key.to_string();
        blocking(move || store.delete_sync(&key)).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        validate_keys(keys.iter().map(String::as_str))?;
        let store = self.clone();
        let keys = keys.to_vec();
        blocking(move || {
            for key in &keys {
                store.delete_sync(key)?;
            }
            Ok(())
        })
        .await
    }

    fn ids(&self) -> KeyStream {
        let root = self.root.clone();
        stream::once(async move {
            let (tx, rx) = mpsc::channel(IDS_CHANNEL_CAPACITY);
            tokio::task::spawn_blocking(move || walk_keys(&root, &tx));
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|key| (key, rx)) })
        })
        .flatten()
        .boxed()
    }

    async fn flush(&self) -> Result<()> {
        let store = self.clone();
        blocking(move || store.flush_sync()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_layout() {
        let store = FileStore::new("/data");
        assert_eq!(store.value_path("a"), PathBuf::from("/data/a.bin"));
        assert_eq!(store.value_path("ab"), PathBuf::from("/data/ab.bin"));
        assert_eq!(store.value_path("abc"), PathBuf::from("/data/ab/abc.bin"));
        assert_eq!(store.value_path("abcd"), PathBuf::from("/data/ab/abcd.bin"));
        assert_eq!(
            store.value_path("abc123"),
            PathBuf::from("/data/ab/c1/abc123.bin")
        );
        assert_eq!(
            store.value_path("abc1234"),
            PathBuf::from("/data/ab/c1/23/abc1234.bin")
        );
        assert_eq!(
            store.value_path("abcdefghij"),
            PathBuf::from("/data/ab/cd/ef/abcdefghij.bin")
        );
    }

    #[test]
    fn test_dot_segments_are_escaped() {
        let store = FileStore::new("/data");
        assert_eq!(
            store.value_path("..abc"),
            PathBuf::from("/data/%2E%2E/ab/..abc.bin")
        );
        assert_eq!(
            store.value_path("ab...."),
            PathBuf::from("/data/ab/%2E%2E/ab.....bin")
        );
        // single dot in a segment is an ordinary name
        assert_eq!(store.value_path("a.b"), PathBuf::from("/data/a./a.b.bin"));
    }

    #[test]
    fn test_key_from_file_name() {
        assert_eq!(
            key_from_file_name(OsStr::new("abc123.bin")).as_deref(),
            Some("abc123")
        );
        assert_eq!(key_from_file_name(OsStr::new("a.b.bin")).as_deref(), Some("a.b"));
        assert_eq!(key_from_file_name(OsStr::new("abc.txt")), None);
        assert_eq!(key_from_file_name(OsStr::new(".bin")), None);
        assert_eq!(key_from_file_name(OsStr::new("abc.bin.1234.tmp")), None);
        assert_eq!(key_from_file_name(OsStr::new("ab$c.bin")), None);
    }
}
