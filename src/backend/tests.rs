//! Contract tests for the backends that need no external service.

use super::*;
use crate::error::{Error, ErrorKind};
use futures::TryStreamExt;
use std::collections::HashSet;
use tempfile::TempDir;

fn file_store() -> (TempDir, FileStore) {
    let tmp = TempDir::new().unwrap();
    let store = FileStore::new(tmp.path().join("cold"));
    (tmp, store)
}

fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

async fn all_ids(store: &dyn ColdStorage) -> Vec<String> {
    store.ids().try_collect().await.unwrap()
}

#[tokio::test]
async fn test_file_store_scenario() {
    let (_tmp, store) = file_store();

    let big = payload(4096, 7);
    store.set("abc123", big.clone()).await.unwrap();
    assert_eq!(store.get("abc123").await.unwrap(), Some(big.clone()));

    let mut batch = HashMap::new();
    batch.insert("xyz".to_string(), b"second".to_vec());
    batch.insert("k".to_string(), b"third".to_vec());
    store.set_many(batch).await.unwrap();

    let ids: HashSet<String> = all_ids(&store).await.into_iter().collect();
    assert_eq!(
        ids,
        HashSet::from(["abc123".to_string(), "xyz".to_string(), "k".to_string()])
    );

    store.delete("xyz").await.unwrap();
    let keys = vec!["abc123".to_string(), "xyz".to_string(), "k".to_string()];
    let found = store.get_many(&keys).await.unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found["abc123"], big);
    assert_eq!(found["k"], b"third");

    let err = store.get("foo$").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidKey);
}

#[tokio::test]
async fn test_get_missing_is_absent() {
    let (_tmp, store) = file_store();
    assert_eq!(store.get("never_set").await.unwrap(), None);
    assert!(store.get_many(&["a".to_string()]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_missing_is_noop() {
    let (_tmp, store) = file_store();
    store.delete("ghost").await.unwrap();
    store
        .delete_many(&["ghost".to_string(), "ghost2".to_string()])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_overwrite() {
    let (_tmp, store) = file_store();
    store.set("key1", b"old".to_vec()).await.unwrap();
    store.set("key1", b"new".to_vec()).await.unwrap();
    assert_eq!(store.get("key1").await.unwrap(), Some(b"new".to_vec()));
    assert_eq!(all_ids(&store).await, vec!["key1".to_string()]);
}

#[tokio::test]
async fn test_keys_are_case_sensitive() {
    let (_tmp, store) = file_store();
    store.set("Key", b"upper".to_vec()).await.unwrap();
    store.set("key", b"lower".to_vec()).await.unwrap();
    assert_eq!(store.get("Key").await.unwrap(), Some(b"upper".to_vec()));
    assert_eq!(store.get("key").await.unwrap(), Some(b"lower".to_vec()));
}

#[tokio::test]
async fn test_invalid_keys_do_no_io() {
    let (_tmp, store) = file_store();
    for key in ["", "a/b", "foo$", "../../etc/passwd"] {
        assert_eq!(store.get(key).await.unwrap_err().kind(), ErrorKind::InvalidKey);
        assert_eq!(
            store.set(key, b"x".to_vec()).await.unwrap_err().kind(),
            ErrorKind::InvalidKey
        );
        assert_eq!(store.delete(key).await.unwrap_err().kind(), ErrorKind::InvalidKey);
    }
    // root is created lazily, so nothing touched the disk
    assert!(!store.root().exists());
}

#[tokio::test]
async fn test_batch_with_bad_key_does_nothing() {
    let (_tmp, store) = file_store();
    let mut batch = HashMap::new();
    batch.insert("good".to_string(), b"1".to_vec());
    batch.insert("bad/key".to_string(), b"2".to_vec());

    let err = store.set_many(batch).await.unwrap_err();
    assert_eq!(err, Error::InvalidKey("bad/key".to_string()));
    assert_eq!(store.get("good").await.unwrap(), None);
}

#[tokio::test]
async fn test_dot_keys_stay_inside_root() {
    let (tmp, store) = file_store();
    store.set("..", b"dots".to_vec()).await.unwrap();
    store.set("....x", b"more".to_vec()).await.unwrap();

    assert_eq!(store.get("..").await.unwrap(), Some(b"dots".to_vec()));
    assert_eq!(store.get("....x").await.unwrap(), Some(b"more".to_vec()));

    // only the store root was created under the temp dir
    let siblings: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(siblings, vec![std::ffi::OsString::from("cold")]);

    let mut ids = all_ids(&store).await;
    ids.sort();
    assert_eq!(ids, vec!["..".to_string(), "....x".to_string()]);
}

#[tokio::test]
async fn test_ids_ignores_foreign_files() {
    let (_tmp, store) = file_store();
    store.set("abc123", b"v".to_vec()).await.unwrap();
    std::fs::write(store.root().join("ab").join("notes.txt"), b"x").unwrap();
    std::fs::write(store.root().join("bad$name.bin"), b"x").unwrap();

    assert_eq!(all_ids(&store).await, vec!["abc123".to_string()]);
}

#[tokio::test]
async fn test_ids_over_many_keys() {
    let (_tmp, store) = file_store();
    let items: HashMap<String, Vec<u8>> = (0..500)
        .map(|i| (format!("key-{i:04}"), payload(16, i as u8)))
        .collect();
    store.set_many(items.clone()).await.unwrap();

    let ids = all_ids(&store).await;
    assert_eq!(ids.len(), 500, "no duplicates expected");
    let ids: HashSet<String> = ids.into_iter().collect();
    let expected: HashSet<String> = items.keys().cloned().collect();
    assert_eq!(ids, expected);

    let fetched = store
        .get_many(&items.keys().cloned().collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(fetched, items);
}

#[tokio::test]
async fn test_ids_on_missing_root_is_empty() {
    let (_tmp, store) = file_store();
    assert!(all_ids(&store).await.is_empty());
}

#[tokio::test]
async fn test_dropping_ids_stream_early() {
    let (_tmp, store) = file_store();
    let items: HashMap<String, Vec<u8>> = (0..1000)
        .map(|i| (format!("k{i}"), b"v".to_vec()))
        .collect();
    store.set_many(items).await.unwrap();

    let mut ids = store.ids();
    let first = ids.try_next().await.unwrap();
    assert!(first.is_some());
    drop(ids);
}

#[tokio::test]
async fn test_flush_removes_everything() {
    let (_tmp, store) = file_store();
    let items: HashMap<String, Vec<u8>> = ["a", "ab", "abc", "abc123", "abcdefgh"]
        .into_iter()
        .map(|k| (k.to_string(), k.as_bytes().to_vec()))
        .collect();
    store.set_many(items).await.unwrap();

    store.flush().await.unwrap();

    assert!(all_ids(&store).await.is_empty());
    assert_eq!(store.get("a").await.unwrap(), None);
    assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);

    // flushing an empty or missing namespace is fine
    store.flush().await.unwrap();
    FileStore::new(store.root().join("missing")).flush().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_writers_same_shard() {
    let (_tmp, store) = file_store();
    let mut tasks = Vec::new();
    for i in 0..32 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store.set(&format!("abcdef{i}"), vec![i as u8; 64]).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(all_ids(&store).await.len(), 32);
}

#[tokio::test]
async fn test_read_error_kind_on_directory_in_place_of_file() {
    let (_tmp, store) = file_store();
    // a directory where the value file should be cannot be read as a file
    std::fs::create_dir_all(store.root().join("ab").join("abc.bin")).unwrap();

    let err = store.get("abc").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Read);
    assert!(err.kind().is_operational());
}
