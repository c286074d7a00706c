//! Shared helpers for the integration tests.
//!
//! - [`TestServer`] - wire server on an ephemeral loopback port
//! - [`check_contract`] - behaviour every backend must show

#![allow(dead_code)]

use axum::Router;
use coldstore::server::{AppState, router, serve};
use coldstore::{ColdStorage, ErrorKind, Registry};
use futures::TryStreamExt;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// A wire server running on `127.0.0.1:<ephemeral>` until dropped.
pub struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start(registry: Registry) -> Self {
        Self::start_router(router(AppState::new(registry))).await
    }

    /// Serves an arbitrary router, e.g. a stub standing in for a server.
    pub async fn start_router(app: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("No local address");
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            serve(listener, app, shutdown)
                .await
                .expect("Test server failed");
        });

        Self {
            addr,
            shutdown: Some(tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn all_ids(store: &dyn ColdStorage) -> HashSet<String> {
    store
        .ids()
        .try_collect::<Vec<_>>()
        .await
        .expect("Failed to enumerate keys")
        .into_iter()
        .collect()
}

/// Runs the common contract against a backend. The namespace is flushed
/// first and left empty.
pub async fn check_contract(store: &dyn ColdStorage) {
    store.flush().await.expect("flush");
    assert!(all_ids(store).await.is_empty());

    // single keys
    assert_eq!(store.get("abc123").await.unwrap(), None);
    let value: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    store.set("abc123", value.clone()).await.unwrap();
    assert_eq!(store.get("abc123").await.unwrap(), Some(value.clone()));
    store.set("abc123", b"v2".to_vec()).await.unwrap();
    assert_eq!(store.get("abc123").await.unwrap(), Some(b"v2".to_vec()));

    // batches
    let items: HashMap<String, Vec<u8>> = (0..120)
        .map(|i| (format!("key_{i:03}"), format!("value {i}").into_bytes()))
        .collect();
    store.set_many(items.clone()).await.unwrap();

    let wanted = vec![
        "key_000".to_string(),
        "key_119".to_string(),
        "missing".to_string(),
    ];
    let found = store.get_many(&wanted).await.unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found["key_000"], b"value 0");
    assert_eq!(found["key_119"], b"value 119");

    let mut expected: HashSet<String> = items.keys().cloned().collect();
    expected.insert("abc123".to_string());
    assert_eq!(all_ids(store).await, expected);

    // deletes, including absent keys
    store.delete("abc123").await.unwrap();
    store.delete("abc123").await.unwrap();
    assert_eq!(store.get("abc123").await.unwrap(), None);
    store
        .delete_many(&["key_000".to_string(), "never".to_string()])
        .await
        .unwrap();
    assert_eq!(all_ids(store).await.len(), 119);

    // validation happens before any I/O
    let err = store.get("foo$").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidKey);
    let mut bad = HashMap::new();
    bad.insert("fine".to_string(), b"x".to_vec());
    bad.insert("not fine".to_string(), b"y".to_vec());
    let err = store.set_many(bad).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidKey);
    assert_eq!(store.get("fine").await.unwrap(), None);

    store.flush().await.expect("flush");
    assert!(all_ids(store).await.is_empty());
}
