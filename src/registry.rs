//! Connector registry: symbolic names to live backend handles.
//!
//! A name is case-folded, its locator looked up in [`Settings`] (static
//! table first, then `<env_prefix>_<NAME>`), parsed, and turned into the
//! matching backend. Handles are cached for the registry's lifetime; there
//! is no eviction and no refresh.
//!
//! The registry is an ordinary value owned by whoever composes the service,
//! so tests can build an isolated one per case.

use crate::backend::{BackendHandle, FileStore, RemoteStore};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::locator::Locator;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves symbolic names to cached backend handles.
pub struct Registry {
    settings: Settings,
    handles: DashMap<String, BackendHandle>,
    client: reqwest::Client,
}

impl Registry {
    /// Creates a registry with a fresh HTTP client for remote backends.
    pub fn new(settings: Settings) -> Self {
        Self::with_client(settings, reqwest::Client::new())
    }

    /// Creates a registry whose remote backends share `client`.
    pub fn with_client(settings: Settings, client: reqwest::Client) -> Self {
        Self {
            settings,
            handles: DashMap::new(),
            client,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns the handle for `name`, constructing it on first use.
    ///
    /// Every call with the same (case-insensitive) name returns the same
    /// handle. Two callers racing on a new name may both construct a
    /// backend; only the first one inserted is ever published.
    ///
    /// # Errors
    ///
    /// `Configuration` for a missing locator, a missing or unsupported
    /// scheme, or a backend not compiled in. Backend construction errors
    /// (e.g. `Read` from MySQL capacity introspection) pass through.
    pub async fn resolve(&self, name: &str) -> Result<BackendHandle> {
        let name = normalize(name)?;
        if let Some(handle) = self.handles.get(&name) {
            return Ok(handle.clone());
        }

        let handle = self.connect(&name).await?;
        Ok(self.insert_first(name, handle))
    }

    /// Builds a new, uncached handle for `name`.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub async fn connect(&self, name: &str) -> Result<BackendHandle> {
        let name = normalize(name)?;
        let raw = self.settings.locator_for(&name).ok_or_else(|| {
            Error::configuration(format!(
                "{name} not configured (set {})",
                self.settings.env_var_for(&name)
            ))
        })?;
        let locator = Locator::parse(&name, &raw)?;
        debug!(name = %name, scheme = locator.scheme(), "connecting backend");

        let handle: BackendHandle = match locator {
            Locator::File(file) => Arc::new(FileStore::new(file.root)),
            Locator::Remote(remote) => Arc::new(RemoteStore::new(
                remote.base_url,
                self.client.clone(),
                &self.settings.remote,
            )),
            #[cfg(feature = "mysql")]
            Locator::Mysql(mysql) => Arc::new(crate::backend::MysqlStore::connect(mysql).await?),
            #[cfg(not(feature = "mysql"))]
            Locator::Mysql(_) => {
                return Err(Error::configuration(format!(
                    "mysql support not compiled in (locator for {name})"
                )));
            },
            #[cfg(feature = "dynamo")]
            Locator::Dynamo(dynamo) => {
                Arc::new(crate::backend::DynamoStore::connect(dynamo).await?)
            },
            #[cfg(not(feature = "dynamo"))]
            Locator::Dynamo(_) => {
                return Err(Error::configuration(format!(
                    "dynamo support not compiled in (locator for {name})"
                )));
            },
        };
        info!(name = %name, "backend connected");
        Ok(handle)
    }

    /// Publishes a prebuilt handle under `name` unless one already exists.
    ///
    /// Returns the handle that ended up registered.
    ///
    /// # Errors
    ///
    /// `Configuration` for an empty name.
    pub fn register(&self, name: &str, handle: BackendHandle) -> Result<BackendHandle> {
        Ok(self.insert_first(normalize(name)?, handle))
    }

    fn insert_first(&self, name: String, handle: BackendHandle) -> BackendHandle {
        let entry = self.handles.entry(name).or_insert(handle);
        Arc::clone(entry.value())
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

fn normalize(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(Error::configuration("empty backend name"));
    }
    Ok(name.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn file_registry(tmp: &TempDir) -> Registry {
        let settings = Settings::default()
            .with_locator("foo", format!("file://{}", tmp.path().join("foo").display()));
        Registry::new(settings)
    }

    #[tokio::test]
    async fn test_resolve_is_cached() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);

        let first = registry.resolve("foo").await.unwrap();
        let second = registry.resolve("foo").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_is_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);

        let lower = registry.resolve("foo").await.unwrap();
        let upper = registry.resolve("FOO").await.unwrap();
        let mixed = registry.resolve("Foo").await.unwrap();
        assert!(Arc::ptr_eq(&lower, &upper));
        assert!(Arc::ptr_eq(&lower, &mixed));
    }

    #[tokio::test]
    async fn test_connect_is_uncached() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);

        let a = registry.connect("foo").await.unwrap();
        let b = registry.connect("foo").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_resolved_handle_works() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);

        let store = registry.resolve("foo").await.unwrap();
        store.set("abc123", b"data".to_vec()).await.unwrap();
        let again = registry.resolve("FOO").await.unwrap();
        assert_eq!(again.get("abc123").await.unwrap(), Some(b"data".to_vec()));
    }

    #[tokio::test]
    async fn test_missing_locator() {
        let registry = Registry::new(Settings {
            env_prefix: "COLDSTORE_REGISTRY_TEST_UNSET".to_string(),
            ..Settings::default()
        });
        let err = registry.resolve("nothing").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.message().contains("NOTHING"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_bad_schemes() {
        let settings = Settings::default()
            .with_locator("noscheme", "just-a-path")
            .with_locator("redis", "redis://localhost:6379");
        let registry = Registry::new(settings);

        for name in ["noscheme", "redis"] {
            let err = registry.resolve(name).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Configuration, "{name}");
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_empty_name() {
        let registry = Registry::new(Settings::default());
        let err = registry.resolve("").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_register_first_writer_wins() {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::new(Settings::default());

        let first: BackendHandle = Arc::new(FileStore::new(tmp.path().join("a")));
        let second: BackendHandle = Arc::new(FileStore::new(tmp.path().join("b")));

        let kept = registry.register("custom", first.clone()).unwrap();
        assert!(Arc::ptr_eq(&kept, &first));
        let kept = registry.register("CUSTOM", second).unwrap();
        assert!(Arc::ptr_eq(&kept, &first));

        // registered handles resolve without any locator configured
        let resolved = registry.resolve("Custom").await.unwrap();
        assert!(Arc::ptr_eq(&resolved, &first));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolve_publishes_one_handle() {
        let tmp = TempDir::new().unwrap();
        let registry = Arc::new(file_registry(&tmp));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move { registry.resolve("foo").await }));
        }
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        for handle in &handles[1..] {
            assert!(Arc::ptr_eq(&handles[0], handle));
        }
        assert_eq!(registry.len(), 1);
    }
}
