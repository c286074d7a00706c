//! Backend contract and its four variants.
//!
//! Every namespace is served by exactly one backend:
//!
//! - **FileStore**: sharded directory tree on the local filesystem
//! - **MysqlStore**: one MySQL table, pooled connections (`mysql` feature)
//! - **DynamoStore**: one DynamoDB table (`dynamo` feature)
//! - **RemoteStore**: another coldstore server reached over HTTP
//!
//! # Example
//!
//! ```ignore
//! use coldstore::backend::{ColdStorage, FileStore};
//!
//! let store = FileStore::new(".data");
//! store.set("abc123", b"value".to_vec()).await?;
//! assert_eq!(store.get("abc123").await?, Some(b"value".to_vec()));
//! ```
//!
//! # Custom Backends
//!
//! Implement [`ColdStorage`] and hand the value to
//! [`Registry::register`](crate::registry::Registry::register).

mod file;
mod remote;

#[cfg(feature = "dynamo")]
mod dynamo;
#[cfg(feature = "mysql")]
mod mysql;

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;

pub use file::FileStore;
pub use remote::RemoteStore;

#[cfg(feature = "dynamo")]
pub use dynamo::DynamoStore;
#[cfg(feature = "mysql")]
pub use mysql::MysqlStore;

/// Lazy, finite, non-restartable sequence of keys.
///
/// Order is unspecified. A backend hides its paging behind this stream; an
/// `Err` item ends the enumeration.
pub type KeyStream = BoxStream<'static, Result<String>>;

/// Shared handle to a backend, as cached by the registry.
pub type BackendHandle = Arc<dyn ColdStorage>;

/// Uniform key-value contract implemented by every backend.
///
/// All methods validate their key(s) before any I/O. A batch with one bad
/// key fails as a whole with [`Error::InvalidKey`](crate::Error::InvalidKey)
/// and nothing is executed.
///
/// [`RemoteStore`] additionally rejects the keys `.` and `..`: they are
/// collapsed as URL dot segments and cannot be sent over the wire.
///
/// Consistency is whatever the underlying medium gives: concurrent writers
/// to the same key are settled by the medium (last write wins), never by
/// this layer.
#[async_trait]
pub trait ColdStorage: Send + Sync + 'static {
    /// Retrieves a value. A missing key is `Ok(None)`, never an error.
    ///
    /// # Errors
    ///
    /// `InvalidKey` for a malformed key, `Read` (or `Operational` for the
    /// remote backend's transport failures) otherwise.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Retrieves several values. Missing keys are omitted from the map.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>>;

    /// Stores a value, overwriting any previous one.
    ///
    /// # Errors
    ///
    /// `InvalidKey`, `DataOverflow` when the backend caps value size, or
    /// `Write`.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Stores several values.
    ///
    /// # Errors
    ///
    /// Same as [`set`](Self::set).
    async fn set_many(&self, items: HashMap<String, Vec<u8>>) -> Result<()>;

    /// Removes a key. Removing a missing key is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidKey` or `Delete`.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes several keys.
    ///
    /// # Errors
    ///
    /// Same as [`delete`](Self::delete).
    async fn delete_many(&self, keys: &[String]) -> Result<()>;

    /// Enumerates every key currently stored.
    ///
    /// Nothing happens until the stream is first polled. Keys written or
    /// removed while the stream is consumed may or may not show up.
    fn ids(&self) -> KeyStream;

    /// Removes every key of the namespace.
    ///
    /// # Errors
    ///
    /// `Delete` (or `Operational` for remote transport failures).
    async fn flush(&self) -> Result<()>;
}

#[cfg(test)]
mod tests;
