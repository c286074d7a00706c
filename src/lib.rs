//! Uniform key-value cold storage gateway.
//!
//! One interface (`get`/`set`/`delete`, batched and singular, plus key
//! enumeration and namespace flush) over interchangeable backends:
//!
//! - a sharded file tree (`file://`)
//! - a MySQL table (`mysql://`)
//! - a DynamoDB table (`dynamo://`)
//! - another coldstore server (`http://`, `https://`)
//!
//! Symbolic names are resolved to live backends by a [`Registry`], and the
//! [`server`] module exposes any of them over HTTP so that a remote
//! coldstore behaves exactly like a local backend.
//!
//! # Example
//!
//! ```ignore
//! use coldstore::{Registry, Settings};
//!
//! let settings = Settings::default().with_locator("images", "file://.data/images");
//! let registry = Registry::new(settings);
//! let images = registry.resolve("images").await?;
//! images.set("abc123", b"bytes".to_vec()).await?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod key;
pub mod locator;
pub mod pool;
pub mod registry;
pub mod server;
pub mod wire;

pub use backend::{BackendHandle, ColdStorage, KeyStream};
pub use config::Settings;
pub use error::{Error, ErrorKind, Result};
pub use registry::Registry;
