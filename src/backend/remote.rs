//! Remote backend: another coldstore server reached over HTTP.
//!
//! Single-key calls map to one request each. Batch calls fan out one
//! request per key, bounded by a per-store worker semaphore, and wait for
//! all of them (up to the batch timeout). The first failure in input order
//! fails the batch; requests already in flight are left to finish, so a
//! failed batch may have partially applied. Once a batch has timed out,
//! members that never got a worker are dropped without being sent.
//!
//! The keys `.` and `..` are valid keys but cannot be addressed here: URL
//! parsers collapse them as dot segments. The remote store rejects both
//! with `InvalidKey`, so they never round-trip through it.

use super::{ColdStorage, KeyStream};
use crate::config::RemoteConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::key::{validate_key, validate_keys};
use crate::wire::{ERROR_HEADER, KeyFrameDecoder, OCTET_STREAM};
use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// HTTP client for a namespace served by a remote coldstore.
///
/// `RemoteStore` is `Clone`; clones share the HTTP client and the worker
/// semaphore.
///
/// Unlike the other backends it refuses the keys `.` and `..`
/// (`InvalidKey`), which have no URL of their own.
#[derive(Clone)]
pub struct RemoteStore {
    inner: Arc<RemoteInner>,
}

struct RemoteInner {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
    batch_timeout: Duration,
    workers: Arc<Semaphore>,
}

impl RemoteStore {
    /// Creates a client for the namespace at `base_url`
    /// (e.g. `http://127.0.0.1:3049/images`).
    pub fn new(base_url: impl Into<String>, client: reqwest::Client, config: &RemoteConfig) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            inner: Arc::new(RemoteInner {
                base_url,
                client,
                request_timeout: config.request_timeout(),
                batch_timeout: config.batch_timeout(),
                workers: Arc::new(Semaphore::new(config.concurrency.max(1))),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// URL of a validated key.
    ///
    /// `.` and `..` are dot segments that every URL parser collapses, so
    /// those two keys cannot be addressed over HTTP.
    fn key_url(&self, key: &str) -> Result<String> {
        if matches!(key, "." | "..") {
            return Err(Error::invalid_key(key));
        }
        Ok(format!("{}/{key}", self.inner.base_url))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        request
            .timeout(self.inner.request_timeout)
            .send()
            .await
            .map_err(transport_error)
    }

    async fn get_one(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let url = self.key_url(key)?;
        let resp = self.send(self.inner.client.get(&url)).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = resp.bytes().await.map_err(transport_error)?;
                Ok((!body.is_empty()).then(|| body.to_vec()))
            },
            _ => Err(error_from_response(resp).await),
        }
    }

    async fn set_one(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let url = self.key_url(key)?;
        let request = self
            .inner
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, OCTET_STREAM)
            .body(value);
        expect_success(self.send(request).await?).await
    }

    async fn delete_one(&self, key: &str) -> Result<()> {
        let url = self.key_url(key)?;
        expect_success(self.send(self.inner.client.delete(&url)).await?).await
    }

    /// Runs `op` for every item on the worker pool and collects the results
    /// in input order.
    async fn fan_out<I, T, F, Fut>(&self, items: Vec<I>, op: F) -> Result<Vec<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(RemoteStore, I) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        debug!(url = %self.inner.base_url, items = items.len(), "remote batch");

        // Set once the caller has been told the batch failed; members still
        // waiting for a worker then give up instead of sending.
        let abandoned = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = items
            .into_iter()
            .map(|item| {
                let workers = self.inner.workers.clone();
                let abandoned = abandoned.clone();
                let request = op(self.clone(), item);
                tokio::spawn(async move {
                    let _permit = workers
                        .acquire_owned()
                        .await
                        .map_err(|_| Error::operational("remote worker pool closed"))?;
                    if abandoned.load(Ordering::Acquire) {
                        return Err(Error::operational("batch abandoned after timeout"));
                    }
                    request.await
                })
            })
            .collect();

        let joined = tokio::time::timeout(self.inner.batch_timeout, join_all(handles))
            .await
            .map_err(|_| {
                abandoned.store(true, Ordering::Release);
                Error::operational(format!(
                    "batch to {} did not finish within {:?}",
                    self.inner.base_url, self.inner.batch_timeout
                ))
            })?;

        let mut results = Vec::with_capacity(joined.len());
        for outcome in joined {
            let result =
                outcome.map_err(|e| Error::operational(format!("task join error: {e}")))?;
            results.push(result?);
        }
        Ok(results)
    }

    async fn open_ids(&self) -> Result<KeyStream> {
        let request = self.inner.client.get(&self.inner.base_url).send();
        // Only the response head is bounded; the body streams for as long as
        // the namespace takes to enumerate.
        let resp = tokio::time::timeout(self.inner.request_timeout, request)
            .await
            .map_err(|_| {
                Error::operational(format!("GET {} timed out", self.inner.base_url))
            })?
            .map_err(transport_error)?;

        match resp.status() {
            StatusCode::NOT_FOUND => return Ok(stream::empty().boxed()),
            status if status.is_success() => {},
            _ => return Err(error_from_response(resp).await),
        }

        let body = resp.bytes_stream().boxed();
        let frames = stream::unfold(
            (body, Some(KeyFrameDecoder::new())),
            |(mut body, decoder)| async move {
                let mut decoder = decoder?;
                match body.next().await {
                    Some(Ok(chunk)) => {
                        let keys = decoder.push(&chunk);
                        let next = keys.is_ok().then_some(decoder);
                        Some((keys, (body, next)))
                    },
                    Some(Err(e)) => Some((Err(transport_error(e)), (body, None))),
                    None => Some((decoder.finish(), (body, None))),
                }
            },
        );

        Ok(frames
            .flat_map(|frame| {
                stream::iter(match frame {
                    Ok(keys) => keys.into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(e) => vec![Err(e)],
                })
            })
            .boxed())
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::operational(format!("request timed out: {err}"))
    } else {
        Error::operational(format!("request failed: {err}"))
    }
}

/// Rebuilds the error a server reported.
///
/// The kind comes from the error header. Gateway statuses and responses
/// without the header are transport failures.
async fn error_from_response(resp: reqwest::Response) -> Error {
    let status = resp.status();
    let header = resp
        .headers()
        .get(ERROR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = resp.text().await.unwrap_or_default();

    let gateway = matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    );
    match header {
        Some(value) if !gateway => match ErrorKind::from_header(&value) {
            Some(kind) => Error::from_wire(kind, body),
            None => Error::Internal(body),
        },
        _ => Error::operational(format!("unexpected response {status}: {body}")),
    }
}

async fn expect_success(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    if status.is_success() || status == StatusCode::NOT_FOUND {
        Ok(())
    } else {
        Err(error_from_response(resp).await)
    }
}

#[async_trait]
impl ColdStorage for RemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        self.get_one(key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        validate_keys(keys.iter().map(String::as_str))?;
        let fetched = self
            .fan_out(keys.to_vec(), |store, key| async move {
                let value = store.get_one(&key).await?;
                Ok::<_, Error>((key, value))
            })
            .await?;
        Ok(fetched
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        self.set_one(key, value).await
    }

    async fn set_many(&self, items: HashMap<String, Vec<u8>>) -> Result<()> {
        validate_keys(items.keys().map(String::as_str))?;
        self.fan_out(items.into_iter().collect(), |store, (key, value)| async move {
            store.set_one(&key, value).await
        })
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.delete_one(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        validate_keys(keys.iter().map(String::as_str))?;
        self.fan_out(keys.to_vec(), |store, key| async move {
            store.delete_one(&key).await
        })
        .await?;
        Ok(())
    }

    fn ids(&self) -> KeyStream {
        let store = self.clone();
        stream::once(async move { store.open_ids().await })
            .flat_map(|opened| match opened {
                Ok(keys) => keys,
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed()
    }

    async fn flush(&self) -> Result<()> {
        let request = self.inner.client.delete(&self.inner.base_url);
        expect_success(self.send(request).await?).await
    }
}
