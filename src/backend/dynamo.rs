//! DynamoDB-backed cold storage.
//!
//! Items are keyed by a single string hash key `key` and hold the value in
//! a binary `value` attribute. Batch calls are sequences of single-item
//! calls.
//!
//! `ids()` is a paged full-table scan with no snapshot isolation: items
//! written or deleted while the scan runs may or may not be reported.

use super::{ColdStorage, KeyStream};
use crate::error::{Error, Result};
use crate::key::{validate_key, validate_keys};
use crate::locator::DynamoLocator;
use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_dynamodb::config::Credentials;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType,
};
use futures::TryStreamExt;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const KEY_ATTR: &str = "key";
const VALUE_ATTR: &str = "value";

/// DynamoDB-backed cold storage.
///
/// `DynamoStore` is `Clone`; the SDK client is reference counted.
#[derive(Clone)]
pub struct DynamoStore {
    client: DynamoDbClient,
    table: Arc<str>,
}

type Item = HashMap<String, AttributeValue>;

impl DynamoStore {
    /// Builds the client and, when the locator asks for it, creates the
    /// table.
    ///
    /// # Errors
    ///
    /// Currently infallible; table creation failures are logged and
    /// ignored.
    pub async fn connect(locator: DynamoLocator) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(locator.region.clone()));
        if let Some(endpoint) = &locator.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some((access_key, secret)) = &locator.credentials {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret,
                None,
                None,
                "coldstore-locator",
            ));
        }
        let config = loader.load().await;

        let store = Self {
            client: DynamoDbClient::new(&config),
            table: Arc::from(locator.table.as_str()),
        };

        if locator.initialize
            && let Err(e) = store.create_table().await
        {
            debug!(table = %store.table, error = %e, "create table skipped");
        }

        info!(
            table = %store.table,
            region = %locator.region,
            endpoint = locator.endpoint.as_deref().unwrap_or("aws"),
            "dynamo store ready"
        );
        Ok(store)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Creates the table with on-demand billing. Fails if it exists.
    async fn create_table(&self) -> Result<()> {
        let key_schema = KeySchemaElement::builder()
            .attribute_name(KEY_ATTR)
            .key_type(KeyType::Hash)
            .build()
            .map_err(|e| Error::configuration(e.to_string()))?;
        let key_attr = AttributeDefinition::builder()
            .attribute_name(KEY_ATTR)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(|e| Error::configuration(e.to_string()))?;

        self.client
            .create_table()
            .table_name(self.table.as_ref())
            .billing_mode(BillingMode::PayPerRequest)
            .key_schema(key_schema)
            .attribute_definitions(key_attr)
            .send()
            .await
            .map_err(|e| Error::operational(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    /// Deletes the table. Meant for test teardown.
    ///
    /// # Errors
    ///
    /// Returns `Delete` if the call fails.
    pub async fn drop_table(&self) -> Result<()> {
        self.client
            .delete_table()
            .table_name(self.table.as_ref())
            .send()
            .await
            .map_err(|e| Error::delete(DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn get_one(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let output = self
            .client
            .get_item()
            .table_name(self.table.as_ref())
            .key(KEY_ATTR, AttributeValue::S(key.to_string()))
            .send()
            .await
            .map_err(|e| Error::read(DisplayErrorContext(&e)))?;

        match output.item() {
            Some(item) => item_value(key, item),
            None => Ok(None),
        }
    }

    async fn set_one(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.client
            .put_item()
            .table_name(self.table.as_ref())
            .item(KEY_ATTR, AttributeValue::S(key.to_string()))
            .item(VALUE_ATTR, AttributeValue::B(Blob::new(value)))
            .send()
            .await
            .map_err(|e| Error::write(DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn delete_one(&self, key: &str) -> Result<()> {
        self.client
            .delete_item()
            .table_name(self.table.as_ref())
            .key(KEY_ATTR, AttributeValue::S(key.to_string()))
            .send()
            .await
            .map_err(|e| Error::delete(DisplayErrorContext(&e)))?;
        Ok(())
    }

    /// One scan page: its keys and the continuation token, if any.
    async fn scan_page(&self, start: Option<Item>) -> Result<(Vec<String>, Option<Item>)> {
        let output = self
            .client
            .scan()
            .table_name(self.table.as_ref())
            // "key" is a reserved word in expressions
            .projection_expression("#k")
            .expression_attribute_names("#k", KEY_ATTR)
            .set_exclusive_start_key(start)
            .send()
            .await
            .map_err(|e| Error::read(DisplayErrorContext(&e)))?;

        let keys = output
            .items()
            .iter()
            .filter_map(|item| item.get(KEY_ATTR)?.as_s().ok().cloned())
            .collect();
        Ok((keys, output.last_evaluated_key().cloned()))
    }
}

/// Value of a fetched item. An item without a value attribute (half-written)
/// reads as absent; a value of the wrong type is a `Read` failure.
fn item_value(key: &str, item: &Item) -> Result<Option<Vec<u8>>> {
    match item.get(VALUE_ATTR) {
        None => Ok(None),
        Some(value) => value
            .as_b()
            .map(|blob| Some(blob.as_ref().to_vec()))
            .map_err(|_| Error::read(format!("item {key} has a non-binary value attribute"))),
    }
}

/// Scan paging state.
enum ScanState {
    Start,
    After(Item),
    Done,
}

#[async_trait]
impl ColdStorage for DynamoStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        self.get_one(key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        validate_keys(keys.iter().map(String::as_str))?;
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get_one(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        self.set_one(key, value).await
    }

    async fn set_many(&self, items: HashMap<String, Vec<u8>>) -> Result<()> {
        validate_keys(items.keys().map(String::as_str))?;
        for (key, value) in items {
            self.set_one(&key, value).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.delete_one(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        validate_keys(keys.iter().map(String::as_str))?;
        for key in keys {
            self.delete_one(key).await?;
        }
        Ok(())
    }

    fn ids(&self) -> KeyStream {
        let store = self.clone();
        stream::unfold(ScanState::Start, move |state| {
            let store = store.clone();
            async move {
                let start = match state {
                    ScanState::Start => None,
                    ScanState::After(item) => Some(item),
                    ScanState::Done => return None,
                };
                match store.scan_page(start).await {
                    Ok((keys, next)) => {
                        let next = next.map_or(ScanState::Done, ScanState::After);
                        Some((keys.into_iter().map(Ok).collect::<Vec<_>>(), next))
                    },
                    Err(e) => Some((vec![Err(e)], ScanState::Done)),
                }
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    /// Scans the table and deletes every item, one call per item.
    async fn flush(&self) -> Result<()> {
        let mut keys = self.ids();
        while let Some(key) = keys.try_next().await.map_err(|e| Error::delete(e.message()))? {
            self.delete_one(&key).await?;
        }
        Ok(())
    }
}
