//! MySQL-backed cold storage.
//!
//! One table per namespace:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS `t` (
//!     pk VARBINARY(32) NOT NULL PRIMARY KEY,
//!     bin MEDIUMBLOB NOT NULL
//! ) ENGINE=InnoDB /*!50100 PARTITION BY KEY (pk) PARTITIONS 10 */
//! ```
//!
//! Every statement runs on a connection checked out of a [`Pool`]. Driver
//! errors are classified by the operation that hit them: reads become
//! `Read`, writes `Write`, deletes `Delete`.

use super::{ColdStorage, KeyStream};
use crate::error::{Error, Result};
use crate::key::{validate_key, validate_keys};
use crate::locator::MysqlLocator;
use crate::pool::{ConnectionManager, Pool, PoolConfig};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, Row};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Keys fetched per page while enumerating.
const IDS_PAGE_SIZE: u32 = 1000;

/// Opens raw MySQL connections for the pool.
struct MysqlManager {
    options: MySqlConnectOptions,
}

#[async_trait]
impl ConnectionManager for MysqlManager {
    type Connection = MySqlConnection;
    type Error = sqlx::Error;

    async fn connect(&self) -> std::result::Result<MySqlConnection, sqlx::Error> {
        MySqlConnection::connect_with(&self.options).await
    }

    async fn disconnect(&self, conn: MySqlConnection) {
        if let Err(e) = conn.close().await {
            debug!(error = %e, "failed to close mysql connection");
        }
    }
}

/// MySQL-backed cold storage.
///
/// `MysqlStore` is `Clone`; clones share the connection pool.
#[derive(Clone)]
pub struct MysqlStore {
    inner: Arc<MysqlInner>,
}

struct MysqlInner {
    pool: Pool<MysqlManager>,
    table: String,
    max_value_size: usize,
}

impl MysqlStore {
    /// Builds the store, creating its table unless `init_disable` is set.
    ///
    /// # Errors
    ///
    /// - `Configuration` if the driver rejects the connection URL
    /// - `Read` if `dynamic_char_len` is set and the column capacity cannot
    ///   be introspected
    pub async fn connect(locator: MysqlLocator) -> Result<Self> {
        let options = MySqlConnectOptions::from_str(locator.driver_url.as_str())
            .map_err(|e| Error::configuration(format!("invalid mysql locator: {e}")))?;
        let opts = &locator.options;
        let pool = Pool::new(
            MysqlManager { options },
            PoolConfig::new(opts.pool_size, opts.inactive_timeout),
        );

        let mut inner = MysqlInner {
            pool,
            table: locator.table,
            max_value_size: opts.max_value_size,
        };

        if !opts.init_disable {
            inner
                .create_table(opts.bin_data_type.as_sql(), opts.default_partitions)
                .await;
        }
        if opts.dynamic_char_len {
            inner.max_value_size = inner.column_capacity().await?;
        }

        info!(
            table = %inner.table,
            max_value_size = inner.max_value_size,
            pool_size = opts.pool_size,
            "mysql store ready"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn table(&self) -> &str {
        &self.inner.table
    }

    /// Largest value accepted by writes.
    pub fn max_value_size(&self) -> usize {
        self.inner.max_value_size
    }

    /// Drops the table. Meant for test teardown.
    ///
    /// # Errors
    ///
    /// Returns `Delete` if the statement fails.
    pub async fn drop_table(&self) -> Result<()> {
        self.inner
            .execute(&drop_table_sql(&self.inner.table))
            .await
            .map_err(Error::delete)
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.inner.pool.close().await;
    }
}

impl MysqlInner {
    /// Idempotent table setup. The table is assumed usable whether or not
    /// this succeeds (missing privilege, already exists).
    async fn create_table(&self, bin_type: &str, partitions: u32) {
        let sql = create_table_sql(&self.table, bin_type, partitions);
        if let Err(e) = self.execute(&sql).await {
            debug!(table = %self.table, error = %e, "create table skipped");
        }
    }

    async fn column_capacity(&self) -> Result<usize> {
        let table = self.table.clone();
        let capacity: Option<i64> = self
            .pool
            .run(|mut conn| async move {
                let result = sqlx::query(COLUMN_CAPACITY_SQL)
                    .bind(table.as_str())
                    .fetch_optional(&mut conn)
                    .await
                    .and_then(|row| row.map(|r| r.try_get::<Option<i64>, _>(0)).transpose());
                (conn, result)
            })
            .await
            .map_err(Error::read)?
            .flatten();

        let capacity = capacity
            .ok_or_else(|| Error::read(format!("no capacity found for `{}`.bin", self.table)))?;
        usize::try_from(capacity)
            .map_err(|_| Error::read(format!("invalid capacity {capacity} for `{}`.bin", self.table)))
    }

    async fn execute(&self, sql: &str) -> std::result::Result<(), sqlx::Error> {
        self.pool
            .run(|mut conn| async move {
                let result = sqlx::query(sql).execute(&mut conn).await.map(|_| ());
                (conn, result)
            })
            .await
    }

    /// Fetches one page of keys after `after` (or from the start).
    async fn ids_page(&self, after: Option<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        let sql = ids_page_sql(&self.table, after.is_some());
        self.pool
            .run(|mut conn| async move {
                let mut query = sqlx::query(&sql);
                if let Some(after) = &after {
                    query = query.bind(after.as_slice());
                }
                let result = query
                    .bind(IDS_PAGE_SIZE)
                    .fetch_all(&mut conn)
                    .await
                    .and_then(|rows| rows.iter().map(|r| r.try_get::<Vec<u8>, _>(0)).collect());
                (conn, result)
            })
            .await
            .map_err(Error::read)
    }

    fn check_capacity(&self, value: &[u8]) -> Result<()> {
        if value.len() > self.max_value_size {
            return Err(Error::DataOverflow {
                size: value.len(),
                limit: self.max_value_size,
            });
        }
        Ok(())
    }
}

const COLUMN_CAPACITY_SQL: &str = "SELECT CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED) \
     FROM INFORMATION_SCHEMA.COLUMNS \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = 'bin'";

fn create_table_sql(table: &str, bin_type: &str, partitions: u32) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS `{table}` (\
         pk VARBINARY(32) NOT NULL PRIMARY KEY, \
         bin {bin_type} NOT NULL\
         ) ENGINE=InnoDB /*!50100 PARTITION BY KEY (pk) PARTITIONS {partitions} */"
    )
}

fn placeholders(count: usize, group: &str) -> String {
    vec![group; count].join(", ")
}

fn select_many_sql(table: &str, count: usize) -> String {
    format!(
        "SELECT pk, bin FROM `{table}` WHERE pk IN ({})",
        placeholders(count, "?")
    )
}

fn upsert_sql(table: &str, count: usize) -> String {
    format!(
        "INSERT INTO `{table}` (pk, bin) VALUES {} ON DUPLICATE KEY UPDATE bin = VALUES(bin)",
        placeholders(count, "(?, ?)")
    )
}

fn delete_many_sql(table: &str, count: usize) -> String {
    format!(
        "DELETE FROM `{table}` WHERE pk IN ({})",
        placeholders(count, "?")
    )
}

fn ids_page_sql(table: &str, after: bool) -> String {
    if after {
        format!("SELECT pk FROM `{table}` WHERE pk > ? ORDER BY pk LIMIT ?")
    } else {
        format!("SELECT pk FROM `{table}` ORDER BY pk LIMIT ?")
    }
}

fn truncate_sql(table: &str) -> String {
    format!("TRUNCATE TABLE `{table}`")
}

fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS `{table}`")
}

fn decode_key(pk: Vec<u8>) -> Result<String> {
    String::from_utf8(pk).map_err(|e| Error::read(format!("non-utf8 key in table: {e}")))
}

#[async_trait]
impl ColdStorage for MysqlStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let mut found = self.get_many(&[key.to_string()]).await?;
        Ok(found.remove(key))
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        validate_keys(keys.iter().map(String::as_str))?;
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = select_many_sql(&self.inner.table, keys.len());
        let rows = self
            .inner
            .pool
            .run(|mut conn| async move {
                let mut query = sqlx::query(&sql);
                for key in keys {
                    query = query.bind(key.as_bytes());
                }
                let result = query.fetch_all(&mut conn).await.and_then(|rows| {
                    rows.iter()
                        .map(|r| Ok((r.try_get::<Vec<u8>, _>(0)?, r.try_get::<Vec<u8>, _>(1)?)))
                        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                });
                (conn, result)
            })
            .await
            .map_err(Error::read)?;

        rows.into_iter()
            .map(|(pk, bin)| Ok::<_, Error>((decode_key(pk)?, bin)))
            .collect()
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        self.set_many(HashMap::from([(key.to_string(), value)])).await
    }

    async fn set_many(&self, items: HashMap<String, Vec<u8>>) -> Result<()> {
        validate_keys(items.keys().map(String::as_str))?;
        for value in items.values() {
            self.inner.check_capacity(value)?;
        }
        if items.is_empty() {
            return Ok(());
        }

        let sql = upsert_sql(&self.inner.table, items.len());
        self.inner
            .pool
            .run(|mut conn| async move {
                let mut query = sqlx::query(&sql);
                for (key, value) in &items {
                    query = query.bind(key.as_bytes()).bind(value.as_slice());
                }
                let result = query.execute(&mut conn).await.map(|_| ());
                (conn, result)
            })
            .await
            .map_err(Error::write)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.delete_many(&[key.to_string()]).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        validate_keys(keys.iter().map(String::as_str))?;
        if keys.is_empty() {
            return Ok(());
        }

        let sql = delete_many_sql(&self.inner.table, keys.len());
        self.inner
            .pool
            .run(|mut conn| async move {
                let mut query = sqlx::query(&sql);
                for key in keys {
                    query = query.bind(key.as_bytes());
                }
                let result = query.execute(&mut conn).await.map(|_| ());
                (conn, result)
            })
            .await
            .map_err(Error::delete)
    }

    fn ids(&self) -> KeyStream {
        // (store, last key seen, exhausted)
        let state = (self.inner.clone(), None::<Vec<u8>>, false);
        stream::unfold(state, |(inner, after, done)| async move {
            if done {
                return None;
            }
            match inner.ids_page(after).await {
                Ok(page) => {
                    let exhausted = page.len() < IDS_PAGE_SIZE as usize;
                    let last = page.last().cloned();
                    let keys: Vec<Result<String>> = page.into_iter().map(decode_key).collect();
                    Some((keys, (inner, last, exhausted)))
                },
                Err(e) => {
                    warn!(table = %inner.table, error = %e, "mysql ids page failed");
                    Some((vec![Err(e)], (inner, None, true)))
                },
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    async fn flush(&self) -> Result<()> {
        self.inner
            .execute(&truncate_sql(&self.inner.table))
            .await
            .map_err(Error::delete)
    }
}
