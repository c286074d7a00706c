//! Locator parsing.
//!
//! A locator is the URL-shaped string configured for a symbolic name. Its
//! scheme selects the backend variant:
//!
//! | Scheme            | Backend        |
//! |-------------------|----------------|
//! | `file://`         | File store     |
//! | `mysql://`        | Relational     |
//! | `dynamo://`       | Document store |
//! | `http(s)://`      | Remote store   |
//!
//! Parsing is pure; nothing here touches the network or the filesystem.

use crate::error::{Error, Result};
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Value column capacity assumed when none is configured or introspected.
pub const DEFAULT_MAX_VALUE_SIZE: usize = 65_535;

/// Pooled MySQL connections kept per backend.
pub const DEFAULT_POOL_SIZE: i64 = 5;

/// Seconds a released MySQL connection may idle before it is discarded.
pub const DEFAULT_INACTIVE_TIMEOUT_SECS: u64 = 120;

/// MySQL table partitions created on first use.
pub const DEFAULT_PARTITIONS: u32 = 10;

/// Default DynamoDB region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Backend construction parameters resolved from a locator.
#[derive(Debug, Clone, PartialEq)]
pub enum Locator {
    File(FileLocator),
    Mysql(MysqlLocator),
    Dynamo(DynamoLocator),
    Remote(RemoteLocator),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileLocator {
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteLocator {
    /// Namespace base address, without a trailing slash.
    pub base_url: String,
}

/// Storage type of the MySQL value column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinDataType {
    Blob,
    MediumBlob,
    LongBlob,
}

impl BinDataType {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Blob => "BLOB",
            Self::MediumBlob => "MEDIUMBLOB",
            Self::LongBlob => "LONGBLOB",
        }
    }
}

impl std::str::FromStr for BinDataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "blob" => Ok(Self::Blob),
            "mediumblob" => Ok(Self::MediumBlob),
            "longblob" => Ok(Self::LongBlob),
            other => Err(Error::configuration(format!(
                "unsupported bin_data_type {other:?} (expected blob, mediumblob or longblob)"
            ))),
        }
    }
}

/// Options consumed by the relational backend itself.
#[derive(Debug, Clone, PartialEq)]
pub struct MysqlOptions {
    /// Pool capacity; zero or negative disables pooling.
    pub pool_size: i64,
    pub inactive_timeout: Duration,
    pub init_disable: bool,
    pub bin_data_type: BinDataType,
    pub default_partitions: u32,
    pub dynamic_char_len: bool,
    pub max_value_size: usize,
}

impl Default for MysqlOptions {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            inactive_timeout: Duration::from_secs(DEFAULT_INACTIVE_TIMEOUT_SECS),
            init_disable: false,
            bin_data_type: BinDataType::MediumBlob,
            default_partitions: DEFAULT_PARTITIONS,
            dynamic_char_len: false,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MysqlLocator {
    pub table: String,
    pub database: Option<String>,
    pub options: MysqlOptions,
    /// Connection URL handed to the driver: credentials, host, database and
    /// every query parameter the backend did not consume.
    pub driver_url: Url,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DynamoLocator {
    pub table: String,
    pub region: String,
    /// Explicit endpoint (DynamoDB Local and friends); `None` uses AWS.
    pub endpoint: Option<String>,
    /// Static (access key, secret) pair.
    pub credentials: Option<(String, String)>,
    pub initialize: bool,
}

impl Locator {
    /// Parse a locator configured for the symbolic `name`.
    ///
    /// `name` supplies defaults (table names) when the locator omits them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for a missing or unsupported scheme
    /// and for malformed backend options.
    pub fn parse(name: &str, locator: &str) -> Result<Self> {
        let (scheme, rest) = locator
            .split_once("://")
            .ok_or_else(|| Error::configuration(format!("invalid locator for {name}")))?;

        match scheme.to_ascii_lowercase().as_str() {
            "file" => {
                if rest.is_empty() {
                    return Err(Error::configuration(format!("empty file path for {name}")));
                }
                Ok(Self::File(FileLocator {
                    root: PathBuf::from(rest),
                }))
            },
            "mysql" => parse_mysql(name, locator).map(Self::Mysql),
            "dynamo" | "dynamodb" => parse_dynamo(name, locator).map(Self::Dynamo),
            "http" | "https" => {
                let url = parse_url(name, locator)?;
                if url.host_str().is_none() {
                    return Err(Error::configuration(format!("missing host for {name}")));
                }
                Ok(Self::Remote(RemoteLocator {
                    base_url: locator.trim_end_matches('/').to_string(),
                }))
            },
            _ => Err(Error::configuration(format!("invalid scheme for {name}"))),
        }
    }

    /// Short label of the selected variant, for logs.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Mysql(_) => "mysql",
            Self::Dynamo(_) => "dynamo",
            Self::Remote(_) => "http",
        }
    }
}

fn parse_url(name: &str, locator: &str) -> Result<Url> {
    Url::parse(locator)
        .map_err(|e| Error::configuration(format!("invalid locator for {name}: {e}")))
}

/// Query parameters with last-value-wins semantics.
fn query_params(url: &Url) -> BTreeMap<String, String> {
    url.query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_number<T: std::str::FromStr>(name: &str, option: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::configuration(format!("invalid {option} {value:?} for {name}"))
    })
}

fn validate_table_name(name: &str, table: &str) -> Result<()> {
    if table.is_empty() || !table.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(Error::configuration(format!(
            "invalid table name {table:?} for {name}"
        )));
    }
    Ok(())
}

fn decoded(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

fn parse_mysql(name: &str, locator: &str) -> Result<MysqlLocator> {
    let url = parse_url(name, locator)?;
    let mut params = query_params(&url);
    let mut options = MysqlOptions::default();

    let table = params
        .remove("table")
        .unwrap_or_else(|| name.to_lowercase());
    validate_table_name(name, &table)?;

    if let Some(v) = params.remove("pool_size") {
        options.pool_size = parse_number(name, "pool_size", &v)?;
    }
    if let Some(v) = params.remove("inactive_timeout") {
        options.inactive_timeout = Duration::from_secs(parse_number(name, "inactive_timeout", &v)?);
    }
    if let Some(v) = params.remove("init_disable") {
        options.init_disable = truthy(&v);
    }
    if let Some(v) = params.remove("bin_data_type") {
        options.bin_data_type = v.parse()?;
    }
    if let Some(v) = params.remove("default_partitions") {
        options.default_partitions = parse_number(name, "default_partitions", &v)?;
    }
    if let Some(v) = params.remove("dynamic_char_len") {
        options.dynamic_char_len = truthy(&v);
    }
    if let Some(v) = params.remove("max_value_size") {
        options.max_value_size = parse_number(name, "max_value_size", &v)?;
    }

    let database = url
        .path()
        .trim_start_matches('/')
        .split('/')
        .next()
        .filter(|db| !db.is_empty())
        .map(decoded);

    let mut driver_url = url.clone();
    driver_url.set_query(None);
    if !params.is_empty() {
        driver_url.query_pairs_mut().extend_pairs(params.iter());
    }

    Ok(MysqlLocator {
        table,
        database,
        options,
        driver_url,
    })
}

fn parse_dynamo(name: &str, locator: &str) -> Result<DynamoLocator> {
    let url = parse_url(name, locator)?;
    let params = query_params(&url);

    let table = url
        .path()
        .trim_start_matches('/')
        .split('/')
        .next()
        .filter(|t| !t.is_empty())
        .map_or_else(|| name.to_lowercase(), decoded);

    let region = params
        .get("region")
        .or_else(|| params.get("region_name"))
        .cloned()
        .unwrap_or_else(|| DEFAULT_REGION.to_string());

    let secure = params.get("secure").is_some_and(|v| truthy(v));
    let endpoint = url.host_str().filter(|h| !h.is_empty()).map(|host| {
        let scheme = if secure { "https" } else { "http" };
        match url.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        }
    });

    let credentials = if url.username().is_empty() {
        None
    } else {
        Some((
            decoded(url.username()),
            url.password().map(decoded).unwrap_or_default(),
        ))
    };

    Ok(DynamoLocator {
        table,
        region,
        endpoint,
        credentials,
        initialize: params.get("initialize").is_some_and(|v| truthy(v)),
    })
}
