//! Error taxonomy shared by every backend and by the wire protocol.
//!
//! Each variant is a failure *kind*. Read, Write and Delete are
//! specializations of Operational; callers that only care about
//! "infrastructure broke" can test [`ErrorKind::is_operational`].

use std::fmt;

/// Result type for coldstore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by backends, the registry and the wire client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Key is empty or contains characters outside `[A-Za-z0-9_\-.]`.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// Bad or missing locator, unsupported scheme, missing driver.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Generic infrastructure failure, including remote transport failures.
    #[error("operational error: {0}")]
    Operational(String),

    /// Failure while reading.
    #[error("read error: {0}")]
    Read(String),

    /// Failure while writing.
    #[error("write error: {0}")]
    Write(String),

    /// Failure while deleting.
    #[error("delete error: {0}")]
    Delete(String),

    /// Value exceeds the backend's capacity.
    #[error("value of {size} bytes exceeds capacity of {limit} bytes")]
    DataOverflow { size: usize, limit: usize },

    /// Unclassified failure reported by a remote server.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey(key.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn operational(msg: impl Into<String>) -> Self {
        Self::Operational(msg.into())
    }

    pub fn read(err: impl fmt::Display) -> Self {
        Self::Read(err.to_string())
    }

    pub fn write(err: impl fmt::Display) -> Self {
        Self::Write(err.to_string())
    }

    pub fn delete(err: impl fmt::Display) -> Self {
        Self::Delete(err.to_string())
    }

    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKey(_) => ErrorKind::InvalidKey,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Operational(_) => ErrorKind::Operational,
            Self::Read(_) => ErrorKind::Read,
            Self::Write(_) => ErrorKind::Write,
            Self::Delete(_) => ErrorKind::Delete,
            Self::DataOverflow { .. } => ErrorKind::DataOverflow,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Human-readable detail without the kind prefix.
    ///
    /// This is what travels in a wire error body; the kind travels in the
    /// header.
    pub fn message(&self) -> String {
        match self {
            Self::InvalidKey(key) => key.clone(),
            Self::Configuration(msg)
            | Self::Operational(msg)
            | Self::Read(msg)
            | Self::Write(msg)
            | Self::Delete(msg)
            | Self::Internal(msg) => msg.clone(),
            Self::DataOverflow { size, limit } => format!("{size} > {limit}"),
        }
    }

    /// Rebuild an error from a wire kind and message body.
    pub fn from_wire(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::InvalidKey => Self::InvalidKey(message),
            ErrorKind::Configuration => Self::Configuration(message),
            ErrorKind::Operational => Self::Operational(message),
            ErrorKind::Read => Self::Read(message),
            ErrorKind::Write => Self::Write(message),
            ErrorKind::Delete => Self::Delete(message),
            ErrorKind::DataOverflow => parse_overflow(&message)
                .map_or(Self::Write(message), |(size, limit)| Self::DataOverflow {
                    size,
                    limit,
                }),
            ErrorKind::Internal => Self::Internal(message),
        }
    }
}

fn parse_overflow(message: &str) -> Option<(usize, usize)> {
    let (size, limit) = message.split_once(" > ")?;
    Some((size.trim().parse().ok()?, limit.trim().parse().ok()?))
}

/// Copyable failure kind, used for wire mapping and coarse matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidKey,
    Configuration,
    Operational,
    Read,
    Write,
    Delete,
    DataOverflow,
    Internal,
}

impl ErrorKind {
    /// True for Operational and its Read/Write/Delete specializations.
    pub fn is_operational(self) -> bool {
        matches!(
            self,
            Self::Operational | Self::Read | Self::Write | Self::Delete
        )
    }

    /// Value carried in the error header of a wire response.
    pub fn header_value(self) -> &'static str {
        match self {
            Self::InvalidKey => "INVALID-KEY",
            Self::Configuration => "CONFIGURATION",
            Self::Operational => "OPERATIONAL",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Delete => "DELETE",
            Self::DataOverflow => "DATA-OVERFLOW",
            Self::Internal => "INTERNAL",
        }
    }

    /// Parse an error header value. Unknown values are `None`.
    pub fn from_header(value: &str) -> Option<Self> {
        let kind = match value.trim().to_ascii_uppercase().as_str() {
            "INVALID-KEY" => Self::InvalidKey,
            "CONFIGURATION" => Self::Configuration,
            "OPERATIONAL" => Self::Operational,
            "READ" => Self::Read,
            "WRITE" => Self::Write,
            "DELETE" => Self::Delete,
            "DATA-OVERFLOW" => Self::DataOverflow,
            "INTERNAL" => Self::Internal,
            _ => return None,
        };
        Some(kind)
    }

    /// HTTP status the server answers with for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            Self::InvalidKey | Self::Configuration => 400,
            Self::Operational
            | Self::Read
            | Self::Write
            | Self::Delete
            | Self::DataOverflow
            | Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_value())
    }
}
