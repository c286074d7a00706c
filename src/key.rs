//! Key validation.
//!
//! Every backend operation validates its key(s) before touching I/O. A
//! key is a non-empty string over `[A-Za-z0-9_\-.]`; case is preserved.

use crate::error::{Error, Result};

/// Returns true if `b` may appear in a key.
#[inline]
pub fn is_key_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')
}

/// Validates a single key.
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] if the key is empty or contains a
/// character outside the allowed class.
///
/// # Examples
///
/// ```
/// use coldstore::key::validate_key;
///
/// assert!(validate_key("abc123").is_ok());
/// assert!(validate_key("a.b-c_D").is_ok());
/// assert!(validate_key("").is_err());
/// assert!(validate_key("foo$").is_err());
/// assert!(validate_key("a/b").is_err());
/// ```
pub fn validate_key(key: &str) -> Result<&str> {
    if key.is_empty() || !key.bytes().all(is_key_byte) {
        return Err(Error::invalid_key(key));
    }
    Ok(key)
}

/// Validates every key of a batch; the first bad key fails the whole batch.
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] naming the first offending key.
pub fn validate_keys<'a, I>(keys: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    for key in keys {
        validate_key(key)?;
    }
    Ok(())
}
