//! # Argument Errors
//!
//! Caller-side validation failures. These are always detected locally and
//! synchronously, before a request reaches the network.

use thiserror::Error;

use crate::types::{Endpoint, MAX_KEY_LEN};

/// Result alias for validation helpers.
pub type ArgResult<T> = Result<T, ArgumentError>;

/// Rejected caller input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    /// Zero-length key.
    #[error("key is empty")]
    EmptyKey,
    /// Key longer than the protocol limit.
    #[error("key is {len} bytes, limit is {}", MAX_KEY_LEN)]
    KeyTooLong { len: usize },
    /// Whitespace or control byte inside a key; it would break line framing.
    #[error("key contains byte 0x{byte:02x} at offset {offset}")]
    InvalidKeyByte { byte: u8, offset: usize },
    /// Endpoint text could not be parsed as `host[:port]`.
    #[error("invalid endpoint `{0}`")]
    InvalidEndpoint(String),
    /// Operation addressed an endpoint the client was not configured with.
    #[error("endpoint {0} is not configured")]
    UnknownEndpoint(Endpoint),
    /// Client configuration lists no endpoints.
    #[error("no endpoints configured")]
    NoEndpoints,
    /// Serialized (non-raw) values were requested.
    #[error("only raw mode is supported")]
    RawModeRequired,
    /// Pool limit set to a value the pool cannot operate with.
    #[error("{field} must be at least 1")]
    InvalidPoolLimit { field: &'static str },
}
