//! # Client Errors
//!
//! One taxonomy for every operation. Miss outcomes (`NOT_STORED`,
//! `NOT_FOUND`, an empty `END`) are ordinary return values and never appear
//! here.
//!
//! | variant           | origin                          | connection |
//! |-------------------|---------------------------------|------------|
//! | `InvalidArgument` | caller input, checked locally   | untouched  |
//! | `Protocol`        | reply outside the command grammar | discarded |
//! | `Timeout`         | read/write/connect deadline     | discarded  |
//! | `Io`              | reset, refused, other socket I/O | discarded |
//! | `PoolExhausted`   | endpoint pool at `max_total`    | none held  |

use std::io;

use memc_common::{ArgumentError, Endpoint};
use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Reason attached to `ERROR`, `CLIENT_ERROR` and `SERVER_ERROR` replies.
pub const SERVER_ERROR_REASON: &str = "server error";

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Caller error detected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ArgumentError),
    /// The server sent text that does not fit the command's reply grammar.
    #[error("protocol error ({reason}): {line:?}")]
    Protocol { reason: &'static str, line: String },
    /// No reply within the configured deadline.
    #[error("timed out: {0}")]
    Timeout(#[source] io::Error),
    /// Network failure while connecting, reading or writing.
    #[error("io error: {0}")]
    Io(#[source] io::Error),
    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool for {endpoint} exhausted")]
    PoolExhausted { endpoint: Endpoint },
}

impl ClientError {
    /// Builds a protocol error capturing the offending line.
    pub(crate) fn protocol(reason: &'static str, line: &[u8]) -> Self {
        ClientError::Protocol {
            reason,
            line: String::from_utf8_lossy(line).into_owned(),
        }
    }

    /// Returns true when the connection that produced this error must not be
    /// reused.
    pub fn invalidates_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol { .. } | ClientError::Timeout(_) | ClientError::Io(_)
        )
    }

    /// Returns true for transport-level failures that a caller may retry.
    ///
    /// The request may already have been applied when this is true, so only
    /// `get`, `stats` and `delete` are safe to retry. Retrying `incr`/`decr`
    /// can apply the delta twice.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout(_) | ClientError::Io(_) | ClientError::PoolExhausted { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout(_))
    }

    /// Message carried by an `ERROR`/`CLIENT_ERROR`/`SERVER_ERROR` reply.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ClientError::Protocol { reason, line } if *reason == SERVER_ERROR_REASON => {
                Some(line.as_str())
            }
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            // Socket timeouts surface as WouldBlock on Unix and TimedOut on Windows.
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ClientError::Timeout(err),
            // Only `read_exact` on a data block produces this.
            io::ErrorKind::UnexpectedEof => ClientError::protocol("connection closed mid-reply", b""),
            _ => ClientError::Io(err),
        }
    }
}
