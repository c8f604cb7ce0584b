//! # Client Data Model
//!
//! Types shared between the memcache client and its callers: where to send a
//! request (`Endpoint`), what a key may contain, how long an item lives
//! (`Expiry`), and what comes back (`Item`, `StatsSnapshot`).
//!
//! ## Design Principles
//!
//! 1. **Validate Early**: Key and endpoint rules are checked before any I/O so
//!    caller mistakes never reach the server.
//! 2. **Immutable Addresses**: `Endpoint` exposes accessors only; once parsed
//!    it cannot drift away from the pool it keys.
//! 3. **Raw Values**: Payloads stay opaque `Bytes`; no serialization layer.
//!
//! ## Key Rules
//!
//! ```text
//! 1..=250 bytes, no ASCII whitespace, no control bytes
//! "00000001"      ok
//! "user 42"       rejected (space splits the command line)
//! "a\r\nflush_all" rejected (would inject a second command)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ArgResult, ArgumentError};

/// Maximum key size in bytes accepted by memcache servers.
pub const MAX_KEY_LEN: usize = 250;

/// Port used when an endpoint string omits one.
pub const DEFAULT_PORT: u16 = 11211;

/// Address of one cache server.
///
/// Parsed from `host`, `host:port`, `[v6]:port` or a bare IPv6 literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Builds an endpoint from parts.
    ///
    /// # Errors
    /// Returns `ArgumentError::InvalidEndpoint` for an empty host or one that
    /// contains whitespace.
    pub fn new(host: impl Into<String>, port: u16) -> ArgResult<Self> {
        let host = host.into();
        if host.is_empty() || host.chars().any(|c| c.is_whitespace()) {
            return Err(ArgumentError::InvalidEndpoint(host));
        }
        Ok(Endpoint { host, port })
    }

    /// Host name or IP literal, without brackets.
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves the endpoint to socket addresses (DNS for host names).
    pub fn resolve(&self) -> std::io::Result<Vec<SocketAddr>> {
        Ok((self.host.as_str(), self.port).to_socket_addrs()?.collect())
    }
}

impl FromStr for Endpoint {
    type Err = ArgumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ArgumentError::InvalidEndpoint(s.to_string());
        let s = s.trim();

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match tail {
                "" => DEFAULT_PORT,
                _ => parse_port(tail.strip_prefix(':').ok_or_else(invalid)?).ok_or_else(invalid)?,
            };
            return Endpoint::new(host, port).map_err(|_| invalid());
        }

        // More than one colon without brackets: bare IPv6 literal.
        if s.matches(':').count() > 1 {
            return Endpoint::new(s, DEFAULT_PORT).map_err(|_| invalid());
        }

        match s.split_once(':') {
            Some((host, port)) => {
                let port = parse_port(port).ok_or_else(invalid)?;
                Endpoint::new(host, port).map_err(|_| invalid())
            }
            None => Endpoint::new(s, DEFAULT_PORT).map_err(|_| invalid()),
        }
    }
}

fn parse_port(raw: &str) -> Option<u16> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

impl TryFrom<String> for Endpoint {
    type Error = ArgumentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Checks a key against the protocol's framing rules.
///
/// # Errors
/// - `EmptyKey` for a zero-length key
/// - `KeyTooLong` above `MAX_KEY_LEN`
/// - `InvalidKeyByte` for whitespace or control bytes
///
/// # Examples
/// ```rust
/// use memc_common::{validate_key, ArgumentError, MAX_KEY_LEN};
///
/// assert!(validate_key(b"00000001").is_ok());
/// let too_long = vec![b'k'; MAX_KEY_LEN + 1];
/// assert_eq!(validate_key(&too_long), Err(ArgumentError::KeyTooLong { len: MAX_KEY_LEN + 1 }));
/// ```
pub fn validate_key(key: &[u8]) -> ArgResult<()> {
    if key.is_empty() {
        return Err(ArgumentError::EmptyKey);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ArgumentError::KeyTooLong { len: key.len() });
    }
    if let Some(offset) = key
        .iter()
        .position(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(ArgumentError::InvalidKeyByte {
            byte: key[offset],
            offset,
        });
    }
    Ok(())
}

/// Item lifetime in seconds; zero means the item never expires.
///
/// The value is sent verbatim. Servers treat values above 30 days as an
/// absolute Unix timestamp, which this type does not reinterpret.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expiry(u32);

impl Expiry {
    /// No expiration.
    pub const NEVER: Expiry = Expiry(0);

    #[inline]
    pub const fn from_secs(secs: u32) -> Self {
        Expiry(secs)
    }

    #[inline]
    pub const fn as_secs(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_never(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Expiry {
    fn from(secs: u32) -> Self {
        Expiry(secs)
    }
}

/// Storage command variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreMode {
    /// Store unconditionally.
    Set,
    /// Store only when the key is absent.
    Add,
    /// Store only when the key is present.
    Replace,
}

impl StoreMode {
    /// Command verb as written on the wire.
    pub const fn verb(self) -> &'static str {
        match self {
            StoreMode::Set => "set",
            StoreMode::Add => "add",
            StoreMode::Replace => "replace",
        }
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// One `VALUE` block returned by a retrieval command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: Bytes,
    /// Opaque client flags stored alongside the value.
    pub flags: u32,
    pub data: Bytes,
}

/// Statistics reported by one server for one `stats` call.
///
/// Values are kept as the server sent them; numeric helpers parse on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatsSnapshot {
    stats: BTreeMap<String, String>,
}

impl StatsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one `STAT <name> <value>` entry; later entries win.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.stats.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.stats.get(name).map(String::as_str)
    }

    /// Parses a stat as an unsigned integer.
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(|value| value.parse().ok())
    }

    /// Number of items currently stored on the server.
    pub fn curr_items(&self) -> Option<u64> {
        self.get_u64("curr_items")
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Iterates stats in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.stats.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for StatsSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        StatsSnapshot {
            stats: iter.into_iter().collect(),
        }
    }
}
