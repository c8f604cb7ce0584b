//! # memc Sync Client
//!
//! Purpose: Provide a lightweight, synchronous memcache text-protocol client
//! with per-endpoint connection pooling to minimize TCP handshake overhead.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Explicit Ownership**: The caller constructs and owns the client; there
//!    is no process-wide instance.
//! 3. **Minimal Allocation**: Reuse buffers for request framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse the ASCII protocol explicitly for correctness.
//!
//! ## Example
//!
//! ```no_run
//! use memc_client::MemcacheClient;
//! use memc_common::Expiry;
//!
//! # fn main() -> Result<(), memc_client::ClientError> {
//! let client = MemcacheClient::connect("127.0.0.1:11211")?;
//! let host = client.endpoints()[0].clone();
//! client.set(&host, b"00000001", b"1", Expiry::from_secs(180))?;
//! assert_eq!(client.incr(&host, b"00000001", 1)?, Some(2));
//! # Ok(())
//! # }
//! ```

mod ascii;
mod client;
mod config;
mod error;
mod metrics;
mod pool;

pub use client::MemcacheClient;
pub use config::{ClientConfig, ConfigError, DEFAULT_IO_TIMEOUT};
pub use error::{ClientError, ClientResult, SERVER_ERROR_REASON};
pub use metrics::{LatencySnapshot, MetricsSnapshot, DEFAULT_LATENCY_BUCKETS_US};
