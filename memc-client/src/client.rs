//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for issuing memcache text-protocol
//! commands to one or more explicitly configured servers.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `MemcacheClient` hides pooling and protocol details.
//! 2. **Borrow-Friendly API**: Accept `&[u8]` to avoid unnecessary copies.
//! 3. **Misses Are Values**: `NOT_STORED`, `NOT_FOUND` and empty `END` map to
//!    `false`/`None`; only failures become `ClientError`.
//! 4. **Fail Fast**: Keys are validated before a connection is touched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use memc_common::{validate_key, ArgumentError, Endpoint, Expiry, Item, StatsSnapshot, StoreMode};
use tracing::{debug, debug_span, info};

use crate::ascii::{self, Request, Status};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::pool::{ConnReader, ConnectionPool, PoolConfig};

/// Blocking memcache client with one connection pool per endpoint.
///
/// Each call acquires a connection for the target endpoint, executes one
/// command, and returns the connection to the pool. The client is
/// `Send + Sync`; share it behind an `Arc` across threads.
pub struct MemcacheClient {
    endpoints: Vec<Endpoint>,
    pools: HashMap<Endpoint, ConnectionPool>,
    metrics: Arc<ClientMetrics>,
}

impl MemcacheClient {
    /// Creates a client for a single `host[:port]` with default settings.
    pub fn connect(endpoint: &str) -> ClientResult<Self> {
        let endpoint: Endpoint = endpoint.parse()?;
        Self::with_config(ClientConfig::with_endpoints([endpoint]))
    }

    /// Creates a client with a custom configuration.
    ///
    /// No socket is opened here; connections are established on first use.
    /// Duplicate endpoints share one pool.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;

        let metrics = Arc::new(ClientMetrics::new());
        let mut endpoints = Vec::with_capacity(config.endpoints.len());
        let mut pools = HashMap::with_capacity(config.endpoints.len());
        for endpoint in &config.endpoints {
            if pools.contains_key(endpoint) {
                continue;
            }
            let pool = ConnectionPool::new(
                PoolConfig {
                    endpoint: endpoint.clone(),
                    max_idle: config.max_idle,
                    max_total: config.max_total,
                    read_timeout: config.read_timeout,
                    write_timeout: config.write_timeout,
                    connect_timeout: config.connect_timeout,
                },
                Arc::clone(&metrics),
            );
            endpoints.push(endpoint.clone());
            pools.insert(endpoint.clone(), pool);
        }

        info!(endpoints = endpoints.len(), max_total = config.max_total, "memcache client ready");
        Ok(MemcacheClient {
            endpoints,
            pools,
            metrics,
        })
    }

    /// Configured endpoints in configuration order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Fetches a fresh statistics snapshot from one server.
    pub fn stats(&self, endpoint: &Endpoint) -> ClientResult<StatsSnapshot> {
        self.exec(endpoint, Request::Stats, ascii::read_stats, Ok)
    }

    /// Fetches statistics from every configured endpoint, in order.
    pub fn stats_all(&self) -> ClientResult<Vec<(Endpoint, StatsSnapshot)>> {
        self.endpoints
            .iter()
            .map(|endpoint| self.stats(endpoint).map(|stats| (endpoint.clone(), stats)))
            .collect()
    }

    /// Invalidates every item on one server.
    pub fn flush_all(&self, endpoint: &Endpoint) -> ClientResult<()> {
        self.exec_status(endpoint, Request::FlushAll, |status| match status {
            Status::Ok => Some(()),
            _ => None,
        })
    }

    /// Flushes every configured endpoint, stopping at the first failure.
    pub fn flush_all_endpoints(&self) -> ClientResult<()> {
        self.endpoints
            .iter()
            .try_for_each(|endpoint| self.flush_all(endpoint))
    }

    /// Stores a value unconditionally. Returns false only if the server
    /// declined with `NOT_STORED`.
    pub fn set(&self, endpoint: &Endpoint, key: &[u8], value: &[u8], expiry: Expiry) -> ClientResult<bool> {
        self.store(endpoint, StoreMode::Set, key, value, 0, expiry)
    }

    /// Stores a value only if the key is absent.
    pub fn add(&self, endpoint: &Endpoint, key: &[u8], value: &[u8], expiry: Expiry) -> ClientResult<bool> {
        self.store(endpoint, StoreMode::Add, key, value, 0, expiry)
    }

    /// Stores a value only if the key is present.
    pub fn replace(&self, endpoint: &Endpoint, key: &[u8], value: &[u8], expiry: Expiry) -> ClientResult<bool> {
        self.store(endpoint, StoreMode::Replace, key, value, 0, expiry)
    }

    /// Issues a storage command with explicit client flags.
    ///
    /// `STORED` maps to `true`, `NOT_STORED` to `false`.
    pub fn store(
        &self,
        endpoint: &Endpoint,
        mode: StoreMode,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expiry: Expiry,
    ) -> ClientResult<bool> {
        validate_key(key)?;
        let request = Request::Store {
            mode,
            key,
            flags,
            exptime: expiry.as_secs(),
            value,
        };
        let stored = self.exec_status(endpoint, request, |status| match status {
            Status::Stored => Some(true),
            Status::NotStored => Some(false),
            _ => None,
        })?;
        if !stored {
            self.metrics.record_miss();
        }
        Ok(stored)
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&self, endpoint: &Endpoint, key: &[u8]) -> ClientResult<Option<Bytes>> {
        Ok(self.get_item(endpoint, key)?.map(|item| item.data))
    }

    /// Fetches a value together with its flags.
    pub fn get_item(&self, endpoint: &Endpoint, key: &[u8]) -> ClientResult<Option<Item>> {
        validate_key(key)?;
        let keys = [key];
        let item = self.exec(endpoint, Request::Get { keys: &keys }, ascii::read_values, |items| {
            let mut items = items.into_iter();
            match (items.next(), items.next()) {
                (None, _) => Ok(None),
                (Some(item), None) if item.key.as_ref() == key => Ok(Some(item)),
                (Some(item), _) => Err(ClientError::protocol("unexpected VALUE key", &item.key)),
            }
        })?;
        if item.is_none() {
            self.metrics.record_miss();
        }
        Ok(item)
    }

    /// Fetches several keys with one request.
    ///
    /// Only hits are returned, in the order the server sent them.
    pub fn get_multi(&self, endpoint: &Endpoint, keys: &[&[u8]]) -> ClientResult<Vec<Item>> {
        for key in keys {
            validate_key(key)?;
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.exec(endpoint, Request::Get { keys }, ascii::read_values, Ok)
    }

    /// Adds `delta` to a numeric value. Returns the new value, or `None` if
    /// the key is missing.
    ///
    /// Not idempotent: after a timeout or I/O error the server may already
    /// have applied the delta, so do not retry blindly.
    pub fn incr(&self, endpoint: &Endpoint, key: &[u8], delta: u64) -> ClientResult<Option<u64>> {
        validate_key(key)?;
        self.counter(endpoint, Request::Incr { key, delta })
    }

    /// Subtracts `delta` from a numeric value; servers clamp at zero.
    ///
    /// Same retry caveat as [`MemcacheClient::incr`].
    pub fn decr(&self, endpoint: &Endpoint, key: &[u8], delta: u64) -> ClientResult<Option<u64>> {
        validate_key(key)?;
        self.counter(endpoint, Request::Decr { key, delta })
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn delete(&self, endpoint: &Endpoint, key: &[u8]) -> ClientResult<bool> {
        validate_key(key)?;
        let deleted = self.exec_status(endpoint, Request::Delete { key }, |status| match status {
            Status::Deleted => Some(true),
            Status::NotFound => Some(false),
            _ => None,
        })?;
        if !deleted {
            self.metrics.record_miss();
        }
        Ok(deleted)
    }

    /// Returns the server's version string.
    pub fn version(&self, endpoint: &Endpoint) -> ClientResult<String> {
        self.exec_status(endpoint, Request::Version, |status| match status {
            Status::Version(text) => Some(text.clone()),
            _ => None,
        })
    }

    /// Says `quit` to and closes every idle connection of an endpoint.
    /// Returns how many were closed.
    pub fn close_idle(&self, endpoint: &Endpoint) -> ClientResult<usize> {
        Ok(self.pool(endpoint)?.close_idle())
    }

    /// Returns a snapshot of the client-side counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn counter(&self, endpoint: &Endpoint, request: Request<'_>) -> ClientResult<Option<u64>> {
        let value = self.exec_status(endpoint, request, |status| match status {
            Status::Number(value) => Some(Some(*value)),
            Status::NotFound => Some(None),
            _ => None,
        })?;
        if value.is_none() {
            self.metrics.record_miss();
        }
        Ok(value)
    }

    fn pool(&self, endpoint: &Endpoint) -> ClientResult<&ConnectionPool> {
        self.pools
            .get(endpoint)
            .ok_or_else(|| ArgumentError::UnknownEndpoint(endpoint.clone()).into())
    }

    /// Runs a command whose reply is one status line.
    fn exec_status<U>(
        &self,
        endpoint: &Endpoint,
        request: Request<'_>,
        accept: impl FnOnce(&Status) -> Option<U>,
    ) -> ClientResult<U> {
        self.exec(endpoint, request, ascii::read_status, |status| {
            accept(&status).ok_or_else(|| status.unexpected())
        })
    }

    /// Sends `request`, reads the reply with `read`, and lets `interpret`
    /// turn it into the caller's type. Any error from `interpret` discards
    /// the connection.
    fn exec<T, U>(
        &self,
        endpoint: &Endpoint,
        request: Request<'_>,
        read: impl FnOnce(&mut ConnReader, &mut Vec<u8>) -> ClientResult<T>,
        interpret: impl FnOnce(T) -> ClientResult<U>,
    ) -> ClientResult<U> {
        let pool = self.pool(endpoint)?;
        let span = debug_span!("memcache", command = request.name(), endpoint = %endpoint);
        let _enter = span.enter();

        let started = Instant::now();
        self.metrics.record_request_start();
        let result = pool.acquire().and_then(|mut conn| {
            let reply = conn.exec(&request, read)?;
            interpret(reply).map_err(|err| conn.invalidate(err))
        });
        let elapsed = started.elapsed();
        self.metrics.record_request_end(elapsed);

        match &result {
            Ok(_) => debug!(elapsed_us = elapsed.as_micros() as u64, "ok"),
            Err(err) => {
                self.metrics.record_error();
                debug!(error = %err, "failed");
            }
        }
        result
    }
}
