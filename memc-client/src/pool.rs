//! # Connection Pool
//!
//! Purpose: Reuse TCP connections to one endpoint to avoid a handshake per
//! request, while guaranteeing a socket is used by one caller at a time.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: At most `max_total` sockets per endpoint, of
//!    which up to `max_idle` are kept for reuse.
//! 2. **Short Critical Sections**: The mutex guards only the idle queue and
//!    the slot counter; sockets are dialed and used outside it.
//! 3. **Fail Fast**: A full pool yields `PoolExhausted` instead of waiting.
//! 4. **Discard on Doubt**: A connection that saw a timeout, I/O or protocol
//!    error is closed, never returned; the next acquire opens a fresh one.

use std::collections::VecDeque;
use std::io::{self, BufReader, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use memc_common::Endpoint;
use tracing::{debug, warn};

use crate::ascii::Request;
use crate::error::{ClientError, ClientResult};
use crate::metrics::ClientMetrics;

/// Buffered read side of a connection, handed to reply readers.
pub type ConnReader = BufReader<TcpStream>;

/// Pool configuration for one endpoint.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub endpoint: Endpoint,
    /// Idle sockets kept for reuse; extra ones are closed on release.
    pub max_idle: usize,
    /// Upper bound on open sockets, idle and checked out together.
    pub max_total: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    metrics: Arc<ClientMetrics>,
}

impl PoolInner {
    // A panic while holding the lock leaves the counters intact, so poisoning
    // is ignored.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_slot(&self) {
        let mut state = self.lock();
        state.total = state.total.saturating_sub(1);
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.lock();
        if state.idle.len() < self.config.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }
}

/// Connection pool handle for a single endpoint.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates an empty pool; sockets are opened lazily on first acquire.
    pub fn new(config: PoolConfig, metrics: Arc<ClientMetrics>) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
        };
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
                metrics,
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.config.endpoint
    }

    /// Acquires a connection, reusing an idle one when available.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        if let Some(conn) = self.pop_idle() {
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        if !self.try_reserve() {
            return Err(ClientError::PoolExhausted {
                endpoint: self.endpoint().clone(),
            });
        }

        match Connection::connect(&self.inner.config) {
            Ok(conn) => {
                self.inner.metrics.record_connection_opened();
                debug!(endpoint = %self.endpoint(), "opened connection");
                Ok(PooledConnection::new(self.inner.clone(), conn))
            }
            Err(err) => {
                self.inner.release_slot();
                warn!(endpoint = %self.endpoint(), error = %err, "connect failed");
                Err(err)
            }
        }
    }

    /// Sends `quit` on every idle connection and closes it.
    ///
    /// Connections currently in use are unaffected.
    pub fn close_idle(&self) -> usize {
        let drained: Vec<Connection> = {
            let mut state = self.inner.lock();
            let drained: Vec<Connection> = state.idle.drain(..).collect();
            state.total = state.total.saturating_sub(drained.len());
            drained
        };
        let closed = drained.len();
        for mut conn in drained {
            // The socket is closed right after; a failed goodbye changes nothing.
            let _ = conn.send(&Request::Quit);
        }
        debug!(endpoint = %self.endpoint(), closed, "closed idle connections");
        closed
    }

    fn pop_idle(&self) -> Option<Connection> {
        self.inner.lock().idle.pop_front()
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.inner.lock();
        if state.total >= self.inner.config.max_total {
            return false;
        }
        state.total += 1;
        true
    }
}

/// Checked-out connection; goes back to the idle queue on drop unless it
/// was invalidated.
///
/// Holding one gives exclusive use of the socket, so a request and its reply
/// can never interleave with another caller's.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Writes `request` and reads its reply with `read`.
    pub fn exec<T>(
        &mut self,
        request: &Request<'_>,
        read: impl FnOnce(&mut ConnReader, &mut Vec<u8>) -> ClientResult<T>,
    ) -> ClientResult<T> {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.exec(request, read),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "connection released").into()),
        };
        result.map_err(|err| self.invalidate(err))
    }

    /// Marks the connection unusable if `err` requires it, then hands the
    /// error back.
    pub fn invalidate(&mut self, err: ClientError) -> ClientError {
        if err.invalidates_connection() && self.valid {
            self.valid = false;
            warn!(endpoint = %self.pool.config.endpoint, error = %err, "discarding connection");
        }
        err
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if self.valid {
            self.pool.return_connection(conn);
        } else {
            self.pool.metrics.record_connection_discarded();
            self.pool.release_slot();
        }
    }
}

/// One memcache socket plus its framing buffers.
struct Connection {
    reader: ConnReader,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn connect(config: &PoolConfig) -> ClientResult<Self> {
        let stream = connect_stream(config)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        stream.set_nodelay(true)?;

        Ok(Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }

    fn send(&mut self, request: &Request<'_>) -> ClientResult<()> {
        self.write_buf.clear();
        request.encode(&mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(())
    }

    fn exec<T>(
        &mut self,
        request: &Request<'_>,
        read: impl FnOnce(&mut ConnReader, &mut Vec<u8>) -> ClientResult<T>,
    ) -> ClientResult<T> {
        self.send(request)?;
        read(&mut self.reader, &mut self.line_buf)
    }
}

fn connect_stream(config: &PoolConfig) -> ClientResult<TcpStream> {
    let addrs = config.endpoint.resolve()?;
    let mut last_err = None;
    for addr in addrs {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err
        .unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} resolved to no addresses", config.endpoint),
            )
        })
        .into())
}
