use super::{Connection, Connector, Host, TransportKind, config::PoolConfig};
use crate::core::{
    ERR_CONNECTION_POOL_EMPTY, ERR_CONNECTION_POOL_EXHAUSTED, ERR_NET_TIMEOUT, ERR_NETWORK,
    ERR_TOO_MANY_CONNECTIONS_FOR_NODE, ERR_TOO_MANY_OPENING_CONNECTIONS, Error, Result,
    ResultCode,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, watch};
use tracing::{Level, event};

/// Bounded pool of transport connections to one node.
///
/// `total` counts every connection the pool is responsible for: idle ones,
/// checked-out ones and reservations for connections still being opened.
pub struct ConnectionPool {
    host: Host,
    transport: TransportKind,
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<PoolShared>,
}

struct PoolShared {
    idle: Mutex<IdleSet>,
    total: AtomicUsize,
    opening: AtomicUsize,
    opened: AtomicU64,
    discarded: AtomicU64,
    returned: Notify,
    /// Flips to true on force-close; in-flight I/O watches it.
    closing: watch::Sender<bool>,
}

struct IdleSet {
    connections: VecDeque<IdleConnection>,
    closed: bool,
}

/// A connection sitting in the idle set
struct IdleConnection {
    connection: Box<dyn Connection>,
    created_at: Instant,
    last_used: Instant,
}

impl IdleConnection {
    fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        if let Some(lifetime) = max_lifetime {
            self.created_at.elapsed() > lifetime
        } else {
            false
        }
    }

    fn is_idle_too_long(&self, idle_timeout: Option<Duration>) -> bool {
        if let Some(timeout) = idle_timeout {
            self.last_used.elapsed() > timeout
        } else {
            false
        }
    }

    fn is_reusable(&self, config: &PoolConfig) -> bool {
        self.connection.is_usable()
            && !self.is_expired(config.max_lifetime)
            && !self.is_idle_too_long(config.idle_timeout)
    }
}

impl PoolShared {
    fn lock_idle(&self) -> std::sync::MutexGuard<'_, IdleSet> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.lock_idle().closed
    }

    /// Drops one connection from the books and wakes a waiter.
    fn forget_one(&self) {
        self.total.fetch_sub(1, Ordering::SeqCst);
        self.discarded.fetch_add(1, Ordering::Relaxed);
        self.returned.notify_one();
    }

    fn put(&self, mut connection: Box<dyn Connection>, created_at: Instant, usable: bool) {
        let mut idle = self.lock_idle();
        if usable && connection.is_usable() && !idle.closed {
            idle.connections.push_back(IdleConnection {
                connection,
                created_at,
                last_used: Instant::now(),
            });
            drop(idle);
            self.returned.notify_one();
        } else {
            drop(idle);
            connection.close();
            self.forget_one();
        }
    }
}

impl ConnectionPool {
    pub fn new(
        host: Host,
        transport: TransportKind,
        config: PoolConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            host,
            transport,
            config,
            connector,
            shared: Arc::new(PoolShared {
                idle: Mutex::new(IdleSet {
                    connections: VecDeque::new(),
                    closed: false,
                }),
                total: AtomicUsize::new(0),
                opening: AtomicUsize::new(0),
                opened: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                returned: Notify::new(),
                closing: watch::Sender::new(false),
            }),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Connections currently owned by the pool, idle or checked out.
    pub fn connection_count(&self) -> usize {
        self.shared.total.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Get a connection from the pool.
    ///
    /// Reuses an idle connection when one is available, otherwise opens a new
    /// one while under `max_connections`. Fails with a distinct error when the
    /// pool is empty and may not open on demand, when too many connections are
    /// already opening, or when the pool is at capacity.
    pub async fn get(&self) -> Result<PooledConnection> {
        let deadline = self.config.acquire_timeout.map(|t| Instant::now() + t);

        loop {
            let returned = self.shared.returned.notified();

            if let Some(idle) = self.take_idle()? {
                return Ok(self.guard(idle.connection, idle.created_at));
            }

            if self.shared.total.load(Ordering::SeqCst) < self.config.max_connections {
                if !self.config.open_on_demand {
                    return Err(ERR_CONNECTION_POOL_EMPTY.err());
                }
                if let Some(connection) = self.open_connection().await? {
                    return Ok(self.guard(connection, Instant::now()));
                }
                // Lost the race for the last slot; fall through to the capacity path.
            }

            let Some(deadline) = deadline else {
                return Err(ERR_TOO_MANY_CONNECTIONS_FOR_NODE.err());
            };
            if tokio::time::timeout_at(deadline.into(), returned)
                .await
                .is_err()
            {
                return Err(ERR_CONNECTION_POOL_EXHAUSTED.err());
            }
        }
    }

    /// Opens connections until the pool holds at least `min_connections`.
    ///
    /// Runs off the request path; failures stop the fill and are left for the
    /// next round. Expired idle connections are reaped first.
    pub async fn fill(&self) -> usize {
        self.reap_idle();

        let mut opened = 0;
        while self.shared.total.load(Ordering::SeqCst) < self.config.min_connections {
            match self.open_connection().await {
                Ok(Some(connection)) => {
                    self.shared.put(connection, Instant::now(), true);
                    opened += 1;
                }
                Ok(None) => break,
                Err(err) => {
                    event!(
                        Level::DEBUG,
                        host = %self.host,
                        error = %err,
                        "connection pool fill stopped"
                    );
                    break;
                }
            }
        }
        opened
    }

    /// Force-closes every connection the pool tracks.
    ///
    /// Idle connections are closed immediately. Checked-out connections have
    /// any read or write in progress aborted with a network error, their
    /// transport closed on the spot, and refuse further I/O. The pool does not
    /// reopen.
    pub fn close_connections(&self) -> usize {
        let drained: Vec<IdleConnection> = {
            let mut idle = self.shared.lock_idle();
            idle.closed = true;
            idle.connections.drain(..).collect()
        };
        self.shared.closing.send_replace(true);

        let count = drained.len();
        for mut idle in drained {
            idle.connection.close();
            self.shared.forget_one();
        }
        self.shared.returned.notify_waiters();
        count
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let idle = self.shared.lock_idle().connections.len();
        let total = self.shared.total.load(Ordering::SeqCst);
        PoolStats {
            host: self.host.to_string(),
            transport: self.transport,
            total_connections: total,
            idle_connections: idle,
            in_use_connections: total.saturating_sub(idle),
            opening_connections: self.shared.opening.load(Ordering::SeqCst),
            max_connections: self.config.max_connections,
            opened_total: self.shared.opened.load(Ordering::Relaxed),
            discarded_total: self.shared.discarded.load(Ordering::Relaxed),
        }
    }

    fn guard(&self, connection: Box<dyn Connection>, created_at: Instant) -> PooledConnection {
        PooledConnection {
            connection: Some(connection),
            created_at,
            usable: true,
            shared: self.shared.clone(),
        }
    }

    /// Pops the first reusable idle connection, closing stale ones on the way.
    fn take_idle(&self) -> Result<Option<IdleConnection>> {
        let mut stale = Vec::new();
        let found = {
            let mut idle = self.shared.lock_idle();
            if idle.closed {
                return Err(self.closed_error());
            }
            let mut found = None;
            while let Some(candidate) = idle.connections.pop_front() {
                if candidate.is_reusable(&self.config) {
                    found = Some(candidate);
                    break;
                }
                stale.push(candidate);
            }
            found
        };

        for mut candidate in stale {
            candidate.connection.close();
            self.shared.forget_one();
        }
        Ok(found)
    }

    fn reap_idle(&self) {
        let stale: Vec<IdleConnection> = {
            let mut idle = self.shared.lock_idle();
            let (keep, stale): (VecDeque<_>, VecDeque<_>) = idle
                .connections
                .drain(..)
                .partition(|c| c.is_reusable(&self.config));
            idle.connections = keep;
            stale.into_iter().collect()
        };

        for mut candidate in stale {
            candidate.connection.close();
            self.shared.forget_one();
        }
    }

    /// Opens one connection within the opening throttle and capacity.
    ///
    /// Returns `Ok(None)` when the capacity slot was taken concurrently.
    async fn open_connection(&self) -> Result<Option<Box<dyn Connection>>> {
        let shared = &self.shared;

        if shared
            .opening
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.config.max_opening_connections).then_some(n + 1)
            })
            .is_err()
        {
            return Err(ERR_TOO_MANY_OPENING_CONNECTIONS.err());
        }

        if shared
            .total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.config.max_connections).then_some(n + 1)
            })
            .is_err()
        {
            shared.opening.fetch_sub(1, Ordering::SeqCst);
            return Ok(None);
        }

        let result = tokio::time::timeout(
            self.config.connect_timeout,
            self.connector.connect(&self.host, self.transport),
        )
        .await;
        shared.opening.fetch_sub(1, Ordering::SeqCst);

        let mut connection = match result {
            Ok(Ok(connection)) => connection,
            Ok(Err(err)) => {
                shared.total.fetch_sub(1, Ordering::SeqCst);
                shared.returned.notify_one();
                return Err(Error::from(err));
            }
            Err(_) => {
                shared.total.fetch_sub(1, Ordering::SeqCst);
                shared.returned.notify_one();
                return Err(ERR_NET_TIMEOUT.err());
            }
        };

        if shared.is_closed() {
            connection.close();
            shared.total.fetch_sub(1, Ordering::SeqCst);
            return Err(self.closed_error());
        }

        shared.opened.fetch_add(1, Ordering::Relaxed);
        event!(
            Level::DEBUG,
            host = %self.host,
            connection_id = connection.id(),
            "connection opened"
        );
        Ok(Some(connection))
    }

    fn closed_error(&self) -> Error {
        Error::new(
            ResultCode::ServerNotAvailable,
            format!("connection pool for {} is closed", self.host),
        )
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub host: String,
    pub transport: TransportKind,
    pub total_connections: usize,
    pub idle_connections: usize,
    pub in_use_connections: usize,
    pub opening_connections: usize,
    pub max_connections: usize,
    pub opened_total: u64,
    pub discarded_total: u64,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool {} ({:?}): {}/{} in use, {} idle, {} opening, max {}",
            self.host,
            self.transport,
            self.in_use_connections,
            self.total_connections,
            self.idle_connections,
            self.opening_connections,
            self.max_connections
        )
    }
}

/// RAII guard for a checked-out connection.
///
/// Returns the connection to the idle set when dropped, unless it was marked
/// unusable or the pool was closed meanwhile; then it is closed and the pool's
/// count decremented.
pub struct PooledConnection {
    connection: Option<Box<dyn Connection>>,
    created_at: Instant,
    usable: bool,
    shared: Arc<PoolShared>,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .field("created_at", &self.created_at)
            .field("usable", &self.usable)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    pub fn id(&self) -> u64 {
        self.connection.as_ref().map(|c| c.id()).unwrap_or_default()
    }

    /// Flags the connection so it is closed instead of reused.
    pub fn mark_unusable(&mut self) {
        self.usable = false;
    }

    pub fn is_usable(&self) -> bool {
        self.usable
            && self.connection.as_ref().is_some_and(|c| c.is_usable())
            && !self.shared.is_closed()
    }

    /// Writes the whole buffer. Any failure marks the connection unusable.
    ///
    /// A force-close of the pool aborts the write.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut closing = self.shared.closing.subscribe();
        let connection = self.live_connection()?;
        let result = tokio::select! {
            result = connection.write_all(buf) => Some(result),
            _ = closing.wait_for(|closed| *closed) => None,
        };
        self.settle(result)
    }

    /// Fills the whole buffer. Any failure marks the connection unusable.
    ///
    /// A force-close of the pool aborts the read.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut closing = self.shared.closing.subscribe();
        let connection = self.live_connection()?;
        let result = tokio::select! {
            result = connection.read_exact(buf) => Some(result),
            _ = closing.wait_for(|closed| *closed) => None,
        };
        self.settle(result)
    }

    fn live_connection(&mut self) -> Result<&mut Box<dyn Connection>> {
        if self.shared.is_closed() {
            return Err(self.force_closed());
        }
        self.connection.as_mut().ok_or_else(|| ERR_NETWORK.err())
    }

    /// `None` means the pool was force-closed while the I/O was in flight.
    fn settle(&mut self, result: Option<std::io::Result<()>>) -> Result<()> {
        match result {
            Some(result) => result.map_err(|err| {
                self.usable = false;
                Error::from(err)
            }),
            None => Err(self.force_closed()),
        }
    }

    /// Closes the transport now instead of waiting for the guard to drop.
    fn force_closed(&mut self) -> Error {
        self.usable = false;
        if let Some(mut connection) = self.connection.take() {
            connection.close();
            self.shared.forget_one();
        }
        ERR_NETWORK.err().wrap(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "connection was force-closed",
        ))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.shared.put(connection, self.created_at, self.usable);
        }
    }
}
