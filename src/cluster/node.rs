use super::config::ClusterConfig;
use crate::connection::pool::{ConnectionPool, PoolStats, PooledConnection};
use crate::connection::{Connector, Host, TransportKind};
use crate::core::{Error, Result, ResultCode};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// A server in the cluster and the connection pools that reach it.
///
/// Nodes are owned by the cluster's node list. Everything else, including
/// the partition map and errors, refers to a node by reference or by name.
pub struct Node {
    name: String,
    host: Host,
    aliases: RwLock<Vec<Host>>,
    active: AtomicBool,
    tend_failures: AtomicU32,
    command_errors: AtomicU64,
    partition_generation: AtomicI64,
    namespaces: Mutex<BTreeSet<String>>,
    pools: HashMap<TransportKind, ConnectionPool>,
}

impl Node {
    pub(crate) fn new(
        name: String,
        host: Host,
        config: &ClusterConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let pools = config
            .transports
            .iter()
            .map(|transport| {
                (
                    *transport,
                    ConnectionPool::new(
                        host.clone(),
                        *transport,
                        config.pool.clone(),
                        connector.clone(),
                    ),
                )
            })
            .collect();

        Self {
            name,
            host,
            aliases: RwLock::new(Vec::new()),
            active: AtomicBool::new(true),
            tend_failures: AtomicU32::new(0),
            command_errors: AtomicU64::new(0),
            partition_generation: AtomicI64::new(-1),
            namespaces: Mutex::new(BTreeSet::new()),
            pools,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Other addresses that answered as this node.
    pub fn aliases(&self) -> Vec<Host> {
        self.aliases
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether `host` is the node's primary address or one of its aliases.
    pub fn has_host(&self, host: &Host) -> bool {
        &self.host == host
            || self
                .aliases
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .contains(host)
    }

    pub(crate) fn add_alias(&self, host: Host) -> bool {
        if self.has_host(&host) {
            return false;
        }
        self.aliases
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(host);
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Consecutive tend rounds this node failed to answer.
    pub fn failures(&self) -> u32 {
        self.tend_failures.load(Ordering::SeqCst)
    }

    pub(crate) fn record_failure(&self) -> u32 {
        self.tend_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn reset_failures(&self) {
        self.tend_failures.store(0, Ordering::SeqCst);
    }

    pub fn command_errors(&self) -> u64 {
        self.command_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn record_command_error(&self) {
        self.command_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Last partition generation applied to the map, -1 before the first.
    pub fn partition_generation(&self) -> i64 {
        self.partition_generation.load(Ordering::SeqCst)
    }

    pub(crate) fn set_partition_generation(&self, generation: u32) {
        self.partition_generation
            .store(generation as i64, Ordering::SeqCst);
    }

    /// Namespaces the node reported in its last ownership refresh.
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub(crate) fn set_namespaces(&self, namespaces: impl IntoIterator<Item = String>) {
        let mut guard = self
            .namespaces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = namespaces.into_iter().collect();
    }

    /// Checks out a connection on the given transport.
    ///
    /// Every failure, including pool exhaustion, is attributed to this node.
    pub async fn get_connection(&self, transport: TransportKind) -> Result<PooledConnection> {
        if !self.is_active() {
            return Err(Error::new(
                ResultCode::InvalidNode,
                format!("node {} is no longer active", self.name),
            )
            .in_node(self.name.clone()));
        }
        let pool = self.pools.get(&transport).ok_or_else(|| {
            Error::new(
                ResultCode::ParameterError,
                format!("transport {:?} is not enabled", transport),
            )
            .in_node(self.name.clone())
        })?;
        pool.get().await.map_err(|err| err.in_node(self.name.clone()))
    }

    /// Connections currently held across all pools.
    pub fn connection_count(&self) -> usize {
        self.pools.values().map(ConnectionPool::connection_count).sum()
    }

    /// Force-closes every pool; returns how many idle connections were closed.
    pub fn close_connections(&self) -> usize {
        self.pools
            .values()
            .map(ConnectionPool::close_connections)
            .sum()
    }

    pub(crate) async fn fill_pools(&self) -> usize {
        let mut opened = 0;
        for pool in self.pools.values() {
            opened += pool.fill().await;
        }
        opened
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.pools.values().map(ConnectionPool::stats).collect()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.host)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("active", &self.is_active())
            .field("failures", &self.failures())
            .field("partition_generation", &self.partition_generation())
            .finish()
    }
}
