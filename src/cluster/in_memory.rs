//! In-memory topology and transport used to drive a cluster without sockets.

use super::info::{InfoClient, NamespaceOwnership, NodeInfo};
use crate::connection::{Connection, Connector, Host, TransportKind};
use crate::core::{ERR_NETWORK, Error, ResultCode, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Server-side state of one simulated node.
#[derive(Clone)]
struct InMemoryNode {
    info: NodeInfo,
    ownership: Vec<NamespaceOwnership>,
    reachable: bool,
}

#[derive(Default)]
struct InMemoryTopology {
    nodes: HashMap<Host, InMemoryNode>,
    aliases: HashMap<Host, Host>,
}

impl InMemoryTopology {
    fn resolve(&self, host: &Host) -> Option<&InMemoryNode> {
        let primary = self.aliases.get(host).unwrap_or(host);
        self.nodes.get(primary)
    }

    fn resolve_mut(&mut self, host: &Host) -> Result<&mut InMemoryNode> {
        let primary = self.aliases.get(host).cloned().unwrap_or_else(|| host.clone());
        self.nodes.get_mut(&primary).ok_or_else(|| {
            Error::new(
                ResultCode::ParameterError,
                format!("in-memory node '{}' is not registered", host),
            )
        })
    }
}

/// An in-memory implementation of `InfoClient` for testing.
///
/// Each registered host answers with the identity, peers and ownership set on
/// it. Updating ownership bumps the node's partition generation the way a
/// real node does after migrations.
#[derive(Clone, Default)]
pub struct InMemoryInfoClient {
    topology: Arc<Mutex<InMemoryTopology>>,
    ownership_calls: Arc<AtomicUsize>,
}

impl InMemoryInfoClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reachable node with no peers and no partitions.
    pub async fn register_node(&self, host: Host, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::new(
                ResultCode::ParameterError,
                "node name must not be empty",
            ));
        }
        let mut topology = self.topology.lock().await;
        topology.aliases.remove(&host);
        topology.nodes.insert(
            host,
            InMemoryNode {
                info: NodeInfo {
                    name,
                    peers: Vec::new(),
                    partition_generation: 0,
                },
                ownership: Vec::new(),
                reachable: true,
            },
        );
        Ok(())
    }

    /// Makes `alias` answer as the node registered at `primary`.
    pub async fn register_alias(&self, alias: Host, primary: &Host) -> Result<()> {
        let mut topology = self.topology.lock().await;
        topology.resolve_mut(primary)?;
        topology.aliases.insert(alias, primary.clone());
        Ok(())
    }

    pub async fn set_peers(&self, host: &Host, peers: Vec<Host>) -> Result<()> {
        let mut topology = self.topology.lock().await;
        topology.resolve_mut(host)?.info.peers = peers;
        Ok(())
    }

    /// Replaces the node's ownership and bumps its partition generation.
    pub async fn set_ownership(&self, host: &Host, ownership: Vec<NamespaceOwnership>) -> Result<()> {
        let mut topology = self.topology.lock().await;
        let node = topology.resolve_mut(host)?;
        node.ownership = ownership;
        node.info.partition_generation += 1;
        Ok(())
    }

    pub async fn set_reachable(&self, host: &Host, reachable: bool) -> Result<()> {
        let mut topology = self.topology.lock().await;
        topology.resolve_mut(host)?.reachable = reachable;
        Ok(())
    }

    pub async fn remove_node(&self, host: &Host) {
        let mut topology = self.topology.lock().await;
        topology.nodes.remove(host);
        topology.aliases.retain(|_, primary| primary != host);
    }

    /// Number of ownership queries answered so far.
    pub fn ownership_calls(&self) -> usize {
        self.ownership_calls.load(Ordering::SeqCst)
    }

    async fn reachable(&self, host: &Host) -> Result<InMemoryNode> {
        let topology = self.topology.lock().await;
        match topology.resolve(host) {
            Some(node) if node.reachable => Ok(node.clone()),
            _ => Err(ERR_NETWORK.err().wrap(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} is not reachable", host),
            ))),
        }
    }
}

#[async_trait]
impl InfoClient for InMemoryInfoClient {
    async fn node_info(&self, host: &Host) -> Result<NodeInfo> {
        Ok(self.reachable(host).await?.info)
    }

    async fn partition_ownership(&self, host: &Host) -> Result<Vec<NamespaceOwnership>> {
        let node = self.reachable(host).await?;
        self.ownership_calls.fetch_add(1, Ordering::SeqCst);
        Ok(node.ownership)
    }
}

/// Injected misbehaviour for connections to one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionFault {
    #[default]
    None,
    /// Writes fail with a broken pipe.
    FailWrites,
    /// Writes succeed, reads fail with a connection reset.
    FailReads,
    /// Writes succeed, reads never complete.
    StallReads,
}

struct ConnectorShared {
    next_id: AtomicU64,
    opened: AtomicUsize,
    live: DashMap<u64, Host>,
    faults: DashMap<Host, ConnectionFault>,
    written: DashMap<Host, usize>,
    refuse: AtomicBool,
    connect_delay_ms: AtomicU64,
}

/// A `Connector` whose connections loop back in memory.
///
/// Tracks every connection that is still open so tests can check that pools
/// close what they own.
pub struct InMemoryConnector {
    shared: Arc<ConnectorShared>,
}

impl Default for InMemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ConnectorShared {
                next_id: AtomicU64::new(0),
                opened: AtomicUsize::new(0),
                live: DashMap::new(),
                faults: DashMap::new(),
                written: DashMap::new(),
                refuse: AtomicBool::new(false),
                connect_delay_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Connections opened since creation.
    pub fn open_count(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed.
    pub fn live_count(&self) -> usize {
        self.shared.live.len()
    }

    pub fn live_count_for(&self, host: &Host) -> usize {
        self.shared
            .live
            .iter()
            .filter(|entry| entry.value() == host)
            .count()
    }

    /// Commands written to `host`, counted per completed write.
    pub fn writes_to(&self, host: &Host) -> usize {
        self.shared.written.get(host).map(|n| *n).unwrap_or(0)
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.shared
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn set_fault(&self, host: &Host, fault: ConnectionFault) {
        self.shared.faults.insert(host.clone(), fault);
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(
        &self,
        host: &Host,
        _transport: TransportKind,
    ) -> io::Result<Box<dyn Connection>> {
        let delay = self.shared.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} refused the connection", host),
            ));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        self.shared.live.insert(id, host.clone());
        Ok(Box::new(InMemoryConnection {
            id,
            host: host.clone(),
            shared: self.shared.clone(),
            closed: false,
        }))
    }
}

struct InMemoryConnection {
    id: u64,
    host: Host,
    shared: Arc<ConnectorShared>,
    closed: bool,
}

impl InMemoryConnection {
    fn fault(&self) -> ConnectionFault {
        self.shared
            .faults
            .get(&self.host)
            .map(|f| *f)
            .unwrap_or_default()
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_usable(&self) -> bool {
        !self.closed
    }

    async fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
        self.check_open()?;
        if self.fault() == ConnectionFault::FailWrites {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }
        *self.shared.written.entry(self.host.clone()).or_insert(0) += 1;
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.check_open()?;
        match self.fault() {
            ConnectionFault::FailReads => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
            ConnectionFault::StallReads => futures::future::pending().await,
            _ => {
                buf.fill(0);
                Ok(())
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.live.remove(&self.id);
        }
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}
