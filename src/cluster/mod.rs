//! Cluster membership, partition routing and the background tend.

pub mod config;
pub mod in_memory;
pub mod info;
pub mod node;
pub mod partition;
pub mod partition_map;
pub mod partitioner;
pub mod tend;
mod worker;

use crate::connection::{Connector, Host};
use crate::core::{ERR_CLUSTER_CLOSED, ERR_CLUSTER_IS_EMPTY, Error, Result, ResultCode};
use arc_swap::ArcSwap;
use config::ClusterConfig;
use info::InfoClient;
use node::Node;
use partition::{Partition, Partitions, ReplicaPolicy};
use partition_map::PartitionMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{Level, event};
use worker::TendWorker;

/// Lifecycle of a cluster. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClusterState {
    Initializing,
    Running,
    Closed,
}

impl ClusterState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ClusterState::Initializing,
            1 => ClusterState::Running,
            _ => ClusterState::Closed,
        }
    }
}

/// Client view of a database cluster.
///
/// Owns the node list and the per-namespace partition map. Both are published
/// as whole values: the node list through an atomic pointer swap and each
/// namespace through a map entry replace. Command-path lookups never wait on
/// a tend in progress.
pub struct Cluster {
    config: ClusterConfig,
    info: Arc<dyn InfoClient>,
    connector: Arc<dyn Connector>,
    seeds: RwLock<Vec<Host>>,
    nodes: ArcSwap<Vec<Arc<Node>>>,
    partition_map: PartitionMap,
    generation: AtomicU64,
    state: AtomicU8,
    tend_lock: tokio::sync::Mutex<()>,
    tend_wakeup: Arc<Notify>,
    replica_cursor: AtomicUsize,
    worker: Mutex<Option<TendWorker>>,
}

impl Cluster {
    /// Validates `config`, runs a first tend against the seeds and starts the
    /// background tend.
    ///
    /// With `fail_if_not_connected` set, a cluster that found no node is
    /// closed again and the error returned.
    pub async fn connect(
        config: ClusterConfig,
        info: Arc<dyn InfoClient>,
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<Cluster>> {
        config.validate()?;

        let cluster = Arc::new(Cluster {
            seeds: RwLock::new(config.seeds.clone()),
            config,
            info,
            connector,
            nodes: ArcSwap::from_pointee(Vec::new()),
            partition_map: PartitionMap::new(),
            generation: AtomicU64::new(0),
            state: AtomicU8::new(ClusterState::Initializing as u8),
            tend_lock: tokio::sync::Mutex::new(()),
            tend_wakeup: Arc::new(Notify::new()),
            replica_cursor: AtomicUsize::new(0),
            worker: Mutex::new(None),
        });

        let report = cluster.tend_now().await?;
        if cluster.nodes.load().is_empty() && cluster.config.fail_if_not_connected {
            cluster.close().await;
            let seeds: Vec<String> = cluster.seeds().iter().map(Host::to_string).collect();
            return Err(Error::new(
                ResultCode::ServerNotAvailable,
                format!(
                    "Failed to connect to host(s): [{}]; {}",
                    seeds.join(", "),
                    report.failures.join("; ")
                ),
            )
            .wrap(ERR_CLUSTER_IS_EMPTY.err()));
        }

        let worker = worker::spawn_tend_worker(
            Arc::downgrade(&cluster),
            cluster.config.tend_interval,
            cluster.tend_wakeup.clone(),
        );
        *cluster
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(worker);

        event!(
            Level::INFO,
            nodes = cluster.nodes.load().len(),
            namespaces = cluster.partition_map.len(),
            "cluster connected"
        );
        Ok(cluster)
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn state(&self) -> ClusterState {
        ClusterState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ClusterState::Closed
    }

    /// True while at least one node is known and the cluster is open.
    pub fn is_connected(&self) -> bool {
        !self.is_closed() && !self.nodes.load().is_empty()
    }

    /// Bumped every time the node list changes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn seeds(&self) -> Vec<Host> {
        self.seeds
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Adds a seed used when every known node is gone.
    pub fn add_seed(&self, host: Host) {
        let mut seeds = self
            .seeds
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !seeds.contains(&host) {
            seeds.push(host);
        }
    }

    /// Current node list.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.load().to_vec()
    }

    pub fn node_by_name(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.load().iter().find(|n| n.name() == name).cloned()
    }

    pub fn partition_map(&self) -> &PartitionMap {
        &self.partition_map
    }

    /// Published partitions of one namespace.
    pub fn partitions(&self, namespace: &str) -> Option<Arc<Partitions>> {
        self.partition_map.get(namespace)
    }

    /// Structural check of the whole partition map.
    pub fn validate(&self) -> Result<()> {
        self.partition_map.validate()
    }

    /// Wakes the background tend ahead of its schedule.
    pub fn request_tend(&self) {
        self.tend_wakeup.notify_one();
    }

    /// The master of `partition`.
    pub fn get_master_node(&self, partition: &Partition) -> Result<Arc<Node>> {
        self.get_node(partition, ReplicaPolicy::Master, 0)
    }

    /// Round-robins across the master and its replicas.
    pub fn get_master_proles_node(&self, partition: &Partition) -> Result<Arc<Node>> {
        self.get_node(partition, ReplicaPolicy::MasterProles, 0)
    }

    /// Picks the node serving `partition` under `policy`.
    ///
    /// Namespaces in strong-consistency mode never fall back: an unassigned
    /// or inactive candidate, or a partition whose regime is still zero,
    /// fails with an invalid-node error.
    pub fn get_node(
        &self,
        partition: &Partition,
        policy: ReplicaPolicy,
        iteration: u32,
    ) -> Result<Arc<Node>> {
        if self.is_closed() {
            return Err(ERR_CLUSTER_CLOSED.err());
        }
        if self.nodes.load().is_empty() {
            return Err(ERR_CLUSTER_IS_EMPTY.err());
        }

        let partitions = self.partition_map.get(&partition.namespace).ok_or_else(|| {
            Error::new(
                ResultCode::InvalidNamespace,
                format!("Partition map empty for namespace `{}`", partition.namespace),
            )
        })?;

        let pid = partition.partition_id as usize;
        if pid >= partitions.partition_count() {
            return Err(Error::new(
                ResultCode::ParameterError,
                format!(
                    "partition id {} out of range for namespace `{}`",
                    partition.partition_id, partition.namespace
                ),
            ));
        }
        if partitions.sc_mode() && partitions.regime(pid) == Some(0) {
            return Err(self.invalid_node(partition));
        }

        let replica_count = partitions.replica_count();
        if replica_count == 0 {
            return Err(self.invalid_node(partition));
        }

        match policy {
            ReplicaPolicy::Master => match partitions.node(0, pid) {
                Some(node) if node.is_active() => Ok(node),
                _ => Err(self.invalid_node(partition)),
            },
            ReplicaPolicy::MasterProles => {
                for _ in 0..replica_count {
                    let replica = self.replica_cursor.fetch_add(1, Ordering::Relaxed) % replica_count;
                    match partitions.node(replica, pid) {
                        Some(node) if node.is_active() => return Ok(node),
                        _ if partitions.sc_mode() => return Err(self.invalid_node(partition)),
                        _ => {}
                    }
                }
                Err(self.invalid_node(partition))
            }
            ReplicaPolicy::Sequence => {
                let start = iteration as usize % replica_count;
                for offset in 0..replica_count {
                    let replica = (start + offset) % replica_count;
                    match partitions.node(replica, pid) {
                        Some(node) if node.is_active() => return Ok(node),
                        _ if partitions.sc_mode() => return Err(self.invalid_node(partition)),
                        _ => {}
                    }
                }
                Err(self.invalid_node(partition))
            }
        }
    }

    fn invalid_node(&self, partition: &Partition) -> Error {
        if self.nodes.load().is_empty() {
            return ERR_CLUSTER_IS_EMPTY.err();
        }
        Error::new(
            ResultCode::InvalidNode,
            format!("Node not found for partition {} in partition table.", partition),
        )
    }

    /// Stops tend, force-closes every node's connections and releases the
    /// partition map. Idempotent.
    pub async fn close(&self) {
        if self.state.swap(ClusterState::Closed as u8, Ordering::SeqCst) == ClusterState::Closed as u8
        {
            return;
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            worker.stop().await;
        }

        let _tend = self.tend_lock.lock().await;
        let nodes = self.nodes.swap(Arc::new(Vec::new()));
        for node in nodes.iter() {
            node.close_connections();
            node.deactivate();
        }
        self.partition_map.cleanup();

        event!(Level::INFO, nodes = nodes.len(), "cluster closed");
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("nodes", &self.nodes.load().len())
            .field("namespaces", &self.partition_map.len())
            .finish()
    }
}
