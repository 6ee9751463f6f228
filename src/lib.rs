// ============================================================================
// routecore: partition routing and cluster topology for database clients
// ============================================================================

//! Tracks which node owns which partition of a database cluster, keeps that
//! view fresh in the background and picks a pooled connection to the right
//! node for every command.
//!
//! Connecting through the in-memory collaborators and routing a key:
//!
//! ```
//! use std::sync::Arc;
//! use routecore::cluster::in_memory::{InMemoryConnector, InMemoryInfoClient};
//! use routecore::{
//!     Cluster, ClusterConfig, Host, NamespaceOwnership, PARTITIONS, Partition,
//!     PartitionBitmap, StablePartitioner,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> routecore::Result<()> {
//! let seed = Host::new("10.0.0.1", 3000);
//! let info = InMemoryInfoClient::new();
//! info.register_node(seed.clone(), "A").await?;
//! info.set_ownership(&seed, vec![NamespaceOwnership {
//!     namespace: "test".to_string(),
//!     sc_mode: false,
//!     regime: 1,
//!     replicas: vec![PartitionBitmap::all(PARTITIONS)],
//! }]).await?;
//!
//! let cluster = Cluster::connect(
//!     ClusterConfig::new(vec![seed]),
//!     Arc::new(info),
//!     Arc::new(InMemoryConnector::new()),
//! )
//! .await?;
//!
//! let partition = Partition::for_key("test", "users", b"alice", &StablePartitioner);
//! assert_eq!(cluster.get_master_node(&partition)?.name(), "A");
//! cluster.close().await;
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod command;
pub mod connection;
pub mod core;

// Re-export the error model
pub use crate::core::{
    CommandKind, ConstError, ERR_CLUSTER_CLOSED, ERR_CLUSTER_IS_EMPTY, ERR_CONNECTION_POOL_EMPTY,
    ERR_CONNECTION_POOL_EXHAUSTED, ERR_INVALID_PARAM, ERR_INVALID_PARTITION_MAP,
    ERR_MAX_RETRIES_EXCEEDED, ERR_NET_TIMEOUT, ERR_NETWORK, ERR_SERVER_NOT_AVAILABLE, ERR_TIMEOUT,
    ERR_TOO_MANY_CONNECTIONS_FOR_NODE, ERR_TOO_MANY_OPENING_CONNECTIONS, Error, OperationType,
    Result, ResultCode, chain_errors, matches, parse_info_error,
};

// Re-export routing and topology
pub use cluster::{
    Cluster, ClusterState,
    config::ClusterConfig,
    info::{InfoClient, NamespaceOwnership, NodeInfo, PartitionBitmap},
    node::Node,
    partition::{PARTITIONS, Partition, Partitions, ReplicaPolicy},
    partition_map::{PartitionMap, ValidationReport},
    partitioner::{KeyPartitioner, StablePartitioner},
    tend::TendReport,
};

// Re-export connection API
pub use connection::{
    Connection, Connector, Host, TcpConnector, TransportKind,
    config::{ConfigError, PoolConfig},
    pool::{ConnectionPool, PoolStats, PooledConnection},
};

pub use command::{Command, CommandPolicy, NoRetry, RetryDecision, RetryPolicy};
