#![allow(dead_code)]

use routecore::cluster::in_memory::{InMemoryConnector, InMemoryInfoClient};
use routecore::{
    Cluster, ClusterConfig, Host, NamespaceOwnership, PARTITIONS, PartitionBitmap, PoolConfig,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub fn host(last_octet: u8) -> Host {
    Host::new(format!("10.0.0.{}", last_octet), 3000)
}

pub fn all() -> PartitionBitmap {
    PartitionBitmap::all(PARTITIONS)
}

pub fn none() -> PartitionBitmap {
    PartitionBitmap::new(PARTITIONS)
}

pub fn range(ids: std::ops::Range<usize>) -> PartitionBitmap {
    PartitionBitmap::from_ids(PARTITIONS, ids)
}

pub fn ownership(
    namespace: &str,
    regime: u32,
    sc_mode: bool,
    replicas: Vec<PartitionBitmap>,
) -> NamespaceOwnership {
    NamespaceOwnership {
        namespace: namespace.to_string(),
        sc_mode,
        regime,
        replicas,
    }
}

/// Config with a tend interval long enough that only explicit ticks run.
pub fn manual_config(seeds: Vec<Host>) -> ClusterConfig {
    ClusterConfig::new(seeds).tend_interval(Duration::from_secs(3600))
}

pub struct Fixture {
    pub info: InMemoryInfoClient,
    pub connector: Arc<InMemoryConnector>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            info: InMemoryInfoClient::new(),
            connector: Arc::new(InMemoryConnector::new()),
        }
    }

    pub async fn node(&self, host: &Host, name: &str) {
        self.info.register_node(host.clone(), name).await.unwrap();
    }

    pub async fn own(&self, host: &Host, ownership: Vec<NamespaceOwnership>) {
        self.info.set_ownership(host, ownership).await.unwrap();
    }

    pub async fn peers(&self, host: &Host, peers: Vec<Host>) {
        self.info.set_peers(host, peers).await.unwrap();
    }

    pub async fn connect(&self, config: ClusterConfig) -> Arc<Cluster> {
        self.try_connect(config).await.unwrap()
    }

    pub async fn try_connect(&self, config: ClusterConfig) -> routecore::Result<Arc<Cluster>> {
        Cluster::connect(
            config,
            Arc::new(self.info.clone()),
            self.connector.clone(),
        )
        .await
    }

    pub async fn connect_with_pool(&self, seeds: Vec<Host>, pool: PoolConfig) -> Arc<Cluster> {
        self.connect(manual_config(seeds).pool(pool)).await
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
