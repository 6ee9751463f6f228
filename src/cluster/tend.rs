use super::info::{NamespaceOwnership, NodeInfo};
use super::node::Node;
use super::partition::{PARTITIONS, Partitions};
use super::{Cluster, ClusterState};
use crate::connection::Host;
use crate::core::{ERR_CLUSTER_CLOSED, ERR_NET_TIMEOUT, Result};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{Instrument, Level, event, info_span};

/// What one tend tick changed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TendReport {
    /// Node list generation after the tick
    pub generation: u64,
    pub added_nodes: Vec<String>,
    pub removed_nodes: Vec<String>,
    /// Namespaces republished from fresh ownership data
    pub refreshed_namespaces: Vec<String>,
    pub removed_namespaces: Vec<String>,
    /// Partition slot updates dropped for carrying an older regime
    pub stale_updates: usize,
    /// Absorbed failures, one line each
    pub failures: Vec<String>,
}

impl TendReport {
    pub fn changed_membership(&self) -> bool {
        !self.added_nodes.is_empty() || !self.removed_nodes.is_empty()
    }
}

/// Node membership as worked out during one tick.
#[derive(Default)]
struct Membership {
    /// Nodes that answered, with what they reported.
    responded: Vec<(Arc<Node>, NodeInfo)>,
    /// Known nodes that did not answer.
    failed: Vec<Arc<Node>>,
    /// Nodes discovered during this tick.
    added: Vec<Arc<Node>>,
}

impl Cluster {
    /// Runs one tend tick now.
    ///
    /// Ticks are serialized; a call made while another tick runs waits for
    /// it. Failures talking to nodes are absorbed into the report, the last
    /// known topology is kept and the next tick retries.
    pub async fn tend_now(&self) -> Result<TendReport> {
        if self.is_closed() {
            return Err(ERR_CLUSTER_CLOSED.err());
        }
        let _tend = self.tend_lock.lock().await;
        if self.is_closed() {
            return Err(ERR_CLUSTER_CLOSED.err());
        }

        let span = info_span!("cluster.tend", generation = self.generation());
        Ok(self.run_tend().instrument(span).await)
    }

    async fn run_tend(&self) -> TendReport {
        let mut report = TendReport::default();
        let current = self.nodes.load_full();

        let mut membership = if current.is_empty() {
            let mut membership = Membership::default();
            self.discover_hosts(self.seeds(), &current, &mut membership, &mut report)
                .await;
            membership
        } else {
            self.refresh_known(&current, &mut report).await
        };

        let referenced = self.discover_peers(&current, &mut membership, &mut report).await;
        let removed = self.select_removals(&membership, &referenced);

        let active = self.publish_nodes(&current, &membership.added, &removed, &mut report);
        self.refresh_partitions(&active, &membership.responded, &mut report)
            .await;
        self.drop_abandoned_namespaces(&active, &mut report);

        if !report.refreshed_namespaces.is_empty() {
            if let Err(err) = self.partition_map.validate() {
                event!(Level::WARN, error = %err, "partition map incomplete after tend");
            }
        }

        if self.config.pool.min_connections > 0 {
            for node in active.iter() {
                let node = node.clone();
                tokio::spawn(async move {
                    node.fill_pools().await;
                });
            }
        }

        if !active.is_empty() {
            let _ = self.state.compare_exchange(
                ClusterState::Initializing as u8,
                ClusterState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }

        report.generation = self.generation();
        report
    }

    /// Queries every known node concurrently.
    async fn refresh_known(&self, current: &[Arc<Node>], report: &mut TendReport) -> Membership {
        let results = join_all(
            current
                .iter()
                .map(|node| self.with_tend_timeout(self.info.node_info(node.host()))),
        )
        .await;

        let mut membership = Membership::default();
        for (node, result) in current.iter().zip(results) {
            let outcome = match result {
                Ok(info) if info.name == node.name() => Ok(info),
                Ok(info) => Err(format!(
                    "{} now answers as node {}",
                    node.host(),
                    info.name
                )),
                Err(err) => Err(err.to_string()),
            };

            match outcome {
                Ok(info) => {
                    node.reset_failures();
                    membership.responded.push((node.clone(), info));
                }
                Err(reason) => {
                    let failures = node.record_failure();
                    event!(
                        Level::WARN,
                        node = node.name(),
                        host = %node.host(),
                        failures,
                        error = %reason,
                        "node refresh failed"
                    );
                    report.failures.push(format!("{}: {}", node, reason));
                    membership.failed.push(node.clone());
                }
            }
        }
        membership
    }

    /// Looks up peers nobody knows yet. Returns the names of every node some
    /// responding node lists as a peer.
    async fn discover_peers(
        &self,
        current: &[Arc<Node>],
        membership: &mut Membership,
        report: &mut TendReport,
    ) -> HashSet<String> {
        let peers: BTreeSet<Host> = membership
            .responded
            .iter()
            .flat_map(|(_, info)| info.peers.iter().cloned())
            .collect();

        let mut referenced = HashSet::new();
        let mut unknown = Vec::new();
        for peer in peers {
            let known = current
                .iter()
                .chain(membership.added.iter())
                .find(|node| node.has_host(&peer));
            match known {
                Some(node) => {
                    referenced.insert(node.name().to_string());
                }
                None => unknown.push(peer),
            }
        }

        referenced.extend(self.discover_hosts(unknown, current, membership, report).await);
        referenced
    }

    /// Queries `hosts` and turns new identities into nodes. A host that
    /// answers with a known name becomes an alias of that node.
    ///
    /// Returns the names of the nodes that answered.
    async fn discover_hosts(
        &self,
        hosts: Vec<Host>,
        current: &[Arc<Node>],
        membership: &mut Membership,
        report: &mut TendReport,
    ) -> Vec<String> {
        let mut answered = Vec::new();
        if hosts.is_empty() {
            return answered;
        }
        let results = join_all(
            hosts
                .iter()
                .map(|host| self.with_tend_timeout(self.info.node_info(host))),
        )
        .await;

        for (host, result) in hosts.into_iter().zip(results) {
            let info = match result {
                Ok(info) => info,
                Err(err) => {
                    event!(Level::WARN, host = %host, error = %err, "host discovery failed");
                    report.failures.push(format!("{}: {}", host, err));
                    continue;
                }
            };
            answered.push(info.name.clone());

            let existing = current
                .iter()
                .chain(membership.added.iter())
                .find(|node| node.name() == info.name)
                .cloned();
            if let Some(node) = existing {
                if node.add_alias(host.clone()) {
                    event!(Level::DEBUG, node = node.name(), alias = %host, "node alias added");
                }
                continue;
            }

            let node = Arc::new(Node::new(
                info.name.clone(),
                host,
                &self.config,
                self.connector.clone(),
            ));
            event!(Level::INFO, node = node.name(), host = %node.host(), "node added");
            report.added_nodes.push(info.name.clone());
            membership.added.push(node.clone());
            membership.responded.push((node, info));
        }
        answered
    }

    /// A failed node goes once it hits the failure limit, or right away when
    /// peers answered and none of them lists it.
    fn select_removals(&self, membership: &Membership, referenced: &HashSet<String>) -> Vec<Arc<Node>> {
        let peers_reported = membership
            .responded
            .iter()
            .any(|(_, info)| !info.peers.is_empty());

        membership
            .failed
            .iter()
            .filter(|node| {
                node.failures() >= self.config.max_tend_failures
                    || (peers_reported && !referenced.contains(node.name()))
            })
            .cloned()
            .collect()
    }

    /// Publishes the new node list. Removed nodes have their connections
    /// closed before they leave the list.
    fn publish_nodes(
        &self,
        current: &Arc<Vec<Arc<Node>>>,
        added: &[Arc<Node>],
        removed: &[Arc<Node>],
        report: &mut TendReport,
    ) -> Arc<Vec<Arc<Node>>> {
        if added.is_empty() && removed.is_empty() {
            return current.clone();
        }

        for node in removed {
            node.deactivate();
            let closed = node.close_connections();
            event!(
                Level::INFO,
                node = node.name(),
                host = %node.host(),
                closed_connections = closed,
                "node removed"
            );
            report.removed_nodes.push(node.name().to_string());
        }

        let next: Vec<Arc<Node>> = current
            .iter()
            .filter(|node| !removed.iter().any(|r| Arc::ptr_eq(r, node)))
            .chain(added.iter())
            .cloned()
            .collect();
        let next = Arc::new(next);
        self.nodes.store(next.clone());
        self.generation.fetch_add(1, Ordering::SeqCst);
        next
    }

    /// Fetches ownership from nodes whose partition generation moved and
    /// republishes every namespace they report.
    async fn refresh_partitions(
        &self,
        active: &[Arc<Node>],
        responded: &[(Arc<Node>, NodeInfo)],
        report: &mut TendReport,
    ) {
        let candidates: Vec<&(Arc<Node>, NodeInfo)> = responded
            .iter()
            .filter(|(node, info)| {
                node.is_active()
                    && active.iter().any(|a| Arc::ptr_eq(a, node))
                    && node.partition_generation() != info.partition_generation as i64
            })
            .collect();
        if candidates.is_empty() {
            return;
        }

        let results = join_all(
            candidates
                .iter()
                .map(|(node, _)| self.with_tend_timeout(self.info.partition_ownership(node.host()))),
        )
        .await;

        let mut fetched: Vec<(&Arc<Node>, u32, Vec<NamespaceOwnership>)> = Vec::new();
        for ((node, info), result) in candidates.into_iter().zip(results) {
            match result {
                Ok(ownership) => fetched.push((node, info.partition_generation, ownership)),
                Err(err) => {
                    event!(Level::WARN, node = node.name(), error = %err, "partition fetch failed");
                    report.failures.push(format!("{}: {}", node, err));
                }
            }
        }

        let mut replica_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for (_, _, ownership) in &fetched {
            for ns in ownership {
                let count = replica_counts.entry(ns.namespace.as_str()).or_default();
                *count = (*count).max(ns.replica_count());
            }
        }

        let mut working: BTreeMap<String, Partitions> = BTreeMap::new();
        for (namespace, replica_count) in &replica_counts {
            let mut partitions = match self.partition_map.get(namespace) {
                Some(published) => (*published).clone(),
                None => Partitions::new(PARTITIONS, *replica_count, false),
            };
            if partitions.replica_count() != *replica_count {
                partitions.set_replica_count(*replica_count);
            }
            working.insert(namespace.to_string(), partitions);
        }

        for (node, generation, ownership) in &fetched {
            for ns in ownership {
                let Some(partitions) = working.get_mut(&ns.namespace) else {
                    continue;
                };
                partitions.set_sc_mode(ns.sc_mode);
                let partition_count = partitions.partition_count();
                for (replica, bitmap) in ns.replicas.iter().enumerate() {
                    for pid in bitmap.ids().take_while(|pid| *pid < partition_count) {
                        if !partitions.update(replica, pid, node, ns.regime) {
                            report.stale_updates += 1;
                        }
                    }
                }
            }
            node.set_namespaces(ownership.iter().map(|ns| ns.namespace.clone()));
            node.set_partition_generation(*generation);
        }

        if report.stale_updates > 0 {
            event!(
                Level::WARN,
                stale_updates = report.stale_updates,
                "stale partition assignments discarded"
            );
        }

        for (namespace, partitions) in working {
            self.partition_map.set(namespace.clone(), partitions);
            report.refreshed_namespaces.push(namespace);
        }
    }

    /// Deletes namespaces that no active node reports any more. Skipped until
    /// some node has delivered its ownership.
    fn drop_abandoned_namespaces(&self, active: &[Arc<Node>], report: &mut TendReport) {
        if !active.iter().any(|node| node.partition_generation() >= 0) {
            return;
        }
        let live: HashSet<String> = active.iter().flat_map(|node| node.namespaces()).collect();
        for namespace in self.partition_map.namespaces() {
            if !live.contains(&namespace) && self.partition_map.delete(&namespace) {
                event!(Level::INFO, namespace = %namespace, "namespace removed");
                report.removed_namespaces.push(namespace);
            }
        }
    }

    async fn with_tend_timeout<T>(&self, query: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.tend_timeout, query).await {
            Ok(result) => result,
            Err(_) => Err(ERR_NET_TIMEOUT.err()),
        }
    }
}
