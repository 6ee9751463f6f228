use super::node::Node;
use super::partitioner::KeyPartitioner;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};

/// Number of partitions in every namespace.
pub const PARTITIONS: usize = 4096;

/// Replica grid, regimes and consistency mode of one namespace.
///
/// Slots hold non-owning references: a node dropped from the cluster leaves
/// its slots unresolved instead of being kept alive by the map. A published
/// value is never modified; tend clones it, updates the clone and swaps the
/// whole value in.
#[derive(Debug, Clone)]
pub struct Partitions {
    replicas: Vec<Vec<Option<Weak<Node>>>>,
    sc_mode: bool,
    regimes: Vec<u32>,
}

impl Partitions {
    pub fn new(partition_count: usize, replica_count: usize, sc_mode: bool) -> Self {
        Self {
            replicas: vec![vec![None; partition_count]; replica_count],
            sc_mode,
            regimes: vec![0; partition_count],
        }
    }

    pub fn partition_count(&self) -> usize {
        self.regimes.len()
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Whether the namespace runs in strong-consistency mode.
    pub fn sc_mode(&self) -> bool {
        self.sc_mode
    }

    pub fn set_sc_mode(&mut self, sc_mode: bool) {
        self.sc_mode = sc_mode;
    }

    /// Grows or truncates the replica rows. Existing rows are kept as is and
    /// new rows start unassigned.
    pub fn set_replica_count(&mut self, replica_count: usize) {
        if self.replicas.len() < replica_count {
            let missing = replica_count - self.replicas.len();
            self.replicas
                .extend(std::iter::repeat_n(vec![None; PARTITIONS], missing));
        } else {
            self.replicas.truncate(replica_count);
        }
    }

    pub fn regime(&self, partition_id: usize) -> Option<u32> {
        self.regimes.get(partition_id).copied()
    }

    pub fn regimes(&self) -> &[u32] {
        &self.regimes
    }

    /// Length of each replica row, in row order.
    pub fn row_lengths(&self) -> Vec<usize> {
        self.replicas.iter().map(Vec::len).collect()
    }

    /// The node currently assigned to a slot, if it is still alive.
    pub fn node(&self, replica: usize, partition_id: usize) -> Option<Arc<Node>> {
        self.replicas
            .get(replica)?
            .get(partition_id)?
            .as_ref()?
            .upgrade()
    }

    /// Assigns `node` to a slot when `regime` is not older than the stored one.
    ///
    /// Returns false when the update is stale or out of range; the previous
    /// assignment is kept in that case.
    pub fn update(
        &mut self,
        replica: usize,
        partition_id: usize,
        node: &Arc<Node>,
        regime: u32,
    ) -> bool {
        let Some(stored) = self.regimes.get(partition_id).copied() else {
            return false;
        };
        let Some(slot) = self
            .replicas
            .get_mut(replica)
            .and_then(|row| row.get_mut(partition_id))
        else {
            return false;
        };
        if regime < stored {
            return false;
        }

        *slot = Some(Arc::downgrade(node));
        if regime > stored {
            self.regimes[partition_id] = regime;
        }
        true
    }

    /// Drops every reference held by the grid.
    pub(crate) fn clear(&mut self) {
        self.replicas.clear();
        self.regimes.clear();
    }

    /// Node names per slot of one replica row, `None` for unresolved slots.
    pub(crate) fn row_names(&self, replica: usize) -> Vec<Option<String>> {
        self.replicas
            .get(replica)
            .map(|row| {
                row.iter()
                    .map(|slot| {
                        slot.as_ref()
                            .and_then(Weak::upgrade)
                            .map(|n| n.name().to_string())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Addresses one partition of one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub namespace: String,
    pub partition_id: u32,
}

impl Partition {
    pub fn new(namespace: impl Into<String>, partition_id: u32) -> Self {
        Self {
            namespace: namespace.into(),
            partition_id,
        }
    }

    /// Resolves the partition owning `key` within `set_name`.
    pub fn for_key(
        namespace: impl Into<String>,
        set_name: &str,
        key: &[u8],
        partitioner: &dyn KeyPartitioner,
    ) -> Self {
        Self::new(namespace, partitioner.partition_id(set_name, key))
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.partition_id)
    }
}

/// Which replica a command is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReplicaPolicy {
    /// Always the master.
    #[default]
    Master,
    /// Round-robin across master and replicas.
    MasterProles,
    /// Master first, then walk the replicas on each retry.
    Sequence,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::config::ClusterConfig;
    use crate::cluster::in_memory::InMemoryConnector;
    use crate::connection::Host;

    fn node(name: &str) -> Arc<Node> {
        Arc::new(Node::new(
            name.to_string(),
            Host::new(name, 3000),
            &ClusterConfig::default(),
            Arc::new(InMemoryConnector::new()),
        ))
    }

    #[test]
    fn test_clone_is_independent() {
        let a = node("A");
        let b = node("B");
        let mut source = Partitions::new(PARTITIONS, 2, false);
        assert!(source.update(0, 7, &a, 3));

        let mut copy = source.clone();
        assert!(copy.update(0, 7, &b, 4));
        assert!(copy.update(1, 8, &b, 0));

        assert_eq!(source.node(0, 7).unwrap().name(), "A");
        assert_eq!(source.regime(7), Some(3));
        assert!(source.node(1, 8).is_none());

        assert!(source.update(0, 9, &a, 1));
        assert!(copy.node(0, 9).is_none());
        assert_eq!(copy.node(0, 7).unwrap().name(), "B");
        assert_eq!(copy.regime(7), Some(4));
    }

    #[test]
    fn test_replica_growth_keeps_existing_rows() {
        let a = node("A");
        let mut parts = Partitions::new(PARTITIONS, 1, false);
        parts.update(0, 0, &a, 1);

        parts.set_replica_count(3);
        assert_eq!(parts.replica_count(), 3);
        assert_eq!(parts.row_lengths(), vec![PARTITIONS; 3]);
        assert_eq!(parts.node(0, 0).unwrap().name(), "A");
        assert!(parts.node(2, 0).is_none());
    }

    #[test]
    fn test_replica_shrink_truncates_only() {
        let a = node("A");
        let b = node("B");
        let mut parts = Partitions::new(PARTITIONS, 3, false);
        parts.update(0, 5, &a, 1);
        parts.update(1, 5, &b, 1);
        parts.update(2, 5, &a, 1);

        parts.set_replica_count(2);
        assert_eq!(parts.replica_count(), 2);
        assert_eq!(parts.node(0, 5).unwrap().name(), "A");
        assert_eq!(parts.node(1, 5).unwrap().name(), "B");
        assert_eq!(parts.regime(5), Some(1));
    }

    #[test]
    fn test_stale_regime_is_rejected() {
        let a = node("A");
        let b = node("B");
        let mut parts = Partitions::new(PARTITIONS, 1, true);
        assert!(parts.update(0, 1, &a, 10));

        assert!(!parts.update(0, 1, &b, 9));
        assert_eq!(parts.node(0, 1).unwrap().name(), "A");
        assert_eq!(parts.regime(1), Some(10));

        assert!(parts.update(0, 1, &b, 10));
        assert_eq!(parts.node(0, 1).unwrap().name(), "B");
    }

    #[test]
    fn test_out_of_range_update_is_ignored() {
        let a = node("A");
        let mut parts = Partitions::new(PARTITIONS, 1, false);
        assert!(!parts.update(1, 0, &a, 1));
        assert!(!parts.update(0, PARTITIONS, &a, 1));
    }

    #[test]
    fn test_dropped_node_leaves_slot_unresolved() {
        let mut parts = Partitions::new(PARTITIONS, 1, false);
        {
            let temp = node("T");
            parts.update(0, 3, &temp, 1);
            assert!(parts.node(0, 3).is_some());
        }
        assert!(parts.node(0, 3).is_none());
    }

    mod regime_properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn regime_fencing_accepts_only_newer_or_equal(stored in 0u32..1000, incoming in 0u32..1000) {
                let old = node("OLD");
                let new = node("NEW");
                let mut parts = Partitions::new(PARTITIONS, 1, false);
                prop_assert!(parts.update(0, 42, &old, stored));

                let accepted = parts.update(0, 42, &new, incoming);
                prop_assert_eq!(accepted, incoming >= stored);

                let owner = parts.node(0, 42).unwrap();
                if accepted {
                    prop_assert_eq!(owner.name(), "NEW");
                    prop_assert_eq!(parts.regime(42), Some(incoming));
                } else {
                    prop_assert_eq!(owner.name(), "OLD");
                    prop_assert_eq!(parts.regime(42), Some(stored));
                }
            }
        }
    }
}
