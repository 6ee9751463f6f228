use super::partition::{PARTITIONS, Partitions};
use crate::core::{ERR_INVALID_PARTITION_MAP, Error, Result, ResultCode, chain_errors};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Namespace name to published `Partitions`.
///
/// Each namespace is replaced as a whole. Readers take a cheap `Arc` handle
/// and keep seeing that value even if tend publishes a newer one meanwhile.
#[derive(Default)]
pub struct PartitionMap {
    namespaces: DashMap<String, Arc<Partitions>>,
}

impl PartitionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<Partitions>> {
        self.namespaces.get(namespace).map(|entry| entry.value().clone())
    }

    /// Publishes `partitions` for `namespace`, replacing any previous value.
    pub fn set(&self, namespace: impl Into<String>, partitions: Partitions) {
        self.namespaces.insert(namespace.into(), Arc::new(partitions));
    }

    pub fn delete(&self, namespace: &str) -> bool {
        self.namespaces.remove(namespace).is_some()
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Namespace names, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Point-in-time copy of every entry, sorted by namespace.
    ///
    /// Holds no lock once it returns, so callers may iterate while tend keeps
    /// publishing.
    pub fn snapshot(&self) -> Vec<(String, Arc<Partitions>)> {
        let mut entries: Vec<(String, Arc<Partitions>)> = self
            .namespaces
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Deep copy: the new map owns fresh grids and regime vectors.
    pub fn deep_clone(&self) -> PartitionMap {
        let cloned = PartitionMap::new();
        for (namespace, partitions) in self.snapshot() {
            cloned.set(namespace, (*partitions).clone());
        }
        cloned
    }

    /// Releases every namespace. Grids still held by in-flight readers are
    /// freed once those readers let go.
    pub fn cleanup(&self) {
        let drained: Vec<Arc<Partitions>> = self
            .namespaces
            .iter()
            .map(|e| e.value().clone())
            .collect();
        self.namespaces.clear();
        for partitions in drained {
            if let Ok(mut partitions) = Arc::try_unwrap(partitions) {
                partitions.clear();
            }
        }
    }
}

// Validation and rendering live in their own files.
include!("partition_map/validation.rs");
include!("partition_map/display.rs");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::config::ClusterConfig;
    use crate::cluster::in_memory::InMemoryConnector;
    use crate::cluster::node::Node;
    use crate::connection::Host;

    fn node(name: &str) -> Arc<Node> {
        Arc::new(Node::new(
            name.to_string(),
            Host::new(name, 3000),
            &ClusterConfig::default(),
            Arc::new(InMemoryConnector::new()),
        ))
    }

    fn fully_mapped(node: &Arc<Node>, replicas: usize) -> Partitions {
        let mut parts = Partitions::new(PARTITIONS, replicas, false);
        for replica in 0..replicas {
            for pid in 0..PARTITIONS {
                parts.update(replica, pid, node, 1);
            }
        }
        parts
    }

    #[test]
    fn test_empty_namespace_reports_every_missing_master() {
        let map = PartitionMap::new();
        map.set("test", Partitions::new(PARTITIONS, 2, false));

        let report = map.validation_report();
        assert_eq!(report.missing_masters["test"].len(), PARTITIONS);
        assert_eq!(report.missing_replicas["test"].len(), PARTITIONS);
        assert!(report.structural.is_empty());

        let err = map.validate().unwrap_err();
        assert!(err.is(&ERR_INVALID_PARTITION_MAP));
        assert_eq!(err.code(), ResultCode::InvalidClusterPartitionMap);
        assert!(err.matches(&[ResultCode::CommonError]));
        assert!(
            err.to_string()
                .contains("Master partition nodes not defined for namespace `test`: 4096 out of 4096")
        );
    }

    #[test]
    fn test_fully_mapped_namespace_validates() {
        let a = node("A");
        let map = PartitionMap::new();
        map.set("test", fully_mapped(&a, 2));

        assert!(map.validation_report().is_valid());
        assert!(map.validate().is_ok());
        assert!(map.get("test").unwrap().node(0, 4095).is_some());
    }

    #[test]
    fn test_wrong_partition_count_is_structural() {
        let map = PartitionMap::new();
        map.set("short", Partitions::new(100, 1, false));

        let report = map.validation_report();
        assert_eq!(report.structural.len(), 2);
        assert!(report.structural[0].contains("Wrong number of regimes for namespace `short`"));
        assert!(map.validate().is_err());
    }

    #[test]
    fn test_partial_map_stays_usable() {
        let a = node("A");
        let mut parts = Partitions::new(PARTITIONS, 1, false);
        for pid in 0..10 {
            parts.update(0, pid, &a, 1);
        }
        let map = PartitionMap::new();
        map.set("test", parts);

        assert!(map.validate().is_err());
        assert_eq!(map.get("test").unwrap().node(0, 3).unwrap().name(), "A");
        assert_eq!(
            map.validation_report().missing_masters["test"].len(),
            PARTITIONS - 10
        );
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let a = node("A");
        let b = node("B");
        let map = PartitionMap::new();
        map.set("test", fully_mapped(&a, 1));

        let cloned = map.deep_clone();
        let mut changed = (*cloned.get("test").unwrap()).clone();
        changed.update(0, 0, &b, 2);
        cloned.set("test", changed);

        assert_eq!(map.get("test").unwrap().node(0, 0).unwrap().name(), "A");
        assert_eq!(cloned.get("test").unwrap().node(0, 0).unwrap().name(), "B");
    }

    #[test]
    fn test_reader_keeps_old_value_across_replace() {
        let a = node("A");
        let b = node("B");
        let map = PartitionMap::new();
        map.set("test", fully_mapped(&a, 1));

        let held = map.get("test").unwrap();
        map.set("test", fully_mapped(&b, 1));

        assert_eq!(held.node(0, 1).unwrap().name(), "A");
        assert_eq!(map.get("test").unwrap().node(0, 1).unwrap().name(), "B");
    }

    #[test]
    fn test_snapshot_delete_and_cleanup() {
        let map = PartitionMap::new();
        map.set("b", Partitions::new(PARTITIONS, 1, false));
        map.set("a", Partitions::new(PARTITIONS, 1, true));

        let names: Vec<String> = map.snapshot().into_iter().map(|(ns, _)| ns).collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(map.delete("b"));
        assert!(!map.delete("b"));
        assert_eq!(map.namespaces(), vec!["a"]);

        map.cleanup();
        assert!(map.is_empty());
    }

    #[test]
    fn test_display_groups_ranges() {
        let a = node("A");
        let mut parts = Partitions::new(PARTITIONS, 1, true);
        for pid in 0..2048 {
            parts.update(0, pid, &a, 3);
        }
        let map = PartitionMap::new();
        map.set("test", parts);

        let rendered = map.to_string();
        assert!(rendered.contains("Namespace: test"));
        assert!(rendered.contains("SCMode: true"));
        assert!(rendered.contains("MASTER: 0-2047/A, 2048-4095/nil"));
    }
}
