use crate::connection::Host;
use crate::core::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identity and peer list reported by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    #[serde(default)]
    pub peers: Vec<Host>,
    /// Bumped by the node whenever its partition ownership changes.
    pub partition_generation: u32,
}

/// Set of partition ids, one bit per partition.
///
/// Decoding rejects a bit vector too short for the partition count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPartitionBitmap")]
pub struct PartitionBitmap {
    partition_count: usize,
    bits: Vec<u8>,
}

#[derive(Deserialize)]
struct RawPartitionBitmap {
    partition_count: usize,
    bits: Vec<u8>,
}

impl TryFrom<RawPartitionBitmap> for PartitionBitmap {
    type Error = String;

    fn try_from(raw: RawPartitionBitmap) -> std::result::Result<Self, Self::Error> {
        let needed = raw.partition_count.div_ceil(8);
        if raw.bits.len() < needed {
            return Err(format!(
                "partition bitmap holds {} bytes, {} partitions need {}",
                raw.bits.len(),
                raw.partition_count,
                needed
            ));
        }
        Ok(Self {
            partition_count: raw.partition_count,
            bits: raw.bits,
        })
    }
}

impl PartitionBitmap {
    pub fn new(partition_count: usize) -> Self {
        Self {
            partition_count,
            bits: vec![0; partition_count.div_ceil(8)],
        }
    }

    pub fn all(partition_count: usize) -> Self {
        let mut bitmap = Self::new(partition_count);
        for pid in 0..partition_count {
            bitmap.insert(pid);
        }
        bitmap
    }

    pub fn from_ids(partition_count: usize, ids: impl IntoIterator<Item = usize>) -> Self {
        let mut bitmap = Self::new(partition_count);
        for pid in ids {
            bitmap.insert(pid);
        }
        bitmap
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    /// Ids beyond the partition count are ignored.
    pub fn insert(&mut self, partition_id: usize) {
        if partition_id >= self.partition_count {
            return;
        }
        if let Some(byte) = self.bits.get_mut(partition_id / 8) {
            *byte |= 0x80 >> (partition_id % 8);
        }
    }

    pub fn contains(&self, partition_id: usize) -> bool {
        partition_id < self.partition_count
            && self
                .bits
                .get(partition_id / 8)
                .is_some_and(|byte| byte & (0x80 >> (partition_id % 8)) != 0)
    }

    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.partition_count).filter(|pid| self.contains(*pid))
    }

    pub fn len(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|b| *b == 0)
    }
}

/// Partitions one node owns in one namespace.
///
/// `replicas[0]` holds the partitions the node is master for, `replicas[i]`
/// those it holds the i-th replica of. The row count is the namespace's
/// replica count as the node sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceOwnership {
    pub namespace: String,
    #[serde(default)]
    pub sc_mode: bool,
    #[serde(default)]
    pub regime: u32,
    pub replicas: Vec<PartitionBitmap>,
}

impl NamespaceOwnership {
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }
}

/// Source of topology information for tend.
///
/// Production clients answer these over the info protocol; tests plug in an
/// in-memory cluster.
#[async_trait]
pub trait InfoClient: Send + Sync {
    async fn node_info(&self, host: &Host) -> Result<NodeInfo>;

    async fn partition_ownership(&self, host: &Host) -> Result<Vec<NamespaceOwnership>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_membership() {
        let bitmap = PartitionBitmap::from_ids(4096, [0, 7, 8, 4095, 5000]);
        assert!(bitmap.contains(0));
        assert!(bitmap.contains(7));
        assert!(bitmap.contains(8));
        assert!(bitmap.contains(4095));
        assert!(!bitmap.contains(1));
        assert!(!bitmap.contains(5000));
        assert_eq!(bitmap.len(), 4);
        assert_eq!(bitmap.ids().collect::<Vec<_>>(), vec![0, 7, 8, 4095]);
    }

    #[test]
    fn test_short_bitmap_is_rejected_on_decode() {
        let err = serde_json::from_str::<PartitionBitmap>(r#"{"partition_count":4096,"bits":[]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("4096 partitions need 512"));

        let ok: PartitionBitmap =
            serde_json::from_str(r#"{"partition_count":16,"bits":[128,1]}"#).unwrap();
        assert_eq!(ok.ids().collect::<Vec<_>>(), vec![0, 15]);
    }

    #[test]
    fn test_short_ownership_row_is_rejected_on_decode() {
        let json = r#"{"namespace":"test","regime":1,"replicas":[{"partition_count":4096,"bits":[255]}]}"#;
        assert!(serde_json::from_str::<NamespaceOwnership>(json).is_err());
    }

    #[test]
    fn test_bitmap_all() {
        let bitmap = PartitionBitmap::all(4096);
        assert_eq!(bitmap.len(), 4096);
        assert!(!PartitionBitmap::new(16).contains(3));
        assert!(PartitionBitmap::new(16).is_empty());
    }

    #[test]
    fn test_ownership_json() {
        let ownership = NamespaceOwnership {
            namespace: "test".to_string(),
            sc_mode: true,
            regime: 3,
            replicas: vec![PartitionBitmap::from_ids(16, [1, 2])],
        };
        let json = serde_json::to_string(&ownership).unwrap();
        let parsed: NamespaceOwnership = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ownership);
        assert_eq!(parsed.replica_count(), 1);
    }
}
