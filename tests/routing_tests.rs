mod common;

use common::*;
use routecore::{
    ERR_INVALID_PARTITION_MAP, KeyPartitioner, PARTITIONS, Partition, ReplicaPolicy, ResultCode,
    StablePartitioner,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[tokio::test]
async fn test_validate_reports_missing_replicas() {
    let fx = Fixture::new();
    let a = host(1);
    fx.node(&a, "A").await;
    fx.own(&a, vec![ownership("test", 1, false, vec![all(), none()])])
        .await;
    let cluster = fx.connect(manual_config(vec![a.clone()])).await;

    let report = cluster.partition_map().validation_report();
    assert!(report.missing_masters.is_empty());
    assert_eq!(report.missing_replicas["test"].len(), PARTITIONS);

    let err = cluster.validate().unwrap_err();
    assert!(err.is(&ERR_INVALID_PARTITION_MAP));
    assert_eq!(err.code(), ResultCode::InvalidClusterPartitionMap);
    assert!(
        err.to_string()
            .contains("Replica partition nodes not defined for namespace `test`: 4096")
    );

    // Masters are all there, so routing still works.
    assert_eq!(
        cluster.get_master_node(&Partition::new("test", 7)).unwrap().name(),
        "A"
    );
    cluster.close().await;
}

#[tokio::test]
async fn test_master_proles_round_robins_across_replicas() {
    let fx = Fixture::new();
    let (a, b) = (host(1), host(2));
    fx.node(&a, "A").await;
    fx.node(&b, "B").await;
    fx.own(&a, vec![ownership("test", 1, false, vec![all(), none()])])
        .await;
    fx.own(&b, vec![ownership("test", 1, false, vec![none(), all()])])
        .await;
    let cluster = fx.connect(manual_config(vec![a.clone(), b.clone()])).await;

    let partition = Partition::new("test", 42);
    let picks: Vec<String> = (0..4)
        .map(|_| {
            cluster
                .get_master_proles_node(&partition)
                .unwrap()
                .name()
                .to_string()
        })
        .collect();

    assert_eq!(picks, vec!["A", "B", "A", "B"]);
    cluster.close().await;
}

#[tokio::test]
async fn test_sequence_policy_walks_replicas_by_iteration() {
    let fx = Fixture::new();
    let (a, b) = (host(1), host(2));
    fx.node(&a, "A").await;
    fx.node(&b, "B").await;
    fx.own(&a, vec![ownership("test", 1, false, vec![all(), none()])])
        .await;
    fx.own(&b, vec![ownership("test", 1, false, vec![none(), all()])])
        .await;
    let cluster = fx.connect(manual_config(vec![a.clone(), b.clone()])).await;

    let partition = Partition::new("test", 100);
    let names: Vec<String> = (0..3)
        .map(|iteration| {
            cluster
                .get_node(&partition, ReplicaPolicy::Sequence, iteration)
                .unwrap()
                .name()
                .to_string()
        })
        .collect();

    assert_eq!(names, vec!["A", "B", "A"]);
    cluster.close().await;
}

#[tokio::test]
async fn test_strong_consistency_never_falls_back() {
    let fx = Fixture::new();
    let (a, b) = (host(1), host(2));
    fx.node(&a, "A").await;
    fx.node(&b, "B").await;
    fx.own(
        &a,
        vec![
            ownership("strong", 1, true, vec![all(), none()]),
            ownership("soft", 1, false, vec![all(), none()]),
        ],
    )
    .await;
    fx.own(
        &b,
        vec![
            ownership("strong", 1, true, vec![none(), all()]),
            ownership("soft", 1, false, vec![none(), all()]),
        ],
    )
    .await;
    let cluster = fx
        .connect(manual_config(vec![a.clone(), b.clone()]).max_tend_failures(1))
        .await;
    assert!(cluster.partitions("strong").unwrap().sc_mode());
    assert!(!cluster.partitions("soft").unwrap().sc_mode());

    // Lose the master of every partition.
    fx.info.set_reachable(&a, false).await.unwrap();
    let report = cluster.tend_now().await.unwrap();
    assert_eq!(report.removed_nodes, vec!["A"]);

    let soft = cluster
        .get_node(&Partition::new("soft", 9), ReplicaPolicy::Sequence, 0)
        .unwrap();
    assert_eq!(soft.name(), "B");

    let err = cluster
        .get_node(&Partition::new("strong", 9), ReplicaPolicy::Sequence, 0)
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidNode);
    assert_eq!(
        err.message(),
        "Node not found for partition strong:9 in partition table."
    );

    let err = cluster
        .get_master_node(&Partition::new("soft", 9))
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidNode);
    cluster.close().await;
}

#[tokio::test]
async fn test_strong_consistency_regime_zero_is_unavailable() {
    let fx = Fixture::new();
    let a = host(1);
    fx.node(&a, "A").await;
    fx.own(
        &a,
        vec![
            ownership("strong", 0, true, vec![all()]),
            ownership("soft", 0, false, vec![all()]),
        ],
    )
    .await;
    let cluster = fx.connect(manual_config(vec![a.clone()])).await;

    let err = cluster
        .get_master_node(&Partition::new("strong", 5))
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidNode);
    assert_eq!(
        cluster
            .get_master_node(&Partition::new("soft", 5))
            .unwrap()
            .name(),
        "A"
    );

    fx.own(&a, vec![ownership("strong", 3, true, vec![all()])])
        .await;
    cluster.tend_now().await.unwrap();
    assert_eq!(
        cluster
            .get_master_node(&Partition::new("strong", 5))
            .unwrap()
            .name(),
        "A"
    );
    cluster.close().await;
}

#[tokio::test]
async fn test_unknown_namespace_and_out_of_range_partition() {
    let fx = Fixture::new();
    let a = host(1);
    fx.node(&a, "A").await;
    fx.own(&a, vec![ownership("test", 1, false, vec![all()])])
        .await;
    let cluster = fx.connect(manual_config(vec![a.clone()])).await;

    let err = cluster
        .get_master_node(&Partition::new("nope", 1))
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidNamespace);
    assert_eq!(err.message(), "Partition map empty for namespace `nope`");

    let err = cluster
        .get_master_node(&Partition::new("test", PARTITIONS as u32))
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::ParameterError);
    cluster.close().await;
}

#[tokio::test]
async fn test_key_routes_to_owner_of_its_partition() {
    let fx = Fixture::new();
    let (a, b) = (host(1), host(2));
    fx.node(&a, "A").await;
    fx.node(&b, "B").await;
    fx.own(&a, vec![ownership("test", 1, false, vec![range(0..2048)])])
        .await;
    fx.own(&b, vec![ownership("test", 1, false, vec![range(2048..4096)])])
        .await;
    let cluster = fx.connect(manual_config(vec![a.clone(), b.clone()])).await;

    for key in ["alice", "bob", "carol", "dave"] {
        let partition = Partition::for_key("test", "users", key.as_bytes(), &StablePartitioner);
        assert_eq!(
            partition.partition_id,
            StablePartitioner.partition_id("users", key.as_bytes())
        );
        let expected = if partition.partition_id < 2048 { "A" } else { "B" };
        assert_eq!(cluster.get_master_node(&partition).unwrap().name(), expected);
    }
    cluster.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_half_published_map() {
    let fx = Fixture::new();
    let (a, b) = (host(1), host(2));
    fx.node(&a, "A").await;
    fx.node(&b, "B").await;
    fx.own(&a, vec![ownership("test", 1, false, vec![all()])])
        .await;
    let cluster = fx.connect(manual_config(vec![a.clone(), b.clone()])).await;

    let stop = Arc::new(AtomicBool::new(false));
    let mixed = Arc::new(AtomicUsize::new(0));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let cluster = cluster.clone();
        let stop = stop.clone();
        let mixed = mixed.clone();
        readers.push(tokio::spawn(async move {
            while !stop.load(Ordering::SeqCst) {
                let Some(parts) = cluster.partitions("test") else {
                    continue;
                };
                let first = parts.node(0, 0).map(|n| n.name().to_string());
                let consistent = (0..PARTITIONS)
                    .all(|pid| parts.node(0, pid).map(|n| n.name().to_string()) == first);
                if !consistent {
                    mixed.fetch_add(1, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    // Ownership moves from A to B in one tick.
    fx.own(&a, vec![]).await;
    fx.own(&b, vec![ownership("test", 2, false, vec![all()])])
        .await;
    let report = cluster.tend_now().await.unwrap();
    assert_eq!(report.refreshed_namespaces, vec!["test"]);

    stop.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.await.unwrap();
    }

    assert_eq!(mixed.load(Ordering::SeqCst), 0);
    assert_eq!(
        cluster.get_master_node(&Partition::new("test", 0)).unwrap().name(),
        "B"
    );
    cluster.close().await;
}
