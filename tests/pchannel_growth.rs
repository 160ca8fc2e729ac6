//! Pchannel Growth Tests
//!
//! A cluster restarted with more physical pchannels keeps allocating from its
//! committed pool until a snapshot naming the new channels is applied:
//! - Requests needing the new channel fail with InsufficientChannels
//! - Nothing is ever routed onto a channel a target has not committed
//! - After the grown snapshot is pushed, the new channel is used end to end
//! - A target keeps applying after only its source restarts

mod common;

use std::sync::Arc;

use common::{create_loaded, edge, ids, Fixture, ROOT};
use xcdc::errors::CdcError;
use xcdc::node::{ClusterNode, ClusterRole, NodeOptions};
use xcdc::topology::{parse_pchannel, pchannel_name};

// =============================================================================
// Allocation guard
// =============================================================================

#[tokio::test]
async fn test_restart_with_more_pchannels_keeps_committed_pool() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let mut fx = Fixture::new();
    fx.add_durable("a", 16, dir_a.path());
    fx.add_durable("b", 16, dir_b.path());
    fx.controller
        .update_replicate_configuration(ROOT, vec![edge("a", "b")])
        .await
        .unwrap();

    let a = fx.restart("a", 17, dir_a.path()).await;
    let b = fx.restart("b", 17, dir_b.path()).await;
    assert_eq!(a.physical_pchannels().len(), 17);
    assert_eq!(a.committed().pchannels_of("a").len(), 16);
    assert_eq!(a.status().committed_pchannels, 16);

    let err = a.create_collection("wide", 17).unwrap_err();
    match err {
        CdcError::InsufficientChannels {
            requested,
            available,
            ..
        } => {
            assert_eq!(requested, 17);
            assert_eq!(available, 16);
        }
        other => panic!("expected InsufficientChannels, got {other:?}"),
    }
    assert_eq!(a.metrics().allocations_rejected, 1);

    // fits in the committed pool; the 17th channel stays unused
    create_loaded(&a, "narrow", 16);
    let narrow = a.describe_collection("narrow").unwrap();
    assert!(narrow
        .assignment
        .pchannels()
        .iter()
        .all(|p| parse_pchannel(p).unwrap().1 < 16));
    a.insert("narrow", &ids(0..64)).unwrap();
    fx.converge().await;
    assert_eq!(b.query_ids("narrow").unwrap(), ids(0..64));
    assert_eq!(a.metrics().stale_rejections, 0);
}

#[tokio::test]
async fn test_grown_snapshot_enables_new_channel() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let mut fx = Fixture::new();
    fx.add_durable("a", 16, dir_a.path());
    fx.add_durable("b", 16, dir_b.path());
    fx.controller
        .update_replicate_configuration(ROOT, vec![edge("a", "b")])
        .await
        .unwrap();

    let a = fx.restart("a", 17, dir_a.path()).await;
    let b = fx.restart("b", 17, dir_b.path()).await;

    fx.controller.grow_cluster(ROOT, "a", 17).unwrap();
    fx.controller.grow_cluster(ROOT, "b", 17).unwrap();
    let report = fx.controller.republish(ROOT).await.unwrap();
    assert_eq!(report.changed().len(), 2);
    assert_eq!(a.committed().pchannels_of("a").len(), 17);
    assert_eq!(b.committed().pchannels_of("a").len(), 17);

    create_loaded(&a, "wide", 17);
    let wide = a.describe_collection("wide").unwrap();
    assert!(wide.assignment.pchannels().contains(&pchannel_name("a", 16).as_str()));

    a.insert("wide", &ids(0..170)).unwrap();
    fx.converge().await;
    let replica = b.describe_collection("wide").unwrap();
    assert!(replica.assignment.pchannels().contains(&pchannel_name("b", 16).as_str()));
    assert_eq!(b.query_ids("wide").unwrap(), ids(0..170));
}

#[test]
fn test_shrinking_registration_refused() {
    let mut fx = Fixture::new();
    fx.add_cluster("a", 8);

    let err = fx.controller.grow_cluster(ROOT, "a", 4).unwrap_err();
    assert!(matches!(err, CdcError::DuplicateCluster { .. }));
    assert_eq!(fx.controller.registry().pchannels_of("a").unwrap().len(), 8);
}

#[test]
fn test_restart_with_fewer_pchannels_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut fx = Fixture::new();
    fx.add_durable("a", 8, dir.path());

    let options = NodeOptions::new("a", 4).with_data_dir(dir.path());
    let err = ClusterNode::open(options, Arc::new(fx.network.clone())).err();
    assert!(matches!(err, Some(CdcError::Config(_))));
}

// =============================================================================
// Source restart
// =============================================================================

#[tokio::test]
async fn test_source_only_restart_keeps_replicating() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let mut fx = Fixture::new();
    fx.add_durable("a", 4, dir_a.path());
    let b = fx.add_durable("b", 4, dir_b.path());
    fx.controller
        .update_replicate_configuration(ROOT, vec![edge("a", "b")])
        .await
        .unwrap();

    let a = fx.node("a").clone();
    create_loaded(&a, "docs", 1);
    a.insert("docs", &ids(0..10)).unwrap();
    fx.converge().await;
    assert_eq!(b.query_ids("docs").unwrap(), ids(0..10));

    // the target keeps running and remembers how far it got
    let a = fx.restart("a", 4, dir_a.path()).await;
    assert_eq!(a.role(), ClusterRole::Source);

    create_loaded(&a, "docs2", 1);
    a.insert("docs2", &ids(100..110)).unwrap();
    fx.converge().await;

    assert_eq!(b.query_ids("docs2").unwrap(), ids(100..110));
    assert_eq!(b.query_ids("docs").unwrap(), ids(0..10));
    assert_eq!(b.metrics().messages_duplicated, 0);
}
