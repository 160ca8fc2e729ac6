//! Switchover Tests
//!
//! Reversing an edge while the old source is still writing:
//! - Every acknowledged write reaches the new source, exactly once
//! - At no point do both clusters stream as source
//! - A drain that cannot finish rolls back to the prior topology
//! - An old source that refuses the reversed config rolls back
//! - A propagation gap fails with the new source still fenced, and a retry completes
//! - Only one switchover runs at a time

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{create_loaded, edge, fast_router, ids, Fixture, ROOT};
use xcdc::controller::ControllerOptions;
use xcdc::errors::CdcError;
use xcdc::node::{ClusterNode, ClusterRole, NodeOptions};
use xcdc::router::{EdgeState, PauseReason};
use xcdc::switchover::SwitchoverState;
use xcdc::transport::LocalNetwork;

// =============================================================================
// Successful switchover
// =============================================================================

#[tokio::test]
async fn test_switchover_mid_stream_loses_nothing() {
    let mut fx = Fixture::new();
    let a = fx.add_cluster("a", 16);
    let b = fx.add_cluster("b", 16);
    fx.controller
        .update_replicate_configuration(ROOT, vec![edge("a", "b")])
        .await
        .unwrap();

    create_loaded(&a, "docs", 4);
    for chunk in ids(0..200).chunks(25) {
        a.insert("docs", chunk).unwrap();
    }
    // nothing pumped yet: the drain has to carry all of it
    assert!(a.replication().lag() > 0);

    let report = fx.controller.switchover(ROOT, "a", "b", None).await.unwrap();
    assert_eq!(report.edges, vec![edge("b", "a")]);
    assert!(report.distribution.is_complete());
    assert_eq!(b.query_ids("docs").unwrap(), ids(0..200));
    assert_eq!(b.metrics().messages_duplicated, 0);

    assert_eq!(a.role(), ClusterRole::Target);
    assert_eq!(b.role(), ClusterRole::Source);
    assert!(!a.replication().is_actively_routing());
    assert!(b.replication().is_actively_routing());
    assert!(!b.replication().is_fenced());
    assert!(matches!(
        a.insert("docs", &[999]).unwrap_err(),
        CdcError::WriteRejected { .. }
    ));

    b.insert("docs", &ids(200..300)).unwrap();
    fx.converge().await;
    assert_eq!(a.query_ids("docs").unwrap(), ids(0..300));
    assert_eq!(a.metrics().messages_duplicated, 0);

    assert_eq!(fx.controller.switchover_state(), SwitchoverState::Idle);
    assert_eq!(fx.controller.last_switchover(), Some(SwitchoverState::Succeeded));
    assert_eq!(fx.controller.edges(), vec![edge("b", "a")]);
    assert_eq!(fx.controller.metrics().switchovers_succeeded, 1);
}

#[tokio::test]
async fn test_switchover_repoints_star() {
    let mut fx = Fixture::new();
    let a = fx.add_cluster("a", 4);
    let b = fx.add_cluster("b", 4);
    let c = fx.add_cluster("c", 4);
    fx.controller
        .update_replicate_configuration(ROOT, vec![edge("a", "b"), edge("a", "c")])
        .await
        .unwrap();
    create_loaded(&a, "docs", 2);
    a.insert("docs", &ids(0..10)).unwrap();

    let report = fx.controller.switchover(ROOT, "a", "b", None).await.unwrap();
    assert_eq!(report.edges, vec![edge("b", "a"), edge("b", "c")]);

    b.insert("docs", &ids(10..20)).unwrap();
    fx.converge().await;
    assert_eq!(a.query_ids("docs").unwrap(), ids(0..20));
    assert_eq!(c.query_ids("docs").unwrap(), ids(0..20));
    assert_eq!(c.role(), ClusterRole::Target);
    assert_eq!(c.committed().sources_of("c"), vec!["b"]);
}

#[tokio::test]
async fn test_switch_back_and_forth() {
    let mut fx = Fixture::new();
    let a = fx.add_cluster("a", 2);
    let b = fx.add_cluster("b", 2);
    fx.controller
        .update_replicate_configuration(ROOT, vec![edge("a", "b")])
        .await
        .unwrap();
    create_loaded(&a, "docs", 2);

    fx.controller.switchover(ROOT, "a", "b", None).await.unwrap();
    b.insert("docs", &[1, 2]).unwrap();
    fx.controller.switchover(ROOT, "b", "a", None).await.unwrap();
    a.insert("docs", &[3]).unwrap();
    fx.converge().await;

    assert_eq!(a.role(), ClusterRole::Source);
    assert_eq!(a.query_ids("docs").unwrap(), vec![1, 2, 3]);
    assert_eq!(b.query_ids("docs").unwrap(), vec![1, 2, 3]);
}

// =============================================================================
// Rejected and rolled back
// =============================================================================

#[tokio::test]
async fn test_switchover_requires_existing_edge() {
    let mut fx = Fixture::new();
    let a = fx.add_cluster("a", 2);
    fx.add_cluster("b", 2);
    fx.controller
        .update_replicate_configuration(ROOT, vec![edge("a", "b")])
        .await
        .unwrap();

    let err = fx.controller.switchover(ROOT, "b", "a", None).await.unwrap_err();
    assert_eq!(err.code(), "XCDC_INVALID_TOPOLOGY");
    assert!(matches!(
        fx.controller.last_switchover(),
        Some(SwitchoverState::RolledBack { .. })
    ));
    assert_eq!(a.role(), ClusterRole::Source);
}

#[tokio::test]
async fn test_switchover_requires_admin() {
    let mut fx = Fixture::new();
    fx.add_cluster("a", 2);
    fx.add_cluster("b", 2);
    let err = fx
        .controller
        .switchover("root:nope", "a", "b", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "XCDC_PERMISSION_DENIED");
    assert_eq!(fx.controller.last_switchover(), None);
}

#[tokio::test]
async fn test_switchover_cannot_shrink_pchannels() {
    let mut fx = Fixture::new();
    let a = fx.add_cluster("a", 8);
    let b = fx.add_cluster("b", 8);
    fx.controller
        .update_replicate_configuration(ROOT, vec![edge("a", "b")])
        .await
        .unwrap();
    let revision = a.committed().revision();

    let err = fx.controller.switchover(ROOT, "a", "b", Some(4)).await.unwrap_err();
    assert!(matches!(err, CdcError::InvalidArgument(_)));
    assert_eq!(a.committed().revision(), revision);
    assert!(!b.replication().is_fenced());
}

/// `a` cannot reach `b` over its own network, so its drain never completes.
fn partitioned_fixture(drain_timeout: Duration) -> (Fixture, Arc<ClusterNode>, Arc<ClusterNode>) {
    let mut fx = Fixture::with_options(ControllerOptions {
        call_timeout: Duration::from_secs(2),
        drain_timeout,
        ..Default::default()
    });
    let a_network = LocalNetwork::new();
    let a = fx.add_node(
        NodeOptions::new("a", 4).with_router(fast_router()),
        Arc::new(a_network.clone()),
    );
    let b = fx.add_cluster("b", 4);
    a_network.attach(&b);
    a_network.set_reachable("b", false);
    (fx, a, b)
}

#[tokio::test]
async fn test_drain_timeout_rolls_back() {
    let (fx, a, b) = partitioned_fixture(Duration::from_millis(150));
    fx.controller
        .update_replicate_configuration(ROOT, vec![edge("a", "b")])
        .await
        .unwrap();
    create_loaded(&a, "docs", 2);
    a.insert("docs", &ids(0..10)).unwrap();
    let revisions = (a.committed().revision(), b.committed().revision());

    let err = fx.controller.switchover(ROOT, "a", "b", None).await.unwrap_err();
    assert!(matches!(err, CdcError::SwitchoverTimeout { ref cluster_id, .. } if cluster_id == "a"));
    assert!(matches!(
        fx.controller.last_switchover(),
        Some(SwitchoverState::RolledBack { .. })
    ));
    assert_eq!(fx.controller.metrics().switchovers_failed, 1);

    // prior topology stays authoritative
    assert_eq!((a.committed().revision(), b.committed().revision()), revisions);
    assert_eq!(a.role(), ClusterRole::Source);
    assert!(!a.replication().is_draining());
    assert!(!b.replication().is_fenced());
    a.insert("docs", &[42]).unwrap();
    assert_eq!(fx.controller.edges(), vec![edge("a", "b")]);
    assert_ne!(a.replication().edge_state("b"), Some(EdgeState::Paused(PauseReason::Drained)));
}

#[tokio::test]
async fn test_concurrent_switchover_rejected() {
    let (fx, a, _b) = partitioned_fixture(Duration::from_millis(300));
    fx.controller
        .update_replicate_configuration(ROOT, vec![edge("a", "b")])
        .await
        .unwrap();
    create_loaded(&a, "docs", 1);

    let (first, second) = tokio::join!(
        fx.controller.switchover(ROOT, "a", "b", None),
        fx.controller.switchover(ROOT, "a", "b", None),
    );
    assert!(matches!(first, Err(CdcError::SwitchoverTimeout { .. })));
    assert!(matches!(second, Err(CdcError::SwitchoverInProgress(_))));
    assert_eq!(fx.controller.switchover_state(), SwitchoverState::Idle);
}

// =============================================================================
// Refused pushes
// =============================================================================

#[tokio::test]
async fn test_old_source_commit_refused_rolls_back() {
    let (mut fx, faults) = Fixture::with_push_faults();
    let a = fx.add_cluster("a", 4);
    let b = fx.add_cluster("b", 4);
    fx.controller
        .update_replicate_configuration(ROOT, vec![edge("a", "b")])
        .await
        .unwrap();
    create_loaded(&a, "docs", 2);
    a.insert("docs", &ids(0..10)).unwrap();
    let revisions = (a.committed().revision(), b.committed().revision());

    faults.refuse("a");
    fx.controller.switchover(ROOT, "a", "b", None).await.unwrap_err();
    assert!(matches!(
        fx.controller.last_switchover(),
        Some(SwitchoverState::RolledBack { .. })
    ));
    assert_eq!(fx.controller.switchover_state(), SwitchoverState::Idle);

    // old source resumed, new source unfenced, nothing committed
    assert_eq!((a.committed().revision(), b.committed().revision()), revisions);
    assert_eq!(a.role(), ClusterRole::Source);
    assert!(!a.replication().is_draining());
    assert!(a.replication().is_actively_routing());
    assert_eq!(a.replication().edge_state("b"), Some(EdgeState::Streaming));
    assert_eq!(b.role(), ClusterRole::Target);
    assert!(!b.replication().is_fenced());
    assert!(!b.replication().is_actively_routing());
    assert_eq!(fx.controller.edges(), vec![edge("a", "b")]);
    a.insert("docs", &ids(10..20)).unwrap();

    faults.allow("a");
    fx.controller.switchover(ROOT, "a", "b", None).await.unwrap();
    assert_eq!(b.query_ids("docs").unwrap(), ids(0..20));
    assert_eq!(b.role(), ClusterRole::Source);
    b.insert("docs", &ids(20..30)).unwrap();
    fx.converge().await;
    assert_eq!(a.query_ids("docs").unwrap(), ids(0..30));
}

#[tokio::test]
async fn test_propagation_gap_fails_fenced_then_retry_completes() {
    let (mut fx, faults) = Fixture::with_push_faults();
    let a = fx.add_cluster("a", 4);
    let b = fx.add_cluster("b", 4);
    let c = fx.add_cluster("c", 4);
    fx.controller
        .update_replicate_configuration(ROOT, vec![edge("a", "b"), edge("a", "c")])
        .await
        .unwrap();
    create_loaded(&a, "docs", 2);
    a.insert("docs", &ids(0..10)).unwrap();

    faults.refuse("c");
    let err = fx.controller.switchover(ROOT, "a", "b", None).await.unwrap_err();
    assert!(matches!(err, CdcError::DistributionPartialFailure { .. }));
    assert!(matches!(
        fx.controller.last_switchover(),
        Some(SwitchoverState::Failed { .. })
    ));
    assert_eq!(fx.controller.metrics().switchovers_failed, 1);

    // old source demoted, new source committed but held back
    assert_eq!(a.role(), ClusterRole::Target);
    assert_eq!(b.role(), ClusterRole::Source);
    assert!(b.replication().is_fenced());
    assert!(!a.replication().is_actively_routing());
    assert!(!b.replication().is_actively_routing());
    assert_eq!(c.committed().sources_of("c"), vec!["a"]);
    assert_eq!(b.query_ids("docs").unwrap(), ids(0..10));
    assert_eq!(c.query_ids("docs").unwrap(), ids(0..10));

    faults.allow("c");
    let report = fx.controller.switchover(ROOT, "a", "b", None).await.unwrap();
    assert!(report.distribution.is_complete());
    assert_eq!(fx.controller.last_switchover(), Some(SwitchoverState::Succeeded));
    assert_eq!(fx.controller.edges(), vec![edge("b", "a"), edge("b", "c")]);
    assert!(!b.replication().is_fenced());
    assert!(b.replication().is_actively_routing());
    assert!(!a.replication().is_draining());
    assert_eq!(c.committed().sources_of("c"), vec!["b"]);

    b.insert("docs", &ids(10..20)).unwrap();
    fx.converge().await;
    assert_eq!(a.query_ids("docs").unwrap(), ids(0..20));
    assert_eq!(c.query_ids("docs").unwrap(), ids(0..20));
}
