//! End-to-end tests for saving: plan, execute against `MockNodeApi`, inspect
//! what the server ended up with.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use remote::mock::{MockCall, MockNodeApi};
use remote::{LinkType, RemoteError, RemoteLink};

use crate::executor::{OpOutcome, ReconcileExecutor, ReconcilerConfig};
use crate::fixtures::{add_node, new_node, remote_node};
use crate::graph::Graph;
use crate::models::{LinkKey, START_NODE_ID};
use crate::reconcile::RemoteOp;
use crate::reducer::{apply, Action};

fn executor(api: &MockNodeApi) -> ReconcileExecutor {
    let config = ReconcilerConfig {
        retry_base_delay: Duration::from_millis(1),
        ..ReconcilerConfig::default()
    };
    ReconcileExecutor::new(Arc::new(api.clone()), config)
}

/// START → a → b → c, all new.
fn new_chain() -> (Graph, Graph) {
    let baseline = Graph::new(Uuid::nil());
    let edited = add_node(&baseline, START_NODE_ID, new_node("a", LinkType::Always));
    let edited = add_node(&edited, 2, new_node("b", LinkType::Success));
    let edited = add_node(&edited, 3, new_node("c", LinkType::Failure));
    (baseline, edited)
}

// ============================================================
// Happy path
// ============================================================

#[tokio::test]
async fn new_chain_is_saved_parent_first() {
    let api = MockNodeApi::new();
    let (baseline, edited) = new_chain();

    let report = executor(&api).run(42, &baseline, &edited).await;

    assert!(report.is_complete());
    assert_eq!(
        api.calls(),
        vec![
            MockCall::Create { identifier: "a".into() },
            MockCall::Create { identifier: "b".into() },
            MockCall::Associate { parent: 100, child: 101, link_type: LinkType::Success },
            MockCall::Create { identifier: "c".into() },
            MockCall::Associate { parent: 101, child: 102, link_type: LinkType::Failure },
        ]
    );
    assert_eq!(report.remote_ids.get(&2), Some(&100));
    assert_eq!(report.remote_ids.get(&4), Some(&102));
    assert!(report.finished_at >= report.started_at);
}

#[tokio::test]
async fn removals_and_retypes_hit_existing_nodes() {
    let api = MockNodeApi::with_workflow(
        vec![remote_node(100, "a"), remote_node(101, "b"), remote_node(102, "c")],
        vec![
            RemoteLink { source: 100, target: 101, link_type: LinkType::Success },
            RemoteLink { source: 101, target: 102, link_type: LinkType::Success },
        ],
    );
    let baseline = Graph::from_remote(
        Uuid::nil(),
        api.nodes(),
        api.links(),
    )
    .expect("remote workflow should load");

    let edited = [
        Action::SetNodeToDelete(Some(4)),
        Action::DeleteNode { reparent_children: false },
        Action::SetLinkToEdit(Some(LinkKey { source: 2, target: 3 })),
        Action::UpdateLink(LinkType::Failure),
    ]
    .into_iter()
    .try_fold(baseline.clone(), |state, action| apply(&state, action))
    .expect("edits should be valid");

    let report = executor(&api).run(42, &baseline, &edited).await;

    assert!(report.is_complete());
    assert_eq!(
        api.calls(),
        vec![
            MockCall::Destroy { id: 102 },
            MockCall::Disassociate { parent: 100, child: 101, link_type: LinkType::Success },
            MockCall::Associate { parent: 100, child: 101, link_type: LinkType::Failure },
        ]
    );
    assert_eq!(
        api.links(),
        vec![RemoteLink { source: 100, target: 101, link_type: LinkType::Failure }]
    );
    assert!(!report.remote_ids.contains_key(&4));
}

#[tokio::test]
async fn wide_wave_is_chunked_but_complete() {
    let api = MockNodeApi::new();
    let baseline = Graph::new(Uuid::nil());
    let edited = ["a", "b", "c", "d", "e"]
        .into_iter()
        .fold(baseline.clone(), |graph, identifier| {
            add_node(&graph, START_NODE_ID, new_node(identifier, LinkType::Always))
        });

    let config = ReconcilerConfig {
        max_concurrency: 2,
        ..ReconcilerConfig::default()
    };
    let report = ReconcileExecutor::new(Arc::new(api.clone()), config)
        .run(42, &baseline, &edited)
        .await;

    assert!(report.is_complete());
    assert_eq!(api.nodes().len(), 5);
    let created: Vec<u64> = report
        .results
        .iter()
        .filter_map(|r| match r.op {
            RemoteOp::CreateNode { node, .. } => Some(node),
            _ => None,
        })
        .collect();
    assert_eq!(created, vec![2, 3, 4, 5, 6]);
}

// ============================================================
// Retry behaviour
// ============================================================

#[tokio::test]
async fn unavailable_service_is_retried() {
    let api = MockNodeApi::new();
    api.fail_transiently(2);
    let baseline = Graph::new(Uuid::nil());
    let edited = add_node(&baseline, START_NODE_ID, new_node("a", LinkType::Always));

    let report = executor(&api).run(42, &baseline, &edited).await;

    assert!(report.is_complete());
    assert_eq!(api.calls().len(), 3);
}

#[tokio::test]
async fn retries_run_out() {
    let api = MockNodeApi::new();
    api.fail_transiently(10);
    let baseline = Graph::new(Uuid::nil());
    let edited = add_node(&baseline, START_NODE_ID, new_node("a", LinkType::Always));

    let report = executor(&api).run(42, &baseline, &edited).await;

    // One attempt plus `max_retries` retries.
    assert_eq!(api.calls().len(), 4);
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].source, RemoteError::Unavailable(_)));
}

// ============================================================
// Partial failure
// ============================================================

#[tokio::test]
async fn rejected_create_skips_its_links_but_not_the_rest() {
    let api = MockNodeApi::new();
    api.reject_identifier("b");
    let (baseline, edited) = new_chain();

    let report = executor(&api).run(42, &baseline, &edited).await;

    assert!(!report.is_complete());
    let outcomes: Vec<&OpOutcome> = report.results.iter().map(|r| &r.outcome).collect();
    assert!(matches!(
        outcomes.as_slice(),
        [
            OpOutcome::Applied,
            OpOutcome::Failed(_),
            OpOutcome::Skipped { missing: 3 },
            OpOutcome::Applied,
            OpOutcome::Skipped { missing: 3 },
        ]
    ));
    assert_eq!(report.failures().len(), 1);
    assert_eq!(report.skipped().len(), 2);

    // Nothing applied is undone.
    assert_eq!(api.nodes().len(), 2);
}

#[tokio::test]
async fn rejected_association_is_reported_with_its_op() {
    let api = MockNodeApi::new();
    api.reject_association(100, 101);
    let (baseline, edited) = new_chain();

    let report = executor(&api).run(42, &baseline, &edited).await;

    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].op,
        RemoteOp::AssociateNode {
            parent: 2,
            child: 3,
            link_type: LinkType::Success,
            convergence: false,
        }
    );
    // The grandchild still gets created and attached to its own parent.
    assert_eq!(
        api.links(),
        vec![RemoteLink { source: 101, target: 102, link_type: LinkType::Failure }]
    );
}
