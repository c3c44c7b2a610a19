//! Reconciliation: turn an edited graph into the remote operations that
//! bring the server's copy in line with it.
//!
//! The server is compared through the session's baseline, the graph as it
//! was last fetched or saved. Links out of START exist only in the editor;
//! they never produce an operation.
//!
//! Operations are grouped into waves. Everything in a wave is independent
//! of everything else in it, and every wave only references nodes created
//! by earlier waves:
//!
//! ```text
//! wave 0      remove nodes, remove links, update nodes
//! wave 2d-1   create the new nodes at depth d
//! wave 2d     associate or retype links into depth-d nodes
//! ```
//!
//! Empty waves are dropped.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use remote::{LinkType, NodePayload};

use crate::dag;
use crate::graph::Graph;
use crate::models::{Link, LinkKey, Node, NodeId, START_NODE_ID};

/// One call against the remote node collection, addressed by local ids.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RemoteOp {
    /// Destroy a node; the server drops its links with it.
    RemoveNode { node: NodeId },
    /// Disassociate two nodes that both survive the save.
    RemoveLink {
        source: NodeId,
        target: NodeId,
        link_type: LinkType,
    },
    /// Push changed convergence or prompt values of an existing node.
    UpdateNode { node: NodeId, payload: NodePayload },
    CreateNode { node: NodeId, payload: NodePayload },
    /// Attach `child` below `parent`.
    AssociateNode {
        parent: NodeId,
        child: NodeId,
        link_type: LinkType,
        /// Convergence mode of `child`, for display.
        convergence: bool,
    },
    /// Retype an existing link.
    UpdateLink {
        source: NodeId,
        target: NodeId,
        from: LinkType,
        to: LinkType,
    },
}

impl RemoteOp {
    /// Local nodes that must already exist on the server for this op to run.
    pub fn requires(&self) -> Vec<NodeId> {
        match self {
            Self::CreateNode { .. } => Vec::new(),
            Self::RemoveNode { node } | Self::UpdateNode { node, .. } => vec![*node],
            Self::RemoveLink { source, target, .. } | Self::UpdateLink { source, target, .. } => {
                vec![*source, *target]
            }
            Self::AssociateNode { parent, child, .. } => vec![*parent, *child],
        }
    }
}

impl std::fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoveNode { node } => write!(f, "remove node {node}"),
            Self::RemoveLink { source, target, link_type } => {
                write!(f, "remove {link_type} link {source} -> {target}")
            }
            Self::UpdateNode { node, .. } => write!(f, "update node {node}"),
            Self::CreateNode { node, payload } => {
                write!(f, "create node {node} ({})", payload.resource.name())
            }
            Self::AssociateNode { parent, child, link_type, .. } => {
                write!(f, "associate {parent} -> {child} on {link_type}")
            }
            Self::UpdateLink { source, target, from, to } => {
                write!(f, "change link {source} -> {target} from {from} to {to}")
            }
        }
    }
}

/// Operations turning `baseline` into `edited`, in a safe serial order.
pub fn diff(baseline: &Graph, edited: &Graph) -> Vec<RemoteOp> {
    plan_waves(baseline, edited).into_iter().flatten().collect()
}

/// Operations turning `baseline` into `edited`, grouped into waves.
pub fn plan_waves(baseline: &Graph, edited: &Graph) -> Vec<Vec<RemoteOp>> {
    let saved: HashMap<NodeId, &Node> = baseline
        .live_nodes()
        .filter(|n| !n.is_start())
        .map(|n| (n.id, n))
        .collect();
    let saved_links: HashMap<LinkKey, LinkType> = baseline
        .links
        .iter()
        .filter(|l| l.source != START_NODE_ID)
        .map(|l| (l.key(), l.link_type))
        .collect();

    let mut waves: Vec<Vec<RemoteOp>> = vec![cleanup_wave(edited, &saved, &saved_links)];

    // Creations and link changes, bucketed by the depth they land at.
    let depth = dag::depths(edited);
    let depth_of = |id: NodeId| depth.get(&id).copied().unwrap_or_default();
    let mut creates: BTreeMap<usize, Vec<RemoteOp>> = BTreeMap::new();
    let mut associations: BTreeMap<usize, Vec<(LinkKey, RemoteOp)>> = BTreeMap::new();

    for node in edited.live_nodes().filter(|n| !n.is_start()) {
        if saved.contains_key(&node.id) {
            continue;
        }
        if let Some(payload) = node.payload() {
            creates
                .entry(depth_of(node.id))
                .or_default()
                .push(RemoteOp::CreateNode { node: node.id, payload });
        }
    }

    for link in edited.links.iter().filter(|l| l.source != START_NODE_ID) {
        let op = match saved_links.get(&link.key()) {
            None => RemoteOp::AssociateNode {
                parent: link.source,
                child: link.target,
                link_type: link.link_type,
                convergence: edited
                    .node(link.target)
                    .is_some_and(|n| n.all_parents_must_converge),
            },
            Some(&from) if from != link.link_type => RemoteOp::UpdateLink {
                source: link.source,
                target: link.target,
                from,
                to: link.link_type,
            },
            Some(_) => continue,
        };
        associations
            .entry(depth_of(link.target))
            .or_default()
            .push((link.key(), op));
    }

    let deepest = creates
        .keys()
        .chain(associations.keys())
        .copied()
        .max()
        .unwrap_or_default();
    for d in 0..=deepest {
        // `live_nodes` yields ascending ids, so creations are already sorted.
        waves.push(creates.remove(&d).unwrap_or_default());

        let mut linked = associations.remove(&d).unwrap_or_default();
        linked.sort_by_key(|(key, _)| (key.target, key.source));
        waves.push(linked.into_iter().map(|(_, op)| op).collect());
    }

    waves.retain(|wave| !wave.is_empty());
    waves
}

fn cleanup_wave(
    edited: &Graph,
    saved: &HashMap<NodeId, &Node>,
    saved_links: &HashMap<LinkKey, LinkType>,
) -> Vec<RemoteOp> {
    let mut removed: Vec<NodeId> = saved
        .keys()
        .copied()
        .filter(|&id| edited.live_node(id).is_none())
        .collect();
    removed.sort_unstable();

    let mut dropped: Vec<(LinkKey, LinkType)> = saved_links
        .iter()
        .filter(|(key, _)| edited.link(**key).is_none())
        .filter(|(key, _)| {
            edited.live_node(key.source).is_some() && edited.live_node(key.target).is_some()
        })
        .map(|(key, link_type)| (*key, *link_type))
        .collect();
    dropped.sort_unstable_by_key(|(key, _)| *key);

    let mut updated: Vec<(NodeId, NodePayload)> = saved
        .values()
        .filter_map(|before| {
            let after = edited.live_node(before.id)?;
            let payload = after.payload()?;
            (before.payload().as_ref() != Some(&payload)).then_some((after.id, payload))
        })
        .collect();
    updated.sort_by_key(|(id, _)| *id);

    let mut wave: Vec<RemoteOp> = removed
        .into_iter()
        .map(|node| RemoteOp::RemoveNode { node })
        .collect();
    wave.extend(dropped.into_iter().map(|(key, link_type)| RemoteOp::RemoveLink {
        source: key.source,
        target: key.target,
        link_type,
    }));
    wave.extend(
        updated
            .into_iter()
            .map(|(node, payload)| RemoteOp::UpdateNode { node, payload }),
    );
    wave
}

/// Record in `baseline` that `op` has been applied on the server.
///
/// After a partial save the baseline only moves by the operations that
/// succeeded, so planning again yields exactly the ones still outstanding.
pub fn advance_baseline(baseline: &mut Graph, edited: &Graph, op: &RemoteOp) {
    match op {
        RemoteOp::RemoveNode { node } => {
            baseline.links.retain(|l| l.source != *node && l.target != *node);
            if let Some(saved) = baseline.node_mut(*node) {
                saved.is_deleted = true;
            }
        }
        RemoteOp::RemoveLink { source, target, .. } => {
            let key = LinkKey { source: *source, target: *target };
            baseline.links.retain(|l| l.key() != key);
        }
        RemoteOp::UpdateNode { node, .. } | RemoteOp::CreateNode { node, .. } => {
            if let Some(current) = edited.node(*node) {
                match baseline.nodes.binary_search_by_key(node, |n| n.id) {
                    Ok(index) => baseline.nodes[index] = current.clone(),
                    Err(index) => baseline.nodes.insert(index, current.clone()),
                }
            }
        }
        RemoteOp::AssociateNode { parent, child, link_type, .. } => {
            baseline.links.push(Link {
                source: *parent,
                target: *child,
                link_type: *link_type,
            });
        }
        RemoteOp::UpdateLink { source, target, to, .. } => {
            if let Some(link) = baseline.link_mut(LinkKey { source: *source, target: *target }) {
                link.link_type = *to;
            }
        }
    }
    baseline.next_node_id = baseline.next_node_id.max(edited.next_node_id);
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{add_node, new_node, saved_graph_with};
    use crate::models::NodePatch;
    use crate::reducer::{apply, Action};
    use remote::PromptValues;
    use uuid::Uuid;

    fn edit(graph: &Graph, actions: Vec<Action>) -> Graph {
        actions
            .into_iter()
            .try_fold(graph.clone(), |state, action| apply(&state, action))
            .expect("edit should be valid")
    }

    fn saved_chain() -> Graph {
        saved_graph_with(
            &[(2, "a"), (3, "b"), (4, "c")],
            &[
                (1, 2, LinkType::Always),
                (2, 3, LinkType::Success),
                (3, 4, LinkType::Failure),
            ],
        )
    }

    #[test]
    fn new_chain_is_created_parent_first() {
        let baseline = Graph::new(Uuid::nil());
        let edited = add_node(&baseline, START_NODE_ID, new_node("a", LinkType::Always));
        let edited = add_node(&edited, 2, new_node("b", LinkType::Success));
        let edited = add_node(&edited, 3, new_node("c", LinkType::Failure));

        let ops = diff(&baseline, &edited);
        let summary: Vec<String> = ops.iter().map(ToString::to_string).collect();
        assert_eq!(
            summary,
            vec![
                "create node 2 (Deploy)",
                "create node 3 (Deploy)",
                "associate 2 -> 3 on success",
                "create node 4 (Deploy)",
                "associate 3 -> 4 on failure",
            ]
        );
    }

    #[test]
    fn unchanged_graph_needs_nothing() {
        let baseline = saved_chain();
        assert!(diff(&baseline, &baseline.clone()).is_empty());
    }

    #[test]
    fn deleting_a_node_does_not_remove_its_links_separately() {
        let baseline = saved_chain();
        let edited = edit(
            &baseline,
            vec![
                Action::SetNodeToDelete(Some(4)),
                Action::DeleteNode { reparent_children: false },
            ],
        );
        assert_eq!(diff(&baseline, &edited), vec![RemoteOp::RemoveNode { node: 4 }]);
    }

    #[test]
    fn deleting_one_parent_of_a_shared_child_only_removes_the_parent() {
        // START → 2 → 3 and START → 4 → 3
        let baseline = saved_graph_with(
            &[(2, "x"), (3, "y"), (4, "z")],
            &[
                (1, 2, LinkType::Always),
                (1, 4, LinkType::Always),
                (2, 3, LinkType::Success),
                (4, 3, LinkType::Success),
            ],
        );
        let edited = edit(
            &baseline,
            vec![
                Action::SetNodeToDelete(Some(2)),
                Action::DeleteNode { reparent_children: false },
            ],
        );

        assert_eq!(edited.parents(3), vec![4]);
        assert_eq!(diff(&baseline, &edited), vec![RemoteOp::RemoveNode { node: 2 }]);
    }

    #[test]
    fn deleted_link_between_survivors_is_disassociated() {
        let baseline = saved_chain();
        let edited = edit(
            &baseline,
            vec![
                Action::SetLinkToDelete(Some(LinkKey { source: 2, target: 3 })),
                Action::DeleteLink,
            ],
        );
        assert_eq!(
            diff(&baseline, &edited),
            vec![RemoteOp::RemoveLink {
                source: 2,
                target: 3,
                link_type: LinkType::Success,
            }]
        );
    }

    #[test]
    fn retyped_link_is_updated_in_place() {
        let baseline = saved_chain();
        let edited = edit(
            &baseline,
            vec![
                Action::SetLinkToEdit(Some(LinkKey { source: 3, target: 4 })),
                Action::UpdateLink(LinkType::Always),
            ],
        );
        assert_eq!(
            diff(&baseline, &edited),
            vec![RemoteOp::UpdateLink {
                source: 3,
                target: 4,
                from: LinkType::Failure,
                to: LinkType::Always,
            }]
        );
    }

    #[test]
    fn prompt_changes_update_the_node_first() {
        let baseline = saved_chain();
        let patch = NodePatch {
            prompt_values: Some(Some(PromptValues {
                job_tags: Some("deploy".into()),
                ..Default::default()
            })),
            ..Default::default()
        };
        let edited = edit(&baseline, vec![Action::UpdateNode { id: 3, patch }]);
        let edited = add_node(&edited, 4, new_node("d", LinkType::Success));

        let waves = plan_waves(&baseline, &edited);
        assert!(matches!(waves[0].as_slice(), [RemoteOp::UpdateNode { node: 3, .. }]));
        assert!(matches!(waves[1].as_slice(), [RemoteOp::CreateNode { node: 5, .. }]));
        assert!(matches!(
            waves[2].as_slice(),
            [RemoteOp::AssociateNode { parent: 4, child: 5, .. }]
        ));
    }

    #[test]
    fn links_out_of_start_are_virtual() {
        let baseline = saved_graph_with(
            &[(2, "a"), (3, "b")],
            &[(1, 2, LinkType::Always), (1, 3, LinkType::Always)],
        );
        let edited = edit(
            &baseline,
            vec![
                Action::SelectSourceForLinking(2),
                Action::SetAddLinkTarget(Some(3)),
                Action::CreateLink(LinkType::Success),
            ],
        );
        assert_eq!(
            diff(&baseline, &edited),
            vec![RemoteOp::AssociateNode {
                parent: 2,
                child: 3,
                link_type: LinkType::Success,
                convergence: false,
            }]
        );
    }

    #[test]
    fn advancing_by_every_op_leaves_nothing_to_do() {
        let baseline = saved_chain();
        let edited = edit(
            &baseline,
            vec![
                Action::SetNodeToDelete(Some(3)),
                Action::DeleteNode { reparent_children: true },
            ],
        );
        let edited = add_node(&edited, 2, new_node("e", LinkType::Failure));

        let mut advanced = baseline.clone();
        let ops = diff(&baseline, &edited);
        assert!(!ops.is_empty());
        for op in &ops {
            advance_baseline(&mut advanced, &edited, op);
        }
        assert!(diff(&advanced, &edited).is_empty());
    }

    #[test]
    fn advancing_by_some_ops_leaves_the_rest() {
        let baseline = Graph::new(Uuid::nil());
        let edited = add_node(&baseline, START_NODE_ID, new_node("a", LinkType::Always));
        let edited = add_node(&edited, 2, new_node("b", LinkType::Success));

        let ops = diff(&baseline, &edited);
        let mut advanced = baseline.clone();
        advance_baseline(&mut advanced, &edited, &ops[0]);

        assert_eq!(diff(&advanced, &edited), ops[1..].to_vec());
    }
}
