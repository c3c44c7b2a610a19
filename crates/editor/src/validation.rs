//! Graph validation, run after every transition, before the new state is
//! committed.
//!
//! Rules enforced:
//! 1. Links never loop on a node, never enter START, never repeat a pair.
//! 2. The graph is acyclic (depth-first search, back-edges are reported).
//! 3. Nodes converging on all parents have at least two parents.
//! 4. Identifiers are unique among live nodes; approvals must have one.
//! 5. Every resource fits its node's declared type.
//!
//! Orphaned nodes are not errors; [`warnings`] reports them.

use std::collections::{BTreeMap, HashMap, HashSet};

use remote::NodeResource;

use crate::error::{ValidationError, Warning};
use crate::graph::Graph;
use crate::models::{NodeId, START_NODE_ID};

/// Every invariant the graph currently violates, in a stable order.
pub fn validate(graph: &Graph) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    check_links(graph, &mut errors);
    check_cycles(graph, &mut errors);
    check_convergence(graph, &mut errors);
    check_identifiers(graph, &mut errors);
    check_resources(graph, &mut errors);
    errors
}

/// Legal states worth surfacing before a save.
pub fn warnings(graph: &Graph) -> Vec<Warning> {
    graph
        .orphaned_nodes()
        .into_iter()
        .map(|node| Warning::OrphanedNode { node })
        .collect()
}

// ---------------------------------------------------------------------------
// 1. Link shape
// ---------------------------------------------------------------------------

fn check_links(graph: &Graph, errors: &mut Vec<ValidationError>) {
    let mut seen: HashSet<(NodeId, NodeId)> = HashSet::new();
    for link in &graph.links {
        if link.source == link.target {
            errors.push(ValidationError::SelfLoop { node: link.source });
        }
        if link.target == START_NODE_ID {
            errors.push(ValidationError::LinkIntoStart { parent: link.source });
        }
        if !seen.insert((link.source, link.target)) {
            errors.push(ValidationError::DuplicateLink {
                parent: link.source,
                child: link.target,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Acyclicity
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnPath,
    Done,
}

fn check_cycles(graph: &Graph, errors: &mut Vec<ValidationError>) {
    let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for link in &graph.links {
        if link.source != link.target {
            children.entry(link.source).or_default().push(link.target);
        }
    }
    for targets in children.values_mut() {
        targets.sort_unstable();
        targets.dedup();
    }

    // START first, then whatever it cannot reach, lowest id first.
    let mut roots: Vec<NodeId> = vec![START_NODE_ID];
    roots.extend(graph.live_nodes().map(|n| n.id).filter(|&id| id != START_NODE_ID));

    let mut marks: HashMap<NodeId, Mark> = HashMap::new();
    for root in roots {
        if marks.contains_key(&root) {
            continue;
        }

        // Iterative DFS: (node, index of the next child to visit).
        let mut stack: Vec<(NodeId, usize)> = vec![(root, 0)];
        marks.insert(root, Mark::OnPath);

        while let Some((node, next_child)) = stack.last().copied() {
            let child = children.get(&node).and_then(|c| c.get(next_child)).copied();
            match child {
                Some(child) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    match marks.get(&child) {
                        Some(Mark::OnPath) => errors.push(ValidationError::CycleDetected {
                            parent: node,
                            child,
                        }),
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(child, Mark::OnPath);
                            stack.push((child, 0));
                        }
                    }
                }
                None => {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 3. Convergence
// ---------------------------------------------------------------------------

fn check_convergence(graph: &Graph, errors: &mut Vec<ValidationError>) {
    for node in graph.live_nodes().filter(|n| n.all_parents_must_converge) {
        let parents = graph.inbound_links(node.id).count();
        if parents < 2 {
            errors.push(ValidationError::InvalidConvergence { node: node.id, parents });
        }
    }
}

// ---------------------------------------------------------------------------
// 4. Identifiers
// ---------------------------------------------------------------------------

fn check_identifiers(graph: &Graph, errors: &mut Vec<ValidationError>) {
    let mut owners: BTreeMap<&str, NodeId> = BTreeMap::new();
    for node in graph.live_nodes().filter(|n| !n.is_start()) {
        let identifier = node.identifier.trim();
        if identifier.is_empty() {
            if matches!(node.resource, Some(NodeResource::Approval(_))) {
                errors.push(ValidationError::MissingIdentifier { node: node.id });
            }
            continue;
        }
        match owners.get(identifier) {
            Some(&existing) => errors.push(ValidationError::DuplicateIdentifier {
                identifier: identifier.to_owned(),
                node: node.id,
                existing,
            }),
            None => {
                owners.insert(identifier, node.id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 5. Resources
// ---------------------------------------------------------------------------

fn check_resources(graph: &Graph, errors: &mut Vec<ValidationError>) {
    for node in graph.live_nodes().filter(|n| !n.is_start()) {
        let fits = node
            .resource
            .as_ref()
            .is_some_and(|resource| node.node_type.fits(resource));
        if !fits {
            errors.push(ValidationError::ResourceMismatch {
                node: node.id,
                node_type: node.node_type,
            });
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::graph_with;
    use crate::models::{Link, NodeType};
    use remote::{ApprovalTemplate, LinkType};

    #[test]
    fn clean_graph_has_no_errors() {
        let graph = graph_with(
            &[(2, "a"), (3, "b")],
            &[(1, 2, LinkType::Always), (2, 3, LinkType::Success)],
        );
        assert!(validate(&graph).is_empty());
        assert!(warnings(&graph).is_empty());
    }

    #[test]
    fn back_edge_is_reported() {
        let mut graph = graph_with(
            &[(2, "a"), (3, "b")],
            &[(1, 2, LinkType::Always), (2, 3, LinkType::Success)],
        );
        graph.links.push(Link { source: 3, target: 2, link_type: LinkType::Failure });

        assert_eq!(
            validate(&graph),
            vec![ValidationError::CycleDetected { parent: 3, child: 2 }]
        );
    }

    #[test]
    fn cycle_among_orphans_is_still_found() {
        let mut graph = graph_with(&[(2, "a"), (3, "b")], &[(2, 3, LinkType::Success)]);
        graph.links.push(Link { source: 3, target: 2, link_type: LinkType::Success });

        assert!(validate(&graph)
            .iter()
            .any(|e| matches!(e, ValidationError::CycleDetected { .. })));
    }

    #[test]
    fn link_shape_rules() {
        let mut graph = graph_with(&[(2, "a")], &[(1, 2, LinkType::Always)]);
        graph.links.push(Link { source: 2, target: 2, link_type: LinkType::Always });
        graph.links.push(Link { source: 2, target: 1, link_type: LinkType::Always });
        graph.links.push(Link { source: 1, target: 2, link_type: LinkType::Success });

        let errors = validate(&graph);
        assert!(errors.contains(&ValidationError::SelfLoop { node: 2 }));
        assert!(errors.contains(&ValidationError::LinkIntoStart { parent: 2 }));
        assert!(errors.contains(&ValidationError::DuplicateLink { parent: 1, child: 2 }));
    }

    #[test]
    fn convergence_is_allowed_once_a_second_parent_is_linked() {
        use crate::fixtures::new_node;
        use crate::models::NodePatch;
        use crate::reducer::{apply, Action};

        let graph = graph_with(
            &[(2, "a"), (3, "b")],
            &[(1, 2, LinkType::Always), (1, 3, LinkType::Always)],
        );
        let adding = apply(&graph, Action::StartAddNode { source: 2, target: None }).unwrap();

        let mut converging = new_node("c", LinkType::Success);
        converging.all_parents_must_converge = true;
        assert_eq!(
            apply(&adding, Action::CreateNode(converging)).unwrap_err(),
            ValidationError::InvalidConvergence { node: 4, parents: 1 }
        );

        let graph = [
            Action::CreateNode(new_node("c", LinkType::Success)),
            Action::SelectSourceForLinking(3),
            Action::SetAddLinkTarget(Some(4)),
            Action::CreateLink(LinkType::Success),
            Action::UpdateNode {
                id: 4,
                patch: NodePatch {
                    all_parents_must_converge: Some(true),
                    ..Default::default()
                },
            },
        ]
        .into_iter()
        .try_fold(adding, |state, action| apply(&state, action))
        .expect("second parent makes convergence valid");

        assert_eq!(graph.parents(4), vec![2, 3]);
        assert!(graph.node(4).is_some_and(|n| n.all_parents_must_converge));
        assert!(validate(&graph).is_empty());
    }

    #[test]
    fn convergence_needs_two_parents() {
        let mut graph = graph_with(
            &[(2, "a"), (3, "b"), (4, "c")],
            &[
                (1, 2, LinkType::Always),
                (1, 3, LinkType::Always),
                (2, 4, LinkType::Success),
            ],
        );
        graph.nodes[3].all_parents_must_converge = true;
        assert_eq!(
            validate(&graph),
            vec![ValidationError::InvalidConvergence { node: 4, parents: 1 }]
        );

        graph.links.push(Link { source: 3, target: 4, link_type: LinkType::Success });
        assert!(validate(&graph).is_empty());
    }

    #[test]
    fn identifiers_must_be_unique_among_live_nodes() {
        let mut graph = graph_with(
            &[(2, "same"), (3, "same")],
            &[(1, 2, LinkType::Always), (1, 3, LinkType::Always)],
        );
        assert_eq!(
            validate(&graph),
            vec![ValidationError::DuplicateIdentifier {
                identifier: "same".into(),
                node: 3,
                existing: 2,
            }]
        );

        // A tombstoned node frees its identifier.
        graph.links.retain(|l| l.target != 2);
        graph.nodes[1].is_deleted = true;
        assert!(validate(&graph).is_empty());
    }

    #[test]
    fn approval_without_identifier_is_rejected() {
        let mut graph = graph_with(&[(2, "")], &[(1, 2, LinkType::Always)]);
        graph.nodes[1].node_type = NodeType::WorkflowApprovalTemplate;
        graph.nodes[1].resource = Some(NodeResource::Approval(ApprovalTemplate {
            name: "Sign off".into(),
            description: String::new(),
            timeout: 0,
        }));

        assert_eq!(validate(&graph), vec![ValidationError::MissingIdentifier { node: 2 }]);
    }

    #[test]
    fn mismatched_resource_is_rejected() {
        let mut graph = graph_with(&[(2, "a")], &[(1, 2, LinkType::Always)]);
        graph.nodes[1].node_type = NodeType::ProjectSync;
        assert_eq!(
            validate(&graph),
            vec![ValidationError::ResourceMismatch { node: 2, node_type: NodeType::ProjectSync }]
        );
    }

    #[test]
    fn orphans_are_warnings_not_errors() {
        let graph = graph_with(&[(2, "a"), (3, "b")], &[(1, 2, LinkType::Always)]);
        assert!(validate(&graph).is_empty());
        assert_eq!(warnings(&graph), vec![Warning::OrphanedNode { node: 3 }]);
    }
}
