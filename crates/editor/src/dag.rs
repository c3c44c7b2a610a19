//! DAG queries over the live part of a workflow graph.
//!
//! Both helpers run Kahn's algorithm with ties broken by ascending node id,
//! so their output only depends on the graph's topology.
//!
//! - [`topological_order`]: parents before children, or the offending link.
//! - [`depths`]: longest-path distance from START, used for layout columns
//!   and for the reconciler's waves.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::ValidationError;
use crate::graph::Graph;
use crate::models::{NodeId, START_NODE_ID};

/// Kahn's pass: the sorted prefix, plus whatever was left inside cycles.
fn kahn(graph: &Graph) -> (Vec<NodeId>, Vec<NodeId>) {
    // Build adjacency list and in-degree map over live nodes only.
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut in_degree: BTreeMap<NodeId, usize> = BTreeMap::new();

    for node in graph.live_nodes() {
        adjacency.entry(node.id).or_default();
        in_degree.entry(node.id).or_insert(0);
    }

    for link in &graph.links {
        if !in_degree.contains_key(&link.source) || !in_degree.contains_key(&link.target) {
            continue;
        }
        adjacency.entry(link.source).or_default().push(link.target);
        *in_degree.entry(link.target).or_insert(0) += 1;
    }

    // Seed the ready set with nodes that have no incoming links.
    let mut ready: BTreeSet<NodeId> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut sorted: Vec<NodeId> = Vec::with_capacity(in_degree.len());

    while let Some(node_id) = ready.pop_first() {
        sorted.push(node_id);

        if let Some(neighbours) = adjacency.get(&node_id) {
            for &neighbour in neighbours {
                if let Some(deg) = in_degree.get_mut(&neighbour) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(neighbour);
                    }
                }
            }
        }
    }

    let leftover = in_degree
        .into_iter()
        .filter(|(_, d)| *d > 0)
        .map(|(id, _)| id)
        .collect();
    (sorted, leftover)
}

/// Live node ids ordered so every parent precedes its children.
///
/// # Errors
/// [`ValidationError::CycleDetected`] naming the lowest link inside a cycle.
pub fn topological_order(graph: &Graph) -> Result<Vec<NodeId>, ValidationError> {
    let (sorted, leftover) = kahn(graph);
    if leftover.is_empty() {
        return Ok(sorted);
    }

    // Every leftover node sits on or behind a cycle; report a link between two of them.
    let stuck: BTreeSet<NodeId> = leftover.into_iter().collect();
    let offending = graph
        .links
        .iter()
        .filter(|l| stuck.contains(&l.source) && stuck.contains(&l.target))
        .min_by_key(|l| (l.source, l.target));

    Err(match offending {
        Some(link) => ValidationError::CycleDetected {
            parent: link.source,
            child: link.target,
        },
        None => ValidationError::UnknownNode(stuck.first().copied().unwrap_or(START_NODE_ID)),
    })
}

/// Longest-path depth of every live node.
///
/// START is 0. A node with no parents at all behaves as if it hung off
/// START and gets 1. Nodes caught in a cycle are pushed one column past the
/// deepest sorted node instead of failing.
pub fn depths(graph: &Graph) -> BTreeMap<NodeId, usize> {
    let (sorted, leftover) = kahn(graph);
    let mut depth: BTreeMap<NodeId, usize> = BTreeMap::new();

    for &id in &sorted {
        let own = if id == START_NODE_ID {
            0
        } else {
            graph
                .inbound_links(id)
                .filter_map(|l| depth.get(&l.source))
                .map(|d| d + 1)
                .max()
                .unwrap_or(1)
        };
        depth.insert(id, own);
    }

    let trailing = depth.values().copied().max().unwrap_or(0) + 1;
    for id in leftover {
        depth.insert(id, trailing);
    }
    depth
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::graph_with;
    use remote::LinkType;

    #[test]
    fn linear_chain_sorts_in_order() {
        // START → 2 → 3 → 4
        let graph = graph_with(
            &[(2, "a"), (3, "b"), (4, "c")],
            &[
                (1, 2, LinkType::Always),
                (2, 3, LinkType::Success),
                (3, 4, LinkType::Success),
            ],
        );

        let sorted = topological_order(&graph).expect("should be valid");
        assert_eq!(sorted, vec![1, 2, 3, 4]);
    }

    #[test]
    fn diamond_depth_uses_longest_path() {
        //   START
        //   /   \
        //  2     3
        //  |     |
        //  |     4
        //   \   /
        //     5
        let graph = graph_with(
            &[(2, "a"), (3, "b"), (4, "c"), (5, "d")],
            &[
                (1, 2, LinkType::Always),
                (1, 3, LinkType::Always),
                (3, 4, LinkType::Success),
                (2, 5, LinkType::Success),
                (4, 5, LinkType::Failure),
            ],
        );

        let depth = depths(&graph);
        assert_eq!(depth[&2], 1);
        assert_eq!(depth[&4], 2);
        assert_eq!(depth[&5], 3);
    }

    #[test]
    fn parentless_nodes_count_as_roots() {
        let graph = graph_with(&[(2, "a"), (3, "b")], &[(2, 3, LinkType::Success)]);
        let depth = depths(&graph);
        assert_eq!(depth[&2], 1);
        assert_eq!(depth[&3], 2);
    }

    #[test]
    fn cycle_is_detected_and_named() {
        // START → 2 → 3 → 4 → 2 (cycle!)
        let mut graph = graph_with(
            &[(2, "a"), (3, "b"), (4, "c")],
            &[
                (1, 2, LinkType::Always),
                (2, 3, LinkType::Success),
                (3, 4, LinkType::Success),
            ],
        );
        graph.links.push(crate::models::Link {
            source: 4,
            target: 2,
            link_type: LinkType::Always,
        });

        assert!(matches!(
            topological_order(&graph),
            Err(ValidationError::CycleDetected { parent: 2, child: 3 })
        ));

        // Layout still gets a depth for every node.
        let depth = depths(&graph);
        assert_eq!(depth.len(), 4);
        assert_eq!(depth[&2], 1);
    }

    #[test]
    fn deleted_nodes_are_ignored() {
        let mut graph = graph_with(&[(2, "a"), (3, "b")], &[(1, 2, LinkType::Always)]);
        graph.nodes[2].is_deleted = true;
        assert_eq!(topological_order(&graph).unwrap(), vec![1, 2]);
    }
}
