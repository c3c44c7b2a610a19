//! The workflow graph an edit session works on.
//!
//! `Graph` is a plain data container: an index-stable node arena (deleted
//! nodes are tombstoned, never removed mid-session), the link list, the id
//! counter and the transient selection state of the editor. It answers
//! structural questions; every change goes through [`crate::reducer::apply`].

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use remote::{LinkType, RemoteLink, RemoteNode};

use crate::error::FatalSessionError;
use crate::models::{Link, LinkKey, Node, NodeId, NodeType, WorkflowDocument, START_NODE_ID};

/// Nodes, links and the editor state around them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Scopes derived identifiers to this edit session.
    pub session_id: Uuid,
    /// Sorted by id. Tombstoned entries stay in place.
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
    /// Id the next created node receives.
    pub next_node_id: NodeId,

    // ------ Transient edit state ------
    #[serde(default)]
    pub node_to_delete: Option<NodeId>,
    #[serde(default)]
    pub node_to_edit: Option<NodeId>,
    #[serde(default)]
    pub node_to_view: Option<NodeId>,
    #[serde(default)]
    pub link_to_delete: Option<LinkKey>,
    #[serde(default)]
    pub link_to_edit: Option<LinkKey>,
    /// "Click two nodes to connect them" mode.
    #[serde(default)]
    pub adding_link: bool,
    #[serde(default)]
    pub add_link_source: Option<NodeId>,
    #[serde(default)]
    pub add_link_target: Option<NodeId>,
    /// Node a new node is being spawned from.
    #[serde(default)]
    pub add_node_source: Option<NodeId>,
    /// Set when the new node is inserted onto the link `source -> target`.
    #[serde(default)]
    pub add_node_target: Option<NodeId>,
    #[serde(default)]
    pub show_legend: bool,
    #[serde(default)]
    pub show_tools: bool,
    #[serde(default)]
    pub show_delete_all_nodes_modal: bool,
    #[serde(default)]
    pub show_unsaved_changes_modal: bool,
    #[serde(default)]
    pub unsaved_changes: bool,
}

impl Graph {
    /// A graph holding only START.
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            nodes: vec![Node::start()],
            links: Vec::new(),
            next_node_id: START_NODE_ID + 1,
            node_to_delete: None,
            node_to_edit: None,
            node_to_view: None,
            link_to_delete: None,
            link_to_edit: None,
            adding_link: false,
            add_link_source: None,
            add_link_target: None,
            add_node_source: None,
            add_node_target: None,
            show_legend: false,
            show_tools: false,
            show_delete_all_nodes_modal: false,
            show_unsaved_changes_modal: false,
            unsaved_changes: false,
        }
    }

    /// Assemble a graph from stored nodes and links.
    ///
    /// # Errors
    /// Any [`FatalSessionError`] from [`Graph::check_integrity`].
    pub fn from_parts(
        session_id: Uuid,
        mut nodes: Vec<Node>,
        links: Vec<Link>,
    ) -> Result<Self, FatalSessionError> {
        nodes.sort_by_key(|n| n.id);
        let max_id = nodes.last().map_or(START_NODE_ID, |n| n.id);

        let mut graph = Self::new(session_id);
        graph.nodes = nodes;
        graph.links = links;
        graph.next_node_id = max_id + 1;
        graph.check_integrity()?;
        Ok(graph)
    }

    /// Build the editor's view of a workflow fetched from the server.
    ///
    /// Local ids follow server id order. Nodes without a parent on the
    /// server hang off START with an `always` link.
    ///
    /// # Errors
    /// [`FatalSessionError::UnknownRemoteNode`] if a link names a node that
    /// was not returned.
    pub fn from_remote(
        session_id: Uuid,
        mut nodes: Vec<RemoteNode>,
        mut links: Vec<RemoteLink>,
    ) -> Result<Self, FatalSessionError> {
        nodes.sort_by_key(|n| n.id);
        links.sort();

        let mut graph = Self::new(session_id);
        let mut local_ids: HashMap<u64, NodeId> = HashMap::with_capacity(nodes.len());

        for record in nodes {
            let id = graph.next_node_id;
            graph.next_node_id += 1;
            local_ids.insert(record.id, id);
            graph.nodes.push(Node {
                id,
                remote_id: Some(record.id),
                identifier: record.identifier,
                node_type: NodeType::for_resource(&record.resource),
                resource: Some(record.resource),
                prompt_values: record.prompts,
                all_parents_must_converge: record.all_parents_must_converge,
                is_deleted: false,
            });
        }

        let local = |remote_id: u64| {
            local_ids
                .get(&remote_id)
                .copied()
                .ok_or(FatalSessionError::UnknownRemoteNode(remote_id))
        };
        for link in links {
            graph.links.push(Link {
                source: local(link.source)?,
                target: local(link.target)?,
                link_type: link.link_type,
            });
        }

        let roots: Vec<NodeId> = graph
            .live_nodes()
            .filter(|n| !n.is_start() && graph.inbound_links(n.id).next().is_none())
            .map(|n| n.id)
            .collect();
        for root in roots {
            graph.links.push(Link {
                source: START_NODE_ID,
                target: root,
                link_type: LinkType::Always,
            });
        }

        graph.check_integrity()?;
        Ok(graph)
    }

    /// Verify the guarantees every other component takes for granted.
    ///
    /// # Errors
    /// - [`FatalSessionError::MissingStart`] if node 1 is absent, deleted or mistyped.
    /// - [`FatalSessionError::StrayStart`] if another node claims to be START.
    /// - [`FatalSessionError::DuplicateNodeId`] if ids repeat.
    /// - [`FatalSessionError::DanglingLink`] if a link touches a missing or deleted node.
    /// - [`FatalSessionError::StaleIdCounter`] if the id counter could collide.
    pub fn check_integrity(&self) -> Result<(), FatalSessionError> {
        match self.node(START_NODE_ID) {
            Some(start) if start.node_type == NodeType::Start && start.is_live() => {}
            _ => return Err(FatalSessionError::MissingStart),
        }

        for pair in self.nodes.windows(2) {
            if pair[0].id >= pair[1].id {
                return Err(FatalSessionError::DuplicateNodeId(pair[1].id));
            }
        }

        if let Some(stray) = self
            .nodes
            .iter()
            .find(|n| !n.is_start() && n.node_type == NodeType::Start)
        {
            return Err(FatalSessionError::StrayStart(stray.id));
        }

        for link in &self.links {
            if self.live_node(link.source).is_none() || self.live_node(link.target).is_none() {
                return Err(FatalSessionError::DanglingLink {
                    parent: link.source,
                    child: link.target,
                });
            }
        }

        let max = self.nodes.last().map_or(START_NODE_ID, |n| n.id);
        if self.next_node_id <= max {
            return Err(FatalSessionError::StaleIdCounter { next: self.next_node_id, max });
        }

        Ok(())
    }

    /// Nodes and links without the editor state.
    pub fn document(&self) -> WorkflowDocument {
        WorkflowDocument {
            nodes: self.nodes.clone(),
            links: self.links.clone(),
        }
    }

    /// Drop tombstones and editor state once the session has committed.
    pub fn compact(&mut self) {
        self.nodes.retain(Node::is_live);
        self.clear_selection();
        self.show_delete_all_nodes_modal = false;
        self.show_unsaved_changes_modal = false;
        self.unsaved_changes = false;
    }

    /// Forget every pending node/link selection.
    pub fn clear_selection(&mut self) {
        self.node_to_delete = None;
        self.node_to_edit = None;
        self.node_to_view = None;
        self.link_to_delete = None;
        self.link_to_edit = None;
        self.adding_link = false;
        self.add_link_source = None;
        self.add_link_target = None;
        self.add_node_source = None;
        self.add_node_target = None;
    }

    // -----------------------------------------------------------------------
    // Node queries
    // -----------------------------------------------------------------------

    fn index_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.binary_search_by_key(&id, |n| n.id).ok()
    }

    /// Any node with this id, deleted or not.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.index_of(id).map(|i| &self.nodes[i])
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.index_of(id).map(move |i| &mut self.nodes[i])
    }

    /// The node with this id unless it was deleted.
    pub fn live_node(&self, id: NodeId) -> Option<&Node> {
        self.node(id).filter(|n| n.is_live())
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_live())
    }

    /// Number of live nodes, START included.
    pub fn live_node_count(&self) -> usize {
        self.live_nodes().count()
    }

    /// Ids of live nodes that are neither START nor reachable from it.
    pub fn orphaned_nodes(&self) -> Vec<NodeId> {
        let reachable = self.reachable_from_root();
        self.live_nodes()
            .filter(|n| !n.is_start() && !reachable.contains(&n.id))
            .map(|n| n.id)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Link queries
    // -----------------------------------------------------------------------

    pub fn link(&self, key: LinkKey) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.source == key.source && l.target == key.target)
    }

    pub(crate) fn link_mut(&mut self, key: LinkKey) -> Option<&mut Link> {
        self.links
            .iter_mut()
            .find(|l| l.source == key.source && l.target == key.target)
    }

    pub fn outbound_links(&self, id: NodeId) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(move |l| l.source == id)
    }

    pub fn inbound_links(&self, id: NodeId) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(move |l| l.target == id)
    }

    pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
        let mut parents: Vec<NodeId> = self.inbound_links(id).map(|l| l.source).collect();
        parents.sort_unstable();
        parents
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut children: Vec<NodeId> = self.outbound_links(id).map(|l| l.target).collect();
        children.sort_unstable();
        children
    }

    /// A link into a node that has other parents too. Removing it leaves
    /// the child connected, so it never orphans anything.
    pub fn is_convergence_link(&self, key: LinkKey) -> bool {
        self.link(key).is_some() && self.inbound_links(key.target).count() > 1
    }

    // -----------------------------------------------------------------------
    // Reachability
    // -----------------------------------------------------------------------

    /// Every node reachable from START by following links, START included.
    pub fn reachable_from_root(&self) -> HashSet<NodeId> {
        self.reachable_from(START_NODE_ID, |l| (l.source, l.target))
    }

    pub fn is_reachable_from_root(&self, id: NodeId) -> bool {
        self.live_node(id).is_some() && self.reachable_from_root().contains(&id)
    }

    /// Every node `id` can reach, `id` included.
    pub fn descendants(&self, id: NodeId) -> HashSet<NodeId> {
        self.reachable_from(id, |l| (l.source, l.target))
    }

    /// Every node that can reach `id`, `id` included.
    pub fn ancestors(&self, id: NodeId) -> HashSet<NodeId> {
        self.reachable_from(id, |l| (l.target, l.source))
    }

    /// Nodes a link from `source` may point at without breaking any
    /// invariant: live, not START, not `source`, not already a child and not
    /// an ancestor.
    pub fn linkable_targets(&self, source: NodeId) -> Vec<NodeId> {
        if self.live_node(source).is_none() {
            return Vec::new();
        }
        let ancestors = self.ancestors(source);
        let children: HashSet<NodeId> = self.outbound_links(source).map(|l| l.target).collect();
        self.live_nodes()
            .filter(|n| !n.is_start())
            .filter(|n| !ancestors.contains(&n.id) && !children.contains(&n.id))
            .map(|n| n.id)
            .collect()
    }

    fn reachable_from(
        &self,
        origin: NodeId,
        direction: impl Fn(&Link) -> (NodeId, NodeId),
    ) -> HashSet<NodeId> {
        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for link in &self.links {
            let (from, to) = direction(link);
            adjacency.entry(from).or_default().push(to);
        }

        let mut seen = HashSet::from([origin]);
        let mut queue = VecDeque::from([origin]);
        while let Some(id) = queue.pop_front() {
            for &next in adjacency.get(&id).into_iter().flatten() {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{graph_with, remote_node};

    #[test]
    fn new_graph_holds_only_start() {
        let graph = Graph::new(Uuid::nil());
        assert_eq!(graph.live_node_count(), 1);
        assert!(graph.node(START_NODE_ID).is_some_and(Node::is_start));
        assert_eq!(graph.next_node_id, 2);
        assert!(graph.check_integrity().is_ok());
    }

    #[test]
    fn reachability_follows_links_from_start() {
        // START → 2 → 3, 4 detached
        let graph = graph_with(
            &[(2, "a"), (3, "b"), (4, "c")],
            &[(1, 2, LinkType::Always), (2, 3, LinkType::Success)],
        );

        assert!(graph.is_reachable_from_root(3));
        assert!(!graph.is_reachable_from_root(4));
        assert_eq!(graph.orphaned_nodes(), vec![4]);
    }

    #[test]
    fn convergence_link_needs_a_second_parent() {
        //   START
        //   /   \
        //  2     3
        //   \   /
        //     4
        let graph = graph_with(
            &[(2, "a"), (3, "b"), (4, "c")],
            &[
                (1, 2, LinkType::Always),
                (1, 3, LinkType::Always),
                (2, 4, LinkType::Success),
                (3, 4, LinkType::Failure),
            ],
        );

        assert!(graph.is_convergence_link(LinkKey { source: 2, target: 4 }));
        assert!(!graph.is_convergence_link(LinkKey { source: 1, target: 2 }));
        assert_eq!(graph.parents(4), vec![2, 3]);
    }

    #[test]
    fn linkable_targets_exclude_ancestors_and_children() {
        // START → 2 → 3 → 4, plus 5 hanging off START
        let graph = graph_with(
            &[(2, "a"), (3, "b"), (4, "c"), (5, "d")],
            &[
                (1, 2, LinkType::Always),
                (2, 3, LinkType::Success),
                (3, 4, LinkType::Success),
                (1, 5, LinkType::Always),
            ],
        );

        assert_eq!(graph.linkable_targets(3), vec![5]);
        assert_eq!(graph.linkable_targets(5), vec![2, 3, 4]);
    }

    #[test]
    fn remote_roots_hang_off_start() {
        let graph = Graph::from_remote(
            Uuid::nil(),
            vec![remote_node(20, "deploy"), remote_node(10, "build")],
            vec![RemoteLink { source: 10, target: 20, link_type: LinkType::Success }],
        )
        .expect("remote workflow should load");

        // Local ids follow server id order: build = 2, deploy = 3.
        assert_eq!(graph.node(2).and_then(|n| n.remote_id), Some(10));
        assert_eq!(graph.node(3).and_then(|n| n.remote_id), Some(20));
        assert_eq!(
            graph.link(LinkKey { source: 1, target: 2 }).map(|l| l.link_type),
            Some(LinkType::Always)
        );
        assert!(graph.link(LinkKey { source: 1, target: 3 }).is_none());
        assert_eq!(graph.next_node_id, 4);
    }

    #[test]
    fn remote_link_to_unknown_node_is_fatal() {
        let result = Graph::from_remote(
            Uuid::nil(),
            vec![remote_node(10, "build")],
            vec![RemoteLink { source: 10, target: 99, link_type: LinkType::Always }],
        );
        assert_eq!(result, Err(FatalSessionError::UnknownRemoteNode(99)));
    }

    #[test]
    fn integrity_rejects_missing_start_and_dangling_links() {
        let mut graph = graph_with(&[(2, "a")], &[(1, 2, LinkType::Always)]);
        graph.nodes[1].is_deleted = true;
        assert!(matches!(
            graph.check_integrity(),
            Err(FatalSessionError::DanglingLink { parent: 1, child: 2 })
        ));

        graph.nodes.remove(0);
        assert_eq!(graph.check_integrity(), Err(FatalSessionError::MissingStart));
    }

    #[test]
    fn compact_drops_tombstones_and_selection() {
        let mut graph = graph_with(&[(2, "a"), (3, "b")], &[(1, 2, LinkType::Always)]);
        graph.nodes[2].is_deleted = true;
        graph.node_to_edit = Some(2);
        graph.unsaved_changes = true;

        graph.compact();

        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.node_to_edit, None);
        assert!(!graph.unsaved_changes);
        assert_eq!(graph.next_node_id, 4);
    }
}
