//! Builders shared by the unit tests of this crate.

use uuid::Uuid;

use remote::{LinkType, NodeResource, RemoteNode, TemplateKind, TemplateRef};

use crate::graph::Graph;
use crate::models::{Link, NewNode, Node, NodeId, NodeType};
use crate::reducer::{apply, Action};

/// A plain job template reference.
pub(crate) fn job_template(id: u64, name: &str) -> TemplateRef {
    TemplateRef {
        id,
        name: name.into(),
        kind: TemplateKind::JobTemplate,
        ask_on_launch: false,
        job_type: None,
    }
}

/// A live job-template node with the given identifier.
pub(crate) fn node(id: NodeId, identifier: &str) -> Node {
    Node {
        id,
        remote_id: None,
        identifier: identifier.into(),
        node_type: NodeType::JobTemplate,
        resource: Some(NodeResource::Template(job_template(7, "Deploy"))),
        prompt_values: None,
        all_parents_must_converge: false,
        is_deleted: false,
    }
}

/// A graph with START plus the given nodes and links.
pub(crate) fn graph_with(nodes: &[(NodeId, &str)], links: &[(NodeId, NodeId, LinkType)]) -> Graph {
    let mut all = vec![Node::start()];
    all.extend(nodes.iter().map(|(id, identifier)| node(*id, identifier)));
    let links = links
        .iter()
        .map(|&(source, target, link_type)| Link { source, target, link_type })
        .collect();
    Graph::from_parts(Uuid::nil(), all, links).expect("fixture graph should be consistent")
}

/// Same as [`graph_with`] but every node already exists on the server with
/// `remote_id = 100 + id`.
pub(crate) fn saved_graph_with(
    nodes: &[(NodeId, &str)],
    links: &[(NodeId, NodeId, LinkType)],
) -> Graph {
    let mut graph = graph_with(nodes, links);
    for node in graph.nodes.iter_mut().filter(|n| !n.is_start()) {
        node.remote_id = Some(100 + node.id);
    }
    graph
}

/// A job-template node definition for `CreateNode`.
pub(crate) fn new_node(identifier: &str, link_type: LinkType) -> NewNode {
    NewNode {
        link_type,
        identifier: identifier.into(),
        node_type: NodeType::JobTemplate,
        resource: NodeResource::Template(job_template(7, "Deploy")),
        prompt_values: None,
        all_parents_must_converge: false,
    }
}

/// Start adding below `source` and create the node in one go.
pub(crate) fn add_node(graph: &Graph, source: NodeId, new: NewNode) -> Graph {
    let started = apply(graph, Action::StartAddNode { source, target: None })
        .expect("start add node should succeed");
    apply(&started, Action::CreateNode(new)).expect("create node should succeed")
}

/// A stored node backed by a job template.
pub(crate) fn remote_node(id: u64, identifier: &str) -> RemoteNode {
    RemoteNode {
        id,
        identifier: identifier.into(),
        resource: NodeResource::Template(job_template(7, "Deploy")),
        all_parents_must_converge: false,
        prompts: None,
    }
}
