//! Transition engine: every change to a [`Graph`] goes through [`apply`].
//!
//! `apply` never mutates its input. It clones the state, runs the action and
//! validates the result; a rejected action leaves the caller's state as it
//! was. Only violations the action introduces are rejected, so a workflow
//! fetched with a problem can still be edited until that problem is fixed.

use uuid::Uuid;

use remote::LinkType;

use crate::error::ValidationError;
use crate::graph::Graph;
use crate::models::{Link, LinkKey, NewNode, Node, NodeId, NodePatch, NodeType, START_NODE_ID};
use crate::validation::validate;

/// Something the user did in the editor.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    // ------ Nodes ------
    /// Open the add-node flow below `source`, or onto the link
    /// `source -> target` when `target` is set.
    StartAddNode { source: NodeId, target: Option<NodeId> },
    /// Close the add/edit/view node flow without changes.
    CancelNodeModal,
    /// Insert a node at the pending add-node position.
    CreateNode(NewNode),
    UpdateNode { id: NodeId, patch: NodePatch },
    SetNodeToEdit(Option<NodeId>),
    SetNodeToView(Option<NodeId>),
    SetNodeToDelete(Option<NodeId>),
    /// Delete the node picked with [`Action::SetNodeToDelete`].
    DeleteNode { reparent_children: bool },
    ToggleDeleteAllNodesModal,
    /// Delete everything but START.
    DeleteAllNodes,

    // ------ Links ------
    SelectSourceForLinking(NodeId),
    SetAddLinkTarget(Option<NodeId>),
    /// Link the selected source and target.
    CreateLink(LinkType),
    SetLinkToEdit(Option<LinkKey>),
    /// Change the type of the link picked with [`Action::SetLinkToEdit`].
    UpdateLink(LinkType),
    SetLinkToDelete(Option<LinkKey>),
    DeleteLink,
    CancelLinkModal,

    // ------ Chrome ------
    ToggleLegend,
    ToggleTools,
    ToggleUnsavedChangesModal,
}

impl Action {
    /// Whether the action can change nodes or links.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::CreateNode(_)
                | Self::UpdateNode { .. }
                | Self::DeleteNode { .. }
                | Self::DeleteAllNodes
                | Self::CreateLink(_)
                | Self::UpdateLink(_)
                | Self::DeleteLink
        )
    }
}

/// Run `action` against `state` and return the next state.
///
/// # Errors
/// The precondition the action failed, or the first validation error that
/// is present after the action but was not present before it.
pub fn apply(state: &Graph, action: Action) -> Result<Graph, ValidationError> {
    let structural = action.is_structural();
    let mut next = state.clone();
    transition(&mut next, action)?;

    if structural {
        let before = validate(state);
        if let Some(introduced) = validate(&next)
            .into_iter()
            .find(|e| !before.iter().any(|b| b.same_violation(e)))
        {
            return Err(introduced);
        }
        next.unsaved_changes = true;
    }
    Ok(next)
}

/// Identifier given to template-backed nodes the user left unnamed.
///
/// Stable for a given session and node id, so replaying the same actions
/// yields the same graph.
pub fn derive_identifier(session_id: &Uuid, id: NodeId) -> String {
    Uuid::new_v5(session_id, &id.to_be_bytes()).to_string()
}

fn transition(graph: &mut Graph, action: Action) -> Result<(), ValidationError> {
    match action {
        Action::StartAddNode { source, target } => start_add_node(graph, source, target),
        Action::CancelNodeModal => {
            graph.add_node_source = None;
            graph.add_node_target = None;
            graph.node_to_edit = None;
            graph.node_to_view = None;
            Ok(())
        }
        Action::CreateNode(new) => create_node(graph, new),
        Action::UpdateNode { id, patch } => update_node(graph, id, patch),
        Action::SetNodeToEdit(id) => {
            graph.node_to_edit = editable(graph, id)?;
            Ok(())
        }
        Action::SetNodeToView(id) => {
            graph.node_to_view = editable(graph, id)?;
            Ok(())
        }
        Action::SetNodeToDelete(id) => {
            graph.node_to_delete = editable(graph, id)?;
            Ok(())
        }
        Action::DeleteNode { reparent_children } => delete_node(graph, reparent_children),
        Action::ToggleDeleteAllNodesModal => {
            graph.show_delete_all_nodes_modal = !graph.show_delete_all_nodes_modal;
            Ok(())
        }
        Action::DeleteAllNodes => {
            for node in graph.nodes.iter_mut().filter(|n| !n.is_start()) {
                node.is_deleted = true;
            }
            graph.links.clear();
            graph.clear_selection();
            graph.show_delete_all_nodes_modal = false;
            Ok(())
        }
        Action::SelectSourceForLinking(source) => {
            if source == START_NODE_ID {
                return Err(ValidationError::StartNodeProtected);
            }
            require_live(graph, source)?;
            graph.clear_selection();
            graph.adding_link = true;
            graph.add_link_source = Some(source);
            Ok(())
        }
        Action::SetAddLinkTarget(target) => {
            let source = linking_source(graph)?;
            if let Some(target) = target {
                check_linkable(graph, source, target)?;
            }
            graph.add_link_target = target;
            Ok(())
        }
        Action::CreateLink(link_type) => create_link(graph, link_type),
        Action::SetLinkToEdit(key) => {
            graph.link_to_edit = selectable_link(graph, key)?;
            Ok(())
        }
        Action::UpdateLink(link_type) => {
            let key = graph
                .link_to_edit
                .ok_or(ValidationError::NothingSelected("edit"))?;
            let link = graph.link_mut(key).ok_or(ValidationError::UnknownLink {
                parent: key.source,
                child: key.target,
            })?;
            link.link_type = link_type;
            graph.link_to_edit = None;
            Ok(())
        }
        Action::SetLinkToDelete(key) => {
            graph.link_to_delete = selectable_link(graph, key)?;
            Ok(())
        }
        Action::DeleteLink => {
            let key = graph
                .link_to_delete
                .ok_or(ValidationError::NothingSelected("delete"))?;
            remove_link(graph, key)?;
            graph.link_to_delete = None;
            Ok(())
        }
        Action::CancelLinkModal => {
            graph.adding_link = false;
            graph.add_link_source = None;
            graph.add_link_target = None;
            graph.link_to_edit = None;
            graph.link_to_delete = None;
            Ok(())
        }
        Action::ToggleLegend => {
            graph.show_legend = !graph.show_legend;
            Ok(())
        }
        Action::ToggleTools => {
            graph.show_tools = !graph.show_tools;
            Ok(())
        }
        Action::ToggleUnsavedChangesModal => {
            graph.show_unsaved_changes_modal = !graph.show_unsaved_changes_modal;
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Preconditions
// ---------------------------------------------------------------------------

fn require_live(graph: &Graph, id: NodeId) -> Result<&Node, ValidationError> {
    graph.live_node(id).ok_or(ValidationError::UnknownNode(id))
}

/// A node selection that must not be START.
fn editable(graph: &Graph, id: Option<NodeId>) -> Result<Option<NodeId>, ValidationError> {
    if let Some(id) = id {
        if id == START_NODE_ID {
            return Err(ValidationError::StartNodeProtected);
        }
        require_live(graph, id)?;
    }
    Ok(id)
}

/// A link selection; links out of START are managed by the editor itself.
fn selectable_link(graph: &Graph, key: Option<LinkKey>) -> Result<Option<LinkKey>, ValidationError> {
    if let Some(key) = key {
        if graph.link(key).is_none() {
            return Err(ValidationError::UnknownLink {
                parent: key.source,
                child: key.target,
            });
        }
        if key.source == START_NODE_ID {
            return Err(ValidationError::StartNodeProtected);
        }
    }
    Ok(key)
}

fn linking_source(graph: &Graph) -> Result<NodeId, ValidationError> {
    match graph.add_link_source {
        Some(source) if graph.adding_link => Ok(source),
        _ => Err(ValidationError::NothingSelected("link from")),
    }
}

/// Why `source -> target` cannot be added, if it cannot.
fn check_linkable(graph: &Graph, source: NodeId, target: NodeId) -> Result<(), ValidationError> {
    require_live(graph, target)?;
    if target == START_NODE_ID {
        return Err(ValidationError::LinkIntoStart { parent: source });
    }
    if target == source {
        return Err(ValidationError::SelfLoop { node: source });
    }
    if graph.link(LinkKey { source, target }).is_some() {
        return Err(ValidationError::DuplicateLink { parent: source, child: target });
    }
    if graph.ancestors(source).contains(&target) {
        return Err(ValidationError::CycleDetected { parent: source, child: target });
    }
    Ok(())
}

fn remove_link(graph: &mut Graph, key: LinkKey) -> Result<Link, ValidationError> {
    let index = graph
        .links
        .iter()
        .position(|l| l.key() == key)
        .ok_or(ValidationError::UnknownLink {
            parent: key.source,
            child: key.target,
        })?;
    Ok(graph.links.remove(index))
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

fn start_add_node(
    graph: &mut Graph,
    source: NodeId,
    target: Option<NodeId>,
) -> Result<(), ValidationError> {
    require_live(graph, source)?;
    if let Some(target) = target {
        if graph.link(LinkKey { source, target }).is_none() {
            return Err(ValidationError::UnknownLink { parent: source, child: target });
        }
    }
    graph.clear_selection();
    graph.add_node_source = Some(source);
    graph.add_node_target = target;
    Ok(())
}

fn create_node(graph: &mut Graph, new: NewNode) -> Result<(), ValidationError> {
    let source = graph
        .add_node_source
        .ok_or(ValidationError::NothingSelected("add a node below"))?;
    require_live(graph, source)?;

    let id = graph.next_node_id;
    let identifier = resolve_identifier(&graph.session_id, id, new.identifier.trim(), new.node_type);
    let prompt_values = new.prompt_values.filter(|_| new.node_type.accepts_prompts());

    // Ids only grow, so pushing keeps `nodes` sorted.
    graph.next_node_id += 1;
    graph.nodes.push(Node {
        id,
        remote_id: None,
        identifier,
        node_type: new.node_type,
        resource: Some(new.resource),
        prompt_values,
        all_parents_must_converge: new.all_parents_must_converge,
        is_deleted: false,
    });

    if let Some(target) = graph.add_node_target {
        let replaced = remove_link(graph, LinkKey { source, target })?;
        graph.links.push(Link {
            source: id,
            target,
            link_type: replaced.link_type,
        });
    }

    graph.links.push(Link { source, target: id, link_type: new.link_type });

    graph.add_node_source = None;
    graph.add_node_target = None;
    Ok(())
}

fn update_node(graph: &mut Graph, id: NodeId, patch: NodePatch) -> Result<(), ValidationError> {
    if id == START_NODE_ID {
        return Err(ValidationError::StartNodeProtected);
    }
    let session_id = graph.session_id;
    let node = graph
        .node_mut(id)
        .filter(|n| n.is_live())
        .ok_or(ValidationError::UnknownNode(id))?;

    let identifier = patch.identifier.as_deref().map(str::trim);
    if node.remote_id.is_some() {
        let immutable = |field| ValidationError::ImmutableField { node: id, field };
        if identifier.is_some_and(|i| i != node.identifier) {
            return Err(immutable("identifier"));
        }
        if patch.resource.as_ref().is_some_and(|r| Some(r) != node.resource.as_ref()) {
            return Err(immutable("resource"));
        }
        if patch.node_type.is_some_and(|t| t != node.node_type) {
            return Err(immutable("node_type"));
        }
    }

    if let Some(node_type) = patch.node_type {
        node.node_type = node_type;
    }
    if let Some(resource) = patch.resource {
        node.resource = Some(resource);
    }
    if let Some(converge) = patch.all_parents_must_converge {
        node.all_parents_must_converge = converge;
    }
    if let Some(prompt_values) = patch.prompt_values {
        node.prompt_values = prompt_values;
    }
    if !node.node_type.accepts_prompts() {
        node.prompt_values = None;
    }
    if let Some(identifier) = identifier {
        node.identifier = resolve_identifier(&session_id, id, identifier, node.node_type);
    }

    graph.node_to_edit = None;
    Ok(())
}

/// Approvals keep a blank identifier so validation can flag it.
fn resolve_identifier(session_id: &Uuid, id: NodeId, identifier: &str, node_type: NodeType) -> String {
    if identifier.is_empty() && node_type != NodeType::WorkflowApprovalTemplate {
        derive_identifier(session_id, id)
    } else {
        identifier.to_owned()
    }
}

fn delete_node(graph: &mut Graph, reparent_children: bool) -> Result<(), ValidationError> {
    let id = graph
        .node_to_delete
        .ok_or(ValidationError::NothingSelected("delete"))?;
    if id == START_NODE_ID {
        return Err(ValidationError::StartNodeProtected);
    }
    require_live(graph, id)?;

    let parents = graph.parents(id);
    let mut child_links: Vec<Link> = graph.outbound_links(id).copied().collect();
    child_links.sort_by_key(|l| l.target);

    graph.links.retain(|l| l.source != id && l.target != id);
    if let Some(node) = graph.node_mut(id) {
        node.is_deleted = true;
    }

    if reparent_children {
        for child in &child_links {
            for &parent in parents.iter().filter(|&&p| p != START_NODE_ID) {
                let key = LinkKey { source: parent, target: child.target };
                if graph.link(key).is_none() {
                    graph.links.push(Link {
                        source: parent,
                        target: child.target,
                        link_type: child.link_type,
                    });
                }
            }
            let parentless = graph.inbound_links(child.target).next().is_none();
            if parents.contains(&START_NODE_ID) && parentless {
                graph.links.push(Link {
                    source: START_NODE_ID,
                    target: child.target,
                    link_type: LinkType::Always,
                });
            }
        }
    }

    graph.node_to_delete = None;
    if graph.node_to_edit == Some(id) {
        graph.node_to_edit = None;
    }
    if graph.node_to_view == Some(id) {
        graph.node_to_view = None;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

fn create_link(graph: &mut Graph, link_type: LinkType) -> Result<(), ValidationError> {
    let source = linking_source(graph)?;
    let target = graph
        .add_link_target
        .ok_or(ValidationError::NothingSelected("link to"))?;
    check_linkable(graph, source, target)?;

    // The target gains a real parent and stops being a root.
    graph
        .links
        .retain(|l| !(l.source == START_NODE_ID && l.target == target));
    graph.links.push(Link { source, target, link_type });

    graph.adding_link = false;
    graph.add_link_source = None;
    graph.add_link_target = None;
    Ok(())
}
