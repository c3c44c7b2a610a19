//! Core domain models for the workflow editor.
//!
//! These types describe one workflow graph as the editor holds it in
//! memory. Ids are editor-local; the server id of a node, when it has one,
//! lives in [`Node::remote_id`].

use serde::{Deserialize, Serialize};

use remote::{LinkType, NodePayload, NodeResource, PromptValues, TemplateKind};

/// Editor-local node id.
pub type NodeId = u64;

/// Id of the implicit START node every workflow begins with.
pub const START_NODE_ID: NodeId = 1;

// ---------------------------------------------------------------------------
// NodeType
// ---------------------------------------------------------------------------

/// What kind of step a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// The implicit entry node. Only node 1 has this type.
    Start,
    JobTemplate,
    WorkflowJobTemplate,
    WorkflowApprovalTemplate,
    ProjectSync,
    InventorySourceSync,
    ManagementJob,
}

impl NodeType {
    /// Whether launch-time prompt values make sense for this type.
    pub fn accepts_prompts(self) -> bool {
        matches!(
            self,
            Self::JobTemplate | Self::WorkflowJobTemplate | Self::ManagementJob
        )
    }

    /// The node type implied by a resource.
    pub fn for_resource(resource: &NodeResource) -> Self {
        match resource {
            NodeResource::Approval(_) => Self::WorkflowApprovalTemplate,
            NodeResource::Template(t) => t.kind.into(),
        }
    }

    /// Whether `resource` can back a node of this type.
    pub fn fits(self, resource: &NodeResource) -> bool {
        self != Self::Start && Self::for_resource(resource) == self
    }
}

impl From<TemplateKind> for NodeType {
    fn from(kind: TemplateKind) -> Self {
        match kind {
            TemplateKind::JobTemplate => Self::JobTemplate,
            TemplateKind::WorkflowJobTemplate => Self::WorkflowJobTemplate,
            TemplateKind::Project => Self::ProjectSync,
            TemplateKind::InventorySource => Self::InventorySourceSync,
            TemplateKind::SystemJobTemplate => Self::ManagementJob,
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::JobTemplate => "job_template",
            Self::WorkflowJobTemplate => "workflow_job_template",
            Self::WorkflowApprovalTemplate => "workflow_approval_template",
            Self::ProjectSync => "project_sync",
            Self::InventorySourceSync => "inventory_source_sync",
            Self::ManagementJob => "management_job",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Server id once the node has been saved.
    #[serde(default)]
    pub remote_id: Option<u64>,
    /// Workflow-unique label shown instead of the resource name.
    #[serde(default)]
    pub identifier: String,
    pub node_type: NodeType,
    /// `None` only for START.
    #[serde(default)]
    pub resource: Option<NodeResource>,
    #[serde(default)]
    pub prompt_values: Option<PromptValues>,
    /// Fire once every parent has resolved ("all") instead of on the first
    /// satisfied link ("any").
    #[serde(default)]
    pub all_parents_must_converge: bool,
    /// Tombstone. Deleted nodes stay in the arena until the session commits.
    #[serde(default)]
    pub is_deleted: bool,
}

impl Node {
    /// The START node.
    pub fn start() -> Self {
        Self {
            id: START_NODE_ID,
            remote_id: None,
            identifier: String::new(),
            node_type: NodeType::Start,
            resource: None,
            prompt_values: None,
            all_parents_must_converge: false,
            is_deleted: false,
        }
    }

    pub fn is_start(&self) -> bool {
        self.id == START_NODE_ID
    }

    pub fn is_live(&self) -> bool {
        !self.is_deleted
    }

    /// Label for messages: the identifier, else the resource name.
    pub fn display_name(&self) -> &str {
        if self.is_start() {
            return "START";
        }
        match (&self.identifier, &self.resource) {
            (identifier, _) if !identifier.is_empty() => identifier.as_str(),
            (_, Some(resource)) => resource.name(),
            _ => "",
        }
    }

    /// The create/update body for this node. `None` for START.
    pub fn payload(&self) -> Option<NodePayload> {
        let resource = self.resource.clone()?;
        Some(NodePayload {
            identifier: self.identifier.clone(),
            resource,
            all_parents_must_converge: self.all_parents_must_converge,
            prompts: self.prompt_values.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Directed, typed edge from a parent node to a child node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub source: NodeId,
    pub target: NodeId,
    pub link_type: LinkType,
}

impl Link {
    pub fn key(&self) -> LinkKey {
        LinkKey { source: self.source, target: self.target }
    }
}

/// Address of a link; there is at most one link per ordered pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkKey {
    pub source: NodeId,
    pub target: NodeId,
}

impl std::fmt::Display for LinkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

// ---------------------------------------------------------------------------
// Action payloads
// ---------------------------------------------------------------------------

/// Everything needed to create a node below the pending add-node source.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    /// Run condition of the link from the source.
    pub link_type: LinkType,
    /// Left blank to derive one for template-backed nodes.
    pub identifier: String,
    pub node_type: NodeType,
    pub resource: NodeResource,
    pub prompt_values: Option<PromptValues>,
    pub all_parents_must_converge: bool,
}

/// Partial update of a node; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePatch {
    pub identifier: Option<String>,
    pub node_type: Option<NodeType>,
    pub resource: Option<NodeResource>,
    /// `Some(None)` clears the prompt values.
    pub prompt_values: Option<Option<PromptValues>>,
    pub all_parents_must_converge: Option<bool>,
}

// ---------------------------------------------------------------------------
// WorkflowDocument
// ---------------------------------------------------------------------------

/// On-disk form of a workflow graph: just the nodes and links.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub links: Vec<Link>,
}
