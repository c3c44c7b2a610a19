//! Wire records exchanged with the workflow node collection.
//!
//! Ids in this module are always *server* ids. The editor keeps its own
//! local ids and maps between the two.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LinkType
// ---------------------------------------------------------------------------

/// Run condition carried by a link from a parent node to a child node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Run the child whatever the parent's outcome.
    Always,
    /// Run the child when the parent succeeds.
    Success,
    /// Run the child when the parent fails.
    Failure,
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

impl std::str::FromStr for LinkType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always"  => Ok(Self::Always),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            other     => Err(format!("unknown link type: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Kind of unified job template a node can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    JobTemplate,
    WorkflowJobTemplate,
    Project,
    InventorySource,
    SystemJobTemplate,
}

/// Reference to an existing unified job template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub id: u64,
    pub name: String,
    pub kind: TemplateKind,
    /// The template asks for at least one value at launch time.
    #[serde(default)]
    pub ask_on_launch: bool,
    /// Management job flavour, e.g. `cleanup_jobs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
}

/// Approval step defined inline on the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Seconds before the approval times out; `0` waits forever.
    #[serde(default)]
    pub timeout: u64,
}

/// What a workflow node runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeResource {
    Template(TemplateRef),
    Approval(ApprovalTemplate),
}

impl NodeResource {
    /// Display name of the underlying template or approval.
    pub fn name(&self) -> &str {
        match self {
            Self::Template(t) => &t.name,
            Self::Approval(a) => &a.name,
        }
    }
}

/// Launch-time overrides captured when the node was created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptValues {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scm_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_tags: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_tags: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_vars: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_to_keep: Option<u32>,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Body of a create/update request for a workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePayload {
    pub identifier: String,
    pub resource: NodeResource,
    #[serde(default)]
    pub all_parents_must_converge: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptValues>,
}

/// A workflow node as stored on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteNode {
    pub id: u64,
    pub identifier: String,
    pub resource: NodeResource,
    #[serde(default)]
    pub all_parents_must_converge: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptValues>,
}

impl RemoteNode {
    /// Build the stored record for a freshly created node.
    pub fn from_payload(id: u64, payload: NodePayload) -> Self {
        Self {
            id,
            identifier: payload.identifier,
            resource: payload.resource,
            all_parents_must_converge: payload.all_parents_must_converge,
            prompts: payload.prompts,
        }
    }
}

/// A parent → child association between two stored nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemoteLink {
    pub source: u64,
    pub target: u64,
    pub link_type: LinkType,
}
