//! Editor-level error types.

use thiserror::Error;

use remote::RemoteError;

use crate::models::{NodeId, NodeType};
use crate::reconcile::RemoteOp;

/// A transition the editor refused, with the invariant it would break.
///
/// Always structured so callers can route it to the field or step that
/// caused it instead of showing a bare string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    // ------ Graph invariants ------

    /// Following links from `child` leads back to `parent`.
    #[error("link {parent} -> {child} would create a cycle")]
    CycleDetected { parent: NodeId, child: NodeId },

    /// A link from a node to itself.
    #[error("node {node} cannot link to itself")]
    SelfLoop { node: NodeId },

    /// START never has parents.
    #[error("node {parent} cannot link into START")]
    LinkIntoStart { parent: NodeId },

    /// Two links between the same ordered pair of nodes.
    #[error("nodes {parent} and {child} are already linked")]
    DuplicateLink { parent: NodeId, child: NodeId },

    /// "All parents must converge" needs at least two parents.
    #[error("node {node} converges on all parents but has {parents} parent(s)")]
    InvalidConvergence { node: NodeId, parents: usize },

    /// Another live node already uses this identifier.
    #[error("identifier '{identifier}' of node {node} is already used by node {existing}")]
    DuplicateIdentifier {
        identifier: String,
        node: NodeId,
        existing: NodeId,
    },

    /// Approval nodes need an identifier.
    #[error("node {node} requires an identifier")]
    MissingIdentifier { node: NodeId },

    /// The node's resource does not back its declared type.
    #[error("node {node} cannot be a {node_type} with the selected resource")]
    ResourceMismatch { node: NodeId, node_type: NodeType },

    // ------ Transition preconditions ------

    /// The action names a node that does not exist or was deleted.
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    /// The action names a link that does not exist.
    #[error("there is no link {parent} -> {child}")]
    UnknownLink { parent: NodeId, child: NodeId },

    /// START cannot be edited, deleted or picked as a link endpoint.
    #[error("the START node cannot be modified")]
    StartNodeProtected,

    /// The action needs a prior selection that was never made.
    #[error("nothing selected to {0}")]
    NothingSelected(&'static str),

    /// Identifier and resource are fixed once the node exists on the server.
    #[error("{field} of node {node} cannot change after it has been saved")]
    ImmutableField { node: NodeId, field: &'static str },
}

impl ValidationError {
    /// Same kind of violation on the same nodes, whatever the details.
    pub fn same_violation(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other) && self.nodes() == other.nodes()
    }

    /// Node ids the error points at, for highlighting.
    pub fn nodes(&self) -> Vec<NodeId> {
        match self {
            Self::CycleDetected { parent, child }
            | Self::DuplicateLink { parent, child }
            | Self::UnknownLink { parent, child } => vec![*parent, *child],
            Self::DuplicateIdentifier { node, existing, .. } => vec![*node, *existing],
            Self::SelfLoop { node }
            | Self::InvalidConvergence { node, .. }
            | Self::MissingIdentifier { node }
            | Self::ResourceMismatch { node, .. }
            | Self::ImmutableField { node, .. }
            | Self::UnknownNode(node) => vec![*node],
            Self::LinkIntoStart { parent } => vec![*parent],
            Self::StartNodeProtected | Self::NothingSelected(_) => Vec::new(),
        }
    }
}

/// A legal but noteworthy state the user should see before saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// The node has no path from START and will run as soon as the
    /// workflow launches.
    OrphanedNode { node: NodeId },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrphanedNode { node } => write!(
                f,
                "node {node} is no longer connected to START and will run immediately on launch"
            ),
        }
    }
}

/// The graph lost a structural guarantee the editor relies on. Not expected
/// in normal operation; the session has to be thrown away.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FatalSessionError {
    #[error("workflow graph has no START node")]
    MissingStart,

    #[error("node {0} is not the START node but is typed as one")]
    StrayStart(NodeId),

    #[error("node id {0} appears more than once")]
    DuplicateNodeId(NodeId),

    #[error("link {parent} -> {child} references a missing or deleted node")]
    DanglingLink { parent: NodeId, child: NodeId },

    #[error("server link references unknown workflow node {0}")]
    UnknownRemoteNode(u64),

    #[error("next node id {next} is not above existing id {max}")]
    StaleIdCounter { next: NodeId, max: NodeId },
}

/// One reconciler operation the server refused.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{op} failed: {source}")]
pub struct RemoteOperationError {
    pub op: RemoteOp,
    #[source]
    pub source: RemoteError,
}

/// Errors surfaced by [`crate::session::EditorSession`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("editor session is inconsistent: {0}")]
    Fatal(#[from] FatalSessionError),

    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),
}
