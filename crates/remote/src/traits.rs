//! The `WorkflowNodeApi` trait: every remote call the editor makes.

use async_trait::async_trait;

use crate::{LinkType, NodePayload, RemoteError, RemoteLink, RemoteNode};

/// Access to the node/link collection of one workflow job template.
///
/// Each method is a thin network call; the only things the editor relies on
/// are success/failure and, for creates, the id the server assigned.
#[async_trait]
pub trait WorkflowNodeApi: Send + Sync {
    /// Fetch every node of the workflow.
    async fn read_workflow_nodes(&self, template_id: u64) -> Result<Vec<RemoteNode>, RemoteError>;

    /// Fetch every parent → child association of the workflow.
    async fn read_workflow_node_links(
        &self,
        template_id: u64,
    ) -> Result<Vec<RemoteLink>, RemoteError>;

    /// Create a node and return it with its server id.
    async fn create_workflow_node(
        &self,
        template_id: u64,
        payload: NodePayload,
    ) -> Result<RemoteNode, RemoteError>;

    /// Replace the editable fields of an existing node.
    async fn update_workflow_node(
        &self,
        node_id: u64,
        payload: NodePayload,
    ) -> Result<(), RemoteError>;

    /// Attach `child` to `parent` under the given run condition.
    async fn associate_node(
        &self,
        parent_id: u64,
        child_id: u64,
        link_type: LinkType,
    ) -> Result<(), RemoteError>;

    /// Detach `child` from `parent`.
    async fn disassociate_node(
        &self,
        parent_id: u64,
        child_id: u64,
        link_type: LinkType,
    ) -> Result<(), RemoteError>;

    /// Change the run condition of an existing association.
    ///
    /// The server has no retype endpoint, so the default detaches the old
    /// association and attaches the new one.
    async fn update_workflow_node_link(
        &self,
        parent_id: u64,
        child_id: u64,
        from: LinkType,
        to: LinkType,
    ) -> Result<(), RemoteError> {
        self.disassociate_node(parent_id, child_id, from).await?;
        self.associate_node(parent_id, child_id, to).await
    }

    /// Delete a node; the server drops every association touching it.
    async fn destroy_workflow_node(&self, node_id: u64) -> Result<(), RemoteError>;
}
