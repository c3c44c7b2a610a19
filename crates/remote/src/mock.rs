//! `MockNodeApi`: an in-memory stand-in for the workflow node service.
//!
//! Useful in unit and integration tests where a real server is either
//! unavailable or irrelevant. It keeps nodes and links like the server would,
//! records every call, and can be told to fail specific calls.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::{LinkType, NodePayload, RemoteError, RemoteLink, RemoteNode, WorkflowNodeApi};

/// A call received by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ReadNodes,
    ReadLinks,
    Create { identifier: String },
    Update { id: u64 },
    Associate { parent: u64, child: u64, link_type: LinkType },
    Disassociate { parent: u64, child: u64, link_type: LinkType },
    Destroy { id: u64 },
}

#[derive(Debug, Default)]
struct MockState {
    nodes: BTreeMap<u64, RemoteNode>,
    links: BTreeSet<RemoteLink>,
    next_id: u64,
    calls: Vec<MockCall>,
    rejected_identifiers: HashSet<String>,
    rejected_associations: HashSet<(u64, u64)>,
    transient_failures: u32,
}

/// In-memory workflow node service.
///
/// Cloning shares the underlying state, so a test can hand one clone to the
/// code under test and inspect another.
#[derive(Debug, Clone)]
pub struct MockNodeApi {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockNodeApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNodeApi {
    /// An empty workflow. Server ids start at 100 so they never look like
    /// editor-local ids in assertions.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_id: 100,
                ..Default::default()
            })),
        }
    }

    /// A workflow that already holds the given nodes and links.
    pub fn with_workflow(nodes: Vec<RemoteNode>, links: Vec<RemoteLink>) -> Self {
        let api = Self::new();
        {
            let mut state = api.lock();
            for node in nodes {
                state.next_id = state.next_id.max(node.id + 1);
                state.nodes.insert(node.id, node);
            }
            state.links.extend(links);
        }
        api
    }

    /// Reject every create whose identifier matches.
    pub fn reject_identifier(&self, identifier: impl Into<String>) {
        self.lock().rejected_identifiers.insert(identifier.into());
    }

    /// Reject associating `child` under `parent`.
    pub fn reject_association(&self, parent: u64, child: u64) {
        self.lock().rejected_associations.insert((parent, child));
    }

    /// Fail the next `times` mutating calls with `RemoteError::Unavailable`.
    pub fn fail_transiently(&self, times: u32) {
        self.lock().transient_failures = times;
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Stored nodes, ordered by id.
    pub fn nodes(&self) -> Vec<RemoteNode> {
        self.lock().nodes.values().cloned().collect()
    }

    /// Stored links, ordered by (source, target, type).
    pub fn links(&self) -> Vec<RemoteLink> {
        self.lock().links.iter().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }
}

impl MockState {
    fn record(&mut self, call: MockCall) -> Result<(), RemoteError> {
        debug!(?call, "mock node api call");
        self.calls.push(call);
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(RemoteError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }

    fn require(&self, id: u64) -> Result<(), RemoteError> {
        if self.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(RemoteError::NotFound(id))
        }
    }
}

#[async_trait]
impl WorkflowNodeApi for MockNodeApi {
    async fn read_workflow_nodes(&self, _template_id: u64) -> Result<Vec<RemoteNode>, RemoteError> {
        let mut state = self.lock();
        state.calls.push(MockCall::ReadNodes);
        Ok(state.nodes.values().cloned().collect())
    }

    async fn read_workflow_node_links(
        &self,
        _template_id: u64,
    ) -> Result<Vec<RemoteLink>, RemoteError> {
        let mut state = self.lock();
        state.calls.push(MockCall::ReadLinks);
        Ok(state.links.iter().copied().collect())
    }

    async fn create_workflow_node(
        &self,
        _template_id: u64,
        payload: NodePayload,
    ) -> Result<RemoteNode, RemoteError> {
        let mut state = self.lock();
        state.record(MockCall::Create { identifier: payload.identifier.clone() })?;

        if state.rejected_identifiers.contains(&payload.identifier) {
            return Err(RemoteError::Rejected(format!(
                "identifier '{}' is not allowed",
                payload.identifier
            )));
        }
        if state.nodes.values().any(|n| n.identifier == payload.identifier) {
            return Err(RemoteError::Rejected(format!(
                "identifier '{}' already exists",
                payload.identifier
            )));
        }

        let id = state.next_id;
        state.next_id += 1;
        let node = RemoteNode::from_payload(id, payload);
        state.nodes.insert(id, node.clone());
        Ok(node)
    }

    async fn update_workflow_node(
        &self,
        node_id: u64,
        payload: NodePayload,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.record(MockCall::Update { id: node_id })?;
        state.require(node_id)?;
        state.nodes.insert(node_id, RemoteNode::from_payload(node_id, payload));
        Ok(())
    }

    async fn associate_node(
        &self,
        parent_id: u64,
        child_id: u64,
        link_type: LinkType,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.record(MockCall::Associate { parent: parent_id, child: child_id, link_type })?;
        state.require(parent_id)?;
        state.require(child_id)?;

        if parent_id == child_id || state.rejected_associations.contains(&(parent_id, child_id)) {
            return Err(RemoteError::Rejected(format!(
                "cannot associate {child_id} under {parent_id}"
            )));
        }
        if state
            .links
            .iter()
            .any(|l| l.source == parent_id && l.target == child_id)
        {
            return Err(RemoteError::Rejected(format!(
                "{child_id} is already a child of {parent_id}"
            )));
        }

        state.links.insert(RemoteLink { source: parent_id, target: child_id, link_type });
        Ok(())
    }

    async fn disassociate_node(
        &self,
        parent_id: u64,
        child_id: u64,
        link_type: LinkType,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.record(MockCall::Disassociate { parent: parent_id, child: child_id, link_type })?;
        let link = RemoteLink { source: parent_id, target: child_id, link_type };
        if !state.links.remove(&link) {
            return Err(RemoteError::Rejected(format!(
                "{child_id} is not a {link_type} child of {parent_id}"
            )));
        }
        Ok(())
    }

    async fn destroy_workflow_node(&self, node_id: u64) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.record(MockCall::Destroy { id: node_id })?;
        state.require(node_id)?;
        state.nodes.remove(&node_id);
        state.links.retain(|l| l.source != node_id && l.target != node_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NodeResource, TemplateKind, TemplateRef};

    fn payload(identifier: &str) -> NodePayload {
        NodePayload {
            identifier: identifier.into(),
            resource: NodeResource::Template(TemplateRef {
                id: 7,
                name: "Deploy".into(),
                kind: TemplateKind::JobTemplate,
                ask_on_launch: false,
                job_type: None,
            }),
            all_parents_must_converge: false,
            prompts: None,
        }
    }

    #[tokio::test]
    async fn destroy_cascades_to_links() {
        let api = MockNodeApi::new();
        let a = api.create_workflow_node(1, payload("a")).await.unwrap();
        let b = api.create_workflow_node(1, payload("b")).await.unwrap();
        api.associate_node(a.id, b.id, LinkType::Success).await.unwrap();

        api.destroy_workflow_node(a.id).await.unwrap();

        assert_eq!(api.nodes().len(), 1);
        assert!(api.links().is_empty());
    }

    #[tokio::test]
    async fn retype_goes_through_disassociate_and_associate() {
        let api = MockNodeApi::new();
        let a = api.create_workflow_node(1, payload("a")).await.unwrap();
        let b = api.create_workflow_node(1, payload("b")).await.unwrap();
        api.associate_node(a.id, b.id, LinkType::Success).await.unwrap();

        api.update_workflow_node_link(a.id, b.id, LinkType::Success, LinkType::Failure)
            .await
            .unwrap();

        assert_eq!(
            api.links(),
            vec![RemoteLink { source: a.id, target: b.id, link_type: LinkType::Failure }]
        );
    }

    #[tokio::test]
    async fn transient_failures_run_out() {
        let api = MockNodeApi::new();
        api.fail_transiently(1);

        let first = api.create_workflow_node(1, payload("a")).await;
        assert!(matches!(first, Err(RemoteError::Unavailable(_))));

        let second = api.create_workflow_node(1, payload("a")).await;
        assert!(second.is_ok());
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_identifier_is_rejected() {
        let api = MockNodeApi::new();
        api.create_workflow_node(1, payload("a")).await.unwrap();
        let again = api.create_workflow_node(1, payload("a")).await;
        assert!(matches!(again, Err(RemoteError::Rejected(_))));
    }
}
