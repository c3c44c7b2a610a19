//! `EditorSession`, the state holder for one open workflow.
//!
//! It owns the graph being edited and the baseline it is compared with on
//! save. All edits go through [`EditorSession::dispatch`]; nothing else
//! mutates the graph except saving and reloading.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use remote::{RemoteLink, RemoteNode, WorkflowNodeApi};

use crate::error::{FatalSessionError, SessionError, ValidationError, Warning};
use crate::executor::{ReconcileExecutor, ReconcilerConfig, SaveReport};
use crate::graph::Graph;
use crate::layout::{layout, LayoutConfig, Position};
use crate::models::NodeId;
use crate::reconcile::{advance_baseline, diff, RemoteOp};
use crate::reducer::{apply, Action};
use crate::validation::{validate, warnings};

/// One workflow job template opened for editing.
#[derive(Debug, Clone)]
pub struct EditorSession {
    template_id: u64,
    graph: Graph,
    /// The server's copy as of the last load or save.
    baseline: Graph,
    last_error: Option<ValidationError>,
}

impl EditorSession {
    /// A workflow with no nodes yet.
    pub fn new(template_id: u64) -> Self {
        Self::from_graph(template_id, Graph::new(Uuid::new_v4()))
    }

    /// Start editing `graph`, treating it as what the server holds.
    pub fn from_graph(template_id: u64, graph: Graph) -> Self {
        Self {
            template_id,
            baseline: graph.clone(),
            graph,
            last_error: None,
        }
    }

    /// Start editing a workflow fetched by the caller.
    ///
    /// # Errors
    /// [`FatalSessionError`] if the links do not match the nodes.
    pub fn from_remote(
        template_id: u64,
        nodes: Vec<RemoteNode>,
        links: Vec<RemoteLink>,
    ) -> Result<Self, FatalSessionError> {
        let graph = Graph::from_remote(Uuid::new_v4(), nodes, links)?;
        Ok(Self::from_graph(template_id, graph))
    }

    /// Fetch a workflow and start editing it.
    ///
    /// # Errors
    /// [`SessionError::Remote`] if either read fails, [`SessionError::Fatal`]
    /// if the server's nodes and links disagree.
    #[instrument(skip(api))]
    pub async fn load(api: &dyn WorkflowNodeApi, template_id: u64) -> Result<Self, SessionError> {
        let (nodes, links) = fetch(api, template_id).await?;
        info!("loaded workflow: {} nodes, {} links", nodes.len(), links.len());
        Ok(Self::from_remote(template_id, nodes, links)?)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn template_id(&self) -> u64 {
        self.template_id
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn baseline(&self) -> &Graph {
        &self.baseline
    }

    /// Why the most recent dispatch was refused, until the next one succeeds.
    pub fn last_error(&self) -> Option<&ValidationError> {
        self.last_error.as_ref()
    }

    /// Invariants the current graph breaks. Empty for anything built through
    /// `dispatch` from a clean workflow.
    pub fn errors(&self) -> Vec<ValidationError> {
        validate(&self.graph)
    }

    pub fn warnings(&self) -> Vec<Warning> {
        warnings(&self.graph)
    }

    pub fn layout(&self, config: &LayoutConfig) -> BTreeMap<NodeId, Position> {
        layout(&self.graph, config)
    }

    // -----------------------------------------------------------------------
    // Editing
    // -----------------------------------------------------------------------

    /// Apply one action. On success returns the warnings of the new state;
    /// on failure the graph is untouched.
    ///
    /// # Errors
    /// The [`ValidationError`] the transition engine rejected the action with.
    pub fn dispatch(&mut self, action: Action) -> Result<Vec<Warning>, ValidationError> {
        debug!(?action, "dispatch");
        match apply(&self.graph, action) {
            Ok(next) => {
                self.graph = next;
                self.last_error = None;
                Ok(self.warnings())
            }
            Err(err) => {
                warn!("action rejected: {}", err);
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Whether saving would change anything on the server.
    pub fn has_unsaved_changes(&self) -> bool {
        !self.plan().is_empty()
    }

    /// The operations a save would run, in order.
    pub fn plan(&self) -> Vec<RemoteOp> {
        diff(&self.baseline, &self.graph)
    }

    /// Throw away every edit since the last load or save.
    pub fn discard(&mut self) {
        let next_node_id = self.graph.next_node_id;
        self.graph = self.baseline.clone();
        self.graph.next_node_id = self.graph.next_node_id.max(next_node_id);
        self.graph.clear_selection();
        self.graph.unsaved_changes = false;
        self.last_error = None;
    }

    // -----------------------------------------------------------------------
    // Server round trips
    // -----------------------------------------------------------------------

    /// Push the edits to the server.
    ///
    /// After a complete save the edited graph becomes the new baseline.
    /// After a partial one the baseline only moves by what was applied, so
    /// [`EditorSession::plan`] then holds exactly the outstanding operations
    /// and calling `save` again retries just those.
    ///
    /// # Errors
    /// [`SessionError::Fatal`] if the graph lost a structural guarantee;
    /// nothing is sent in that case. Remote failures are not errors, they
    /// are listed in the returned report.
    #[instrument(skip(self, api, config), fields(template_id = self.template_id))]
    pub async fn save(
        &mut self,
        api: Arc<dyn WorkflowNodeApi>,
        config: &ReconcilerConfig,
    ) -> Result<SaveReport, SessionError> {
        self.graph.check_integrity()?;

        let executor = ReconcileExecutor::new(api, config.clone());
        let report = executor.run(self.template_id, &self.baseline, &self.graph).await;

        for (&id, &remote_id) in &report.remote_ids {
            if let Some(node) = self.graph.node_mut(id) {
                node.remote_id = Some(remote_id);
            }
        }

        if report.is_complete() {
            self.graph.compact();
            self.baseline = self.graph.clone();
            info!("workflow saved");
        } else {
            for op in report.applied() {
                advance_baseline(&mut self.baseline, &self.graph, op);
            }
            warn!(
                "workflow partially saved: {} operations outstanding",
                self.plan().len()
            );
        }
        Ok(report)
    }

    /// Re-fetch the workflow, dropping every unsaved edit.
    ///
    /// # Errors
    /// Same as [`EditorSession::load`]; the session is unchanged on error.
    #[instrument(skip(self, api), fields(template_id = self.template_id))]
    pub async fn reload(&mut self, api: &dyn WorkflowNodeApi) -> Result<(), SessionError> {
        let (nodes, links) = fetch(api, self.template_id).await?;
        let mut graph = Graph::from_remote(self.graph.session_id, nodes, links)?;
        // Local ids and the identifiers derived from them never repeat in a session.
        graph.next_node_id = graph
            .next_node_id
            .max(self.graph.next_node_id)
            .max(self.baseline.next_node_id);
        info!("reloaded workflow: {} nodes", graph.live_node_count() - 1);

        self.baseline = graph.clone();
        self.graph = graph;
        self.last_error = None;
        Ok(())
    }
}

async fn fetch(
    api: &dyn WorkflowNodeApi,
    template_id: u64,
) -> Result<(Vec<RemoteNode>, Vec<RemoteLink>), SessionError> {
    let nodes = api.read_workflow_nodes(template_id).await?;
    let links = api.read_workflow_node_links(template_id).await?;
    Ok((nodes, links))
}
