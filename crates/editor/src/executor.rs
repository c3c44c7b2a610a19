//! Save execution.
//!
//! `ReconcileExecutor` pushes a reconciliation plan to the server:
//! 1. Plans the waves with [`crate::reconcile::plan_waves`].
//! 2. Runs the waves one after another, the operations of a wave
//!    concurrently in chunks of `max_concurrency`.
//! 3. Retries `RemoteError::Unavailable` with exponential back-off, up to
//!    `max_retries` times per operation.
//! 4. Records server ids of created nodes so later waves can address them.
//! 5. Never stops early and never rolls back. An operation whose node could
//!    not be created is skipped, everything else still runs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use remote::{RemoteError, WorkflowNodeApi};

use crate::error::RemoteOperationError;
use crate::graph::Graph;
use crate::models::NodeId;
use crate::reconcile::{plan_waves, RemoteOp};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for saving.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Most remote calls in flight at once within a wave.
    pub max_concurrency: usize,
    /// Maximum number of times an unavailable-service error will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

// ---------------------------------------------------------------------------
// Save report
// ---------------------------------------------------------------------------

/// What happened to one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutcome {
    Applied,
    Failed(RemoteOperationError),
    /// Not attempted: `missing` never got a server id.
    Skipped { missing: NodeId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpResult {
    pub op: RemoteOp,
    pub outcome: OpOutcome,
}

/// Result of one save, in execution order.
#[derive(Debug, Clone)]
pub struct SaveReport {
    pub results: Vec<OpResult>,
    /// Server id of every live node after the save.
    pub remote_ids: BTreeMap<NodeId, u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SaveReport {
    /// Every operation was applied.
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(|r| r.outcome == OpOutcome::Applied)
    }

    pub fn applied(&self) -> Vec<&RemoteOp> {
        self.results
            .iter()
            .filter(|r| r.outcome == OpOutcome::Applied)
            .map(|r| &r.op)
            .collect()
    }

    pub fn failures(&self) -> Vec<&RemoteOperationError> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                OpOutcome::Failed(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    pub fn skipped(&self) -> Vec<&RemoteOp> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, OpOutcome::Skipped { .. }))
            .map(|r| &r.op)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ReconcileExecutor
// ---------------------------------------------------------------------------

/// Applies the difference between two graphs to the server.
pub struct ReconcileExecutor {
    api: Arc<dyn WorkflowNodeApi>,
    config: ReconcilerConfig,
}

impl ReconcileExecutor {
    pub fn new(api: Arc<dyn WorkflowNodeApi>, config: ReconcilerConfig) -> Self {
        Self { api, config }
    }

    /// Make the server's copy of `template_id` match `edited`, assuming it
    /// currently matches `baseline`.
    ///
    /// Failures are reported per operation in the returned [`SaveReport`].
    #[instrument(skip(self, baseline, edited))]
    pub async fn run(&self, template_id: u64, baseline: &Graph, edited: &Graph) -> SaveReport {
        let started_at = Utc::now();
        let waves = plan_waves(baseline, edited);
        let total: usize = waves.iter().map(Vec::len).sum();
        info!("saving workflow: {} operations in {} waves", total, waves.len());

        let mut remote_ids: BTreeMap<NodeId, u64> = baseline
            .nodes
            .iter()
            .chain(edited.nodes.iter())
            .filter_map(|n| n.remote_id.map(|remote_id| (n.id, remote_id)))
            .collect();

        let chunk_size = self.config.max_concurrency.max(1);
        let mut results = Vec::with_capacity(total);

        for (index, wave) in waves.into_iter().enumerate() {
            debug!(wave = index, ops = wave.len(), "running wave");

            for chunk in wave.chunks(chunk_size) {
                let outcomes = join_all(
                    chunk
                        .iter()
                        .map(|op| self.run_op(template_id, op, &remote_ids)),
                )
                .await;

                for (op, (outcome, created)) in chunk.iter().zip(outcomes) {
                    if let Some(created) = created {
                        if let RemoteOp::CreateNode { node, .. } = op {
                            remote_ids.insert(*node, created);
                        }
                    }
                    if let (RemoteOp::RemoveNode { node }, OpOutcome::Applied) = (op, &outcome) {
                        remote_ids.remove(node);
                    }
                    results.push(OpResult { op: op.clone(), outcome });
                }
            }
        }

        let report = SaveReport {
            results,
            remote_ids,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            "save finished: {} applied, {} failed, {} skipped",
            report.applied().len(),
            report.failures().len(),
            report.skipped().len()
        );
        report
    }

    // -----------------------------------------------------------------------
    // Internal: one operation, with its server ids resolved.
    // -----------------------------------------------------------------------

    async fn run_op(
        &self,
        template_id: u64,
        op: &RemoteOp,
        remote_ids: &BTreeMap<NodeId, u64>,
    ) -> (OpOutcome, Option<u64>) {
        let mut resolved = Vec::with_capacity(2);
        for node in op.requires() {
            match remote_ids.get(&node) {
                Some(&id) => resolved.push(id),
                None => {
                    warn!("skipping '{}': node {} was never created", op, node);
                    return (OpOutcome::Skipped { missing: node }, None);
                }
            }
        }

        match self.execute_with_retry(template_id, op, &resolved).await {
            Ok(created) => {
                debug!("'{}' applied", op);
                (OpOutcome::Applied, created)
            }
            Err(source) => {
                error!("'{}' failed: {}", op, source);
                let err = RemoteOperationError { op: op.clone(), source };
                (OpOutcome::Failed(err), None)
            }
        }
    }

    async fn execute_with_retry(
        &self,
        template_id: u64,
        op: &RemoteOp,
        resolved: &[u64],
    ) -> Result<Option<u64>, RemoteError> {
        let mut attempts = 0u32;

        loop {
            match self.call(template_id, op, resolved).await {
                Ok(created) => return Ok(created),

                Err(err) if err.is_retryable() && attempts < self.config.max_retries => {
                    attempts += 1;
                    let delay = self.config.retry_base_delay * 2u32.pow(attempts - 1);

                    warn!(
                        "'{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                        op, attempts, self.config.max_retries, delay, err
                    );

                    tokio::time::sleep(delay).await;
                }

                Err(err) => return Err(err),
            }
        }
    }

    /// Issue the call for `op`. Returns the server id of a created node.
    async fn call(
        &self,
        template_id: u64,
        op: &RemoteOp,
        resolved: &[u64],
    ) -> Result<Option<u64>, RemoteError> {
        match (op, resolved) {
            (RemoteOp::CreateNode { payload, .. }, []) => {
                let created = self
                    .api
                    .create_workflow_node(template_id, payload.clone())
                    .await?;
                Ok(Some(created.id))
            }
            (RemoteOp::UpdateNode { payload, .. }, &[id]) => {
                self.api.update_workflow_node(id, payload.clone()).await?;
                Ok(None)
            }
            (RemoteOp::RemoveNode { .. }, &[id]) => {
                self.api.destroy_workflow_node(id).await?;
                Ok(None)
            }
            (RemoteOp::AssociateNode { link_type, .. }, &[parent, child]) => {
                self.api.associate_node(parent, child, *link_type).await?;
                Ok(None)
            }
            (RemoteOp::RemoveLink { link_type, .. }, &[parent, child]) => {
                self.api.disassociate_node(parent, child, *link_type).await?;
                Ok(None)
            }
            (RemoteOp::UpdateLink { from, to, .. }, &[parent, child]) => {
                self.api
                    .update_workflow_node_link(parent, child, *from, *to)
                    .await?;
                Ok(None)
            }
            _ => Err(RemoteError::Rejected(format!("'{op}' is missing a server id"))),
        }
    }
}
