//! `editor` crate: in-memory editing of a workflow graph and reconciliation
//! of the edits with the server.
//!
//! An [`EditorSession`] owns the working graph. Every edit is an [`Action`]
//! run through the transition engine in [`reducer`]; saving diffs the graph
//! against the last known server state and replays the difference through a
//! [`remote::WorkflowNodeApi`].

pub mod models;
pub mod error;
pub mod graph;
pub mod dag;
pub mod validation;
pub mod reducer;
pub mod layout;
pub mod reconcile;
pub mod executor;
pub mod session;
pub mod wizard;

pub use models::{Link, LinkKey, NewNode, Node, NodeId, NodePatch, NodeType, WorkflowDocument, START_NODE_ID};
pub use error::{FatalSessionError, RemoteOperationError, SessionError, ValidationError, Warning};
pub use graph::Graph;
pub use reducer::{apply, Action};
pub use layout::{layout, LayoutConfig, Orientation, Position};
pub use reconcile::{diff, plan_waves, RemoteOp};
pub use executor::{OpOutcome, ReconcileExecutor, ReconcilerConfig, SaveReport};
pub use session::EditorSession;
pub use wizard::NodeWizard;

#[cfg(test)]
mod fixtures;

#[cfg(test)]
mod executor_tests;
