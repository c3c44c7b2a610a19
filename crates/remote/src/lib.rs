//! `remote` crate: the contract between the workflow editor and the server
//! that stores workflow nodes and their links.
//!
//! The editor never talks HTTP itself. Every call it needs goes through
//! [`WorkflowNodeApi`]; a REST client implements it in production and
//! [`mock::MockNodeApi`] implements it in tests.

pub mod error;
pub mod mock;
pub mod traits;
pub mod types;

pub use error::RemoteError;
pub use traits::WorkflowNodeApi;
pub use types::{
    ApprovalTemplate, LinkType, NodePayload, NodeResource, PromptValues, RemoteLink, RemoteNode,
    TemplateKind, TemplateRef,
};
