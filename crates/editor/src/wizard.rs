//! `NodeWizard`, the multi-step add/edit node flow.
//!
//! Steps, in order:
//! - `RunType`: run condition of the link from the parent. Only when adding
//!   below a node other than START.
//! - `NodeType`: node type, resource or approval fields, convergence and
//!   identifier.
//! - `Prompts`: launch-time values, when the template asks for them.
//! - `DaysToKeep`: retention for the cleanup management jobs.
//!
//! The wizard validates its own fields. On finish it hands a single action to
//! the session and, if the transition engine refuses it, keeps the error on
//! the step that owns the offending field.

use std::collections::BTreeSet;
use std::fmt;

use remote::{ApprovalTemplate, LinkType, NodeResource, PromptValues, TemplateRef};

use crate::error::{ValidationError, Warning};
use crate::graph::Graph;
use crate::models::{NewNode, NodeId, NodePatch, NodeType, START_NODE_ID};
use crate::reducer::Action;
use crate::session::EditorSession;

/// Management job types that take a retention period.
const CLEANUP_JOB_TYPES: [&str; 2] = ["cleanup_jobs", "cleanup_activitystream"];

/// Retention offered for cleanup jobs until the user changes it.
pub const DEFAULT_DAYS_TO_KEEP: u32 = 30;

// ---------------------------------------------------------------------------
// Form model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StepId {
    RunType,
    NodeType,
    Prompts,
    DaysToKeep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Convergence {
    #[default]
    Any,
    All,
}

/// Field of the wizard an error is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    LinkType,
    NodeType,
    Resource,
    ApprovalName,
    Convergence,
    Identifier,
    ExtraVars,
    DaysToKeep,
}

/// Everything the user can type or pick in the wizard.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFormValues {
    pub link_type: LinkType,
    pub node_type: Option<NodeType>,
    pub template: Option<TemplateRef>,
    pub approval_name: String,
    pub approval_description: String,
    pub timeout_minutes: u64,
    pub timeout_seconds: u64,
    pub convergence: Convergence,
    pub identifier: String,
    pub prompts: PromptValues,
    pub days_to_keep: Option<u32>,
}

impl Default for NodeFormValues {
    fn default() -> Self {
        Self {
            link_type: LinkType::Success,
            node_type: None,
            template: None,
            approval_name: String::new(),
            approval_description: String::new(),
            timeout_minutes: 0,
            timeout_seconds: 0,
            convergence: Convergence::Any,
            identifier: String::new(),
            prompts: PromptValues::default(),
            days_to_keep: Some(DEFAULT_DAYS_TO_KEEP),
        }
    }
}

impl NodeFormValues {
    /// Switch node type, clearing whatever only made sense for the old one.
    pub fn set_node_type(&mut self, node_type: NodeType) {
        self.node_type = Some(node_type);
        self.template = None;
        self.approval_name.clear();
        self.approval_description.clear();
        self.timeout_minutes = 0;
        self.timeout_seconds = 0;
        self.convergence = Convergence::Any;
    }

    /// Approval timeout in seconds.
    pub fn timeout(&self) -> u64 {
        self.timeout_minutes * 60 + self.timeout_seconds
    }

    fn is_approval(&self) -> bool {
        self.node_type == Some(NodeType::WorkflowApprovalTemplate)
    }

    fn asks_for_prompts(&self) -> bool {
        self.node_type
            .is_some_and(|t| matches!(t, NodeType::JobTemplate | NodeType::WorkflowJobTemplate))
            && self.template.as_ref().is_some_and(|t| t.ask_on_launch)
    }

    fn is_cleanup_job(&self) -> bool {
        self.node_type == Some(NodeType::ManagementJob)
            && self
                .template
                .as_ref()
                .and_then(|t| t.job_type.as_deref())
                .is_some_and(|job_type| CLEANUP_JOB_TYPES.contains(&job_type))
    }

    fn resource(&self) -> Option<NodeResource> {
        if self.is_approval() {
            return Some(NodeResource::Approval(ApprovalTemplate {
                name: self.approval_name.trim().to_owned(),
                description: self.approval_description.clone(),
                timeout: self.timeout(),
            }));
        }
        self.template.clone().map(NodeResource::Template)
    }

    fn prompt_values(&self) -> Option<PromptValues> {
        if self.asks_for_prompts() {
            return Some(self.prompts.clone());
        }
        if self.is_cleanup_job() {
            return Some(PromptValues {
                days_to_keep: self.days_to_keep,
                ..Default::default()
            });
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum StepErrorReason {
    Required,
    /// Extra variables must be a key/value mapping.
    NotAMapping,
    /// The picked template is not of the selected node type.
    KindMismatch,
    /// The transition engine refused the finished node.
    Rejected(ValidationError),
}

/// An error shown on a wizard step. `field: None` is a step-wide message.
#[derive(Debug, Clone, PartialEq)]
pub struct StepError {
    pub step: StepId,
    pub field: Option<FormField>,
    pub reason: StepErrorReason,
}

impl StepError {
    fn new(step: StepId, field: FormField, reason: StepErrorReason) -> Self {
        Self { step, field: Some(field), reason }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            StepErrorReason::Required => f.write_str("this field must not be blank"),
            StepErrorReason::NotAMapping => f.write_str("extra variables must be a mapping"),
            StepErrorReason::KindMismatch => {
                f.write_str("the selected resource does not match the node type")
            }
            StepErrorReason::Rejected(err) => write!(f, "{err}"),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeWizard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardMode {
    Add { source: NodeId },
    Edit { node: NodeId },
}

#[derive(Debug, Clone)]
pub struct NodeWizard {
    mode: WizardMode,
    values: NodeFormValues,
    ask_link_type: bool,
    current: usize,
    visited: BTreeSet<StepId>,
    submit_error: Option<StepError>,
}

impl NodeWizard {
    /// Wizard for the add-node flow the graph has open.
    ///
    /// # Errors
    /// [`ValidationError::NothingSelected`] if no add-node flow was started.
    pub fn add(graph: &Graph) -> Result<Self, ValidationError> {
        let source = graph
            .add_node_source
            .ok_or(ValidationError::NothingSelected("add a node below"))?;
        Ok(Self {
            mode: WizardMode::Add { source },
            values: NodeFormValues::default(),
            ask_link_type: source != START_NODE_ID,
            current: 0,
            visited: BTreeSet::new(),
            submit_error: None,
        })
    }

    /// Wizard pre-filled with an existing node.
    ///
    /// # Errors
    /// [`ValidationError::StartNodeProtected`] for START,
    /// [`ValidationError::UnknownNode`] for a missing or deleted node.
    pub fn edit(graph: &Graph, id: NodeId) -> Result<Self, ValidationError> {
        if id == START_NODE_ID {
            return Err(ValidationError::StartNodeProtected);
        }
        let node = graph.live_node(id).ok_or(ValidationError::UnknownNode(id))?;

        let mut values = NodeFormValues {
            node_type: Some(node.node_type),
            identifier: node.identifier.clone(),
            convergence: if node.all_parents_must_converge {
                Convergence::All
            } else {
                Convergence::Any
            },
            ..NodeFormValues::default()
        };
        match &node.resource {
            Some(NodeResource::Template(template)) => values.template = Some(template.clone()),
            Some(NodeResource::Approval(approval)) => {
                values.approval_name = approval.name.clone();
                values.approval_description = approval.description.clone();
                values.timeout_minutes = approval.timeout / 60;
                values.timeout_seconds = approval.timeout % 60;
            }
            None => {}
        }
        if let Some(prompts) = &node.prompt_values {
            values.prompts = prompts.clone();
            if prompts.days_to_keep.is_some() {
                values.days_to_keep = prompts.days_to_keep;
            }
        }

        Ok(Self {
            mode: WizardMode::Edit { node: id },
            values,
            ask_link_type: false,
            current: 0,
            visited: BTreeSet::new(),
            submit_error: None,
        })
    }

    pub fn mode(&self) -> WizardMode {
        self.mode
    }

    pub fn values(&self) -> &NodeFormValues {
        &self.values
    }

    /// Mutable access to the form. Editing clears the last submit error.
    pub fn values_mut(&mut self) -> &mut NodeFormValues {
        self.submit_error = None;
        &mut self.values
    }

    /// The steps that currently apply; they change with the node type and
    /// the picked template.
    pub fn steps(&self) -> Vec<StepId> {
        let mut steps = Vec::with_capacity(3);
        if self.ask_link_type {
            steps.push(StepId::RunType);
        }
        steps.push(StepId::NodeType);
        if self.values.asks_for_prompts() {
            steps.push(StepId::Prompts);
        }
        if self.values.is_cleanup_job() {
            steps.push(StepId::DaysToKeep);
        }
        steps
    }

    pub fn current_step(&self) -> StepId {
        let steps = self.steps();
        steps
            .get(self.current.min(steps.len().saturating_sub(1)))
            .copied()
            .unwrap_or(StepId::NodeType)
    }

    /// Field-level problems of one step, ignoring what has been visited.
    pub fn validate_step(&self, step: StepId) -> Vec<StepError> {
        let values = &self.values;
        let mut errors = Vec::new();
        match step {
            StepId::RunType => {}
            StepId::NodeType => {
                let Some(node_type) = values.node_type else {
                    errors.push(StepError::new(step, FormField::NodeType, StepErrorReason::Required));
                    return errors;
                };
                if values.is_approval() {
                    if values.approval_name.trim().is_empty() {
                        errors.push(StepError::new(
                            step,
                            FormField::ApprovalName,
                            StepErrorReason::Required,
                        ));
                    }
                    if values.identifier.trim().is_empty() {
                        errors.push(StepError::new(
                            step,
                            FormField::Identifier,
                            StepErrorReason::Required,
                        ));
                    }
                } else {
                    match &values.template {
                        None => errors.push(StepError::new(
                            step,
                            FormField::Resource,
                            StepErrorReason::Required,
                        )),
                        Some(template) if NodeType::from(template.kind) != node_type => {
                            errors.push(StepError::new(
                                step,
                                FormField::Resource,
                                StepErrorReason::KindMismatch,
                            ));
                        }
                        Some(_) => {}
                    }
                }
            }
            StepId::Prompts => {
                if let Some(extra_vars) = &values.prompts.extra_vars {
                    if !extra_vars.is_object() {
                        errors.push(StepError::new(
                            step,
                            FormField::ExtraVars,
                            StepErrorReason::NotAMapping,
                        ));
                    }
                }
            }
            StepId::DaysToKeep => {
                if values.days_to_keep.is_none() {
                    errors.push(StepError::new(
                        step,
                        FormField::DaysToKeep,
                        StepErrorReason::Required,
                    ));
                }
            }
        }
        if let Some(submit) = self.submit_error.as_ref().filter(|e| e.step == step) {
            errors.push(submit.clone());
        }
        errors
    }

    pub fn can_advance(&self) -> bool {
        self.validate_step(self.current_step()).is_empty()
    }

    /// Mark a step as touched so its errors are shown.
    pub fn visit_step(&mut self, step: StepId) {
        self.visited.insert(step);
    }

    pub fn visit_all_steps(&mut self) {
        for step in self.steps() {
            self.visited.insert(step);
        }
    }

    /// Errors of touched steps, plus the last submit error.
    pub fn visible_errors(&self) -> Vec<StepError> {
        let mut errors: Vec<StepError> = self
            .steps()
            .into_iter()
            .filter(|step| self.visited.contains(step))
            .flat_map(|step| self.validate_step(step))
            .collect();
        if let Some(submit) = &self.submit_error {
            if !errors.contains(submit) {
                errors.push(submit.clone());
            }
        }
        errors
    }

    /// Move to the next step if the current one is valid.
    pub fn next(&mut self) -> bool {
        self.visit_step(self.current_step());
        if !self.can_advance() || self.current + 1 >= self.steps().len() {
            return false;
        }
        self.current += 1;
        true
    }

    pub fn back(&mut self) -> bool {
        if self.current == 0 {
            return false;
        }
        self.current = self.current.min(self.steps().len()) - 1;
        true
    }

    /// The action this wizard would dispatch.
    ///
    /// # Errors
    /// Every field error across all steps, which are all marked visited.
    pub fn build_action(&mut self) -> Result<Action, Vec<StepError>> {
        self.visit_all_steps();
        let errors: Vec<StepError> = self
            .steps()
            .into_iter()
            .flat_map(|step| self.validate_step(step))
            .collect();

        let values = &self.values;
        let (Some(node_type), Some(resource)) = (values.node_type, values.resource()) else {
            return Err(errors);
        };
        if !errors.is_empty() {
            return Err(errors);
        }

        let identifier = values.identifier.trim().to_owned();
        let prompt_values = values.prompt_values();
        let all_parents_must_converge = values.convergence == Convergence::All;

        Ok(match self.mode {
            WizardMode::Add { .. } => Action::CreateNode(NewNode {
                // Without a run type step the node hangs off START.
                link_type: if self.ask_link_type { values.link_type } else { LinkType::Always },
                identifier,
                node_type,
                resource,
                prompt_values,
                all_parents_must_converge,
            }),
            WizardMode::Edit { node } => Action::UpdateNode {
                id: node,
                patch: NodePatch {
                    identifier: Some(identifier),
                    node_type: Some(node_type),
                    resource: Some(resource),
                    prompt_values: Some(prompt_values),
                    all_parents_must_converge: Some(all_parents_must_converge),
                },
            },
        })
    }

    /// Submit the wizard to `session`.
    ///
    /// On rejection the wizard stays usable: the error is attached to the
    /// step owning the field and that step becomes current.
    ///
    /// # Errors
    /// The wizard's own field errors, or the routed engine rejection.
    pub fn finish(&mut self, session: &mut EditorSession) -> Result<Vec<Warning>, Vec<StepError>> {
        self.submit_error = None;
        let action = self.build_action()?;

        session.dispatch(action).map_err(|err| {
            let routed = self.route(err);
            if let Some(index) = self.steps().iter().position(|s| *s == routed.step) {
                self.current = index;
            }
            self.submit_error = Some(routed.clone());
            vec![routed]
        })
    }

    /// The step and field a transition engine error belongs to.
    fn route(&self, err: ValidationError) -> StepError {
        let on_node_type = |field| (StepId::NodeType, Some(field));
        let (step, field) = match &err {
            ValidationError::DuplicateIdentifier { .. } | ValidationError::MissingIdentifier { .. } => {
                on_node_type(FormField::Identifier)
            }
            ValidationError::InvalidConvergence { .. } => on_node_type(FormField::Convergence),
            ValidationError::ResourceMismatch { .. } => on_node_type(FormField::Resource),
            ValidationError::ImmutableField { field, .. } => match *field {
                "identifier" => on_node_type(FormField::Identifier),
                "node_type" => on_node_type(FormField::NodeType),
                _ => on_node_type(FormField::Resource),
            },
            ValidationError::CycleDetected { .. }
            | ValidationError::SelfLoop { .. }
            | ValidationError::LinkIntoStart { .. }
            | ValidationError::DuplicateLink { .. }
            | ValidationError::UnknownLink { .. }
                if self.ask_link_type =>
            {
                (StepId::RunType, Some(FormField::LinkType))
            }
            _ => (self.current_step(), None),
        };
        StepError { step, field, reason: StepErrorReason::Rejected(err) }
    }
}
