//! Error taxonomy shared by every component.
//!
//! Local errors ([`Error::Validation`], a single failing tool) are handled
//! inside an agent. Cross-component errors propagate to the router, which
//! treats them as a candidate failure. [`Error::NoAgentAvailable`] is
//! terminal and surfaces to the conversation manager.

use crate::{model::ModelError, task::TaskId};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Result alias used across the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;

/// Orchestrator error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Tool arguments do not match the tool's parameter schema.
    #[error("invalid arguments for tool '{tool}': {reason}")]
    Validation { tool: CompactString, reason: String },

    /// Every model in a provider's fallback chain failed retryably.
    #[error("provider '{provider}' exhausted after {} failed attempts", .attempts.len())]
    ProviderExhausted {
        provider: CompactString,
        attempts: Vec<(CompactString, ModelError)>,
    },

    /// A provider failed with a non-retryable error.
    #[error("provider '{provider}' model '{model}' failed: {source}")]
    Provider {
        provider: CompactString,
        model: CompactString,
        source: ModelError,
    },

    /// A tool handler or remote tool reported a failure.
    #[error("tool '{tool}' failed: {detail}")]
    ToolExecution { tool: CompactString, detail: String },

    /// The delegation target is unknown or unreachable.
    #[error("agent '{agent_id}' unavailable for delegation: {reason}")]
    DelegationUnavailable {
        agent_id: CompactString,
        reason: String,
    },

    /// The task already travelled the maximum number of delegation hops.
    #[error("delegation limit reached ({max} hops)")]
    DelegationLimit { max: u32 },

    /// A deadline elapsed at a suspension point.
    #[error("deadline exceeded during {stage}")]
    Timeout { stage: &'static str },

    /// No candidate could satisfy the task.
    #[error("no agent available for task {task_id}{}", render_failures(.failures))]
    NoAgentAvailable {
        task_id: TaskId,
        failures: Vec<CandidateFailure>,
    },

    /// A registration was rejected.
    #[error("registration rejected: {0}")]
    Registration(String),

    /// A tool/resource backend could not serve the request.
    #[error("backend '{server}' error: {reason}")]
    Backend {
        server: CompactString,
        reason: String,
    },

    /// Configuration is missing or inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Discriminant of [`Error`], stable enough to persist in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ProviderExhausted,
    Provider,
    ToolExecution,
    DelegationUnavailable,
    DelegationLimit,
    Timeout,
    NoAgentAvailable,
    Registration,
    Backend,
    Config,
}

impl Error {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::ProviderExhausted { .. } => ErrorKind::ProviderExhausted,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::ToolExecution { .. } => ErrorKind::ToolExecution,
            Self::DelegationUnavailable { .. } => ErrorKind::DelegationUnavailable,
            Self::DelegationLimit { .. } => ErrorKind::DelegationLimit,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NoAgentAvailable { .. } => ErrorKind::NoAgentAvailable,
            Self::Registration(_) => ErrorKind::Registration,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the router must stop trying candidates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NoAgentAvailable { .. })
    }
}

/// One candidate's failure, collected by the router for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFailure {
    /// The agent that was tried.
    pub agent_id: CompactString,
    /// Kind of the error the agent failed with.
    pub kind: ErrorKind,
    /// Rendered error.
    pub reason: String,
}

impl CandidateFailure {
    /// Record a failure of `agent_id`.
    pub fn new(agent_id: impl Into<CompactString>, error: &Error) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind: error.kind(),
            reason: error.to_string(),
        }
    }
}

fn render_failures(failures: &[CandidateFailure]) -> String {
    let mut out = String::new();
    for (idx, failure) in failures.iter().enumerate() {
        let sep = if idx == 0 { ": " } else { "; " };
        let _ = write!(out, "{sep}{} ({})", failure.agent_id, failure.reason);
    }
    out
}
