//! Core abstractions for the Conduit orchestrator.
//!
//! Holds the data model shared by every component (tasks, agent
//! descriptors, tool specs, replies, conversation turns), the error
//! taxonomy, the traits external collaborators implement ([`Model`],
//! [`Classifier`]), and the in-process [`ToolRegistry`] and
//! [`ResourceRegistry`].

pub use {
    classify::{Classification, Classifier, KeywordClassifier},
    config::Config,
    conversation::{ConversationState, Turn, TurnOutcome},
    deadline::within,
    descriptor::{AgentDescriptor, Credentials, Endpoint},
    error::{CandidateFailure, Error, ErrorKind, Result},
    message::{Message, Role},
    model::{GenerationConfig, Model, ModelError},
    reply::{Phase, Reply},
    resource::{ResourceProvider, ResourceRegistry},
    task::{Hops, Task, TaskId},
    tool::{Handler, ToolCall, ToolCallResult, ToolErrorKind, ToolRegistry, ToolSpec},
};

pub mod classify;
pub mod config;
mod conversation;
mod deadline;
mod descriptor;
mod error;
mod message;
pub mod model;
mod reply;
pub mod resource;
mod task;
pub mod tool;

#[cfg(feature = "testing")]
pub mod testing;
