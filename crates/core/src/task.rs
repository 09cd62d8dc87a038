//! Tasks and the delegation hop counter.

use crate::error::{Error, Result};
use chrono::{DateTime, TimeDelta, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeSet, fmt, time::Duration};
use ulid::Ulid;

/// Unique, time-sortable task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Ulid);

impl TaskId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A unit of work routed to an agent.
///
/// The id never changes once assigned; a retry is a new task that points
/// back at the one it retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    kind: CompactString,
    payload: Map<String, Value>,
    #[serde(default)]
    required: BTreeSet<CompactString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conversation: Option<CompactString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_of: Option<TaskId>,
}

impl Task {
    /// Create a task of the given kind with an empty payload.
    pub fn new(kind: impl Into<CompactString>) -> Self {
        Self {
            id: TaskId::new(),
            kind: kind.into(),
            payload: Map::new(),
            required: BTreeSet::new(),
            conversation: None,
            deadline: None,
            retry_of: None,
        }
    }

    /// Add a required capability.
    pub fn require(mut self, capability: impl Into<CompactString>) -> Self {
        self.required.insert(capability.into());
        self
    }

    /// Add several required capabilities.
    pub fn require_all<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>,
    {
        self.required
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Set a payload field.
    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Attach the task to a conversation.
    pub fn in_conversation(mut self, conversation: impl Into<CompactString>) -> Self {
        self.conversation = Some(conversation.into());
        self
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now. Durations too large to represent
    /// leave the task without a deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = TimeDelta::from_std(timeout)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta));
        self
    }

    /// The task id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The task kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The task payload.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Capabilities an agent needs to accept this task.
    pub fn required(&self) -> &BTreeSet<CompactString> {
        &self.required
    }

    /// The owning conversation, if any.
    pub fn conversation(&self) -> Option<&str> {
        self.conversation.as_deref()
    }

    /// The absolute deadline, if any.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// The task this one retries, if any.
    pub fn retry_of(&self) -> Option<TaskId> {
        self.retry_of
    }

    /// The user input carried in the payload.
    pub fn input(&self) -> &str {
        self.payload
            .get("input")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Whether the deadline already passed.
    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= Utc::now())
    }

    /// A new task with a fresh id that retries this one. Chains of retries
    /// all point at the first task.
    pub fn retry(&self) -> Self {
        Self {
            id: TaskId::new(),
            retry_of: Some(self.retry_of.unwrap_or(self.id)),
            ..self.clone()
        }
    }
}

/// Delegation hops travelled by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hops {
    /// Hops taken so far.
    pub count: u32,
    /// Maximum hops allowed.
    pub max: u32,
}

impl Hops {
    /// A fresh counter.
    pub fn new(max: u32) -> Self {
        Self { count: 0, max }
    }

    /// Whether no further delegation is allowed.
    pub fn exhausted(&self) -> bool {
        self.count >= self.max
    }

    /// The counter after one more hop.
    pub fn next(self) -> Result<Self> {
        if self.exhausted() {
            return Err(Error::DelegationLimit { max: self.max });
        }
        Ok(Self {
            count: self.count + 1,
            max: self.max,
        })
    }
}

impl Default for Hops {
    fn default() -> Self {
        Self::new(3)
    }
}
