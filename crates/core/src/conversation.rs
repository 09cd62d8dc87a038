//! Conversation history.

use crate::{
    error::{Error, ErrorKind},
    reply::Reply,
    task::Task,
};
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed { text: String },
    Failed { kind: ErrorKind, message: String },
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// One dispatch cycle: the task, who handled it, and what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub task: Task,
    /// The agent the router selected. `None` when no agent was reached.
    pub agent_id: Option<CompactString>,
    /// The agent that produced the reply, when the selected agent
    /// delegated the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled_by: Option<CompactString>,
    pub outcome: TurnOutcome,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// A turn routed to `selected` and answered by `reply`.
    pub fn completed(task: Task, selected: impl Into<CompactString>, reply: &Reply) -> Self {
        let selected = selected.into();
        let handled_by = (reply.agent_id != selected).then(|| reply.agent_id.clone());
        Self {
            task,
            agent_id: Some(selected),
            handled_by,
            outcome: TurnOutcome::Completed {
                text: reply.text.clone(),
            },
            timestamp: Utc::now(),
        }
    }

    /// A turn that ended in `error`.
    pub fn failed(task: Task, agent_id: Option<CompactString>, error: &Error) -> Self {
        Self {
            task,
            agent_id,
            handled_by: None,
            outcome: TurnOutcome::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
            timestamp: Utc::now(),
        }
    }

    /// The user input of the turn.
    pub fn input(&self) -> &str {
        self.task.input()
    }
}

/// One conversation: its turns, in arrival order, and the context that
/// rides along with every task.
///
/// Turns are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: CompactString,
    pub turns: Vec<Turn>,
    /// Free-form facts merged in by the application.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// User preferences, replaced as a whole.
    #[serde(default)]
    pub preferences: Map<String, Value>,
    /// Cleared when the conversation is ended.
    #[serde(default = "active")]
    pub active: bool,
    pub started_at: DateTime<Utc>,
}

fn active() -> bool {
    true
}

impl ConversationState {
    /// An active conversation with no turns.
    pub fn new(conversation_id: impl Into<CompactString>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            turns: Vec::new(),
            context: Map::new(),
            preferences: Map::new(),
            active: true,
            started_at: Utc::now(),
        }
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> &[Turn] {
        &self.turns[self.turns.len().saturating_sub(n)..]
    }

    /// Merge `updates` into the context, overwriting existing keys.
    pub fn update_context(&mut self, updates: Map<String, Value>) {
        self.context.extend(updates);
    }

    /// When the last turn was recorded, or the start if there is none.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.turns
            .last()
            .map_or(self.started_at, |turn| turn.timestamp)
    }
}
