//! Agent replies and the per-task phase machine.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Phase of an agent handling one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Received,
    Generating,
    CallingTools,
    Delegating,
    Completed,
    Failed,
}

impl Phase {
    /// Whether the phase ends the task.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` may follow this phase.
    pub fn allows(self, next: Phase) -> bool {
        use Phase::*;
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Received, Generating | Delegating)
                | (Generating, Generating | CallingTools | Delegating | Completed)
                | (CallingTools, Generating | Completed)
                | (Delegating, Generating | Completed)
        )
    }
}

/// Final answer of an agent for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// The agent that produced the reply. For delegated tasks this is the
    /// agent that did the work.
    pub agent_id: CompactString,
    /// The answer.
    pub text: String,
    /// Phases the handling agent went through.
    #[serde(default)]
    pub trace: Vec<Phase>,
}

impl Reply {
    /// A reply without a trace.
    pub fn new(agent_id: impl Into<CompactString>, text: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            text: text.into(),
            trace: Vec::new(),
        }
    }
}
