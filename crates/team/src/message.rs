//! Agent-to-agent messages outside of task delegation.

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// What a message carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    /// Free text for the receiving agent.
    Direct { content: String },
    /// A status update, fanned out to the sender's subscribers.
    Status { status: Value },
}

/// One message between two agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: CompactString,
    pub from: CompactString,
    pub to: CompactString,
    #[serde(flatten)]
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// A new message stamped with a fresh id and the current time.
    pub fn new(
        from: impl Into<CompactString>,
        to: impl Into<CompactString>,
        body: MessageBody,
    ) -> Self {
        Self {
            id: Ulid::new().to_string().into(),
            from: from.into(),
            to: to.into(),
            body,
            timestamp: Utc::now(),
        }
    }

    pub fn is_status(&self) -> bool {
        matches!(self.body, MessageBody::Status { .. })
    }
}
