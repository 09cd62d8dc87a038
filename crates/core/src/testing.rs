//! Test doubles. Enabled with the `testing` feature.

use crate::{
    message::{Message, Role},
    model::{GenerationConfig, Model, ModelError},
    tool::{ToolCall, ToolSpec},
};
use compact_str::CompactString;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::Duration,
};

#[derive(Default)]
struct Lane {
    replies: VecDeque<Result<String, ModelError>>,
    proposals: VecDeque<Result<Option<ToolCall>, ModelError>>,
    down: Option<ModelError>,
}

#[derive(Default)]
struct Script {
    lanes: BTreeMap<CompactString, Lane>,
    latency: Option<Duration>,
    calls: Vec<CompactString>,
    last_messages: Vec<Message>,
    last_tools: Vec<ToolSpec>,
}

/// A scripted [`Model`].
///
/// Each model name has queues of generate and propose outcomes. Once a
/// queue is empty, `generate` echoes `"{model}: {last user message}"` and
/// `propose_tool_call` answers `None`.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    script: Arc<Mutex<Script>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text reply for `model`.
    pub fn reply(self, model: &str, text: impl Into<String>) -> Self {
        self.lane(model, |lane| lane.replies.push_back(Ok(text.into())))
    }

    /// Queue a generate failure for `model`.
    pub fn fail(self, model: &str, error: ModelError) -> Self {
        self.lane(model, |lane| lane.replies.push_back(Err(error)))
    }

    /// Make every call to `model` fail.
    pub fn down(self, model: &str, error: ModelError) -> Self {
        self.lane(model, |lane| lane.down = Some(error))
    }

    /// Queue a tool call proposal for `model`.
    pub fn propose(self, model: &str, call: Option<ToolCall>) -> Self {
        self.lane(model, |lane| lane.proposals.push_back(Ok(call)))
    }

    /// Queue a proposal failure for `model`.
    pub fn propose_fail(self, model: &str, error: ModelError) -> Self {
        self.lane(model, |lane| lane.proposals.push_back(Err(error)))
    }

    /// Delay every call.
    pub fn latency(self, latency: Duration) -> Self {
        self.script.lock().latency = Some(latency);
        self
    }

    /// Models called so far, in order.
    pub fn calls(&self) -> Vec<CompactString> {
        self.script.lock().calls.clone()
    }

    /// Messages of the most recent call.
    pub fn last_messages(&self) -> Vec<Message> {
        self.script.lock().last_messages.clone()
    }

    /// Tools offered in the most recent proposal.
    pub fn last_tools(&self) -> Vec<ToolSpec> {
        self.script.lock().last_tools.clone()
    }

    fn lane(self, model: &str, f: impl FnOnce(&mut Lane)) -> Self {
        f(self.script.lock().lanes.entry(model.into()).or_default());
        self
    }

    fn record(&self, model: &str, messages: &[Message]) -> Option<Duration> {
        let mut script = self.script.lock();
        script.calls.push(model.into());
        script.last_messages = messages.to_vec();
        script.latency
    }
}

impl Model for ScriptedModel {
    async fn generate(
        &self,
        model: &str,
        messages: &[Message],
        _config: &GenerationConfig,
    ) -> Result<String, ModelError> {
        if let Some(latency) = self.record(model, messages) {
            tokio::time::sleep(latency).await;
        }

        let next = {
            let mut script = self.script.lock();
            let lane = script.lanes.entry(model.into()).or_default();
            match &lane.down {
                Some(error) => Some(Err(error.clone())),
                None => lane.replies.pop_front(),
            }
        };
        next.unwrap_or_else(|| {
            let input = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            Ok(format!("{model}: {input}"))
        })
    }

    async fn propose_tool_call(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSpec],
        _config: &GenerationConfig,
    ) -> Result<Option<ToolCall>, ModelError> {
        if let Some(latency) = self.record(model, messages) {
            tokio::time::sleep(latency).await;
        }

        let mut script = self.script.lock();
        script.last_tools = tools.to_vec();
        let lane = script.lanes.entry(model.into()).or_default();
        match &lane.down {
            Some(error) => Err(error.clone()),
            None => lane.proposals.pop_front().unwrap_or(Ok(None)),
        }
    }
}
