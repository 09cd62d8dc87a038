//! Shared components and the per-task agent state machine.
//!
//! [`Services::handle`] runs one task through an agent:
//! `received -> generating -> calling_tools -> ... -> completed | failed`,
//! with `delegating` in place of generation for delegate strategies. Every
//! suspension point is bounded by the task deadline and no lock is held
//! across one.

use crate::agent::{Agent, Strategy};
use ccore::{
    Error, Hops, Message, Phase, Reply, Result, Task, TaskId, ToolCall, ToolCallResult,
    ToolErrorKind, ToolSpec, within,
};
use compact_str::CompactString;
use mcp::ProtocolGateway;
use model::{Generation, ProviderGateway};
use serde_json::Value;
use std::sync::{Arc, Weak};
use team::{DelegationClient, DelegationRequest, Directory, Peer};

/// The components an agent works with, shared by every agent.
pub struct Services {
    pub models: ProviderGateway,
    pub protocol: Arc<ProtocolGateway>,
    pub delegation: Arc<DelegationClient>,
}

/// Phases an agent went through for one task.
struct Trace<'a> {
    agent: &'a str,
    task: TaskId,
    phases: Vec<Phase>,
}

impl<'a> Trace<'a> {
    fn new(agent: &'a str, task: TaskId) -> Self {
        Self {
            agent,
            task,
            phases: vec![Phase::Received],
        }
    }

    fn enter(&mut self, next: Phase) {
        let current = self.phases.last().copied().unwrap_or(Phase::Received);
        debug_assert!(current.allows(next), "{current:?} -> {next:?}");
        tracing::trace!(agent = self.agent, task = %self.task, phase = ?next, "phase");
        self.phases.push(next);
    }
}

impl Services {
    pub fn new(
        models: ProviderGateway,
        protocol: Arc<ProtocolGateway>,
        delegation: Arc<DelegationClient>,
    ) -> Self {
        Self {
            models,
            protocol,
            delegation,
        }
    }

    /// The agent directory.
    pub fn directory(&self) -> &Arc<Directory> {
        self.delegation.directory()
    }

    /// Run `task` through `agent`.
    ///
    /// The reply names the agent that did the work, which differs from
    /// `agent` when the task was delegated.
    pub async fn handle(&self, agent: &Agent, task: Task, hops: Hops) -> Result<Reply> {
        let mut trace = Trace::new(&agent.id, task.id());
        tracing::debug!(agent = %agent.id, task = %task.id(), kind = task.kind(), "handling task");

        let outcome = match agent.strategy_for(&task) {
            Strategy::Respond => self
                .respond(agent, &task, &mut trace)
                .await
                .map(|text| (agent.id.clone(), text)),
            Strategy::UseTools => self
                .use_tools(agent, &task, &mut trace)
                .await
                .map(|text| (agent.id.clone(), text)),
            Strategy::Delegate { capability } => {
                self.delegate(agent, &task, hops, capability, &mut trace)
                    .await
            }
        };

        match outcome {
            Ok((agent_id, text)) => {
                trace.enter(Phase::Completed);
                Ok(Reply {
                    agent_id,
                    text,
                    trace: trace.phases,
                })
            }
            Err(e) => {
                trace.enter(Phase::Failed);
                tracing::warn!(agent = %agent.id, task = %task.id(), "task failed: {e}");
                Err(e)
            }
        }
    }

    async fn respond(&self, agent: &Agent, task: &Task, trace: &mut Trace<'_>) -> Result<String> {
        let messages = prompt(agent, task);
        trace.enter(Phase::Generating);
        self.generate(agent, task, &messages).await
    }

    /// Propose, call, feed the result back, repeat; then answer. A failed
    /// tool call is shown to the model once so it can correct its
    /// arguments; a second failure fails the task.
    async fn use_tools(&self, agent: &Agent, task: &Task, trace: &mut Trace<'_>) -> Result<String> {
        let mut messages = prompt(agent, task);
        let manifest = self.manifest(agent).await;
        let mut corrected = false;

        for _ in 0..agent.max_tool_rounds {
            if manifest.is_empty() {
                break;
            }
            trace.enter(Phase::Generating);
            let Some(call) = self.propose(agent, task, &messages, &manifest).await? else {
                break;
            };

            trace.enter(Phase::CallingTools);
            let result = match agent.binding(&call.name) {
                Some(binding) => {
                    let protocol = &self.protocol;
                    let arguments = call.arguments.clone();
                    within(task.deadline(), "tool call", async {
                        Ok(protocol
                            .call_tool(&binding.server, &binding.name, arguments)
                            .await)
                    })
                    .await?
                }
                None => ToolCallResult::error(
                    ToolErrorKind::NotFound,
                    format!("tool '{}' is not available to this agent", call.name),
                ),
            };
            tracing::debug!(agent = %agent.id, tool = %call.name, ok = result.is_success(), "tool call");

            messages.push(Message::assistant(format!(
                "call {}({})",
                call.name, call.arguments
            )));
            messages.push(Message::tool(call.id.clone(), result.render()));

            if !result.is_success() {
                if corrected {
                    result.into_result(&call.name)?;
                }
                corrected = true;
            }
        }

        trace.enter(Phase::Generating);
        self.generate(agent, task, &messages).await
    }

    /// Hand the task to the freshest other live agent with `capability`,
    /// moving on to the next one when a target is unavailable.
    async fn delegate(
        &self,
        agent: &Agent,
        task: &Task,
        hops: Hops,
        capability: &str,
        trace: &mut Trace<'_>,
    ) -> Result<(CompactString, String)> {
        trace.enter(Phase::Delegating);
        let mut last = Error::DelegationUnavailable {
            agent_id: capability.into(),
            reason: format!("no other live agent offers '{capability}'"),
        };

        for target in self.directory().find_by_capability(capability) {
            if target.agent_id == agent.id {
                continue;
            }
            match self
                .delegation
                .delegate(&agent.id, &target.agent_id, task.clone(), hops)
                .await
            {
                Ok(reply) => return Ok((reply.agent_id, reply.text)),
                Err(e @ Error::DelegationUnavailable { .. }) => {
                    tracing::warn!(agent = %agent.id, target = %target.agent_id, "{e}");
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }

    /// Specs for the agent's tools. Tools whose server cannot list them are
    /// left out.
    async fn manifest(&self, agent: &Agent) -> Vec<ToolSpec> {
        let mut manifest = Vec::with_capacity(agent.tools.len());
        for binding in &agent.tools {
            match self.protocol.tool_spec(&binding.server, &binding.name).await {
                Ok(Some(spec)) => manifest.push(spec),
                Ok(None) => {
                    tracing::warn!(agent = %agent.id, server = %binding.server, tool = %binding.name, "tool not found")
                }
                Err(e) => tracing::warn!(agent = %agent.id, server = %binding.server, "{e}"),
            }
        }
        manifest
    }

    fn provider(&self, agent: &Agent) -> Result<CompactString> {
        agent
            .provider
            .clone()
            .or_else(|| self.models.active())
            .ok_or_else(|| Error::Config("no provider registered".into()))
    }

    async fn generate(&self, agent: &Agent, task: &Task, messages: &[Message]) -> Result<String> {
        let provider = self.provider(agent)?;
        let generation = within(
            task.deadline(),
            "generation",
            self.models.generate(&provider, messages, &agent.generation),
        )
        .await?;
        log_fallback(&agent.id, &generation);
        Ok(generation.output)
    }

    async fn propose(
        &self,
        agent: &Agent,
        task: &Task,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Option<ToolCall>> {
        let provider = self.provider(agent)?;
        let generation = within(
            task.deadline(),
            "generation",
            self.models
                .propose_tool_call(&provider, messages, tools, &agent.generation),
        )
        .await?;
        log_fallback(&agent.id, &generation);
        Ok(generation.output)
    }
}

fn log_fallback<T>(agent: &str, generation: &Generation<T>) {
    if generation.fell_back() {
        tracing::info!(
            agent,
            provider = %generation.provider,
            model = %generation.model,
            failures = generation.failures.len(),
            "served by fallback model"
        );
    }
}

/// System prompt, conversation context, prior turns from the payload, then
/// the input.
fn prompt(agent: &Agent, task: &Task) -> Vec<Message> {
    let mut messages = Vec::new();
    if !agent.system_prompt.is_empty() {
        messages.push(Message::system(agent.system_prompt.clone()));
    }
    for (key, label) in [("context", "Conversation context"), ("preferences", "User preferences")] {
        match task.payload().get(key) {
            Some(Value::Object(map)) if !map.is_empty() => {
                messages.push(Message::system(format!("{label}: {}", Value::Object(map.clone()))));
            }
            _ => {}
        }
    }

    let history = task.payload().get("history").and_then(Value::as_array);
    for turn in history.into_iter().flatten() {
        if let Some(input) = turn.get("input").and_then(Value::as_str) {
            messages.push(Message::user(input));
        }
        if let Some(reply) = turn.get("reply").and_then(Value::as_str) {
            messages.push(Message::assistant(reply));
        }
    }

    messages.push(Message::user(task.input()));
    messages
}

/// Delivers delegated tasks to an in-process agent.
pub(crate) struct LocalPeer {
    pub agent: Arc<Agent>,
    pub services: Weak<Services>,
}

impl Peer for LocalPeer {
    async fn call(&self, request: &DelegationRequest) -> Result<Reply> {
        let services = self
            .services
            .upgrade()
            .ok_or_else(|| Error::DelegationUnavailable {
                agent_id: request.to.clone(),
                reason: "runtime stopped".into(),
            })?;
        services
            .handle(&self.agent, request.task.clone(), request.hops)
            .await
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("models", &self.models)
            .field("protocol", &self.protocol)
            .field("delegation", &self.delegation)
            .finish()
    }
}
