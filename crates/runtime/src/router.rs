//! Capability routing with candidate failover.

use crate::{
    agent::Agent,
    services::{LocalPeer, Services},
};
use ccore::{
    AgentDescriptor, CandidateFailure, Credentials, Endpoint, Error, Hops, Reply, Result, Task,
    config::{RemoteAgentConfig, RoutingConfig},
};
use compact_str::CompactString;
use parking_lot::RwLock;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// Sender id used when the router hands a task to a candidate.
pub const ROUTER: &str = "router";

/// A successful dispatch.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// The candidate that took the task. The reply may come from another
    /// agent when this one delegated.
    pub agent_id: CompactString,
    /// The task that succeeded. A retry of the submitted task when an
    /// earlier candidate failed.
    pub task: Task,
    pub reply: Reply,
    /// Candidates that failed before the reply.
    pub failures: Vec<CandidateFailure>,
}

/// Last outcome of dispatching to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LastOutcome {
    Completed,
    Failed { reason: String },
}

/// Per-agent routing status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    pub agent_id: CompactString,
    pub capabilities: BTreeSet<CompactString>,
    pub local: bool,
    pub live: bool,
    pub completed: u64,
    pub failed: u64,
    pub last: Option<LastOutcome>,
}

#[derive(Default)]
struct Counters {
    completed: u64,
    failed: u64,
    last: Option<LastOutcome>,
}

/// Selects agents for tasks and fails over between them.
///
/// Candidates are the live directory entries whose capabilities cover the
/// task's requirements, freshest first with ties broken by id. Agents named
/// by a routing rule for the task kind go first, in rule order. Rules come
/// from configuration and may be changed at runtime.
pub struct Router {
    services: Arc<Services>,
    agents: RwLock<BTreeMap<CompactString, Arc<Agent>>>,
    rules: RwLock<BTreeMap<CompactString, Vec<CompactString>>>,
    max_attempts: usize,
    max_hops: u32,
    counters: RwLock<BTreeMap<CompactString, Counters>>,
}

impl Router {
    pub fn new(services: Arc<Services>, config: &RoutingConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|rule| (rule.kind.clone(), rule.prefer.clone()))
            .collect();
        Self {
            services,
            agents: RwLock::new(BTreeMap::new()),
            rules: RwLock::new(rules),
            max_attempts: config.max_attempts.max(1) as usize,
            max_hops: config.max_hops,
            counters: RwLock::new(BTreeMap::new()),
        }
    }

    /// The shared services.
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Register an in-process agent. Replaces an agent with the same id.
    ///
    /// In-process agents are resident: they stay live without heartbeats
    /// for as long as they are registered.
    pub fn add_agent(&self, agent: Agent) -> Result<()> {
        self.services.directory().register_resident(agent.descriptor())?;
        let agent = Arc::new(agent);
        self.services.delegation.bind(
            agent.id.clone(),
            LocalPeer {
                agent: agent.clone(),
                services: Arc::downgrade(&self.services),
            },
        );
        tracing::info!(agent = %agent.id, capabilities = ?agent.capabilities, "agent added");
        self.agents.write().insert(agent.id.clone(), agent);
        Ok(())
    }

    /// Register a remote agent reached over HTTP.
    pub fn add_remote(&self, config: &RemoteAgentConfig) -> Result<()> {
        let mut descriptor = AgentDescriptor::new(config.id.clone())
            .with_description(config.description.clone())
            .with_endpoint(Endpoint::Http {
                url: config.url.clone(),
            });
        if let Some(name) = &config.name {
            descriptor = descriptor.with_name(name.clone());
        }
        if let Some(token) = &config.token {
            descriptor = descriptor.with_auth(Credentials::Bearer {
                token: token.clone(),
            });
        }
        descriptor.capabilities = config.capabilities.clone();
        self.services.directory().register(descriptor)?;
        tracing::info!(agent = %config.id, url = %config.url, "remote agent added");
        Ok(())
    }

    /// Remove an agent, local or remote.
    pub fn remove_agent(&self, agent_id: &str) -> bool {
        self.services.delegation.unbind(agent_id);
        self.agents.write().remove(agent_id);
        self.counters.write().remove(agent_id);
        self.services.directory().deregister(agent_id)
    }

    /// An in-process agent by id.
    pub fn agent(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.agents.read().get(agent_id).cloned()
    }

    /// Prefer `agents`, in order, for tasks of `kind`. Replaces any rule
    /// for the same kind.
    pub fn add_routing_rule(&self, kind: impl Into<CompactString>, agents: Vec<CompactString>) {
        let kind = kind.into();
        tracing::info!(%kind, prefer = ?agents, "routing rule added");
        self.rules.write().insert(kind, agents);
    }

    /// Drop the rule for `kind`. Returns whether one existed.
    pub fn remove_routing_rule(&self, kind: &str) -> bool {
        let removed = self.rules.write().remove(kind).is_some();
        if removed {
            tracing::info!(kind, "routing rule removed");
        }
        removed
    }

    /// Current routing rules by task kind.
    pub fn routing_rules(&self) -> BTreeMap<CompactString, Vec<CompactString>> {
        self.rules.read().clone()
    }

    /// Agents that may take `task`, in the order they would be tried.
    pub fn candidates(&self, task: &Task) -> Vec<AgentDescriptor> {
        let mut candidates = self.services.directory().find_matching(task.required());
        let rules = self.rules.read();
        if let Some(prefer) = rules.get(task.kind()) {
            let rank = |id: &str| {
                prefer
                    .iter()
                    .position(|p| p == id)
                    .unwrap_or(prefer.len())
            };
            // Stable, so non-preferred agents keep directory order.
            candidates.sort_by_key(|d| rank(d.agent_id.as_str()));
        }
        candidates
    }

    /// Dispatch `task` with a fresh hop counter.
    pub async fn dispatch(&self, task: Task) -> Result<Dispatch> {
        self.dispatch_with(task, Hops::new(self.max_hops)).await
    }

    /// Try candidates in order until one replies.
    ///
    /// Fails with [`Error::Timeout`] before trying anyone if the deadline
    /// already passed, and with [`Error::NoAgentAvailable`] carrying every
    /// candidate's failure when none succeeds.
    pub async fn dispatch_with(&self, task: Task, hops: Hops) -> Result<Dispatch> {
        if task.expired() {
            tracing::warn!(task = %task.id(), "deadline passed before dispatch");
            return Err(Error::Timeout { stage: "dispatch" });
        }

        let candidates = self.candidates(&task);
        if candidates.is_empty() {
            tracing::warn!(task = %task.id(), required = ?task.required(), "no matching agent");
            return Err(Error::NoAgentAvailable {
                task_id: task.id(),
                failures: Vec::new(),
            });
        }

        let task_id = task.id();
        let mut failures = Vec::new();
        let mut attempt = task;
        for (n, candidate) in candidates.iter().take(self.max_attempts).enumerate() {
            if n > 0 {
                attempt = attempt.retry();
            }
            let agent_id = &candidate.agent_id;
            tracing::debug!(task = %attempt.id(), agent = %agent_id, attempt = n + 1, "dispatching");

            match self
                .services
                .delegation
                .forward(ROUTER, agent_id, attempt.clone(), hops)
                .await
            {
                Ok(reply) => {
                    self.services.directory().heartbeat(agent_id);
                    self.record(agent_id, None);
                    return Ok(Dispatch {
                        agent_id: agent_id.clone(),
                        task: attempt,
                        reply,
                        failures,
                    });
                }
                Err(e) => {
                    tracing::warn!(task = %attempt.id(), agent = %agent_id, "candidate failed: {e}");
                    self.record(agent_id, Some(&e));
                    failures.push(CandidateFailure::new(agent_id.clone(), &e));
                    if attempt.expired() {
                        break;
                    }
                }
            }
        }

        Err(Error::NoAgentAvailable { task_id, failures })
    }

    /// Capabilities of every registered agent, live or not.
    pub fn capabilities(&self) -> BTreeMap<CompactString, BTreeSet<CompactString>> {
        self.services
            .directory()
            .list()
            .into_iter()
            .map(|d| (d.agent_id, d.capabilities))
            .collect()
    }

    /// Routing status of every registered agent.
    pub fn status(&self) -> Vec<AgentStatus> {
        let directory = self.services.directory();
        let counters = self.counters.read();
        directory
            .list()
            .into_iter()
            .map(|d| {
                let live = directory.is_live(&d.agent_id);
                let counter = counters.get(&d.agent_id);
                AgentStatus {
                    local: d.is_local(),
                    live,
                    completed: counter.map_or(0, |c| c.completed),
                    failed: counter.map_or(0, |c| c.failed),
                    last: counter.and_then(|c| c.last.clone()),
                    agent_id: d.agent_id,
                    capabilities: d.capabilities,
                }
            })
            .collect()
    }

    fn record(&self, agent_id: &str, error: Option<&Error>) {
        let mut counters = self.counters.write();
        let counter = counters.entry(agent_id.into()).or_default();
        counter.last = Some(match error {
            None => {
                counter.completed += 1;
                LastOutcome::Completed
            }
            Some(e) => {
                counter.failed += 1;
                LastOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        });
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("agents", &self.agents.read().keys().collect::<Vec<_>>())
            .field("rules", &*self.rules.read())
            .field("max_attempts", &self.max_attempts)
            .field("max_hops", &self.max_hops)
            .finish()
    }
}
