//! Agent configuration.
//!
//! An agent is data: an id, a capability set, a provider choice, the tools
//! it may call, and a strategy table keyed by task kind or capability. The
//! behavior lives in [`Services::handle`](crate::Services::handle).

use ccore::{AgentDescriptor, GenerationConfig, Task};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How an agent handles a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Strategy {
    /// Answer with one generation.
    Respond,
    /// Let the model call the agent's tools, then answer.
    UseTools,
    /// Hand the task to the freshest other agent with `capability`.
    Delegate { capability: CompactString },
}

/// A tool an agent may call, and the server that hosts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub server: CompactString,
    pub name: CompactString,
}

/// A capability-tagged unit of work.
#[derive(Debug, Clone)]
pub struct Agent {
    /// Unique id, also the directory key.
    pub id: CompactString,
    pub name: CompactString,
    pub description: String,
    pub capabilities: BTreeSet<CompactString>,
    pub system_prompt: String,
    /// Provider to generate with. `None` uses the active provider.
    pub provider: Option<CompactString>,
    pub generation: GenerationConfig,
    pub tools: Vec<ToolBinding>,
    /// Strategies keyed by task kind or capability.
    pub strategies: BTreeMap<CompactString, Strategy>,
    /// Strategy used when no key matches.
    pub default_strategy: Strategy,
    /// Tool calls allowed per task before the agent must answer.
    pub max_tool_rounds: usize,
}

impl Agent {
    pub fn new(id: impl Into<CompactString>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            capabilities: BTreeSet::new(),
            system_prompt: String::new(),
            provider: None,
            generation: GenerationConfig::default(),
            tools: Vec::new(),
            strategies: BTreeMap::new(),
            default_strategy: Strategy::Respond,
            max_tool_rounds: 4,
        }
    }

    pub fn name(mut self, name: impl Into<CompactString>) -> Self {
        self.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn capability(mut self, capability: impl Into<CompactString>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn provider(mut self, provider: impl Into<CompactString>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn generation(mut self, config: GenerationConfig) -> Self {
        self.generation = config;
        self
    }

    /// Allow calling `name` on `server`.
    pub fn tool(mut self, server: impl Into<CompactString>, name: impl Into<CompactString>) -> Self {
        self.tools.push(ToolBinding {
            server: server.into(),
            name: name.into(),
        });
        self
    }

    /// Use `strategy` for tasks whose kind, or one of whose required
    /// capabilities, equals `key`.
    pub fn strategy(mut self, key: impl Into<CompactString>, strategy: Strategy) -> Self {
        self.strategies.insert(key.into(), strategy);
        self
    }

    pub fn default_strategy(mut self, strategy: Strategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    pub fn max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// Pick the strategy for `task`: by kind first, then by the first
    /// required capability with an entry, then the default.
    pub fn strategy_for(&self, task: &Task) -> &Strategy {
        self.strategies
            .get(task.kind())
            .or_else(|| {
                task.required()
                    .iter()
                    .find_map(|capability| self.strategies.get(capability))
            })
            .unwrap_or(&self.default_strategy)
    }

    /// The binding for a tool the model asked for.
    pub fn binding(&self, tool: &str) -> Option<&ToolBinding> {
        self.tools.iter().find(|binding| binding.name == tool)
    }

    /// The directory entry advertising this agent in-process.
    pub fn descriptor(&self) -> AgentDescriptor {
        let mut descriptor = AgentDescriptor::new(self.id.clone())
            .with_name(self.name.clone())
            .with_description(self.description.clone());
        descriptor.capabilities = self.capabilities.clone();
        descriptor
    }
}
