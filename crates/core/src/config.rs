//! Orchestrator configuration.
//!
//! Loaded from TOML. `${VAR}` references anywhere in the file are replaced
//! with the environment value (or the empty string) before parsing.

use crate::error::{Error, Result};
use anyhow::Context;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    time::Duration,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Named providers with their fallback chains.
    pub providers: BTreeMap<CompactString, ProviderConfig>,
    pub routing: RoutingConfig,
    pub directory: DirectoryConfig,
    pub backoff: BackoffConfig,
    /// Remote tool/resource servers.
    pub servers: Vec<ServerConfig>,
    /// Remote agents registered in the directory at startup.
    pub agents: Vec<RemoteAgentConfig>,
    pub conversation: ConversationConfig,
}

/// One provider: an ordered model chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// The model tried first.
    pub primary: CompactString,
    /// Models tried, in order, after a retryable failure.
    #[serde(default)]
    pub fallbacks: Vec<CompactString>,
    /// Per-request timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Attempts per model before moving down the chain.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retries() -> u32 {
    1
}

impl ProviderConfig {
    /// A chain of one model with default timeout and retries.
    pub fn new(primary: impl Into<CompactString>) -> Self {
        Self {
            primary: primary.into(),
            fallbacks: Vec::new(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
        }
    }

    /// Append a fallback model.
    pub fn fallback(mut self, model: impl Into<CompactString>) -> Self {
        self.fallbacks.push(model.into());
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the attempts per model.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Primary followed by fallbacks.
    pub fn chain(&self) -> impl Iterator<Item = &CompactString> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Router settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Candidates tried per task before giving up.
    pub max_attempts: u32,
    /// Delegation hops allowed per task.
    pub max_hops: u32,
    pub rules: Vec<RoutingRule>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_hops: 3,
            rules: Vec::new(),
        }
    }
}

/// Prefer specific agents for a task kind. Preferred agents are tried
/// first, in the listed order, if they satisfy the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub kind: CompactString,
    pub prefer: Vec<CompactString>,
}

/// Directory settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Seconds after the last heartbeat before an entry stops matching.
    pub ttl_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

impl DirectoryConfig {
    /// The entry time-to-live.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Reconnect backoff for unavailable backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 30_000,
        }
    }
}

/// How a server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawned child process speaking MCP over stdio.
    Stdio,
    /// Streamable HTTP endpoint.
    Http,
}

/// A remote tool/resource server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: CompactString,
    pub transport: TransportKind,
    /// Executable, for stdio servers.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Endpoint, for HTTP servers.
    #[serde(default)]
    pub url: Option<String>,
    /// Extra request headers, for HTTP servers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// A remote agent reachable over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAgentConfig {
    pub id: CompactString,
    #[serde(default)]
    pub name: Option<CompactString>,
    #[serde(default)]
    pub description: String,
    pub capabilities: BTreeSet<CompactString>,
    pub url: String,
    /// Bearer token presented on delegation.
    #[serde(default)]
    pub token: Option<String>,
}

/// Conversation manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Previous turns attached to each new task.
    pub history_window: usize,
    /// Deadline applied to each turn's task.
    pub turn_timeout_secs: Option<u64>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_window: 5,
            turn_timeout_secs: None,
        }
    }
}

impl Config {
    /// Parse a TOML string, expanding `${VAR}` references first.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        let expanded = expand_env_vars(toml_str);
        let config: Self = toml::from_str(&expanded).context("failed to parse config")?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        for (name, provider) in &self.providers {
            if provider.primary.is_empty() {
                return Err(Error::Config(format!("provider '{name}' has no primary model")));
            }
            if provider.retries == 0 {
                return Err(Error::Config(format!("provider '{name}' has zero retries")));
            }
        }

        if self.routing.max_attempts == 0 {
            return Err(Error::Config("routing.max_attempts must be positive".into()));
        }
        if self.backoff.base_ms > self.backoff.max_ms {
            return Err(Error::Config("backoff.base_ms exceeds backoff.max_ms".into()));
        }

        let mut names = BTreeSet::new();
        for server in &self.servers {
            if !names.insert(&server.name) {
                return Err(Error::Config(format!("duplicate server '{}'", server.name)));
            }
            let endpoint = match server.transport {
                TransportKind::Stdio => &server.command,
                TransportKind::Http => &server.url,
            };
            if endpoint.as_deref().is_none_or(str::is_empty) {
                return Err(Error::Config(format!(
                    "server '{}' is missing its {:?} endpoint",
                    server.name, server.transport
                )));
            }
        }

        for agent in &self.agents {
            if agent.capabilities.is_empty() {
                return Err(Error::Config(format!("agent '{}' has no capabilities", agent.id)));
            }
        }
        Ok(())
    }
}

/// Substitute `${NAME}` references in a config file with environment
/// variables. Unset names become empty; a `${` with no closing brace is
/// left as written.
pub fn expand_env_vars(input: &str) -> String {
    let mut pieces = input.split("${");
    let mut out = String::from(pieces.next().unwrap_or_default());
    for piece in pieces {
        match piece.split_once('}') {
            Some((name, rest)) => {
                out.push_str(&std::env::var(name).unwrap_or_default());
                out.push_str(rest);
            }
            None => {
                out.push_str("${");
                out.push_str(piece);
            }
        }
    }
    out
}
