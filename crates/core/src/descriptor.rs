//! Agent descriptors published in the directory.

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Where an agent can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Endpoint {
    /// Runs inside this process.
    #[default]
    Local,
    /// Reachable over HTTP.
    Http { url: String },
}

/// Credentials presented when delegating to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    #[default]
    None,
    Bearer {
        token: String,
    },
    ApiKey {
        header: String,
        key: String,
    },
}

/// Directory entry for an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique agent id.
    pub agent_id: CompactString,
    /// Display name.
    pub name: CompactString,
    /// What the agent is for.
    #[serde(default)]
    pub description: String,
    /// Capabilities the agent offers; never empty once registered.
    pub capabilities: BTreeSet<CompactString>,
    #[serde(default)]
    pub endpoint: Endpoint,
    #[serde(default)]
    pub auth: Credentials,
    /// Last registration or heartbeat.
    pub last_seen: DateTime<Utc>,
}

impl AgentDescriptor {
    /// A local descriptor with no capabilities yet.
    pub fn new(agent_id: impl Into<CompactString>) -> Self {
        let agent_id = agent_id.into();
        Self {
            name: agent_id.clone(),
            agent_id,
            description: String::new(),
            capabilities: BTreeSet::new(),
            endpoint: Endpoint::Local,
            auth: Credentials::None,
            last_seen: Utc::now(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<CompactString>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a capability.
    pub fn with_capability(mut self, capability: impl Into<CompactString>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Set the endpoint.
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Set the credentials.
    pub fn with_auth(mut self, auth: Credentials) -> Self {
        self.auth = auth;
        self
    }

    /// Whether every required capability is offered.
    pub fn satisfies(&self, required: &BTreeSet<CompactString>) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// Whether this agent runs in-process.
    pub fn is_local(&self) -> bool {
        self.endpoint == Endpoint::Local
    }
}
