//! Agent directory: who is out there and what they can do.

use ccore::{AgentDescriptor, Error, Result};
use chrono::{TimeDelta, Utc};
use compact_str::CompactString;
use parking_lot::RwLock;
use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

/// Capability index of registered agents.
///
/// An entry is live until `ttl` passes without a registration or
/// heartbeat. Expired entries are kept (so `get` can report them) but
/// never match a capability query. Resident entries, the in-process
/// agents, never expire.
pub struct Directory {
    agents: RwLock<BTreeMap<CompactString, AgentDescriptor>>,
    /// Always taken after `agents` when both are held.
    residents: RwLock<BTreeSet<CompactString>>,
    ttl: TimeDelta,
}

impl Directory {
    /// An empty directory.
    pub fn new(ttl: Duration) -> Self {
        Self {
            agents: RwLock::new(BTreeMap::new()),
            residents: RwLock::new(BTreeSet::new()),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Register or replace an agent. Stamps `last_seen` with now.
    pub fn register(&self, descriptor: AgentDescriptor) -> Result<()> {
        let agent_id = descriptor.agent_id.clone();
        self.insert(descriptor)?;
        self.residents.write().remove(&agent_id);
        Ok(())
    }

    /// Register or replace an agent that stays live without heartbeats
    /// until it is deregistered.
    pub fn register_resident(&self, descriptor: AgentDescriptor) -> Result<()> {
        let agent_id = descriptor.agent_id.clone();
        self.insert(descriptor)?;
        self.residents.write().insert(agent_id);
        Ok(())
    }

    /// Whether an agent is registered as resident.
    pub fn is_resident(&self, agent_id: &str) -> bool {
        self.residents.read().contains(agent_id)
    }

    fn insert(&self, mut descriptor: AgentDescriptor) -> Result<()> {
        if descriptor.agent_id.is_empty() {
            return Err(Error::Registration("agent id is empty".into()));
        }
        if descriptor.capabilities.is_empty() {
            return Err(Error::Registration(format!(
                "agent '{}' declares no capabilities",
                descriptor.agent_id
            )));
        }

        descriptor.last_seen = Utc::now();
        tracing::info!(
            agent = %descriptor.agent_id,
            capabilities = ?descriptor.capabilities,
            "agent registered"
        );
        self.agents
            .write()
            .insert(descriptor.agent_id.clone(), descriptor);
        Ok(())
    }

    /// Remove an agent. Returns whether it was registered.
    pub fn deregister(&self, agent_id: &str) -> bool {
        let removed = self.agents.write().remove(agent_id).is_some();
        self.residents.write().remove(agent_id);
        if removed {
            tracing::info!(agent = agent_id, "agent deregistered");
        }
        removed
    }

    /// Refresh an agent's `last_seen`. Returns whether it was registered.
    pub fn heartbeat(&self, agent_id: &str) -> bool {
        match self.agents.write().get_mut(agent_id) {
            Some(descriptor) => {
                descriptor.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    /// The descriptor of an agent, live or expired.
    pub fn get(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.agents.read().get(agent_id).cloned()
    }

    /// Whether an agent is registered and not expired.
    pub fn is_live(&self, agent_id: &str) -> bool {
        self.agents
            .read()
            .get(agent_id)
            .is_some_and(|descriptor| self.live(descriptor))
    }

    /// Live agents offering `capability`.
    pub fn find_by_capability(&self, capability: &str) -> Vec<AgentDescriptor> {
        self.select(|descriptor| descriptor.capabilities.contains(capability))
    }

    /// Live agents offering every capability in `required`.
    ///
    /// Ordered by most recently seen first, ties broken by agent id.
    pub fn find_matching(&self, required: &BTreeSet<CompactString>) -> Vec<AgentDescriptor> {
        self.select(|descriptor| descriptor.satisfies(required))
    }

    /// Live agents whose id, name, description, or capabilities mention
    /// `query`, case-insensitively.
    pub fn search(&self, query: &str) -> Vec<AgentDescriptor> {
        let query = query.to_lowercase();
        self.select(|descriptor| {
            descriptor.agent_id.to_lowercase().contains(&query)
                || descriptor.name.to_lowercase().contains(&query)
                || descriptor.description.to_lowercase().contains(&query)
                || descriptor
                    .capabilities
                    .iter()
                    .any(|c| c.to_lowercase().contains(&query))
        })
    }

    /// Every registered agent, live or not, by id.
    pub fn list(&self) -> Vec<AgentDescriptor> {
        self.agents.read().values().cloned().collect()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Drop expired entries, returning their ids.
    pub fn sweep(&self) -> Vec<CompactString> {
        let mut agents = self.agents.write();
        let expired: Vec<_> = agents
            .values()
            .filter(|descriptor| !self.live(descriptor))
            .map(|descriptor| descriptor.agent_id.clone())
            .collect();
        for id in &expired {
            agents.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!(?expired, "swept expired agents");
        }
        expired
    }

    /// Serialize all entries, including `last_seen`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.list())
    }

    /// Restore a directory saved with [`Directory::to_json`]. Entries keep
    /// their saved `last_seen`.
    pub fn from_json(json: &str, ttl: Duration) -> serde_json::Result<Self> {
        let descriptors: Vec<AgentDescriptor> = serde_json::from_str(json)?;
        let directory = Self::new(ttl);
        directory.agents.write().extend(
            descriptors
                .into_iter()
                .map(|descriptor| (descriptor.agent_id.clone(), descriptor)),
        );
        Ok(directory)
    }

    fn live(&self, descriptor: &AgentDescriptor) -> bool {
        Utc::now().signed_duration_since(descriptor.last_seen) < self.ttl
            || self.residents.read().contains(&descriptor.agent_id)
    }

    fn select(&self, matches: impl Fn(&AgentDescriptor) -> bool) -> Vec<AgentDescriptor> {
        let mut found: Vec<_> = self
            .agents
            .read()
            .values()
            .filter(|descriptor| self.live(descriptor) && matches(descriptor))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            Reverse(a.last_seen)
                .cmp(&Reverse(b.last_seen))
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        found
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("agents", &self.agents.read().keys().collect::<Vec<_>>())
            .field("residents", &*self.residents.read())
            .field("ttl", &self.ttl)
            .finish()
    }
}
