//! Conduit runtime: the top-level orchestrator.
//!
//! The [`Runtime`] wires every component from a [`Config`]: the provider
//! gateway, the protocol gateway (remote servers plus the local tool and
//! resource registries), the agent directory and delegation client, the [`Router`],
//! and the [`ConversationManager`].
//!
//! # Example
//!
//! ```rust,ignore
//! use conduit_runtime::{Agent, Runtime, Strategy};
//!
//! let runtime = Runtime::builder(Config::load(path)?)
//!     .provider("openai", adapter)?
//!     .agent(Agent::new("researcher").capability("web_search"))
//!     .build()?;
//! let reply = runtime.send("conversation-1", "search for rust crates").await?;
//! ```

pub use {
    agent::{Agent, Strategy, ToolBinding},
    conversation::{ConversationManager, ConversationStats, ConversationStore, InMemoryStore},
    router::{AgentStatus, Dispatch, LastOutcome, ROUTER, Router},
    services::Services,
};

use ccore::{
    Classifier, Config, Error, Handler, KeywordClassifier, Model, ResourceProvider,
    ResourceRegistry, Result, Task, ToolRegistry, ToolSpec,
};
use compact_str::CompactString;
use mcp::ProtocolGateway;
use model::ProviderGateway;
use std::sync::Arc;
use team::{DelegationClient, Directory};
use tracing_subscriber::EnvFilter;

mod agent;
mod conversation;
mod router;
mod services;

/// Protocol gateway backend serving the local tool and resource registries.
pub const LOCAL_SERVER: &str = "local";

/// The orchestrator.
pub struct Runtime<S: ConversationStore = InMemoryStore> {
    config: Config,
    tools: Arc<ToolRegistry>,
    resources: Arc<ResourceRegistry>,
    router: Arc<Router>,
    conversations: ConversationManager<S>,
}

/// Collects providers, tools, and agents before wiring them.
pub struct RuntimeBuilder {
    config: Config,
    models: ProviderGateway,
    tools: Arc<ToolRegistry>,
    resources: Arc<ResourceRegistry>,
    classifier: Arc<dyn Classifier>,
    agents: Vec<Agent>,
}

impl Runtime {
    /// Start building a runtime from `config`.
    pub fn builder(config: Config) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            models: ProviderGateway::new(),
            tools: Arc::new(ToolRegistry::new()),
            resources: Arc::new(ResourceRegistry::new()),
            classifier: Arc::new(KeywordClassifier::default()),
            agents: Vec::new(),
        }
    }
}

impl RuntimeBuilder {
    /// Attach the adapter for the provider configured as `name`.
    pub fn provider<M: Model>(self, name: &str, adapter: M) -> Result<Self> {
        let config = self
            .config
            .providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("provider '{name}' is not configured")))?;
        self.models.register(name, config, adapter)?;
        Ok(self)
    }

    /// Register a local tool.
    pub fn tool(self, spec: ToolSpec, handler: Handler) -> Self {
        self.tools.register(spec, handler);
        self
    }

    /// Register a local resource, readable as `uri` on [`LOCAL_SERVER`].
    pub fn resource(self, uri: &str, provider: ResourceProvider) -> Self {
        self.resources.register(uri, provider);
        self
    }

    /// Replace the keyword classifier.
    pub fn classifier<C: Classifier + 'static>(mut self, classifier: C) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    /// Wire everything with in-memory conversation history.
    pub fn build(self) -> Result<Runtime> {
        self.build_with_store(InMemoryStore::new())
    }

    /// Wire everything, keeping conversation history in `store`.
    pub fn build_with_store<S: ConversationStore>(self, store: S) -> Result<Runtime<S>> {
        let Self {
            config,
            models,
            tools,
            resources,
            classifier,
            agents,
        } = self;
        config.validate()?;

        let protocol = ProtocolGateway::new().with_backoff(&config.backoff);
        for server in &config.servers {
            protocol.add_server(server)?;
        }
        protocol.serve_local(LOCAL_SERVER, tools.clone(), resources.clone());

        let directory = Arc::new(Directory::new(config.directory.ttl()));
        let delegation = Arc::new(DelegationClient::new(directory));
        let services = Arc::new(Services::new(models, Arc::new(protocol), delegation));

        let router = Arc::new(Router::new(services, &config.routing));
        for agent in agents {
            router.add_agent(agent)?;
        }
        for remote in &config.agents {
            router.add_remote(remote)?;
        }

        let conversations =
            ConversationManager::new(router.clone(), classifier, store, &config.conversation);
        tracing::info!(
            providers = ?router.services().models.providers(),
            servers = config.servers.len(),
            agents = router.capabilities().len(),
            "runtime ready"
        );
        Ok(Runtime {
            config,
            tools,
            resources,
            router,
            conversations,
        })
    }
}

impl<S: ConversationStore> Runtime<S> {
    /// Handle one user message of `conversation`.
    pub async fn send(&self, conversation: &str, input: &str) -> anyhow::Result<String> {
        self.conversations.send(conversation, input).await
    }

    /// Route a task outside any conversation.
    pub async fn dispatch(&self, task: Task) -> Result<Dispatch> {
        self.router.dispatch(task).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn conversations(&self) -> &ConversationManager<S> {
        &self.conversations
    }

    pub fn services(&self) -> &Arc<Services> {
        self.router.services()
    }

    /// The local tool registry, served as [`LOCAL_SERVER`].
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// The local resource registry, served as [`LOCAL_SERVER`].
    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    /// Register an agent after startup.
    pub fn add_agent(&self, agent: Agent) -> Result<()> {
        self.router.add_agent(agent)
    }

    /// Agent ids known to the directory.
    pub fn agents(&self) -> Vec<CompactString> {
        self.router.capabilities().into_keys().collect()
    }
}

/// Install a `tracing` subscriber filtered by `RUST_LOG`, defaulting to
/// `info`. Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("providers", &self.models.providers())
            .field("tools", &self.tools.names())
            .field("resources", &self.resources.uris())
            .field("agents", &self.agents.iter().map(|a| &a.id).collect::<Vec<_>>())
            .finish()
    }
}

impl<S: ConversationStore> std::fmt::Debug for Runtime<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("router", &self.router)
            .field("conversations", &self.conversations)
            .finish()
    }
}
