//! `ProviderGateway`: named providers with fallback chains and an active
//! selection.

use crate::erased::ErasedModel;
use ccore::{
    Error, GenerationConfig, Message, Model, ModelError, Result, ToolCall, ToolSpec,
    config::ProviderConfig,
};
use compact_str::CompactString;
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

/// A successful generation and how it was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation<T> {
    /// Provider that served the request.
    pub provider: CompactString,
    /// Model in the chain that produced the output.
    pub model: CompactString,
    pub output: T,
    /// Retryable failures encountered before the output, in order.
    pub failures: Vec<Fallback>,
}

impl<T> Generation<T> {
    /// Whether the output came from a model other than the primary.
    pub fn fell_back(&self) -> bool {
        self.failures.iter().any(|f| f.model != self.model)
    }
}

/// A retryable failure recorded while walking a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Fallback {
    pub model: CompactString,
    pub error: ModelError,
}

struct Provider {
    config: ProviderConfig,
    adapter: Arc<dyn ErasedModel>,
}

struct Inner {
    providers: BTreeMap<CompactString, Arc<Provider>>,
    /// Provider used when a caller names none. The first registered
    /// provider becomes active.
    active: Option<CompactString>,
}

/// Concurrent-safe map of named providers.
///
/// Lookups clone an `Arc` out of the map; the lock is never held across a
/// model call.
#[derive(Clone)]
pub struct ProviderGateway {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Clone, Copy)]
enum Request<'a> {
    Generate,
    Propose(&'a [ToolSpec]),
}

enum Output {
    Text(String),
    Call(Option<ToolCall>),
}

impl Default for ProviderGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderGateway {
    /// An empty gateway.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                providers: BTreeMap::new(),
                active: None,
            })),
        }
    }

    /// Register `adapter` under `name`, replacing any provider with the same
    /// name.
    pub fn register<M: Model>(
        &self,
        name: impl Into<CompactString>,
        config: ProviderConfig,
        adapter: M,
    ) -> Result<()> {
        let name = name.into();
        if config.primary.is_empty() {
            return Err(Error::Config(format!("provider '{name}' has no primary model")));
        }
        tracing::debug!(provider = %name, chain = ?config.chain().collect::<Vec<_>>(), "registering provider");

        let mut inner = self.inner.write();
        inner.active.get_or_insert_with(|| name.clone());
        inner.providers.insert(
            name,
            Arc::new(Provider {
                config,
                adapter: Arc::new(adapter),
            }),
        );
        Ok(())
    }

    /// Remove a provider. The active provider cannot be removed.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.active.as_deref() == Some(name) {
            return Err(Error::Config(format!("cannot remove the active provider '{name}'")));
        }
        if inner.providers.remove(name).is_none() {
            return Err(Error::Config(format!("provider '{name}' not found")));
        }
        Ok(())
    }

    /// Switch the active provider.
    pub fn switch(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.providers.contains_key(name) {
            return Err(Error::Config(format!("provider '{name}' not found")));
        }
        inner.active = Some(name.into());
        Ok(())
    }

    /// Name of the active provider.
    pub fn active(&self) -> Option<CompactString> {
        self.inner.read().active.clone()
    }

    /// Registered provider names.
    pub fn providers(&self) -> Vec<CompactString> {
        self.inner.read().providers.keys().cloned().collect()
    }

    /// Config of a provider.
    pub fn config(&self, name: &str) -> Option<ProviderConfig> {
        self.inner
            .read()
            .providers
            .get(name)
            .map(|p| p.config.clone())
    }

    /// Generate text through `provider`'s chain.
    pub async fn generate(
        &self,
        provider: &str,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> Result<Generation<String>> {
        let generation = self.run(provider, messages, config, Request::Generate).await?;
        Ok(generation.map(|output| match output {
            Output::Text(text) => text,
            Output::Call(_) => String::new(),
        }))
    }

    /// Ask `provider`'s chain for a tool call proposal.
    pub async fn propose_tool_call(
        &self,
        provider: &str,
        messages: &[Message],
        tools: &[ToolSpec],
        config: &GenerationConfig,
    ) -> Result<Generation<Option<ToolCall>>> {
        let generation = self
            .run(provider, messages, config, Request::Propose(tools))
            .await?;
        Ok(generation.map(|output| match output {
            Output::Call(call) => call,
            Output::Text(_) => None,
        }))
    }

    fn get(&self, name: &str) -> Result<Arc<Provider>> {
        self.inner
            .read()
            .providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("provider '{name}' not found")))
    }

    async fn run(
        &self,
        name: &str,
        messages: &[Message],
        config: &GenerationConfig,
        request: Request<'_>,
    ) -> Result<Generation<Output>> {
        let provider = self.get(name)?;
        let timeout = provider.config.timeout();
        let mut failures = Vec::new();

        for model in provider.config.chain() {
            for attempt in 1..=provider.config.retries.max(1) {
                let call = async {
                    match request {
                        Request::Generate => provider
                            .adapter
                            .generate(model, messages, config)
                            .await
                            .map(Output::Text),
                        Request::Propose(tools) => provider
                            .adapter
                            .propose_tool_call(model, messages, tools, config)
                            .await
                            .map(Output::Call),
                    }
                };
                let outcome = tokio::time::timeout(timeout, call)
                    .await
                    .unwrap_or(Err(ModelError::Timeout));

                match outcome {
                    Ok(output) => {
                        if !failures.is_empty() {
                            tracing::info!(provider = name, %model, failed = failures.len(), "served after fallback");
                        }
                        return Ok(Generation {
                            provider: name.into(),
                            model: model.clone(),
                            output,
                            failures,
                        });
                    }
                    Err(error) if error.is_retryable() => {
                        tracing::warn!(provider = name, %model, attempt, %error, "retryable model failure");
                        failures.push(Fallback {
                            model: model.clone(),
                            error,
                        });
                    }
                    Err(error) => {
                        tracing::warn!(provider = name, %model, %error, "model failed");
                        return Err(Error::Provider {
                            provider: name.into(),
                            model: model.clone(),
                            source: error,
                        });
                    }
                }
            }
        }

        Err(Error::ProviderExhausted {
            provider: name.into(),
            attempts: failures.into_iter().map(|f| (f.model, f.error)).collect(),
        })
    }
}

impl<T> Generation<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Generation<U> {
        Generation {
            provider: self.provider,
            model: self.model,
            output: f(self.output),
            failures: self.failures,
        }
    }
}

impl std::fmt::Debug for ProviderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ProviderGateway")
            .field("active", &inner.active)
            .field("providers", &inner.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
