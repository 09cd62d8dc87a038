//! In-process resources, served next to local tools.

use bytes::Bytes;
use compact_str::CompactString;
use parking_lot::RwLock;
use std::{collections::BTreeMap, future::Future, pin::Pin, sync::Arc};

/// Type-erased async resource provider. Called on every read.
pub type ResourceProvider =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<Bytes>> + Send>> + Send + Sync>;

/// Wrap an async closure into a [`ResourceProvider`].
pub fn provider<F, Fut>(f: F) -> ResourceProvider
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// URI-keyed resource table.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: RwLock<BTreeMap<CompactString, ResourceProvider>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any provider for the same URI.
    pub fn register(&self, uri: impl Into<CompactString>, provider: ResourceProvider) {
        let uri = uri.into();
        tracing::debug!(%uri, "registering resource");
        self.resources.write().insert(uri, provider);
    }

    /// Remove a resource. Returns whether it existed.
    pub fn unregister(&self, uri: &str) -> bool {
        self.resources.write().remove(uri).is_some()
    }

    /// Registered URIs, sorted.
    pub fn uris(&self) -> Vec<CompactString> {
        self.resources.read().keys().cloned().collect()
    }

    /// Read a resource. `None` when nothing is registered under `uri`.
    pub async fn read(&self, uri: &str) -> Option<anyhow::Result<Bytes>> {
        let provider = self.resources.read().get(uri).cloned()?;
        Some(provider().await)
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resources", &self.uris())
            .finish()
    }
}
