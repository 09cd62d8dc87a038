//! In-process backend serving a [`ToolRegistry`] and a
//! [`ResourceRegistry`] through the same operations as remote servers.

use crate::transport::{Connection, RequestError, Transport};
use anyhow::Result;
use bytes::Bytes;
use ccore::{ResourceRegistry, ToolCallResult, ToolErrorKind, ToolRegistry, ToolSpec};
use serde_json::Value;
use std::sync::Arc;

/// Connects to shared registries.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    tools: Arc<ToolRegistry>,
    resources: Arc<ResourceRegistry>,
}

impl LocalTransport {
    /// Serve `tools` with no resources.
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            resources: Arc::new(ResourceRegistry::new()),
        }
    }

    /// Serve `resources` next to the tools.
    pub fn with_resources(mut self, resources: Arc<ResourceRegistry>) -> Self {
        self.resources = resources;
        self
    }
}

impl Transport for LocalTransport {
    type Connection = LocalConnection;

    async fn connect(&self) -> Result<LocalConnection> {
        Ok(LocalConnection {
            tools: self.tools.clone(),
            resources: self.resources.clone(),
        })
    }
}

/// Dispatches straight into the registries.
#[derive(Debug)]
pub struct LocalConnection {
    tools: Arc<ToolRegistry>,
    resources: Arc<ResourceRegistry>,
}

impl Connection for LocalConnection {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, RequestError> {
        match self.tools.execute(name, arguments).await {
            ToolCallResult::Error {
                kind: ToolErrorKind::Validation,
                detail,
            } => Err(RequestError::InvalidParams(detail)),
            ToolCallResult::Error {
                kind: ToolErrorKind::NotFound,
                detail,
            } => Err(RequestError::NotFound(detail)),
            result => Ok(result),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, RequestError> {
        Ok(self.tools.manifest())
    }

    async fn read_resource(&self, uri: &str) -> Result<Bytes, RequestError> {
        match self.resources.read(uri).await {
            Some(Ok(bytes)) => Ok(bytes),
            Some(Err(e)) => Err(RequestError::Rejected(format!("reading '{uri}' failed: {e:#}"))),
            None => Err(RequestError::NotFound(format!("resource '{uri}' not found"))),
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}
