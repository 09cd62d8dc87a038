//! `ProtocolGateway`: uniform tool and resource access across backends.

use crate::{
    backoff::Backoff,
    http::HttpTransport,
    local::LocalTransport,
    stdio::StdioTransport,
    transport::{ErasedConnection, ErasedTransport, RequestError, Transport},
};
use bytes::Bytes;
use ccore::{
    Error, ResourceRegistry, Result, ToolCallResult, ToolErrorKind, ToolRegistry, ToolSpec,
    config::{BackoffConfig, ServerConfig, TransportKind},
};
use compact_str::CompactString;
use parking_lot::RwLock;
use serde_json::Value;
use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection state of one backend.
#[derive(Default)]
struct Slot {
    conn: Option<Arc<dyn ErasedConnection>>,
    failures: u32,
    retry_at: Option<Instant>,
}

struct Backend {
    transport: Box<dyn ErasedTransport>,
    /// Held only while connecting or updating state, never across a
    /// request.
    slot: Mutex<Slot>,
    tools: RwLock<Option<Vec<ToolSpec>>>,
}

/// Why a request produced no result.
enum Failure {
    Unavailable(String),
    Timeout,
    Request(RequestError),
}

/// Routes tool calls and resource reads to named backends.
///
/// Connections are opened lazily on first use and reused. A backend whose
/// connection fails a health check is marked unavailable and reconnects
/// only after a capped exponential cooldown.
pub struct ProtocolGateway {
    backends: RwLock<BTreeMap<CompactString, Arc<Backend>>>,
    backoff: Backoff,
    request_timeout: Duration,
}

impl Default for ProtocolGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolGateway {
    /// A gateway with no backends.
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(BTreeMap::new()),
            backoff: Backoff::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the reconnect backoff.
    pub fn with_backoff(mut self, config: &BackoffConfig) -> Self {
        self.backoff = Backoff::from(config);
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Add a backend, replacing any backend with the same name. No
    /// connection is made until first use.
    pub fn add_backend<T: Transport>(&self, name: impl Into<CompactString>, transport: T) {
        let name = name.into();
        tracing::debug!(server = %name, "adding backend");
        self.backends.write().insert(
            name,
            Arc::new(Backend {
                transport: Box::new(transport),
                slot: Mutex::new(Slot::default()),
                tools: RwLock::new(None),
            }),
        );
    }

    /// Add a backend from a `[[servers]]` entry.
    pub fn add_server(&self, config: &ServerConfig) -> Result<()> {
        let invalid = |e: anyhow::Error| Error::Config(format!("{e:#}"));
        match config.transport {
            TransportKind::Stdio => self.add_backend(
                config.name.clone(),
                StdioTransport::from_config(config).map_err(invalid)?,
            ),
            TransportKind::Http => self.add_backend(
                config.name.clone(),
                HttpTransport::from_config(config).map_err(invalid)?,
            ),
        }
        Ok(())
    }

    /// Serve an in-process tool registry under `name`.
    pub fn serve_registry(&self, name: impl Into<CompactString>, registry: Arc<ToolRegistry>) {
        self.add_backend(name, LocalTransport::new(registry));
    }

    /// Serve in-process tools and resources under `name`.
    pub fn serve_local(
        &self,
        name: impl Into<CompactString>,
        tools: Arc<ToolRegistry>,
        resources: Arc<ResourceRegistry>,
    ) {
        self.add_backend(name, LocalTransport::new(tools).with_resources(resources));
    }

    /// Remove a backend, dropping its connection.
    pub fn remove_backend(&self, name: &str) -> bool {
        self.backends.write().remove(name).is_some()
    }

    /// Names of all backends.
    pub fn backends(&self) -> Vec<CompactString> {
        self.backends.read().keys().cloned().collect()
    }

    /// Call `tool` on `server`. Failures are returned as values.
    pub async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> ToolCallResult {
        let outcome = self
            .request(server, "tools/call", |conn| async move {
                conn.call_tool(tool, arguments).await
            })
            .await;
        match outcome {
            Ok(result) => result,
            Err(Failure::Unavailable(reason)) => {
                ToolCallResult::error(ToolErrorKind::Unavailable, reason)
            }
            Err(Failure::Timeout) => ToolCallResult::error(
                ToolErrorKind::Timeout,
                format!("'{tool}' on '{server}' timed out"),
            ),
            Err(Failure::Request(error)) => match error {
                RequestError::InvalidParams(detail) => {
                    ToolCallResult::error(ToolErrorKind::Validation, detail)
                }
                RequestError::NotFound(detail) => {
                    ToolCallResult::error(ToolErrorKind::NotFound, detail)
                }
                RequestError::Rejected(detail) => {
                    ToolCallResult::error(ToolErrorKind::Execution, detail)
                }
                RequestError::Transport(e) => {
                    ToolCallResult::error(ToolErrorKind::Unavailable, format!("{e:#}"))
                }
            },
        }
    }

    /// Read a resource. Text contents are returned as UTF-8 bytes; blobs
    /// are base64-decoded.
    pub async fn fetch_resource(&self, server: &str, uri: &str) -> Result<Bytes> {
        self.request(server, "resources/read", |conn| async move {
            conn.read_resource(uri).await
        })
        .await
        .map_err(|failure| failure.into_error(server, "resource"))
    }

    /// Tools offered by `server`. Cached until the connection is dropped.
    pub async fn list_tools(&self, server: &str) -> Result<Vec<ToolSpec>> {
        let backend = self.backend(server).map_err(|f| f.into_error(server, "listing"))?;
        let cached = backend.tools.read().clone();
        if let Some(tools) = cached {
            return Ok(tools);
        }

        let tools = self
            .request(server, "tools/list", |conn| async move { conn.list_tools().await })
            .await
            .map_err(|failure| failure.into_error(server, "listing"))?;

        *backend.tools.write() = Some(tools.clone());
        Ok(tools)
    }

    /// The [`ToolSpec`] of one tool on `server`.
    pub async fn tool_spec(&self, server: &str, tool: &str) -> Result<Option<ToolSpec>> {
        Ok(self
            .list_tools(server)
            .await?
            .into_iter()
            .find(|spec| spec.name == tool))
    }

    /// Connect if needed and run a health check. A failed check marks the
    /// backend unavailable.
    pub async fn check_health(&self, server: &str) -> bool {
        let Ok(backend) = self.backend(server) else {
            return false;
        };
        let Ok(conn) = self.connection(server, &backend).await else {
            return false;
        };
        let healthy = conn.health_check().await;
        if !healthy {
            self.mark_unavailable(server, &backend, &conn).await;
        }
        healthy
    }

    /// Drop the connection to `server`; the next call reconnects.
    pub async fn disconnect(&self, server: &str) {
        if let Ok(backend) = self.backend(server) {
            backend.slot.lock().await.conn = None;
            *backend.tools.write() = None;
        }
    }

    fn backend(&self, server: &str) -> std::result::Result<Arc<Backend>, Failure> {
        self.backends
            .read()
            .get(server)
            .cloned()
            .ok_or_else(|| Failure::Unavailable(format!("unknown server '{server}'")))
    }

    async fn connection(
        &self,
        server: &str,
        backend: &Backend,
    ) -> std::result::Result<Arc<dyn ErasedConnection>, Failure> {
        let mut slot = backend.slot.lock().await;
        if let Some(conn) = &slot.conn {
            return Ok(conn.clone());
        }
        if let Some(retry_at) = slot.retry_at {
            let now = Instant::now();
            if now < retry_at {
                return Err(Failure::Unavailable(format!(
                    "'{server}' unavailable, retrying in {}ms",
                    (retry_at - now).as_millis()
                )));
            }
        }

        match backend.transport.connect().await {
            Ok(conn) => {
                slot.conn = Some(conn.clone());
                slot.failures = 0;
                slot.retry_at = None;
                Ok(conn)
            }
            Err(e) => {
                slot.failures += 1;
                let delay = self.backoff.delay(slot.failures);
                slot.retry_at = Some(Instant::now() + delay);
                tracing::warn!(server, failures = slot.failures, ?delay, "connect failed: {e:#}");
                Err(Failure::Unavailable(format!("'{server}' connect failed: {e:#}")))
            }
        }
    }

    async fn mark_unavailable(
        &self,
        server: &str,
        backend: &Backend,
        conn: &Arc<dyn ErasedConnection>,
    ) {
        let mut slot = backend.slot.lock().await;
        // Another caller may already have replaced the connection.
        if slot.conn.as_ref().is_some_and(|current| Arc::ptr_eq(current, conn)) {
            slot.conn = None;
            slot.failures += 1;
            let delay = self.backoff.delay(slot.failures);
            slot.retry_at = Some(Instant::now() + delay);
            *backend.tools.write() = None;
            tracing::warn!(server, ?delay, "backend failed health check, marked unavailable");
        }
    }

    /// Run one operation on `server` under the request timeout. A
    /// transport error triggers a health check.
    async fn request<T, F, Fut>(
        &self,
        server: &str,
        operation: &'static str,
        run: F,
    ) -> std::result::Result<T, Failure>
    where
        F: FnOnce(Arc<dyn ErasedConnection>) -> Fut,
        Fut: Future<Output = std::result::Result<T, RequestError>>,
    {
        let backend = self.backend(server)?;
        let conn = self.connection(server, &backend).await?;

        match tokio::time::timeout(self.request_timeout, run(conn.clone())).await {
            Err(_) => {
                tracing::warn!(server, operation, "request timed out");
                Err(Failure::Timeout)
            }
            Ok(Err(RequestError::Transport(e))) => {
                tracing::warn!(server, operation, "transport error: {e:#}");
                if !conn.health_check().await {
                    self.mark_unavailable(server, &backend, &conn).await;
                }
                Err(Failure::Unavailable(format!("'{server}' transport error: {e:#}")))
            }
            Ok(Err(e)) => {
                tracing::debug!(server, operation, "request rejected: {e}");
                Err(Failure::Request(e))
            }
            Ok(Ok(value)) => Ok(value),
        }
    }
}

impl Failure {
    fn into_error(self, server: &str, stage: &'static str) -> Error {
        match self {
            Self::Unavailable(reason) => Error::Backend {
                server: server.into(),
                reason,
            },
            Self::Timeout => Error::Timeout { stage },
            Self::Request(error) => Error::Backend {
                server: server.into(),
                reason: error.to_string(),
            },
        }
    }
}

impl std::fmt::Debug for ProtocolGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolGateway")
            .field("backends", &self.backends())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
