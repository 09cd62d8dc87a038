//! Transport abstraction.
//!
//! A [`Transport`] knows how to open a [`Connection`]; a connection runs
//! MCP operations and answers health checks. Adding a transport means
//! implementing these two traits; the gateway never changes.

use bytes::Bytes;
use ccore::{ToolCallResult, ToolSpec};
use serde_json::Value;
use std::{future::Future, pin::Pin, sync::Arc};

/// Why an operation produced no result.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The server rejected the arguments.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// No such tool, resource, or method.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other protocol-level error from the server.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The connection itself failed.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Opens connections to one backend.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    /// Connect and complete any handshake.
    fn connect(&self) -> impl Future<Output = anyhow::Result<Self::Connection>> + Send;
}

/// An open connection. Must accept concurrent calls.
pub trait Connection: Send + Sync + 'static {
    /// Call a tool. Tool-level failures come back as an error result.
    fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> impl Future<Output = Result<ToolCallResult, RequestError>> + Send;

    /// Every tool the backend offers.
    fn list_tools(&self) -> impl Future<Output = Result<Vec<ToolSpec>, RequestError>> + Send;

    /// Read a resource. Text is returned as UTF-8, blobs decoded.
    fn read_resource(&self, uri: &str)
    -> impl Future<Output = Result<Bytes, RequestError>> + Send;

    /// Whether the backend still answers.
    fn health_check(&self) -> impl Future<Output = bool> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe transport wrapper for type erasure.
pub(crate) trait ErasedTransport: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, anyhow::Result<Arc<dyn ErasedConnection>>>;
}

impl<T: Transport> ErasedTransport for T {
    fn connect(&self) -> BoxFuture<'_, anyhow::Result<Arc<dyn ErasedConnection>>> {
        Box::pin(async move {
            let connection = Transport::connect(self).await?;
            Ok(Arc::new(connection) as Arc<dyn ErasedConnection>)
        })
    }
}

/// Object-safe connection wrapper for type erasure.
pub(crate) trait ErasedConnection: Send + Sync {
    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: Value,
    ) -> BoxFuture<'a, Result<ToolCallResult, RequestError>>;
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolSpec>, RequestError>>;
    fn read_resource<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Bytes, RequestError>>;
    fn health_check(&self) -> BoxFuture<'_, bool>;
}

impl<C: Connection> ErasedConnection for C {
    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: Value,
    ) -> BoxFuture<'a, Result<ToolCallResult, RequestError>> {
        Box::pin(Connection::call_tool(self, name, arguments))
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolSpec>, RequestError>> {
        Box::pin(Connection::list_tools(self))
    }

    fn read_resource<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Bytes, RequestError>> {
        Box::pin(Connection::read_resource(self, uri))
    }

    fn health_check(&self) -> BoxFuture<'_, bool> {
        Box::pin(Connection::health_check(self))
    }
}
