//! MCP client connection over any rmcp transport.
//!
//! The stdio and HTTP transports only differ in how the rmcp service is
//! started; every operation after the handshake goes through
//! [`ClientConnection`].

use crate::transport::{Connection, RequestError};
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use ccore::{ToolCallResult, ToolErrorKind, ToolSpec};
use compact_str::CompactString;
use rmcp::{
    ServiceError,
    model::{
        CallToolRequestParams, CallToolResult, Content, ErrorCode, RawContent, ResourceContents,
        Tool,
    },
    service::{RoleClient, RunningService},
};
use serde_json::{Map, Value, json};
use std::time::Duration;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// A running rmcp client session.
pub struct ClientConnection {
    service: RunningService<RoleClient, ()>,
}

impl ClientConnection {
    pub(crate) fn new(service: RunningService<RoleClient, ()>) -> Self {
        Self { service }
    }
}

impl Connection for ClientConnection {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, RequestError> {
        let arguments = match arguments {
            Value::Null => None,
            Value::Object(map) => Some(map),
            other => {
                return Err(RequestError::InvalidParams(format!(
                    "arguments must be an object, got {other}"
                )));
            }
        };
        let mut params = CallToolRequestParams::new(name.to_owned());
        params.arguments = arguments;
        let result = self.service.call_tool(params).await.map_err(request_error)?;
        Ok(tool_result(result))
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, RequestError> {
        let tools = self.service.list_all_tools().await.map_err(request_error)?;
        Ok(tools.iter().map(convert_tool).collect())
    }

    async fn read_resource(&self, uri: &str) -> Result<Bytes, RequestError> {
        let params = serde_json::from_value(json!({ "uri": uri }))
            .map_err(|e| RequestError::InvalidParams(e.to_string()))?;
        let result = self.service.read_resource(params).await.map_err(request_error)?;
        let content = result
            .contents
            .into_iter()
            .next()
            .ok_or_else(|| RequestError::NotFound(format!("no contents for '{uri}'")))?;
        match content {
            ResourceContents::TextResourceContents { text, .. } => Ok(Bytes::from(text)),
            ResourceContents::BlobResourceContents { blob, .. } => STANDARD
                .decode(blob)
                .map(Bytes::from)
                .map_err(|e| RequestError::Rejected(format!("invalid blob for '{uri}': {e}"))),
        }
    }

    async fn health_check(&self) -> bool {
        matches!(
            tokio::time::timeout(HEALTH_TIMEOUT, self.service.list_tools(Default::default())).await,
            Ok(Ok(_))
        )
    }
}

/// Map an rmcp error onto the gateway's failure classes.
fn request_error(error: ServiceError) -> RequestError {
    match error {
        ServiceError::McpError(data) => {
            let message = data.message.to_string();
            match data.code {
                ErrorCode::INVALID_PARAMS => RequestError::InvalidParams(message),
                ErrorCode::METHOD_NOT_FOUND | ErrorCode::RESOURCE_NOT_FOUND => {
                    RequestError::NotFound(message)
                }
                code => RequestError::Rejected(format!("{message} ({})", code.0)),
            }
        }
        other => RequestError::Transport(anyhow::Error::new(other)),
    }
}

/// Structured content wins over text; `isError` results become
/// execution failures.
fn tool_result(result: CallToolResult) -> ToolCallResult {
    if result.is_error == Some(true) {
        return ToolCallResult::error(ToolErrorKind::Execution, content_text(&result.content));
    }
    match result.structured_content {
        Some(value) => ToolCallResult::success(value),
        None => ToolCallResult::success(Value::String(content_text(&result.content))),
    }
}

/// Convert an rmcp tool into a [`ToolSpec`].
pub fn convert_tool(tool: &Tool) -> ToolSpec {
    ToolSpec {
        name: CompactString::from(tool.name.as_ref()),
        description: tool
            .description
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default(),
        parameters: Value::Object(Map::clone(&tool.input_schema)),
    }
}

/// Join the text items of a tool result.
fn content_text(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection").finish_non_exhaustive()
    }
}
