//! Model adapter abstraction.
//!
//! A [`Model`] turns a message history into text, or into a structured
//! tool call proposal. Concrete vendors live outside this workspace; the
//! provider gateway wraps adapters with fallback and timeouts.

use crate::{
    message::Message,
    tool::{ToolCall, ToolSpec},
};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Failure reported by a model adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ModelError {
    /// The request did not finish in time.
    #[error("request timed out")]
    Timeout,
    /// The vendor throttled the request.
    #[error("rate limited")]
    RateLimited,
    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The request or response could not be understood.
    #[error("malformed: {0}")]
    Malformed(String),
    /// The vendor is down or refused the connection.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ModelError {
    /// Retryable errors advance the fallback chain; the rest surface
    /// immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::Unavailable(_)
        )
    }
}

/// Sampling parameters forwarded to the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

impl GenerationConfig {
    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the token limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A vendor adapter.
///
/// `model` names the concrete model within the vendor, so one adapter can
/// serve a whole fallback chain.
pub trait Model: Send + Sync + 'static {
    /// Generate a text completion.
    fn generate(
        &self,
        model: &str,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> impl Future<Output = Result<String, ModelError>> + Send;

    /// Propose a tool call, or `None` when the model wants to answer
    /// directly.
    fn propose_tool_call(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSpec],
        config: &GenerationConfig,
    ) -> impl Future<Output = Result<Option<ToolCall>, ModelError>> + Send;
}
