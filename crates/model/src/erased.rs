//! Object-safe model wrapper for type erasure.

use ccore::{GenerationConfig, Message, Model, ModelError, ToolCall, ToolSpec};
use std::{future::Future, pin::Pin};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ModelError>> + Send + 'a>>;

pub(crate) trait ErasedModel: Send + Sync {
    fn generate<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [Message],
        config: &'a GenerationConfig,
    ) -> BoxFuture<'a, String>;

    fn propose_tool_call<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [Message],
        tools: &'a [ToolSpec],
        config: &'a GenerationConfig,
    ) -> BoxFuture<'a, Option<ToolCall>>;
}

impl<M: Model> ErasedModel for M {
    fn generate<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [Message],
        config: &'a GenerationConfig,
    ) -> BoxFuture<'a, String> {
        Box::pin(Model::generate(self, model, messages, config))
    }

    fn propose_tool_call<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [Message],
        tools: &'a [ToolSpec],
        config: &'a GenerationConfig,
    ) -> BoxFuture<'a, Option<ToolCall>> {
        Box::pin(Model::propose_tool_call(self, model, messages, tools, config))
    }
}
