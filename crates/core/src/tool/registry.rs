//! In-process tool registry.

use super::{ToolCallResult, ToolErrorKind, ToolSpec, schema};
use compact_str::CompactString;
use futures_util::{FutureExt, future::join_all};
use jsonschema::Validator;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, future::Future, panic::AssertUnwindSafe, pin::Pin, sync::Arc};

/// Type-erased async tool handler.
///
/// Takes the validated arguments object and returns a JSON value.
pub type Handler = Arc<
    dyn Fn(Map<String, Value>) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>
        + Send
        + Sync,
>;

/// Wrap an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

struct Entry {
    spec: ToolSpec,
    /// Compiled parameter schema, or why it failed to compile.
    validator: Result<Validator, String>,
    handler: Handler,
}

/// Name-keyed tool table.
///
/// Reads are concurrent; registration takes a short write lock. The lock is
/// never held while a handler runs.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<CompactString, Arc<Entry>>>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    ///
    /// A tool whose schema does not compile stays registered but rejects
    /// every call with a validation error.
    pub fn register(&self, spec: ToolSpec, handler: Handler) {
        tracing::debug!(tool = %spec.name, "registering tool");
        let validator = schema::compile(&spec.parameters);
        if let Err(reason) = &validator {
            tracing::warn!(tool = %spec.name, %reason, "tool schema does not compile");
        }
        let name = spec.name.clone();
        self.tools.write().insert(
            name,
            Arc::new(Entry {
                spec,
                validator,
                handler,
            }),
        );
    }

    /// Remove a tool. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    /// The [`ToolSpec`] registered under `name`.
    pub fn get_schema(&self, name: &str) -> Option<ToolSpec> {
        self.tools.read().get(name).map(|entry| entry.spec.clone())
    }

    /// Whether a tool is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<CompactString> {
        self.tools.read().keys().cloned().collect()
    }

    /// Specs of every registered tool, sorted by name.
    pub fn manifest(&self) -> Vec<ToolSpec> {
        self.tools
            .read()
            .values()
            .map(|entry| entry.spec.clone())
            .collect()
    }

    /// Validate `args` and run the tool.
    ///
    /// The handler is not invoked when validation fails. Handler errors and
    /// panics become [`ToolErrorKind::Execution`].
    pub async fn execute(&self, name: &str, args: Value) -> ToolCallResult {
        let Some(entry) = self.tools.read().get(name).cloned() else {
            return ToolCallResult::error(ToolErrorKind::NotFound, format!("unknown tool '{name}'"));
        };

        let checked = match &entry.validator {
            Ok(validator) => schema::check(validator, &args),
            Err(reason) => Err(reason.clone()),
        };
        if let Err(reason) = checked {
            tracing::debug!(tool = name, %reason, "rejected tool arguments");
            return ToolCallResult::error(ToolErrorKind::Validation, reason);
        }

        let args = match args {
            Value::Object(object) => object,
            _ => Map::new(),
        };
        let run = AssertUnwindSafe(async move { (entry.handler)(args).await }).catch_unwind();
        match run.await {
            Ok(Ok(value)) => ToolCallResult::success(value),
            Ok(Err(e)) => {
                tracing::warn!(tool = name, error = %e, "tool handler failed");
                ToolCallResult::error(ToolErrorKind::Execution, format!("{e:#}"))
            }
            Err(_) => {
                tracing::error!(tool = name, "tool handler panicked");
                ToolCallResult::error(ToolErrorKind::Execution, "handler panicked")
            }
        }
    }

    /// Run several calls concurrently. Results keep the input order.
    pub async fn execute_many(&self, calls: Vec<(CompactString, Value)>) -> Vec<ToolCallResult> {
        join_all(
            calls
                .into_iter()
                .map(|(name, args)| async move { self.execute(&name, args).await }),
        )
        .await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
