//! Route a few messages through two agents and a local tool.
//!
//! Uses an offline model that answers with the last tool result when there
//! is one, so the example needs no API key.
//!
//! ```sh
//! RUST_LOG=debug cargo run -p conduit-runtime --example orchestrate
//! ```

use ccore::{
    Config, GenerationConfig, Message, Model, ModelError, Role, ToolCall, ToolSpec,
    config::ProviderConfig, resource::provider, tool::handler,
};
use conduit_runtime::{Agent, LOCAL_SERVER, Runtime, Strategy};
use serde_json::json;

/// Proposes the first offered tool once, then summarizes.
struct Offline;

impl Model for Offline {
    async fn generate(
        &self,
        model: &str,
        messages: &[Message],
        _config: &GenerationConfig,
    ) -> Result<String, ModelError> {
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        Ok(format!("[{model}] {last}"))
    }

    async fn propose_tool_call(
        &self,
        _model: &str,
        messages: &[Message],
        tools: &[ToolSpec],
        _config: &GenerationConfig,
    ) -> Result<Option<ToolCall>, ModelError> {
        if messages.iter().any(|m| m.role == Role::Tool) {
            return Ok(None);
        }
        let input = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(tools
            .first()
            .map(|tool| ToolCall::new(tool.name.clone(), json!({ "q": input }))))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    conduit_runtime::init_tracing();

    let mut config = Config::default();
    config
        .providers
        .insert("offline".into(), ProviderConfig::new("offline-1"));

    let runtime = Runtime::builder(config)
        .provider("offline", Offline)?
        .tool(
            ToolSpec::new(
                "search",
                "Search an in-memory index",
                json!({
                    "type": "object",
                    "properties": { "q": { "type": "string" } },
                    "required": ["q"]
                }),
            ),
            handler(|args| async move {
                let q = args.get("q").and_then(|q| q.as_str()).unwrap_or_default();
                Ok(json!(format!("3 documents mention '{q}'")))
            }),
        )
        .resource(
            "mem://motd",
            provider(|| async { Ok("all agents are resident".into()) }),
        )
        .agent(
            Agent::new("researcher")
                .capability("web_search")
                .capability("data_analysis")
                .tool(LOCAL_SERVER, "search")
                .default_strategy(Strategy::UseTools),
        )
        .agent(
            Agent::new("planner")
                .capability("task_decomposition")
                .capability("workflow_planning")
                .system_prompt("Break goals into steps."),
        )
        .build()?;

    runtime
        .conversations()
        .update_context("demo", json!({ "project": "conduit" }).as_object().cloned().unwrap_or_default())
        .await?;
    let motd = runtime
        .services()
        .protocol
        .fetch_resource(LOCAL_SERVER, "mem://motd")
        .await?;
    println!("motd: {}\n", String::from_utf8_lossy(&motd));

    for input in [
        "search for async runtimes",
        "plan the migration",
        "implement a parser",
    ] {
        let reply = runtime.send("demo", input).await?;
        println!("> {input}\n{reply}\n");
    }

    let stats = runtime.conversations().stats().await?;
    println!(
        "{} turns in {} conversation(s), {} active",
        stats.turns, stats.conversations, stats.active
    );
    for status in runtime.router().status() {
        println!("{}: {} completed, {} failed", status.agent_id, status.completed, status.failed);
    }
    Ok(())
}
