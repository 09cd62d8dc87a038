//! Tests for agent strategies.

use ccore::{
    Config, ErrorKind, Phase, Role, Task, ToolCall, ToolSpec, config::ProviderConfig,
    testing::ScriptedModel, tool::handler,
};
use conduit_runtime::{Agent, LOCAL_SERVER, Runtime, RuntimeBuilder, Strategy};
use serde_json::{Value, json};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

fn builder(model: &ScriptedModel) -> RuntimeBuilder {
    let mut config = Config::default();
    config
        .providers
        .insert("main".into(), ProviderConfig::new("m1"));
    Runtime::builder(config)
        .provider("main", model.clone())
        .unwrap()
}

/// A `search` tool requiring a string `q`, counting its invocations.
fn search(builder: RuntimeBuilder, hits: Arc<AtomicUsize>) -> RuntimeBuilder {
    let spec = ToolSpec::new(
        "search",
        "Search the web",
        json!({
            "type": "object",
            "properties": { "q": { "type": "string" } },
            "required": ["q"]
        }),
    );
    builder.tool(
        spec,
        handler(move |args| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let q = args.get("q").and_then(Value::as_str).unwrap_or_default();
                Ok(json!({ "results": [format!("{q} 1"), format!("{q} 2")] }))
            }
        }),
    )
}

fn researcher() -> Agent {
    Agent::new("researcher")
        .capability("web_search")
        .tool(LOCAL_SERVER, "search")
        .default_strategy(Strategy::UseTools)
}

fn research(input: &str) -> Task {
    Task::new("research")
        .require("web_search")
        .with_payload("input", input)
}

#[tokio::test]
async fn tool_result_feeds_the_second_generation() {
    let model = ScriptedModel::new()
        .propose("m1", Some(ToolCall::new("search", json!({ "q": "rust" }))))
        .reply("m1", "rust has crates");
    let hits = Arc::new(AtomicUsize::new(0));
    let runtime = search(builder(&model), hits.clone())
        .agent(researcher())
        .build()
        .unwrap();

    let reply = runtime.dispatch(research("find rust")).await.unwrap().reply;
    assert_eq!(reply.text, "rust has crates");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(
        reply.trace,
        [
            Phase::Received,
            Phase::Generating,
            Phase::CallingTools,
            Phase::Generating,
            Phase::Generating,
            Phase::Completed,
        ]
    );

    let offered: Vec<_> = model.last_tools().into_iter().map(|t| t.name).collect();
    assert_eq!(offered, ["search"]);
    let messages = model.last_messages();
    let tool = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool.content.contains("rust 1"));
}

#[tokio::test]
async fn invalid_arguments_get_one_correction() {
    let model = ScriptedModel::new()
        .propose("m1", Some(ToolCall::new("search", json!({}))))
        .propose("m1", Some(ToolCall::new("search", json!({ "q": "rust" }))))
        .reply("m1", "done");
    let hits = Arc::new(AtomicUsize::new(0));
    let runtime = search(builder(&model), hits.clone())
        .agent(researcher())
        .build()
        .unwrap();

    let reply = runtime.dispatch(research("find rust")).await.unwrap().reply;
    assert_eq!(reply.text, "done");
    // The invalid call never reached the handler.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_tool_failure_fails_the_task() {
    let model = ScriptedModel::new()
        .propose("m1", Some(ToolCall::new("search", json!({}))))
        .propose("m1", Some(ToolCall::new("search", json!({ "q": 7 }))));
    let hits = Arc::new(AtomicUsize::new(0));
    let runtime = search(builder(&model), hits.clone())
        .agent(researcher())
        .build()
        .unwrap();

    let err = runtime.dispatch(research("find rust")).await.unwrap_err();
    let ccore::Error::NoAgentAvailable { failures, .. } = err else {
        panic!("expected NoAgentAvailable");
    };
    assert_eq!(failures[0].kind, ErrorKind::Validation);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unbound_tools_are_not_called() {
    let model = ScriptedModel::new()
        .propose("m1", Some(ToolCall::new("delete_everything", json!({}))))
        .reply("m1", "ok");
    let hits = Arc::new(AtomicUsize::new(0));
    let runtime = search(builder(&model), hits.clone())
        .agent(researcher())
        .build()
        .unwrap();

    let reply = runtime.dispatch(research("find rust")).await.unwrap().reply;
    assert_eq!(reply.text, "ok");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    let messages = model.last_messages();
    let tool = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool.content.contains("not available"));
}

#[tokio::test]
async fn delegates_to_an_agent_with_the_capability() {
    let model = ScriptedModel::new();
    let runtime = builder(&model)
        .agent(
            Agent::new("lead")
                .capability("planning")
                .default_strategy(Strategy::Delegate {
                    capability: "web_search".into(),
                }),
        )
        .agent(Agent::new("scout").capability("web_search"))
        .build()
        .unwrap();

    let task = Task::new("planning")
        .require("planning")
        .with_payload("input", "plan a trip");
    let dispatch = runtime.dispatch(task).await.unwrap();
    assert_eq!(dispatch.reply.agent_id, "scout");
    assert_eq!(dispatch.reply.text, "m1: plan a trip");
    assert_eq!(
        dispatch.reply.trace,
        [Phase::Received, Phase::Delegating, Phase::Completed]
    );
}

#[tokio::test]
async fn delegation_cycles_hit_the_hop_limit() {
    let model = ScriptedModel::new();
    let runtime = builder(&model)
        .agent(Agent::new("ping").capability("ping").default_strategy(Strategy::Delegate {
            capability: "pong".into(),
        }))
        .agent(Agent::new("pong").capability("pong").default_strategy(Strategy::Delegate {
            capability: "ping".into(),
        }))
        .build()
        .unwrap();

    let task = Task::new("general")
        .require("ping")
        .with_payload("input", "loop");
    let err = runtime.dispatch(task).await.unwrap_err();
    let ccore::Error::NoAgentAvailable { failures, .. } = err else {
        panic!("expected NoAgentAvailable");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].agent_id, "ping");
    assert_eq!(failures[0].kind, ErrorKind::DelegationLimit);
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn delegation_without_target_is_unavailable() {
    let model = ScriptedModel::new();
    let runtime = builder(&model)
        .agent(Agent::new("lonely").capability("x").default_strategy(Strategy::Delegate {
            capability: "x".into(),
        }))
        .build()
        .unwrap();

    let task = Task::new("general").require("x");
    let err = runtime.dispatch(task).await.unwrap_err();
    let ccore::Error::NoAgentAvailable { failures, .. } = err else {
        panic!("expected NoAgentAvailable");
    };
    assert_eq!(failures[0].kind, ErrorKind::DelegationUnavailable);
}
