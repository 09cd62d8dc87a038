//! Tests for the Runtime builder.

use bytes::Bytes;
use ccore::{
    AgentDescriptor, Config, Endpoint, ErrorKind, ToolSpec, config::ProviderConfig,
    resource::provider, testing::ScriptedModel, tool::handler,
};
use conduit_runtime::{Agent, LOCAL_SERVER, Runtime};
use serde_json::json;
use std::{io::Write, time::Duration};

const CONFIG: &str = r#"
[providers.main]
primary = "m1"
fallbacks = ["m2"]

[routing]
max_attempts = 2
max_hops = 2

[[routing.rules]]
kind = "research"
prefer = ["scout"]

[directory]
ttl_secs = 60

[[servers]]
name = "search"
transport = "http"
url = "http://127.0.0.1:9/mcp"

[[agents]]
id = "translator"
capabilities = ["translation"]
url = "http://127.0.0.1:9"
token = "${CONDUIT_RUNTIME_TEST_TOKEN}"

[conversation]
history_window = 2
"#;

#[tokio::test]
async fn builds_from_a_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let config = Config::load(file.path()).unwrap();

    let model = ScriptedModel::new();
    let runtime = Runtime::builder(config)
        .provider("main", model.clone())
        .unwrap()
        .agent(
            Agent::new("scout")
                .capability("web_search")
                .capability("data_analysis"),
        )
        .build()
        .unwrap();

    assert_eq!(runtime.agents(), ["scout", "translator"]);
    assert_eq!(runtime.services().protocol.backends(), [LOCAL_SERVER, "search"]);
    assert_eq!(runtime.services().models.active().as_deref(), Some("main"));
    assert_eq!(runtime.config().conversation.history_window, 2);

    let reply = runtime.send("c1", "find the docs").await.unwrap();
    assert_eq!(reply, "m1: find the docs");
}

#[test]
fn unknown_provider_is_rejected() {
    let err = Runtime::builder(Config::default())
        .provider("nope", ScriptedModel::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn agents_need_capabilities() {
    let err = Runtime::builder(Config::default())
        .agent(Agent::new("idle"))
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Registration);
}

#[test]
fn invalid_config_is_rejected() {
    let mut config = Config::default();
    config.routing.max_attempts = 0;
    let err = Runtime::builder(config).build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[tokio::test]
async fn local_tools_are_served_through_the_gateway() {
    let runtime = Runtime::builder(Config::default())
        .tool(
            ToolSpec::new("echo", "Echo the input", json!({ "type": "object" })),
            handler(|args| async move { Ok(serde_json::Value::Object(args)) }),
        )
        .build()
        .unwrap();

    let result = runtime
        .services()
        .protocol
        .call_tool(LOCAL_SERVER, "echo", json!({ "a": 1 }))
        .await;
    assert_eq!(result.into_result("echo").unwrap(), json!({ "a": 1 }));
    assert!(runtime.tools().contains("echo"));
}

#[tokio::test]
async fn idle_local_agents_stay_routable() {
    let mut config = Config::default();
    config
        .providers
        .insert("main".into(), ProviderConfig::new("m1"));
    config.directory.ttl_secs = 1;
    let runtime = Runtime::builder(config)
        .provider("main", ScriptedModel::new())
        .unwrap()
        .agent(Agent::new("a").capability("x"))
        .build()
        .unwrap();
    let directory = runtime.services().directory().clone();
    directory
        .register(AgentDescriptor::new("remote").with_endpoint(Endpoint::Http {
            url: "http://127.0.0.1:9".into(),
        }))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert!(directory.is_live("a"));
    assert!(!directory.is_live("remote"));
    assert_eq!(directory.sweep(), ["remote"]);

    let reply = runtime.send("c1", "hello").await.unwrap();
    assert_eq!(reply, "m1: hello");
}

#[tokio::test]
async fn local_resources_are_served_through_the_gateway() {
    let runtime = Runtime::builder(Config::default())
        .resource(
            "mem://motd",
            provider(|| async { Ok(Bytes::from_static(b"welcome")) }),
        )
        .build()
        .unwrap();

    let motd = runtime
        .services()
        .protocol
        .fetch_resource(LOCAL_SERVER, "mem://motd")
        .await
        .unwrap();
    assert_eq!(&motd[..], b"welcome");
    assert_eq!(runtime.resources().uris(), ["mem://motd"]);
}
