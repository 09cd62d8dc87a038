//! Tests for the Router.

use ccore::{
    Config, ErrorKind, ModelError, Task,
    config::{ProviderConfig, RemoteAgentConfig, RoutingRule},
    testing::ScriptedModel,
};
use chrono::{TimeDelta, Utc};
use conduit_runtime::{Agent, LastOutcome, Runtime, Strategy};

fn config() -> Config {
    let mut config = Config::default();
    config
        .providers
        .insert("main".into(), ProviderConfig::new("m1"));
    config
        .providers
        .insert("broken".into(), ProviderConfig::new("dead"));
    config
}

fn model() -> ScriptedModel {
    ScriptedModel::new().down("dead", ModelError::Auth("bad key".into()))
}

fn runtime(config: Config, model: &ScriptedModel, agents: Vec<Agent>) -> Runtime {
    agents
        .into_iter()
        .fold(
            Runtime::builder(config)
                .provider("main", model.clone())
                .unwrap()
                .provider("broken", model.clone())
                .unwrap(),
            |builder, agent| builder.agent(agent),
        )
        .build()
        .unwrap()
}

fn task(input: &str) -> Task {
    Task::new("general").with_payload("input", input)
}

#[tokio::test]
async fn selects_only_agents_covering_the_requirements() {
    let model = model();
    let runtime = runtime(
        config(),
        &model,
        vec![
            Agent::new("a").capability("search"),
            Agent::new("b").capability("search").capability("analyze"),
        ],
    );

    let task = task("compare these").require("analyze");
    let candidates = runtime.router().candidates(&task);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].agent_id, "b");

    let dispatch = runtime.dispatch(task).await.unwrap();
    assert_eq!(dispatch.agent_id, "b");
    assert_eq!(dispatch.reply.agent_id, "b");
    assert_eq!(dispatch.reply.text, "m1: compare these");
    assert!(dispatch.failures.is_empty());
    assert_eq!(model.calls(), ["m1"]);
}

#[tokio::test]
async fn fails_over_to_the_next_candidate() {
    let mut config = config();
    config.routing.rules.push(RoutingRule {
        kind: "general".into(),
        prefer: vec!["a".into(), "b".into()],
    });
    let model = model();
    let runtime = runtime(
        config,
        &model,
        vec![
            Agent::new("a").capability("x").provider("broken"),
            Agent::new("b").capability("x"),
        ],
    );

    let task = task("hi").require("x");
    let original = task.id();
    let dispatch = runtime.dispatch(task).await.unwrap();

    assert_eq!(dispatch.reply.agent_id, "b");
    assert_eq!(dispatch.failures.len(), 1);
    assert_eq!(dispatch.failures[0].agent_id, "a");
    assert_eq!(dispatch.failures[0].kind, ErrorKind::Provider);
    // The second attempt is a retry of the submitted task.
    assert_ne!(dispatch.task.id(), original);
    assert_eq!(dispatch.task.retry_of(), Some(original));

    let status = runtime.router().status();
    let a = status.iter().find(|s| s.agent_id == "a").unwrap();
    assert_eq!(a.failed, 1);
    assert!(matches!(a.last, Some(LastOutcome::Failed { .. })));
    let b = status.iter().find(|s| s.agent_id == "b").unwrap();
    assert_eq!((b.completed, b.failed), (1, 0));
    assert_eq!(b.last, Some(LastOutcome::Completed));
}

#[tokio::test]
async fn rules_put_preferred_agents_first() {
    let mut config = config();
    config.routing.rules.push(RoutingRule {
        kind: "research".into(),
        prefer: vec!["z".into()],
    });
    let model = model();
    let runtime = runtime(
        config,
        &model,
        vec![
            Agent::new("y").capability("web_search"),
            Agent::new("z").capability("web_search"),
        ],
    );

    let research = Task::new("research").require("web_search");
    assert_eq!(runtime.router().candidates(&research)[0].agent_id, "z");
    let reply = runtime.dispatch(research).await.unwrap().reply;
    assert_eq!(reply.agent_id, "z");
}

#[tokio::test]
async fn unsatisfiable_task_fails_fast() {
    let model = model();
    let runtime = runtime(config(), &model, vec![Agent::new("a").capability("search")]);

    let err = runtime
        .dispatch(task("deploy").require("deploy"))
        .await
        .unwrap_err();
    let ccore::Error::NoAgentAvailable { failures, .. } = err else {
        panic!("expected NoAgentAvailable");
    };
    assert!(failures.is_empty());
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn every_failure_is_reported() {
    let model = model();
    let runtime = runtime(
        config(),
        &model,
        vec![
            Agent::new("a").capability("x").provider("broken"),
            Agent::new("b").capability("x").provider("broken"),
        ],
    );

    let err = runtime.dispatch(task("hi").require("x")).await.unwrap_err();
    let message = err.to_string();
    let ccore::Error::NoAgentAvailable { failures, .. } = err else {
        panic!("expected NoAgentAvailable");
    };
    let mut ids: Vec<_> = failures.iter().map(|f| f.agent_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, ["a", "b"]);
    assert!(failures.iter().all(|f| f.kind == ErrorKind::Provider));
    assert!(message.contains("bad key"));
}

#[tokio::test]
async fn attempts_are_capped() {
    let mut config = config();
    config.routing.max_attempts = 1;
    let model = model();
    let runtime = runtime(
        config,
        &model,
        vec![
            Agent::new("a").capability("x").provider("broken"),
            Agent::new("b").capability("x").provider("broken"),
        ],
    );

    let err = runtime.dispatch(task("hi").require("x")).await.unwrap_err();
    let ccore::Error::NoAgentAvailable { failures, .. } = err else {
        panic!("expected NoAgentAvailable");
    };
    assert_eq!(failures.len(), 1);
}

#[tokio::test]
async fn expired_task_never_reaches_an_agent() {
    let model = model();
    let runtime = runtime(config(), &model, vec![Agent::new("a").capability("x")]);

    let task = task("late")
        .require("x")
        .with_deadline(Utc::now() - TimeDelta::seconds(1));
    let err = runtime.dispatch(task).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn unreachable_remote_agent_is_a_candidate_failure() {
    let mut config = config();
    config.agents.push(RemoteAgentConfig {
        id: "far".into(),
        name: None,
        description: String::new(),
        capabilities: ["translation"].into_iter().map(Into::into).collect(),
        url: "http://127.0.0.1:9".into(),
        token: Some("secret".into()),
    });
    let model = model();
    let runtime = runtime(config, &model, vec![Agent::new("a").capability("x")]);

    let capabilities = runtime.router().capabilities();
    assert!(capabilities["far"].contains("translation"));

    let err = runtime
        .dispatch(task("bonjour").require("translation"))
        .await
        .unwrap_err();
    let ccore::Error::NoAgentAvailable { failures, .. } = err else {
        panic!("expected NoAgentAvailable");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, ErrorKind::DelegationUnavailable);
}

#[tokio::test]
async fn removed_agents_stop_matching() {
    let model = model();
    let runtime = runtime(config(), &model, vec![Agent::new("a").capability("x")]);

    assert!(runtime.router().remove_agent("a"));
    assert!(runtime.router().agent("a").is_none());
    assert!(runtime.dispatch(task("hi").require("x")).await.is_err());
}

#[tokio::test]
async fn dispatch_names_the_selected_agent_when_it_delegates() {
    let model = model();
    let runtime = runtime(
        config(),
        &model,
        vec![
            Agent::new("front")
                .capability("chat")
                .default_strategy(Strategy::Delegate {
                    capability: "deep".into(),
                }),
            Agent::new("worker").capability("deep"),
        ],
    );

    let dispatch = runtime.dispatch(task("think hard").require("chat")).await.unwrap();
    assert_eq!(dispatch.agent_id, "front");
    assert_eq!(dispatch.reply.agent_id, "worker");
}

#[tokio::test]
async fn routing_rules_change_at_runtime() {
    let model = model();
    let runtime = runtime(
        config(),
        &model,
        vec![
            Agent::new("y").capability("web_search"),
            Agent::new("z").capability("web_search"),
        ],
    );
    let router = runtime.router();
    let research = Task::new("research").require("web_search");
    let fallback = router.candidates(&research)[0].agent_id.clone();
    let other = if fallback == "y" { "z" } else { "y" };

    router.add_routing_rule("research", vec![other.into()]);
    assert_eq!(router.candidates(&research)[0].agent_id, other);
    assert_eq!(router.routing_rules()["research"], [other]);
    // Other kinds are untouched.
    let general = Task::new("general").require("web_search");
    assert_eq!(router.candidates(&general)[0].agent_id, fallback);

    assert!(router.remove_routing_rule("research"));
    assert!(!router.remove_routing_rule("research"));
    assert_eq!(router.candidates(&research)[0].agent_id, fallback);
    assert!(router.routing_rules().is_empty());
}
