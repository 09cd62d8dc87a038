//! Tests for the ConversationManager.

use ccore::{
    Config, ErrorKind, Message, Task, TurnOutcome, config::ProviderConfig, testing::ScriptedModel,
};
use chrono::{TimeDelta, Utc};
use conduit_runtime::{Agent, Runtime, Strategy};
use serde_json::json;
use std::{sync::Arc, time::Duration};

fn runtime(model: &ScriptedModel) -> Runtime {
    let mut config = Config::default();
    config
        .providers
        .insert("main".into(), ProviderConfig::new("m1"));
    Runtime::builder(config)
        .provider("main", model.clone())
        .unwrap()
        .agent(
            Agent::new("researcher")
                .capability("web_search")
                .capability("data_analysis"),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn every_message_becomes_a_turn() {
    let model = ScriptedModel::new();
    let runtime = runtime(&model);

    let found = runtime.send("c1", "search for rust crates").await.unwrap();
    assert_eq!(found, "m1: search for rust crates");
    let general = runtime.send("c1", "hello").await.unwrap();
    assert_eq!(general, "m1: hello");
    // No agent writes code.
    let failed = runtime.send("c1", "implement a parser").await.unwrap();
    assert!(failed.starts_with("Sorry"));

    let history = runtime.conversations().history("c1", 10).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].task.kind(), "research");
    assert_eq!(history[0].agent_id.as_deref(), Some("researcher"));
    assert!(history[0].handled_by.is_none());
    assert_eq!(history[0].task.conversation(), Some("c1"));
    assert!(matches!(
        history[2].outcome,
        TurnOutcome::Failed {
            kind: ErrorKind::NoAgentAvailable,
            ..
        }
    ));
    assert!(history[2].agent_id.is_none());

    runtime.send("c2", "hello").await.unwrap();
    let stats = runtime.conversations().stats().await.unwrap();
    assert_eq!((stats.conversations, stats.active, stats.turns), (2, 2, 4));
}

#[tokio::test]
async fn expired_task_is_recorded_as_timeout() {
    let model = ScriptedModel::new();
    let runtime = runtime(&model);

    let task = Task::new("general")
        .with_payload("input", "too late")
        .with_deadline(Utc::now() - TimeDelta::seconds(5));
    let reply = runtime.conversations().submit("c1", task).await.unwrap();
    assert!(reply.starts_with("Sorry"));

    let history = runtime.conversations().history("c1", 1).await.unwrap();
    assert!(matches!(
        history[0].outcome,
        TurnOutcome::Failed {
            kind: ErrorKind::Timeout,
            ..
        }
    ));
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn prior_turns_are_sent_as_context() {
    let model = ScriptedModel::new();
    let runtime = runtime(&model);

    runtime.send("c1", "first").await.unwrap();
    runtime.send("c1", "second").await.unwrap();

    assert_eq!(
        model.last_messages(),
        [
            Message::user("first"),
            Message::assistant("m1: first"),
            Message::user("second"),
        ]
    );
}

#[tokio::test]
async fn turns_of_one_conversation_run_in_sequence() {
    let model = ScriptedModel::new().latency(Duration::from_millis(10));
    let runtime = Arc::new(runtime(&model));

    let sends: Vec<_> = (0..8)
        .map(|n| {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.send("busy", &format!("message {n}")).await })
        })
        .collect();
    for send in sends {
        send.await.unwrap().unwrap();
    }

    let history = runtime.conversations().history("busy", 100).await.unwrap();
    assert_eq!(history.len(), 8);
    // Each turn saw every earlier turn, up to the window of five.
    let seen: Vec<_> = history
        .iter()
        .map(|turn| turn.task.payload()["history"].as_array().map_or(0, Vec::len))
        .collect();
    assert_eq!(seen, [0, 1, 2, 3, 4, 5, 5, 5]);
}

#[tokio::test]
async fn turn_timeout_bounds_slow_agents() {
    let model = ScriptedModel::new().latency(Duration::from_secs(5));
    let mut config = Config::default();
    config
        .providers
        .insert("main".into(), ProviderConfig::new("m1"));
    config.conversation.turn_timeout_secs = Some(1);
    let runtime = Runtime::builder(config)
        .provider("main", model.clone())
        .unwrap()
        .agent(Agent::new("slow").capability("anything"))
        .build()
        .unwrap();

    let reply = runtime.send("c1", "hello").await.unwrap();
    assert!(reply.starts_with("Sorry"));
    let history = runtime.conversations().history("c1", 1).await.unwrap();
    let TurnOutcome::Failed { kind, message } = &history[0].outcome else {
        panic!("expected a failed turn");
    };
    assert_eq!(*kind, ErrorKind::NoAgentAvailable);
    assert!(message.contains("deadline exceeded"));
}

#[tokio::test]
async fn delegated_turns_record_the_routed_agent() {
    let model = ScriptedModel::new();
    let mut config = Config::default();
    config
        .providers
        .insert("main".into(), ProviderConfig::new("m1"));
    let runtime = Runtime::builder(config)
        .provider("main", model.clone())
        .unwrap()
        .agent(
            Agent::new("front")
                .capability("anything")
                .default_strategy(Strategy::Delegate {
                    capability: "deep".into(),
                }),
        )
        .agent(Agent::new("worker").capability("deep"))
        .build()
        .unwrap();

    let task = Task::new("general")
        .require("anything")
        .with_payload("input", "think hard");
    let reply = runtime.conversations().submit("c1", task).await.unwrap();
    assert_eq!(reply, "m1: think hard");

    let history = runtime.conversations().history("c1", 1).await.unwrap();
    assert_eq!(history[0].agent_id.as_deref(), Some("front"));
    assert_eq!(history[0].handled_by.as_deref(), Some("worker"));
}

#[tokio::test]
async fn context_and_preferences_ride_along() {
    let model = ScriptedModel::new();
    let runtime = runtime(&model);
    let conversations = runtime.conversations();

    conversations
        .update_context("c1", json!({ "city": "Oslo" }).as_object().cloned().unwrap())
        .await
        .unwrap();
    conversations
        .set_preferences("c1", json!({ "tone": "brief" }).as_object().cloned().unwrap())
        .await
        .unwrap();
    runtime.send("c1", "hello").await.unwrap();

    assert_eq!(
        model.last_messages(),
        [
            Message::system(r#"Conversation context: {"city":"Oslo"}"#),
            Message::system(r#"User preferences: {"tone":"brief"}"#),
            Message::user("hello"),
        ]
    );
    let history = conversations.history("c1", 1).await.unwrap();
    let payload = history[0].task.payload();
    assert_eq!(payload["context"], json!({ "city": "Oslo" }));
    assert_eq!(payload["preferences"], json!({ "tone": "brief" }));

    // Preferences are replaced, context is merged.
    conversations
        .set_preferences("c1", json!({ "lang": "nb" }).as_object().cloned().unwrap())
        .await
        .unwrap();
    conversations
        .update_context("c1", json!({ "units": "metric" }).as_object().cloned().unwrap())
        .await
        .unwrap();
    let state = conversations.conversation("c1").await.unwrap();
    assert_eq!(state.preferences, *json!({ "lang": "nb" }).as_object().unwrap());
    assert_eq!(state.context.len(), 2);
    assert_eq!(state.turns.len(), 1);
}

#[tokio::test]
async fn ended_conversations_keep_history_and_reopen() {
    let model = ScriptedModel::new();
    let runtime = runtime(&model);
    let conversations = runtime.conversations();

    runtime.send("c1", "hello").await.unwrap();
    runtime.send("c2", "hello").await.unwrap();
    conversations.end_conversation("c1").await.unwrap();

    let stats = conversations.stats().await.unwrap();
    assert_eq!((stats.conversations, stats.active, stats.turns), (2, 1, 2));
    let ended = conversations.conversation("c1").await.unwrap();
    assert!(!ended.active);
    assert_eq!(ended.turns.len(), 1);

    runtime.send("c1", "back again").await.unwrap();
    let stats = conversations.stats().await.unwrap();
    assert_eq!((stats.active, stats.turns), (2, 3));
}

#[tokio::test]
async fn abandoned_turns_release_their_lock() {
    let model = ScriptedModel::new().latency(Duration::from_millis(200));
    let runtime = Arc::new(runtime(&model));

    // Dropped while the turn holds the lock.
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), runtime.send("c1", "slow")).await;
    assert!(abandoned.is_err());
    assert_eq!(runtime.conversations().pending(), 0);

    // Dropped while waiting behind a running turn.
    let running = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.send("c1", "first").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let waiting =
        tokio::time::timeout(Duration::from_millis(20), runtime.send("c1", "impatient")).await;
    assert!(waiting.is_err());
    assert_eq!(runtime.conversations().pending(), 1);

    running.await.unwrap().unwrap();
    assert_eq!(runtime.conversations().pending(), 0);
    let history = runtime.conversations().history("c1", 10).await.unwrap();
    let inputs: Vec<_> = history.iter().map(|turn| turn.input()).collect();
    assert_eq!(inputs, ["first"]);
}
