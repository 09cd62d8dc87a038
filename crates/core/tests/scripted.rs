//! Tests for the scripted model double.

use conduit_core::{
    GenerationConfig, Message, Model, ModelError, ToolCall, testing::ScriptedModel,
};
use serde_json::json;

#[tokio::test]
async fn queued_replies_then_echo() {
    let model = ScriptedModel::new()
        .reply("m1", "scripted")
        .fail("m1", ModelError::RateLimited);
    let config = GenerationConfig::default();
    let messages = [Message::system("be brief"), Message::user("hi")];

    assert_eq!(model.generate("m1", &messages, &config).await.unwrap(), "scripted");
    assert_eq!(
        model.generate("m1", &messages, &config).await,
        Err(ModelError::RateLimited)
    );
    assert_eq!(model.generate("m1", &messages, &config).await.unwrap(), "m1: hi");
    assert_eq!(model.calls(), ["m1", "m1", "m1"]);
    assert_eq!(model.last_messages(), messages);
}

#[tokio::test]
async fn proposals_and_outages() {
    let call = ToolCall::new("search", json!({ "query": "q" }));
    let model = ScriptedModel::new()
        .propose("m1", Some(call.clone()))
        .down("m2", ModelError::Unavailable("offline".into()));
    let config = GenerationConfig::default();
    let messages = [Message::user("search q")];

    let proposed = model.propose_tool_call("m1", &messages, &[], &config).await;
    assert_eq!(proposed, Ok(Some(call)));
    let proposed = model.propose_tool_call("m1", &messages, &[], &config).await;
    assert_eq!(proposed, Ok(None));

    assert!(model.generate("m2", &messages, &config).await.is_err());
    assert!(model.generate("m2", &messages, &config).await.is_err());
}
