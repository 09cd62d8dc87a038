//! Conversation manager and history store.
//!
//! Each user message becomes one routed task and one recorded turn. Turns
//! of the same conversation run one at a time; different conversations
//! run concurrently.

use crate::router::Router;
use ccore::{
    Classifier, ConversationState, Error, Task, Turn, TurnOutcome,
    config::ConversationConfig,
};
use compact_str::CompactString;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

/// Addressable storage for conversation history.
///
/// Implementations must keep turns in append order.
pub trait ConversationStore: Send + Sync + 'static {
    /// The conversation, empty if it does not exist yet.
    fn load(&self, id: &str) -> impl Future<Output = anyhow::Result<ConversationState>> + Send;

    /// Append a turn, creating the conversation on first use.
    fn append(&self, id: &str, turn: Turn) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Apply `update` to the conversation, creating it on first use.
    /// Turns must not be removed or reordered.
    fn update(
        &self,
        id: &str,
        update: impl FnOnce(&mut ConversationState) + Send,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Conversation and turn totals.
    fn stats(&self) -> impl Future<Output = anyhow::Result<ConversationStats>> + Send;
}

/// Totals across every stored conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConversationStats {
    pub conversations: usize,
    /// Conversations that have not been ended.
    pub active: usize,
    pub turns: usize,
}

/// Process-local [`ConversationStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    conversations: RwLock<BTreeMap<CompactString, ConversationState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for InMemoryStore {
    async fn load(&self, id: &str) -> anyhow::Result<ConversationState> {
        Ok(self
            .conversations
            .read()
            .get(id)
            .cloned()
            .unwrap_or_else(|| ConversationState::new(id)))
    }

    async fn append(&self, id: &str, turn: Turn) -> anyhow::Result<()> {
        self.conversations
            .write()
            .entry(id.into())
            .or_insert_with(|| ConversationState::new(id))
            .turns
            .push(turn);
        Ok(())
    }

    async fn update(
        &self,
        id: &str,
        update: impl FnOnce(&mut ConversationState) + Send,
    ) -> anyhow::Result<()> {
        let mut conversations = self.conversations.write();
        update(
            conversations
                .entry(id.into())
                .or_insert_with(|| ConversationState::new(id)),
        );
        Ok(())
    }

    async fn stats(&self) -> anyhow::Result<ConversationStats> {
        let conversations = self.conversations.read();
        Ok(ConversationStats {
            conversations: conversations.len(),
            active: conversations.values().filter(|c| c.active).count(),
            turns: conversations.values().map(|c| c.turns.len()).sum(),
        })
    }
}

/// Turns user input into routed tasks and records every turn.
pub struct ConversationManager<S: ConversationStore = InMemoryStore> {
    router: Arc<Router>,
    classifier: Arc<dyn Classifier>,
    store: S,
    history_window: usize,
    turn_timeout: Option<Duration>,
    locks: Locks,
}

impl<S: ConversationStore> ConversationManager<S> {
    pub fn new(
        router: Arc<Router>,
        classifier: Arc<dyn Classifier>,
        store: S,
        config: &ConversationConfig,
    ) -> Self {
        Self {
            router,
            classifier,
            store,
            history_window: config.history_window,
            turn_timeout: config.turn_timeout_secs.map(Duration::from_secs),
            locks: Mutex::new(BTreeMap::new()),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Classify `input`, route it, record the turn, and return the reply
    /// text. Routing failures come back as a user-facing message; only a
    /// store failure is an error.
    pub async fn send(&self, conversation: &str, input: &str) -> anyhow::Result<String> {
        let classification = self.classifier.classify(input);
        let mut task = Task::new(classification.kind)
            .require_all(classification.capabilities)
            .with_payload("input", input);
        if let Some(timeout) = self.turn_timeout {
            task = task.with_timeout(timeout);
        }
        self.submit(conversation, task).await
    }

    /// Route an already built task as the next turn of `conversation`.
    pub async fn submit(&self, conversation: &str, task: Task) -> anyhow::Result<String> {
        let slot = self.lock(conversation);
        let _guard = slot.lock.lock().await;
        self.turn(conversation, task).await
    }

    /// Merge `updates` into the conversation context. The context is sent
    /// with every later task under `context`.
    pub async fn update_context(
        &self,
        conversation: &str,
        updates: Map<String, Value>,
    ) -> anyhow::Result<()> {
        tracing::debug!(conversation, keys = updates.len(), "context updated");
        self.store
            .update(conversation, |state| state.update_context(updates))
            .await
    }

    /// Replace the conversation's preferences. They are sent with every
    /// later task under `preferences`.
    pub async fn set_preferences(
        &self,
        conversation: &str,
        preferences: Map<String, Value>,
    ) -> anyhow::Result<()> {
        self.store
            .update(conversation, |state| state.preferences = preferences)
            .await
    }

    /// Mark the conversation ended. Its history is kept; a later message
    /// reopens it.
    pub async fn end_conversation(&self, conversation: &str) -> anyhow::Result<()> {
        tracing::info!(conversation, "conversation ended");
        self.store
            .update(conversation, |state| state.active = false)
            .await
    }

    /// The stored conversation, empty if it does not exist yet.
    pub async fn conversation(&self, conversation: &str) -> anyhow::Result<ConversationState> {
        self.store.load(conversation).await
    }

    /// The last `limit` turns, oldest first.
    pub async fn history(&self, conversation: &str, limit: usize) -> anyhow::Result<Vec<Turn>> {
        let state = self.store.load(conversation).await?;
        Ok(state.recent(limit).to_vec())
    }

    /// Totals from the store.
    pub async fn stats(&self) -> anyhow::Result<ConversationStats> {
        self.store.stats().await
    }

    async fn turn(&self, conversation: &str, task: Task) -> anyhow::Result<String> {
        let state = self.store.load(conversation).await?;
        if !state.active {
            self.store
                .update(conversation, |state| state.active = true)
                .await?;
        }
        let task = task
            .in_conversation(conversation)
            .with_payload("history", context(&state, self.history_window))
            .with_payload("context", Value::Object(state.context))
            .with_payload("preferences", Value::Object(state.preferences));

        let turn = match self.router.dispatch(task.clone()).await {
            Ok(dispatch) => Turn::completed(dispatch.task, dispatch.agent_id, &dispatch.reply),
            Err(e) => {
                tracing::warn!(conversation, task = %task.id(), "turn failed: {e}");
                let agent_id = match &e {
                    Error::NoAgentAvailable { failures, .. } => {
                        failures.last().map(|f| f.agent_id.clone())
                    }
                    _ => None,
                };
                Turn::failed(task, agent_id, &e)
            }
        };

        let reply = render(&turn.outcome);
        tracing::debug!(conversation, agent = ?turn.agent_id, completed = turn.outcome.is_completed(), "turn recorded");
        self.store.append(conversation, turn).await?;
        Ok(reply)
    }

    fn lock<'a>(&'a self, conversation: &'a str) -> TurnSlot<'a> {
        let lock = self
            .locks
            .lock()
            .entry(conversation.into())
            .or_default()
            .clone();
        TurnSlot {
            locks: &self.locks,
            conversation,
            lock,
        }
    }

    /// Conversations with a turn running or waiting.
    pub fn pending(&self) -> usize {
        self.locks.lock().len()
    }
}

type Locks = Mutex<BTreeMap<CompactString, Arc<tokio::sync::Mutex<()>>>>;

/// A claim on a conversation's turn lock. Dropping it removes the lock
/// entry once nobody else holds it, also when the turn future is dropped
/// while waiting.
struct TurnSlot<'a> {
    locks: &'a Locks,
    conversation: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for TurnSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // One reference in the map, one held here.
        if Arc::strong_count(&self.lock) <= 2 {
            locks.remove(self.conversation);
        }
    }
}

/// Prior turns attached to the task payload.
fn context(state: &ConversationState, window: usize) -> Value {
    state
        .recent(window)
        .iter()
        .map(|turn| match &turn.outcome {
            TurnOutcome::Completed { text } => json!({ "input": turn.input(), "reply": text }),
            TurnOutcome::Failed { .. } => json!({ "input": turn.input() }),
        })
        .collect()
}

fn render(outcome: &TurnOutcome) -> String {
    match outcome {
        TurnOutcome::Completed { text } => text.clone(),
        TurnOutcome::Failed { message, .. } => {
            format!("Sorry, I could not complete that request: {message}")
        }
    }
}

impl<S: ConversationStore> std::fmt::Debug for ConversationManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationManager")
            .field("history_window", &self.history_window)
            .field("turn_timeout", &self.turn_timeout)
            .finish()
    }
}
