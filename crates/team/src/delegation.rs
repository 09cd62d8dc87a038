//! Delegation client: hand a task to another agent by id.

use crate::{
    directory::Directory,
    message::{Envelope, MessageBody},
    peer::{DelegationRequest, DelegationStatus, ErasedPeer, HttpPeer, Peer},
};
use ccore::{AgentDescriptor, Endpoint, Error, Hops, Reply, Result, Task, within};
use compact_str::CompactString;
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::sync::mpsc;

/// Delivers tasks to agents found in the [`Directory`].
///
/// In-process agents are reached through peers bound with
/// [`DelegationClient::bind`]; HTTP agents through their descriptor's
/// endpoint and credentials.
///
/// The client also carries messages: direct messages, and status updates
/// fanned out to subscribers. Messages for an agent with an open inbox
/// are queued there.
pub struct DelegationClient {
    directory: Arc<Directory>,
    peers: RwLock<BTreeMap<CompactString, Arc<dyn ErasedPeer>>>,
    inboxes: RwLock<BTreeMap<CompactString, mpsc::UnboundedSender<Envelope>>>,
    /// Publisher to the agents subscribed to its status.
    subscribers: RwLock<BTreeMap<CompactString, BTreeSet<CompactString>>>,
    http: reqwest::Client,
}

impl DelegationClient {
    pub fn new(directory: Arc<Directory>) -> Self {
        Self {
            directory,
            peers: RwLock::new(BTreeMap::new()),
            inboxes: RwLock::new(BTreeMap::new()),
            subscribers: RwLock::new(BTreeMap::new()),
            http: reqwest::Client::new(),
        }
    }

    /// The directory targets are resolved in.
    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    /// Route delegations for `agent_id` through `peer`, overriding the
    /// descriptor's endpoint.
    pub fn bind<P: Peer>(&self, agent_id: impl Into<CompactString>, peer: P) {
        self.peers.write().insert(agent_id.into(), Arc::new(peer));
    }

    /// Remove a bound peer.
    pub fn unbind(&self, agent_id: &str) -> bool {
        self.peers.write().remove(agent_id).is_some()
    }

    /// Delegate `task` from `from` to `to`, counting one hop.
    ///
    /// Fails with [`Error::DelegationLimit`] when `hops` is exhausted and
    /// with [`Error::DelegationUnavailable`] when `to` is unknown, expired,
    /// or unreachable.
    pub async fn delegate(&self, from: &str, to: &str, task: Task, hops: Hops) -> Result<Reply> {
        let hops = hops.next()?;
        self.send(from, to, task, hops).await
    }

    /// Hand `task` to `to` without counting a hop. Used when the router
    /// dispatches to a candidate, which is not an agent-to-agent
    /// delegation.
    pub async fn forward(&self, from: &str, to: &str, task: Task, hops: Hops) -> Result<Reply> {
        self.send(from, to, task, hops).await
    }

    /// Like [`DelegationClient::delegate`], reporting progress on `status`.
    /// The channel travels on the request, so the target may report too.
    /// A dropped receiver does not affect the delegation.
    pub async fn delegate_with_status(
        &self,
        from: &str,
        to: &str,
        task: Task,
        hops: Hops,
        status: mpsc::UnboundedSender<DelegationStatus>,
    ) -> Result<Reply> {
        let prepared = hops.next().and_then(|hops| Ok((hops, self.resolve(to)?)));
        let (hops, peer) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = status.send(DelegationStatus::Failed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        let request = DelegationRequest::new(from, to, task, hops).with_reply_channel(status);
        self.call(peer, request).await
    }

    /// Delegate `task` to every live agent offering `capability`, except
    /// `from`. Results are in directory order.
    pub async fn broadcast(
        &self,
        from: &str,
        capability: &str,
        task: Task,
        hops: Hops,
    ) -> Vec<(CompactString, Result<Reply>)> {
        let targets: Vec<_> = self
            .directory
            .find_by_capability(capability)
            .into_iter()
            .map(|descriptor| descriptor.agent_id)
            .filter(|id| id != from)
            .collect();

        join_all(targets.into_iter().map(|to| {
            let task = task.retry();
            async move {
                let reply = self.delegate(from, &to, task, hops).await;
                (to, reply)
            }
        }))
        .await
    }

    /// Send a text message from `from` to `to`.
    ///
    /// Fails with [`Error::DelegationUnavailable`] when `to` is unknown,
    /// expired, or cannot take messages.
    pub async fn send_direct_message(
        &self,
        from: &str,
        to: &str,
        content: impl Into<String>,
    ) -> Result<Envelope> {
        let envelope = Envelope::new(
            from,
            to,
            MessageBody::Direct {
                content: content.into(),
            },
        );
        self.deliver(&envelope).await?;
        Ok(envelope)
    }

    /// Have `subscriber` receive the status updates `publisher` broadcasts.
    pub fn subscribe_to_status(&self, subscriber: &str, publisher: &str) {
        tracing::debug!(subscriber, publisher, "subscribed to status");
        self.subscribers
            .write()
            .entry(publisher.into())
            .or_default()
            .insert(subscriber.into());
    }

    /// Stop a subscription. Returns whether it existed.
    pub fn unsubscribe_from_status(&self, subscriber: &str, publisher: &str) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(set) = subscribers.get_mut(publisher) else {
            return false;
        };
        let removed = set.remove(subscriber);
        if set.is_empty() {
            subscribers.remove(publisher);
        }
        removed
    }

    /// Agents subscribed to `publisher`, by id.
    pub fn subscribers(&self, publisher: &str) -> Vec<CompactString> {
        self.subscribers
            .read()
            .get(publisher)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Send `status` from `from` to each of its subscribers. A failed
    /// delivery is logged and reported, and does not stop the others.
    pub async fn broadcast_status(
        &self,
        from: &str,
        status: Value,
    ) -> Vec<(CompactString, Result<()>)> {
        let targets = self.subscribers(from);
        join_all(targets.into_iter().map(|to| {
            let envelope = Envelope::new(
                from,
                to.clone(),
                MessageBody::Status {
                    status: status.clone(),
                },
            );
            async move {
                let delivered = self.deliver(&envelope).await;
                if let Err(e) = &delivered {
                    tracing::warn!(from, to = %to, "status update not delivered: {e}");
                }
                (to, delivered)
            }
        }))
        .await
    }

    /// Open the inbox of an in-process agent. Messages for it are queued
    /// on the returned receiver; opening again replaces the inbox.
    pub fn open_inbox(&self, agent_id: impl Into<CompactString>) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.write().insert(agent_id.into(), tx);
        rx
    }

    /// Close an inbox. Returns whether it was open.
    pub fn close_inbox(&self, agent_id: &str) -> bool {
        self.inboxes.write().remove(agent_id).is_some()
    }

    /// Accept a message that arrived from outside, such as one posted to
    /// this process over HTTP, and queue it in the target's inbox.
    pub fn handle_incoming(&self, envelope: Envelope) -> Result<()> {
        tracing::debug!(
            from = %envelope.from,
            to = %envelope.to,
            status = envelope.is_status(),
            "incoming message"
        );
        let to = envelope.to.clone();
        let inbox = self
            .inboxes
            .read()
            .get(&to)
            .cloned()
            .ok_or_else(|| Error::DelegationUnavailable {
                agent_id: to.clone(),
                reason: "no open inbox".into(),
            })?;
        inbox.send(envelope).map_err(|_| Error::DelegationUnavailable {
            agent_id: to.clone(),
            reason: "inbox closed".into(),
        })?;
        Ok(())
    }

    /// Route a message: an open inbox first, then the target's peer.
    async fn deliver(&self, envelope: &Envelope) -> Result<()> {
        let to = envelope.to.as_str();
        let has_inbox = self.inboxes.read().contains_key(to);
        if has_inbox {
            self.live_descriptor(to)?;
            return self.handle_incoming(envelope.clone());
        }
        let peer = self.resolve(to)?;
        peer.deliver(envelope).await
    }

    async fn send(&self, from: &str, to: &str, task: Task, hops: Hops) -> Result<Reply> {
        let peer = self.resolve(to)?;
        self.call(peer, DelegationRequest::new(from, to, task, hops))
            .await
    }

    async fn call(&self, peer: Arc<dyn ErasedPeer>, request: DelegationRequest) -> Result<Reply> {
        tracing::debug!(
            from = %request.from,
            to = %request.to,
            task = %request.task.id(),
            hops = request.hops.count,
            "delegating"
        );
        request.report(DelegationStatus::Accepted {
            to: request.to.clone(),
        });
        let outcome = within(request.task.deadline(), "delegation", peer.call(&request)).await;
        request.report(match &outcome {
            Ok(reply) => DelegationStatus::Completed {
                reply: reply.clone(),
            },
            Err(e) => DelegationStatus::Failed {
                reason: e.to_string(),
            },
        });
        outcome
    }

    fn live_descriptor(&self, to: &str) -> Result<AgentDescriptor> {
        let unavailable = |reason: &str| Error::DelegationUnavailable {
            agent_id: to.into(),
            reason: reason.into(),
        };
        let descriptor = self
            .directory
            .get(to)
            .ok_or_else(|| unavailable("not registered"))?;
        if !self.directory.is_live(to) {
            return Err(unavailable("registration expired"));
        }
        Ok(descriptor)
    }

    fn resolve(&self, to: &str) -> Result<Arc<dyn ErasedPeer>> {
        let descriptor = self.live_descriptor(to)?;
        if let Some(peer) = self.peers.read().get(to).cloned() {
            return Ok(peer);
        }
        match descriptor.endpoint {
            Endpoint::Local => Err(Error::DelegationUnavailable {
                agent_id: to.into(),
                reason: "no in-process handle".into(),
            }),
            Endpoint::Http { url } => Ok(Arc::new(HttpPeer::new(
                self.http.clone(),
                url,
                descriptor.auth,
            ))),
        }
    }
}

impl std::fmt::Debug for DelegationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationClient")
            .field("directory", &self.directory)
            .field("peers", &self.peers.read().keys().collect::<Vec<_>>())
            .field("inboxes", &self.inboxes.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
