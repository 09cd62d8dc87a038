//! How a delegated task reaches the target agent.

use crate::message::Envelope;
use ccore::{Credentials, Error, Hops, Reply, Result, Task};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::{future::Future, pin::Pin};
use tokio::sync::mpsc;

/// Progress of a delegation, reported on the request's reply channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DelegationStatus {
    /// The target was resolved and the task handed over.
    Accepted { to: CompactString },
    /// The target replied.
    Completed { reply: Reply },
    /// The delegation failed.
    Failed { reason: String },
}

/// A task on its way from one agent to another.
#[derive(Debug, Clone, Serialize)]
pub struct DelegationRequest {
    pub from: CompactString,
    #[serde(skip)]
    pub to: CompactString,
    pub task: Task,
    /// Hops including the one this request takes.
    pub hops: Hops,
    /// Where progress is reported, if the delegator asked for it.
    #[serde(skip)]
    pub reply_channel: Option<mpsc::UnboundedSender<DelegationStatus>>,
}

impl DelegationRequest {
    pub fn new(
        from: impl Into<CompactString>,
        to: impl Into<CompactString>,
        task: Task,
        hops: Hops,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            task,
            hops,
            reply_channel: None,
        }
    }

    /// Report progress on `channel`.
    pub fn with_reply_channel(mut self, channel: mpsc::UnboundedSender<DelegationStatus>) -> Self {
        self.reply_channel = Some(channel);
        self
    }

    /// Send `status` on the reply channel. A dropped receiver is ignored.
    pub fn report(&self, status: DelegationStatus) {
        if let Some(channel) = &self.reply_channel {
            let _ = channel.send(status);
        }
    }
}

/// Delivers delegation requests to one agent.
///
/// The caller never knows whether the agent is in-process or across the
/// network.
pub trait Peer: Send + Sync + 'static {
    /// Hand the task to the agent and await its reply.
    fn call(&self, request: &DelegationRequest) -> impl Future<Output = Result<Reply>> + Send;

    /// Deliver a message. Peers that only take tasks refuse.
    fn deliver(&self, envelope: &Envelope) -> impl Future<Output = Result<()>> + Send {
        let refused = Error::DelegationUnavailable {
            agent_id: envelope.to.clone(),
            reason: "agent does not accept messages".into(),
        };
        async move { Err(refused) }
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe peer wrapper for type erasure.
pub(crate) trait ErasedPeer: Send + Sync {
    fn call<'a>(&'a self, request: &'a DelegationRequest) -> BoxFuture<'a, Result<Reply>>;
    fn deliver<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<()>>;
}

impl<P: Peer> ErasedPeer for P {
    fn call<'a>(&'a self, request: &'a DelegationRequest) -> BoxFuture<'a, Result<Reply>> {
        Box::pin(Peer::call(self, request))
    }

    fn deliver<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<()>> {
        Box::pin(Peer::deliver(self, envelope))
    }
}

/// Delegates over HTTP by posting the request to `{url}/tasks`, and
/// delivers messages to `{url}/messages`.
#[derive(Debug, Clone)]
pub struct HttpPeer {
    client: reqwest::Client,
    url: String,
    auth: Credentials,
}

impl HttpPeer {
    pub fn new(client: reqwest::Client, url: impl Into<String>, auth: Credentials) -> Self {
        Self {
            client,
            url: url.into(),
            auth,
        }
    }
}

impl HttpPeer {
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.url.trim_end_matches('/'))
    }

    fn post(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(endpoint);
        match &self.auth {
            Credentials::None => builder,
            Credentials::Bearer { token } => builder.bearer_auth(token),
            Credentials::ApiKey { header, key } => builder.header(header.as_str(), key.as_str()),
        }
    }
}

impl Peer for HttpPeer {
    async fn call(&self, request: &DelegationRequest) -> Result<Reply> {
        let unavailable = |reason: String| Error::DelegationUnavailable {
            agent_id: request.to.clone(),
            reason,
        };

        let endpoint = self.endpoint("tasks");
        tracing::debug!(to = %request.to, %endpoint, "delegating over http");
        let response = self
            .post(&endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| unavailable(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("agent returned {status}")));
        }
        response
            .json::<Reply>()
            .await
            .map_err(|e| unavailable(format!("malformed reply: {e}")))
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<()> {
        let endpoint = self.endpoint("messages");
        tracing::debug!(to = %envelope.to, %endpoint, "delivering message over http");
        let unavailable = |reason: String| Error::DelegationUnavailable {
            agent_id: envelope.to.clone(),
            reason,
        };
        let response = self
            .post(&endpoint)
            .json(envelope)
            .send()
            .await
            .map_err(|e| unavailable(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("agent returned {status}")));
        }
        Ok(())
    }
}
