//! Streamable HTTP transport.
//!
//! Configured headers ride on the underlying `reqwest` client, so they are
//! sent with the handshake and every later request.

use crate::{client::ClientConnection, transport::Transport};
use anyhow::{Context, Result};
use ccore::config::ServerConfig;
use reqwest::{
    Client,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use rmcp::{
    ServiceExt,
    transport::{
        StreamableHttpClientTransport,
        streamable_http_client::StreamableHttpClientTransportConfig,
    },
};

/// Connects to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    url: String,
    headers: HeaderMap,
}

impl HttpTransport {
    /// A transport posting to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Add a header sent with every request.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name '{name}'"))?;
        let value = HeaderValue::from_str(value).context("invalid header value")?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Build from a `[[servers]]` entry.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .with_context(|| format!("server '{}' has no url", config.name))?;
        config
            .headers
            .iter()
            .try_fold(Self::new(url), |transport, (name, value)| {
                transport.header(name, value)
            })
    }
}

impl Transport for HttpTransport {
    type Connection = ClientConnection;

    async fn connect(&self) -> Result<ClientConnection> {
        let client = Client::builder()
            .default_headers(self.headers.clone())
            .build()
            .context("failed to build http client")?;
        let transport = StreamableHttpClientTransport::with_client(
            client,
            StreamableHttpClientTransportConfig::with_uri(self.url.clone()),
        );
        let service = ()
            .serve(transport)
            .await
            .with_context(|| format!("'{}' failed the MCP handshake", self.url))?;
        tracing::debug!(url = %self.url, "http server connected");
        Ok(ClientConnection::new(service))
    }
}
