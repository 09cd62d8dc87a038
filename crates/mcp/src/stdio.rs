//! Stdio transport: a spawned child process speaking MCP on stdin/stdout.

use crate::{client::ClientConnection, transport::Transport};
use anyhow::{Context, Result};
use ccore::config::ServerConfig;
use rmcp::{ServiceExt, transport::TokioChildProcess};
use std::collections::BTreeMap;
use tokio::process::Command;

/// Spawns the configured command on connect.
#[derive(Debug, Clone)]
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl StdioTransport {
    /// A transport spawning `command` with `args`.
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
        }
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Build from a `[[servers]]` entry.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let command = config
            .command
            .clone()
            .with_context(|| format!("server '{}' has no command", config.name))?;
        Ok(Self {
            command,
            args: config.args.clone(),
            env: config.env.clone(),
        })
    }
}

impl Transport for StdioTransport {
    type Connection = ClientConnection;

    async fn connect(&self) -> Result<ClientConnection> {
        let mut command = Command::new(&self.command);
        command.args(&self.args).envs(&self.env).kill_on_drop(true);
        let child = TokioChildProcess::new(command)
            .with_context(|| format!("failed to spawn '{}'", self.command))?;
        let service = ()
            .serve(child)
            .await
            .with_context(|| format!("'{}' failed the MCP handshake", self.command))?;
        tracing::debug!(command = %self.command, "stdio server connected");
        Ok(ClientConnection::new(service))
    }
}
