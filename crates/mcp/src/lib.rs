//! Protocol gateway for Conduit.
//!
//! [`ProtocolGateway`] gives agents one way to call tools and read
//! resources, whatever the backend speaks. Backends are reached through a
//! [`Transport`]: a spawned child over stdio or an HTTP endpoint, both
//! driven by the `rmcp` client, or the in-process tool and resource
//! registries.

pub use {
    backoff::Backoff,
    client::{ClientConnection, convert_tool},
    gateway::ProtocolGateway,
    http::HttpTransport,
    local::{LocalConnection, LocalTransport},
    stdio::StdioTransport,
    transport::{Connection, RequestError, Transport},
};

mod backoff;
mod client;
mod gateway;
mod http;
mod local;
mod stdio;
mod transport;
