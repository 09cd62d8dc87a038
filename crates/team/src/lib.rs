//! Agent teams for Conduit.
//!
//! The [`Directory`] indexes agents by capability with a liveness TTL. The
//! [`DelegationClient`] hands tasks to agents by id, enforcing the hop
//! limit and the task deadline, through a [`Peer`]: in-process, or
//! [`HttpPeer`] for remote agents. It also carries direct messages and
//! status updates as [`Envelope`]s.

pub use {
    delegation::DelegationClient,
    directory::Directory,
    message::{Envelope, MessageBody},
    peer::{DelegationRequest, DelegationStatus, HttpPeer, Peer},
};

mod delegation;
mod directory;
mod message;
mod peer;
