//! Provider gateway for Conduit.
//!
//! Named providers wrap a [`ccore::Model`] adapter with an ordered chain of
//! models. Requests walk the chain on retryable failures (timeout, rate
//! limit, unavailable) and stop at the first non-retryable one.

pub use gateway::{Fallback, Generation, ProviderGateway};

mod erased;
mod gateway;
