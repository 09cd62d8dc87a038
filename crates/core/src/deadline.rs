//! Deadline enforcement at suspension points.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::future::Future;

/// Await `fut` unless `deadline` elapses first.
///
/// An already-passed deadline fails without polling `fut`. `stage` names
/// the suspension point in the resulting [`Error::Timeout`].
pub async fn within<T, F>(deadline: Option<DateTime<Utc>>, stage: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let Some(deadline) = deadline else {
        return fut.await;
    };

    let remaining = match (deadline - Utc::now()).to_std() {
        Ok(remaining) if !remaining.is_zero() => remaining,
        _ => return Err(Error::Timeout { stage }),
    };

    tokio::time::timeout(remaining, fut)
        .await
        .unwrap_or(Err(Error::Timeout { stage }))
}
