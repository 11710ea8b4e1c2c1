//! Per-call deadlines for outbound registry and firewall calls

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Await `call`, failing with [`Error::Timeout`] once `limit` has passed
///
/// A timed-out call is an ordinary failure to the caller; nothing is retried.
pub(crate) async fn bounded<T, F>(operation: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, limit)),
    }
}
