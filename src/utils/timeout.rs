//! Caller-supplied deadlines for suspending calls

use std::future::Future;
use std::time::Duration;

use crate::error::ChefBoostError;

/// A deadline passed before the call finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub operation: String,
    pub timeout_ms: u64,
}

impl From<Expired> for ChefBoostError {
    fn from(e: Expired) -> Self {
        ChefBoostError::Timeout {
            operation: e.operation,
            timeout_ms: e.timeout_ms,
        }
    }
}

/// Await `fut` for at most `limit`. Expiry is converted into the caller's
/// own error type.
pub async fn bounded<T, E, F>(operation: &str, limit: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<Expired>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Expired {
            operation: operation.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }
        .into()),
    }
}
