// Engine error kinds.
//
// The store layer speaks anyhow (see db/), the engine speaks these typed
// kinds so callers can tell a bad request from a transient failure. Only
// Unauthorized, InvalidInput, NotFound, RetriesExhausted and Store ever
// reach a caller; the rest are absorbed inside the engine.

use thiserror::Error;

/// Result alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Missing or invalid bearer credential. No mutation has happened.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Missing or out-of-range input. No mutation has happened.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A referenced row (match, profile) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The place resolution service failed or timed out.
    /// Always recovered locally by degrading to the `general` bucket.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A compare-and-swap write lost a race. Retried internally.
    #[error("Write conflict on {0}")]
    ConflictRetryable(String),

    /// Retries for a contended row ran out.
    #[error("Gave up after {attempts} attempts: {what}")]
    RetriesExhausted { what: String, attempts: u32 },

    /// An invariant that should be impossible to break was broken.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    /// Storage failure.
    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether the operation may succeed if simply tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConflictRetryable(_))
    }
}

/// Run `op` until it stops reporting a write conflict, at most `max_attempts` times.
pub async fn with_retry<T, F, Fut>(what: &str, max_attempts: u32, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = EngineResult<T>>,
{
    let attempts = max_attempts.max(1);
    for attempt in 1..=attempts {
        match op().await {
            Err(e) if e.is_retryable() => {
                tracing::debug!(what, attempt, "Write conflict, retrying");
                tokio::task::yield_now().await;
            }
            other => return other,
        }
    }
    tracing::warn!(what, attempts, "Retries exhausted");
    Err(EngineError::RetriesExhausted {
        what: what.to_string(),
        attempts,
    })
}
