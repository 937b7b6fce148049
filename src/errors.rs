/// Error taxonomy shared across the ingestion engine.
///
/// Each subsystem gets its own `thiserror`-derived enum; coordinators accept
/// whichever of these their component boundary can produce rather than a
/// single blanket error type.
use thiserror::Error;

/// Errors returned by the RPC client, classified per the retry/cancellation
/// policy. See [`crate::rpc::classify`].
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transient RPC error: {0}")]
    Transient(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("RPC call timed out: {0}")]
    Timeout(String),

    #[error("RPC call canceled")]
    Canceled,

    #[error("permanent RPC error: {0}")]
    Permanent(String),
}

impl RpcError {
    /// Whether the RPC layer's own retry loop should absorb this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Transient(_) | RpcError::RateLimited(_) | RpcError::Timeout(_)
        )
    }

    /// Label for `explorer_rpc_errors_total{error_type}`.
    pub fn metric_label(&self) -> &'static str {
        match self {
            RpcError::Transient(_) => "network",
            RpcError::RateLimited(_) => "rate_limit",
            RpcError::Timeout(_) => "timeout",
            RpcError::Permanent(_) => "invalid_param",
            RpcError::Canceled => "other",
        }
    }
}

/// Errors returned by the store contract.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("store error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Errors returned by the reorg handler. Both variants are fatal to
/// live-tail.
#[derive(Debug, Error)]
pub enum ReorgError {
    #[error("reorg depth {actual} exceeds configured maximum {max}")]
    DepthExceeded { actual: u64, max: u64 },

    #[error("no fork point found within {max_depth} steps back from height {searched_from}")]
    ForkPointNotFound { searched_from: u64, max_depth: u64 },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors returned by the backfill coordinator.
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("invalid range: start {start} > end {end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("permanent error at height {height} (worker {worker_id}): {source}")]
    Permanent {
        height: u64,
        worker_id: usize,
        #[source]
        source: RpcError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("canceled")]
    Canceled,
}

/// Top-level error wrapping every subsystem error, used at orchestration
/// boundaries (`main.rs`, live-tail loop).
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reorg(#[from] ReorgError),

    #[error(transparent)]
    Backfill(#[from] BackfillError),
}
