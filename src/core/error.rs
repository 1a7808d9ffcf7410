use thiserror::Error;

/// Core error types for nsgard
///
/// Every variant that reports a failed external operation carries the raw
/// iptables diagnostics plus enough context (namespace, chain, operation)
/// to locate the failing step without re-running anything.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Target process or namespace could not be resolved
    #[error("identity resolution failed for {target}: {message}")]
    IdentityResolution { target: String, message: String },

    /// Chain direction outside the supported set (caller bug, not retryable)
    #[error("unknown chain direction {0:?}")]
    InvalidDirection(String),

    /// Input validation failed before any external command ran
    #[error("validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Listing a chain's rules failed for a reason other than not-found
    #[error("rule listing failed for chain {chain} in {namespace}: {stderr}")]
    ChainQuery {
        namespace: String,
        chain: String,
        stderr: String,
    },

    /// Chain does not exist in the target namespace
    ///
    /// Used internally to distinguish "create" from "recreate"; reconciliation
    /// never surfaces this as a terminal error.
    #[error("chain {chain} not found in {namespace}")]
    ChainNotFound { namespace: String, chain: String },

    /// A create/flush/append command failed for a reason other than the
    /// recognized already-exists diagnostic
    #[error("iptables {operation} failed for chain {chain} in {namespace}: {stderr}")]
    Mutation {
        namespace: String,
        chain: String,
        operation: &'static str,
        stderr: String,
        exit_code: Option<i32>,
    },
}

impl Error {
    /// True when the error means the queried chain simply does not exist yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ChainNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
