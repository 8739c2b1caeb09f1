//! Routing Error Types

use thiserror::Error;

use super::adapters::{LedgerError, SignerError};

/// Routing error types
///
/// `code()` strings are stable and returned to API callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    // === Input ===
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Route not found: {0}")]
    NotFound(String),

    // === Concurrency ===
    #[error("Concurrent update conflict on route {0} (retries exhausted)")]
    ConcurrencyConflict(String),

    /// Raised inside a mutation when another caller holds the in-flight lease.
    #[error("In-flight lease held for action {0}")]
    LeaseHeld(String),

    // === Upstream ===
    #[error("Signing service error: {0}")]
    UpstreamSigning(String),

    #[error("Ledger RPC error: {0}")]
    UpstreamLedger(String),

    // === System ===
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoutingError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            RoutingError::Validation(_) => "VALIDATION_ERROR",
            RoutingError::Configuration(_) => "CONFIGURATION_ERROR",
            RoutingError::NotFound(_) => "NOT_FOUND",
            RoutingError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            RoutingError::LeaseHeld(_) => "LEASE_HELD",
            RoutingError::UpstreamSigning(_) => "UPSTREAM_SIGNING_ERROR",
            RoutingError::UpstreamLedger(_) => "UPSTREAM_LEDGER_ERROR",
            RoutingError::Storage(_) => "STORAGE_ERROR",
            RoutingError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            RoutingError::Validation(_) => 400,
            RoutingError::NotFound(_) => 404,
            RoutingError::ConcurrencyConflict(_) | RoutingError::LeaseHeld(_) => 409,
            RoutingError::UpstreamSigning(_) | RoutingError::UpstreamLedger(_) => 502,
            RoutingError::Storage(_) => 503,
            RoutingError::Configuration(_) | RoutingError::Internal(_) => 500,
        }
    }

    /// Whether this error is an outcome of the plan's own work.
    ///
    /// Only these move a plan to `failed`; contention and storage outages
    /// leave the plan untouched so a later step can retry.
    pub fn fails_plan(&self) -> bool {
        !matches!(
            self,
            RoutingError::ConcurrencyConflict(_)
                | RoutingError::LeaseHeld(_)
                | RoutingError::Storage(_)
                | RoutingError::NotFound(_)
        )
    }
}

impl From<sqlx::Error> for RoutingError {
    fn from(e: sqlx::Error) -> Self {
        RoutingError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for RoutingError {
    fn from(e: serde_json::Error) -> Self {
        RoutingError::Internal(format!("serialization: {}", e))
    }
}

impl From<SignerError> for RoutingError {
    fn from(e: SignerError) -> Self {
        RoutingError::UpstreamSigning(e.to_string())
    }
}

impl From<LedgerError> for RoutingError {
    fn from(e: LedgerError) -> Self {
        RoutingError::UpstreamLedger(e.to_string())
    }
}
