//! Error types for the execution engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the execution engine
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    // Transient provider errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    // Listener errors
    #[error("Listener connection failed: {0}")]
    ListenerConnection(String),

    // Routing and execution errors
    #[error("No route available: {input} -> {output}")]
    RouteUnavailable { input: String, output: String },

    #[error("Price impact {impact_pct:.2}% exceeds ceiling {max_pct:.2}%")]
    PriceImpactExceeded { impact_pct: f64, max_pct: f64 },

    #[error("Swap execution failed: {0}")]
    ExecutionFailure(String),

    #[error("Transaction build failed: {0}")]
    TransactionBuild(String),

    #[error("Transaction send failed: {0}")]
    TransactionSend(String),

    // Gate rejections
    #[error("Security rejection: {0}")]
    SecurityRejection(String),

    #[error("Health rejection: {0}")]
    HealthRejection(String),

    // Position and lifecycle errors
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Invalid lifecycle transition for {mint}: {from} -> {to}")]
    InvalidTransition {
        mint: String,
        from: String,
        to: String,
    },

    #[error("Persistence failed: {0}")]
    Persistence(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    ///
    /// Swap submission is deliberately absent: a failed send may still land,
    /// so it is never retried blindly.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc(_) | Error::RpcTimeout(_) | Error::RateLimited(_)
        )
    }

    /// Check if this error means "no usable route" rather than a provider fault
    pub fn is_route_failure(&self) -> bool {
        matches!(
            self,
            Error::RouteUnavailable { .. } | Error::PriceImpactExceeded { .. }
        )
    }

    /// Check if this error came from a gate rejection
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::SecurityRejection(_) | Error::HealthRejection(_)
        )
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::RpcTimeout(0)
        } else if e.status().map(|s| s.as_u16() == 429).unwrap_or(false) {
            Error::RateLimited(e.to_string())
        } else {
            Error::Rpc(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(Error::Rpc("boom".into()).is_retryable());
        assert!(Error::RpcTimeout(500).is_retryable());
        assert!(Error::RateLimited("429".into()).is_retryable());
    }

    #[test]
    fn test_execution_and_rejections_not_retryable() {
        assert!(!Error::ExecutionFailure("reverted".into()).is_retryable());
        assert!(!Error::TransactionSend("dropped".into()).is_retryable());
        assert!(!Error::SecurityRejection("mint authority".into()).is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_route_failure_classification() {
        let err = Error::RouteUnavailable {
            input: "SOL".into(),
            output: "TOKEN".into(),
        };
        assert!(err.is_route_failure());
        assert!(!err.is_retryable());
        assert!(Error::PriceImpactExceeded {
            impact_pct: 20.0,
            max_pct: 15.0
        }
        .is_route_failure());
    }

    #[test]
    fn test_retries_exhausted_message() {
        let err = Error::RetriesExhausted {
            operation: "get_quote".into(),
            attempts: 3,
            last_error: "RPC timeout after 100ms".into(),
        };
        assert_eq!(
            err.to_string(),
            "get_quote failed after 3 attempts: RPC timeout after 100ms"
        );
    }
}
