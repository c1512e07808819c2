use thiserror::Error;

/// Main error type for the arbitrage engine
#[derive(Error, Debug)]
pub enum ArbError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Venue transport errors (retryable)
    #[error("Exchange error on {exchange}: {message}")]
    Exchange { exchange: String, message: String },

    #[error("Rate limited on {0}")]
    RateLimited(String),

    // Benign venue responses
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Not modified: {0}")]
    NotModified(String),

    // Component-fatal errors
    #[error("Insufficient funds on {exchange}: need {required}, have {available}")]
    InsufficientFunds {
        exchange: String,
        required: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    #[error("Retry budget exhausted for {operation} after {attempts} attempts")]
    RetryExhausted { operation: String, attempts: u32 },

    #[error("Reconciliation failed for {leg} leg on {exchange} at {stage} (id: {id})")]
    ReconciliationFailed {
        leg: String,
        exchange: String,
        id: String,
        stage: String,
    },

    #[error("Protective orders failed for {leg} leg on {exchange}: {reason}")]
    ProtectionFailed {
        leg: String,
        exchange: String,
        reason: String,
    },

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Data errors
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ArbError {
    pub fn exchange(exchange: impl Into<String>, message: impl Into<String>) -> Self {
        ArbError::Exchange {
            exchange: exchange.into(),
            message: message.into(),
        }
    }

    /// Network and rate-limit failures that the issuing call site may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ArbError::Exchange { .. } | ArbError::RateLimited(_))
    }

    /// Venue responses that mean "already done" and are treated as success.
    pub fn is_benign(&self) -> bool {
        matches!(self, ArbError::OrderNotFound(_) | ArbError::NotModified(_))
    }
}

/// Result type alias for ArbError
pub type Result<T> = std::result::Result<T, ArbError>;

/// Normalize benign venue responses (order already gone, setting unchanged) to success.
pub fn ignore_benign(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_benign() => {
            tracing::debug!(error = %e, "ignoring benign exchange response");
            Ok(())
        }
        other => other,
    }
}
