//! Error types and result handling for dripq.
//!
//! This module defines the core error type [`Error`] used throughout the crate,
//! the [`Result`] alias for fallible operations, and the error taxonomy
//! ([`Category`], [`Severity`]) that structured logs and metrics key off.
//!
//! ## What
//!
//! - [`Error`] enumerates all error cases: database, broker, configuration,
//!   validation, provider and internal failures.
//! - Every variant maps to a stable `code`, a [`Category`] and a [`Severity`]
//!   so that log lines and counters stay consistent across the three
//!   pipeline processes.
//!
//! ## How
//!
//! Most crate APIs return [`Result<T>`]. Use [`Error::code`],
//! [`Error::category`] and [`Error::severity`] when emitting structured logs.
use thiserror::Error;

/// Result type for dripq operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error type for heterogeneous error sources
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse error classification used in structured logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Validation,
    Database,
    Network,
    ExternalService,
    Configuration,
    System,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Validation => write!(f, "validation"),
            Category::Database => write!(f, "database"),
            Category::Network => write!(f, "network"),
            Category::ExternalService => write!(f, "external_service"),
            Category::Configuration => write!(f, "configuration"),
            Category::System => write!(f, "system"),
        }
    }
}

/// Default severity attached to each error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Error types for dripq operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (SQLx errors)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// SQL query failed
    #[error("Database query failed: {query}. Context: {context}. Source: {source}")]
    QueryFailed {
        source: BoxError,
        query: String,
        context: String,
    },

    /// Database transaction operation failed
    #[error("Database transaction failed: {source}. Context: {context}")]
    TransactionFailed { source: BoxError, context: String },

    /// JSON serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker publish/consume/channel failure
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// Required configuration field is missing
    #[error("Missing required configuration: {field}")]
    MissingConfig { field: String },

    /// Configuration field has an invalid value
    #[error("Invalid configuration value for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    /// Broker message payload has invalid format or structure
    #[error("Invalid message format: {message}")]
    InvalidMessage { message: String },

    /// Lead failed a hard eligibility check before send
    #[error("Lead not eligible for send: {reason}")]
    LeadNotEligible { reason: String },

    /// A sequence step has no templates attached
    #[error("Step '{step_id}' has no templates attached")]
    TemplateMissing { step_id: String },

    /// An outbox row with this idempotency key already exists.
    ///
    /// This is the expected duplicate path, not a fault: an earlier send
    /// intent for the same step is still in flight or unprocessed.
    #[error("Duplicate send intent for idemKey '{idem_key}'")]
    DuplicateIntent { idem_key: String },

    /// Email provider rejected or failed the send
    #[error("Email provider error: {message}")]
    Provider { message: String },

    /// Outbound call to an external service failed
    #[error("External service '{service}' error: {message}")]
    ExternalService { service: String, message: String },

    /// Operation exceeded timeout limit
    #[error("Operation timeout: {operation}")]
    Timeout { operation: String },

    /// Unexpected internal error occurred
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Stable code for metrics counters and log correlation.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Database(_) => "DB_ERROR",
            Error::QueryFailed { .. } => "DB_QUERY_FAILED",
            Error::TransactionFailed { .. } => "DB_TX_FAILED",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Broker(_) => "BROKER",
            Error::MissingConfig { .. } => "CONFIG_MISSING",
            Error::InvalidConfig { .. } => "CONFIG_INVALID",
            Error::InvalidMessage { .. } => "MSG_INVALID",
            Error::LeadNotEligible { .. } => "LEAD_NOT_ELIGIBLE",
            Error::TemplateMissing { .. } => "TEMPLATE_MISSING",
            Error::DuplicateIntent { .. } => "DUPLICATE_INTENT",
            Error::Provider { .. } => "PROVIDER",
            Error::ExternalService { .. } => "EXTERNAL_SERVICE",
            Error::Timeout { .. } => "TIMEOUT",
            Error::Internal { .. } => "INTERNAL",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Error::Database(_)
            | Error::QueryFailed { .. }
            | Error::TransactionFailed { .. }
            | Error::DuplicateIntent { .. } => Category::Database,
            Error::Serialization(_)
            | Error::InvalidMessage { .. }
            | Error::LeadNotEligible { .. }
            | Error::TemplateMissing { .. } => Category::Validation,
            Error::Broker(_) => Category::Network,
            Error::Provider { .. } | Error::ExternalService { .. } | Error::Timeout { .. } => {
                Category::ExternalService
            }
            Error::MissingConfig { .. } | Error::InvalidConfig { .. } => Category::Configuration,
            Error::Internal { .. } => Category::System,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            // The duplicate-intent path is expected and downgraded.
            Error::DuplicateIntent { .. } => Severity::Low,
            _ => match self.category() {
                Category::Validation => Severity::Low,
                Category::Database => Severity::High,
                Category::Network => Severity::Medium,
                Category::ExternalService => Severity::Medium,
                Category::Configuration => Severity::Critical,
                Category::System => Severity::Critical,
            },
        }
    }
}

/// Emit a structured error log line carrying the full taxonomy.
pub fn log_error(err: &Error, context: &str) {
    tracing::error!(
        code = err.code(),
        category = %err.category(),
        severity = %err.severity(),
        context = context,
        error = %err,
        "operation failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let err = Error::MissingConfig {
            field: "DATABASE_URL".to_string(),
        };
        assert_eq!(err.code(), "CONFIG_MISSING");
        assert_eq!(err.category(), Category::Configuration);
        assert_eq!(err.severity(), Severity::Critical);
    }

    #[test]
    fn test_duplicate_intent_is_downgraded() {
        let err = Error::DuplicateIntent {
            idem_key: "ab".repeat(16),
        };
        assert_eq!(err.category(), Category::Database);
        assert_eq!(err.severity(), Severity::Low);
    }

    #[test]
    fn test_validation_is_low_severity() {
        let err = Error::InvalidMessage {
            message: "missing lead_id".to_string(),
        };
        assert_eq!(err.category(), Category::Validation);
        assert_eq!(err.severity(), Severity::Low);
    }

    #[test]
    fn test_provider_errors_are_medium() {
        let err = Error::Timeout {
            operation: "provider send".to_string(),
        };
        assert_eq!(err.category(), Category::ExternalService);
        assert_eq!(err.severity(), Severity::Medium);
    }
}
