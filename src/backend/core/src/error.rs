//! Error handling for Gavel Core.
//!
//! This module provides:
//! - A single error type carrying a machine-readable [`ErrorCode`]
//! - Retryability and severity classification used by the coordinator
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! Rejected commands are not errors: the coordinator answers them with
//! [`Response::Rejected`](crate::replica::Response::Rejected). A `GavelError`
//! means the engine could not do its job (the journal failed, the replica
//! stopped, the log is corrupt).

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Gavel operations.
pub type Result<T> = std::result::Result<T, GavelError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Command Errors (1000-1099)
    UnexpectedReply,
    ReplicaStopped,
    WaitTimeout,

    // Journal Errors (2000-2099)
    AppendFailed,
    AppendTimeout,
    RetryBudgetExhausted,
    SequenceConflict,
    MalformedEvent,
    JournalIo,

    // Serialization Errors (2200-2299)
    SerializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::UnexpectedReply => 1001,
            Self::ReplicaStopped => 1002,
            Self::WaitTimeout => 1003,

            Self::AppendFailed => 2000,
            Self::AppendTimeout => 2001,
            Self::RetryBudgetExhausted => 2002,
            Self::SequenceConflict => 2003,
            Self::MalformedEvent => 2004,
            Self::JournalIo => 2005,

            Self::SerializationError => 2200,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Get the error category.
    pub const fn category(&self) -> &'static str {
        match self {
            Self::UnexpectedReply
            | Self::ReplicaStopped
            | Self::WaitTimeout => "command",
            Self::AppendFailed
            | Self::AppendTimeout
            | Self::RetryBudgetExhausted
            | Self::SequenceConflict
            | Self::MalformedEvent
            | Self::JournalIo => "journal",
            Self::SerializationError => "serialization",
            Self::ConfigurationError => "configuration",
            Self::InternalError => "internal",
        }
    }

    /// Whether an operation failing with this code may succeed when repeated.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AppendFailed | Self::AppendTimeout | Self::JournalIo
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnexpectedReply => "UNEXPECTED_REPLY",
            Self::ReplicaStopped => "REPLICA_STOPPED",
            Self::WaitTimeout => "WAIT_TIMEOUT",
            Self::AppendFailed => "APPEND_FAILED",
            Self::AppendTimeout => "APPEND_TIMEOUT",
            Self::RetryBudgetExhausted => "RETRY_BUDGET_EXHAUSTED",
            Self::SequenceConflict => "SEQUENCE_CONFLICT",
            Self::MalformedEvent => "MALFORMED_EVENT",
            Self::JournalIo => "JOURNAL_IO",
            Self::SerializationError => "SERIALIZATION_ERROR",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// How loudly an error should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// Determine severity from an error code.
    pub fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::WaitTimeout => Self::Low,
            ErrorCode::AppendFailed | ErrorCode::AppendTimeout | ErrorCode::JournalIo => {
                Self::Medium
            }
            ErrorCode::ReplicaStopped
            | ErrorCode::UnexpectedReply
            | ErrorCode::RetryBudgetExhausted
            | ErrorCode::SequenceConflict
            | ErrorCode::SerializationError
            | ErrorCode::ConfigurationError => Self::High,
            ErrorCode::MalformedEvent | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Gavel Core.
#[derive(Error, Debug)]
pub struct GavelError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Human-readable message
    message: Cow<'static, str>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for GavelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl GavelError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message.into())
    }

    /// The journal refused or failed a durable append.
    pub fn append_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AppendFailed, message.into())
    }

    /// A durable append did not complete within its deadline.
    pub fn append_timeout(timeout: std::time::Duration) -> Self {
        Self::new(
            ErrorCode::AppendTimeout,
            format!("append did not complete within {:?}", timeout),
        )
    }

    /// All retry attempts for an append were used up.
    pub fn retry_budget_exhausted(attempts: u32, last: GavelError) -> Self {
        Self::new(
            ErrorCode::RetryBudgetExhausted,
            format!("append failed after {} attempts", attempts),
        )
        .with_source(last)
    }

    /// An append did not continue the origin's sequence.
    pub fn sequence_conflict(origin: impl fmt::Display, expected: u64, actual: u64) -> Self {
        Self::new(
            ErrorCode::SequenceConflict,
            format!(
                "origin {} expected sequence {} but got {}",
                origin, expected, actual
            ),
        )
    }

    /// A persisted record could not be read back as an event.
    pub fn malformed_event(location: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::MalformedEvent,
            format!("malformed event at {}: {}", location, reason.into()),
        )
    }

    /// The replica's control loop is gone.
    pub fn replica_stopped(replica: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ReplicaStopped,
            format!("replica {} is not running", replica),
        )
    }

    /// The control loop answered with a reply of the wrong kind.
    pub fn unexpected_reply(expected: &'static str, actual: impl fmt::Debug) -> Self {
        Self::new(
            ErrorCode::UnexpectedReply,
            format!("expected {} reply, got {:?}", expected, actual),
        )
    }

    /// A replica state did not reach the awaited condition in time.
    pub fn wait_timeout(timeout: std::time::Duration) -> Self {
        Self::new(
            ErrorCode::WaitTimeout,
            format!("state condition not reached within {:?}", timeout),
        )
    }

    /// Invalid or missing configuration.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            crate::telemetry::metrics::ERRORS_TOTAL,
            "code" => self.code.to_string(),
            "category" => self.code.category(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for GavelError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::SerializationError, err.to_string()).with_source(err)
    }
}

impl From<std::io::Error> for GavelError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorCode::JournalIo, err.to_string()).with_source(err)
    }
}

impl From<config::ConfigError> for GavelError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(err.to_string()).with_source(err)
    }
}
