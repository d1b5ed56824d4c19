//! Error types for the Colloquy core library.
//!
//! Every fallible engine operation returns [`ColloquyResult`]. Telemetry
//! reads and writes (metrics, traces) never surface errors to callers; the
//! variants here describe failures of the chat flow itself, of configuration,
//! and of durable storage.
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Gateway | Transport, timeout and cancellation of stage calls |
//! | E2001-E2099 | Config | Configuration parsing and validation errors |
//! | E3001-E3099 | Conversation | Unknown conversations and invalid state transitions |
//! | E4001-E4099 | Storage | IO and serialization errors of durable storage |
//! | E9001-E9099 | General | Internal errors |

use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

/// Coarse classification of an error, used when an error is recorded into a
/// trace entry or shown to a user.
///
/// A stage timeout reports the same kind as a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Cancelled,
    Validation,
    NotFound,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for the Colloquy core library.
#[derive(Debug, Error)]
pub enum ColloquyError {
    // ========================================================================
    // Gateway Errors (E1001-E1099)
    // ========================================================================
    /// The gateway was unreachable or answered with a non-2xx status
    #[error("[E1001] Gateway request to '{provider}' failed: {message}")]
    Transport { provider: String, message: String },

    /// A stage call exceeded its deadline
    #[error("[E1002] Stage '{stage}' timed out after {timeout_secs} seconds")]
    Timeout { stage: String, timeout_secs: u64 },

    /// Cooperative cancellation observed at a stage boundary
    #[error("[E1003] Turn cancelled before stage '{0}'")]
    Cancelled(String),

    /// The gateway answered but the body could not be understood
    #[error("[E1004] Unexpected response from '{provider}': {message}")]
    InvalidResponse { provider: String, message: String },

    // ========================================================================
    // Configuration Errors (E2001-E2099)
    // ========================================================================
    /// Malformed configuration or a request that violates a configured limit
    #[error("[E2001] Validation error: {0}")]
    ValidationError(String),

    /// A single configuration key holds an invalid value
    #[error("[E2002] Invalid configuration value for '{key}': {message}")]
    InvalidConfigValue { key: String, message: String },

    /// Configuration sources could not be parsed
    #[error("[E2003] Failed to parse configuration: {0}")]
    ConfigParseError(String),

    // ========================================================================
    // Conversation Errors (E3001-E3099)
    // ========================================================================
    /// Operation against a conversation the coordinator does not know
    #[error("[E3001] Conversation not found: {0}")]
    NotFound(String),

    /// Coordinator state machine refused a transition
    #[error("[E3002] Invalid coordinator state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // ========================================================================
    // Storage Errors (E4001-E4099)
    // ========================================================================
    /// IO error
    #[error("[E4001] IO error: {0}")]
    IoError(String),

    /// Serialization/deserialization error
    #[error("[E4002] Serialization error: {0}")]
    SerializationError(String),

    /// Storage root could not be determined
    #[error("[E4003] Storage location unavailable: {0}")]
    StorageUnavailable(String),

    // ========================================================================
    // General Errors (E9001-E9099)
    // ========================================================================
    /// Internal error (catch-all for unexpected conditions)
    #[error("[E9001] Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Colloquy operations.
pub type ColloquyResult<T> = Result<T, ColloquyError>;

impl ColloquyError {
    /// Create a transport error for the given provider.
    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ColloquyError::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        ColloquyError::ValidationError(message.into())
    }
}

// ============================================================================
// From trait implementations for seamless error propagation
// ============================================================================

impl From<serde_json::Error> for ColloquyError {
    fn from(err: serde_json::Error) -> Self {
        ColloquyError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for ColloquyError {
    fn from(err: std::io::Error) -> Self {
        ColloquyError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for ColloquyError {
    fn from(err: reqwest::Error) -> Self {
        let provider = err
            .url()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        if err.is_timeout() {
            ColloquyError::Timeout {
                stage: provider,
                timeout_secs: 0,
            }
        } else if err.is_decode() {
            ColloquyError::InvalidResponse {
                provider,
                message: err.to_string(),
            }
        } else {
            ColloquyError::Transport {
                provider,
                message: err.to_string(),
            }
        }
    }
}

impl From<config::ConfigError> for ColloquyError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => ColloquyError::InvalidConfigValue {
                key,
                message: "Key not found".to_string(),
            },
            config::ConfigError::FileParse { uri, cause } => ColloquyError::ConfigParseError(
                format!("Failed to parse {}: {}", uri.unwrap_or_default(), cause),
            ),
            config::ConfigError::Type {
                origin,
                unexpected,
                expected,
                key,
            } => ColloquyError::InvalidConfigValue {
                key: key.unwrap_or_else(|| origin.map(|o| o.to_string()).unwrap_or_default()),
                message: format!("Expected {}, got {}", expected, unexpected),
            },
            _ => ColloquyError::ConfigParseError(err.to_string()),
        }
    }
}

// ============================================================================
// Error categorization helpers
// ============================================================================

impl ColloquyError {
    /// Classify this error for trace entries and user display.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ColloquyError::Transport { .. }
            | ColloquyError::Timeout { .. }
            | ColloquyError::InvalidResponse { .. } => ErrorKind::Transport,
            ColloquyError::Cancelled(_) => ErrorKind::Cancelled,
            ColloquyError::ValidationError(_)
            | ColloquyError::InvalidConfigValue { .. }
            | ColloquyError::ConfigParseError(_)
            | ColloquyError::InvalidStateTransition { .. } => ErrorKind::Validation,
            ColloquyError::NotFound(_) => ErrorKind::NotFound,
            ColloquyError::IoError(_)
            | ColloquyError::SerializationError(_)
            | ColloquyError::StorageUnavailable(_) => ErrorKind::Storage,
            ColloquyError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if this error came out of a gateway stage call,
    /// including cooperative cancellation.
    pub fn is_gateway_error(&self) -> bool {
        matches!(
            self,
            ColloquyError::Transport { .. }
                | ColloquyError::Timeout { .. }
                | ColloquyError::Cancelled(_)
                | ColloquyError::InvalidResponse { .. }
        )
    }

    /// Returns true if this error is related to configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ColloquyError::ValidationError(_)
                | ColloquyError::InvalidConfigValue { .. }
                | ColloquyError::ConfigParseError(_)
        )
    }

    /// Returns true if the operation might succeed when repeated.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ColloquyError::Transport { .. } | ColloquyError::Timeout { .. }
        )
    }

    /// Returns an error code suitable for logging or external reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            ColloquyError::Transport { .. } => "E1001",
            ColloquyError::Timeout { .. } => "E1002",
            ColloquyError::Cancelled(_) => "E1003",
            ColloquyError::InvalidResponse { .. } => "E1004",
            ColloquyError::ValidationError(_) => "E2001",
            ColloquyError::InvalidConfigValue { .. } => "E2002",
            ColloquyError::ConfigParseError(_) => "E2003",
            ColloquyError::NotFound(_) => "E3001",
            ColloquyError::InvalidStateTransition { .. } => "E3002",
            ColloquyError::IoError(_) => "E4001",
            ColloquyError::SerializationError(_) => "E4002",
            ColloquyError::StorageUnavailable(_) => "E4003",
            ColloquyError::Internal(_) => "E9001",
        }
    }

    /// Returns a user-friendly suggestion for how to resolve this error.
    pub fn user_suggestion(&self) -> Option<&'static str> {
        match self {
            ColloquyError::Transport { .. } => {
                Some("Check the provider base URL, your network connection and the API key")
            }
            ColloquyError::Timeout { .. } => {
                Some("Increase timeout_seconds or try a smaller model")
            }
            ColloquyError::InvalidConfigValue { .. } | ColloquyError::ValidationError(_) => {
                Some("Run 'colloquy config validate' to inspect the active settings")
            }
            ColloquyError::NotFound(_) => {
                Some("Run 'colloquy history list' to see saved conversations")
            }
            ColloquyError::StorageUnavailable(_) => {
                Some("Set history.storage_dir to a writable directory")
            }
            _ => None,
        }
    }

    /// Log this error with appropriate severity level.
    pub fn log(&self) {
        let code = self.error_code();
        let suggestion = self.user_suggestion();

        if self.is_transient() {
            warn!(
                error_code = %code,
                suggestion = suggestion,
                "Transient error occurred: {}",
                self
            );
        } else {
            error!(
                error_code = %code,
                suggestion = suggestion,
                "Error occurred: {}",
                self
            );
        }
    }
}

// ============================================================================
// User-friendly error formatting for CLI
// ============================================================================

/// Format an error for CLI display with its suggestion.
pub struct CliErrorDisplay<'a> {
    error: &'a ColloquyError,
    show_suggestion: bool,
}

impl<'a> CliErrorDisplay<'a> {
    pub fn new(error: &'a ColloquyError) -> Self {
        Self {
            error,
            show_suggestion: true,
        }
    }

    pub fn without_suggestion(mut self) -> Self {
        self.show_suggestion = false;
        self
    }
}

impl<'a> fmt::Display for CliErrorDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.error)?;

        if self.show_suggestion {
            if let Some(suggestion) = self.error.user_suggestion() {
                writeln!(f)?;
                writeln!(f, "  Suggestion: {}", suggestion)?;
            }
        }

        if self.error.is_transient() {
            writeln!(f)?;
            writeln!(f, "  This error may be temporary. Try the turn again.")?;
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
