//! Error types and exit-code constants for raiseattention.
//!
//! This module provides a unified error type (`RaiseError`) that bridges
//! domain-specific errors from the different subsystems (visitor,
//! resolver, cache, config, LSP transport) into a common format suitable
//! for CLI and JSON output.
//!
//! ## Exit Code Mapping
//!
//! - `0`: clean run, no diagnostics
//! - `1`: at least one diagnostic was emitted
//! - `2`: internal error (bad arguments, engine invariant violation, I/O)
//!
//! ## Design
//!
//! - **Unified type**: `RaiseError` is the single error type crossing the
//!   frontend boundary
//! - **Bridging**: `impl From<X> for RaiseError` bridges domain errors
//! - **Code mapping**: `OutputErrorCode` provides the stable exit codes

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// Output Error Codes
// ============================================================================

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    /// No diagnostics found.
    Clean = 0,
    /// At least one diagnostic was emitted.
    IssuesFound = 1,
    /// Internal error (bugs, invalid arguments, unexpected state).
    InternalError = 2,
}

impl OutputErrorCode {
    /// Get the numeric code value.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for frontend output.
///
/// All subsystem errors are converted to this type before being rendered
/// to the user. Each variant carries enough context to produce a helpful
/// message.
#[derive(Debug, Error)]
pub enum RaiseError {
    /// Invalid arguments from the caller.
    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },

    /// A path given on the command line does not exist.
    #[error("path not found: {path}")]
    PathNotFound { path: PathBuf },

    /// Configuration file could not be read or parsed.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Cache directory could not be created or written.
    #[error("cache error: {message}")]
    Cache { message: String },

    /// LSP transport failure (malformed frame, closed stream).
    #[error("lsp transport error: {message}")]
    Transport { message: String },

    /// Engine invariant violation. Aborts the current request.
    #[error("engine invariant violated in '{function}': {message}")]
    EngineInvariant { function: String, message: String },

    /// Internal error (bug or unexpected state).
    #[error("internal error: {message}")]
    Internal { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RaiseError {
    /// Create an invalid arguments error.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        RaiseError::InvalidArguments {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        RaiseError::Internal {
            message: message.into(),
        }
    }

    /// Get the exit code for this error.
    ///
    /// Every error maps to `InternalError`; the `Clean`/`IssuesFound`
    /// codes are produced by a successful run, never by an error.
    pub fn error_code(&self) -> OutputErrorCode {
        OutputErrorCode::InternalError
    }
}

impl From<crate::config::ConfigError> for RaiseError {
    fn from(err: crate::config::ConfigError) -> Self {
        RaiseError::Config {
            message: err.to_string(),
        }
    }
}

impl From<crate::cache::CacheError> for RaiseError {
    fn from(err: crate::cache::CacheError) -> Self {
        RaiseError::Cache {
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod error_code_mapping {
        use super::*;

        #[test]
        fn code_values_are_stable() {
            assert_eq!(OutputErrorCode::Clean.code(), 0);
            assert_eq!(OutputErrorCode::IssuesFound.code(), 1);
            assert_eq!(OutputErrorCode::InternalError.code(), 2);
        }

        #[test]
        fn every_error_maps_to_internal() {
            let err = RaiseError::invalid_args("missing path");
            assert_eq!(err.error_code(), OutputErrorCode::InternalError);

            let err = RaiseError::EngineInvariant {
                function: "pkg.f".to_string(),
                message: "signature shrank".to_string(),
            };
            assert_eq!(err.error_code().code(), 2);
        }
    }

    mod error_display {
        use super::*;

        #[test]
        fn invalid_arguments_display() {
            let err = RaiseError::invalid_args("missing path");
            assert_eq!(err.to_string(), "invalid arguments: missing path");
        }

        #[test]
        fn engine_invariant_display() {
            let err = RaiseError::EngineInvariant {
                function: "pkg.f".to_string(),
                message: "signature shrank".to_string(),
            };
            assert_eq!(
                err.to_string(),
                "engine invariant violated in 'pkg.f': signature shrank"
            );
        }
    }
}
