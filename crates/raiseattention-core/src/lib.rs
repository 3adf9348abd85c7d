//! Core infrastructure for raiseattention.
//!
//! This crate holds the pieces shared by the analysis core and the
//! CLI/LSP frontends: the unified error type with stable exit codes,
//! layered configuration loading, the diagnostic model and its text/JSON
//! renderers, the two-tier on-disk cache, workspace file discovery, and
//! small text utilities.

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod files;
pub mod text;

pub use config::Config;
pub use diagnostics::{AnalysisResult, Diagnostic, DiagnosticCode, Severity};
pub use error::{OutputErrorCode, RaiseError};
