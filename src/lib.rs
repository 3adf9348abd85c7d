//! RaiseAttention: static exception-flow analysis for Python.
//!
//! Determines, for every call site in user code, which exception types
//! may propagate out of that call and remain unhandled by enclosing
//! try/except scopes, and surfaces the result as editor diagnostics.

// Core infrastructure - re-exported from raiseattention-core
pub use raiseattention_core::cache;
pub use raiseattention_core::config;
pub use raiseattention_core::diagnostics;
pub use raiseattention_core::error;
pub use raiseattention_core::files;
pub use raiseattention_core::text;

// Front doors
pub mod cli;
pub mod lsp;

// Analysis core
pub use raiseattention_python as python;
