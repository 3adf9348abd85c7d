//! Exception-flow analysis core.
//!
//! Pipeline: source file → [`visitor`] (per-function call/raise/try
//! records) → [`engine`] (inter-procedural may-raise fixpoint, consulting
//! [`resolver`] for non-local callees, which consults [`stubs`] for
//! native ones) → diagnostics, filtered by enclosing handlers and the
//! suppression layers ([`ignore`], docstrings).
//!
//! [`analyzer::AnalysisSession`] ties the pieces together and owns all
//! process-wide state; there are no global singletons.

pub mod analyzer;
pub mod engine;
pub mod env;
pub mod exceptions;
pub mod ignore;
pub mod resolver;
pub mod stubs;
pub mod visitor;

pub use analyzer::AnalysisSession;
pub use exceptions::{Confidence, ExceptionSet, POSSIBLE_NATIVE_EXCEPTION};
