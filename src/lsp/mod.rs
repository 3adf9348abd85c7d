//! LSP front door.
//!
//! A single-threaded, cooperatively-scheduled language server over
//! stdio: JSON-RPC 2.0 frames with `Content-Length` headers, the
//! standard text-document lifecycle, and debounced re-analysis. One
//! [`python::AnalysisSession`] serves the workspace root.
//!
//! [`python::AnalysisSession`]: raiseattention_python::AnalysisSession

pub mod server;
pub mod transport;
pub mod uri;

pub use server::run_stdio;
