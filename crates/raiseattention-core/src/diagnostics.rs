//! Diagnostic model and output rendering.
//!
//! A [`Diagnostic`] is the single user-facing unit the analysis
//! produces. The CLI renders diagnostics as text or JSON; the LSP
//! frontend maps them onto protocol diagnostics. Within a file,
//! diagnostics are ordered by ascending (line, column).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ============================================================================
// Model
// ============================================================================

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    /// Lowercase label used in text output.
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// Stable diagnostic codes, shared between CLI JSON and LSP output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticCode {
    /// A call site may raise exceptions no enclosing handler catches.
    #[serde(rename = "unhandled-exception")]
    UnhandledException,
    /// The analyser itself failed for this file (syntax error, I/O).
    #[serde(rename = "internal-error")]
    InternalError,
    /// Tool-level findings: invalid ignore comments, strict-mode
    /// undocumented exceptions.
    #[serde(rename = "raiseattention")]
    RaiseAttention,
}

impl DiagnosticCode {
    /// The wire string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::UnhandledException => "unhandled-exception",
            DiagnosticCode::InternalError => "internal-error",
            DiagnosticCode::RaiseAttention => "raiseattention",
        }
    }
}

/// One diagnostic message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// File the diagnostic points into.
    pub file: PathBuf,
    /// 1-indexed line.
    pub line: u32,
    /// 0-indexed column.
    pub column: u32,
    /// Human-readable message.
    pub message: String,
    /// Exception class names involved, sorted.
    pub exception_types: Vec<String>,
    pub severity: Severity,
    pub code: DiagnosticCode,
}

impl Diagnostic {
    /// Create an `internal-error` diagnostic at 1:1 for a file that
    /// could not be analysed.
    pub fn internal_error(file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Diagnostic {
            file: file.into(),
            line: 1,
            column: 1,
            message: message.into(),
            exception_types: Vec::new(),
            severity: Severity::Error,
            code: DiagnosticCode::InternalError,
        }
    }
}

/// Result of analysing a file or a project.
#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    pub diagnostics: Vec<Diagnostic>,
    pub files_analysed: Vec<PathBuf>,
    pub functions_found: usize,
    pub exceptions_tracked: usize,
}

impl AnalysisResult {
    /// Fold another result into this one.
    pub fn merge(&mut self, other: AnalysisResult) {
        self.diagnostics.extend(other.diagnostics);
        self.files_analysed.extend(other.files_analysed);
        self.functions_found += other.functions_found;
        self.exceptions_tracked += other.exceptions_tracked;
    }

    /// Sort diagnostics by (file, line, column) for deterministic output.
    pub fn sort(&mut self) {
        self.diagnostics
            .sort_by(|a, b| (&a.file, a.line, a.column).cmp(&(&b.file, b.line, b.column)));
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Format a path for text output: cwd-relative unless `absolute`.
pub fn format_path(file: &Path, cwd: &Path, absolute: bool) -> String {
    if absolute {
        return file.display().to_string();
    }
    match file.strip_prefix(cwd) {
        Ok(rel) => rel.display().to_string(),
        Err(_) => file.display().to_string(),
    }
}

/// Render diagnostics in the human text format, with trailing summary.
///
/// Format: `<path>:<line>:<col>: <severity>: <message>` per diagnostic,
/// then `N issue(s) found`.
pub fn render_text(result: &AnalysisResult, cwd: &Path, absolute: bool) -> String {
    let mut out = String::new();
    for diag in &result.diagnostics {
        let path = format_path(&diag.file, cwd, absolute);
        out.push_str(&format!(
            "{}:{}:{}: {}: {}\n",
            path,
            diag.line,
            diag.column,
            diag.severity.label(),
            diag.message
        ));
    }
    let count = result.diagnostics.len();
    let word = if count == 1 { "issue" } else { "issues" };
    out.push_str(&format!("{} {} found\n", count, word));
    out
}

/// Render diagnostics plus a summary block as a JSON value.
///
/// JSON output always uses absolute paths so it can be consumed from any
/// working directory.
pub fn render_json(result: &AnalysisResult) -> serde_json::Value {
    let files: std::collections::BTreeSet<&PathBuf> = result.files_analysed.iter().collect();
    serde_json::json!({
        "diagnostics": result.diagnostics.iter().map(|d| {
            serde_json::json!({
                "file": d.file.display().to_string(),
                "line": d.line,
                "column": d.column,
                "message": d.message,
                "exception_types": d.exception_types,
                "severity": d.severity,
                "code": d.code.as_str(),
            })
        }).collect::<Vec<_>>(),
        "summary": {
            "files_analysed": files.len(),
            "functions_found": result.functions_found,
            "exceptions_tracked": result.exceptions_tracked,
            "issues_found": result.diagnostics.len(),
        },
    })
}

// ============================================================================
// Tests
// ============================================================================
