//! The language server: lifecycle, debounce, publishing.
//!
//! Single-threaded cooperative scheduling over two logical queues:
//! incoming document events, and background re-analysis whose per-URI
//! deadlines implement the debounce window. A change arriving before
//! the window elapses pushes the deadline out and bumps the document
//! generation; results computed for a stale generation are discarded
//! unpublished, so published diagnostics always correspond to a content
//! hash the server actually held.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncWrite, BufReader};
use tokio::time::Instant;
use tracing::{debug, warn};

use raiseattention_core::config::Config;
use raiseattention_core::diagnostics::{Diagnostic, Severity};
use raiseattention_core::error::RaiseError;
use raiseattention_core::text::sha256_hex;
use raiseattention_python::AnalysisSession;

use super::transport::{
    error_codes, read_message, write_notification, write_response, Incoming, Response,
};
use super::uri::{path_to_uri, uri_to_path};

// ============================================================================
// State
// ============================================================================

struct Document {
    uri: String,
    content: String,
    content_hash: String,
    generation: u64,
}

struct Pending {
    deadline: Instant,
    generation: u64,
}

struct Server {
    session: AnalysisSession,
    debounce: Duration,
    documents: HashMap<PathBuf, Document>,
    pending: HashMap<PathBuf, Pending>,
    shutdown_requested: bool,
}

// ============================================================================
// Entry points
// ============================================================================

/// Run the server over stdio until `exit`. Blocking; builds its own
/// current-thread runtime.
pub fn run_stdio(project_root: &Path) -> Result<(), RaiseError> {
    let config = Config::load(project_root)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| RaiseError::internal(format!("runtime start failed: {e}")))?;
    runtime.block_on(async {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        serve(config, stdin, stdout).await
    })
}

/// Serve LSP over arbitrary streams (tests drive this directly).
///
/// Framing runs on its own task so a firing debounce deadline can never
/// interrupt a half-read frame; the main loop selects between the
/// message channel (cancel-safe) and the earliest analysis deadline.
pub async fn serve<R, W>(
    config: Config,
    reader: BufReader<R>,
    mut writer: W,
) -> Result<(), RaiseError>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let debounce = Duration::from_millis(config.debounce_ms);
    let mut server = Server {
        session: AnalysisSession::new(config),
        debounce,
        documents: HashMap::new(),
        pending: HashMap::new(),
        shutdown_requested: false,
    };

    let (tx, mut rx) = tokio::sync::mpsc::channel::<Result<Incoming, RaiseError>>(32);
    let reader_task = tokio::spawn(async move {
        let mut reader = reader;
        loop {
            match read_message(&mut reader).await {
                Ok(Some(message)) => {
                    if tx.send(Ok(message)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });

    loop {
        let next_deadline = server
            .pending
            .values()
            .map(|p| p.deadline)
            .min()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            biased;

            _ = tokio::time::sleep_until(next_deadline), if !server.pending.is_empty() => {
                server.run_due_analyses(&mut writer).await?;
            }

            message = rx.recv() => {
                match message {
                    Some(Ok(incoming)) => {
                        if server.handle_message(incoming, &mut writer).await? {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        reader_task.abort();
                        return Err(e);
                    }
                    None => {
                        // Editor hung up: finish due work, then stop.
                        server.run_due_analyses(&mut writer).await?;
                        break;
                    }
                }
            }
        }
    }

    reader_task.abort();
    Ok(())
}

// ============================================================================
// Message handling
// ============================================================================

impl Server {
    /// Handle one message; returns `true` when the server should exit.
    async fn handle_message<W>(
        &mut self,
        incoming: Incoming,
        writer: &mut W,
    ) -> Result<bool, RaiseError>
    where
        W: AsyncWrite + Unpin,
    {
        match (incoming.id, incoming.method.as_str()) {
            (Some(id), "initialize") => {
                let result = json!({
                    "capabilities": {
                        "textDocumentSync": 1,
                    },
                    "serverInfo": {
                        "name": "raiseattention",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                });
                write_response(writer, Response::success(id, result)).await?;
            }
            (Some(id), "shutdown") => {
                self.shutdown_requested = true;
                write_response(writer, Response::success(id, Value::Null)).await?;
            }
            (Some(id), method) => {
                debug!("unhandled request: {}", method);
                write_response(
                    writer,
                    Response::failure(
                        id,
                        error_codes::METHOD_NOT_FOUND,
                        format!("method not supported: {method}"),
                    ),
                )
                .await?;
            }
            (None, "exit") => {
                if !self.shutdown_requested {
                    warn!("exit received without shutdown");
                }
                return Ok(true);
            }
            (None, "initialized") => {}
            (None, "textDocument/didOpen") => {
                let (uri, text) = text_document_text(&incoming.params, "text");
                if let (Some(uri), Some(text)) = (uri, text) {
                    self.open_or_update(&uri, text, Instant::now());
                }
            }
            (None, "textDocument/didChange") => {
                let uri = text_document_uri(&incoming.params);
                let text = incoming.params["contentChanges"]
                    .as_array()
                    .and_then(|changes| changes.last())
                    .and_then(|change| change["text"].as_str())
                    .map(str::to_string);
                if let (Some(uri), Some(text)) = (uri, text) {
                    // Full-document sync; the debounce window restarts.
                    self.open_or_update(&uri, text, Instant::now() + self.debounce);
                }
            }
            (None, "textDocument/didSave") => {
                if let Some(uri) = text_document_uri(&incoming.params) {
                    if let Some(path) = uri_to_path(&uri) {
                        if let Some(doc) = self.documents.get(&path) {
                            self.pending.insert(
                                path,
                                Pending {
                                    deadline: Instant::now(),
                                    generation: doc.generation,
                                },
                            );
                        }
                    }
                }
            }
            (None, "textDocument/didClose") => {
                if let Some(uri) = text_document_uri(&incoming.params) {
                    if let Some(path) = uri_to_path(&uri) {
                        self.documents.remove(&path);
                        self.pending.remove(&path);
                        self.session.invalidate_file(&path);
                    }
                }
            }
            (None, method) => {
                debug!("ignoring notification: {}", method);
            }
        }
        Ok(false)
    }

    fn open_or_update(&mut self, uri: &str, text: String, deadline: Instant) {
        let Some(path) = uri_to_path(uri) else {
            warn!("unsupported document uri: {}", uri);
            return;
        };
        let generation = self
            .documents
            .get(&path)
            .map(|d| d.generation + 1)
            .unwrap_or(0);
        let content_hash = sha256_hex(text.as_bytes());
        self.documents.insert(
            path.clone(),
            Document {
                uri: uri.to_string(),
                content: text,
                content_hash,
                generation,
            },
        );
        self.pending.insert(
            path,
            Pending {
                deadline,
                generation,
            },
        );
    }

    /// Run every analysis whose debounce window has elapsed.
    async fn run_due_analyses<W>(&mut self, writer: &mut W) -> Result<(), RaiseError>
    where
        W: AsyncWrite + Unpin,
    {
        let now = Instant::now();
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();

        for path in due {
            let Some(pending) = self.pending.remove(&path) else {
                continue;
            };
            let Some((uri, content, hash)) = self
                .documents
                .get(&path)
                .map(|d| (d.uri.clone(), d.content.clone(), d.content_hash.clone()))
            else {
                continue;
            };

            let outcome = self.session.analyse_document(&path, &content, None);

            // Supersession check: publish only if the document is still
            // the version the analysis saw.
            let still_current = self
                .documents
                .get(&path)
                .is_some_and(|d| d.generation == pending.generation && d.content_hash == hash);
            if !still_current {
                debug!("discarding stale analysis for {}", uri);
                continue;
            }

            match outcome {
                Ok(Some(result)) => {
                    publish(writer, &uri, &result.diagnostics).await?;
                }
                Ok(None) => {}
                Err(RaiseError::EngineInvariant { function, message }) => {
                    // Abort this request only; surface it as a
                    // diagnostic against the document.
                    let diag = Diagnostic::internal_error(
                        &path,
                        format!("analysis aborted in '{function}': {message}"),
                    );
                    publish(writer, &uri, &[diag]).await?;
                }
                Err(e) => {
                    let diag =
                        Diagnostic::internal_error(&path, format!("analysis failed: {e}"));
                    publish(writer, &uri, &[diag]).await?;
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Wire conversion
// ============================================================================

async fn publish<W>(
    writer: &mut W,
    uri: &str,
    diagnostics: &[Diagnostic],
) -> Result<(), RaiseError>
where
    W: AsyncWrite + Unpin,
{
    let body: Vec<Value> = diagnostics.iter().map(to_lsp_diagnostic).collect();
    write_notification(
        writer,
        "textDocument/publishDiagnostics",
        json!({
            "uri": uri,
            "diagnostics": body,
        }),
    )
    .await
}

fn to_lsp_diagnostic(diag: &Diagnostic) -> Value {
    let severity = match diag.severity {
        Severity::Error => 1,
        Severity::Warning => 2,
        Severity::Info => 3,
    };
    // LSP lines are 0-indexed.
    let line = diag.line.saturating_sub(1);
    json!({
        "range": {
            "start": {"line": line, "character": diag.column},
            "end": {"line": line, "character": diag.column + 1},
        },
        "message": diag.message,
        "severity": severity,
        "source": "raiseattention",
        "code": diag.code.as_str(),
    })
}

/// Pull `textDocument.uri` out of notification params.
fn text_document_uri(params: &Value) -> Option<String> {
    params["textDocument"]["uri"].as_str().map(str::to_string)
}

/// Pull the uri plus a text field (`text` for didOpen).
fn text_document_text(params: &Value, field: &str) -> (Option<String>, Option<String>) {
    (
        text_document_uri(params),
        params["textDocument"][field].as_str().map(str::to_string),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn frame(body: &str) -> String {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
    }

    fn script(messages: &[Value]) -> Vec<u8> {
        messages
            .iter()
            .map(|m| frame(&m.to_string()))
            .collect::<String>()
            .into_bytes()
    }

    /// Decode every framed message the server wrote.
    fn decode_output(output: &[u8]) -> Vec<Value> {
        let text = String::from_utf8_lossy(output);
        let mut messages = Vec::new();
        let mut rest = text.as_ref();
        while let Some(start) = rest.find("\r\n\r\n") {
            let header = &rest[..start];
            let length: usize = header
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length:"))
                .and_then(|v| v.trim().parse().ok())
                .expect("output frame has Content-Length");
            let body_start = start + 4;
            let body = &rest[body_start..body_start + length];
            messages.push(serde_json::from_str(body).expect("output frame is JSON"));
            rest = &rest[body_start + length..];
        }
        messages
    }

    fn test_config(root: &Path) -> Config {
        Config {
            project_root: root.to_path_buf(),
            // Immediate analysis keeps the tests fast and deterministic.
            debounce_ms: 0,
            ..Config::default()
        }
    }

    async fn run_script(root: &Path, messages: &[Value]) -> Vec<Value> {
        let input = script(messages);
        let mut output: Vec<u8> = Vec::new();
        serve(
            test_config(root),
            BufReader::new(std::io::Cursor::new(input)),
            &mut output,
        )
        .await
        .expect("server run");
        decode_output(&output)
    }

    fn initialize() -> Value {
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})
    }

    fn did_open(uri: &str, text: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didOpen",
            "params": {"textDocument": {"uri": uri, "text": text}},
        })
    }

    fn did_change(uri: &str, text: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didChange",
            "params": {
                "textDocument": {"uri": uri},
                "contentChanges": [{"text": text}],
            },
        })
    }

    fn shutdown_and_exit() -> [Value; 2] {
        [
            json!({"jsonrpc": "2.0", "id": 99, "method": "shutdown"}),
            json!({"jsonrpc": "2.0", "method": "exit"}),
        ]
    }

    #[tokio::test]
    async fn initialize_reports_capabilities() {
        let dir = TempDir::new().unwrap();
        let [shutdown, exit] = shutdown_and_exit();
        let output = run_script(dir.path(), &[initialize(), shutdown, exit]).await;

        let init = &output[0];
        assert_eq!(init["id"], 1);
        assert_eq!(init["result"]["capabilities"]["textDocumentSync"], 1);
        assert_eq!(init["result"]["serverInfo"]["name"], "raiseattention");
    }

    #[tokio::test]
    async fn open_publishes_diagnostics() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.py");
        let source = "def r():\n    raise ValueError()\ndef c():\n    r()\n";
        fs::write(&path, source).unwrap();
        let uri = path_to_uri(&path);

        let [shutdown, exit] = shutdown_and_exit();
        let output = run_script(
            dir.path(),
            &[initialize(), did_open(&uri, source), shutdown, exit],
        )
        .await;

        let published: Vec<&Value> = output
            .iter()
            .filter(|m| m["method"] == "textDocument/publishDiagnostics")
            .collect();
        assert_eq!(published.len(), 1);
        let diags = published[0]["params"]["diagnostics"].as_array().unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0]["code"], "unhandled-exception");
        assert_eq!(diags[0]["source"], "raiseattention");
        // 1-indexed line 4 becomes LSP line 3.
        assert_eq!(diags[0]["range"]["start"]["line"], 3);
    }

    #[tokio::test]
    async fn change_supersedes_open_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.py");
        let clean = "def ok():\n    pass\n";
        let broken = "def r():\n    raise ValueError()\ndef c():\n    r()\n";
        fs::write(&path, clean).unwrap();
        let uri = path_to_uri(&path);

        let [shutdown, exit] = shutdown_and_exit();
        let output = run_script(
            dir.path(),
            &[
                initialize(),
                did_open(&uri, clean),
                did_change(&uri, broken),
                shutdown,
                exit,
            ],
        )
        .await;

        // The final publish for the uri reflects the edited content.
        let last = output
            .iter()
            .filter(|m| m["method"] == "textDocument/publishDiagnostics")
            .next_back()
            .expect("diagnostics published");
        let diags = last["params"]["diagnostics"].as_array().unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0]["code"], "unhandled-exception");
    }

    #[tokio::test]
    async fn syntax_error_publishes_internal_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.py");
        let source = "def broken(:\n";
        fs::write(&path, source).unwrap();
        let uri = path_to_uri(&path);

        let [shutdown, exit] = shutdown_and_exit();
        let output = run_script(
            dir.path(),
            &[initialize(), did_open(&uri, source), shutdown, exit],
        )
        .await;

        let published = output
            .iter()
            .find(|m| m["method"] == "textDocument/publishDiagnostics")
            .expect("diagnostics published");
        let diags = published["params"]["diagnostics"].as_array().unwrap();
        assert_eq!(diags[0]["code"], "internal-error");
        assert_eq!(diags[0]["range"]["start"]["line"], 0);
    }

    #[tokio::test]
    async fn unknown_request_gets_method_not_found() {
        let dir = TempDir::new().unwrap();
        let [shutdown, exit] = shutdown_and_exit();
        let bogus = json!({"jsonrpc": "2.0", "id": 5, "method": "textDocument/hover", "params": {}});
        let output = run_script(dir.path(), &[initialize(), bogus, shutdown, exit]).await;

        let reply = output.iter().find(|m| m["id"] == 5).unwrap();
        assert_eq!(reply["error"]["code"], error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn shutdown_returns_null_result() {
        let dir = TempDir::new().unwrap();
        let [shutdown, exit] = shutdown_and_exit();
        let output = run_script(dir.path(), &[initialize(), shutdown, exit]).await;
        let reply = output.iter().find(|m| m["id"] == 99).unwrap();
        assert!(reply["result"].is_null());
        assert!(reply.get("error").is_none());
    }
}
