//! JSON-RPC 2.0 framing over byte streams.
//!
//! LSP messages are `Content-Length`-prefixed JSON bodies:
//!
//! ```text
//! Content-Length: 123\r\n
//! \r\n
//! {"jsonrpc":"2.0", ...}
//! ```
//!
//! The reader tolerates extra headers (`Content-Type`) and returns
//! `Ok(None)` on a cleanly closed stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use raiseattention_core::error::RaiseError;

/// An incoming JSON-RPC message: request (has `id`) or notification.
#[derive(Debug, Clone, Deserialize)]
pub struct Incoming {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// An outgoing response.
#[derive(Debug, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// A JSON-RPC error object.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Response {
        Response {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Response {
        Response {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Standard JSON-RPC error codes used by the server.
pub mod error_codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Read one framed message. `Ok(None)` means the peer closed the
/// stream.
pub async fn read_message<R>(
    reader: &mut BufReader<R>,
) -> Result<Option<Incoming>, RaiseError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await.map_err(|e| {
            RaiseError::Transport {
                message: format!("header read failed: {e}"),
            }
        })?;
        if read == 0 {
            return Ok(None);
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some(value) = line
            .strip_prefix("Content-Length:")
            .or_else(|| line.strip_prefix("content-length:"))
        {
            content_length = value.trim().parse().ok();
        }
        // Other headers (Content-Type) are ignored.
    }

    let length = content_length.ok_or_else(|| RaiseError::Transport {
        message: "frame missing Content-Length header".to_string(),
    })?;

    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| RaiseError::Transport {
            message: format!("body read failed: {e}"),
        })?;

    let incoming: Incoming =
        serde_json::from_slice(&body).map_err(|e| RaiseError::Transport {
            message: format!("malformed JSON-RPC body: {e}"),
        })?;
    Ok(Some(incoming))
}

/// Write one framed JSON value.
pub async fn write_value<W>(writer: &mut W, value: &Value) -> Result<(), RaiseError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer
        .write_all(header.as_bytes())
        .await
        .map_err(|e| RaiseError::Transport {
            message: format!("write failed: {e}"),
        })?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| RaiseError::Transport {
            message: format!("write failed: {e}"),
        })?;
    writer.flush().await.map_err(|e| RaiseError::Transport {
        message: format!("flush failed: {e}"),
    })?;
    Ok(())
}

/// Write a response.
pub async fn write_response<W>(writer: &mut W, response: Response) -> Result<(), RaiseError>
where
    W: AsyncWrite + Unpin,
{
    let value = serde_json::to_value(&response)?;
    write_value(writer, &value).await
}

/// Write a server-initiated notification.
pub async fn write_notification<W>(
    writer: &mut W,
    method: &str,
    params: Value,
) -> Result<(), RaiseError>
where
    W: AsyncWrite + Unpin,
{
    let value = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    });
    write_value(writer, &value).await
}
