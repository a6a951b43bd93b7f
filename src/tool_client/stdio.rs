//! Stdio transport for [`super::ToolClient`]: JSON-RPC 2.0 over a spawned
//! child process's stdin/stdout, using Content-Length framing (the
//! LSP/MCP convention) by default or newline-delimited JSON as an opt-in.
//!
//! The process handle, frame parser, pending-request table, and stderr/
//! stdout diagnostic ring buffers are owned together by [`Connection`] so
//! that `disconnect()` has a single place to tear everything down and
//! reject every outstanding request uniformly.

use super::ToolClient;
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    ContentLength,
    NewlineDelimited,
}

#[derive(Debug, Clone)]
pub struct StdioConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub framing: Framing,
    pub timeout: Duration,
    pub diagnostic_buffer_bytes: usize,
}

impl StdioConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            framing: Framing::ContentLength,
            timeout: Duration::from_millis(crate::settings::DEFAULT_STDIO_TIMEOUT_MS),
            diagnostic_buffer_bytes: 24 * 1024,
        }
    }
}

/// A bounded byte buffer that drops the oldest bytes once it exceeds its cap.
/// Used to retain a diagnostic tail of stderr and non-framed stdout without
/// letting a chatty or misbehaving server grow memory without bound.
#[derive(Debug, Default)]
struct RingBuffer {
    data: VecDeque<u8>,
    cap: usize,
}

impl RingBuffer {
    fn new(cap: usize) -> Self {
        Self { data: VecDeque::with_capacity(cap.min(4096)), cap }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.data.extend(bytes.iter().copied());
        while self.data.len() > self.cap {
            self.data.pop_front();
        }
    }

    fn as_string(&self) -> String {
        let bytes: Vec<u8> = self.data.iter().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

struct Connection {
    child: tokio::process::Child,
    writer_tx: mpsc::UnboundedSender<Vec<u8>>,
    pending: PendingTable,
    next_id: AtomicU64,
    diagnostics: Arc<Mutex<RingBuffer>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

pub struct StdioToolClient {
    config: StdioConfig,
    conn: Mutex<Option<Connection>>,
}

impl StdioToolClient {
    pub fn new(config: StdioConfig) -> Self {
        Self { config, conn: Mutex::new(None) }
    }

    fn encode(framing: Framing, value: &Value) -> Vec<u8> {
        let body = serde_json::to_vec(value).expect("JSON-RPC envelope values are always serializable");
        match framing {
            Framing::ContentLength => {
                let mut framed = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
                framed.extend_from_slice(&body);
                framed
            }
            Framing::NewlineDelimited => {
                let mut framed = body;
                framed.push(b'\n');
                framed
            }
        }
    }

    async fn send_request(&self, conn: &Connection, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = conn.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        conn.pending.lock().await.insert(id, tx);

        let envelope = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let frame = Self::encode(self.config.framing, &envelope);
        if conn.writer_tx.send(frame).is_err() {
            conn.pending.lock().await.remove(&id);
            return Err(OrchestratorError::Transport("stdio writer task has exited".into()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OrchestratorError::Transport("stdio connection closed while awaiting response".into())),
            Err(_) => {
                conn.pending.lock().await.remove(&id);
                let tail = conn.diagnostics.lock().await.as_string();
                Err(OrchestratorError::Transport(format!(
                    "stdio request '{method}' timed out after {timeout:?}; diagnostics tail: {tail}"
                )))
            }
        }
    }

    fn send_notification(conn: &Connection, method: &str, params: Value) {
        let envelope = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        let frame = Self::encode(Framing::ContentLength, &envelope);
        let _ = conn.writer_tx.send(frame);
    }
}

/// Maps the two MCP convenience aliases onto their JSON-RPC wire shape;
/// every other method passes through untouched.
fn apply_method_alias(method: &str, params: Value) -> (String, Value) {
    match method {
        "tools/list" => ("tools/list".to_string(), params),
        "tools/call" => {
            let name = params.get("name").cloned().unwrap_or(Value::Null);
            let arguments = params
                .get("arguments")
                .or_else(|| params.get("args"))
                .cloned()
                .unwrap_or(json!({}));
            ("tools/call".to_string(), json!({ "name": name, "arguments": arguments }))
        }
        other => (other.to_string(), params),
    }
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_content_length(header: &str) -> Option<usize> {
    header
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length:"))
        .and_then(|v| v.trim().parse().ok())
}

/// Lenient frame extractor: prefers Content-Length framing when a header is
/// present, otherwise falls back to splitting on `\n` and parsing each line.
/// Bytes that don't parse as JSON either way are returned as diagnostic
/// "raw" output rather than dropped silently in a way that loses context.
struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn feed(&mut self, chunk: &[u8]) -> (Vec<Value>, Vec<u8>) {
        self.buf.extend_from_slice(chunk);
        let mut parsed = Vec::new();
        let mut raw = Vec::new();

        loop {
            if let Some(header_end) = find_header_terminator(&self.buf) {
                let header_str = String::from_utf8_lossy(&self.buf[..header_end]).into_owned();
                if let Some(len) = parse_content_length(&header_str) {
                    let body_start = header_end + 4;
                    if self.buf.len() < body_start + len {
                        break; // wait for the rest of the body
                    }
                    let body = self.buf[body_start..body_start + len].to_vec();
                    self.buf.drain(..body_start + len);
                    match serde_json::from_slice::<Value>(&body) {
                        Ok(v) => parsed.push(v),
                        Err(_) => raw.extend_from_slice(&body),
                    }
                    continue;
                }
            }

            if let Some(nl) = self.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=nl).collect();
                let trimmed = line.strip_suffix(b"\n").unwrap_or(&line);
                if trimmed.iter().all(|b| b.is_ascii_whitespace()) {
                    continue;
                }
                match serde_json::from_slice::<Value>(trimmed) {
                    Ok(v) => parsed.push(v),
                    Err(_) => raw.extend_from_slice(trimmed),
                }
                continue;
            }

            break;
        }

        (parsed, raw)
    }
}

fn is_response(value: &Value) -> bool {
    value.get("id").is_some() && (value.get("result").is_some() || value.get("error").is_some())
}

fn is_server_request(value: &Value) -> bool {
    value.get("id").is_some() && value.get("method").is_some()
}

fn response_to_result(value: &Value) -> Result<Value> {
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        Err(OrchestratorError::Transport(message))
    } else {
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ToolClient for StdioToolClient {
    async fn connect(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut command = tokio::process::Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(self.config.env.iter().cloned())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| OrchestratorError::Transport(format!("failed to spawn '{}': {e}", self.config.command)))?;

        let mut stdin = child.stdin.take().expect("stdin is piped");
        let mut stdout = child.stdout.take().expect("stdout is piped");
        let mut stderr = child.stderr.take().expect("stderr is piped");

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let diagnostics = Arc::new(Mutex::new(RingBuffer::new(self.config.diagnostic_buffer_bytes)));

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = writer_rx.recv().await {
                if stdin.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_diagnostics = diagnostics.clone();
        let reader_writer_tx = writer_tx.clone();
        let reader_task = tokio::spawn(async move {
            let mut frame_reader = FrameReader::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let (messages, raw) = frame_reader.feed(&buf[..n]);
                if !raw.is_empty() {
                    reader_diagnostics.lock().await.push(&raw);
                }
                for message in messages {
                    if is_response(&message) {
                        if let Some(id) = message.get("id").and_then(Value::as_u64) {
                            if let Some(tx) = reader_pending.lock().await.remove(&id) {
                                let _ = tx.send(response_to_result(&message));
                            }
                        }
                    } else if is_server_request(&message) {
                        let id = message.get("id").cloned().unwrap_or(Value::Null);
                        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
                        let error = if method.starts_with("elicitation/") {
                            json!({ "code": -32601, "message": "elicitation not supported by this client" })
                        } else {
                            json!({ "code": -32601, "message": "method not found" })
                        };
                        let envelope = json!({ "jsonrpc": "2.0", "id": id, "error": error });
                        let frame = StdioToolClient::encode(Framing::ContentLength, &envelope);
                        let _ = reader_writer_tx.send(frame);
                    }
                    // notifications from the server carry no `id`; this client has
                    // nothing that currently needs to observe them.
                }
            }
            // process exited or stdout closed: reject everything still pending
            for (_, tx) in reader_pending.lock().await.drain() {
                let _ = tx.send(Err(OrchestratorError::Transport("tool server process exited".into())));
            }
        });

        let stderr_diagnostics = diagnostics.clone();
        let stderr_task = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => stderr_diagnostics.lock().await.push(&buf[..n]),
                }
            }
        });

        let connection = Connection {
            child,
            writer_tx,
            pending,
            next_id: AtomicU64::new(1),
            diagnostics,
            reader_task,
            writer_task,
            stderr_task,
        };

        // Handshake: tolerated if the server errors or never replies.
        let handshake_params = json!({
            "protocolVersion": "2024-11-05",
            "clientInfo": { "name": "agent-orchestration-core", "version": env!("CARGO_PKG_VERSION") }
        });
        match self.send_request(&connection, "initialize", handshake_params, self.config.timeout).await {
            Ok(_) => Self::send_notification(&connection, "notifications/initialized", json!({})),
            Err(err) => tracing::debug!(%err, "tool server did not complete the initialize handshake; proceeding anyway"),
        }

        *guard = Some(connection);
        Ok(())
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let guard = self.conn.lock().await;
        let Some(conn) = guard.as_ref() else {
            return Err(OrchestratorError::State("stdio tool client is not connected".into()));
        };
        let (method, params) = apply_method_alias(method, params);
        self.send_request(conn, &method, params, self.config.timeout).await
    }

    async fn health_check(&self) -> Result<bool> {
        let mut guard = self.conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            return Ok(false);
        };
        Ok(conn.child.try_wait().ok().flatten().is_none())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let Some(mut conn) = guard.take() else {
            return Ok(()); // already disconnected; idempotent
        };

        drop(conn.writer_tx); // closes stdin once the writer task drains
        let _ = tokio::time::timeout(Duration::from_secs(1), conn.child.wait()).await;
        let _ = conn.child.start_kill();

        conn.reader_task.abort();
        conn.writer_task.abort();
        conn.stderr_task.abort();

        for (_, tx) in conn.pending.lock().await.drain() {
            let _ = tx.send(Err(OrchestratorError::Transport("tool client disconnected".into())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_framing_round_trips() {
        let value = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}});
        let encoded = StdioToolClient::encode(Framing::ContentLength, &value);
        let mut reader = FrameReader::new();
        let (parsed, raw) = reader.feed(&encoded);
        assert!(raw.is_empty());
        assert_eq!(parsed, vec![value]);
    }

    #[test]
    fn newline_delimited_framing_round_trips() {
        let value = json!({"jsonrpc": "2.0", "method": "notifications/initialized", "params": {}});
        let encoded = StdioToolClient::encode(Framing::NewlineDelimited, &value);
        let mut reader = FrameReader::new();
        let (parsed, _raw) = reader.feed(&encoded);
        assert_eq!(parsed, vec![value]);
    }

    #[test]
    fn content_length_framing_handles_partial_chunks() {
        let value = json!({"jsonrpc": "2.0", "id": 7, "result": {"ok": true}});
        let encoded = StdioToolClient::encode(Framing::ContentLength, &value);
        let (first, second) = encoded.split_at(encoded.len() / 2);

        let mut reader = FrameReader::new();
        let (parsed, _) = reader.feed(first);
        assert!(parsed.is_empty());
        let (parsed, _) = reader.feed(second);
        assert_eq!(parsed, vec![value]);
    }

    #[test]
    fn tools_call_packs_name_and_arguments() {
        let (method, params) = apply_method_alias("tools/call", json!({"name": "search", "args": {"q": "x"}}));
        assert_eq!(method, "tools/call");
        assert_eq!(params["name"], json!("search"));
        assert_eq!(params["arguments"], json!({"q": "x"}));
    }

    #[test]
    fn ring_buffer_drops_oldest_bytes_past_capacity() {
        let mut buf = RingBuffer::new(4);
        buf.push(b"abcdef");
        assert_eq!(buf.as_string(), "cdef");
    }
}
