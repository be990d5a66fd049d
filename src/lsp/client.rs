//! LSP JSON-RPC client
//!
//! Handles low-level JSON-RPC 2.0 communication with clangd via stdin/stdout
//! pipes. URIs in messages are already in wire form at this level.

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, trace};

use super::launch::ClangdLaunch;
use super::types::LspError;

/// JSON-RPC request ID type
pub type RequestId = i64;

/// Request/notification channel to a language server
pub trait LanguageServerConnection: Send + Sync {
    fn request(&self, method: &str, params: Value) -> Result<Value, LspError>;
    fn notify(&self, method: &str, params: Value) -> Result<(), LspError>;

    /// Stop the server; further calls fail
    fn shutdown(&self) -> Result<(), LspError> {
        Ok(())
    }
}

/// LSP client for a spawned clangd process
pub struct LspClient {
    /// Server process
    process: Mutex<Child>,
    /// Stdin for sending requests, closed on shutdown
    stdin: Mutex<Option<ChildStdin>>,
    /// Stdout for reading responses
    stdout: Mutex<BufReader<ChildStdout>>,
    /// Next request ID
    next_id: AtomicI64,
    /// Set once shutdown has been attempted
    shut_down: AtomicBool,
}

impl LspClient {
    /// Spawn clangd as described by `launch`
    pub fn spawn(launch: &ClangdLaunch) -> Result<Self, LspError> {
        let mut command = Command::new(&launch.command);
        command
            .args(&launch.args)
            .envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(cwd) = &launch.cwd {
            command.current_dir(cwd);
        }

        let mut process = command
            .spawn()
            .map_err(|e| LspError::SpawnFailed(format!("{}: {}", launch.command, e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| LspError::SpawnFailed("Failed to open stdin".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| LspError::SpawnFailed("Failed to open stdout".to_string()))?;

        debug!(command = %launch.command, args = ?launch.args, "spawned clangd");

        Ok(Self {
            process: Mutex::new(process),
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(BufReader::new(stdout)),
            next_id: AtomicI64::new(1),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Initialize the server (must be called before any other requests)
    ///
    /// Returns the server's `InitializeResult`.
    pub fn initialize(
        &self,
        root_uri: &str,
        initialization_options: Value,
    ) -> Result<Value, LspError> {
        let params = json!({
            "processId": std::process::id(),
            "rootUri": root_uri,
            "initializationOptions": initialization_options,
            "capabilities": {
                "textDocument": {
                    "completion": {
                        "editsNearCursor": true
                    },
                    "synchronization": {
                        "didSave": true
                    },
                    "publishDiagnostics": {
                        "relatedInformation": true
                    }
                },
                "workspace": {
                    "workspaceFolders": true,
                    "didChangeConfiguration": {
                        "dynamicRegistration": false
                    }
                }
            },
            "workspaceFolders": [{
                "uri": root_uri,
                "name": "workspace"
            }]
        });

        let response = self
            .request("initialize", params)
            .map_err(|e| LspError::InitializationFailed(e.to_string()))?;

        if let Some(info) = response.get("serverInfo") {
            debug!(server = %info, "clangd initialized");
        }
        self.notify("initialized", json!({}))?;

        Ok(response)
    }

    fn send(&self, message: &Value) -> Result<(), LspError> {
        let mut stdin = self.stdin.lock().unwrap_or_else(PoisonError::into_inner);
        let stdin = stdin.as_mut().ok_or(LspError::ServerShutdown)?;
        write_message(stdin, message)
    }

    /// Read until the response to `expected_id` arrives (blocking)
    fn read_response(&self, expected_id: RequestId) -> Result<Value, LspError> {
        let mut stdout = self.stdout.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            let message = read_message(&mut *stdout)?.ok_or(LspError::ServerShutdown)?;
            let id = message.get("id");
            let method = message.get("method").and_then(|v| v.as_str());

            match (id, method) {
                // Response
                (Some(id), None) => {
                    if id.as_i64() != Some(expected_id) {
                        trace!(id = %id, "dropping response to an abandoned request");
                        continue;
                    }
                    if let Some(error) = message.get("error") {
                        let code = error.get("code").and_then(|v| v.as_i64()).unwrap_or(-1) as i32;
                        let msg = error
                            .get("message")
                            .and_then(|v| v.as_str())
                            .unwrap_or("Unknown error")
                            .to_string();
                        return Err(LspError::RpcError { code, message: msg });
                    }
                    return Ok(message.get("result").cloned().unwrap_or(Value::Null));
                }
                // Server -> client request: answer with an empty result so the
                // server does not wait on us
                (Some(id), Some(method)) => {
                    trace!(method = %method, "answering server request");
                    self.send(&json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": Value::Null
                    }))?;
                }
                (None, Some(method)) => trace!(method = %method, "notification"),
                (None, None) => {
                    return Err(LspError::ParseError(
                        "Message is neither request nor response".to_string(),
                    ))
                }
            }
        }
    }
}

impl LanguageServerConnection for LspClient {
    /// Send a request and wait for response (synchronous)
    fn request(&self, method: &str, params: Value) -> Result<Value, LspError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        }))?;

        self.read_response(id)
    }

    /// Send a notification (no response expected)
    fn notify(&self, method: &str, params: Value) -> Result<(), LspError> {
        self.send(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        }))
    }

    /// Shutdown the server gracefully
    fn shutdown(&self) -> Result<(), LspError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.request("shutdown", Value::Null);
        let _ = self.notify("exit", Value::Null);
        self.stdin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut process = self.process.lock().unwrap_or_else(PoisonError::into_inner);
        process.wait()?;
        debug!("clangd exited");

        Ok(())
    }
}

impl Drop for LspClient {
    fn drop(&mut self) {
        // Try to shutdown gracefully
        let _ = self.shutdown();
    }
}

/// Write one `Content-Length` framed JSON-RPC message
pub fn write_message<W: Write>(writer: &mut W, message: &Value) -> Result<(), LspError> {
    let content = serde_json::to_string(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", content.len());

    writer.write_all(header.as_bytes())?;
    writer.write_all(content.as_bytes())?;
    writer.flush()?;

    Ok(())
}

/// Read one framed JSON-RPC message, `None` at end of stream
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<Value>, LspError> {
    let mut content_length = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim();

        if line.is_empty() {
            break;
        }

        if let Some(len_str) = line.strip_prefix("Content-Length:") {
            content_length = Some(
                len_str
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| LspError::ParseError("Invalid Content-Length".to_string()))?,
            );
        }
    }

    let content_length = content_length
        .ok_or_else(|| LspError::ParseError("Missing Content-Length".to_string()))?;

    let mut content = vec![0u8; content_length];
    reader.read_exact(&mut content)?;

    Ok(Some(serde_json::from_slice(&content)?))
}
