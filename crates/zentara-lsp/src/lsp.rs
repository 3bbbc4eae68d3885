use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, Notify, oneshot};
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};
use url::Url;

use crate::protocol::{Diagnostic, PublishDiagnosticsParams, SemanticTokensLegend};

#[derive(Debug, Clone)]
pub struct LspClientOptions {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub initialize_timeout: Duration,
    pub request_timeout: Duration,
    pub initialize_options: Option<Value>,
}

#[derive(Debug)]
struct PendingRequests {
    next_id: i64,
    pending: HashMap<i64, oneshot::Sender<Value>>,
}

/// JSON-RPC client for one language server process over stdio.
pub struct LspClient {
    stdin: Arc<Mutex<ChildStdin>>,
    state: Arc<Mutex<PendingRequests>>,
    child: Mutex<Child>,
    diagnostics: Arc<Mutex<HashMap<String, Vec<Diagnostic>>>>,
    diagnostics_notify: Arc<Notify>,
    capabilities: Mutex<Value>,
    root_uri: String,
    diagnostic_pull_supported: AtomicU8, // 0=unknown, 1=yes, 2=no
    default_request_timeout: Duration,
}

impl LspClient {
    pub async fn start(options: LspClientOptions) -> Result<Self> {
        let mut command = Command::new(&options.command);
        command
            .args(&options.args)
            .envs(&options.env)
            .current_dir(&options.cwd)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn language server: {}", options.command))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture language server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture language server stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("failed to capture language server stderr"))?;

        let client = Self {
            stdin: Arc::new(Mutex::new(stdin)),
            state: Arc::new(Mutex::new(PendingRequests {
                next_id: 1,
                pending: HashMap::new(),
            })),
            child: Mutex::new(child),
            diagnostics: Arc::new(Mutex::new(HashMap::new())),
            diagnostics_notify: Arc::new(Notify::new()),
            capabilities: Mutex::new(Value::Null),
            root_uri: Url::from_directory_path(&options.cwd)
                .map_err(|_| anyhow!("failed to build rootUri for {:?}", options.cwd))?
                .to_string(),
            diagnostic_pull_supported: AtomicU8::new(0),
            default_request_timeout: options.request_timeout,
        };

        client.spawn_stdout_reader(stdout);
        spawn_stderr_logger(stderr);

        client
            .initialize(options.initialize_timeout, options.initialize_options)
            .await
            .context("language server not initialized")?;

        Ok(client)
    }

    pub async fn did_open(
        &self,
        uri: &str,
        language_id: &str,
        version: i32,
        text: String,
    ) -> Result<()> {
        self.send_notification(
            "textDocument/didOpen",
            &json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": language_id,
                    "version": version,
                    "text": text
                }
            }),
        )
        .await
    }

    pub async fn did_change(&self, uri: &str, version: i32, text: String) -> Result<()> {
        self.send_notification(
            "textDocument/didChange",
            &json!({
                "textDocument": { "uri": uri, "version": version },
                "contentChanges": [ { "text": text } ]
            }),
        )
        .await
    }

    /// Server capabilities from the `initialize` response.
    pub async fn capabilities(&self) -> Value {
        self.capabilities.lock().await.clone()
    }

    pub async fn semantic_tokens_legend(&self) -> Option<SemanticTokensLegend> {
        let caps = self.capabilities().await;
        let legend = caps.get("semanticTokensProvider")?.get("legend")?.clone();
        serde_json::from_value(legend).ok()
    }

    /// Pull diagnostics when the server supports `textDocument/diagnostic`,
    /// otherwise `None` so callers fall back to published diagnostics.
    pub async fn document_diagnostics(
        &self,
        uri: &str,
        request_timeout: Duration,
    ) -> Result<Option<Vec<Diagnostic>>> {
        if self.diagnostic_pull_supported.load(Ordering::Relaxed) == 2 {
            return Ok(None);
        }

        let params = json!({
            "textDocument": { "uri": uri },
            "identifier": null,
            "previousResultId": null
        });

        match self
            .send_request("textDocument/diagnostic", &params, Some(request_timeout))
            .await
        {
            Ok(value) => {
                self.diagnostic_pull_supported.store(1, Ordering::Relaxed);
                parse_document_diagnostic_report(value).map(Some)
            }
            Err(err) => {
                if is_method_not_found(&err) {
                    self.diagnostic_pull_supported.store(2, Ordering::Relaxed);
                    return Ok(None);
                }
                Err(err)
            }
        }
    }

    pub async fn wait_for_diagnostics(&self, uri: &str, max_wait: Duration) -> Vec<Diagnostic> {
        {
            let guard = self.diagnostics.lock().await;
            if let Some(existing) = guard.get(uri) {
                return existing.clone();
            }
        }

        let _ = timeout(max_wait, self.diagnostics_notify.notified()).await;

        let guard = self.diagnostics.lock().await;
        guard.get(uri).cloned().unwrap_or_default()
    }

    pub async fn send_request<T: Serialize>(
        &self,
        method: &str,
        params: &T,
        request_timeout: Option<Duration>,
    ) -> Result<Value> {
        let (id, rx) = {
            let mut state = self.state.lock().await;
            let id = state.next_id;
            state.next_id += 1;
            let (tx, rx) = oneshot::channel();
            state.pending.insert(id, tx);
            (id, rx)
        };

        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        write_message(&self.stdin, &request).await?;

        let wait = request_timeout.unwrap_or(self.default_request_timeout);
        let response_value = match timeout(wait, rx).await {
            Ok(Ok(value)) => value,
            Ok(Err(_)) => return Err(anyhow!("language server response channel closed: {method}")),
            Err(_) => {
                self.state.lock().await.pending.remove(&id);
                return Err(anyhow!("language server request timed out: {method}"));
            }
        };

        if let Some(error) = response_value.get("error") {
            return Err(anyhow!("LSP error for {method}: {error}"));
        }

        Ok(response_value.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn send_notification<T: Serialize>(&self, method: &str, params: &T) -> Result<()> {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        write_message(&self.stdin, &notification).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        // Graceful first; kill regardless so the child never lingers.
        let _ = self
            .send_request("shutdown", &Value::Null, Some(Duration::from_secs(2)))
            .await;
        let _ = self.send_notification("exit", &Value::Null).await;

        let mut child = self.child.lock().await;
        let _ = child.kill().await;
        let _ = child.wait().await;
        Ok(())
    }

    async fn initialize(
        &self,
        initialize_timeout: Duration,
        initialize_options: Option<Value>,
    ) -> Result<()> {
        let mut params = json!({
            "processId": std::process::id(),
            "rootUri": self.root_uri,
            "capabilities": {
                "textDocument": {
                    "documentSymbol": { "hierarchicalDocumentSymbolSupport": true },
                    "hover": { "contentFormat": ["markdown", "plaintext"] },
                    "completion": { "completionItem": { "snippetSupport": false } },
                    "callHierarchy": { "dynamicRegistration": false },
                    "typeHierarchy": { "dynamicRegistration": false },
                    "semanticTokens": {
                        "requests": { "full": true },
                        "tokenTypes": [],
                        "tokenModifiers": [],
                        "formats": ["relative"]
                    },
                    "publishDiagnostics": { "relatedInformation": false }
                },
                "workspace": {
                    "workspaceEdit": { "documentChanges": true },
                    "configuration": true,
                    "workspaceFolders": true
                }
            },
            "workspaceFolders": [
                { "uri": self.root_uri, "name": "workspace" }
            ]
        });
        if let (Some(options), Some(obj)) = (initialize_options, params.as_object_mut()) {
            obj.insert("initializationOptions".to_string(), options);
        }

        let result = self
            .send_request("initialize", &params, Some(initialize_timeout))
            .await?;
        *self.capabilities.lock().await = result
            .get("capabilities")
            .cloned()
            .unwrap_or(Value::Null);

        self.send_notification("initialized", &json!({})).await?;
        Ok(())
    }

    fn spawn_stdout_reader(&self, stdout: ChildStdout) {
        let pending = self.state.clone();
        let stdin = self.stdin.clone();
        let diagnostics = self.diagnostics.clone();
        let diagnostics_notify = self.diagnostics_notify.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            loop {
                match read_lsp_message(&mut reader).await {
                    Ok(Some(message)) => {
                        handle_lsp_message(
                            message,
                            &pending,
                            &stdin,
                            &diagnostics,
                            &diagnostics_notify,
                        )
                        .await;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!("failed to read language server message: {err:#}");
                        break;
                    }
                }
            }
            // Wake every waiter so nothing blocks on a dead server.
            pending.lock().await.pending.clear();
        });
    }
}

pub fn is_method_not_found(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("-32601") || msg.contains("method not found")
}

fn parse_document_diagnostic_report(value: Value) -> Result<Vec<Diagnostic>> {
    // DocumentDiagnosticReport: { kind: "full", items } or { kind: "unchanged" }.
    let Some(items) = value.get("items").and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    serde_json::from_value(Value::Array(items.clone())).context("failed to parse Diagnostic[]")
}

async fn handle_lsp_message(
    message: Value,
    state: &Mutex<PendingRequests>,
    stdin: &Mutex<ChildStdin>,
    diagnostics: &Mutex<HashMap<String, Vec<Diagnostic>>>,
    diagnostics_notify: &Notify,
) {
    if let Some(method) = message.get("method").and_then(|m| m.as_str()) {
        if let Some(id) = message.get("id") {
            let result = server_request_result(method, message.get("params"));
            let response = json!({ "jsonrpc": "2.0", "id": id, "result": result });
            if let Err(err) = write_message(stdin, &response).await {
                warn!("failed to answer server request {method}: {err:#}");
            }
            return;
        }

        if method == "textDocument/publishDiagnostics"
            && let Some(params) = message.get("params")
        {
            match serde_json::from_value::<PublishDiagnosticsParams>(params.clone()) {
                Ok(p) => {
                    diagnostics.lock().await.insert(p.uri, p.diagnostics);
                    diagnostics_notify.notify_waiters();
                }
                Err(err) => warn!("failed to parse publishDiagnostics params: {err:#}"),
            }
        }
        return;
    }

    let id = match message.get("id") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        _ => None,
    };

    if let Some(id) = id {
        let tx = state.lock().await.pending.remove(&id);
        match tx {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => debug!("received response for unknown id: {id}"),
        }
    }
}

/// Minimal answers for requests servers send to the client.
fn server_request_result(method: &str, params: Option<&Value>) -> Value {
    match method {
        "workspace/configuration" => {
            let count = params
                .and_then(|p| p.get("items"))
                .and_then(|i| i.as_array())
                .map(Vec::len)
                .unwrap_or(0);
            Value::Array(vec![Value::Null; count])
        }
        "workspace/applyEdit" => json!({ "applied": false }),
        "workspace/workspaceFolders" => Value::Array(Vec::new()),
        _ => Value::Null,
    }
}

async fn write_message(stdin: &Mutex<ChildStdin>, value: &Value) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut stdin = stdin.lock().await;
    stdin.write_all(header.as_bytes()).await?;
    stdin.write_all(&body).await?;
    stdin.flush().await?;
    Ok(())
}

async fn read_lsp_message<R>(reader: &mut BufReader<R>) -> Result<Option<Value>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let line_trimmed = line.trim_end_matches(['\r', '\n']);
        if line_trimmed.is_empty() {
            break;
        }

        if let Some(value) = line_trimmed.strip_prefix("Content-Length:") {
            content_length = value.trim().parse::<usize>().ok();
        }
    }

    let Some(len) = content_length else {
        return Err(anyhow!("missing Content-Length header"));
    };

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    let value: Value = serde_json::from_slice(&buf)?;
    Ok(Some(value))
}

fn spawn_stderr_logger(stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => debug!(target: "lsp.stderr", "{}", line.trim_end()),
            }
        }
    });
}

pub fn path_to_uri(path: &Path) -> Result<String> {
    Url::from_file_path(path)
        .map_err(|_| anyhow!("failed to convert path to file URI: {path:?}"))
        .map(|u| u.to_string())
}

pub fn uri_to_path(uri: &str) -> Result<PathBuf> {
    let url = Url::parse(uri).with_context(|| format!("invalid URI: {uri}"))?;
    if url.scheme() != "file" {
        return Err(anyhow!("unsupported URI scheme: {}", url.scheme()));
    }
    url.to_file_path()
        .map_err(|_| anyhow!("failed to convert URI to path: {uri}"))
}
