use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use zentara_core::config::{ResolvedServerConfig, route_server_by_path};
use zentara_core::hashing::sha256_hex;

use crate::lsp::{LspClient, LspClientOptions, uri_to_path};
use crate::protocol::{
    Position, Range, SemanticTokensLegend, TextDocumentIdentifier, TextDocumentPositionParams,
    WorkspaceEdit,
};
use crate::provider::CapabilityProvider;
use crate::workspace_edit::{AppliedEdit, EditOptions, apply_workspace_edit};

const PUBLISHED_DIAGNOSTICS_WAIT: Duration = Duration::from_millis(1_500);

#[derive(Debug, Clone)]
struct OpenFileState {
    version: i32,
    last_sha256: String,
}

struct ServerHandle {
    config: ResolvedServerConfig,
    client: LspClient,
    open_files: Mutex<HashMap<PathBuf, OpenFileState>>,
}

impl ServerHandle {
    /// didOpen on first use, didChange whenever the on-disk content hash moves.
    async fn open_or_sync(&self, uri: &str, path: &Path) -> Result<()> {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read file: {path:?}"))?;
        let hash = sha256_hex(&content);
        let text = String::from_utf8(content).context("file is not valid UTF-8")?;

        let mut open = self.open_files.lock().await;
        match open.get_mut(path) {
            None => {
                debug!(server = %self.config.id, "didOpen {uri}");
                self.client
                    .did_open(uri, &self.config.language_id, 1, text)
                    .await?;
                open.insert(
                    path.to_path_buf(),
                    OpenFileState {
                        version: 1,
                        last_sha256: hash,
                    },
                );
            }
            Some(state) if state.last_sha256 != hash => {
                state.version += 1;
                state.last_sha256 = hash;
                debug!(server = %self.config.id, "didChange {uri} version={}", state.version);
                self.client.did_change(uri, state.version, text).await?;
            }
            Some(_) => {}
        }
        Ok(())
    }
}

/// `CapabilityProvider` backed by stdio language servers, routed by file
/// extension and started on first use.
pub struct LanguageServerProvider {
    workspace_root: PathBuf,
    servers: Vec<ResolvedServerConfig>,
    edit_options: EditOptions,
    running: Mutex<HashMap<String, Arc<ServerHandle>>>,
}

impl LanguageServerProvider {
    pub fn new(
        workspace_root: PathBuf,
        servers: Vec<ResolvedServerConfig>,
        edit_options: EditOptions,
    ) -> Self {
        Self {
            workspace_root,
            servers,
            edit_options,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn servers(&self) -> &[ResolvedServerConfig] {
        &self.servers
    }

    pub async fn running_server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.running.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn shutdown(&self) {
        let handles: Vec<Arc<ServerHandle>> =
            self.running.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(err) = handle.client.shutdown().await {
                warn!(server = %handle.config.id, "shutdown failed: {err:#}");
            }
        }
    }

    async fn server(&self, config: &ResolvedServerConfig) -> Result<Arc<ServerHandle>> {
        let mut running = self.running.lock().await;
        if let Some(handle) = running.get(&config.id) {
            return Ok(handle.clone());
        }

        info!(server = %config.id, command = %config.command, "starting language server");
        let client = LspClient::start(LspClientOptions {
            command: config.command.clone(),
            args: config.args.clone(),
            cwd: config.root_dir.clone(),
            env: config.env.clone(),
            initialize_timeout: config.initialize_timeout,
            request_timeout: config.request_timeout,
            initialize_options: config.initialize_options.clone(),
        })
        .await
        .with_context(|| format!("language server {} failed to start", config.id))?;

        let handle = Arc::new(ServerHandle {
            config: config.clone(),
            client,
            open_files: Mutex::new(HashMap::new()),
        });
        running.insert(config.id.clone(), handle.clone());
        Ok(handle)
    }

    /// Routes `uri` to its server and syncs the document before a request.
    async fn prepare(&self, uri: &str) -> Result<Arc<ServerHandle>> {
        let path = uri_to_path(uri)?;
        let path = path.canonicalize().unwrap_or(path);
        let config = route_server_by_path(&path, &self.servers)
            .ok_or_else(|| anyhow!("no language server configured for {path:?}"))?;
        let handle = self.server(config).await?;
        handle.open_or_sync(uri, &path).await?;
        Ok(handle)
    }

    async fn document_request(&self, uri: &str, method: &str, params: Value) -> Result<Value> {
        let handle = self.prepare(uri).await?;
        handle.client.send_request(method, &params, None).await
    }

    async fn position_request(
        &self,
        method: &str,
        params: &TextDocumentPositionParams,
    ) -> Result<Value> {
        self.document_request(params.uri(), method, serde_json::to_value(params)?)
            .await
    }

    /// Hierarchy follow-ups carry their own `uri` in the item.
    async fn item_request(&self, method: &str, item: &Value) -> Result<Value> {
        let uri = item
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("hierarchy item has no uri"))?;
        self.document_request(uri, method, json!({ "item": item }))
            .await
    }
}

#[async_trait]
impl CapabilityProvider for LanguageServerProvider {
    async fn definition(&self, params: &TextDocumentPositionParams) -> Result<Value> {
        self.position_request("textDocument/definition", params).await
    }

    async fn declaration(&self, params: &TextDocumentPositionParams) -> Result<Value> {
        self.position_request("textDocument/declaration", params).await
    }

    async fn type_definition(&self, params: &TextDocumentPositionParams) -> Result<Value> {
        self.position_request("textDocument/typeDefinition", params)
            .await
    }

    async fn implementation(&self, params: &TextDocumentPositionParams) -> Result<Value> {
        self.position_request("textDocument/implementation", params)
            .await
    }

    async fn references(
        &self,
        params: &TextDocumentPositionParams,
        include_declaration: bool,
    ) -> Result<Value> {
        let body = json!({
            "textDocument": params.text_document,
            "position": params.position,
            "context": { "includeDeclaration": include_declaration }
        });
        self.document_request(params.uri(), "textDocument/references", body)
            .await
    }

    async fn hover(&self, params: &TextDocumentPositionParams) -> Result<Value> {
        self.position_request("textDocument/hover", params).await
    }

    async fn document_highlights(&self, params: &TextDocumentPositionParams) -> Result<Value> {
        self.position_request("textDocument/documentHighlight", params)
            .await
    }

    async fn signature_help(&self, params: &TextDocumentPositionParams) -> Result<Value> {
        self.position_request("textDocument/signatureHelp", params)
            .await
    }

    async fn completion(
        &self,
        params: &TextDocumentPositionParams,
        trigger_character: Option<&str>,
    ) -> Result<Value> {
        let context = match trigger_character {
            Some(ch) => json!({ "triggerKind": 2, "triggerCharacter": ch }),
            None => json!({ "triggerKind": 1 }),
        };
        let body = json!({
            "textDocument": params.text_document,
            "position": params.position,
            "context": context
        });
        self.document_request(params.uri(), "textDocument/completion", body)
            .await
    }

    async fn document_symbols(&self, uri: &str) -> Result<Value> {
        let body = json!({ "textDocument": TextDocumentIdentifier::new(uri) });
        self.document_request(uri, "textDocument/documentSymbol", body)
            .await
    }

    async fn workspace_symbols(&self, query: &str) -> Result<Value> {
        let mut handles: Vec<Arc<ServerHandle>> =
            self.running.lock().await.values().cloned().collect();
        if handles.is_empty() {
            let first = self
                .servers
                .first()
                .ok_or_else(|| anyhow!("no language server configured"))?;
            handles.push(self.server(first).await?);
        }

        let mut merged = Vec::new();
        for handle in handles {
            let value = handle
                .client
                .send_request("workspace/symbol", &json!({ "query": query }), None)
                .await?;
            if let Value::Array(items) = value {
                merged.extend(items);
            }
        }
        Ok(Value::Array(merged))
    }

    async fn rename(&self, params: &TextDocumentPositionParams, new_name: &str) -> Result<Value> {
        let body = json!({
            "textDocument": params.text_document,
            "position": params.position,
            "newName": new_name
        });
        self.document_request(params.uri(), "textDocument/rename", body)
            .await
    }

    async fn code_actions(&self, uri: &str, range: Range, context: Value) -> Result<Value> {
        let context = if context.is_null() {
            json!({ "diagnostics": [] })
        } else {
            context
        };
        let body = json!({
            "textDocument": TextDocumentIdentifier::new(uri),
            "range": range,
            "context": context
        });
        self.document_request(uri, "textDocument/codeAction", body)
            .await
    }

    async fn code_lens(&self, uri: &str) -> Result<Value> {
        let body = json!({ "textDocument": TextDocumentIdentifier::new(uri) });
        self.document_request(uri, "textDocument/codeLens", body)
            .await
    }

    async fn selection_ranges(&self, uri: &str, positions: &[Position]) -> Result<Value> {
        let body = json!({
            "textDocument": TextDocumentIdentifier::new(uri),
            "positions": positions
        });
        self.document_request(uri, "textDocument/selectionRange", body)
            .await
    }

    async fn semantic_tokens(&self, uri: &str) -> Result<Value> {
        let body = json!({ "textDocument": TextDocumentIdentifier::new(uri) });
        self.document_request(uri, "textDocument/semanticTokens/full", body)
            .await
    }

    async fn semantic_tokens_legend(&self, uri: &str) -> Result<Option<SemanticTokensLegend>> {
        let handle = self.prepare(uri).await?;
        Ok(handle.client.semantic_tokens_legend().await)
    }

    async fn prepare_call_hierarchy(&self, params: &TextDocumentPositionParams) -> Result<Value> {
        self.position_request("textDocument/prepareCallHierarchy", params)
            .await
    }

    async fn incoming_calls(&self, item: &Value) -> Result<Value> {
        self.item_request("callHierarchy/incomingCalls", item).await
    }

    async fn outgoing_calls(&self, item: &Value) -> Result<Value> {
        self.item_request("callHierarchy/outgoingCalls", item).await
    }

    async fn prepare_type_hierarchy(&self, params: &TextDocumentPositionParams) -> Result<Value> {
        self.position_request("textDocument/prepareTypeHierarchy", params)
            .await
    }

    async fn supertypes(&self, item: &Value) -> Result<Value> {
        self.item_request("typeHierarchy/supertypes", item).await
    }

    async fn subtypes(&self, item: &Value) -> Result<Value> {
        self.item_request("typeHierarchy/subtypes", item).await
    }

    async fn diagnostics(&self, uri: &str) -> Result<Value> {
        let handle = self.prepare(uri).await?;
        let pulled = handle
            .client
            .document_diagnostics(uri, handle.config.request_timeout)
            .await?;
        let diagnostics = match pulled {
            Some(diagnostics) => diagnostics,
            None => {
                handle
                    .client
                    .wait_for_diagnostics(uri, PUBLISHED_DIAGNOSTICS_WAIT)
                    .await
            }
        };
        Ok(serde_json::to_value(diagnostics)?)
    }

    async fn document_text(&self, uri: &str) -> Result<String> {
        let path = uri_to_path(uri)?;
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read file: {path:?}"))
    }

    async fn apply_workspace_edit(&self, edit: &WorkspaceEdit) -> Result<AppliedEdit> {
        apply_workspace_edit(&self.workspace_root, edit, &self.edit_options).await
    }
}
