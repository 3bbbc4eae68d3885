use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use zentara_core::snippet::extract_lines;
use zentara_lsp::CapabilityProvider;
use zentara_lsp::protocol::{DocumentSymbol, WorkspaceEdit};
use zentara_lsp::symbol::{parse_document_symbols, parse_workspace_symbols, symbol_kind_name};

use crate::envelope::ResultEnvelope;
use crate::error::{ToolError, classify};
use crate::host::{ApprovalDecision, ApprovalRequest, ToolHost, ToolOutcome, ToolUse};
use crate::normalize;
use crate::operation::LspOperation;
use crate::params::{GetSymbolsRequest, InsertRequest, OperationRequest, PositionRequest};
use crate::symbols::{
    NamePath, SymbolRow, container_segments, insert_after, insert_before, join_path,
    matching_rows, render_table, replace_body, symbol_at_position, top_level_rows,
};

const BODY_MAX_CHARS: usize = 20_000;

/// Single entry point for the `lsp` tool.
pub struct LspToolDispatcher {
    provider: Arc<dyn CapabilityProvider>,
    request_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
enum SymbolEdit {
    Before,
    After,
    Replace,
}

impl LspToolDispatcher {
    pub fn new(provider: Arc<dyn CapabilityProvider>, request_timeout: Duration) -> Self {
        Self {
            provider,
            request_timeout,
        }
    }

    pub fn provider(&self) -> &Arc<dyn CapabilityProvider> {
        &self.provider
    }

    /// Runs one tool call and pushes exactly one envelope to `host`.
    /// Never fails; the returned outcome says how the call ended.
    pub async fn dispatch(&self, host: &dyn ToolHost, block: &ToolUse) -> ToolOutcome {
        let (envelope, outcome) = match self.execute(host, block).await {
            Ok(envelope) => (envelope, ToolOutcome::Succeeded),
            Err(err) => {
                let outcome = err.outcome();
                match &err {
                    ToolError::Unexpected { operation, error } => {
                        warn!("lsp operation {operation} failed: {error:#}");
                        host.handle_error(&format!("executing lsp operation {operation}"), error)
                            .await;
                    }
                    other => debug!("lsp tool call ended with {outcome:?}: {other}"),
                }
                (ResultEnvelope::failure(err.to_string()), outcome)
            }
        };
        host.push_result(envelope.to_text()).await;
        outcome
    }

    async fn execute(
        &self,
        host: &dyn ToolHost,
        block: &ToolUse,
    ) -> Result<ResultEnvelope, ToolError> {
        let name = block
            .params
            .lsp_operation
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::MissingParameter {
                operation: block.name.clone(),
                field: "lsp_operation".to_string(),
            })?;
        let operation = LspOperation::from_name(name).ok_or_else(|| ToolError::UnknownOperation {
            name: name.to_string(),
        })?;

        let payload = match block.params.text.as_deref().map(str::trim) {
            None | Some("") => json!({}),
            Some(text) => serde_json::from_str::<Value>(text).map_err(ToolError::MalformedJson)?,
        };
        let request = OperationRequest::parse(operation, payload.clone())?;

        if operation.is_mutating() {
            let approval = ApprovalRequest {
                tool: block.name.clone(),
                lsp_operation: operation.name().to_string(),
                params: payload,
            };
            match host.ask_approval(&approval).await {
                Ok(ApprovalDecision::Approved) => {}
                Ok(ApprovalDecision::Denied { feedback }) => {
                    info!(operation = %operation, "lsp operation denied");
                    return Err(ToolError::Denied { feedback });
                }
                Err(err) => {
                    return Err(ToolError::unexpected(
                        operation,
                        err.context("approval prompt failed"),
                    ));
                }
            }
        }

        debug!(operation = %operation, "invoking capability provider");
        self.invoke(operation, request).await
    }

    /// Bounds one provider call by the request timeout and classifies its failure.
    async fn call<T, F>(&self, operation: LspOperation, fut: F) -> Result<T, ToolError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match timeout(self.request_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(classify(operation, err)),
            Err(_) => Err(ToolError::EnvironmentUnavailable {
                operation: operation.name().to_string(),
                message: format!(
                    "capability provider timed out after {}ms",
                    self.request_timeout.as_millis()
                ),
            }),
        }
    }

    async fn invoke(
        &self,
        operation: LspOperation,
        request: OperationRequest,
    ) -> Result<ResultEnvelope, ToolError> {
        let p = self.provider.as_ref();
        let shape = |result: anyhow::Result<Value>| {
            result
                .map(ResultEnvelope::ok)
                .map_err(|err| ToolError::unexpected(operation, err))
        };

        match request {
            OperationRequest::FindUsages(req) => {
                let value = self
                    .call(
                        operation,
                        p.references(&req.at.lsp(), req.include_declaration()),
                    )
                    .await?;
                shape(normalize::locations(value))
            }
            OperationRequest::GoToDefinition(req) => {
                let value = self.call(operation, p.definition(&req.lsp())).await?;
                shape(normalize::locations(value))
            }
            OperationRequest::GetDeclaration(req) => {
                let value = self.call(operation, p.declaration(&req.lsp())).await?;
                shape(normalize::locations(value))
            }
            OperationRequest::GetTypeDefinition(req) => {
                let value = self.call(operation, p.type_definition(&req.lsp())).await?;
                shape(normalize::locations(value))
            }
            OperationRequest::FindImplementations(req) => {
                let value = self.call(operation, p.implementation(&req.lsp())).await?;
                shape(normalize::locations(value))
            }
            OperationRequest::GetHoverInfo(req) => {
                let value = self.call(operation, p.hover(&req.lsp())).await?;
                Ok(ResultEnvelope::ok(normalize::hover(value)))
            }
            OperationRequest::GetDocumentHighlights(req) => {
                let value = self
                    .call(operation, p.document_highlights(&req.lsp()))
                    .await?;
                shape(normalize::nullable_list(value))
            }
            OperationRequest::GetSignatureHelp(req) => {
                let value = self.call(operation, p.signature_help(&req.lsp())).await?;
                Ok(ResultEnvelope::ok(value))
            }
            OperationRequest::GetCompletions(req) => {
                let value = self
                    .call(
                        operation,
                        p.completion(&req.at.lsp(), req.trigger_character.as_deref()),
                    )
                    .await?;
                shape(normalize::completions(value))
            }
            OperationRequest::GetDocumentSymbols(req) => {
                let value = self.call(operation, p.document_symbols(req.uri())).await?;
                shape(normalize::document_symbols(value))
            }
            OperationRequest::GetWorkspaceSymbols(req) => {
                let value = self
                    .call(operation, p.workspace_symbols(&req.query))
                    .await?;
                let infos = parse_workspace_symbols(value)
                    .map_err(|err| ToolError::unexpected(operation, err))?;
                let rows: Vec<SymbolRow> = infos
                    .into_iter()
                    .map(|info| {
                        let ancestors = container_segments(info.container_name.as_deref());
                        SymbolRow {
                            name_path: join_path(&ancestors, &info.name),
                            kind: info.kind,
                            uri: info.location.uri.clone(),
                            position: info.location.range.start,
                            body: None,
                        }
                    })
                    .collect();
                Ok(ResultEnvelope::table(render_table(&rows)))
            }
            OperationRequest::GetSymbolsOverview(req) => {
                let symbols = self.document_symbols(operation, req.uri()).await?;
                Ok(ResultEnvelope::table(render_table(&top_level_rows(
                    &symbols,
                    req.uri(),
                ))))
            }
            OperationRequest::GetSymbols(req) => self.get_symbols(operation, req).await,
            OperationRequest::GetSymbolCodeSnippet(req) => {
                self.symbol_code_snippet(operation, req).await
            }
            OperationRequest::GetCodeActions(req) => {
                let value = self
                    .call(
                        operation,
                        p.code_actions(req.text_document.uri.as_str(), req.range, req.context),
                    )
                    .await?;
                shape(normalize::list(value))
            }
            OperationRequest::GetCodeLens(req) => {
                let value = self.call(operation, p.code_lens(req.uri())).await?;
                shape(normalize::nullable_list(value))
            }
            OperationRequest::GetSelectionRange(req) => {
                let value = self
                    .call(operation, p.selection_ranges(req.uri(), &[req.position]))
                    .await?;
                shape(normalize::list(value))
            }
            OperationRequest::GetSemanticTokens(req) => {
                let value = self.call(operation, p.semantic_tokens(req.uri())).await?;
                if value.is_null() {
                    return Ok(ResultEnvelope::ok(json!([])));
                }
                let legend = self
                    .call(operation, p.semantic_tokens_legend(req.uri()))
                    .await?
                    .ok_or_else(|| ToolError::Unsupported {
                        operation: operation.name().to_string(),
                        message: "SemanticTokens legend not available".to_string(),
                    })?;
                shape(normalize::semantic_tokens(value, &legend))
            }
            OperationRequest::GetCallHierarchy(req) => {
                let prepared = self
                    .call(operation, p.prepare_call_hierarchy(&req.lsp()))
                    .await?;
                let Some(item) = first_item(prepared) else {
                    return Ok(ResultEnvelope::ok_null());
                };
                let incoming = self.call(operation, p.incoming_calls(&item)).await?;
                let outgoing = self.call(operation, p.outgoing_calls(&item)).await?;
                shape(hierarchy(item, "incoming", incoming, "outgoing", outgoing))
            }
            OperationRequest::GetTypeHierarchy(req) => {
                let prepared = self
                    .call(operation, p.prepare_type_hierarchy(&req.lsp()))
                    .await?;
                let Some(item) = first_item(prepared) else {
                    return Ok(ResultEnvelope::ok_null());
                };
                let supertypes = self.call(operation, p.supertypes(&item)).await?;
                let subtypes = self.call(operation, p.subtypes(&item)).await?;
                shape(hierarchy(item, "supertypes", supertypes, "subtypes", subtypes))
            }
            OperationRequest::GetDiagnostics(req) => {
                let value = self.call(operation, p.diagnostics(req.uri())).await?;
                shape(normalize::diagnostics(value))
            }
            OperationRequest::Rename(req) => {
                let value = self
                    .call(operation, p.rename(&req.at.lsp(), &req.new_name))
                    .await?;
                let no_edits = || {
                    ToolError::NoTarget(format!(
                        "No rename edits produced at {}",
                        location_label(&req.at)
                    ))
                };
                if value.is_null() {
                    return Err(no_edits());
                }
                let edit = WorkspaceEdit::from_value(value.clone())
                    .map_err(|err| ToolError::unexpected(operation, err))?;
                if edit.is_empty() {
                    return Err(no_edits());
                }
                let applied = self.call(operation, p.apply_workspace_edit(&edit)).await?;
                info!(
                    files = applied.files_modified.len(),
                    "rename applied to workspace"
                );
                Ok(ResultEnvelope::ok(value))
            }
            OperationRequest::InsertBeforeSymbol(req) => {
                self.edit_symbol(operation, req, SymbolEdit::Before).await
            }
            OperationRequest::InsertAfterSymbol(req) => {
                self.edit_symbol(operation, req, SymbolEdit::After).await
            }
            OperationRequest::ReplaceSymbolBody(req) => {
                let req = InsertRequest {
                    at: req.at,
                    content: req.replacement,
                };
                self.edit_symbol(operation, req, SymbolEdit::Replace).await
            }
        }
    }

    async fn document_symbols(
        &self,
        operation: LspOperation,
        uri: &str,
    ) -> Result<Vec<DocumentSymbol>, ToolError> {
        let value = self
            .call(operation, self.provider.document_symbols(uri))
            .await?;
        parse_document_symbols(value).map_err(|err| ToolError::unexpected(operation, err))
    }

    async fn get_symbols(
        &self,
        operation: LspOperation,
        req: GetSymbolsRequest,
    ) -> Result<ResultEnvelope, ToolError> {
        let path = NamePath::parse(&req.name_path);
        if path.is_empty() {
            return Err(ToolError::InvalidParameters {
                operation: operation.name().to_string(),
                message: "name_path must contain at least one segment".to_string(),
            });
        }

        let mut rows = Vec::new();
        match &req.text_document {
            Some(doc) => {
                let symbols = self.document_symbols(operation, &doc.uri).await?;
                let text = if req.include_body {
                    Some(
                        self.call(operation, self.provider.document_text(&doc.uri))
                            .await?,
                    )
                } else {
                    None
                };
                for (mut row, sym) in
                    matching_rows(&symbols, &doc.uri, &path, req.substring_matching, req.depth)
                {
                    if let Some(text) = &text {
                        row.body = Some(symbol_body(text, sym));
                    }
                    rows.push(row);
                }
            }
            None => {
                let value = self
                    .call(operation, self.provider.workspace_symbols(path.last_segment()))
                    .await?;
                let infos = parse_workspace_symbols(value)
                    .map_err(|err| ToolError::unexpected(operation, err))?;
                for info in infos {
                    let ancestors = container_segments(info.container_name.as_deref());
                    if !path.matches(&ancestors, &info.name, req.substring_matching) {
                        continue;
                    }
                    let body = if req.include_body {
                        let text = self
                            .call(operation, self.provider.document_text(&info.location.uri))
                            .await?;
                        let range = info.location.range;
                        Some(
                            extract_lines(&text, range.start.line, range.end.line, BODY_MAX_CHARS)
                                .text,
                        )
                    } else {
                        None
                    };
                    rows.push(SymbolRow {
                        name_path: join_path(&ancestors, &info.name),
                        kind: info.kind,
                        uri: info.location.uri.clone(),
                        position: info.location.range.start,
                        body,
                    });
                }
            }
        }

        Ok(ResultEnvelope::table(render_table(&rows)))
    }

    async fn symbol_code_snippet(
        &self,
        operation: LspOperation,
        req: PositionRequest,
    ) -> Result<ResultEnvelope, ToolError> {
        let symbols = self.document_symbols(operation, req.uri()).await?;
        let Some((sym, ancestors)) = symbol_at_position(&symbols, req.position) else {
            return Ok(ResultEnvelope::ok_null());
        };
        let text = self
            .call(operation, self.provider.document_text(req.uri()))
            .await?;
        let snippet = extract_lines(
            &text,
            sym.range.start.line,
            sym.range.end.line,
            BODY_MAX_CHARS,
        );
        Ok(ResultEnvelope::ok(json!({
            "name": sym.name,
            "namePath": join_path(&ancestors, &sym.name),
            "kind": symbol_kind_name(sym.kind),
            "range": sym.range,
            "snippet": snippet.text,
            "truncated": snippet.truncated,
        })))
    }

    async fn edit_symbol(
        &self,
        operation: LspOperation,
        req: InsertRequest,
        kind: SymbolEdit,
    ) -> Result<ResultEnvelope, ToolError> {
        let symbols = self.document_symbols(operation, req.at.uri()).await?;
        let Some((sym, _)) = symbol_at_position(&symbols, req.at.position) else {
            return Err(ToolError::NoTarget(format!(
                "No symbol found at {}",
                location_label(&req.at)
            )));
        };

        let text_edit = match kind {
            SymbolEdit::Before => insert_before(sym, &req.content),
            SymbolEdit::After => insert_after(sym, &req.content),
            SymbolEdit::Replace => replace_body(sym, &req.content),
        };
        let edit = WorkspaceEdit::single(req.at.uri(), text_edit);
        let applied = self
            .call(operation, self.provider.apply_workspace_edit(&edit))
            .await?;

        Ok(ResultEnvelope::ok(json!({
            "applied": true,
            "symbol": sym.name,
            "edit": edit,
            "filesModified": applied.files_modified,
        })))
    }
}

fn location_label(at: &PositionRequest) -> String {
    format!("{}:{}:{}", at.uri(), at.position.line, at.position.character)
}

fn symbol_body(text: &str, sym: &DocumentSymbol) -> String {
    extract_lines(text, sym.range.start.line, sym.range.end.line, BODY_MAX_CHARS).text
}

/// `prepare*Hierarchy` answers `Item[] | null`; only the first item is followed.
fn first_item(prepared: Value) -> Option<Value> {
    match prepared {
        Value::Array(items) => items.into_iter().next(),
        Value::Null => None,
        other => Some(other),
    }
}

fn hierarchy(
    item: Value,
    first_key: &str,
    first: Value,
    second_key: &str,
    second: Value,
) -> anyhow::Result<Value> {
    let mut out = serde_json::Map::new();
    out.insert("item".to_string(), item);
    out.insert(first_key.to_string(), normalize::list(first)?);
    out.insert(second_key.to_string(), normalize::list(second)?);
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use zentara_lsp::protocol::TextDocumentPositionParams;
    use zentara_lsp::{AppliedEdit, unsupported};

    const URI: &str = "file:///w/src/a.ts";
    const SOURCE: &str = "class Foo {\n  bar() {\n    return 1;\n  }\n}\n";

    #[derive(Default)]
    struct FakeProvider {
        rename_calls: AtomicUsize,
        applied: Mutex<Vec<WorkspaceEdit>>,
        hang: bool,
    }

    fn symbols_json() -> Value {
        json!([{
            "name": "Foo", "kind": 5,
            "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 4, "character": 1 } },
            "selectionRange": { "start": { "line": 0, "character": 6 }, "end": { "line": 0, "character": 9 } },
            "children": [{
                "name": "bar", "kind": 6,
                "range": { "start": { "line": 1, "character": 2 }, "end": { "line": 3, "character": 3 } },
                "selectionRange": { "start": { "line": 1, "character": 2 }, "end": { "line": 1, "character": 5 } }
            }]
        }])
    }

    #[async_trait]
    impl CapabilityProvider for FakeProvider {
        async fn definition(&self, params: &TextDocumentPositionParams) -> Result<Value> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(json!({
                "uri": params.uri(),
                "range": { "start": params.position, "end": params.position }
            }))
        }

        async fn references(&self, _: &TextDocumentPositionParams, _: bool) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn hover(&self, _: &TextDocumentPositionParams) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn code_lens(&self, _: &str) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn prepare_call_hierarchy(&self, _: &TextDocumentPositionParams) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn prepare_type_hierarchy(&self, _: &TextDocumentPositionParams) -> Result<Value> {
            Err(anyhow!("TypeHierarchy provider not available"))
        }

        async fn signature_help(&self, _: &TextDocumentPositionParams) -> Result<Value> {
            Err(anyhow!("index out of bounds"))
        }

        async fn document_symbols(&self, _: &str) -> Result<Value> {
            Ok(symbols_json())
        }

        async fn workspace_symbols(&self, _query: &str) -> Result<Value> {
            Ok(json!([
                {
                    "name": "bar", "kind": 6, "containerName": "Foo",
                    "location": { "uri": URI, "range": { "start": { "line": 1, "character": 2 }, "end": { "line": 3, "character": 3 } } }
                },
                {
                    "name": "bar", "kind": 12,
                    "location": { "uri": "file:///w/src/b.ts", "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 9 } } }
                }
            ]))
        }

        async fn rename(
            &self,
            params: &TextDocumentPositionParams,
            new_name: &str,
        ) -> Result<Value> {
            self.rename_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({
                "changes": {
                    (params.uri()): [{
                        "range": { "start": { "line": 1, "character": 2 }, "end": { "line": 1, "character": 5 } },
                        "newText": new_name
                    }]
                }
            }))
        }

        async fn document_text(&self, _: &str) -> Result<String> {
            Ok(SOURCE.to_string())
        }

        async fn apply_workspace_edit(&self, edit: &WorkspaceEdit) -> Result<AppliedEdit> {
            self.applied.lock().unwrap().push(edit.clone());
            Ok(AppliedEdit {
                files_modified: edit.text_edits_by_uri()?.into_keys().collect(),
                backup_files: Vec::new(),
            })
        }

        async fn diagnostics(&self, _: &str) -> Result<Value> {
            Err(unsupported("diagnostics"))
        }
    }

    struct RecordingHost {
        decision: ApprovalDecision,
        approvals: Mutex<Vec<ApprovalRequest>>,
        errors: Mutex<Vec<String>>,
        pushed: Mutex<Vec<String>>,
    }

    impl RecordingHost {
        fn new(decision: ApprovalDecision) -> Self {
            Self {
                decision,
                approvals: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
                pushed: Mutex::new(Vec::new()),
            }
        }

        fn approving() -> Self {
            Self::new(ApprovalDecision::Approved)
        }

        fn only_result(&self) -> ResultEnvelope {
            let pushed = self.pushed.lock().unwrap();
            assert_eq!(pushed.len(), 1, "exactly one result must be pushed");
            ResultEnvelope::from_text(&pushed[0]).unwrap()
        }
    }

    #[async_trait]
    impl ToolHost for RecordingHost {
        async fn ask_approval(&self, request: &ApprovalRequest) -> Result<ApprovalDecision> {
            self.approvals.lock().unwrap().push(request.clone());
            Ok(self.decision.clone())
        }

        async fn handle_error(&self, context: &str, error: &anyhow::Error) {
            self.errors
                .lock()
                .unwrap()
                .push(format!("{context}: {error:#}"));
        }

        async fn push_result(&self, content: String) {
            self.pushed.lock().unwrap().push(content);
        }
    }

    fn dispatcher(provider: Arc<FakeProvider>) -> LspToolDispatcher {
        LspToolDispatcher::new(provider, Duration::from_secs(5))
    }

    fn at(line: u32, character: u32) -> Value {
        json!({
            "textDocument": { "uri": URI },
            "position": { "line": line, "character": character }
        })
    }

    #[tokio::test]
    async fn null_results_become_null_data() {
        let d = dispatcher(Arc::new(FakeProvider::default()));
        for op in ["get_hover_info", "get_call_hierarchy"] {
            let host = RecordingHost::approving();
            let outcome = d.dispatch(&host, &ToolUse::lsp(op, &at(0, 0))).await;
            assert_eq!(outcome, ToolOutcome::Succeeded);
            assert_eq!(host.pushed.lock().unwrap()[0], r#"{"success":true,"data":null}"#);
        }

        let host = RecordingHost::approving();
        d.dispatch(
            &host,
            &ToolUse::lsp("get_code_lens", &json!({ "textDocument": { "uri": URI } })),
        )
        .await;
        assert_eq!(host.only_result(), ResultEnvelope::ok_null());
    }

    struct NullAnswers;

    #[async_trait]
    impl CapabilityProvider for NullAnswers {
        async fn document_highlights(&self, _: &TextDocumentPositionParams) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn signature_help(&self, _: &TextDocumentPositionParams) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn highlights_and_signature_help_keep_null() {
        let d = LspToolDispatcher::new(Arc::new(NullAnswers), Duration::from_secs(5));
        for op in ["get_document_highlights", "get_signature_help"] {
            let host = RecordingHost::approving();
            let outcome = d.dispatch(&host, &ToolUse::lsp(op, &at(2, 4))).await;
            assert_eq!(outcome, ToolOutcome::Succeeded, "{op}");
            assert_eq!(
                host.pushed.lock().unwrap().as_slice(),
                [r#"{"success":true,"data":null}"#.to_string()],
                "{op}"
            );
        }
    }

    #[tokio::test]
    async fn empty_location_lists_become_empty_arrays() {
        let d = dispatcher(Arc::new(FakeProvider::default()));
        let host = RecordingHost::approving();
        d.dispatch(&host, &ToolUse::lsp("find_usages", &at(1, 3))).await;
        assert_eq!(host.only_result(), ResultEnvelope::ok(json!([])));
    }

    #[tokio::test]
    async fn passes_zero_based_positions_through() {
        let d = dispatcher(Arc::new(FakeProvider::default()));
        let host = RecordingHost::approving();
        d.dispatch(&host, &ToolUse::lsp("go_to_definition", &at(0, 0)))
            .await;
        let data = host.only_result().data.unwrap();
        assert_eq!(data[0]["range"]["start"], json!({ "line": 0, "character": 0 }));
    }

    #[tokio::test]
    async fn approved_rename_applies_edit_for_target_file() {
        let provider = Arc::new(FakeProvider::default());
        let d = dispatcher(provider.clone());
        let host = RecordingHost::approving();

        let mut params = at(1, 3);
        params["newName"] = json!("baz");
        let outcome = d.dispatch(&host, &ToolUse::lsp("rename", &params)).await;

        assert_eq!(outcome, ToolOutcome::Succeeded);
        assert_eq!(host.approvals.lock().unwrap().len(), 1);
        let envelope = host.only_result();
        assert!(envelope.success);
        assert!(envelope.data.unwrap()["changes"].get(URI).is_some());
        assert_eq!(provider.applied.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn denied_rename_never_reaches_the_provider() {
        let provider = Arc::new(FakeProvider::default());
        let d = dispatcher(provider.clone());
        let host = RecordingHost::new(ApprovalDecision::Denied {
            feedback: Some("keep the old name".to_string()),
        });

        let mut params = at(1, 3);
        params["newName"] = json!("baz");
        let outcome = d.dispatch(&host, &ToolUse::lsp("rename", &params)).await;

        assert_eq!(outcome, ToolOutcome::Denied);
        let envelope = host.only_result();
        assert!(!envelope.success);
        assert_eq!(
            envelope.message.as_deref(),
            Some("The user denied this operation. Feedback: keep the old name")
        );
        assert_eq!(provider.rename_calls.load(Ordering::SeqCst), 0);
        assert!(provider.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_parameters_are_reported_before_approval() {
        let d = dispatcher(Arc::new(FakeProvider::default()));
        let host = RecordingHost::approving();
        let outcome = d.dispatch(&host, &ToolUse::lsp("rename", &at(1, 3))).await;

        assert_eq!(
            outcome,
            ToolOutcome::MissingParameter {
                field: "newName".to_string()
            }
        );
        assert!(host.approvals.lock().unwrap().is_empty());
        assert_eq!(
            host.only_result().message.as_deref(),
            Some("Missing required parameter 'newName' for rename")
        );
    }

    #[tokio::test]
    async fn missing_operation_and_bad_json() {
        let d = dispatcher(Arc::new(FakeProvider::default()));

        let host = RecordingHost::approving();
        let block = ToolUse {
            name: "lsp".into(),
            ..Default::default()
        };
        let outcome = d.dispatch(&host, &block).await;
        assert_eq!(
            outcome,
            ToolOutcome::MissingParameter {
                field: "lsp_operation".to_string()
            }
        );
        assert_eq!(host.pushed.lock().unwrap().len(), 1);

        let host = RecordingHost::approving();
        let mut block = ToolUse::lsp("get_hover_info", &json!({}));
        block.params.text = Some("{ not json".to_string());
        let outcome = d.dispatch(&host, &block).await;
        assert_eq!(outcome, ToolOutcome::InvalidInput);
        assert!(
            host.only_result()
                .message
                .unwrap()
                .starts_with("Failed to parse result as JSON: ")
        );

        let host = RecordingHost::approving();
        d.dispatch(&host, &ToolUse::lsp("teleport", &json!({}))).await;
        let message = host.only_result().message.unwrap();
        assert!(message.contains("Unknown LSP operation 'teleport'"));
        assert!(message.contains("replace_symbol_body"));
    }

    #[tokio::test]
    async fn classifies_provider_failures() {
        let d = dispatcher(Arc::new(FakeProvider::default()));

        let host = RecordingHost::approving();
        let outcome = d
            .dispatch(&host, &ToolUse::lsp("get_declaration", &at(0, 0)))
            .await;
        assert_eq!(outcome, ToolOutcome::Unsupported);
        assert!(host.errors.lock().unwrap().is_empty());

        let host = RecordingHost::approving();
        let outcome = d
            .dispatch(&host, &ToolUse::lsp("get_type_hierarchy", &at(0, 0)))
            .await;
        assert_eq!(outcome, ToolOutcome::Unsupported);

        let host = RecordingHost::approving();
        let outcome = d
            .dispatch(&host, &ToolUse::lsp("get_signature_help", &at(0, 0)))
            .await;
        assert_eq!(outcome, ToolOutcome::Unexpected);
        assert_eq!(host.errors.lock().unwrap().len(), 1);
        assert!(!host.only_result().success);
    }

    #[tokio::test]
    async fn slow_provider_calls_time_out_as_environment_failures() {
        let provider = Arc::new(FakeProvider {
            hang: true,
            ..FakeProvider::default()
        });
        let d = LspToolDispatcher::new(provider, Duration::from_millis(20));
        let host = RecordingHost::approving();
        let outcome = d
            .dispatch(&host, &ToolUse::lsp("go_to_definition", &at(0, 0)))
            .await;
        assert_eq!(outcome, ToolOutcome::EnvironmentUnavailable);
        assert!(host.only_result().message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn replace_symbol_body_targets_innermost_symbol() {
        let provider = Arc::new(FakeProvider::default());
        let d = dispatcher(provider.clone());
        let host = RecordingHost::approving();

        let mut params = at(2, 4);
        params["replacement"] = json!("bar() { return 2; }");
        let outcome = d
            .dispatch(&host, &ToolUse::lsp("replace_symbol_body", &params))
            .await;
        assert_eq!(outcome, ToolOutcome::Succeeded);

        let applied = provider.applied.lock().unwrap();
        let edits = applied[0].text_edits_by_uri().unwrap();
        assert_eq!(edits[URI][0].range.start.line, 1);
        assert_eq!(edits[URI][0].range.end.line, 3);
        assert_eq!(host.only_result().data.unwrap()["symbol"], json!("bar"));
    }

    #[tokio::test]
    async fn symbol_edits_without_a_symbol_fail() {
        let provider = Arc::new(FakeProvider::default());
        let d = dispatcher(provider.clone());
        let host = RecordingHost::approving();

        let mut params = at(9, 0);
        params["content"] = json!("// note");
        let outcome = d
            .dispatch(&host, &ToolUse::lsp("insert_before_symbol", &params))
            .await;
        assert_eq!(outcome, ToolOutcome::NoTarget);
        assert_eq!(
            host.only_result().message.as_deref(),
            Some("No symbol found at file:///w/src/a.ts:9:0")
        );
        assert!(provider.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn symbol_tables() {
        let d = dispatcher(Arc::new(FakeProvider::default()));

        let host = RecordingHost::approving();
        d.dispatch(
            &host,
            &ToolUse::lsp("get_symbols_overview", &json!({ "textDocument": { "uri": URI } })),
        )
        .await;
        assert_eq!(
            host.only_result().symbols.as_deref(),
            Some("name_path | kind | location\nFoo | Class | file:///w/src/a.ts:0:6\n")
        );

        let host = RecordingHost::approving();
        d.dispatch(
            &host,
            &ToolUse::lsp(
                "get_symbols",
                &json!({ "name_path": "Foo/bar", "textDocument": { "uri": URI }, "include_body": true }),
            ),
        )
        .await;
        let table = host.only_result().symbols.unwrap();
        assert!(table.contains("Foo/bar | Method | file:///w/src/a.ts:1:2\n  bar() {\n"));

        let host = RecordingHost::approving();
        d.dispatch(&host, &ToolUse::lsp("get_symbols", &json!({ "name_path": "/bar" })))
            .await;
        let table = host.only_result().symbols.unwrap();
        assert!(table.contains("bar | Function | file:///w/src/b.ts:0:0"));
        assert!(!table.contains("Foo/bar"));
    }

    #[tokio::test]
    async fn symbol_snippet_or_null() {
        let d = dispatcher(Arc::new(FakeProvider::default()));

        let host = RecordingHost::approving();
        d.dispatch(&host, &ToolUse::lsp("get_symbol_code_snippet", &at(2, 4)))
            .await;
        let data = host.only_result().data.unwrap();
        assert_eq!(data["namePath"], json!("Foo/bar"));
        assert_eq!(data["snippet"], json!("  bar() {\n    return 1;\n  }\n"));

        let host = RecordingHost::approving();
        d.dispatch(&host, &ToolUse::lsp("get_symbol_code_snippet", &at(40, 0)))
            .await;
        assert_eq!(host.only_result(), ResultEnvelope::ok_null());
    }
}
