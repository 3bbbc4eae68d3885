use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;

use crate::protocol::{
    Position, Range, SemanticTokensLegend, TextDocumentPositionParams, WorkspaceEdit,
};
use crate::workspace_edit::AppliedEdit;

pub fn unsupported(capability: &str) -> anyhow::Error {
    anyhow!("{capability} is not supported by this capability provider")
}

/// Editor/LSP operations the tool dispatcher drives. Results are the raw
/// LSP JSON for the corresponding request; shaping happens in the
/// dispatcher. Every method defaults to an "is not supported" error so
/// partial backends only implement what they have.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn definition(&self, _params: &TextDocumentPositionParams) -> Result<Value> {
        Err(unsupported("textDocument/definition"))
    }

    async fn declaration(&self, _params: &TextDocumentPositionParams) -> Result<Value> {
        Err(unsupported("textDocument/declaration"))
    }

    async fn type_definition(&self, _params: &TextDocumentPositionParams) -> Result<Value> {
        Err(unsupported("textDocument/typeDefinition"))
    }

    async fn implementation(&self, _params: &TextDocumentPositionParams) -> Result<Value> {
        Err(unsupported("textDocument/implementation"))
    }

    async fn references(
        &self,
        _params: &TextDocumentPositionParams,
        _include_declaration: bool,
    ) -> Result<Value> {
        Err(unsupported("textDocument/references"))
    }

    async fn hover(&self, _params: &TextDocumentPositionParams) -> Result<Value> {
        Err(unsupported("textDocument/hover"))
    }

    async fn document_highlights(&self, _params: &TextDocumentPositionParams) -> Result<Value> {
        Err(unsupported("textDocument/documentHighlight"))
    }

    async fn signature_help(&self, _params: &TextDocumentPositionParams) -> Result<Value> {
        Err(unsupported("textDocument/signatureHelp"))
    }

    async fn completion(
        &self,
        _params: &TextDocumentPositionParams,
        _trigger_character: Option<&str>,
    ) -> Result<Value> {
        Err(unsupported("textDocument/completion"))
    }

    async fn document_symbols(&self, _uri: &str) -> Result<Value> {
        Err(unsupported("textDocument/documentSymbol"))
    }

    async fn workspace_symbols(&self, _query: &str) -> Result<Value> {
        Err(unsupported("workspace/symbol"))
    }

    /// Returns a `WorkspaceEdit` or `null`. Does not apply it.
    async fn rename(&self, _params: &TextDocumentPositionParams, _new_name: &str) -> Result<Value> {
        Err(unsupported("textDocument/rename"))
    }

    async fn code_actions(&self, _uri: &str, _range: Range, _context: Value) -> Result<Value> {
        Err(unsupported("textDocument/codeAction"))
    }

    async fn code_lens(&self, _uri: &str) -> Result<Value> {
        Err(unsupported("textDocument/codeLens"))
    }

    async fn selection_ranges(&self, _uri: &str, _positions: &[Position]) -> Result<Value> {
        Err(unsupported("textDocument/selectionRange"))
    }

    async fn semantic_tokens(&self, _uri: &str) -> Result<Value> {
        Err(unsupported("SemanticTokens"))
    }

    async fn semantic_tokens_legend(&self, _uri: &str) -> Result<Option<SemanticTokensLegend>> {
        Err(unsupported("SemanticTokens"))
    }

    async fn prepare_call_hierarchy(&self, _params: &TextDocumentPositionParams) -> Result<Value> {
        Err(unsupported("CallHierarchy"))
    }

    async fn incoming_calls(&self, _item: &Value) -> Result<Value> {
        Err(unsupported("CallHierarchy"))
    }

    async fn outgoing_calls(&self, _item: &Value) -> Result<Value> {
        Err(unsupported("CallHierarchy"))
    }

    async fn prepare_type_hierarchy(&self, _params: &TextDocumentPositionParams) -> Result<Value> {
        Err(unsupported("TypeHierarchy"))
    }

    async fn supertypes(&self, _item: &Value) -> Result<Value> {
        Err(unsupported("TypeHierarchy"))
    }

    async fn subtypes(&self, _item: &Value) -> Result<Value> {
        Err(unsupported("TypeHierarchy"))
    }

    /// `Diagnostic[]` for one document.
    async fn diagnostics(&self, _uri: &str) -> Result<Value> {
        Err(unsupported("diagnostics"))
    }

    async fn document_text(&self, _uri: &str) -> Result<String> {
        Err(unsupported("document text"))
    }

    async fn apply_workspace_edit(&self, _edit: &WorkspaceEdit) -> Result<AppliedEdit> {
        Err(unsupported("workspace edits"))
    }
}
