use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use zentara_lsp::protocol::{Position, Range, TextDocumentIdentifier, TextDocumentPositionParams};

use crate::error::ToolError;
use crate::operation::LspOperation;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRequest {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
}

impl PositionRequest {
    pub fn lsp(&self) -> TextDocumentPositionParams {
        TextDocumentPositionParams::new(self.text_document.uri.clone(), self.position)
    }

    pub fn uri(&self) -> &str {
        &self.text_document.uri
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceContext {
    #[serde(default = "yes")]
    pub include_declaration: bool,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencesRequest {
    #[serde(flatten)]
    pub at: PositionRequest,
    #[serde(default)]
    pub context: Option<ReferenceContext>,
}

impl ReferencesRequest {
    pub fn include_declaration(&self) -> bool {
        self.context
            .as_ref()
            .map(|c| c.include_declaration)
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    #[serde(flatten)]
    pub at: PositionRequest,
    #[serde(default)]
    pub trigger_character: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRequest {
    pub text_document: TextDocumentIdentifier,
}

impl DocumentRequest {
    pub fn uri(&self) -> &str {
        &self.text_document.uri
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceSymbolsRequest {
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetSymbolsRequest {
    #[serde(alias = "namePath")]
    pub name_path: String,
    #[serde(default, alias = "textDocument")]
    pub text_document: Option<TextDocumentIdentifier>,
    #[serde(default)]
    pub depth: u32,
    #[serde(default, alias = "includeBody")]
    pub include_body: bool,
    #[serde(default, alias = "substringMatching")]
    pub substring_matching: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeActionsRequest {
    pub text_document: TextDocumentIdentifier,
    pub range: Range,
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    #[serde(flatten)]
    pub at: PositionRequest,
    pub new_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsertRequest {
    #[serde(flatten)]
    pub at: PositionRequest,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceBodyRequest {
    #[serde(flatten)]
    pub at: PositionRequest,
    pub replacement: String,
}

/// One variant per operation, carrying its typed parameters.
#[derive(Debug, Clone)]
pub enum OperationRequest {
    FindUsages(ReferencesRequest),
    GoToDefinition(PositionRequest),
    GetDeclaration(PositionRequest),
    GetTypeDefinition(PositionRequest),
    FindImplementations(PositionRequest),
    GetHoverInfo(PositionRequest),
    GetDocumentHighlights(PositionRequest),
    GetSignatureHelp(PositionRequest),
    GetCompletions(CompletionRequest),
    GetDocumentSymbols(DocumentRequest),
    GetWorkspaceSymbols(WorkspaceSymbolsRequest),
    GetSymbolsOverview(DocumentRequest),
    GetSymbols(GetSymbolsRequest),
    GetSymbolCodeSnippet(PositionRequest),
    GetCodeActions(CodeActionsRequest),
    GetCodeLens(DocumentRequest),
    GetSelectionRange(PositionRequest),
    GetSemanticTokens(DocumentRequest),
    GetCallHierarchy(PositionRequest),
    GetTypeHierarchy(PositionRequest),
    GetDiagnostics(DocumentRequest),
    Rename(RenameRequest),
    InsertBeforeSymbol(InsertRequest),
    InsertAfterSymbol(InsertRequest),
    ReplaceSymbolBody(ReplaceBodyRequest),
}

const POSITION: &[&str] = &["textDocument", "position"];
const DOCUMENT: &[&str] = &["textDocument"];

/// Fields that must be present and non-null, in the order they are reported.
pub fn required_fields(operation: LspOperation) -> &'static [&'static str] {
    use LspOperation::*;
    match operation {
        FindUsages | GoToDefinition | GetDeclaration | GetTypeDefinition | FindImplementations
        | GetHoverInfo | GetDocumentHighlights | GetSignatureHelp | GetCompletions
        | GetSymbolCodeSnippet | GetSelectionRange | GetCallHierarchy | GetTypeHierarchy => {
            POSITION
        }
        GetDocumentSymbols | GetSymbolsOverview | GetCodeLens | GetSemanticTokens
        | GetDiagnostics => DOCUMENT,
        GetWorkspaceSymbols => &["query"],
        GetSymbols => &["name_path"],
        GetCodeActions => &["textDocument", "range"],
        Rename => &["textDocument", "position", "newName"],
        InsertBeforeSymbol | InsertAfterSymbol => &["textDocument", "position", "content"],
        ReplaceSymbolBody => &["textDocument", "position", "replacement"],
    }
}

fn field_present(payload: &Value, field: &str) -> bool {
    let value = payload.get(field).or_else(|| match field {
        "name_path" => payload.get("namePath"),
        _ => None,
    });
    !matches!(value, None | Some(Value::Null))
}

fn typed<T: DeserializeOwned>(operation: LspOperation, payload: Value) -> Result<T, ToolError> {
    serde_json::from_value(payload).map_err(|err| ToolError::InvalidParameters {
        operation: operation.name().to_string(),
        message: err.to_string(),
    })
}

impl OperationRequest {
    /// Validates required fields, then parses `payload` into the
    /// operation's parameter struct.
    pub fn parse(operation: LspOperation, payload: Value) -> Result<Self, ToolError> {
        if !payload.is_object() {
            return Err(ToolError::InvalidParameters {
                operation: operation.name().to_string(),
                message: "parameters must be a JSON object".to_string(),
            });
        }
        if let Some(field) = required_fields(operation)
            .iter()
            .find(|f| !field_present(&payload, f))
        {
            return Err(ToolError::missing(operation, field));
        }

        use LspOperation as Op;
        let request = match operation {
            Op::FindUsages => Self::FindUsages(typed(operation, payload)?),
            Op::GoToDefinition => Self::GoToDefinition(typed(operation, payload)?),
            Op::GetDeclaration => Self::GetDeclaration(typed(operation, payload)?),
            Op::GetTypeDefinition => Self::GetTypeDefinition(typed(operation, payload)?),
            Op::FindImplementations => Self::FindImplementations(typed(operation, payload)?),
            Op::GetHoverInfo => Self::GetHoverInfo(typed(operation, payload)?),
            Op::GetDocumentHighlights => Self::GetDocumentHighlights(typed(operation, payload)?),
            Op::GetSignatureHelp => Self::GetSignatureHelp(typed(operation, payload)?),
            Op::GetCompletions => Self::GetCompletions(typed(operation, payload)?),
            Op::GetDocumentSymbols => Self::GetDocumentSymbols(typed(operation, payload)?),
            Op::GetWorkspaceSymbols => Self::GetWorkspaceSymbols(typed(operation, payload)?),
            Op::GetSymbolsOverview => Self::GetSymbolsOverview(typed(operation, payload)?),
            Op::GetSymbols => Self::GetSymbols(typed(operation, payload)?),
            Op::GetSymbolCodeSnippet => Self::GetSymbolCodeSnippet(typed(operation, payload)?),
            Op::GetCodeActions => Self::GetCodeActions(typed(operation, payload)?),
            Op::GetCodeLens => Self::GetCodeLens(typed(operation, payload)?),
            Op::GetSelectionRange => Self::GetSelectionRange(typed(operation, payload)?),
            Op::GetSemanticTokens => Self::GetSemanticTokens(typed(operation, payload)?),
            Op::GetCallHierarchy => Self::GetCallHierarchy(typed(operation, payload)?),
            Op::GetTypeHierarchy => Self::GetTypeHierarchy(typed(operation, payload)?),
            Op::GetDiagnostics => Self::GetDiagnostics(typed(operation, payload)?),
            Op::Rename => Self::Rename(typed(operation, payload)?),
            Op::InsertBeforeSymbol => Self::InsertBeforeSymbol(typed(operation, payload)?),
            Op::InsertAfterSymbol => Self::InsertAfterSymbol(typed(operation, payload)?),
            Op::ReplaceSymbolBody => Self::ReplaceSymbolBody(typed(operation, payload)?),
        };
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at() -> Value {
        json!({
            "textDocument": { "uri": "file:///w/a.ts" },
            "position": { "line": 3, "character": 7 }
        })
    }

    #[test]
    fn parses_position_requests_with_zero_based_coordinates() {
        let OperationRequest::GoToDefinition(req) =
            OperationRequest::parse(LspOperation::GoToDefinition, at()).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(req.position, Position::new(3, 7));
        assert_eq!(req.uri(), "file:///w/a.ts");
    }

    #[test]
    fn reports_first_missing_field() {
        let err = OperationRequest::parse(LspOperation::Rename, at()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required parameter 'newName' for rename"
        );

        let err = OperationRequest::parse(
            LspOperation::GetHoverInfo,
            json!({ "textDocument": { "uri": "file:///w/a.ts" }, "position": null }),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ToolError::MissingParameter { ref field, .. } if field == "position"
        ));
    }

    #[test]
    fn rejects_malformed_field_types() {
        let err = OperationRequest::parse(
            LspOperation::GetHoverInfo,
            json!({ "textDocument": { "uri": "file:///w/a.ts" }, "position": { "line": "x" } }),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters { .. }));
    }

    #[test]
    fn references_include_declaration_by_default() {
        let OperationRequest::FindUsages(req) =
            OperationRequest::parse(LspOperation::FindUsages, at()).unwrap()
        else {
            panic!("wrong variant");
        };
        assert!(req.include_declaration());

        let mut payload = at();
        payload["context"] = json!({ "includeDeclaration": false });
        let OperationRequest::FindUsages(req) =
            OperationRequest::parse(LspOperation::FindUsages, payload).unwrap()
        else {
            panic!("wrong variant");
        };
        assert!(!req.include_declaration());
    }

    #[test]
    fn get_symbols_accepts_camel_case_aliases() {
        let OperationRequest::GetSymbols(req) = OperationRequest::parse(
            LspOperation::GetSymbols,
            json!({ "namePath": "/Foo/bar", "includeBody": true }),
        )
        .unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(req.name_path, "/Foo/bar");
        assert!(req.include_body);
        assert!(req.text_document.is_none());
    }
}
