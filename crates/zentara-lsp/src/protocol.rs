use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use zentara_core::text_edit::{Position, Range, TextEdit};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

impl TextDocumentIdentifier {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentPositionParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
}

impl TextDocumentPositionParams {
    pub fn new(uri: impl Into<String>, position: Position) -> Self {
        Self {
            text_document: TextDocumentIdentifier::new(uri),
            position,
        }
    }

    pub fn uri(&self) -> &str {
        &self.text_document.uri
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationLink {
    pub target_uri: String,
    pub target_range: Range,
    pub target_selection_range: Range,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionalVersionedTextDocumentIdentifier {
    uri: String,
    #[serde(default)]
    version: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextDocumentEdit {
    text_document: OptionalVersionedTextDocumentIdentifier,
    edits: Vec<TextEdit>,
}

/// `WorkspaceEdit` as sent by servers. Only text edits are understood;
/// resource operations inside `documentChanges` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceEdit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<HashMap<String, Vec<TextEdit>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_changes: Option<Vec<Value>>,
}

impl WorkspaceEdit {
    pub fn single(uri: impl Into<String>, edit: TextEdit) -> Self {
        let mut changes = HashMap::new();
        changes.insert(uri.into(), vec![edit]);
        Self {
            changes: Some(changes),
            document_changes: None,
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).context("failed to parse WorkspaceEdit")
    }

    /// Merges `changes` and `documentChanges` into one map keyed by URI.
    pub fn text_edits_by_uri(&self) -> Result<HashMap<String, Vec<TextEdit>>> {
        let mut out = self.changes.clone().unwrap_or_default();

        let Some(document_changes) = self.document_changes.as_ref() else {
            return Ok(out);
        };

        for change in document_changes {
            let is_text_document_edit =
                change.get("textDocument").is_some() && change.get("edits").is_some();
            if !is_text_document_edit {
                continue;
            }
            let tde: TextDocumentEdit = serde_json::from_value(change.clone())
                .context("failed to parse TextDocumentEdit in WorkspaceEdit")?;
            out.entry(tde.text_document.uri)
                .or_default()
                .extend(tde.edits);
        }

        Ok(out)
    }

    pub fn is_empty(&self) -> bool {
        self.text_edits_by_uri()
            .map(|m| m.values().all(Vec::is_empty))
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub range: Range,
    #[serde(default)]
    pub severity: Option<u32>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub source: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInformation {
    pub name: String,
    pub kind: u32,
    pub location: Location,
    #[serde(default)]
    pub container_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSymbol {
    pub name: String,
    pub kind: u32,
    #[serde(default)]
    pub detail: Option<String>,
    pub range: Range,
    pub selection_range: Range,
    #[serde(default)]
    pub children: Vec<DocumentSymbol>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticTokensLegend {
    pub token_types: Vec<String>,
    pub token_modifiers: Vec<String>,
}
