use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::{Value, json};
use zentara_lsp::protocol::{Diagnostic, DocumentSymbol, SemanticTokensLegend};
use zentara_lsp::symbol::{parse_document_symbols, parse_locations, symbol_kind_name};

/// `null`, a single location or any location list as `Location[]`.
pub fn locations(value: Value) -> Result<Value> {
    Ok(serde_json::to_value(parse_locations(value)?)?)
}

/// Null-preserving list: `null` stays `null`, arrays pass through.
pub fn nullable_list(value: Value) -> Result<Value> {
    match value {
        Value::Null | Value::Array(_) => Ok(value),
        other => Err(anyhow!("expected an array or null, got {other}")),
    }
}

/// Plain list: `null` becomes `[]`.
pub fn list(value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(json!([])),
        Value::Array(_) => Ok(value),
        other => Err(anyhow!("expected an array or null, got {other}")),
    }
}

pub fn hover(value: Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    let contents = value.get("contents").map(hover_text).unwrap_or_default();
    match value.get("range") {
        Some(range) if !range.is_null() => json!({ "contents": contents, "range": range }),
        _ => json!({ "contents": contents }),
    }
}

/// `MarkedString | MarkedString[] | MarkupContent` as one text block.
pub fn hover_text(contents: &Value) -> String {
    match contents {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(hover_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        Value::Object(obj) => {
            let text = obj.get("value").and_then(Value::as_str).unwrap_or_default();
            match obj.get("language").and_then(Value::as_str) {
                Some(language) => format!("```{language}\n{text}\n```"),
                None => text.to_string(),
            }
        }
        _ => String::new(),
    }
}

const COMPLETION_KIND_NAMES: [&str; 25] = [
    "Text",
    "Method",
    "Function",
    "Constructor",
    "Field",
    "Variable",
    "Class",
    "Interface",
    "Module",
    "Property",
    "Unit",
    "Value",
    "Enum",
    "Keyword",
    "Snippet",
    "Color",
    "File",
    "Reference",
    "Folder",
    "EnumMember",
    "Constant",
    "Struct",
    "Event",
    "Operator",
    "TypeParameter",
];

fn completion_kind_name(kind: u64) -> Option<&'static str> {
    (kind as usize)
        .checked_sub(1)
        .and_then(|i| COMPLETION_KIND_NAMES.get(i))
        .copied()
}

/// `CompletionItem[] | CompletionList | null` reduced to the fields a model needs.
pub fn completions(value: Value) -> Result<Value> {
    let items = match value {
        Value::Null => return Ok(json!([])),
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("items") {
            Some(Value::Array(items)) => items,
            _ => return Err(anyhow!("CompletionList has no items array")),
        },
        other => return Err(anyhow!("unexpected completion response: {other}")),
    };

    let out = items
        .into_iter()
        .map(|item| {
            let label = item.get("label").cloned().unwrap_or(Value::Null);
            let kind = item
                .get("kind")
                .and_then(Value::as_u64)
                .and_then(completion_kind_name);
            let insert_text = item
                .get("insertText")
                .or_else(|| item.get("textEdit").and_then(|e| e.get("newText")))
                .cloned()
                .unwrap_or(Value::Null);
            json!({
                "label": label,
                "kind": kind,
                "detail": item.get("detail").cloned().unwrap_or(Value::Null),
                "insertText": insert_text,
            })
        })
        .collect();
    Ok(Value::Array(out))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SymbolNode<'a> {
    name: &'a str,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
    range: zentara_lsp::protocol::Range,
    selection_range: zentara_lsp::protocol::Range,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<SymbolNode<'a>>,
}

fn symbol_node(sym: &DocumentSymbol) -> SymbolNode<'_> {
    SymbolNode {
        name: &sym.name,
        kind: symbol_kind_name(sym.kind),
        detail: sym.detail.as_deref(),
        range: sym.range,
        selection_range: sym.selection_range,
        children: sym.children.iter().map(symbol_node).collect(),
    }
}

pub fn document_symbols(value: Value) -> Result<Value> {
    let symbols = parse_document_symbols(value)?;
    let nodes: Vec<SymbolNode<'_>> = symbols.iter().map(symbol_node).collect();
    Ok(serde_json::to_value(nodes)?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticToken {
    pub line: u32,
    pub character: u32,
    pub length: u32,
    pub token_type: String,
    pub token_modifiers: Vec<String>,
}

/// Decodes the relative five-integer encoding of `SemanticTokens.data`.
pub fn decode_semantic_tokens(data: &[u32], legend: &SemanticTokensLegend) -> Vec<SemanticToken> {
    let mut out = Vec::with_capacity(data.len() / 5);
    let mut line = 0u32;
    let mut character = 0u32;

    for chunk in data.chunks_exact(5) {
        let (delta_line, delta_start, length, token_type, modifiers) =
            (chunk[0], chunk[1], chunk[2], chunk[3], chunk[4]);
        if delta_line > 0 {
            line += delta_line;
            character = delta_start;
        } else {
            character += delta_start;
        }

        let token_type = legend
            .token_types
            .get(token_type as usize)
            .cloned()
            .unwrap_or_else(|| format!("unknown({token_type})"));
        let token_modifiers = legend
            .token_modifiers
            .iter()
            .enumerate()
            .filter(|(bit, _)| *bit < 32 && modifiers & (1 << bit) != 0)
            .map(|(_, name)| name.clone())
            .collect();

        out.push(SemanticToken {
            line,
            character,
            length,
            token_type,
            token_modifiers,
        });
    }
    out
}

pub fn semantic_tokens(value: Value, legend: &SemanticTokensLegend) -> Result<Value> {
    if value.is_null() {
        return Ok(json!([]));
    }
    let data: Vec<u32> = value
        .get("data")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .context("failed to parse semantic token data")?
        .unwrap_or_default();
    Ok(serde_json::to_value(decode_semantic_tokens(&data, legend))?)
}

fn severity_name(severity: Option<u32>) -> &'static str {
    match severity {
        Some(1) => "Error",
        Some(2) => "Warning",
        Some(3) => "Information",
        Some(4) => "Hint",
        _ => "Unknown",
    }
}

pub fn diagnostics(value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(json!([]));
    }
    let diagnostics: Vec<Diagnostic> =
        serde_json::from_value(value).context("failed to parse Diagnostic[]")?;
    Ok(Value::Array(
        diagnostics
            .into_iter()
            .map(|d| {
                json!({
                    "range": d.range,
                    "severity": severity_name(d.severity),
                    "message": d.message,
                    "source": d.source,
                    "code": d.code,
                })
            })
            .collect(),
    ))
}
