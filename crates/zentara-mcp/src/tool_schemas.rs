use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::{JsonObject, Tool};
use serde_json::json;
use zentara_tools::LspOperation;

pub(crate) fn all_tools() -> Vec<Tool> {
    vec![tool_lsp(), tool_get_current_config()]
}

pub(crate) fn tool_lsp() -> Tool {
    let names: Vec<&str> = LspOperation::ALL.iter().map(|op| op.name()).collect();
    Tool::new(
        Cow::Borrowed("lsp"),
        Cow::Owned(format!(
            "Run one language-server operation. Positions and ranges are 0-based. \
             Mutating operations ({}) are subject to the approval policy.",
            LspOperation::ALL
                .iter()
                .filter(|op| op.is_mutating())
                .map(|op| op.name())
                .collect::<Vec<_>>()
                .join(", ")
        )),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "lsp_operation": { "type": "string", "enum": names },
                "params": {
                    "type": "object",
                    "description": "Operation parameters, e.g. { textDocument: { uri }, position: { line, character } }."
                }
            },
            "required": ["lsp_operation"],
            "additionalProperties": false
        }))),
    )
}

pub(crate) fn tool_get_current_config() -> Tool {
    Tool::new(
        Cow::Borrowed("get_current_config"),
        Cow::Borrowed("Show the workspace root, configured language servers and tool policy."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }))),
    )
}

fn schema(value: serde_json::Value) -> JsonObject {
    match value {
        serde_json::Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}
