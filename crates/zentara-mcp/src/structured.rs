use serde_json::{Value, json};

pub(crate) const STRUCTURED_SCHEMA_VERSION: u32 = 1;

pub(crate) fn structured_ok(tool: &str, input: Option<Value>) -> Value {
    json!({
        "schema_version": STRUCTURED_SCHEMA_VERSION,
        "ok": true,
        "tool": tool,
        "input": input,
        "warnings": [],
    })
}

pub(crate) fn structured_error(
    tool: &str,
    input: Option<Value>,
    kind: &str,
    message: &str,
) -> Value {
    json!({
        "schema_version": STRUCTURED_SCHEMA_VERSION,
        "ok": false,
        "tool": tool,
        "input": input,
        "error": {
            "kind": kind,
            "message": message
        },
        "warnings": [],
    })
}
