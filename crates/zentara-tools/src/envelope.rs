use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Uniform result of every LSP tool call, serialized as JSON text.
///
/// `data: null` and an absent `data` are different values: the first is a
/// successful call with no result, the second a failure or table result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub success: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<String>,
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl ResultEnvelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            symbols: None,
        }
    }

    pub fn ok_null() -> Self {
        Self::ok(Value::Null)
    }

    pub fn table(symbols: String) -> Self {
        Self {
            success: true,
            data: None,
            message: None,
            symbols: Some(symbols),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            symbols: None,
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            format!(r#"{{"success":false,"message":"failed to serialize result: {err}"}}"#)
        })
    }

    pub fn from_text(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
