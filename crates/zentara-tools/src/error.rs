use thiserror::Error;

use crate::host::ToolOutcome;
use crate::operation::LspOperation;

/// Terminal failure of one tool call. The `Display` text is what ends up
/// in the failure envelope's `message`.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Missing required parameter '{field}' for {operation}")]
    MissingParameter { operation: String, field: String },

    #[error("Failed to parse result as JSON: {0}")]
    MalformedJson(#[source] serde_json::Error),

    #[error("Invalid parameters for {operation}: {message}")]
    InvalidParameters { operation: String, message: String },

    #[error(
        "Unknown LSP operation '{name}'. Supported operations: {}",
        LspOperation::supported_names()
    )]
    UnknownOperation { name: String },

    /// The request was valid but names nothing to act on.
    #[error("{0}")]
    NoTarget(String),

    #[error("{}", denial_message(.feedback.as_deref()))]
    Denied { feedback: Option<String> },

    #[error("{operation} is unavailable: {message}")]
    EnvironmentUnavailable { operation: String, message: String },

    #[error("{operation} is not supported: {message}")]
    Unsupported { operation: String, message: String },

    #[error("{operation} failed: {error:#}")]
    Unexpected {
        operation: String,
        error: anyhow::Error,
    },
}

fn denial_message(feedback: Option<&str>) -> String {
    match feedback.map(str::trim).filter(|f| !f.is_empty()) {
        Some(feedback) => format!("The user denied this operation. Feedback: {feedback}"),
        None => "The user denied this operation.".to_string(),
    }
}

impl ToolError {
    pub fn missing(operation: LspOperation, field: &str) -> Self {
        Self::MissingParameter {
            operation: operation.name().to_string(),
            field: field.to_string(),
        }
    }

    pub fn unexpected(operation: LspOperation, error: anyhow::Error) -> Self {
        Self::Unexpected {
            operation: operation.name().to_string(),
            error,
        }
    }

    pub fn outcome(&self) -> ToolOutcome {
        match self {
            ToolError::MissingParameter { field, .. } => ToolOutcome::MissingParameter {
                field: field.clone(),
            },
            ToolError::MalformedJson(_)
            | ToolError::InvalidParameters { .. }
            | ToolError::UnknownOperation { .. } => ToolOutcome::InvalidInput,
            ToolError::NoTarget(_) => ToolOutcome::NoTarget,
            ToolError::Denied { .. } => ToolOutcome::Denied,
            ToolError::EnvironmentUnavailable { .. } => ToolOutcome::EnvironmentUnavailable,
            ToolError::Unsupported { .. } => ToolOutcome::Unsupported,
            ToolError::Unexpected { .. } => ToolOutcome::Unexpected,
        }
    }
}

const ENVIRONMENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "not initialized",
    "language server",
    "no server",
    "capability provider not ready",
];

const UNSUPPORTED_MARKERS: &[&str] = &["not supported", "method not found", "-32601"];

const OPTIONAL_CAPABILITIES: &[&str] = &["callhierarchy", "typehierarchy", "semantictokens"];

/// Sorts a provider failure into environment, unsupported or unexpected.
pub fn classify(operation: LspOperation, error: anyhow::Error) -> ToolError {
    let message = format!("{error:#}");
    let lower = message.to_ascii_lowercase();

    if ENVIRONMENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return ToolError::EnvironmentUnavailable {
            operation: operation.name().to_string(),
            message,
        };
    }

    let capability_missing = lower.contains("not available")
        && OPTIONAL_CAPABILITIES.iter().any(|c| lower.contains(c));
    if capability_missing || UNSUPPORTED_MARKERS.iter().any(|m| lower.contains(m)) {
        return ToolError::Unsupported {
            operation: operation.name().to_string(),
            message,
        };
    }

    ToolError::unexpected(operation, error)
}
