//! The `lsp` tool: parameter validation, approval gating, provider calls
//! and the JSON result envelope handed back to the model.

pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod host;
pub mod normalize;
pub mod operation;
pub mod params;
pub mod symbols;

pub use dispatcher::LspToolDispatcher;
pub use envelope::ResultEnvelope;
pub use error::ToolError;
pub use host::{ApprovalDecision, ApprovalRequest, ToolHost, ToolOutcome, ToolUse, ToolUseParams};
pub use operation::LspOperation;
