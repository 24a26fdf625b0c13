//! Side-effecting tool calls that wait for a human decision.

pub mod approval;
pub mod schema;

pub use approval::{Decision, PendingApproval, ToolApprovalGate, ToolCallApproval};
pub use schema::{HttpSchemaStore, RemoteSchemaStore, SchemaPushTool};

/// Result of a gated tool call. Rejection is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome<T> {
    Completed(T),
    Rejected,
}

impl<T> ToolOutcome<T> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ToolOutcome::Rejected)
    }
}
