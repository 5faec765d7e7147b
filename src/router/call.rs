//! Tool invocation records.
//!
//! Defines the [`ToolCall`] record tracked by the router's task table and
//! the [`ToolStatus`] lifecycle it moves through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier returned by a submission and accepted by status queries.
pub type CallId = Uuid;

/// Lifecycle state of a tool invocation.
///
/// The only legal transitions are Pending → Running and
/// Running → (Completed | Failed). Completed and Failed are terminal:
/// a record that reaches one of them is never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Queued, not yet picked up by the dispatch loop.
    Pending,
    /// Handler is executing.
    Running,
    /// Handler returned a result.
    Completed,
    /// Handler returned an error.
    Failed,
}

impl ToolStatus {
    /// Returns `true` for Completed and Failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Full record of one tool invocation.
///
/// Records live in the router's task table; callers only ever receive
/// cloned snapshots, never references into the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique invocation identifier.
    pub id: CallId,
    /// Name of the registered tool.
    pub tool_name: String,
    /// Parameter bundle, opaque to the router.
    pub parameters: serde_json::Value,
    /// Current lifecycle state.
    pub status: ToolStatus,
    /// When the invocation was submitted.
    pub created_at: DateTime<Utc>,
    /// When the invocation reached a terminal state, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// Handler result. Set only when status is Completed.
    pub result: Option<serde_json::Value>,
    /// Handler error description. Set only when status is Failed.
    pub error: Option<String>,
}

impl ToolCall {
    /// Create a new Pending record for the given tool and parameters.
    pub(crate) fn new(tool_name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_name: tool_name.into(),
            parameters,
            status: ToolStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Transition to Completed with the handler's result.
    pub(crate) fn complete(&mut self, result: serde_json::Value) {
        self.status = ToolStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    /// Transition to Failed with a stringified handler error.
    pub(crate) fn fail(&mut self, error: String) {
        self.status = ToolStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }
}
