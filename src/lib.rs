//! Wisp: asynchronous tool-call routing core for a desktop companion agent.
//!
//! The companion's decision loop thinks continuously; its tools (screen
//! analysis, speech synthesis, input control, game actions) are slow and
//! side-effecting. This crate provides the mediator between the two:
//!
//! - **Registry** — tool names mapped to async handlers and descriptions
//! - **Submission** — `call_tool` stores a Pending record and returns an id
//!   without waiting for execution
//! - **Dispatch** — a background loop that spawns each dequeued invocation
//!   onto its own task, so handlers run concurrently
//! - **Notification** — a completion callback (global, or per-invocation)
//!   fired with every finalized record
//!
//! The decision loop polls [`ToolRouter::get_task_status`] by id whenever it
//! wants to act on an outcome; completion order is unrelated to submission
//! order.

pub mod config;
pub mod error;
pub mod router;

pub use config::{RetentionConfig, RouterConfig};
pub use error::{Result, RouterError};
pub use router::{
    CallId, CompletionCallback, HandlerFuture, ToolCall, ToolHandler, ToolRegistry, ToolRouter,
    ToolStatus,
};
