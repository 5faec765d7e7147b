//! Tool registry.
//!
//! Maps tool names to their async handlers and descriptions. The registry
//! is a plain map; the router wraps it in a lock and checks it at
//! submission time so unknown names are rejected before anything is queued.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

/// Future returned by a tool handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<serde_json::Value>>;

/// An erased async tool handler.
///
/// Receives the opaque parameter bundle and resolves to a result value or
/// an error. The router does not interpret either; schema validation is
/// the handler's own concern.
pub type ToolHandler = Arc<dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync>;

/// Description placeholder for tools registered without one.
const NO_DESCRIPTION: &str = "(no description)";

struct RegisteredTool {
    handler: ToolHandler,
    description: String,
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        let erased: ToolHandler =
            Arc::new(move |params: serde_json::Value| -> HandlerFuture {
                Box::pin(handler(params))
            });
        self.tools.insert(
            name.into(),
            RegisteredTool {
                handler: erased,
                description: description.into(),
            },
        );
    }

    /// Get a tool's handler by name.
    pub fn get(&self, name: &str) -> Option<ToolHandler> {
        self.tools.get(name).map(|t| Arc::clone(&t.handler))
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Sorted names of all registered tools.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Description of a registered tool, or `None` if the name is unknown.
    ///
    /// Tools registered with an empty description get a placeholder.
    pub fn describe(&self, name: &str) -> Option<String> {
        self.tools.get(name).map(|t| {
            if t.description.is_empty() {
                NO_DESCRIPTION.to_owned()
            } else {
                t.description.clone()
            }
        })
    }

    /// Export one catalog entry per tool (for prompt construction).
    ///
    /// Each entry contains `name` and `description`, sorted by name.
    pub fn catalog(&self) -> Vec<serde_json::Value> {
        let mut entries: Vec<(String, serde_json::Value)> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                let entry = serde_json::json!({
                    "name": name,
                    "description": if tool.description.is_empty() {
                        NO_DESCRIPTION
                    } else {
                        tool.description.as_str()
                    },
                });
                (name.clone(), entry)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, v)| v).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
