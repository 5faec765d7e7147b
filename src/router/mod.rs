//! Tool-call routing core.
//!
//! The [`ToolRouter`] is the single bridge between the companion's decision
//! loop and its tools. The decision loop registers tools once, then submits
//! named invocations without blocking: submission stores a Pending record
//! in the task table, enqueues it, and returns an id immediately. A
//! background dispatch loop dequeues invocations in FIFO order and spawns
//! each onto its own task, so a slow tool never delays the next dispatch.
//! Terminal outcomes are observable by polling [`ToolRouter::get_task_status`]
//! or through a completion callback.
//!
//! Stopping the router abandons rather than cancels: in-flight handlers run
//! to their natural end, and queued invocations stay Pending until a
//! restart resumes draining the same queue.

pub mod call;
pub mod dispatch;
pub mod registry;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{RetentionConfig, RouterConfig};
use crate::error::{Result, RouterError};

pub use call::{CallId, ToolCall, ToolStatus};
pub use registry::{HandlerFuture, ToolHandler, ToolRegistry};

/// Callback invoked with the finalized record when an invocation reaches a
/// terminal state.
///
/// Runs synchronously on the execution unit's task; it must not block
/// indefinitely or it stalls that unit's wind-down.
pub type CompletionCallback = Arc<dyn Fn(&ToolCall) + Send + Sync>;

/// Queue entry: the invocation id plus its optional continuation.
pub(crate) struct QueuedCall {
    pub(crate) id: CallId,
    pub(crate) on_complete: Option<CompletionCallback>,
}

/// Shared router state, owned jointly by the handle, the dispatch loop,
/// and every spawned execution unit.
pub(crate) struct RouterInner {
    pub(crate) registry: RwLock<ToolRegistry>,
    pub(crate) tasks: Mutex<HashMap<CallId, ToolCall>>,
    pub(crate) callback: Mutex<Option<CompletionCallback>>,
    pub(crate) queue_tx: mpsc::UnboundedSender<QueuedCall>,
    /// Receiver slot. Taken by `start()`, handed back by the dispatch loop
    /// on exit so a restart resumes draining the same queue.
    pub(crate) queue_rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedCall>>>,
    pub(crate) cancel: Mutex<CancellationToken>,
    pub(crate) running: AtomicBool,
    pub(crate) retention: RetentionConfig,
}

/// Mediator between the decision loop and all registered tools.
///
/// Cheap to clone; all clones share the same registry, task table, and
/// queue.
#[derive(Clone)]
pub struct ToolRouter {
    inner: Arc<RouterInner>,
}

impl ToolRouter {
    /// Create a router with default configuration.
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a router with the given configuration.
    pub fn with_config(config: RouterConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(RouterInner {
                registry: RwLock::new(ToolRegistry::new()),
                tasks: Mutex::new(HashMap::new()),
                callback: Mutex::new(None),
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                cancel: Mutex::new(CancellationToken::new()),
                running: AtomicBool::new(false),
                retention: config.retention,
            }),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register<F, Fut>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        let name = name.into();
        self.inner
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .register(name.clone(), description, handler);
        debug!(tool = %name, "tool registered");
    }

    /// Check if a tool is registered.
    pub fn has_tool(&self, name: &str) -> bool {
        self.inner
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .has(name)
    }

    /// Sorted names of all registered tools.
    pub fn list_tools(&self) -> Vec<String> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .list()
    }

    /// Description of a registered tool, or `None` if the name is unknown.
    pub fn describe_tool(&self, name: &str) -> Option<String> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .describe(name)
    }

    /// One catalog entry per registered tool, for prompt construction.
    pub fn catalog(&self) -> Vec<serde_json::Value> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .catalog()
    }

    /// Register the global completion callback. Replaces any existing one.
    pub fn set_callback(&self, callback: impl Fn(&ToolCall) + Send + Sync + 'static) {
        *self.inner.callback.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(callback));
    }

    /// Submit a tool invocation without waiting for it to run.
    ///
    /// Stores a Pending record, enqueues it, and returns its id. The id is
    /// valid for [`get_task_status`](Self::get_task_status) from the moment
    /// this returns, even before execution starts.
    ///
    /// # Errors
    ///
    /// [`RouterError::UnknownTool`] when `tool_name` is not registered; no
    /// record is created in that case.
    pub fn call_tool(&self, tool_name: &str, parameters: serde_json::Value) -> Result<CallId> {
        self.submit(tool_name, parameters, None)
    }

    /// Like [`call_tool`](Self::call_tool), with a continuation that runs
    /// for this invocation instead of the global callback.
    pub fn call_tool_with(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
        on_complete: impl Fn(&ToolCall) + Send + Sync + 'static,
    ) -> Result<CallId> {
        self.submit(tool_name, parameters, Some(Arc::new(on_complete)))
    }

    fn submit(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
        on_complete: Option<CompletionCallback>,
    ) -> Result<CallId> {
        let known = self
            .inner
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .has(tool_name);
        if !known {
            return Err(RouterError::UnknownTool(tool_name.to_owned()));
        }

        let record = ToolCall::new(tool_name, parameters);
        let id = record.id;
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, record);

        if self.inner.queue_tx.send(QueuedCall { id, on_complete }).is_err() {
            // Unreachable while the router is alive; the receiver lives in
            // the inner state between runs of the dispatch loop.
            self.inner
                .tasks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            return Err(RouterError::Channel("task queue closed".to_owned()));
        }

        debug!(id = %id, tool = tool_name, "tool call enqueued");
        Ok(id)
    }

    /// Snapshot of an invocation record, or `None` for an unknown id.
    ///
    /// Never blocks; the snapshot may be stale by the time it is read.
    pub fn get_task_status(&self, id: CallId) -> Option<ToolCall> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Number of records currently in the task table.
    pub fn task_count(&self) -> usize {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether the dispatch loop is active.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start the dispatch loop. No-op while already running.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("tool router already running");
            return;
        }

        let Some(queue_rx) = self
            .inner
            .queue_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            // A stopped loop has not finished winding down yet.
            warn!("dispatch loop still shutting down; start ignored");
            self.inner.running.store(false, Ordering::SeqCst);
            return;
        };

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock().unwrap_or_else(|e| e.into_inner()) = cancel.clone();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(dispatch::dispatch_loop(inner, queue_rx, cancel));
        info!("tool router started");
    }

    /// Stop the dispatch loop after its current dequeue attempt.
    ///
    /// In-flight executions run to completion or failure on their own;
    /// queued invocations stay Pending until a restart.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
        info!("tool router stopped; in-flight tool calls continue");
    }
}

impl Default for ToolRouter {
    fn default() -> Self {
        Self::new()
    }
}
