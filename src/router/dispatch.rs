//! Dispatch loop and per-invocation execution.
//!
//! The loop owns the queue receiver while the router is running. Every
//! dequeued invocation is spawned onto its own task before the loop goes
//! back to the queue, so any number of handlers can be in flight at once
//! and completion order is unrelated to submission order.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RetentionConfig;

use super::call::{CallId, ToolCall, ToolStatus};
use super::{QueuedCall, RouterInner};

/// Background loop: move invocations from the queue onto their own tasks.
///
/// Exits on cancellation and hands the receiver back to the router so a
/// restart resumes draining whatever is still queued. Handler failures
/// never reach this loop; each execution unit finalizes its own record.
pub(crate) async fn dispatch_loop(
    inner: Arc<RouterInner>,
    mut queue_rx: mpsc::UnboundedReceiver<QueuedCall>,
    cancel: CancellationToken,
) {
    debug!("dispatch loop running");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            queued = queue_rx.recv() => match queued {
                Some(queued) => {
                    // Hand off and return to the queue immediately; a slow
                    // tool must not delay later dispatches.
                    tokio::spawn(execute_call(Arc::clone(&inner), queued));
                }
                None => {
                    warn!("task queue closed; dispatch loop exiting");
                    break;
                }
            },
        }
    }
    *inner
        .queue_rx
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = Some(queue_rx);
    debug!("dispatch loop exited");
}

/// Execution unit for one invocation: mark Running, run the handler, write
/// the terminal state exactly once, then notify.
pub(crate) async fn execute_call(inner: Arc<RouterInner>, queued: QueuedCall) {
    let (tool_name, parameters) = {
        let mut tasks = inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let Some(record) = tasks.get_mut(&queued.id) else {
            warn!(id = %queued.id, "dequeued tool call has no record; skipping");
            return;
        };
        record.status = ToolStatus::Running;
        (record.tool_name.clone(), record.parameters.clone())
    };
    debug!(id = %queued.id, tool = %tool_name, "tool call running");

    let handler = inner
        .registry
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(&tool_name);

    let outcome = match handler {
        Some(handler) => handler(parameters).await,
        // Registration was checked at submission; only a replaced-away
        // registry entry lands here.
        None => Err(anyhow!("tool '{tool_name}' is no longer registered")),
    };

    finalize(&inner, queued, outcome);
}

/// Write the terminal state, apply retention, and fire the callback.
fn finalize(
    inner: &Arc<RouterInner>,
    queued: QueuedCall,
    outcome: anyhow::Result<serde_json::Value>,
) {
    let snapshot = {
        let mut tasks = inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let Some(record) = tasks.get_mut(&queued.id) else {
            warn!(id = %queued.id, "finished tool call has no record");
            return;
        };
        match outcome {
            Ok(result) => record.complete(result),
            Err(e) => record.fail(format!("{e:#}")),
        }
        let snapshot = record.clone();
        evict_terminal(&mut tasks, &inner.retention);
        snapshot
    };

    match snapshot.status {
        ToolStatus::Completed => {
            info!(id = %snapshot.id, tool = %snapshot.tool_name, "tool call completed");
        }
        _ => {
            warn!(
                id = %snapshot.id,
                tool = %snapshot.tool_name,
                error = snapshot.error.as_deref().unwrap_or_default(),
                "tool call failed"
            );
        }
    }

    // The callback runs outside the table lock so it may re-enter the
    // router (poll, resubmit).
    let callback = queued.on_complete.or_else(|| {
        inner
            .callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    });
    if let Some(callback) = callback {
        callback(&snapshot);
    }
}

/// Evict the oldest terminal records beyond the configured cap.
///
/// Pending and Running records are never touched.
fn evict_terminal(tasks: &mut HashMap<CallId, ToolCall>, retention: &RetentionConfig) {
    let Some(max) = retention.max_terminal_records else {
        return;
    };
    let max = max.max(1);

    loop {
        let terminal = tasks.values().filter(|c| c.status.is_terminal()).count();
        if terminal <= max {
            break;
        }
        let oldest = tasks
            .values()
            .filter(|c| c.status.is_terminal())
            .min_by_key(|c| c.completed_at)
            .map(|c| c.id);
        let Some(id) = oldest else {
            break;
        };
        tasks.remove(&id);
        debug!(id = %id, "evicted terminal tool call record");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::Notify;

    use crate::config::{RetentionConfig, RouterConfig};
    use crate::router::{CallId, ToolCall, ToolRouter, ToolStatus};

    fn make_router() -> ToolRouter {
        let router = ToolRouter::new();
        router.register("echo", "Echo parameters back", |params| async move {
            Ok(params)
        });
        router
    }

    /// Register a handler that blocks until the returned gate is notified.
    fn register_gated(router: &ToolRouter, name: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        let handler_gate = Arc::clone(&gate);
        router.register(name, "Waits for the test to release it", move |_params| {
            let gate = Arc::clone(&handler_gate);
            async move {
                gate.notified().await;
                Ok(json!("released"))
            }
        });
        gate
    }

    async fn wait_for_status(router: &ToolRouter, id: CallId, status: ToolStatus) -> ToolCall {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(record) = router.get_task_status(id) {
                if record.status == status {
                    return record;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {status}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn completes_successful_call() {
        let router = make_router();
        router.start();

        let id = router.call_tool("echo", json!({"x": 42})).unwrap();
        let record = wait_for_status(&router, id, ToolStatus::Completed).await;

        assert_eq!(record.result, Some(json!({"x": 42})));
        assert!(record.error.is_none());
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn handler_error_marks_failed() {
        let router = make_router();
        router.register("boom", "Always fails", |_params| async {
            Err(anyhow::anyhow!("bad"))
        });
        router.start();

        let id = router.call_tool("boom", json!({})).unwrap();
        let record = wait_for_status(&router, id, ToolStatus::Failed).await;

        assert!(record.error.as_deref().unwrap().contains("bad"));
        assert!(record.result.is_none());
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn submission_returns_before_handler_runs() {
        let router = make_router();
        let gate = register_gated(&router, "gated");
        router.start();

        // call_tool comes back while the handler is still parked on the gate.
        let id = router.call_tool("gated", json!({})).unwrap();
        let record = router.get_task_status(id).unwrap();
        assert!(!record.status.is_terminal());

        gate.notify_one();
        wait_for_status(&router, id, ToolStatus::Completed).await;
    }

    #[tokio::test]
    async fn status_sequence_runs_pending_running_terminal() {
        let router = make_router();
        let gate = register_gated(&router, "gated");

        let id = router.call_tool("gated", json!({})).unwrap();
        assert_eq!(
            router.get_task_status(id).unwrap().status,
            ToolStatus::Pending
        );

        router.start();
        let running = wait_for_status(&router, id, ToolStatus::Running).await;
        assert!(running.result.is_none());
        assert!(running.error.is_none());
        assert!(running.completed_at.is_none());

        gate.notify_one();
        let done = wait_for_status(&router, id, ToolStatus::Completed).await;

        // Terminal records are never mutated again.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let later = router.get_task_status(id).unwrap();
        assert_eq!(later.status, ToolStatus::Completed);
        assert_eq!(later.completed_at, done.completed_at);
        assert_eq!(later.result, done.result);
    }

    #[tokio::test]
    async fn fast_call_overtakes_slow_call() {
        let router = make_router();
        router.register("slow", "Sleeps before answering", |_params| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(json!("slow-done"))
        });
        router.register("fast", "Answers immediately", |_params| async {
            Ok(json!("fast-done"))
        });
        router.start();

        let slow_id = router.call_tool("slow", json!({})).unwrap();
        let fast_id = router.call_tool("fast", json!({})).unwrap();

        let fast = wait_for_status(&router, fast_id, ToolStatus::Completed).await;
        let slow_meanwhile = router.get_task_status(slow_id).unwrap();
        assert!(!slow_meanwhile.status.is_terminal());

        let slow = wait_for_status(&router, slow_id, ToolStatus::Completed).await;
        assert!(fast.completed_at.unwrap() < slow.completed_at.unwrap());
    }

    #[tokio::test]
    async fn callback_fires_once_per_terminal_call() {
        let router = make_router();
        router.register("boom", "Always fails", |_params| async {
            Err(anyhow::anyhow!("bad"))
        });

        let seen: Arc<Mutex<Vec<(CallId, ToolStatus)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        router.set_callback(move |record| {
            sink.lock().unwrap().push((record.id, record.status));
        });
        router.start();

        let ok_id = router.call_tool("echo", json!({})).unwrap();
        let err_id = router.call_tool("boom", json!({})).unwrap();
        wait_for_status(&router, ok_id, ToolStatus::Completed).await;
        wait_for_status(&router, err_id, ToolStatus::Failed).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&(ok_id, ToolStatus::Completed)));
        assert!(seen.contains(&(err_id, ToolStatus::Failed)));
    }

    #[tokio::test]
    async fn continuation_overrides_global_callback() {
        let router = make_router();

        let global_hits = Arc::new(Mutex::new(0_usize));
        let global_sink = Arc::clone(&global_hits);
        router.set_callback(move |_record| {
            *global_sink.lock().unwrap() += 1;
        });

        let continuation_hits = Arc::new(Mutex::new(0_usize));
        let continuation_sink = Arc::clone(&continuation_hits);
        router.start();

        let id = router
            .call_tool_with("echo", json!({}), move |record| {
                assert_eq!(record.status, ToolStatus::Completed);
                *continuation_sink.lock().unwrap() += 1;
            })
            .unwrap();
        wait_for_status(&router, id, ToolStatus::Completed).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*continuation_hits.lock().unwrap(), 1);
        assert_eq!(*global_hits.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn retention_cap_evicts_oldest_terminal_records() {
        let router = ToolRouter::with_config(RouterConfig {
            retention: RetentionConfig {
                max_terminal_records: Some(2),
            },
        });
        router.register("echo", "Echo parameters back", |params| async move {
            Ok(params)
        });
        router.start();

        let mut ids = Vec::new();
        for n in 0..4 {
            let id = router.call_tool("echo", json!({"n": n})).unwrap();
            wait_for_status(&router, id, ToolStatus::Completed).await;
            ids.push(id);
        }

        assert_eq!(router.task_count(), 2);
        assert!(router.get_task_status(ids[0]).is_none());
        assert!(router.get_task_status(ids[1]).is_none());
        assert!(router.get_task_status(ids[2]).is_some());
        assert!(router.get_task_status(ids[3]).is_some());
    }

    #[tokio::test]
    async fn stop_abandons_queue_and_restart_drains_it() {
        let router = make_router();
        router.start();
        router.stop();
        // Let the loop hand its receiver back.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let id = router.call_tool("echo", json!({})).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            router.get_task_status(id).unwrap().status,
            ToolStatus::Pending
        );

        router.start();
        wait_for_status(&router, id, ToolStatus::Completed).await;
    }

    #[tokio::test]
    async fn stop_does_not_cancel_in_flight_execution() {
        let router = make_router();
        let gate = register_gated(&router, "gated");
        router.start();

        let id = router.call_tool("gated", json!({})).unwrap();
        wait_for_status(&router, id, ToolStatus::Running).await;

        router.stop();
        gate.notify_one();
        let record = wait_for_status(&router, id, ToolStatus::Completed).await;
        assert_eq!(record.result, Some(json!("released")));
    }
}
