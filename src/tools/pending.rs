use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{LoomError, Result};

struct PendingEntry {
    tool: String,
    call_id: String,
    registered_at: Instant,
    sender: Option<oneshot::Sender<Value>>,
    receiver: Option<oneshot::Receiver<Value>>,
}

/// Side channel for long-running tool calls, keyed by correlation id.
#[derive(Default)]
pub struct PendingToolCalls {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingToolCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, correlation_id: &str, tool: &str, call_id: &str) {
        let (sender, receiver) = oneshot::channel();
        debug!(correlation_id, tool, call_id, "pending tool call registered");
        self.entries.lock().insert(
            correlation_id.to_string(),
            PendingEntry {
                tool: tool.to_string(),
                call_id: call_id.to_string(),
                registered_at: Instant::now(),
                sender: Some(sender),
                receiver: Some(receiver),
            },
        );
    }

    /// Delivers the real result of a pending call.
    ///
    /// When a waiter already holds the receiver the entry is dropped right away;
    /// otherwise the value stays buffered until `wait` collects it.
    pub fn resolve(&self, correlation_id: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(correlation_id)
            .ok_or_else(|| LoomError::not_found("pending tool call", correlation_id))?;
        let sender = entry.sender.take().ok_or_else(|| {
            LoomError::InvalidState(format!("tool call `{correlation_id}` already resolved"))
        })?;
        debug!(correlation_id, tool = %entry.tool, "pending tool call resolved");
        let awaited = entry.receiver.is_none();
        // 接收端可能已被丢弃，此时结果直接作废
        let _ = sender.send(value);
        if awaited {
            entries.remove(correlation_id);
        }
        Ok(())
    }

    /// Drops a call whether or not it was resolved; an active waiter sees it as abandoned.
    pub fn forget(&self, correlation_id: &str) -> bool {
        self.entries.lock().remove(correlation_id).is_some()
    }

    /// Drops every call registered longer ago than `max_age`; returns how many were removed.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.registered_at.elapsed() <= max_age);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "stale pending tool calls evicted");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Waits for the result of a pending call and forgets it afterwards.
    pub async fn wait(&self, correlation_id: &str) -> Result<Value> {
        let receiver = {
            let mut entries = self.entries.lock();
            let entry = entries
                .get_mut(correlation_id)
                .ok_or_else(|| LoomError::not_found("pending tool call", correlation_id))?;
            entry.receiver.take().ok_or_else(|| {
                LoomError::InvalidState(format!("tool call `{correlation_id}` is already awaited"))
            })?
        };
        let value = receiver.await.map_err(|_| {
            LoomError::InvalidState(format!("tool call `{correlation_id}` was abandoned"))
        })?;
        self.entries.lock().remove(correlation_id);
        Ok(value)
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.entries
            .lock()
            .get(correlation_id)
            .map(|entry| entry.sender.is_some())
            .unwrap_or(false)
    }

    pub fn call_id(&self, correlation_id: &str) -> Option<String> {
        self.entries
            .lock()
            .get(correlation_id)
            .map(|entry| entry.call_id.clone())
    }

    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.sender.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_before_wait_delivers_value() {
        let pending = PendingToolCalls::new();
        pending.register("corr-1", "render", "call-1");
        assert!(pending.is_pending("corr-1"));
        assert_eq!(pending.call_id("corr-1").as_deref(), Some("call-1"));

        pending.resolve("corr-1", json!({"done": true})).unwrap();
        assert!(!pending.is_pending("corr-1"));
        assert!(pending.resolve("corr-1", json!(null)).is_err());

        let value = pending.wait("corr-1").await.unwrap();
        assert_eq!(value, json!({"done": true}));
        assert!(pending.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn resolving_an_awaited_call_evicts_it() {
        let pending = std::sync::Arc::new(PendingToolCalls::new());
        pending.register("corr-2", "render", "call-2");

        let waiter = {
            let pending = pending.clone();
            tokio::spawn(async move { pending.wait("corr-2").await })
        };
        while pending.entries.lock().get("corr-2").map(|e| e.receiver.is_some()) == Some(true) {
            tokio::task::yield_now().await;
        }

        pending.resolve("corr-2", json!(7)).unwrap();
        assert!(pending.is_empty());
        assert_eq!(waiter.await.unwrap().unwrap(), json!(7));
    }

    #[tokio::test]
    async fn forgotten_and_stale_calls_are_dropped() {
        let pending = PendingToolCalls::new();
        pending.register("corr-a", "render", "call-a");
        pending.register("corr-b", "render", "call-b");
        pending.resolve("corr-b", json!(1)).unwrap();

        assert!(pending.forget("corr-a"));
        assert!(!pending.forget("corr-a"));
        assert_eq!(pending.len(), 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(pending.evict_older_than(Duration::from_secs(60)), 0);
        assert_eq!(pending.evict_older_than(Duration::ZERO), 1);
        assert!(pending.is_empty());
        assert!(matches!(pending.wait("corr-b").await, Err(LoomError::NotFound { .. })));
    }

    #[test]
    fn unknown_correlation_id_is_not_found() {
        let pending = PendingToolCalls::new();
        let err = pending.resolve("nope", json!(1)).unwrap_err();
        assert!(matches!(err, LoomError::NotFound { .. }));
    }
}
