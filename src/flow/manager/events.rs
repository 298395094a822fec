use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::Result;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowEventKind {
    FlowRegistered,
    FlowUnregistered,
    FlowStarted,
    FlowCompleted,
    FlowFailed,
    FlowPaused,
    FlowCancelled,
    FlowsRestored,
}

impl FlowEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowEventKind::FlowRegistered => "FLOW_REGISTERED",
            FlowEventKind::FlowUnregistered => "FLOW_UNREGISTERED",
            FlowEventKind::FlowStarted => "FLOW_STARTED",
            FlowEventKind::FlowCompleted => "FLOW_COMPLETED",
            FlowEventKind::FlowFailed => "FLOW_FAILED",
            FlowEventKind::FlowPaused => "FLOW_PAUSED",
            FlowEventKind::FlowCancelled => "FLOW_CANCELLED",
            FlowEventKind::FlowsRestored => "FLOWS_RESTORED",
        }
    }
}

impl fmt::Display for FlowEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// FlowManager 生命周期事件
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ManagerEvent {
    pub kind: FlowEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
}

impl ManagerEvent {
    pub fn new(kind: FlowEventKind) -> Self {
        Self {
            kind,
            flow_id: None,
            execution_id: None,
            timestamp: Utc::now(),
            data: Value::Null,
        }
    }

    pub fn for_flow(kind: FlowEventKind, flow_id: impl Into<String>) -> Self {
        Self {
            flow_id: Some(flow_id.into()),
            ..Self::new(kind)
        }
    }

    pub fn for_execution(
        kind: FlowEventKind,
        flow_id: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: Some(execution_id.into()),
            ..Self::for_flow(kind, flow_id)
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

pub trait FlowEventListener: Send + Sync {
    fn on_event(&self, event: &ManagerEvent) -> Result<()>;
}

impl<F> FlowEventListener for F
where
    F: Fn(&ManagerEvent) -> Result<()> + Send + Sync,
{
    fn on_event(&self, event: &ManagerEvent) -> Result<()> {
        self(event)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: Option<FlowEventKind>,
    listener: Arc<dyn FlowEventListener>,
}

/// 按事件类型分发的订阅列表；监听器失败只记录日志
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        kind: FlowEventKind,
        listener: Arc<dyn FlowEventListener>,
    ) -> SubscriptionId {
        self.add(Some(kind), listener)
    }

    pub fn subscribe_all(&self, listener: Arc<dyn FlowEventListener>) -> SubscriptionId {
        self.add(None, listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != id);
        subscriptions.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn emit(&self, event: &ManagerEvent) {
        let listeners: Vec<Arc<dyn FlowEventListener>> = self
            .subscriptions
            .read()
            .iter()
            .filter(|subscription| subscription.kind.map_or(true, |kind| kind == event.kind))
            .map(|subscription| Arc::clone(&subscription.listener))
            .collect();

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(event = %event.kind, error = %err, "flow event listener failed"),
                Err(_) => warn!(event = %event.kind, "flow event listener panicked"),
            }
        }
    }

    fn add(&self, kind: Option<FlowEventKind>, listener: Arc<dyn FlowEventListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription { id, kind, listener });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoomError;
    use parking_lot::Mutex;

    #[test]
    fn test_dispatch_by_kind() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.subscribe(
            FlowEventKind::FlowCancelled,
            Arc::new(move |event: &ManagerEvent| -> Result<()> {
                sink.lock().push(event.kind);
                Ok(())
            }),
        );
        bus.subscribe_all(Arc::new(|_: &ManagerEvent| -> Result<()> {
            Err(LoomError::InvalidState("listener down".into()))
        }));

        bus.emit(&ManagerEvent::new(FlowEventKind::FlowStarted));
        bus.emit(&ManagerEvent::new(FlowEventKind::FlowCancelled));
        assert_eq!(*seen.lock(), vec![FlowEventKind::FlowCancelled]);
        assert_eq!(bus.listener_count(), 2);
    }
}
