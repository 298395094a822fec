use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::types::{ExecutionState, FlowExecutionResult};

/// 单个 flow 的统计快照
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FlowStats {
    pub flow_id: String,
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub cancelled_count: u64,
    pub min_duration_ms: Option<u64>,
    pub avg_duration_ms: Option<f64>,
    pub max_duration_ms: Option<u64>,
    /// Executions finished within the last minute.
    pub throughput_per_minute: u64,
    pub error_rate: f64,
    pub last_execution_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct FlowCounters {
    executions: u64,
    successes: u64,
    failures: u64,
    cancelled: u64,
    timed: u64,
    total_duration_ms: u64,
    min_duration_ms: Option<u64>,
    max_duration_ms: Option<u64>,
    recent: VecDeque<DateTime<Utc>>,
    last_execution_at: Option<DateTime<Utc>>,
}

/// 按 flow 滚动统计
#[derive(Debug, Default)]
pub struct FlowMetrics {
    flows: HashMap<String, FlowCounters>,
}

impl FlowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &FlowExecutionResult) {
        let finished_at = result.ended_at.unwrap_or_else(Utc::now);
        let counters = self.flows.entry(result.flow_id.clone()).or_default();
        counters.executions += 1;
        match result.state {
            ExecutionState::Completed => counters.successes += 1,
            ExecutionState::Failed => counters.failures += 1,
            ExecutionState::Cancelled => counters.cancelled += 1,
            _ => {}
        }
        if let Some(duration) = result.duration() {
            let millis = duration.as_millis() as u64;
            counters.timed += 1;
            counters.total_duration_ms += millis;
            counters.min_duration_ms = Some(counters.min_duration_ms.map_or(millis, |m| m.min(millis)));
            counters.max_duration_ms = Some(counters.max_duration_ms.map_or(millis, |m| m.max(millis)));
        }
        counters.recent.push_back(finished_at);
        counters.last_execution_at = Some(finished_at);
        prune(&mut counters.recent, Utc::now());
    }

    pub fn forget(&mut self, flow_id: &str) {
        self.flows.remove(flow_id);
    }

    pub fn stats(&self, flow_id: &str) -> FlowStats {
        self.stats_at(flow_id, Utc::now())
    }

    pub fn stats_at(&self, flow_id: &str, now: DateTime<Utc>) -> FlowStats {
        let Some(counters) = self.flows.get(flow_id) else {
            return FlowStats {
                flow_id: flow_id.to_string(),
                ..FlowStats::default()
            };
        };
        let window_start = now - Duration::minutes(1);
        FlowStats {
            flow_id: flow_id.to_string(),
            execution_count: counters.executions,
            success_count: counters.successes,
            failure_count: counters.failures,
            cancelled_count: counters.cancelled,
            min_duration_ms: counters.min_duration_ms,
            avg_duration_ms: (counters.timed > 0)
                .then(|| counters.total_duration_ms as f64 / counters.timed as f64),
            max_duration_ms: counters.max_duration_ms,
            throughput_per_minute: counters
                .recent
                .iter()
                .filter(|at| **at > window_start && **at <= now)
                .count() as u64,
            error_rate: ratio(counters.failures, counters.executions),
            last_execution_at: counters.last_execution_at,
        }
    }

    /// Failure ratio across every flow.
    pub fn overall_error_rate(&self) -> f64 {
        let (failures, executions) = self
            .flows
            .values()
            .fold((0, 0), |(f, e), c| (f + c.failures, e + c.executions));
        ratio(failures, executions)
    }
}

fn prune(recent: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
    let window_start = now - Duration::minutes(1);
    while recent.front().is_some_and(|at| *at <= window_start) {
        recent.pop_front();
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(flow: &str, state: ExecutionState, millis: i64) -> FlowExecutionResult {
        let ended = Utc::now();
        let mut result = FlowExecutionResult::new(format!("{flow}-{millis}"), flow);
        result.state = state;
        result.started_at = Some(ended - Duration::milliseconds(millis));
        result.ended_at = Some(ended);
        result
    }

    #[test]
    fn test_stats() {
        let mut metrics = FlowMetrics::new();
        metrics.record(&finished("etl", ExecutionState::Completed, 100));
        metrics.record(&finished("etl", ExecutionState::Completed, 300));
        metrics.record(&finished("etl", ExecutionState::Failed, 200));
        metrics.record(&finished("other", ExecutionState::Completed, 50));

        let stats = metrics.stats("etl");
        assert_eq!(stats.execution_count, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.min_duration_ms, Some(100));
        assert_eq!(stats.max_duration_ms, Some(300));
        assert_eq!(stats.avg_duration_ms, Some(200.0));
        assert_eq!(stats.throughput_per_minute, 3);
        assert!((stats.error_rate - 1.0 / 3.0).abs() < f64::EPSILON);
        assert!((metrics.overall_error_rate() - 0.25).abs() < f64::EPSILON);

        let later = metrics.stats_at("etl", Utc::now() + Duration::minutes(2));
        assert_eq!(later.throughput_per_minute, 0);
        assert_eq!(metrics.stats("unknown").execution_count, 0);
    }
}
