use std::time::Duration;

use serde::Serialize;

use crate::agent::{Event, Message};
use crate::error::Result;
use crate::state::SessionState;

/// Runner 生命周期事件
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerEvent {
    RunStart {
        session_id: String,
        agent: String,
    },
    IterationStart {
        session_id: String,
        iteration: u32,
    },
    IterationComplete {
        session_id: String,
        iteration: u32,
        has_tool_calls: bool,
    },
    IterationError {
        session_id: String,
        iteration: u32,
        error: String,
    },
    MaxIterationsReached {
        session_id: String,
        max_iterations: u32,
    },
    RunComplete {
        session_id: String,
        iterations: u32,
        duration_ms: u64,
        success: bool,
    },
}

impl RunnerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RunnerEvent::RunStart { .. } => "run_start",
            RunnerEvent::IterationStart { .. } => "iteration_start",
            RunnerEvent::IterationComplete { .. } => "iteration_complete",
            RunnerEvent::IterationError { .. } => "iteration_error",
            RunnerEvent::MaxIterationsReached { .. } => "max_iterations_reached",
            RunnerEvent::RunComplete { .. } => "run_complete",
        }
    }
}

/// Receives runner lifecycle events. Failures are logged by the runner, never propagated.
pub trait RunnerListener: Send + Sync {
    fn on_event(&self, event: &RunnerEvent) -> Result<()>;
}

impl<F> RunnerListener for F
where
    F: Fn(&RunnerEvent) -> Result<()> + Send + Sync,
{
    fn on_event(&self, event: &RunnerEvent) -> Result<()> {
        self(event)
    }
}

/// 单次运行指标
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct RunMetrics {
    pub execution_time: Duration,
    pub iterations: u32,
    pub tool_calls: u32,
    pub errors: u32,
}

/// Runner 累计指标
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct RunnerMetrics {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub total_iterations: u64,
    pub total_tool_calls: u64,
    pub total_errors: u64,
    pub total_execution_time: Duration,
    pub last_run: Option<RunMetrics>,
}

impl RunnerMetrics {
    pub(crate) fn record(&mut self, run: &RunMetrics, success: bool) {
        self.total_runs += 1;
        if success {
            self.successful_runs += 1;
        } else {
            self.failed_runs += 1;
        }
        self.total_iterations += u64::from(run.iterations);
        self.total_tool_calls += u64::from(run.tool_calls);
        self.total_errors += u64::from(run.errors);
        self.total_execution_time += run.execution_time;
        self.last_run = Some(run.clone());
    }

    pub fn average_execution_time(&self) -> Option<Duration> {
        if self.total_runs == 0 {
            return None;
        }
        Some(self.total_execution_time / self.total_runs as u32)
    }
}

/// Runner 执行结果
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub session_id: String,
    pub response: Message,
    pub events: Vec<Event>,
    pub session: SessionState,
    pub metrics: RunMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_accumulate_runs() {
        let mut metrics = RunnerMetrics::default();
        assert_eq!(metrics.average_execution_time(), None);
        metrics.record(
            &RunMetrics {
                execution_time: Duration::from_millis(100),
                iterations: 2,
                tool_calls: 3,
                errors: 0,
            },
            true,
        );
        metrics.record(
            &RunMetrics {
                execution_time: Duration::from_millis(300),
                iterations: 1,
                tool_calls: 0,
                errors: 1,
            },
            false,
        );
        assert_eq!(metrics.total_runs, 2);
        assert_eq!(metrics.successful_runs, 1);
        assert_eq!(metrics.failed_runs, 1);
        assert_eq!(metrics.total_iterations, 3);
        assert_eq!(metrics.total_tool_calls, 3);
        assert_eq!(metrics.total_errors, 1);
        assert_eq!(metrics.average_execution_time(), Some(Duration::from_millis(200)));
    }
}
