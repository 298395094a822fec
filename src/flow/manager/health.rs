use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub status: HealthState,
    pub active_executions: usize,
    pub max_concurrent_executions: usize,
    pub registered_flows: usize,
    pub history_size: usize,
    pub error_rate: f64,
    pub uptime_ms: u64,
    pub checked_at: DateTime<Utc>,
}

const DEGRADED_UTILIZATION: f64 = 0.8;
const DEGRADED_ERROR_RATE: f64 = 0.1;
const UNHEALTHY_ERROR_RATE: f64 = 0.5;

/// 满载或错误率过半为 unhealthy；接近满载或错误率超过一成为 degraded
pub fn assess(active: usize, limit: usize, error_rate: f64) -> HealthState {
    let utilization = if limit == 0 {
        1.0
    } else {
        active as f64 / limit as f64
    };
    if utilization >= 1.0 || error_rate > UNHEALTHY_ERROR_RATE {
        HealthState::Unhealthy
    } else if utilization >= DEGRADED_UTILIZATION || error_rate > DEGRADED_ERROR_RATE {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assess() {
        assert_eq!(assess(0, 10, 0.0), HealthState::Healthy);
        assert_eq!(assess(8, 10, 0.0), HealthState::Degraded);
        assert_eq!(assess(1, 10, 0.2), HealthState::Degraded);
        assert_eq!(assess(10, 10, 0.0), HealthState::Unhealthy);
        assert_eq!(assess(0, 10, 0.75), HealthState::Unhealthy);
    }
}
