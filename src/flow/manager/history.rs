use std::cmp::Ordering;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::types::{ExecutionState, FlowExecutionResult};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    StartedAt,
    EndedAt,
    Duration,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// 执行历史查询：过滤、排序、分页
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionQuery {
    pub flow_id: Option<String>,
    pub state: Option<ExecutionState>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub sort_by: SortField,
    pub order: SortOrder,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ExecutionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flow(mut self, flow_id: impl Into<String>) -> Self {
        self.flow_id = Some(flow_id.into());
        self
    }

    pub fn state(mut self, state: ExecutionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn started_after(mut self, at: DateTime<Utc>) -> Self {
        self.started_after = Some(at);
        self
    }

    pub fn started_before(mut self, at: DateTime<Utc>) -> Self {
        self.started_before = Some(at);
        self
    }

    pub fn sort(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_by = field;
        self.order = order;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    fn matches(&self, result: &FlowExecutionResult) -> bool {
        if self.flow_id.as_deref().is_some_and(|id| id != result.flow_id) {
            return false;
        }
        if self.state.is_some_and(|state| state != result.state) {
            return false;
        }
        if let Some(after) = self.started_after {
            if !result.started_at.is_some_and(|started| started >= after) {
                return false;
            }
        }
        if let Some(before) = self.started_before {
            if !result.started_at.is_some_and(|started| started < before) {
                return false;
            }
        }
        true
    }

    fn compare(&self, a: &FlowExecutionResult, b: &FlowExecutionResult) -> Ordering {
        let ordering = match self.sort_by {
            SortField::StartedAt => a.started_at.cmp(&b.started_at),
            SortField::EndedAt => a.ended_at.cmp(&b.ended_at),
            SortField::Duration => a.duration().cmp(&b.duration()),
        };
        match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPage {
    pub items: Vec<FlowExecutionResult>,
    /// Matches before pagination.
    pub total: usize,
    pub offset: usize,
    pub limit: Option<usize>,
    pub has_more: bool,
}

/// 有界执行历史，超出上限时丢弃最早的记录
#[derive(Debug)]
pub struct ExecutionHistory {
    records: VecDeque<FlowExecutionResult>,
    max_records: usize,
}

impl ExecutionHistory {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::new(),
            max_records,
        }
    }

    pub fn push(&mut self, result: FlowExecutionResult) {
        self.records.push_back(result);
        while self.records.len() > self.max_records {
            self.records.pop_front();
        }
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.records
            .iter()
            .any(|record| record.execution_id == execution_id)
    }

    pub fn get(&self, execution_id: &str) -> Option<&FlowExecutionResult> {
        self.records
            .iter()
            .rev()
            .find(|record| record.execution_id == execution_id)
    }

    pub fn get_mut(&mut self, execution_id: &str) -> Option<&mut FlowExecutionResult> {
        self.records
            .iter_mut()
            .rev()
            .find(|record| record.execution_id == execution_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowExecutionResult> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn query(&self, query: &ExecutionQuery) -> ExecutionPage {
        let mut matched: Vec<&FlowExecutionResult> =
            self.records.iter().filter(|record| query.matches(record)).collect();
        matched.sort_by(|a, b| query.compare(a, b));

        let total = matched.len();
        let items: Vec<FlowExecutionResult> = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        let has_more = query.offset + items.len() < total;
        ExecutionPage {
            items,
            total,
            offset: query.offset,
            limit: query.limit,
            has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, flow: &str, state: ExecutionState, offset_secs: i64) -> FlowExecutionResult {
        let started = Utc::now() - Duration::seconds(100 - offset_secs);
        let mut result = FlowExecutionResult::new(id, flow);
        result.state = state;
        result.started_at = Some(started);
        result.ended_at = Some(started + Duration::milliseconds(offset_secs * 10));
        result
    }

    fn history() -> ExecutionHistory {
        let mut history = ExecutionHistory::new(10);
        history.push(record("e1", "a", ExecutionState::Completed, 1));
        history.push(record("e2", "b", ExecutionState::Failed, 2));
        history.push(record("e3", "a", ExecutionState::Completed, 3));
        history.push(record("e4", "a", ExecutionState::Failed, 4));
        history
    }

    #[test]
    fn test_filter_sort_paginate() {
        let history = history();
        let page = history.query(&ExecutionQuery::new().flow("a").page(0, 2));
        let ids: Vec<&str> = page.items.iter().map(|r| r.execution_id.as_str()).collect();
        assert_eq!(ids, vec!["e4", "e3"]);
        assert_eq!(page.total, 3);
        assert!(page.has_more);

        let page = history.query(
            &ExecutionQuery::new()
                .state(ExecutionState::Completed)
                .sort(SortField::Duration, SortOrder::Asc),
        );
        let ids: Vec<&str> = page.items.iter().map(|r| r.execution_id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e3"]);
        assert!(!page.has_more);
    }

    #[test]
    fn test_bounded() {
        let mut history = ExecutionHistory::new(2);
        history.push(record("e1", "a", ExecutionState::Completed, 1));
        history.push(record("e2", "a", ExecutionState::Completed, 2));
        history.push(record("e3", "a", ExecutionState::Completed, 3));
        assert_eq!(history.len(), 2);
        assert!(history.get("e1").is_none());
        assert!(history.contains("e3"));
    }
}
