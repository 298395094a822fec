use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{FlowConfig, FlowStep, RetryConfig};
use crate::error::{LoomError, Result};
use crate::utils::{is_valid_flow_id, is_valid_version};

pub const MAX_ID_LENGTH: usize = 100;
pub const MAX_NAME_LENGTH: usize = 200;
pub const MAX_DESCRIPTION_LENGTH: usize = 1000;

/// 校验问题：字段路径 + 描述
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turns a report with errors into `LoomError::Validation`.
    pub fn into_result(self) -> Result<Vec<ValidationIssue>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(LoomError::Validation(self.errors))
        }
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue::new(path, message));
    }

    fn warning(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue::new(path, message));
    }
}

/// Flow 校验器
///
/// 三个互不短路的阶段：结构、逐步骤、依赖图，所有错误一并收集。
#[derive(Clone, Debug, Default)]
pub struct FlowValidator {
    known_types: HashSet<String>,
}

impl FlowValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step types without a registered executor are reported as warnings.
    pub fn with_known_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_types: types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self, flow: &FlowConfig) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.validate_structure(flow, &mut report);
        self.validate_steps(flow, &mut report);
        self.validate_dependencies(flow, &mut report);
        report
    }

    fn validate_structure(&self, flow: &FlowConfig, report: &mut ValidationReport) {
        if flow.id.trim().is_empty() {
            report.error("id", "flow id is required");
        } else {
            if !is_valid_flow_id(&flow.id) {
                report.error(
                    "id",
                    "flow id may only contain letters, digits, underscores and hyphens",
                );
            }
            if flow.id.len() > MAX_ID_LENGTH {
                report.error("id", format!("flow id exceeds {MAX_ID_LENGTH} characters"));
            }
        }

        if flow.name.trim().is_empty() {
            report.error("name", "flow name is required");
        } else if flow.name.chars().count() > MAX_NAME_LENGTH {
            report.error("name", format!("flow name exceeds {MAX_NAME_LENGTH} characters"));
        }

        if flow.version.trim().is_empty() {
            report.error("version", "flow version is required");
        } else if !is_valid_version(&flow.version) {
            report.error("version", "version must follow MAJOR.MINOR.PATCH");
        }

        if let Some(description) = &flow.description {
            if description.chars().count() > MAX_DESCRIPTION_LENGTH {
                report.error(
                    "description",
                    format!("description exceeds {MAX_DESCRIPTION_LENGTH} characters"),
                );
            }
        }

        if flow.steps.is_empty() {
            report.error("steps", "flow must declare at least one step");
        }
        if flow.timeout_ms == Some(0) {
            report.error("timeout_ms", "flow timeout must be positive");
        }
        if let Some(retry) = &flow.retry {
            validate_retry("retry", retry, report);
        }
    }

    fn validate_steps(&self, flow: &FlowConfig, report: &mut ValidationReport) {
        let mut seen = HashSet::new();
        for (index, step) in flow.steps.iter().enumerate() {
            let path = format!("steps[{index}]");
            self.validate_step(&path, step, report);
            if !step.id.is_empty() && !seen.insert(step.id.as_str()) {
                report.error(format!("{path}.id"), format!("duplicate step id `{}`", step.id));
            }
        }
    }

    fn validate_step(&self, path: &str, step: &FlowStep, report: &mut ValidationReport) {
        if step.id.trim().is_empty() {
            report.error(format!("{path}.id"), "step id is required");
        } else if !is_valid_flow_id(&step.id) {
            report.error(
                format!("{path}.id"),
                format!("step id `{}` contains invalid characters", step.id),
            );
        }
        if step.name.trim().is_empty() {
            report.error(format!("{path}.name"), "step name is required");
        }
        if step.step_type.trim().is_empty() {
            report.error(format!("{path}.type"), "step type is required");
        } else if !self.known_types.is_empty() && !self.known_types.contains(&step.step_type) {
            report.warning(
                format!("{path}.type"),
                format!("no executor registered for step type `{}`", step.step_type),
            );
        }
        if !matches!(step.config, Value::Object(_)) {
            report.error(format!("{path}.config"), "step config must be an object");
        }
        if step.timeout_ms == Some(0) {
            report.error(format!("{path}.timeout_ms"), "step timeout must be positive");
        }
        if let Some(retry) = &step.retry {
            validate_retry(&format!("{path}.retry"), retry, report);
        }
    }

    fn validate_dependencies(&self, flow: &FlowConfig, report: &mut ValidationReport) {
        let ids: HashSet<&str> = flow.steps.iter().map(|step| step.id.as_str()).collect();
        for (index, step) in flow.steps.iter().enumerate() {
            for dependency in &step.depends_on {
                if !ids.contains(dependency.as_str()) {
                    report.error(
                        format!("steps[{index}].depends_on"),
                        format!(
                            "step `{}` depends on unknown step `{dependency}`",
                            step.id
                        ),
                    );
                }
            }
        }

        for cycle in find_cycles(&flow.steps) {
            report.error("steps", format!("dependency cycle: {}", cycle.join(" -> ")));
        }
    }
}

fn validate_retry(path: &str, retry: &RetryConfig, report: &mut ValidationReport) {
    if retry.max_attempts == 0 || retry.max_attempts > RetryConfig::MAX_ATTEMPTS {
        report.error(
            format!("{path}.max_attempts"),
            format!("max_attempts must be between 1 and {}", RetryConfig::MAX_ATTEMPTS),
        );
    }
    if !(retry.backoff_multiplier >= 1.0) {
        report.error(
            format!("{path}.backoff_multiplier"),
            "backoff_multiplier must be >= 1.0",
        );
    }
    if let Some(max_delay) = retry.max_delay_ms {
        if max_delay < retry.delay_ms {
            report.error(format!("{path}.max_delay_ms"), "max_delay_ms must be >= delay_ms");
        }
    }
}

/// 深度优先遍历依赖图，返回每个环的步骤链（首尾为同一步骤）
///
/// 未知依赖在此忽略，由依赖检查单独报告。
pub fn find_cycles(steps: &[FlowStep]) -> Vec<Vec<String>> {
    let graph: HashMap<&str, &[String]> = steps
        .iter()
        .map(|step| (step.id.as_str(), step.depends_on.as_slice()))
        .collect();

    let mut walker = CycleWalker {
        graph: &graph,
        visited: HashSet::new(),
        stack: Vec::new(),
        cycles: Vec::new(),
    };
    for step in steps {
        if !walker.visited.contains(step.id.as_str()) {
            walker.visit(step.id.as_str());
        }
    }
    walker.cycles
}

struct CycleWalker<'a> {
    graph: &'a HashMap<&'a str, &'a [String]>,
    visited: HashSet<&'a str>,
    stack: Vec<&'a str>,
    cycles: Vec<Vec<String>>,
}

impl<'a> CycleWalker<'a> {
    fn visit(&mut self, node: &'a str) {
        self.visited.insert(node);
        self.stack.push(node);

        let graph = self.graph;
        if let Some(dependencies) = graph.get(node) {
            for dependency in dependencies.iter() {
                let dependency = dependency.as_str();
                if !graph.contains_key(dependency) {
                    continue;
                }
                if let Some(position) = self.stack.iter().position(|id| *id == dependency) {
                    let mut cycle: Vec<String> =
                        self.stack[position..].iter().map(|id| id.to_string()).collect();
                    cycle.push(dependency.to_string());
                    self.cycles.push(cycle);
                } else if !self.visited.contains(dependency) {
                    self.visit(dependency);
                }
            }
        }

        self.stack.pop();
    }
}
