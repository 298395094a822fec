use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoomError, Result};
use crate::flow::types::{FlowConfig, FlowExecutionResult};

pub const BACKUP_FORMAT_VERSION: &str = "1";

/// Flow 定义与执行历史的可序列化快照
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FlowBackup {
    pub format_version: String,
    pub created_at: DateTime<Utc>,
    pub flows: Vec<FlowConfig>,
    #[serde(default)]
    pub executions: Vec<FlowExecutionResult>,
}

impl FlowBackup {
    pub fn new(flows: Vec<FlowConfig>, executions: Vec<FlowExecutionResult>) -> Self {
        Self {
            format_version: BACKUP_FORMAT_VERSION.to_string(),
            created_at: Utc::now(),
            flows,
            executions,
        }
    }

    pub fn flow_ids(&self) -> Vec<&str> {
        self.flows.iter().map(|flow| flow.id.as_str()).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let backup: FlowBackup = serde_json::from_str(json)?;
        if backup.format_version != BACKUP_FORMAT_VERSION {
            return Err(LoomError::Serialization(format!(
                "unsupported backup format version `{}`",
                backup.format_version
            )));
        }
        Ok(backup)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|err| {
            LoomError::Serialization(format!("failed to write {}: {err}", path.display()))
        })
    }

    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|err| {
            LoomError::Serialization(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RestoreOptions {
    /// Replace flows that are already registered.
    pub overwrite: bool,
    pub restore_executions: bool,
    pub validate: bool,
    /// Snapshot the current state into the report before restoring.
    pub backup: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            restore_executions: true,
            validate: true,
            backup: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RestoreFailure {
    pub flow_id: String,
    pub error: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<RestoreFailure>,
    pub executions_restored: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<FlowBackup>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
