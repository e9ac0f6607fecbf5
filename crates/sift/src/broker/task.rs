use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus};
use crate::plugin::{PluginKind, RuntimeConfiguration};

/// Unit of work placed on a named queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    JobPipeline {
        job_id: JobId,
        /// Per-config option overrides, keyed by config name.
        #[serde(default)]
        runtime_configuration: HashMap<String, RuntimeConfiguration>,
    },
    RunPlugin {
        job_id: JobId,
        plugin_path: String,
        config_pk: String,
        /// Stage the plugin runs in, so a report can be written even when
        /// the config has disappeared.
        kind: PluginKind,
        #[serde(default)]
        runtime_configuration: RuntimeConfiguration,
    },
    JobSetPipelineStatus {
        job_id: JobId,
        status: JobStatus,
    },
    JobSetFinalStatus {
        job_id: JobId,
    },
    Update {
        config_pk: String,
    },
    CheckStuckAnalysis {
        minutes_ago: i64,
        check_pending: bool,
    },
    RemoveOldJobs {
        /// Falls back to the configured retention when absent.
        retention_days: Option<u32>,
    },
    ExecuteIngestor {
        config_pk: String,
    },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::JobPipeline { .. } => "job_pipeline",
            Task::RunPlugin { .. } => "run_plugin",
            Task::JobSetPipelineStatus { .. } => "job_set_pipeline_status",
            Task::JobSetFinalStatus { .. } => "job_set_final_status",
            Task::Update { .. } => "update",
            Task::CheckStuckAnalysis { .. } => "check_stuck_analysis",
            Task::RemoveOldJobs { .. } => "remove_old_jobs",
            Task::ExecuteIngestor { .. } => "execute_ingestor",
        }
    }
}

/// A task together with the id the broker assigned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub task_id: String,
    pub task: Task,
}

impl QueuedTask {
    pub fn new(task: Task) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            task,
        }
    }
}

/// Message delivered to every subscriber of a queue's control topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Refresh the dataset of the plugin registered at `plugin_path`.
    UpdatePlugin { plugin_path: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_wire_format() {
        let task = Task::RunPlugin {
            job_id: 4,
            plugin_path: "sift.plugins.builtin.Echo".to_string(),
            config_pk: "Echo".to_string(),
            kind: PluginKind::Analyzer,
            runtime_configuration: RuntimeConfiguration::new(),
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["task"], json!("run_plugin"));
        assert_eq!(value["kind"], json!("analyzer"));
        assert_eq!(task.name(), "run_plugin");

        let back: Task = serde_json::from_value(json!({
            "task": "job_pipeline",
            "job_id": 4
        }))
        .unwrap();
        assert_eq!(
            back,
            Task::JobPipeline {
                job_id: 4,
                runtime_configuration: HashMap::new()
            }
        );
    }

    #[test]
    fn test_control_command_wire_format() {
        let cmd = ControlCommand::UpdatePlugin {
            plugin_path: "a.b.C".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"command": "update_plugin", "plugin_path": "a.b.C"})
        );
    }

    #[test]
    fn test_queued_task_ids_are_unique() {
        let a = QueuedTask::new(Task::JobSetFinalStatus { job_id: 1 });
        let b = QueuedTask::new(Task::JobSetFinalStatus { job_id: 1 });
        assert_ne!(a.task_id, b.task_id);
    }
}
