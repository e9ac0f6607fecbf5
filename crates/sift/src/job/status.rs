//! Job status taxonomy and the report fold that picks a terminal status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::plugin::{PluginKind, ReportStatus};

/// Lifecycle of a job.
///
/// `Pending` → running/partial statuses (one pair per pipeline stage) →
/// one of the final statuses. Final statuses are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    AnalyzersRunning,
    AnalyzersCompleted,
    ConnectorsRunning,
    ConnectorsCompleted,
    VisualizersRunning,
    VisualizersCompleted,
    /// Every plugin succeeded.
    ReportedWithoutFails,
    /// Analysis finished but some plugins failed.
    ReportedWithFails,
    Failed,
    Killed,
}

const ALL: [JobStatus; 12] = [
    JobStatus::Pending,
    JobStatus::Running,
    JobStatus::AnalyzersRunning,
    JobStatus::AnalyzersCompleted,
    JobStatus::ConnectorsRunning,
    JobStatus::ConnectorsCompleted,
    JobStatus::VisualizersRunning,
    JobStatus::VisualizersCompleted,
    JobStatus::ReportedWithoutFails,
    JobStatus::ReportedWithFails,
    JobStatus::Failed,
    JobStatus::Killed,
];

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::AnalyzersRunning => "analyzers_running",
            JobStatus::AnalyzersCompleted => "analyzers_completed",
            JobStatus::ConnectorsRunning => "connectors_running",
            JobStatus::ConnectorsCompleted => "connectors_completed",
            JobStatus::VisualizersRunning => "visualizers_running",
            JobStatus::VisualizersCompleted => "visualizers_completed",
            JobStatus::ReportedWithoutFails => "reported_without_fails",
            JobStatus::ReportedWithFails => "reported_with_fails",
            JobStatus::Failed => "failed",
            JobStatus::Killed => "killed",
        }
    }

    /// Statuses a job holds while a pipeline stage is executing.
    pub fn running_statuses() -> &'static [JobStatus] {
        &[
            JobStatus::Running,
            JobStatus::AnalyzersRunning,
            JobStatus::ConnectorsRunning,
            JobStatus::VisualizersRunning,
        ]
    }

    /// Statuses a job holds between two pipeline stages.
    pub fn partial_statuses() -> &'static [JobStatus] {
        &[
            JobStatus::AnalyzersCompleted,
            JobStatus::ConnectorsCompleted,
            JobStatus::VisualizersCompleted,
        ]
    }

    pub fn final_statuses() -> &'static [JobStatus] {
        &[
            JobStatus::ReportedWithoutFails,
            JobStatus::ReportedWithFails,
            JobStatus::Failed,
            JobStatus::Killed,
        ]
    }

    /// Every status that is not final.
    pub fn in_flight_statuses() -> Vec<JobStatus> {
        ALL.iter().copied().filter(|s| !s.is_final()).collect()
    }

    pub fn is_final(&self) -> bool {
        Self::final_statuses().contains(self)
    }

    /// Whether the pipeline step setter may write this value.
    pub fn is_pipeline_step(&self) -> bool {
        Self::running_statuses().contains(self) || Self::partial_statuses().contains(self)
    }

    /// Status while the given stage runs.
    pub fn running_for(kind: PluginKind) -> JobStatus {
        match kind {
            PluginKind::Analyzer => JobStatus::AnalyzersRunning,
            PluginKind::Connector => JobStatus::ConnectorsRunning,
            PluginKind::Visualizer => JobStatus::VisualizersRunning,
            PluginKind::Ingestor => JobStatus::Running,
        }
    }

    /// Status once the given stage has reported in full.
    pub fn completed_for(kind: PluginKind) -> Option<JobStatus> {
        match kind {
            PluginKind::Analyzer => Some(JobStatus::AnalyzersCompleted),
            PluginKind::Connector => Some(JobStatus::ConnectorsCompleted),
            PluginKind::Visualizer => Some(JobStatus::VisualizersCompleted),
            PluginKind::Ingestor => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL.iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

/// What a job becomes when some plugins succeeded and some failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixedOutcome {
    /// `ReportedWithFails`.
    #[default]
    Partial,
    /// `Failed`, as if nothing succeeded.
    Failed,
}

/// Folds per-plugin report statuses into one terminal job status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalStatusPolicy {
    #[serde(default)]
    pub mixed_outcome: MixedOutcome,
}

impl FinalStatusPolicy {
    /// Killed, failed and never-finished reports all count as failures.
    /// A job without reports has nothing that failed.
    pub fn fold<I>(&self, statuses: I) -> JobStatus
    where
        I: IntoIterator<Item = ReportStatus>,
    {
        let (mut succeeded, mut failed) = (0usize, 0usize);
        for status in statuses {
            if status == ReportStatus::Success {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }

        match (succeeded, failed) {
            (_, 0) => JobStatus::ReportedWithoutFails,
            (0, _) => JobStatus::Failed,
            _ => match self.mixed_outcome {
                MixedOutcome::Partial => JobStatus::ReportedWithFails,
                MixedOutcome::Failed => JobStatus::Failed,
            },
        }
    }
}
